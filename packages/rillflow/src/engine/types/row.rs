use super::datetime;
use super::value::Value;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use smol_str::SmolStr;

pub type Fields = SmallVec<[Value; 8]>;

/// An ordered tuple of field values. The column names and types live in
/// the [`Schema`] the planner attaches to each stream; a row by itself is
/// just the values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Row(pub Fields);

impl Row {
    pub fn new() -> Self {
        Row(SmallVec::new())
    }

    pub fn from_values(values: Vec<Value>) -> Self {
        Row(SmallVec::from_vec(values))
    }

    pub fn get(&self, idx: usize) -> &Value {
        &self.0[idx]
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, value: Value) {
        self.0.push(value);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.0.iter()
    }

    /// New row holding the fields at `indexes`, in that order.
    pub fn project(&self, indexes: &[usize]) -> Row {
        indexes.iter().map(|&i| self.0[i].clone()).collect()
    }

    /// New row of `self`'s fields followed by `other`'s.
    pub fn concat(&self, other: &Row) -> Row {
        let mut fields = self.0.clone();
        fields.extend(other.0.iter().cloned());
        Row(fields)
    }

    pub fn to_json(&self, schema: &Schema) -> serde_json::Value {
        let mut obj = serde_json::Map::with_capacity(self.0.len());
        for (value, col) in self.0.iter().zip(schema.columns.iter()) {
            obj.insert(col.name.to_string(), value.to_json());
        }
        serde_json::Value::Object(obj)
    }
}

impl FromIterator<Value> for Row {
    fn from_iter<T: IntoIterator<Item = Value>>(iter: T) -> Self {
        Row(iter.into_iter().collect())
    }
}

/// Declared column types. DECIMAL is stored as FLOAT; no precision
/// guarantees are made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Int,
    Float,
    Bool,
    Text,
    DateTime,
    Decimal,
}

impl ColumnType {
    /// Parse a SQL type name.
    pub fn parse(name: &str) -> Option<ColumnType> {
        match name.to_ascii_uppercase().as_str() {
            "INT" | "INTEGER" | "BIGINT" => Some(ColumnType::Int),
            "FLOAT" | "REAL" | "DOUBLE" => Some(ColumnType::Float),
            "BOOL" | "BOOLEAN" => Some(ColumnType::Bool),
            "TEXT" | "VARCHAR" | "STRING" => Some(ColumnType::Text),
            "DATETIME" | "TIMESTAMP" => Some(ColumnType::DateTime),
            "DECIMAL" | "NUMERIC" => Some(ColumnType::Decimal),
            _ => None,
        }
    }

    /// Convert a JSON field into a typed value, or explain why it does
    /// not fit.
    pub fn value_from_json(&self, raw: &serde_json::Value) -> std::result::Result<Value, String> {
        if raw.is_null() {
            return Ok(Value::Null);
        }
        match self {
            ColumnType::Int => raw
                .as_i64()
                .map(Value::Int)
                .ok_or_else(|| format!("expected integer, got {}", raw)),
            ColumnType::Float | ColumnType::Decimal => raw
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| format!("expected float, got {}", raw)),
            ColumnType::Bool => raw
                .as_bool()
                .map(Value::Bool)
                .ok_or_else(|| format!("expected boolean, got {}", raw)),
            ColumnType::Text => raw
                .as_str()
                .map(|s| Value::Str(SmolStr::new(s)))
                .ok_or_else(|| format!("expected text, got {}", raw)),
            ColumnType::DateTime => {
                let s = raw
                    .as_str()
                    .ok_or_else(|| format!("expected datetime text, got {}", raw))?;
                datetime::parse_datetime_text(s)
                    .map(Value::DateTime)
                    .ok_or_else(|| format!("unrecognized datetime {:?}", s))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: SmolStr,
    /// Qualifier used for name resolution while planning (table name or
    /// alias); irrelevant at runtime.
    pub table: Option<SmolStr>,
    pub ty: ColumnType,
}

impl ColumnDef {
    pub fn new(name: impl Into<SmolStr>, ty: ColumnType) -> Self {
        ColumnDef {
            name: name.into(),
            table: None,
            ty,
        }
    }

    pub fn qualified(name: impl Into<SmolStr>, table: impl Into<SmolStr>, ty: ColumnType) -> Self {
        ColumnDef {
            name: name.into(),
            table: Some(table.into()),
            ty,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    pub columns: Vec<ColumnDef>,
}

impl Schema {
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        Schema { columns }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column(&self, idx: usize) -> &ColumnDef {
        &self.columns[idx]
    }

    /// Resolve a possibly qualified column reference to its index.
    pub fn resolve(&self, qualifier: Option<&str>, name: &str) -> Result<usize> {
        let mut found = None;
        for (i, col) in self.columns.iter().enumerate() {
            if !col.name.eq_ignore_ascii_case(name) {
                continue;
            }
            if let Some(q) = qualifier {
                match &col.table {
                    Some(t) if t.eq_ignore_ascii_case(q) => {}
                    _ => continue,
                }
            }
            if found.is_some() {
                return Err(Error::unsupported(format!("ambiguous column {:?}", name)));
            }
            found = Some(i);
        }
        found.ok_or_else(|| match qualifier {
            Some(q) => Error::unsupported(format!("unknown column {:?}.{:?}", q, name)),
            None => Error::unsupported(format!("unknown column {:?}", name)),
        })
    }

    /// Same schema with every column re-qualified, as after `FROM t AS a`.
    pub fn qualify(&self, table: &str) -> Schema {
        Schema {
            columns: self
                .columns
                .iter()
                .map(|c| ColumnDef {
                    name: c.name.clone(),
                    table: Some(SmolStr::new(table)),
                    ty: c.ty,
                })
                .collect(),
        }
    }

    pub fn concat(&self, other: &Schema) -> Schema {
        let mut columns = self.columns.clone();
        columns.extend(other.columns.iter().cloned());
        Schema { columns }
    }
}

#[cfg(test)]
mod row_tests {
    use super::*;

    fn schema() -> Schema {
        Schema::new(vec![
            ColumnDef::qualified("id", "orders", ColumnType::Int),
            ColumnDef::qualified("status", "orders", ColumnType::Text),
        ])
    }

    #[test]
    fn project_and_concat() {
        let row = Row::from_values(vec![Value::Int(1), Value::from("pending")]);
        assert_eq!(row.project(&[1]), Row::from_values(vec!["pending".into()]));
        let joined = row.concat(&Row::from_values(vec![Value::Int(9)]));
        assert_eq!(joined.len(), 3);
        assert_eq!(joined.get(2), &Value::Int(9));
    }

    #[test]
    fn resolve_qualified_and_bare() {
        let s = schema();
        assert_eq!(s.resolve(None, "status").unwrap(), 1);
        assert_eq!(s.resolve(Some("orders"), "id").unwrap(), 0);
        assert!(s.resolve(Some("other"), "id").is_err());
        assert!(s.resolve(None, "missing").is_err());
    }

    #[test]
    fn resolve_reports_ambiguity() {
        let s = schema().concat(&Schema::new(vec![ColumnDef::qualified(
            "id",
            "items",
            ColumnType::Int,
        )]));
        assert!(s.resolve(None, "id").is_err());
        assert_eq!(s.resolve(Some("items"), "id").unwrap(), 2);
    }

    #[test]
    fn json_roundtrip_respects_schema() {
        let s = schema();
        let row = Row::from_values(vec![Value::Int(7), Value::from("shipped")]);
        let json = row.to_json(&s);
        assert_eq!(json["id"], serde_json::json!(7));
        assert_eq!(json["status"], serde_json::json!("shipped"));
    }

    #[test]
    fn column_type_conversion() {
        assert_eq!(
            ColumnType::Int.value_from_json(&serde_json::json!(5)).unwrap(),
            Value::Int(5)
        );
        assert!(ColumnType::Int.value_from_json(&serde_json::json!("x")).is_err());
        assert_eq!(
            ColumnType::Decimal
                .value_from_json(&serde_json::json!(1.5))
                .unwrap(),
            Value::Float(1.5)
        );
        assert!(ColumnType::DateTime
            .value_from_json(&serde_json::json!("2024-01-02 03:04:05"))
            .unwrap()
            .as_datetime()
            .is_some());
    }
}
