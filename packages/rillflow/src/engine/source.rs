//! Source adapter: typed ingest batches → Z-set deltas.
//!
//! A batch carries inserts, updates and deletes as JSON objects typed by
//! the declared table schema. Insert and update both mean "the row with
//! this key is now X": the previous row (if any) is retracted and the
//! new one asserted, so duplicates within a batch resolve last-wins with
//! intermediate retraction pairs, updates of absent keys degrade to
//! inserts, and deletes of absent keys are ignored.
//!
//! Conversion is staged: `batch_to_delta` validates and produces both
//! the delta and a [`TableCommit`], which is applied only after the
//! circuit step succeeded.

use crate::engine::types::{FastMap, Row, Schema, Value, ZSet};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::sync::Arc;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceBatch {
    #[serde(default)]
    pub inserts: Vec<serde_json::Value>,
    #[serde(default)]
    pub updates: Vec<serde_json::Value>,
    #[serde(default)]
    pub deletes: Vec<serde_json::Value>,
}

impl SourceBatch {
    pub fn new() -> Self {
        SourceBatch::default()
    }

    pub fn insert(mut self, row: serde_json::Value) -> Self {
        self.inserts.push(row);
        self
    }

    pub fn update(mut self, row: serde_json::Value) -> Self {
        self.updates.push(row);
        self
    }

    pub fn delete(mut self, row: serde_json::Value) -> Self {
        self.deletes.push(row);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    /// Concatenate another batch section-wise.
    pub fn merge(&mut self, other: SourceBatch) {
        self.inserts.extend(other.inserts);
        self.updates.extend(other.updates);
        self.deletes.extend(other.deletes);
    }
}

#[derive(Debug, Clone)]
pub struct TableDef {
    pub name: SmolStr,
    pub schema: Arc<Schema>,
    /// Indexes of the primary key columns.
    pub key: Vec<usize>,
    pub max_rows: Option<usize>,
}

/// Staged result of batch conversion, applied on step success.
#[derive(Debug, Default)]
pub struct TableCommit {
    changes: Vec<(Row, Option<Row>)>,
    new_count: usize,
    overflow: bool,
}

#[derive(Debug)]
pub struct TableState {
    pub def: TableDef,
    /// Primary key tuple → current row. May be incomplete once
    /// `max_rows` overflowed; `row_count` stays accurate regardless.
    rows: FastMap<Row, Row>,
    row_count: usize,
    overflow: bool,
}

fn object_fields<'a>(
    table: &str,
    raw: &'a serde_json::Value,
) -> Result<&'a serde_json::Map<String, serde_json::Value>> {
    raw.as_object().ok_or_else(|| {
        Error::schema(format!("row for table {:?} is not an object: {}", table, raw))
    })
}

impl TableState {
    pub fn new(def: TableDef) -> Self {
        TableState {
            def,
            rows: FastMap::default(),
            row_count: 0,
            overflow: false,
        }
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn overflow(&self) -> bool {
        self.overflow
    }

    /// Current materialization as a Z-set (weight 1 per stored row).
    pub fn snapshot(&self) -> ZSet {
        self.rows.values().map(|r| (r.clone(), 1)).collect()
    }

    /// Build a full typed row from a JSON object. Unknown columns and
    /// type mismatches are schema errors; missing key columns are schema
    /// errors; missing non-key columns read as NULL.
    fn build_row(&self, raw: &serde_json::Value) -> Result<Row> {
        let obj = object_fields(&self.def.name, raw)?;
        let schema = &self.def.schema;
        for name in obj.keys() {
            if !schema
                .columns
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(name))
            {
                return Err(Error::schema(format!(
                    "unknown column {:?} for table {:?}",
                    name, self.def.name
                )));
            }
        }
        let mut row = Row::new();
        for (idx, col) in schema.columns.iter().enumerate() {
            let raw_value = obj.get(col.name.as_str());
            let is_key = self.def.key.contains(&idx);
            let value = match raw_value {
                Some(v) => col.ty.value_from_json(v).map_err(|msg| {
                    Error::schema(format!(
                        "column {:?} of table {:?}: {}",
                        col.name, self.def.name, msg
                    ))
                })?,
                None => Value::Null,
            };
            if is_key && (raw_value.is_none() || value.is_null()) {
                return Err(Error::schema(format!(
                    "missing key column {:?} for table {:?}",
                    col.name, self.def.name
                )));
            }
            row.push(value);
        }
        Ok(row)
    }

    /// Extract just the key tuple (for deletes, which need only the key).
    fn build_key(&self, raw: &serde_json::Value) -> Result<Row> {
        let obj = object_fields(&self.def.name, raw)?;
        let mut key = Row::new();
        for &idx in &self.def.key {
            let col = self.def.schema.column(idx);
            let value = obj
                .get(col.name.as_str())
                .ok_or_else(|| {
                    Error::schema(format!(
                        "missing key column {:?} for table {:?}",
                        col.name, self.def.name
                    ))
                })
                .and_then(|v| {
                    col.ty.value_from_json(v).map_err(|msg| {
                        Error::schema(format!(
                            "column {:?} of table {:?}: {}",
                            col.name, self.def.name, msg
                        ))
                    })
                })?;
            if value.is_null() {
                return Err(Error::schema(format!(
                    "null key column {:?} for table {:?}",
                    col.name, self.def.name
                )));
            }
            key.push(value);
        }
        Ok(key)
    }

    /// Convert one batch into a Z-set delta plus the staged table
    /// changes. Does not mutate the table.
    pub fn batch_to_delta(&self, batch: &SourceBatch) -> Result<(ZSet, TableCommit)> {
        let mut staged: FastMap<Row, Option<Row>> = FastMap::default();
        let mut delta = ZSet::new();
        let mut count = self.row_count;

        let current = |staged: &FastMap<Row, Option<Row>>, key: &Row| -> Option<Row> {
            match staged.get(key) {
                Some(state) => state.clone(),
                None => self.rows.get(key).cloned(),
            }
        };

        for raw in batch.inserts.iter().chain(batch.updates.iter()) {
            let row = self.build_row(raw)?;
            let key = row.project(&self.def.key);
            match current(&staged, &key) {
                Some(old) => delta.insert(old, -1),
                None => count += 1,
            }
            delta.insert(row.clone(), 1);
            staged.insert(key, Some(row));
        }

        for raw in &batch.deletes {
            let key = self.build_key(raw)?;
            if let Some(old) = current(&staged, &key) {
                delta.insert(old, -1);
                staged.insert(key, None);
                count -= 1;
            }
            // deletes of absent keys are ignored
        }

        let over_cap = self
            .def
            .max_rows
            .map(|cap| count > cap)
            .unwrap_or(false);

        Ok((
            delta,
            TableCommit {
                changes: staged.into_iter().collect(),
                new_count: count,
                overflow: over_cap,
            },
        ))
    }

    pub fn commit(&mut self, commit: TableCommit) {
        for (key, change) in commit.changes {
            match change {
                Some(row) => {
                    let new_key = !self.rows.contains_key(&key);
                    let capped = self
                        .def
                        .max_rows
                        .map(|cap| self.rows.len() >= cap)
                        .unwrap_or(false);
                    if new_key && capped {
                        // Counted but not materialized.
                        self.overflow = true;
                    } else {
                        self.rows.insert(key, row);
                    }
                }
                None => {
                    self.rows.remove(&key);
                }
            }
        }
        self.row_count = commit.new_count;
        self.overflow |= commit.overflow;
    }
}
