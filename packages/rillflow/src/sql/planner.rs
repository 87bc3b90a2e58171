//! Planner: AST → relational tree with resolved column indexes.
//!
//! Each SELECT becomes a tree of Scan/Filter/Project/Join/Aggregate/
//! Window/SetOp/TopK nodes whose scalar expressions are lowered to the
//! runtime IR. Subqueries are only supported as top-level WHERE
//! conjuncts (`IN (SELECT …)`, `EXISTS (…)`) and become semi/anti
//! joins; anything outside the supported surface is `UnsupportedSql`.

use super::ast::{self, Expr, Literal, OverClause, Query, QueryBody, Select, SelectItem};
use crate::engine::eval::{BinaryOp, ScalarExpr, ScalarFunc};
use crate::engine::operators::aggregate::{AggKind, AggSpec};
use crate::engine::operators::asof::AsofDirection;
use crate::engine::operators::distinct::SetOpKind;
use crate::engine::operators::window::{WindowAggKind, WindowFunc, WindowSpec};
use crate::engine::types::{ColumnDef, ColumnType, Schema, Value};
use crate::error::{Error, Result};
use smol_str::SmolStr;
use std::sync::Arc;

pub type Catalog<'a> = &'a dyn Fn(&str) -> Option<Arc<Schema>>;

#[derive(Debug, Clone)]
pub enum RelNode {
    Scan {
        table: SmolStr,
    },
    Filter {
        input: Box<RelNode>,
        predicate: ScalarExpr,
    },
    Project {
        input: Box<RelNode>,
        exprs: Vec<ScalarExpr>,
    },
    Join {
        left: Box<RelNode>,
        right: Box<RelNode>,
        kind: ast::JoinKind,
        left_key: Vec<ScalarExpr>,
        right_key: Vec<ScalarExpr>,
        left_width: usize,
        right_width: usize,
    },
    Semi {
        left: Box<RelNode>,
        right: Box<RelNode>,
        left_key: Vec<ScalarExpr>,
        right_key: Vec<ScalarExpr>,
        anti: bool,
    },
    Asof {
        left: Box<RelNode>,
        right: Box<RelNode>,
        left_key: Vec<ScalarExpr>,
        right_key: Vec<ScalarExpr>,
        left_ts: ScalarExpr,
        right_ts: ScalarExpr,
        direction: AsofDirection,
    },
    Aggregate {
        input: Box<RelNode>,
        group: Vec<ScalarExpr>,
        aggs: Vec<AggSpec>,
    },
    Window {
        input: Box<RelNode>,
        spec: WindowSpec,
    },
    Distinct {
        input: Box<RelNode>,
    },
    Union {
        left: Box<RelNode>,
        right: Box<RelNode>,
    },
    SetOp {
        left: Box<RelNode>,
        right: Box<RelNode>,
        kind: SetOpKind,
        all: bool,
    },
    TopK {
        input: Box<RelNode>,
        order: Vec<(ScalarExpr, bool)>,
        limit: usize,
        offset: usize,
    },
}

impl RelNode {
    pub fn collect_tables(&self, out: &mut Vec<SmolStr>) {
        match self {
            RelNode::Scan { table } => {
                if !out.contains(table) {
                    out.push(table.clone());
                }
            }
            RelNode::Filter { input, .. }
            | RelNode::Project { input, .. }
            | RelNode::Aggregate { input, .. }
            | RelNode::Window { input, .. }
            | RelNode::Distinct { input }
            | RelNode::TopK { input, .. } => input.collect_tables(out),
            RelNode::Join { left, right, .. }
            | RelNode::Semi { left, right, .. }
            | RelNode::Asof { left, right, .. }
            | RelNode::Union { left, right }
            | RelNode::SetOp { left, right, .. } => {
                left.collect_tables(out);
                right.collect_tables(out);
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ViewPlan {
    pub root: RelNode,
    pub schema: Arc<Schema>,
    /// ORDER BY over the output schema, applied at materialization.
    pub order_by: Vec<(ScalarExpr, bool)>,
    pub tables: Vec<SmolStr>,
}

struct Planned {
    node: RelNode,
    schema: Schema,
}

pub fn plan_view(query: &Query, catalog: Catalog) -> Result<ViewPlan> {
    let planned = plan_query(query, catalog)?;
    let order_by = query
        .order_by
        .iter()
        .map(|item| Ok((lower(&item.expr, &planned.schema)?, item.desc)))
        .collect::<Result<Vec<_>>>()?;
    let mut tables = Vec::new();
    planned.node.collect_tables(&mut tables);
    Ok(ViewPlan {
        root: planned.node,
        schema: Arc::new(planned.schema),
        order_by,
        tables,
    })
}

/// Plan a full query, applying LIMIT/OFFSET as a TopK over the body.
fn plan_query(query: &Query, catalog: Catalog) -> Result<Planned> {
    let planned = plan_body(&query.body, catalog)?;
    match query.limit {
        Some(limit) => {
            let order = query
                .order_by
                .iter()
                .map(|item| Ok((lower(&item.expr, &planned.schema)?, item.desc)))
                .collect::<Result<Vec<_>>>()?;
            Ok(Planned {
                node: RelNode::TopK {
                    input: Box::new(planned.node),
                    order,
                    limit: limit as usize,
                    offset: query.offset.unwrap_or(0) as usize,
                },
                schema: planned.schema,
            })
        }
        None => Ok(planned),
    }
}

fn plan_body(body: &QueryBody, catalog: Catalog) -> Result<Planned> {
    match body {
        QueryBody::Select(select) => plan_select(select, catalog),
        QueryBody::SetOp {
            op,
            all,
            left,
            right,
        } => {
            let l = plan_body(left, catalog)?;
            let r = plan_body(right, catalog)?;
            if l.schema.len() != r.schema.len() {
                return Err(Error::unsupported(format!(
                    "set operation arms have {} and {} columns",
                    l.schema.len(),
                    r.schema.len()
                )));
            }
            let node = match op {
                ast::SetOperator::Union => {
                    let union = RelNode::Union {
                        left: Box::new(l.node),
                        right: Box::new(r.node),
                    };
                    if *all {
                        union
                    } else {
                        RelNode::Distinct {
                            input: Box::new(union),
                        }
                    }
                }
                ast::SetOperator::Except => RelNode::SetOp {
                    left: Box::new(l.node),
                    right: Box::new(r.node),
                    kind: SetOpKind::Except,
                    all: *all,
                },
                ast::SetOperator::Intersect => RelNode::SetOp {
                    left: Box::new(l.node),
                    right: Box::new(r.node),
                    kind: SetOpKind::Intersect,
                    all: *all,
                },
            };
            Ok(Planned {
                node,
                schema: l.schema,
            })
        }
    }
}

fn scan(table: &ast::TableRef, catalog: Catalog) -> Result<Planned> {
    let schema = catalog(table.name.as_str())
        .ok_or_else(|| Error::unsupported(format!("unknown table {:?}", table.name)))?;
    let qualifier = table.alias.as_deref().unwrap_or(table.name.as_str());
    Ok(Planned {
        node: RelNode::Scan {
            table: table.name.clone(),
        },
        schema: schema.qualify(qualifier),
    })
}

/// Split an ON equality into (left-side expr, right-side expr).
fn split_equality(
    a: &Expr,
    b: &Expr,
    left: &Schema,
    right: &Schema,
) -> Result<(ScalarExpr, ScalarExpr)> {
    if let (Ok(l), Ok(r)) = (lower(a, left), lower(b, right)) {
        return Ok((l, r));
    }
    if let (Ok(l), Ok(r)) = (lower(b, left), lower(a, right)) {
        return Ok((l, r));
    }
    Err(Error::unsupported(
        "join predicate must relate the two join sides",
    ))
}

struct JoinOn {
    left_key: Vec<ScalarExpr>,
    right_key: Vec<ScalarExpr>,
    /// The single temporal inequality of an ASOF join.
    temporal: Option<(ScalarExpr, ScalarExpr, AsofDirection)>,
}

fn analyze_on(
    on: &Expr,
    left: &Schema,
    right: &Schema,
    asof: bool,
) -> Result<JoinOn> {
    let mut out = JoinOn {
        left_key: Vec::new(),
        right_key: Vec::new(),
        temporal: None,
    };
    for conjunct in on.clone().conjuncts() {
        match &conjunct {
            Expr::Binary {
                op: ast::BinaryOperator::Eq,
                left: a,
                right: b,
            } => {
                let (l, r) = split_equality(a, b, left, right)?;
                out.left_key.push(l);
                out.right_key.push(r);
            }
            Expr::Binary {
                op: op @ (ast::BinaryOperator::GtEq | ast::BinaryOperator::LtEq),
                left: a,
                right: b,
            } if asof => {
                if out.temporal.is_some() {
                    return Err(Error::unsupported(
                        "asof join takes exactly one timestamp inequality",
                    ));
                }
                // l >= r means "largest right ts ≤ left ts": backward.
                let (l, r, flipped) = match (lower(a, left), lower(b, right)) {
                    (Ok(l), Ok(r)) => (l, r, false),
                    _ => match (lower(b, left), lower(a, right)) {
                        (Ok(l), Ok(r)) => (l, r, true),
                        _ => {
                            return Err(Error::unsupported(
                                "asof inequality must relate the two join sides",
                            ))
                        }
                    },
                };
                let ge = matches!(op, ast::BinaryOperator::GtEq) != flipped;
                let direction = if ge {
                    AsofDirection::Backward
                } else {
                    AsofDirection::Forward
                };
                out.temporal = Some((l, r, direction));
            }
            _ => {
                return Err(Error::unsupported(
                    "join conditions must be equality predicates",
                ))
            }
        }
    }
    Ok(out)
}

fn plan_from(from: &ast::FromClause, catalog: Catalog) -> Result<Planned> {
    let mut acc = scan(&from.base, catalog)?;
    for join in &from.joins {
        let right = scan(&join.table, catalog)?;
        let combined = acc.schema.concat(&right.schema);
        match join.kind {
            ast::JoinKind::Cross => {
                acc = Planned {
                    node: RelNode::Join {
                        left: Box::new(acc.node),
                        right: Box::new(right.node),
                        kind: ast::JoinKind::Cross,
                        left_key: vec![],
                        right_key: vec![],
                        left_width: acc.schema.len(),
                        right_width: right.schema.len(),
                    },
                    schema: combined,
                };
            }
            ast::JoinKind::Asof => {
                let on = join.on.as_ref().ok_or_else(|| {
                    Error::unsupported("asof join requires an ON clause")
                })?;
                let analyzed = analyze_on(on, &acc.schema, &right.schema, true)?;
                let (left_ts, right_ts, direction) = analyzed.temporal.ok_or_else(|| {
                    Error::unsupported("asof join requires a timestamp inequality")
                })?;
                if analyzed.left_key.is_empty() {
                    return Err(Error::unsupported(
                        "asof join requires at least one key equality",
                    ));
                }
                acc = Planned {
                    node: RelNode::Asof {
                        left: Box::new(acc.node),
                        right: Box::new(right.node),
                        left_key: analyzed.left_key,
                        right_key: analyzed.right_key,
                        left_ts,
                        right_ts,
                        direction,
                    },
                    schema: combined,
                };
            }
            kind => {
                let on = join
                    .on
                    .as_ref()
                    .ok_or_else(|| Error::unsupported("join requires an ON clause"))?;
                let analyzed = analyze_on(on, &acc.schema, &right.schema, false)?;
                if analyzed.left_key.is_empty() {
                    return Err(Error::unsupported(
                        "join requires at least one equality",
                    ));
                }
                acc = Planned {
                    node: RelNode::Join {
                        left: Box::new(acc.node),
                        right: Box::new(right.node),
                        kind,
                        left_key: analyzed.left_key,
                        right_key: analyzed.right_key,
                        left_width: acc.schema.len(),
                        right_width: right.schema.len(),
                    },
                    schema: combined,
                };
            }
        }
    }
    Ok(acc)
}

// --- aggregate & window detection ---

fn is_aggregate_name(name: &str) -> bool {
    matches!(
        name.to_ascii_uppercase().as_str(),
        "COUNT" | "SUM" | "AVG" | "MIN" | "MAX"
    )
}

fn expr_has_aggregate(expr: &Expr) -> bool {
    match expr {
        Expr::Function {
            name, over: None, ..
        } if is_aggregate_name(name) => true,
        Expr::Function { args, .. } => args.iter().any(expr_has_aggregate),
        Expr::Unary { expr, .. } | Expr::IsNull { expr, .. } | Expr::Cast { expr, .. } => {
            expr_has_aggregate(expr)
        }
        Expr::Binary { left, right, .. } => {
            expr_has_aggregate(left) || expr_has_aggregate(right)
        }
        Expr::Between {
            expr, low, high, ..
        } => expr_has_aggregate(expr) || expr_has_aggregate(low) || expr_has_aggregate(high),
        Expr::InList { expr, list, .. } => {
            expr_has_aggregate(expr) || list.iter().any(expr_has_aggregate)
        }
        Expr::Like { expr, pattern, .. } => {
            expr_has_aggregate(expr) || expr_has_aggregate(pattern)
        }
        Expr::Case {
            operand,
            branches,
            otherwise,
        } => {
            operand.as_deref().map(expr_has_aggregate).unwrap_or(false)
                || branches
                    .iter()
                    .any(|(w, t)| expr_has_aggregate(w) || expr_has_aggregate(t))
                || otherwise.as_deref().map(expr_has_aggregate).unwrap_or(false)
        }
        _ => false,
    }
}

fn expr_has_window(expr: &Expr) -> bool {
    match expr {
        Expr::Function { over: Some(_), .. } => true,
        Expr::Function { args, .. } => args.iter().any(expr_has_window),
        Expr::Unary { expr, .. } | Expr::IsNull { expr, .. } | Expr::Cast { expr, .. } => {
            expr_has_window(expr)
        }
        Expr::Binary { left, right, .. } => expr_has_window(left) || expr_has_window(right),
        Expr::Case {
            operand,
            branches,
            otherwise,
        } => {
            operand.as_deref().map(expr_has_window).unwrap_or(false)
                || branches
                    .iter()
                    .any(|(w, t)| expr_has_window(w) || expr_has_window(t))
                || otherwise.as_deref().map(expr_has_window).unwrap_or(false)
        }
        _ => false,
    }
}

// --- type inference (best effort; runtime values carry their types) ---

fn infer_type(expr: &Expr, schema: &Schema) -> ColumnType {
    match expr {
        Expr::Ident { qualifier, name } => schema
            .resolve(qualifier.as_deref(), name)
            .map(|i| schema.column(i).ty)
            .unwrap_or(ColumnType::Text),
        Expr::Literal(Literal::Int(_)) => ColumnType::Int,
        Expr::Literal(Literal::Float(_)) => ColumnType::Float,
        Expr::Literal(Literal::Bool(_)) => ColumnType::Bool,
        Expr::Literal(_) => ColumnType::Text,
        Expr::Unary { expr, .. } => infer_type(expr, schema),
        Expr::Binary { op, left, right } => match op {
            ast::BinaryOperator::Plus
            | ast::BinaryOperator::Minus
            | ast::BinaryOperator::Multiply
            | ast::BinaryOperator::Divide => {
                if infer_type(left, schema) == ColumnType::Float
                    || infer_type(right, schema) == ColumnType::Float
                {
                    ColumnType::Float
                } else {
                    ColumnType::Int
                }
            }
            _ => ColumnType::Bool,
        },
        Expr::IsNull { .. }
        | Expr::Between { .. }
        | Expr::InList { .. }
        | Expr::InSubquery { .. }
        | Expr::Exists { .. }
        | Expr::Like { .. } => ColumnType::Bool,
        Expr::Case {
            branches,
            otherwise,
            ..
        } => branches
            .first()
            .map(|(_, t)| infer_type(t, schema))
            .or_else(|| otherwise.as_deref().map(|e| infer_type(e, schema)))
            .unwrap_or(ColumnType::Text),
        Expr::Cast { ty, .. } => *ty,
        Expr::Function {
            name, args, star, ..
        } => match name.to_ascii_uppercase().as_str() {
            "COUNT" | "ROW_NUMBER" | "LENGTH" | "INSTR" | "UNICODE" | "UNIXEPOCH" => {
                ColumnType::Int
            }
            "AVG" | "JULIANDAY" => ColumnType::Float,
            "SUM" | "MIN" | "MAX" | "ABS" | "COALESCE" | "NULLIF" | "LAG" | "LEAD" | "IF" => {
                if *star {
                    ColumnType::Int
                } else {
                    args.first()
                        .map(|a| infer_type(a, schema))
                        .unwrap_or(ColumnType::Int)
                }
            }
            "TYPEOF" | "UPPER" | "LOWER" | "SUBSTR" | "TRIM" | "REPLACE" | "CONCAT"
            | "REVERSE" | "REPEAT" | "PRINTF" | "FORMAT" | "HEX" | "CHAR" | "DATE" | "TIME"
            | "DATETIME" | "STRFTIME" => ColumnType::Text,
            _ => ColumnType::Text,
        },
    }
}

fn item_name(item: &SelectItem, position: usize) -> SmolStr {
    match item {
        SelectItem::Expr {
            alias: Some(alias), ..
        } => alias.clone(),
        SelectItem::Expr {
            expr: Expr::Ident { name, .. },
            ..
        } => name.clone(),
        SelectItem::Expr {
            expr: Expr::Function { name, .. },
            ..
        } => SmolStr::new(name.to_ascii_lowercase()),
        _ => SmolStr::new(format!("col{}", position)),
    }
}

// --- scalar lowering ---

fn scalar_func(name: &str, argc: usize) -> Result<ScalarFunc> {
    let func = match name.to_ascii_uppercase().as_str() {
        "COALESCE" => ScalarFunc::Coalesce,
        "NULLIF" => ScalarFunc::Nullif,
        "ABS" => ScalarFunc::Abs,
        "IF" => ScalarFunc::If,
        "UPPER" => ScalarFunc::Upper,
        "LOWER" => ScalarFunc::Lower,
        "LENGTH" => ScalarFunc::Length,
        "SUBSTR" | "SUBSTRING" => ScalarFunc::Substr,
        "TRIM" => ScalarFunc::Trim,
        "REPLACE" => ScalarFunc::Replace,
        "CONCAT" => ScalarFunc::Concat,
        "REVERSE" => ScalarFunc::Reverse,
        "REPEAT" => ScalarFunc::Repeat,
        "PRINTF" | "FORMAT" => ScalarFunc::Printf,
        "HEX" => ScalarFunc::Hex,
        "CHAR" => ScalarFunc::Char,
        "UNICODE" => ScalarFunc::Unicode,
        "INSTR" => ScalarFunc::Instr,
        "TYPEOF" => ScalarFunc::Typeof,
        "DATE" => ScalarFunc::Date,
        "TIME" => ScalarFunc::Time,
        "DATETIME" => ScalarFunc::Datetime,
        "STRFTIME" => ScalarFunc::Strftime,
        "JULIANDAY" => ScalarFunc::Julianday,
        "UNIXEPOCH" => ScalarFunc::Unixepoch,
        other => {
            return Err(Error::unsupported(format!("unknown function {}", other)));
        }
    };
    let arity_ok = match func {
        ScalarFunc::Coalesce | ScalarFunc::Concat | ScalarFunc::Char => argc >= 1,
        ScalarFunc::Nullif | ScalarFunc::Repeat | ScalarFunc::Instr => argc == 2,
        ScalarFunc::Abs
        | ScalarFunc::Upper
        | ScalarFunc::Lower
        | ScalarFunc::Length
        | ScalarFunc::Reverse
        | ScalarFunc::Hex
        | ScalarFunc::Unicode
        | ScalarFunc::Typeof => argc == 1,
        ScalarFunc::If | ScalarFunc::Replace => argc == 3,
        ScalarFunc::Substr | ScalarFunc::Trim => argc == 2 || argc == 3,
        ScalarFunc::Printf | ScalarFunc::Strftime => argc >= 1,
        ScalarFunc::Date
        | ScalarFunc::Time
        | ScalarFunc::Datetime
        | ScalarFunc::Julianday
        | ScalarFunc::Unixepoch => argc >= 1,
    };
    if !arity_ok {
        return Err(Error::unsupported(format!(
            "wrong number of arguments to {}",
            name
        )));
    }
    Ok(func)
}

fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(i) => Value::Int(*i),
        Literal::Float(f) => Value::Float(*f),
        Literal::Str(s) => Value::Str(SmolStr::new(s)),
    }
}

fn map_binop(op: ast::BinaryOperator) -> BinaryOp {
    match op {
        ast::BinaryOperator::Plus => BinaryOp::Add,
        ast::BinaryOperator::Minus => BinaryOp::Sub,
        ast::BinaryOperator::Multiply => BinaryOp::Mul,
        ast::BinaryOperator::Divide => BinaryOp::Div,
        ast::BinaryOperator::Eq => BinaryOp::Eq,
        ast::BinaryOperator::NotEq => BinaryOp::NotEq,
        ast::BinaryOperator::Lt => BinaryOp::Lt,
        ast::BinaryOperator::LtEq => BinaryOp::LtEq,
        ast::BinaryOperator::Gt => BinaryOp::Gt,
        ast::BinaryOperator::GtEq => BinaryOp::GtEq,
        ast::BinaryOperator::And => BinaryOp::And,
        ast::BinaryOperator::Or => BinaryOp::Or,
    }
}

/// Lower a scalar expression against a schema. Aggregates, window calls
/// and subqueries are rejected here; the contexts that allow them strip
/// them out first.
pub fn lower(expr: &Expr, schema: &Schema) -> Result<ScalarExpr> {
    match expr {
        Expr::Literal(lit) => Ok(ScalarExpr::Literal(literal_value(lit))),
        Expr::Ident { qualifier, name } => {
            let idx = schema.resolve(qualifier.as_deref(), name)?;
            Ok(ScalarExpr::Column(idx))
        }
        Expr::Unary { op, expr } => {
            let inner = lower(expr, schema)?;
            Ok(match op {
                ast::UnaryOperator::Minus => ScalarExpr::Neg(Box::new(inner)),
                ast::UnaryOperator::Plus => inner,
                ast::UnaryOperator::Not => ScalarExpr::Not(Box::new(inner)),
            })
        }
        Expr::Binary { op, left, right } => Ok(ScalarExpr::Binary {
            op: map_binop(*op),
            left: Box::new(lower(left, schema)?),
            right: Box::new(lower(right, schema)?),
        }),
        Expr::IsNull { expr, negated } => Ok(ScalarExpr::IsNull {
            expr: Box::new(lower(expr, schema)?),
            negated: *negated,
        }),
        Expr::Between {
            expr,
            low,
            high,
            negated,
        } => Ok(ScalarExpr::Between {
            expr: Box::new(lower(expr, schema)?),
            low: Box::new(lower(low, schema)?),
            high: Box::new(lower(high, schema)?),
            negated: *negated,
        }),
        Expr::InList {
            expr,
            list,
            negated,
        } => Ok(ScalarExpr::InList {
            expr: Box::new(lower(expr, schema)?),
            list: list
                .iter()
                .map(|e| lower(e, schema))
                .collect::<Result<Vec<_>>>()?,
            negated: *negated,
        }),
        Expr::InSubquery { .. } | Expr::Exists { .. } => Err(Error::unsupported(
            "subqueries are only supported as top-level WHERE conjuncts",
        )),
        Expr::Like {
            expr,
            pattern,
            negated,
            glob,
        } => {
            let e = Box::new(lower(expr, schema)?);
            let p = Box::new(lower(pattern, schema)?);
            Ok(if *glob {
                ScalarExpr::Glob {
                    expr: e,
                    pattern: p,
                    negated: *negated,
                }
            } else {
                ScalarExpr::Like {
                    expr: e,
                    pattern: p,
                    negated: *negated,
                }
            })
        }
        Expr::Case {
            operand,
            branches,
            otherwise,
        } => Ok(ScalarExpr::Case {
            operand: operand
                .as_deref()
                .map(|e| lower(e, schema).map(Box::new))
                .transpose()?,
            branches: branches
                .iter()
                .map(|(w, t)| Ok((lower(w, schema)?, lower(t, schema)?)))
                .collect::<Result<Vec<_>>>()?,
            otherwise: otherwise
                .as_deref()
                .map(|e| lower(e, schema).map(Box::new))
                .transpose()?,
        }),
        Expr::Cast { expr, ty } => {
            let target = match ty {
                ColumnType::Int => ColumnType::Int,
                ColumnType::Float | ColumnType::Decimal => ColumnType::Float,
                ColumnType::Text => ColumnType::Text,
                other => {
                    return Err(Error::unsupported(format!(
                        "CAST target {:?} not supported",
                        other
                    )))
                }
            };
            Ok(ScalarExpr::Cast {
                expr: Box::new(lower(expr, schema)?),
                ty: target,
            })
        }
        Expr::Function {
            name,
            over: Some(_),
            ..
        } => Err(Error::unsupported(format!(
            "window function {} not allowed here",
            name
        ))),
        Expr::Function {
            name,
            args,
            distinct,
            star,
            over: None,
        } => {
            if is_aggregate_name(name) {
                return Err(Error::unsupported(format!(
                    "aggregate {} not allowed here",
                    name
                )));
            }
            if *distinct || *star {
                return Err(Error::unsupported(format!(
                    "bad arguments to function {}",
                    name
                )));
            }
            let func = scalar_func(name, args.len())?;
            Ok(ScalarExpr::Func {
                func,
                args: args
                    .iter()
                    .map(|a| lower(a, schema))
                    .collect::<Result<Vec<_>>>()?,
            })
        }
    }
}

// --- aggregate planning ---

fn agg_kind(name: &str, distinct: bool, star: bool) -> Result<AggKind> {
    let upper = name.to_ascii_uppercase();
    match (upper.as_str(), distinct, star) {
        ("COUNT", false, true) => Ok(AggKind::CountStar),
        ("COUNT", false, false) => Ok(AggKind::Count),
        ("COUNT", true, false) => Ok(AggKind::CountDistinct),
        ("SUM", false, false) => Ok(AggKind::Sum),
        ("AVG", false, false) => Ok(AggKind::Avg),
        ("MIN", false, false) => Ok(AggKind::Min),
        ("MAX", false, false) => Ok(AggKind::Max),
        _ => Err(Error::unsupported(format!(
            "unsupported aggregate form {}",
            name
        ))),
    }
}

struct AggContext<'a> {
    input: &'a Schema,
    group_by: &'a [Expr],
    specs: Vec<AggSpec>,
}

impl<'a> AggContext<'a> {
    fn spec_index(&mut self, spec: AggSpec) -> usize {
        if let Some(i) = self.specs.iter().position(|s| *s == spec) {
            i
        } else {
            self.specs.push(spec);
            self.specs.len() - 1
        }
    }

    /// Lower an expression in post-aggregation position: group
    /// expressions become group columns, aggregate calls become
    /// aggregate columns, anything else must recurse into one of those.
    fn lower_post(&mut self, expr: &Expr) -> Result<ScalarExpr> {
        if let Some(i) = self.group_by.iter().position(|g| g == expr) {
            return Ok(ScalarExpr::Column(i));
        }
        match expr {
            Expr::Function {
                name,
                args,
                distinct,
                star,
                over: None,
            } if is_aggregate_name(name) => {
                let kind = agg_kind(name, *distinct, *star)?;
                let arg = match (kind, args.first()) {
                    (AggKind::CountStar, _) => ScalarExpr::Literal(Value::Null),
                    (_, Some(arg)) => lower(arg, self.input)?,
                    (_, None) => {
                        return Err(Error::unsupported(format!(
                            "aggregate {} requires an argument",
                            name
                        )))
                    }
                };
                let idx = self.spec_index(AggSpec { kind, expr: arg });
                Ok(ScalarExpr::Column(self.group_by.len() + idx))
            }
            Expr::Literal(lit) => Ok(ScalarExpr::Literal(literal_value(lit))),
            Expr::Ident { qualifier, name } => Err(Error::unsupported(format!(
                "column {}{} must appear in GROUP BY or inside an aggregate",
                qualifier
                    .as_ref()
                    .map(|q| format!("{}.", q))
                    .unwrap_or_default(),
                name
            ))),
            Expr::Unary { op, expr } => {
                let inner = self.lower_post(expr)?;
                Ok(match op {
                    ast::UnaryOperator::Minus => ScalarExpr::Neg(Box::new(inner)),
                    ast::UnaryOperator::Plus => inner,
                    ast::UnaryOperator::Not => ScalarExpr::Not(Box::new(inner)),
                })
            }
            Expr::Binary { op, left, right } => Ok(ScalarExpr::Binary {
                op: map_binop(*op),
                left: Box::new(self.lower_post(left)?),
                right: Box::new(self.lower_post(right)?),
            }),
            Expr::IsNull { expr, negated } => Ok(ScalarExpr::IsNull {
                expr: Box::new(self.lower_post(expr)?),
                negated: *negated,
            }),
            Expr::Between {
                expr,
                low,
                high,
                negated,
            } => Ok(ScalarExpr::Between {
                expr: Box::new(self.lower_post(expr)?),
                low: Box::new(self.lower_post(low)?),
                high: Box::new(self.lower_post(high)?),
                negated: *negated,
            }),
            Expr::Case {
                operand,
                branches,
                otherwise,
            } => Ok(ScalarExpr::Case {
                operand: operand
                    .as_deref()
                    .map(|e| self.lower_post(e).map(Box::new))
                    .transpose()?,
                branches: branches
                    .iter()
                    .map(|(w, t)| Ok((self.lower_post(w)?, self.lower_post(t)?)))
                    .collect::<Result<Vec<_>>>()?,
                otherwise: otherwise
                    .as_deref()
                    .map(|e| self.lower_post(e).map(Box::new))
                    .transpose()?,
            }),
            Expr::Cast { expr, ty } => {
                let lowered = self.lower_post(expr)?;
                Ok(ScalarExpr::Cast {
                    expr: Box::new(lowered),
                    ty: *ty,
                })
            }
            Expr::Function {
                name,
                args,
                over: None,
                distinct: false,
                star: false,
            } => {
                let func = scalar_func(name, args.len())?;
                Ok(ScalarExpr::Func {
                    func,
                    args: args
                        .iter()
                        .map(|a| self.lower_post(a))
                        .collect::<Result<Vec<_>>>()?,
                })
            }
            other => Err(Error::unsupported(format!(
                "expression not allowed after aggregation: {:?}",
                other
            ))),
        }
    }
}

fn expand_items(items: &[SelectItem], schema: &Schema) -> Result<Vec<(Expr, Option<SmolStr>)>> {
    let mut out = Vec::new();
    for item in items {
        match item {
            SelectItem::Wildcard => {
                for col in &schema.columns {
                    out.push((
                        Expr::Ident {
                            qualifier: col.table.clone(),
                            name: col.name.clone(),
                        },
                        None,
                    ));
                }
            }
            SelectItem::QualifiedWildcard(q) => {
                let mut any = false;
                for col in &schema.columns {
                    if col.table.as_deref() == Some(q.as_str()) {
                        any = true;
                        out.push((
                            Expr::Ident {
                                qualifier: col.table.clone(),
                                name: col.name.clone(),
                            },
                            None,
                        ));
                    }
                }
                if !any {
                    return Err(Error::unsupported(format!("unknown table alias {:?}", q)));
                }
            }
            SelectItem::Expr { expr, alias } => out.push((expr.clone(), alias.clone())),
        }
    }
    Ok(out)
}

// --- window planning ---

struct WindowCall {
    over: OverClause,
    func: WindowFunc,
    ast: Expr,
}

fn lag_offset(args: &[Expr]) -> Result<usize> {
    match args.get(1) {
        None => Ok(1),
        Some(Expr::Literal(Literal::Int(i))) if *i >= 0 => Ok(*i as usize),
        Some(other) => Err(Error::unsupported(format!(
            "LAG/LEAD offset must be a non-negative integer literal, got {:?}",
            other
        ))),
    }
}

fn collect_window_calls(
    expr: &Expr,
    schema: &Schema,
    out: &mut Vec<WindowCall>,
) -> Result<()> {
    match expr {
        Expr::Function {
            name,
            args,
            star,
            over: Some(over),
            distinct,
        } => {
            if *distinct {
                return Err(Error::unsupported("DISTINCT window functions"));
            }
            let upper = name.to_ascii_uppercase();
            let func = match upper.as_str() {
                "ROW_NUMBER" => WindowFunc::RowNumber,
                "LAG" | "LEAD" => {
                    let arg = args.first().ok_or_else(|| {
                        Error::unsupported(format!("{} requires a column argument", name))
                    })?;
                    let lowered = lower(arg, schema)?;
                    let offset = lag_offset(args)?;
                    if upper == "LAG" {
                        WindowFunc::Lag {
                            expr: lowered,
                            offset,
                        }
                    } else {
                        WindowFunc::Lead {
                            expr: lowered,
                            offset,
                        }
                    }
                }
                "SUM" | "AVG" | "COUNT" | "MIN" | "MAX" => {
                    let kind = match upper.as_str() {
                        "SUM" => WindowAggKind::Sum,
                        "AVG" => WindowAggKind::Avg,
                        "COUNT" => WindowAggKind::Count,
                        "MIN" => WindowAggKind::Min,
                        _ => WindowAggKind::Max,
                    };
                    let arg = if *star {
                        ScalarExpr::Literal(Value::Int(1))
                    } else {
                        let a = args.first().ok_or_else(|| {
                            Error::unsupported(format!("{} requires an argument", name))
                        })?;
                        lower(a, schema)?
                    };
                    let frame = over.frame.ok_or_else(|| {
                        Error::unsupported(
                            "window aggregates require ROWS BETWEEN k PRECEDING AND CURRENT ROW",
                        )
                    })?;
                    WindowFunc::Agg {
                        kind,
                        expr: arg,
                        preceding: frame.preceding as usize,
                    }
                }
                other => {
                    return Err(Error::unsupported(format!(
                        "unsupported window function {}",
                        other
                    )))
                }
            };
            out.push(WindowCall {
                over: (**over).clone(),
                func,
                ast: expr.clone(),
            });
            Ok(())
        }
        Expr::Function { args, .. } => {
            for arg in args {
                collect_window_calls(arg, schema, out)?;
            }
            Ok(())
        }
        Expr::Unary { expr, .. } | Expr::IsNull { expr, .. } | Expr::Cast { expr, .. } => {
            collect_window_calls(expr, schema, out)
        }
        Expr::Binary { left, right, .. } => {
            collect_window_calls(left, schema, out)?;
            collect_window_calls(right, schema, out)
        }
        Expr::Case {
            operand,
            branches,
            otherwise,
        } => {
            if let Some(op) = operand {
                collect_window_calls(op, schema, out)?;
            }
            for (w, t) in branches {
                collect_window_calls(w, schema, out)?;
                collect_window_calls(t, schema, out)?;
            }
            if let Some(e) = otherwise {
                collect_window_calls(e, schema, out)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Lower an expression replacing mapped window calls by their output
/// columns.
fn lower_with_windows(
    expr: &Expr,
    schema: &Schema,
    mapping: &[(Expr, usize)],
) -> Result<ScalarExpr> {
    if let Some((_, idx)) = mapping.iter().find(|(ast, _)| ast == expr) {
        return Ok(ScalarExpr::Column(*idx));
    }
    match expr {
        Expr::Unary { op, expr } => {
            let inner = lower_with_windows(expr, schema, mapping)?;
            Ok(match op {
                ast::UnaryOperator::Minus => ScalarExpr::Neg(Box::new(inner)),
                ast::UnaryOperator::Plus => inner,
                ast::UnaryOperator::Not => ScalarExpr::Not(Box::new(inner)),
            })
        }
        Expr::Binary { op, left, right } => Ok(ScalarExpr::Binary {
            op: map_binop(*op),
            left: Box::new(lower_with_windows(left, schema, mapping)?),
            right: Box::new(lower_with_windows(right, schema, mapping)?),
        }),
        Expr::Case {
            operand,
            branches,
            otherwise,
        } => Ok(ScalarExpr::Case {
            operand: operand
                .as_deref()
                .map(|e| lower_with_windows(e, schema, mapping).map(Box::new))
                .transpose()?,
            branches: branches
                .iter()
                .map(|(w, t)| {
                    Ok((
                        lower_with_windows(w, schema, mapping)?,
                        lower_with_windows(t, schema, mapping)?,
                    ))
                })
                .collect::<Result<Vec<_>>>()?,
            otherwise: otherwise
                .as_deref()
                .map(|e| lower_with_windows(e, schema, mapping).map(Box::new))
                .transpose()?,
        }),
        other => lower(other, schema),
    }
}

// --- SELECT planning ---

fn plan_select(select: &Select, catalog: Catalog) -> Result<Planned> {
    let from = select
        .from
        .as_ref()
        .ok_or_else(|| Error::unsupported("SELECT without FROM"))?;
    let mut acc = plan_from(from, catalog)?;

    // WHERE: subquery conjuncts become semi/anti joins, the rest a
    // residual filter.
    if let Some(where_clause) = &select.where_clause {
        let mut residual: Option<ScalarExpr> = None;
        for conjunct in where_clause.clone().conjuncts() {
            match conjunct {
                Expr::InSubquery {
                    expr,
                    query,
                    negated,
                } => {
                    let sub = plan_query(&query, catalog)?;
                    if sub.schema.len() != 1 {
                        return Err(Error::unsupported(
                            "IN subquery must produce exactly one column",
                        ));
                    }
                    let key = lower(&expr, &acc.schema)?;
                    acc = Planned {
                        node: RelNode::Semi {
                            left: Box::new(acc.node),
                            right: Box::new(RelNode::Distinct {
                                input: Box::new(sub.node),
                            }),
                            left_key: vec![key],
                            right_key: vec![ScalarExpr::Column(0)],
                            anti: negated,
                        },
                        schema: acc.schema,
                    };
                }
                Expr::Exists { query, negated } => {
                    let sub = plan_query(&query, catalog)?;
                    // Uncorrelated EXISTS gates on "subquery non-empty":
                    // a unit-key semi-join.
                    let unit = RelNode::Distinct {
                        input: Box::new(RelNode::Project {
                            input: Box::new(sub.node),
                            exprs: vec![ScalarExpr::Literal(Value::Int(1))],
                        }),
                    };
                    acc = Planned {
                        node: RelNode::Semi {
                            left: Box::new(acc.node),
                            right: Box::new(unit),
                            left_key: vec![],
                            right_key: vec![],
                            anti: negated,
                        },
                        schema: acc.schema,
                    };
                }
                other => {
                    let lowered = lower(&other, &acc.schema)?;
                    residual = Some(match residual {
                        None => lowered,
                        Some(prev) => ScalarExpr::Binary {
                            op: BinaryOp::And,
                            left: Box::new(prev),
                            right: Box::new(lowered),
                        },
                    });
                }
            }
        }
        if let Some(predicate) = residual {
            acc = Planned {
                node: RelNode::Filter {
                    input: Box::new(acc.node),
                    predicate,
                },
                schema: acc.schema,
            };
        }
    }

    let items = expand_items(&select.items, &acc.schema)?;
    let has_aggregate = !select.group_by.is_empty()
        || items.iter().any(|(e, _)| expr_has_aggregate(e))
        || select
            .having
            .as_ref()
            .map(expr_has_aggregate)
            .unwrap_or(false);
    let has_window = items.iter().any(|(e, _)| expr_has_window(e));

    if has_aggregate && has_window {
        return Err(Error::unsupported(
            "mixing window functions with GROUP BY aggregation",
        ));
    }

    let planned = if has_aggregate {
        plan_aggregate_select(select, &items, acc)?
    } else if has_window {
        plan_window_select(&items, acc)?
    } else {
        plan_plain_select(&items, acc)?
    };

    if select.distinct {
        Ok(Planned {
            node: RelNode::Distinct {
                input: Box::new(planned.node),
            },
            schema: planned.schema,
        })
    } else {
        Ok(planned)
    }
}

fn plan_plain_select(items: &[(Expr, Option<SmolStr>)], acc: Planned) -> Result<Planned> {
    let mut exprs = Vec::with_capacity(items.len());
    let mut columns = Vec::with_capacity(items.len());
    for (pos, (expr, alias)) in items.iter().enumerate() {
        let lowered = lower(expr, &acc.schema)?;
        let item = SelectItem::Expr {
            expr: expr.clone(),
            alias: alias.clone(),
        };
        let mut def = ColumnDef::new(item_name(&item, pos), infer_type(expr, &acc.schema));
        if let Expr::Ident { qualifier, .. } = expr {
            def.table = qualifier.clone();
        }
        columns.push(def);
        exprs.push(lowered);
    }

    // Identity projections are fused away.
    let identity = exprs.len() == acc.schema.len()
        && exprs.iter().enumerate().all(|(i, e)| e.is_column(i))
        && columns
            .iter()
            .zip(acc.schema.columns.iter())
            .all(|(a, b)| a.name == b.name);
    if identity {
        return Ok(acc);
    }

    Ok(Planned {
        node: RelNode::Project {
            input: Box::new(acc.node),
            exprs,
        },
        schema: Schema::new(columns),
    })
}

fn plan_aggregate_select(
    select: &Select,
    items: &[(Expr, Option<SmolStr>)],
    acc: Planned,
) -> Result<Planned> {
    let group_lowered = select
        .group_by
        .iter()
        .map(|g| lower(g, &acc.schema))
        .collect::<Result<Vec<_>>>()?;

    let mut ctx = AggContext {
        input: &acc.schema,
        group_by: &select.group_by,
        specs: Vec::new(),
    };

    let mut post_exprs = Vec::with_capacity(items.len());
    for (expr, _) in items {
        post_exprs.push(ctx.lower_post(expr)?);
    }
    let having = select
        .having
        .as_ref()
        .map(|h| ctx.lower_post(h))
        .transpose()?;

    // Aggregate output schema: group columns then aggregate columns.
    let mut agg_columns = Vec::new();
    for (i, g) in select.group_by.iter().enumerate() {
        let name = match g {
            Expr::Ident { name, .. } => name.clone(),
            _ => SmolStr::new(format!("group{}", i)),
        };
        agg_columns.push(ColumnDef::new(name, infer_type(g, &acc.schema)));
    }
    for (i, spec) in ctx.specs.iter().enumerate() {
        let ty = match spec.kind {
            AggKind::CountStar | AggKind::Count | AggKind::CountDistinct => ColumnType::Int,
            AggKind::Avg => ColumnType::Float,
            _ => ColumnType::Int,
        };
        agg_columns.push(ColumnDef::new(SmolStr::new(format!("agg{}", i)), ty));
    }
    let agg_schema = Schema::new(agg_columns);

    let mut node = RelNode::Aggregate {
        input: Box::new(acc.node),
        group: group_lowered,
        aggs: ctx.specs,
    };
    if let Some(predicate) = having {
        node = RelNode::Filter {
            input: Box::new(node),
            predicate,
        };
    }

    // Final projection shapes the select list.
    let mut columns = Vec::with_capacity(items.len());
    for (pos, (expr, alias)) in items.iter().enumerate() {
        let item = SelectItem::Expr {
            expr: expr.clone(),
            alias: alias.clone(),
        };
        columns.push(ColumnDef::new(
            item_name(&item, pos),
            infer_type(expr, &acc.schema),
        ));
    }
    let identity = post_exprs.len() == agg_schema.len()
        && post_exprs.iter().enumerate().all(|(i, e)| e.is_column(i));
    let (node, schema) = if identity {
        let mut renamed = agg_schema;
        for (col, def) in renamed.columns.iter_mut().zip(columns.iter()) {
            col.name = def.name.clone();
            col.ty = def.ty;
        }
        (node, renamed)
    } else {
        (
            RelNode::Project {
                input: Box::new(node),
                exprs: post_exprs,
            },
            Schema::new(columns),
        )
    };

    Ok(Planned { node, schema })
}

fn plan_window_select(items: &[(Expr, Option<SmolStr>)], acc: Planned) -> Result<Planned> {
    // Collect calls, grouped by their OVER clause.
    let mut calls = Vec::new();
    for (expr, _) in items {
        collect_window_calls(expr, &acc.schema, &mut calls)?;
    }

    let mut specs: Vec<(OverClause, Vec<WindowFunc>, Vec<Expr>)> = Vec::new();
    for call in calls {
        match specs.iter_mut().find(|(over, ..)| *over == call.over) {
            Some((_, funcs, asts)) => {
                // The same call text maps to the same column.
                if !asts.contains(&call.ast) {
                    funcs.push(call.func);
                    asts.push(call.ast);
                }
            }
            None => specs.push((call.over, vec![call.func], vec![call.ast])),
        }
    }

    let input_len = acc.schema.len();
    let mut mapping: Vec<(Expr, usize)> = Vec::new();
    let mut schema = acc.schema.clone();
    let mut node = acc.node;
    let mut next_col = input_len;

    for (over, funcs, asts) in specs {
        let partition = over
            .partition_by
            .iter()
            .map(|e| lower(e, &acc.schema))
            .collect::<Result<Vec<_>>>()?;
        let (order, descending) = match &over.order_by {
            Some(item) => (lower(&item.expr, &acc.schema)?, item.desc),
            None => (ScalarExpr::Literal(Value::Int(0)), false),
        };
        for (i, ast_expr) in asts.iter().enumerate() {
            mapping.push((ast_expr.clone(), next_col + i));
            schema
                .columns
                .push(ColumnDef::new(SmolStr::new(format!("win{}", next_col + i - input_len)), {
                    match &funcs[i] {
                        WindowFunc::RowNumber => ColumnType::Int,
                        WindowFunc::Agg { kind, .. } => match kind {
                            WindowAggKind::Count => ColumnType::Int,
                            WindowAggKind::Avg => ColumnType::Float,
                            _ => ColumnType::Int,
                        },
                        _ => ColumnType::Int,
                    }
                }));
        }
        next_col += funcs.len();
        node = RelNode::Window {
            input: Box::new(node),
            spec: WindowSpec {
                partition,
                order,
                descending,
                funcs,
            },
        };
    }

    // Final projection over the window-extended schema.
    let mut exprs = Vec::with_capacity(items.len());
    let mut columns = Vec::with_capacity(items.len());
    for (pos, (expr, alias)) in items.iter().enumerate() {
        exprs.push(lower_with_windows(expr, &schema, &mapping)?);
        let item = SelectItem::Expr {
            expr: expr.clone(),
            alias: alias.clone(),
        };
        columns.push(ColumnDef::new(
            item_name(&item, pos),
            infer_type(expr, &acc.schema),
        ));
    }
    Ok(Planned {
        node: RelNode::Project {
            input: Box::new(node),
            exprs,
        },
        schema: Schema::new(columns),
    })
}
