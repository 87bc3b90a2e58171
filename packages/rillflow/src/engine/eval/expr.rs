//! Runtime scalar expressions.
//!
//! The planner lowers parsed SQL expressions into this IR with column
//! references resolved to field indexes, so evaluation needs only the
//! row. Comparison and arithmetic follow SQL three-valued logic: NULL
//! poisons comparisons and arithmetic, AND/OR are Kleene, and a WHERE
//! keeps a row only when its predicate is exactly TRUE.

use super::{datetime, strings};
use crate::engine::types::datetime as civil;
use crate::engine::types::{ColumnType, Row, Value};
use smol_str::SmolStr;
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq)]
pub enum ScalarExpr {
    Column(usize),
    Literal(Value),
    Not(Box<ScalarExpr>),
    Neg(Box<ScalarExpr>),
    Binary {
        op: BinaryOp,
        left: Box<ScalarExpr>,
        right: Box<ScalarExpr>,
    },
    IsNull {
        expr: Box<ScalarExpr>,
        negated: bool,
    },
    Between {
        expr: Box<ScalarExpr>,
        low: Box<ScalarExpr>,
        high: Box<ScalarExpr>,
        negated: bool,
    },
    InList {
        expr: Box<ScalarExpr>,
        list: Vec<ScalarExpr>,
        negated: bool,
    },
    Like {
        expr: Box<ScalarExpr>,
        pattern: Box<ScalarExpr>,
        negated: bool,
    },
    Glob {
        expr: Box<ScalarExpr>,
        pattern: Box<ScalarExpr>,
        negated: bool,
    },
    Case {
        operand: Option<Box<ScalarExpr>>,
        branches: Vec<(ScalarExpr, ScalarExpr)>,
        otherwise: Option<Box<ScalarExpr>>,
    },
    Cast {
        expr: Box<ScalarExpr>,
        ty: ColumnType,
    },
    Func {
        func: ScalarFunc,
        args: Vec<ScalarExpr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarFunc {
    Coalesce,
    Nullif,
    Abs,
    If,
    Upper,
    Lower,
    Length,
    Substr,
    Trim,
    Replace,
    Concat,
    Reverse,
    Repeat,
    Printf,
    Hex,
    Char,
    Unicode,
    Instr,
    Typeof,
    Date,
    Time,
    Datetime,
    Strftime,
    Julianday,
    Unixepoch,
}

impl ScalarExpr {
    pub fn literal(v: impl Into<Value>) -> Self {
        ScalarExpr::Literal(v.into())
    }

    pub fn column(idx: usize) -> Self {
        ScalarExpr::Column(idx)
    }

    /// True if this is `Column(i)` for the given index.
    pub fn is_column(&self, idx: usize) -> bool {
        matches!(self, ScalarExpr::Column(i) if *i == idx)
    }
}

/// SQL comparison. `None` means UNKNOWN (a NULL operand, NaN, or
/// incomparable types).
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Int(x), Value::Int(y)) => Some(x.cmp(y)),
        (Value::Int(_), Value::Float(_))
        | (Value::Float(_), Value::Int(_))
        | (Value::Float(_), Value::Float(_)) => {
            let x = a.as_f64().unwrap();
            let y = b.as_f64().unwrap();
            x.partial_cmp(&y)
        }
        (Value::Str(x), Value::Str(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::DateTime(x), Value::DateTime(y)) => Some(x.cmp(y)),
        // Datetime columns compare against their textual forms.
        (Value::DateTime(x), Value::Str(s)) => {
            civil::parse_datetime_text(s).map(|y| x.cmp(&y))
        }
        (Value::Str(s), Value::DateTime(y)) => {
            civil::parse_datetime_text(s).map(|x| x.cmp(y))
        }
        _ => None,
    }
}

/// Truthiness for predicate positions. `None` is UNKNOWN.
pub fn truth(v: &Value) -> Option<bool> {
    match v {
        Value::Null => None,
        Value::Bool(b) => Some(*b),
        Value::Int(i) => Some(*i != 0),
        Value::Float(f) => Some(*f != 0.0),
        Value::Str(s) => Some(s.parse::<f64>().map(|f| f != 0.0).unwrap_or(false)),
        Value::DateTime(_) => Some(true),
    }
}

fn bool_value(b: Option<bool>) -> Value {
    match b {
        Some(b) => Value::Bool(b),
        None => Value::Null,
    }
}

fn arith(op: BinaryOp, a: &Value, b: &Value) -> Value {
    if a.is_null() || b.is_null() {
        return Value::Null;
    }
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => match op {
            BinaryOp::Add => x.checked_add(*y).map(Value::Int).unwrap_or(Value::Null),
            BinaryOp::Sub => x.checked_sub(*y).map(Value::Int).unwrap_or(Value::Null),
            BinaryOp::Mul => x.checked_mul(*y).map(Value::Int).unwrap_or(Value::Null),
            BinaryOp::Div => x.checked_div(*y).map(Value::Int).unwrap_or(Value::Null),
            _ => Value::Null,
        },
        _ => {
            let (x, y) = match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => (x, y),
                _ => return Value::Null,
            };
            match op {
                BinaryOp::Add => Value::Float(x + y),
                BinaryOp::Sub => Value::Float(x - y),
                BinaryOp::Mul => Value::Float(x * y),
                BinaryOp::Div => {
                    if y == 0.0 {
                        Value::Null
                    } else {
                        Value::Float(x / y)
                    }
                }
                _ => Value::Null,
            }
        }
    }
}

/// Leading numeric prefix, for SQLite-style text→number casts.
fn numeric_prefix(s: &str) -> Option<f64> {
    let s = s.trim();
    let bytes = s.as_bytes();
    let mut end = 0usize;
    let mut seen_digit = false;
    let mut seen_dot = false;
    let mut seen_exp = false;
    while end < bytes.len() {
        let c = bytes[end] as char;
        match c {
            '+' | '-' if end == 0 => {}
            '0'..='9' => seen_digit = true,
            '.' if !seen_dot && !seen_exp => seen_dot = true,
            'e' | 'E' if seen_digit && !seen_exp => {
                // Accept a sign right after the exponent.
                seen_exp = true;
                if end + 1 < bytes.len() && (bytes[end + 1] == b'+' || bytes[end + 1] == b'-') {
                    end += 1;
                }
            }
            _ => break,
        }
        end += 1;
    }
    if !seen_digit {
        return None;
    }
    s[..end].parse().ok()
}

fn cast_value(v: &Value, ty: ColumnType) -> Value {
    if v.is_null() {
        return Value::Null;
    }
    match ty {
        ColumnType::Int => match v {
            Value::Int(i) => Value::Int(*i),
            Value::Float(f) => {
                if f.is_nan() {
                    Value::Null
                } else {
                    Value::Int(*f as i64)
                }
            }
            Value::Bool(b) => Value::Int(*b as i64),
            Value::Str(s) => Value::Int(numeric_prefix(s).map(|f| f as i64).unwrap_or(0)),
            Value::DateTime(t) => Value::Int(civil::unix_seconds(*t)),
            Value::Null => Value::Null,
        },
        ColumnType::Float | ColumnType::Decimal => match v {
            Value::Int(i) => Value::Float(*i as f64),
            Value::Float(f) => Value::Float(*f),
            Value::Bool(b) => Value::Float(*b as i64 as f64),
            Value::Str(s) => Value::Float(numeric_prefix(s).unwrap_or(0.0)),
            Value::DateTime(t) => Value::Float(civil::unix_seconds(*t) as f64),
            Value::Null => Value::Null,
        },
        ColumnType::Text => Value::Str(SmolStr::new(v.render_text())),
        ColumnType::Bool => bool_value(truth(v)),
        ColumnType::DateTime => match datetime::time_value(v) {
            Some(t) => Value::DateTime(t),
            None => Value::Null,
        },
    }
}

pub fn eval(expr: &ScalarExpr, row: &Row) -> Value {
    match expr {
        ScalarExpr::Column(idx) => row.get(*idx).clone(),
        ScalarExpr::Literal(v) => v.clone(),
        ScalarExpr::Not(inner) => bool_value(truth(&eval(inner, row)).map(|b| !b)),
        ScalarExpr::Neg(inner) => match eval(inner, row) {
            Value::Int(i) => i.checked_neg().map(Value::Int).unwrap_or(Value::Null),
            Value::Float(f) => Value::Float(-f),
            _ => Value::Null,
        },
        ScalarExpr::Binary { op, left, right } => match op {
            BinaryOp::And => {
                // Kleene AND: false dominates UNKNOWN.
                let l = truth(&eval(left, row));
                if l == Some(false) {
                    return Value::Bool(false);
                }
                let r = truth(&eval(right, row));
                match (l, r) {
                    (_, Some(false)) => Value::Bool(false),
                    (Some(true), Some(true)) => Value::Bool(true),
                    _ => Value::Null,
                }
            }
            BinaryOp::Or => {
                let l = truth(&eval(left, row));
                if l == Some(true) {
                    return Value::Bool(true);
                }
                let r = truth(&eval(right, row));
                match (l, r) {
                    (_, Some(true)) => Value::Bool(true),
                    (Some(false), Some(false)) => Value::Bool(false),
                    _ => Value::Null,
                }
            }
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
                arith(*op, &eval(left, row), &eval(right, row))
            }
            BinaryOp::Eq | BinaryOp::NotEq | BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt
            | BinaryOp::GtEq => {
                let l = eval(left, row);
                let r = eval(right, row);
                match compare_values(&l, &r) {
                    None => Value::Null,
                    Some(ord) => Value::Bool(match op {
                        BinaryOp::Eq => ord == Ordering::Equal,
                        BinaryOp::NotEq => ord != Ordering::Equal,
                        BinaryOp::Lt => ord == Ordering::Less,
                        BinaryOp::LtEq => ord != Ordering::Greater,
                        BinaryOp::Gt => ord == Ordering::Greater,
                        BinaryOp::GtEq => ord != Ordering::Less,
                        _ => unreachable!(),
                    }),
                }
            }
        },
        ScalarExpr::IsNull { expr, negated } => {
            let is_null = eval(expr, row).is_null();
            Value::Bool(is_null != *negated)
        }
        ScalarExpr::Between {
            expr,
            low,
            high,
            negated,
        } => {
            let v = eval(expr, row);
            let lo = compare_values(&v, &eval(low, row)).map(|o| o != Ordering::Less);
            let hi = compare_values(&v, &eval(high, row)).map(|o| o != Ordering::Greater);
            let both = match (lo, hi) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            };
            bool_value(both.map(|b| b != *negated))
        }
        ScalarExpr::InList {
            expr,
            list,
            negated,
        } => {
            let v = eval(expr, row);
            let mut unknown = v.is_null();
            let mut found = false;
            if !unknown {
                for candidate in list {
                    match compare_values(&v, &eval(candidate, row)) {
                        Some(Ordering::Equal) => {
                            found = true;
                            break;
                        }
                        None => unknown = true,
                        _ => {}
                    }
                }
            }
            if found {
                Value::Bool(!*negated)
            } else if unknown {
                Value::Null
            } else {
                Value::Bool(*negated)
            }
        }
        ScalarExpr::Like {
            expr,
            pattern,
            negated,
        } => {
            let v = eval(expr, row);
            let p = eval(pattern, row);
            if v.is_null() || p.is_null() {
                return Value::Null;
            }
            let matched = strings::like_match(&p.render_text(), &v.render_text());
            Value::Bool(matched != *negated)
        }
        ScalarExpr::Glob {
            expr,
            pattern,
            negated,
        } => {
            let v = eval(expr, row);
            let p = eval(pattern, row);
            if v.is_null() || p.is_null() {
                return Value::Null;
            }
            let matched = strings::glob_match(&p.render_text(), &v.render_text());
            Value::Bool(matched != *negated)
        }
        ScalarExpr::Case {
            operand,
            branches,
            otherwise,
        } => {
            let base = operand.as_ref().map(|e| eval(e, row));
            for (when, then) in branches {
                let hit = match &base {
                    Some(base) => {
                        compare_values(base, &eval(when, row)) == Some(Ordering::Equal)
                    }
                    None => truth(&eval(when, row)) == Some(true),
                };
                if hit {
                    return eval(then, row);
                }
            }
            match otherwise {
                Some(e) => eval(e, row),
                None => Value::Null,
            }
        }
        ScalarExpr::Cast { expr, ty } => cast_value(&eval(expr, row), *ty),
        ScalarExpr::Func { func, args } => {
            let vals: Vec<Value> = args.iter().map(|a| eval(a, row)).collect();
            eval_func(*func, &vals)
        }
    }
}

fn eval_func(func: ScalarFunc, args: &[Value]) -> Value {
    let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Null);
    match func {
        ScalarFunc::Coalesce => args
            .iter()
            .find(|v| !v.is_null())
            .cloned()
            .unwrap_or(Value::Null),
        ScalarFunc::Nullif => {
            let a = arg(0);
            if compare_values(&a, &arg(1)) == Some(Ordering::Equal) {
                Value::Null
            } else {
                a
            }
        }
        ScalarFunc::Abs => match arg(0) {
            Value::Int(i) => i.checked_abs().map(Value::Int).unwrap_or(Value::Null),
            Value::Float(f) => Value::Float(f.abs()),
            _ => Value::Null,
        },
        ScalarFunc::If => {
            if truth(&arg(0)) == Some(true) {
                arg(1)
            } else {
                arg(2)
            }
        }
        ScalarFunc::Upper => strings::upper(&arg(0)),
        ScalarFunc::Lower => strings::lower(&arg(0)),
        ScalarFunc::Length => strings::length(&arg(0)),
        ScalarFunc::Substr => strings::substr(&arg(0), &arg(1), args.get(2)),
        ScalarFunc::Trim => strings::trim(&arg(0), args.get(1)),
        ScalarFunc::Replace => strings::replace(&arg(0), &arg(1), &arg(2)),
        ScalarFunc::Concat => strings::concat(args),
        ScalarFunc::Reverse => strings::reverse(&arg(0)),
        ScalarFunc::Repeat => strings::repeat(&arg(0), &arg(1)),
        ScalarFunc::Printf => strings::printf(args),
        ScalarFunc::Hex => strings::hex(&arg(0)),
        ScalarFunc::Char => strings::char_fn(args),
        ScalarFunc::Unicode => strings::unicode_fn(&arg(0)),
        ScalarFunc::Instr => strings::instr(&arg(0), &arg(1)),
        ScalarFunc::Typeof => strings::typeof_fn(&arg(0)),
        ScalarFunc::Date => datetime::date_fn(args),
        ScalarFunc::Time => datetime::time_fn(args),
        ScalarFunc::Datetime => datetime::datetime_fn(args),
        ScalarFunc::Strftime => datetime::strftime_fn(args),
        ScalarFunc::Julianday => datetime::julianday_fn(args),
        ScalarFunc::Unixepoch => datetime::unixepoch_fn(args),
    }
}

/// Evaluate a WHERE/HAVING predicate: the row survives only on TRUE.
pub fn eval_predicate(expr: &ScalarExpr, row: &Row) -> bool {
    truth(&eval(expr, row)) == Some(true)
}

/// Evaluate a projection list into an output row.
pub fn eval_projection(exprs: &[ScalarExpr], row: &Row) -> Row {
    exprs.iter().map(|e| eval(e, row)).collect()
}

/// Evaluate a key extractor; `None` when any component is NULL (NULL
/// join keys never match).
pub fn eval_key(exprs: &[ScalarExpr], row: &Row) -> Option<Row> {
    let mut key = Row::new();
    for e in exprs {
        let v = eval(e, row);
        if v.is_null() {
            return None;
        }
        key.push(v);
    }
    Some(key)
}
