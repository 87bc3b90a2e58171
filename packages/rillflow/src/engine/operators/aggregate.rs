//! Keyed incremental aggregation with retractable outputs.
//!
//! Per group the operator keeps one reducible state per aggregate
//! (weighted counts, running sums, weight-tagged B-trees for extrema)
//! plus the last emitted output row, so every change is published as a
//! `(key, old) → −1`, `(key, new) → +1` pair. SQL NULL rules apply:
//! COUNT(*) counts rows, everything else ignores NULL, and an aggregate
//! over no non-null input is NULL (COUNT is 0).

use crate::engine::eval::{eval, ScalarExpr};
use crate::engine::types::{FastMap, Row, Value, Weight, ZSet};
use crate::error::{Error, Result};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggKind {
    CountStar,
    Count,
    CountDistinct,
    Sum,
    Avg,
    Min,
    Max,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggSpec {
    pub kind: AggKind,
    /// Argument expression; ignored for COUNT(*).
    pub expr: ScalarExpr,
}

#[derive(Debug, Clone)]
enum AggState {
    Count(i64),
    Distinct(FastMap<Value, Weight>),
    Sum {
        sum_int: i64,
        sum_float: f64,
        float_weight: Weight,
        nonnull: Weight,
    },
    Extrema(BTreeMap<Value, Weight>),
}

impl AggState {
    fn new(kind: AggKind) -> Self {
        match kind {
            AggKind::CountStar | AggKind::Count => AggState::Count(0),
            AggKind::CountDistinct => AggState::Distinct(FastMap::default()),
            AggKind::Sum | AggKind::Avg => AggState::Sum {
                sum_int: 0,
                sum_float: 0.0,
                float_weight: 0,
                nonnull: 0,
            },
            AggKind::Min | AggKind::Max => AggState::Extrema(BTreeMap::new()),
        }
    }

    fn apply(&mut self, kind: AggKind, row: &Row, expr: &ScalarExpr, w: Weight) {
        match self {
            AggState::Count(c) => {
                if kind == AggKind::CountStar {
                    *c += w;
                } else if !eval(expr, row).is_null() {
                    *c += w;
                }
            }
            AggState::Distinct(values) => {
                let v = eval(expr, row);
                if v.is_null() {
                    return;
                }
                let entry = values.entry(v.clone()).or_insert(0);
                *entry += w;
                if *entry == 0 {
                    values.remove(&v);
                }
            }
            AggState::Sum {
                sum_int,
                sum_float,
                float_weight,
                nonnull,
            } => match eval(expr, row) {
                Value::Int(i) => {
                    *sum_int = sum_int.wrapping_add(i.wrapping_mul(w));
                    *nonnull += w;
                }
                Value::Float(f) => {
                    *sum_float += f * w as f64;
                    *float_weight += w;
                    *nonnull += w;
                }
                _ => {}
            },
            AggState::Extrema(values) => {
                let v = eval(expr, row);
                if v.is_null() {
                    return;
                }
                let entry = values.entry(v.clone()).or_insert(0);
                *entry += w;
                if *entry == 0 {
                    values.remove(&v);
                }
            }
        }
    }

    fn output(&self, kind: AggKind) -> Value {
        match self {
            AggState::Count(c) => Value::Int(*c),
            AggState::Distinct(values) => Value::Int(values.len() as i64),
            AggState::Sum {
                sum_int,
                sum_float,
                float_weight,
                nonnull,
            } => {
                if *nonnull == 0 {
                    return Value::Null;
                }
                match kind {
                    AggKind::Avg => Value::Float((*sum_int as f64 + sum_float) / *nonnull as f64),
                    _ if *float_weight != 0 => Value::Float(*sum_int as f64 + sum_float),
                    _ => Value::Int(*sum_int),
                }
            }
            AggState::Extrema(values) => {
                let found = match kind {
                    AggKind::Min => values.keys().next(),
                    _ => values.keys().next_back(),
                };
                found.cloned().unwrap_or(Value::Null)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct GroupState {
    total: Weight,
    aggs: Vec<AggState>,
    last_output: Option<Row>,
}

impl GroupState {
    fn new(specs: &[AggSpec]) -> Self {
        GroupState {
            total: 0,
            aggs: specs.iter().map(|s| AggState::new(s.kind)).collect(),
            last_output: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AggregateState {
    groups: FastMap<Row, GroupState>,
}

#[derive(Debug, Default)]
pub struct AggregatePending {
    updates: Vec<(Row, Option<GroupState>)>,
}

impl AggregateState {
    pub fn new() -> Self {
        AggregateState::default()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Apply one delta, pre-grouped by key. Output rows are the group
    /// key fields followed by one field per aggregate.
    pub fn eval(
        &self,
        specs: &[AggSpec],
        grouped: &FastMap<Row, Vec<(Row, Weight)>>,
    ) -> Result<(ZSet, AggregatePending)> {
        let mut out = ZSet::new();
        let mut pending = AggregatePending::default();

        for (key, rows) in grouped {
            let mut state = self
                .groups
                .get(key)
                .cloned()
                .unwrap_or_else(|| GroupState::new(specs));

            for (row, w) in rows {
                state.total += w;
                for (spec, agg) in specs.iter().zip(state.aggs.iter_mut()) {
                    agg.apply(spec.kind, row, &spec.expr, *w);
                }
            }
            if state.total < 0 {
                return Err(Error::invariant(format!(
                    "group {:?} retracted below zero rows",
                    key
                )));
            }

            let new_output = if state.total == 0 {
                None
            } else {
                let mut row = key.clone();
                for (spec, agg) in specs.iter().zip(state.aggs.iter()) {
                    row.push(agg.output(spec.kind));
                }
                Some(row)
            };

            if state.last_output != new_output {
                if let Some(old) = &state.last_output {
                    out.insert(old.clone(), -1);
                }
                if let Some(new) = &new_output {
                    out.insert(new.clone(), 1);
                }
            }

            if state.total == 0 {
                pending.updates.push((key.clone(), None));
            } else {
                state.last_output = new_output;
                pending.updates.push((key.clone(), Some(state)));
            }
        }

        Ok((out, pending))
    }

    pub fn commit(&mut self, pending: AggregatePending) {
        for (key, state) in pending.updates {
            match state {
                Some(state) => {
                    self.groups.insert(key, state);
                }
                None => {
                    self.groups.remove(&key);
                }
            }
        }
    }
}
