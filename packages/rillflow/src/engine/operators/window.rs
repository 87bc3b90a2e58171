//! Sliding window functions over `ROWS BETWEEN k PRECEDING AND CURRENT
//! ROW` frames, optionally partitioned.
//!
//! Two shared structures give O(1) slides on the in-order append path: a
//! ring buffer with running totals for SUM/COUNT/AVG and a monotonic
//! deque for MIN/MAX. ROW_NUMBER keeps a per-partition counter; LAG
//! serves from a short ring; LEAD rewrites the output emitted `offset`
//! rows earlier with a retract/re-emit pair once the future row arrives.
//!
//! Out-of-order arrivals and retractions leave the O(1) path: the
//! partition's previous outputs are all retracted, its state destroyed
//! and rebuilt from the surviving rows.

use crate::engine::eval::{eval, ScalarExpr};
use crate::engine::types::{FastMap, Row, Value, Weight, ZSet};
use crate::error::{Error, Result};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowAggKind {
    Sum,
    Count,
    Avg,
    Min,
    Max,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WindowFunc {
    RowNumber,
    Lag { expr: ScalarExpr, offset: usize },
    Lead { expr: ScalarExpr, offset: usize },
    Agg {
        kind: WindowAggKind,
        expr: ScalarExpr,
        /// Frame is `preceding` rows back through the current row.
        preceding: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowSpec {
    pub partition: Vec<ScalarExpr>,
    pub order: ScalarExpr,
    pub descending: bool,
    pub funcs: Vec<WindowFunc>,
}

/// Ring buffer with running totals for the additive frame aggregates.
#[derive(Debug, Clone)]
pub struct RingAggregate {
    kind: WindowAggKind,
    cap: usize,
    buf: Vec<Value>,
    idx: usize,
    filled: usize,
    sum_int: i64,
    sum_float: f64,
    float_count: i64,
    nonnull: i64,
}

impl RingAggregate {
    pub fn new(kind: WindowAggKind, frame_size: usize) -> Self {
        RingAggregate {
            kind,
            cap: frame_size.max(1),
            buf: vec![Value::Null; frame_size.max(1)],
            idx: 0,
            filled: 0,
            sum_int: 0,
            sum_float: 0.0,
            float_count: 0,
            nonnull: 0,
        }
    }

    fn account(&mut self, v: &Value, sign: i64) {
        match v {
            Value::Int(i) => {
                self.sum_int = self.sum_int.wrapping_add(i.wrapping_mul(sign));
                self.nonnull += sign;
            }
            Value::Float(f) => {
                self.sum_float += f * sign as f64;
                self.float_count += sign;
                self.nonnull += sign;
            }
            _ => {}
        }
    }

    /// Slide the frame by one value and return the new aggregate.
    pub fn push(&mut self, v: Value) -> Value {
        if self.filled == self.cap {
            let leaving = std::mem::replace(&mut self.buf[self.idx], Value::Null);
            self.account(&leaving, -1);
        } else {
            self.filled += 1;
        }
        self.account(&v, 1);
        self.buf[self.idx] = v;
        self.idx = (self.idx + 1) % self.cap;
        self.current()
    }

    pub fn current(&self) -> Value {
        match self.kind {
            WindowAggKind::Count => Value::Int(self.nonnull),
            WindowAggKind::Avg => {
                if self.nonnull == 0 {
                    Value::Null
                } else {
                    Value::Float((self.sum_int as f64 + self.sum_float) / self.nonnull as f64)
                }
            }
            _ => {
                if self.nonnull == 0 {
                    Value::Null
                } else if self.float_count != 0 {
                    Value::Float(self.sum_int as f64 + self.sum_float)
                } else {
                    Value::Int(self.sum_int)
                }
            }
        }
    }
}

/// Monotonic deque for MIN/MAX over a fixed-size frame; amortized O(1)
/// per slide.
#[derive(Debug, Clone)]
pub struct MonotonicDeque {
    max: bool,
    cap: u64,
    deque: VecDeque<(Value, u64)>,
    next_idx: u64,
}

impl MonotonicDeque {
    pub fn new(max: bool, frame_size: usize) -> Self {
        MonotonicDeque {
            max,
            cap: frame_size.max(1) as u64,
            deque: VecDeque::new(),
            next_idx: 0,
        }
    }

    pub fn push(&mut self, v: Value) -> Value {
        let i = self.next_idx;
        self.next_idx += 1;
        if !v.is_null() {
            while let Some((back, _)) = self.deque.back() {
                let dominated = if self.max { *back <= v } else { *back >= v };
                if dominated {
                    self.deque.pop_back();
                } else {
                    break;
                }
            }
            self.deque.push_back((v, i));
        }
        let min_live = (i + 1).saturating_sub(self.cap);
        while let Some((_, front_idx)) = self.deque.front() {
            if *front_idx < min_live {
                self.deque.pop_front();
            } else {
                break;
            }
        }
        self.deque
            .front()
            .map(|(v, _)| v.clone())
            .unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone)]
enum FuncState {
    RowNumber { next: i64 },
    Lag { ring: VecDeque<Value>, offset: usize },
    Lead { offset: usize },
    Ring(RingAggregate),
    Deque(MonotonicDeque),
}

impl FuncState {
    fn new(func: &WindowFunc) -> Self {
        match func {
            WindowFunc::RowNumber => FuncState::RowNumber { next: 1 },
            WindowFunc::Lag { offset, .. } => FuncState::Lag {
                ring: VecDeque::new(),
                offset: *offset,
            },
            WindowFunc::Lead { offset, .. } => FuncState::Lead { offset: *offset },
            WindowFunc::Agg {
                kind, preceding, ..
            } => match kind {
                WindowAggKind::Min => FuncState::Deque(MonotonicDeque::new(false, preceding + 1)),
                WindowAggKind::Max => FuncState::Deque(MonotonicDeque::new(true, preceding + 1)),
                other => FuncState::Ring(RingAggregate::new(*other, preceding + 1)),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct PartitionState {
    /// (order key, input row), in frame order; every entry has weight 1.
    rows: Vec<(Value, Row)>,
    /// Output row emitted for each input row, same indexing as `rows`.
    outputs: Vec<Row>,
    funcs: Vec<FuncState>,
}

impl PartitionState {
    fn new(spec: &WindowSpec) -> Self {
        PartitionState {
            rows: Vec::new(),
            outputs: Vec::new(),
            funcs: spec.funcs.iter().map(FuncState::new).collect(),
        }
    }

    fn last_order_key(&self) -> Option<&Value> {
        self.rows.last().map(|(k, _)| k)
    }
}

#[derive(Debug)]
enum PartitionPending {
    /// Fast path: extend the partition in place.
    Append {
        key: Row,
        funcs: Vec<FuncState>,
        appended: Vec<((Value, Row), Row)>,
        rewrites: Vec<(usize, Row)>,
    },
    /// Slow path: replace (or destroy) the whole partition state.
    Rebuild {
        key: Row,
        state: Option<PartitionState>,
    },
}

#[derive(Debug, Default)]
pub struct WindowPending {
    partitions: Vec<PartitionPending>,
}

#[derive(Debug, Clone, Default)]
pub struct PartitionedWindowState {
    partitions: FastMap<Row, PartitionState>,
}

fn order_cmp(a: &Value, b: &Value, descending: bool) -> std::cmp::Ordering {
    if descending {
        b.cmp(a)
    } else {
        a.cmp(b)
    }
}

struct AppendRun<'a> {
    spec: &'a WindowSpec,
    base_outputs: &'a [Row],
    funcs: Vec<FuncState>,
    appended: Vec<((Value, Row), Row)>,
    rewrites: Vec<(usize, Row)>,
    rewritten: FastMap<usize, Row>,
}

impl<'a> AppendRun<'a> {
    fn new(spec: &'a WindowSpec, state: Option<&'a PartitionState>) -> Self {
        AppendRun {
            spec,
            base_outputs: state.map(|s| s.outputs.as_slice()).unwrap_or(&[]),
            funcs: state
                .map(|s| s.funcs.clone())
                .unwrap_or_else(|| spec.funcs.iter().map(FuncState::new).collect()),
            appended: Vec::new(),
            rewrites: Vec::new(),
            rewritten: FastMap::default(),
        }
    }

    /// Append one in-order row, accumulating emissions into `out`.
    fn push(&mut self, order_key: Value, row: Row, out: &mut ZSet) {
        let pos = self.base_outputs.len() + self.appended.len();
        let mut output = row.clone();
        let mut lead_rewrites: Vec<(usize, usize, Value)> = Vec::new();

        for (func_idx, (func, state)) in self
            .spec
            .funcs
            .iter()
            .zip(self.funcs.iter_mut())
            .enumerate()
        {
            let value = match (func, state) {
                (WindowFunc::RowNumber, FuncState::RowNumber { next }) => {
                    let v = Value::Int(*next);
                    *next += 1;
                    v
                }
                (WindowFunc::Lag { expr, offset }, FuncState::Lag { ring, .. }) => {
                    let current = eval(expr, &row);
                    ring.push_front(current);
                    ring.truncate(offset + 1);
                    if ring.len() > *offset {
                        ring[*offset].clone()
                    } else {
                        Value::Null
                    }
                }
                (WindowFunc::Lead { expr, offset }, FuncState::Lead { .. }) => {
                    let current = eval(expr, &row);
                    if *offset == 0 {
                        current
                    } else {
                        if pos >= *offset {
                            lead_rewrites.push((func_idx, pos - *offset, current));
                        }
                        Value::Null
                    }
                }
                (WindowFunc::Agg { expr, .. }, FuncState::Ring(ring)) => ring.push(eval(expr, &row)),
                (WindowFunc::Agg { expr, .. }, FuncState::Deque(deque)) => {
                    deque.push(eval(expr, &row))
                }
                _ => Value::Null,
            };
            output.push(value);
        }

        // Backfill LEAD outputs of the row `offset` positions behind.
        for (func_idx, target, value) in lead_rewrites {
            let old = self.output_at(target).clone();
            let mut new = old.clone();
            let col = self.column_of(func_idx, &old);
            new.0[col] = value;
            if old != new {
                out.insert(old, -1);
                out.insert(new.clone(), 1);
            }
            self.set_output(target, new);
        }

        out.insert(output.clone(), 1);
        self.appended.push(((order_key, row), output));
    }

    fn column_of(&self, func_idx: usize, output: &Row) -> usize {
        output.len() - self.spec.funcs.len() + func_idx
    }

    fn output_at(&self, pos: usize) -> &Row {
        if pos >= self.base_outputs.len() {
            &self.appended[pos - self.base_outputs.len()].1
        } else if let Some(rewritten) = self.rewritten.get(&pos) {
            rewritten
        } else {
            &self.base_outputs[pos]
        }
    }

    fn set_output(&mut self, pos: usize, row: Row) {
        if pos >= self.base_outputs.len() {
            let i = pos - self.base_outputs.len();
            self.appended[i].1 = row;
        } else {
            self.rewritten.insert(pos, row.clone());
            self.rewrites.push((pos, row));
        }
    }
}

impl PartitionedWindowState {
    pub fn new() -> Self {
        PartitionedWindowState::default()
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn eval(&self, spec: &WindowSpec, delta: &ZSet) -> Result<(ZSet, WindowPending)> {
        // Group the delta by partition key.
        let mut by_partition: FastMap<Row, Vec<(Value, Row, Weight)>> = FastMap::default();
        for (row, w) in delta.entries() {
            let key: Row = spec.partition.iter().map(|e| eval(e, row)).collect();
            let order_key = eval(&spec.order, row);
            by_partition
                .entry(key)
                .or_default()
                .push((order_key, row.clone(), w));
        }

        let mut out = ZSet::new();
        let mut pending = WindowPending::default();

        for (key, mut entries) in by_partition {
            entries.sort_by(|a, b| order_cmp(&a.0, &b.0, spec.descending));
            let state = self.partitions.get(&key);

            let in_order = entries.iter().all(|(okey, _, w)| {
                *w == 1
                    && state
                        .and_then(|s| s.last_order_key())
                        .map(|last| order_cmp(last, okey, spec.descending) != std::cmp::Ordering::Greater)
                        .unwrap_or(true)
            });

            if in_order {
                let mut run = AppendRun::new(spec, state);
                for (okey, row, _) in entries {
                    run.push(okey, row, &mut out);
                }
                pending.partitions.push(PartitionPending::Append {
                    key,
                    funcs: run.funcs,
                    appended: run.appended,
                    rewrites: run.rewrites,
                });
            } else {
                // Slow path: retract everything emitted for the
                // partition, rebuild from the surviving rows.
                let mut rows: Vec<(Value, Row)> =
                    state.map(|s| s.rows.clone()).unwrap_or_default();
                for (okey, row, w) in entries {
                    if w > 0 {
                        for _ in 0..w {
                            let at = rows.partition_point(|(k, _)| {
                                order_cmp(k, &okey, spec.descending)
                                    != std::cmp::Ordering::Greater
                            });
                            rows.insert(at, (okey.clone(), row.clone()));
                        }
                    } else {
                        for _ in 0..(-w) {
                            match rows.iter().rposition(|(k, r)| *k == okey && *r == row) {
                                Some(i) => {
                                    rows.remove(i);
                                }
                                None => {
                                    return Err(Error::invariant(
                                        "window retraction for a row not in its partition",
                                    ));
                                }
                            }
                        }
                    }
                }

                if let Some(state) = state {
                    for output in &state.outputs {
                        out.insert(output.clone(), -1);
                    }
                }

                if rows.is_empty() {
                    pending
                        .partitions
                        .push(PartitionPending::Rebuild { key, state: None });
                } else {
                    let mut run = AppendRun::new(spec, None);
                    for (okey, row) in rows {
                        run.push(okey, row, &mut out);
                    }
                    let rebuilt = PartitionState {
                        rows: run.appended.iter().map(|(input, _)| input.clone()).collect(),
                        outputs: run.appended.into_iter().map(|(_, output)| output).collect(),
                        funcs: run.funcs,
                    };
                    pending.partitions.push(PartitionPending::Rebuild {
                        key,
                        state: Some(rebuilt),
                    });
                }
            }
        }

        Ok((out, pending))
    }

    pub fn commit(&mut self, spec: &WindowSpec, pending: WindowPending) {
        for partition in pending.partitions {
            match partition {
                PartitionPending::Append {
                    key,
                    funcs,
                    appended,
                    rewrites,
                } => {
                    let state = self
                        .partitions
                        .entry(key)
                        .or_insert_with(|| PartitionState::new(spec));
                    state.funcs = funcs;
                    for (pos, row) in rewrites {
                        state.outputs[pos] = row;
                    }
                    for (input, output) in appended {
                        state.rows.push(input);
                        state.outputs.push(output);
                    }
                }
                PartitionPending::Rebuild { key, state } => match state {
                    Some(state) => {
                        self.partitions.insert(key, state);
                    }
                    None => {
                        self.partitions.remove(&key);
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod window_tests {
    use super::*;

    fn spec(funcs: Vec<WindowFunc>) -> WindowSpec {
        WindowSpec {
            partition: vec![],
            order: ScalarExpr::Column(0),
            descending: false,
            funcs,
        }
    }

    fn row(ts: i64, v: i64) -> Row {
        Row::from_values(vec![Value::Int(ts), Value::Int(v)])
    }

    fn push_rows(
        state: &mut PartitionedWindowState,
        spec: &WindowSpec,
        rows: &[(Row, Weight)],
    ) -> ZSet {
        let delta: ZSet = rows.iter().cloned().collect();
        let (out, pending) = state.eval(spec, &delta).unwrap();
        state.commit(spec, pending);
        out
    }

    #[test]
    fn ring_aggregate_slides() {
        let mut ring = RingAggregate::new(WindowAggKind::Sum, 3);
        assert_eq!(ring.push(Value::Int(1)), Value::Int(1));
        assert_eq!(ring.push(Value::Int(2)), Value::Int(3));
        assert_eq!(ring.push(Value::Int(3)), Value::Int(6));
        // frame slides: 1 leaves
        assert_eq!(ring.push(Value::Int(4)), Value::Int(9));
        assert_eq!(ring.push(Value::Null), Value::Int(7));
    }

    #[test]
    fn monotonic_deque_tracks_extrema() {
        let mut dq = MonotonicDeque::new(true, 3);
        assert_eq!(dq.push(Value::Int(5)), Value::Int(5));
        assert_eq!(dq.push(Value::Int(3)), Value::Int(5));
        assert_eq!(dq.push(Value::Int(4)), Value::Int(5));
        // 5 falls out of the frame
        assert_eq!(dq.push(Value::Int(1)), Value::Int(4));
        assert_eq!(dq.push(Value::Int(9)), Value::Int(9));

        let mut dq = MonotonicDeque::new(false, 2);
        assert_eq!(dq.push(Value::Int(5)), Value::Int(5));
        assert_eq!(dq.push(Value::Int(7)), Value::Int(5));
        assert_eq!(dq.push(Value::Int(8)), Value::Int(7));
    }

    #[test]
    fn windowed_sum_matches_spec_scenario() {
        // SUM(v) OVER (ORDER BY ts ROWS BETWEEN 2 PRECEDING AND CURRENT ROW)
        let spec = spec(vec![WindowFunc::Agg {
            kind: WindowAggKind::Sum,
            expr: ScalarExpr::Column(1),
            preceding: 2,
        }]);
        let mut state = PartitionedWindowState::new();
        let out = push_rows(
            &mut state,
            &spec,
            &[
                (row(1, 1), 1),
                (row(2, 2), 1),
                (row(3, 3), 1),
                (row(4, 4), 1),
            ],
        );
        for (ts, v, sum) in [(1, 1, 1), (2, 2, 3), (3, 3, 6), (4, 4, 9)] {
            let mut expect = row(ts, v);
            expect.push(Value::Int(sum));
            assert_eq!(out.weight(&expect), 1, "ts={}", ts);
        }
    }

    #[test]
    fn row_number_and_lag() {
        let spec = spec(vec![
            WindowFunc::RowNumber,
            WindowFunc::Lag {
                expr: ScalarExpr::Column(1),
                offset: 1,
            },
        ]);
        let mut state = PartitionedWindowState::new();
        let out = push_rows(&mut state, &spec, &[(row(1, 10), 1), (row(2, 20), 1)]);
        let mut first = row(1, 10);
        first.push(Value::Int(1));
        first.push(Value::Null);
        let mut second = row(2, 20);
        second.push(Value::Int(2));
        second.push(Value::Int(10));
        assert_eq!(out.weight(&first), 1);
        assert_eq!(out.weight(&second), 1);
    }

    #[test]
    fn lead_rewrites_past_output() {
        let spec = spec(vec![WindowFunc::Lead {
            expr: ScalarExpr::Column(1),
            offset: 1,
        }]);
        let mut state = PartitionedWindowState::new();
        let out = push_rows(&mut state, &spec, &[(row(1, 10), 1)]);
        let mut first_null = row(1, 10);
        first_null.push(Value::Null);
        assert_eq!(out.weight(&first_null), 1);

        // The next row back-fills the first row's LEAD value.
        let out = push_rows(&mut state, &spec, &[(row(2, 20), 1)]);
        let mut first_filled = row(1, 10);
        first_filled.push(Value::Int(20));
        assert_eq!(out.weight(&first_null), -1);
        assert_eq!(out.weight(&first_filled), 1);
    }

    #[test]
    fn out_of_order_rebuilds_partition() {
        let spec = spec(vec![WindowFunc::RowNumber]);
        let mut state = PartitionedWindowState::new();
        push_rows(&mut state, &spec, &[(row(1, 10), 1), (row(3, 30), 1)]);
        // ts=2 lands between the two existing rows: row numbers shift.
        let out = push_rows(&mut state, &spec, &[(row(2, 20), 1)]);
        let mut old_second = row(3, 30);
        old_second.push(Value::Int(2));
        let mut new_second = row(2, 20);
        new_second.push(Value::Int(2));
        let mut new_third = row(3, 30);
        new_third.push(Value::Int(3));
        assert_eq!(out.weight(&old_second), -1);
        assert_eq!(out.weight(&new_second), 1);
        assert_eq!(out.weight(&new_third), 1);
    }

    #[test]
    fn retracting_last_row_destroys_partition() {
        let spec = spec(vec![WindowFunc::RowNumber]);
        let mut state = PartitionedWindowState::new();
        push_rows(&mut state, &spec, &[(row(1, 10), 1)]);
        assert_eq!(state.partition_count(), 1);
        let out = push_rows(&mut state, &spec, &[(row(1, 10), -1)]);
        let mut emitted = row(1, 10);
        emitted.push(Value::Int(1));
        assert_eq!(out.weight(&emitted), -1);
        assert_eq!(state.partition_count(), 0);
    }

    #[test]
    fn unknown_retraction_is_invariant_violation() {
        let spec = spec(vec![WindowFunc::RowNumber]);
        let state = PartitionedWindowState::new();
        let delta: ZSet = [(row(1, 10), -1)].into_iter().collect();
        assert!(state.eval(&spec, &delta).is_err());
    }
}
