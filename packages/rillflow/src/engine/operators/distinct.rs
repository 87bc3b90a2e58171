//! Incremental DISTINCT and the EXCEPT/INTERSECT set operators.
//!
//! Both are driven by integrated multiplicities: the output is a pure
//! function of the per-row counts, and each delta emits only the
//! membership transitions that function implies.

use crate::engine::types::{FastMap, Row, Weight, ZSet};
use crate::error::Result;

/// DISTINCT over the integrated input: a row is present (weight 1) iff
/// its integrated multiplicity is positive.
#[derive(Debug, Clone, Default)]
pub struct DistinctState {
    weights: FastMap<Row, Weight>,
}

#[derive(Debug, Default)]
pub struct DistinctPending {
    delta: Vec<(Row, Weight)>,
}

impl DistinctState {
    pub fn new() -> Self {
        DistinctState::default()
    }

    pub fn eval(&self, delta: &ZSet) -> Result<(ZSet, DistinctPending)> {
        let mut out = ZSet::new();
        let mut pending = DistinctPending::default();
        for (row, w) in delta.entries() {
            let old = self.weights.get(row).copied().unwrap_or(0);
            let new = old + w;
            match (old > 0, new > 0) {
                (false, true) => out.insert(row.clone(), 1),
                (true, false) => out.insert(row.clone(), -1),
                _ => {}
            }
            pending.delta.push((row.clone(), w));
        }
        Ok((out, pending))
    }

    pub fn commit(&mut self, pending: DistinctPending) {
        for (row, w) in pending.delta {
            let entry = self.weights.entry(row.clone()).or_insert(0);
            *entry += w;
            if *entry == 0 {
                self.weights.remove(&row);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOpKind {
    Except,
    Intersect,
}

/// EXCEPT [ALL] / INTERSECT [ALL] over the integrated multiplicities of
/// both inputs.
#[derive(Debug, Clone)]
pub struct SetOpState {
    kind: SetOpKind,
    all: bool,
    counts: FastMap<Row, (Weight, Weight)>,
}

#[derive(Debug, Default)]
pub struct SetOpPending {
    left: Vec<(Row, Weight)>,
    right: Vec<(Row, Weight)>,
}

impl SetOpState {
    pub fn new(kind: SetOpKind, all: bool) -> Self {
        SetOpState {
            kind,
            all,
            counts: FastMap::default(),
        }
    }

    fn multiplicity(&self, left: Weight, right: Weight) -> Weight {
        match (self.kind, self.all) {
            (SetOpKind::Except, true) => (left - right).max(0),
            (SetOpKind::Except, false) => {
                if left > 0 && right <= 0 {
                    1
                } else {
                    0
                }
            }
            (SetOpKind::Intersect, true) => left.min(right).max(0),
            (SetOpKind::Intersect, false) => {
                if left > 0 && right > 0 {
                    1
                } else {
                    0
                }
            }
        }
    }

    pub fn eval(&self, dl: &ZSet, dr: &ZSet) -> Result<(ZSet, SetOpPending)> {
        let mut touched: FastMap<Row, (Weight, Weight)> = FastMap::default();
        for (row, w) in dl.entries() {
            touched.entry(row.clone()).or_default().0 += w;
        }
        for (row, w) in dr.entries() {
            touched.entry(row.clone()).or_default().1 += w;
        }

        let mut out = ZSet::new();
        for (row, (dlw, drw)) in &touched {
            let (l, r) = self.counts.get(row).copied().unwrap_or((0, 0));
            let before = self.multiplicity(l, r);
            let after = self.multiplicity(l + dlw, r + drw);
            if after != before {
                out.insert(row.clone(), after - before);
            }
        }

        Ok((
            out,
            SetOpPending {
                left: dl.entries().map(|(r, w)| (r.clone(), w)).collect(),
                right: dr.entries().map(|(r, w)| (r.clone(), w)).collect(),
            },
        ))
    }

    pub fn commit(&mut self, pending: SetOpPending) {
        for (row, w) in pending.left {
            let entry = self.counts.entry(row.clone()).or_default();
            entry.0 += w;
            if *entry == (0, 0) {
                self.counts.remove(&row);
            }
        }
        for (row, w) in pending.right {
            let entry = self.counts.entry(row.clone()).or_default();
            entry.1 += w;
            if *entry == (0, 0) {
                self.counts.remove(&row);
            }
        }
    }
}
