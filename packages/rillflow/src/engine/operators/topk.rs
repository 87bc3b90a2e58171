//! ORDER BY … LIMIT/OFFSET at the materialization boundary.
//!
//! The operator integrates its input and emits the delta of the selected
//! prefix whenever the selection shifts. Rows with NULL sort keys order
//! first, matching the engine's total value order; ties break by row
//! value so the selection is deterministic.

use crate::engine::eval::{eval, ScalarExpr};
use crate::engine::types::{Row, Value, ZSet};
use crate::error::Result;
use std::cmp::Ordering;

#[derive(Debug, Clone)]
pub struct TopKState {
    order: Vec<(ScalarExpr, bool)>,
    limit: usize,
    offset: usize,
    integrated: ZSet,
    emitted: ZSet,
}

#[derive(Debug, Default)]
pub struct TopKPending {
    delta: ZSet,
    emitted_new: ZSet,
}

pub fn sort_rows(rows: &mut [(Vec<Value>, Row, i64)], order: &[(ScalarExpr, bool)]) {
    rows.sort_by(|a, b| {
        for (i, (_, desc)) in order.iter().enumerate() {
            let ord = a.0[i].cmp(&b.0[i]);
            let ord = if *desc { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.1.cmp(&b.1)
    });
}

impl TopKState {
    pub fn new(order: Vec<(ScalarExpr, bool)>, limit: usize, offset: usize) -> Self {
        TopKState {
            order,
            limit,
            offset,
            integrated: ZSet::new(),
            emitted: ZSet::new(),
        }
    }

    fn selection(&self, relation: &ZSet) -> ZSet {
        let mut rows: Vec<(Vec<Value>, Row, i64)> = relation
            .entries()
            .filter(|(_, w)| *w > 0)
            .map(|(row, w)| {
                let keys = self.order.iter().map(|(e, _)| eval(e, row)).collect();
                (keys, row.clone(), w)
            })
            .collect();
        sort_rows(&mut rows, &self.order);

        let mut out = ZSet::new();
        let mut skip = self.offset as i64;
        let mut take = self.limit as i64;
        for (_, row, w) in rows {
            if take == 0 {
                break;
            }
            let mut copies = w;
            if skip > 0 {
                let skipped = skip.min(copies);
                skip -= skipped;
                copies -= skipped;
            }
            if copies > 0 {
                let kept = copies.min(take);
                take -= kept;
                out.insert(row, kept);
            }
        }
        out
    }

    pub fn eval(&self, delta: &ZSet) -> Result<(ZSet, TopKPending)> {
        let next = self.integrated.add(delta);
        let emitted_new = self.selection(&next);
        let out = emitted_new.sub(&self.emitted);
        Ok((
            out,
            TopKPending {
                delta: delta.clone(),
                emitted_new,
            },
        ))
    }

    pub fn commit(&mut self, pending: TopKPending) {
        self.integrated.add_assign(&pending.delta);
        self.emitted = pending.emitted_new;
    }
}
