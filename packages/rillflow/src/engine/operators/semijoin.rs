//! Semi- and anti-join on a shared key.
//!
//! The right side only matters through its per-key multiplicity: a left
//! row is in the semi-join output iff its key has a positive right
//! count, and in the anti-join output iff the count is zero. Output rows
//! are the left rows themselves.

use crate::engine::types::{FastHashSet, FastMap, IndexedZSet, Row, Weight, ZSet};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct SemiJoinState {
    anti: bool,
    left: IndexedZSet,
    right_counts: FastMap<Row, Weight>,
}

#[derive(Debug, Default)]
pub struct SemiJoinPending {
    left_delta: IndexedZSet,
    right_delta: FastMap<Row, Weight>,
}

impl SemiJoinState {
    pub fn new(anti: bool) -> Self {
        SemiJoinState {
            anti,
            left: IndexedZSet::new(),
            right_counts: FastMap::default(),
        }
    }

    pub fn is_anti(&self) -> bool {
        self.anti
    }

    fn present(&self, key: &Row, extra: Weight) -> bool {
        self.right_counts.get(key).copied().unwrap_or(0) + extra > 0
    }

    /// `dl` is the keyed left delta, `dr` the per-key right multiplicity
    /// delta.
    pub fn eval(
        &self,
        dl: &IndexedZSet,
        dr: &FastMap<Row, Weight>,
    ) -> Result<(ZSet, SemiJoinPending)> {
        for (key, row, w) in dl.entries() {
            if w < 0 && self.left.weight(key, row) + w < 0 {
                return Err(Error::invariant(
                    "retraction of absent row on left side of semi-join",
                ));
            }
        }
        for (key, dw) in dr {
            if self.right_counts.get(key).copied().unwrap_or(0) + dw < 0 {
                return Err(Error::invariant(
                    "right-side count of semi-join went negative",
                ));
            }
        }

        let mut out = ZSet::new();

        // New left rows see the post-step presence of their key.
        for (key, lrows) in dl.groups() {
            let dw = dr.get(key).copied().unwrap_or(0);
            let included = self.present(key, dw) != self.anti;
            if included {
                for (row, w) in lrows {
                    out.insert(row.clone(), *w);
                }
            }
        }

        // Keys whose presence flipped toggle every pre-step left row.
        for (key, dw) in dr {
            if *dw == 0 {
                continue;
            }
            let before = self.present(key, 0);
            let after = self.present(key, *dw);
            if before == after {
                continue;
            }
            let sign: Weight = if after != self.anti { 1 } else { -1 };
            if let Some(lrows) = self.left.get(key) {
                for (row, w) in lrows {
                    out.insert(row.clone(), sign * w);
                }
            }
        }

        Ok((
            out,
            SemiJoinPending {
                left_delta: dl.clone(),
                right_delta: dr.clone(),
            },
        ))
    }

    pub fn commit(&mut self, pending: SemiJoinPending) {
        self.left.add_assign(&pending.left_delta);
        let mut dead: FastHashSet<Row> = FastHashSet::default();
        for (key, dw) in pending.right_delta {
            if dw == 0 {
                continue;
            }
            let entry = self.right_counts.entry(key.clone()).or_insert(0);
            *entry += dw;
            if *entry == 0 {
                dead.insert(key);
            }
        }
        for key in dead {
            self.right_counts.remove(&key);
        }
    }
}
