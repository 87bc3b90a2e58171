//! Equi-join with watermark-driven state pruning.
//!
//! Each side tracks a watermark (max observed timestamp). After every
//! step, rows older than `max(watermark_left, watermark_right) −
//! retention` are garbage-collected from both sides, so state stays
//! bounded on out-of-order but watermarked streams. No result store is
//! kept; pruning counts are observable through [`PruneStats`].

use crate::engine::types::{FastMap, Row, Weight, ZSet};
use crate::error::{Error, Result};

/// Keyed, timestamped delta entries: (join key, row, timestamp, weight).
pub type TimestampedDelta = Vec<(Row, Row, i64, Weight)>;

type Side = FastMap<Row, FastMap<Row, (i64, Weight)>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    pub pruned_left: u64,
    pub pruned_right: u64,
}

#[derive(Debug, Clone)]
pub struct PrunedJoinState {
    retention: i64,
    left: Side,
    right: Side,
    watermark_left: i64,
    watermark_right: i64,
    stats: PruneStats,
}

#[derive(Debug, Default)]
pub struct PrunedJoinPending {
    left_delta: TimestampedDelta,
    right_delta: TimestampedDelta,
}

fn side_weight(side: &Side, key: &Row, row: &Row) -> Weight {
    side.get(key)
        .and_then(|g| g.get(row))
        .map(|(_, w)| *w)
        .unwrap_or(0)
}

fn apply_side(side: &mut Side, delta: &TimestampedDelta) {
    for (key, row, ts, w) in delta {
        let group = side.entry(key.clone()).or_default();
        let entry = group.entry(row.clone()).or_insert((*ts, 0));
        entry.1 += w;
        if entry.1 == 0 {
            group.remove(row);
            if group.is_empty() {
                side.remove(key);
            }
        }
    }
}

fn prune_side(side: &mut Side, cutoff: i64) -> u64 {
    let mut pruned = 0u64;
    side.retain(|_, group| {
        group.retain(|_, (ts, _)| {
            let keep = *ts >= cutoff;
            if !keep {
                pruned += 1;
            }
            keep
        });
        !group.is_empty()
    });
    pruned
}

impl PrunedJoinState {
    pub fn new(retention: i64) -> Self {
        PrunedJoinState {
            retention,
            left: Side::default(),
            right: Side::default(),
            watermark_left: i64::MIN,
            watermark_right: i64::MIN,
            stats: PruneStats::default(),
        }
    }

    pub fn stats(&self) -> PruneStats {
        self.stats
    }

    pub fn watermark(&self) -> i64 {
        self.watermark_left.max(self.watermark_right)
    }

    /// Number of live (key, row) entries per side, for the state bound
    /// tests.
    pub fn live_entries(&self) -> (usize, usize) {
        let count = |side: &Side| side.values().map(|g| g.len()).sum();
        (count(&self.left), count(&self.right))
    }

    /// Oldest timestamp still held on either side, if any.
    pub fn oldest_timestamp(&self) -> Option<i64> {
        let oldest = |side: &Side| {
            side.values()
                .flat_map(|g| g.values().map(|(ts, _)| *ts))
                .min()
        };
        match (oldest(&self.left), oldest(&self.right)) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn eval(
        &self,
        dl: &TimestampedDelta,
        dr: &TimestampedDelta,
    ) -> Result<(ZSet, PrunedJoinPending)> {
        for (key, row, _, w) in dl {
            if *w < 0 && side_weight(&self.left, key, row) + w < 0 {
                return Err(Error::invariant(
                    "retraction of absent row on left side of pruned join",
                ));
            }
        }
        for (key, row, _, w) in dr {
            if *w < 0 && side_weight(&self.right, key, row) + w < 0 {
                return Err(Error::invariant(
                    "retraction of absent row on right side of pruned join",
                ));
            }
        }

        let mut out = ZSet::new();

        // ΔL ⋈ R
        for (key, lrow, _, lw) in dl {
            if let Some(rrows) = self.right.get(key) {
                for (rrow, (_, rw)) in rrows {
                    out.insert(lrow.concat(rrow), lw * rw);
                }
            }
        }
        // L ⋈ ΔR
        for (key, rrow, _, rw) in dr {
            if let Some(lrows) = self.left.get(key) {
                for (lrow, (_, lw)) in lrows {
                    out.insert(lrow.concat(rrow), lw * rw);
                }
            }
        }
        // ΔL ⋈ ΔR
        for (lkey, lrow, _, lw) in dl {
            for (rkey, rrow, _, rw) in dr {
                if lkey == rkey {
                    out.insert(lrow.concat(rrow), lw * rw);
                }
            }
        }

        Ok((
            out,
            PrunedJoinPending {
                left_delta: dl.clone(),
                right_delta: dr.clone(),
            },
        ))
    }

    pub fn commit(&mut self, pending: PrunedJoinPending) {
        let old_watermark = self.watermark();
        for (_, _, ts, w) in &pending.left_delta {
            if *w > 0 {
                self.watermark_left = self.watermark_left.max(*ts);
            }
        }
        for (_, _, ts, w) in &pending.right_delta {
            if *w > 0 {
                self.watermark_right = self.watermark_right.max(*ts);
            }
        }
        apply_side(&mut self.left, &pending.left_delta);
        apply_side(&mut self.right, &pending.right_delta);

        let watermark = self.watermark();
        if watermark == i64::MIN {
            return;
        }
        if watermark > old_watermark || old_watermark == i64::MIN {
            let cutoff = watermark.saturating_sub(self.retention);
            self.stats.pruned_left += prune_side(&mut self.left, cutoff);
            self.stats.pruned_right += prune_side(&mut self.right, cutoff);
        }
    }
}

#[cfg(test)]
mod pruned_tests {
    use super::*;
    use crate::engine::types::Value;

    fn key(k: i64) -> Row {
        Row::from_values(vec![Value::Int(k)])
    }

    fn row(k: i64, ts: i64) -> Row {
        Row::from_values(vec![Value::Int(k), Value::DateTime(ts)])
    }

    fn step(s: &mut PrunedJoinState, dl: TimestampedDelta, dr: TimestampedDelta) -> ZSet {
        let (out, pending) = s.eval(&dl, &dr).unwrap();
        s.commit(pending);
        out
    }

    #[test]
    fn joins_within_retention() {
        let mut j = PrunedJoinState::new(100);
        step(&mut j, vec![(key(1), row(1, 10), 10, 1)], vec![]);
        let out = step(&mut j, vec![], vec![(key(1), row(1, 50), 50, 1)]);
        assert_eq!(out.len(), 1);
        assert_eq!(out.weight(&row(1, 10).concat(&row(1, 50))), 1);
    }

    #[test]
    fn old_rows_are_pruned_past_watermark() {
        let mut j = PrunedJoinState::new(100);
        step(&mut j, vec![(key(1), row(1, 10), 10, 1)], vec![]);
        // Advance the right watermark far beyond retention.
        step(&mut j, vec![], vec![(key(2), row(2, 500), 500, 1)]);
        let (left, _) = j.live_entries();
        assert_eq!(left, 0);
        assert_eq!(j.stats().pruned_left, 1);
        // The pruned left row no longer matches late right arrivals.
        let out = step(&mut j, vec![], vec![(key(1), row(1, 450), 450, 1)]);
        assert!(out.is_empty());
    }

    #[test]
    fn state_bound_holds() {
        let mut j = PrunedJoinState::new(50);
        for ts in (0..500).step_by(10) {
            step(&mut j, vec![(key(ts % 7), row(ts % 7, ts), ts, 1)], vec![]);
        }
        let bound = j.watermark() - 50;
        assert!(j.oldest_timestamp().map_or(true, |t| t >= bound));
    }
}
