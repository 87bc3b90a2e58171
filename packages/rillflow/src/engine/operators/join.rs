//! Incremental equi-join, the bilinear core.
//!
//! For integrated relations `L`, `R` and per-step deltas `ΔL`, `ΔR`:
//!
//! ```text
//! Δ(L ⋈ R) = ΔL ⋈ R + L ⋈ ΔR + ΔL ⋈ ΔR
//! ```
//!
//! All three passes probe the *pre-step* indexes; index updates are
//! staged in a [`JoinPending`] and committed only after the whole step
//! succeeded, so a failing step leaves the join untouched.

use crate::engine::types::{FastMap, IndexedZSet, Row, Weight, ZSet};
use crate::error::{Error, Result};

pub const DEFAULT_MAX_RESULTS: usize = 10_000;

#[derive(Debug, Clone)]
pub struct JoinState {
    left: IndexedZSet,
    right: IndexedZSet,
    /// Materialized result pairs and their emitted multiplicity. Capped
    /// at `max_results`; beyond the cap matches are still emitted and
    /// counted, just not stored.
    store: FastMap<(Row, Row), Weight>,
    max_results: usize,
    overflow: bool,
    append_only: bool,
}

#[derive(Debug, Default)]
pub struct JoinPending {
    left_delta: IndexedZSet,
    right_delta: IndexedZSet,
    pair_delta: Vec<((Row, Row), Weight)>,
}

fn validate_retractions(
    integrated: &IndexedZSet,
    delta: &IndexedZSet,
    side: &str,
    append_only: bool,
) -> Result<()> {
    for (key, row, w) in delta.entries() {
        if w >= 0 {
            continue;
        }
        if append_only {
            return Err(Error::invariant(format!(
                "retraction on append-only join ({} side)",
                side
            )));
        }
        if integrated.weight(key, row) + w < 0 {
            return Err(Error::invariant(format!(
                "retraction of absent row on {} side of join",
                side
            )));
        }
    }
    Ok(())
}

impl JoinState {
    pub fn new(max_results: usize, append_only: bool) -> Self {
        JoinState {
            left: IndexedZSet::new(),
            right: IndexedZSet::new(),
            store: FastMap::default(),
            max_results,
            overflow: false,
            append_only,
        }
    }

    pub fn overflow(&self) -> bool {
        self.overflow
    }

    pub fn stored_results(&self) -> usize {
        self.store.len()
    }

    pub fn left_entries(&self) -> usize {
        self.left.len()
    }

    pub fn right_entries(&self) -> usize {
        self.right.len()
    }

    /// One step: probe with both deltas, return the output delta and the
    /// staged state updates.
    pub fn eval(&self, dl: &IndexedZSet, dr: &IndexedZSet) -> Result<(ZSet, JoinPending)> {
        validate_retractions(&self.left, dl, "left", self.append_only)?;
        validate_retractions(&self.right, dr, "right", self.append_only)?;

        let mut pairs: FastMap<(Row, Row), Weight> = FastMap::default();
        let mut emit = |l: &Row, r: &Row, w: Weight| {
            if w == 0 {
                return;
            }
            let entry = pairs.entry((l.clone(), r.clone())).or_insert(0);
            *entry += w;
        };

        // ΔL ⋈ R
        for (key, lrows) in dl.groups() {
            if let Some(rrows) = self.right.get(key) {
                for (lrow, lw) in lrows {
                    for (rrow, rw) in rrows {
                        emit(lrow, rrow, lw * rw);
                    }
                }
            }
        }
        // L ⋈ ΔR
        for (key, rrows) in dr.groups() {
            if let Some(lrows) = self.left.get(key) {
                for (rrow, rw) in rrows {
                    for (lrow, lw) in lrows {
                        emit(lrow, rrow, lw * rw);
                    }
                }
            }
        }
        // ΔL ⋈ ΔR
        for (key, lrows) in dl.groups() {
            if let Some(rrows) = dr.get(key) {
                for (lrow, lw) in lrows {
                    for (rrow, rw) in rrows {
                        emit(lrow, rrow, lw * rw);
                    }
                }
            }
        }

        let mut out = ZSet::with_capacity(pairs.len());
        let mut pair_delta = Vec::new();
        for ((l, r), w) in pairs {
            if w == 0 {
                continue;
            }
            out.insert(l.concat(&r), w);
            if !self.append_only {
                pair_delta.push(((l, r), w));
            }
        }

        Ok((
            out,
            JoinPending {
                left_delta: dl.clone(),
                right_delta: dr.clone(),
                pair_delta,
            },
        ))
    }

    pub fn commit(&mut self, pending: JoinPending) {
        self.left.add_assign(&pending.left_delta);
        self.right.add_assign(&pending.right_delta);
        for (pair, dw) in pending.pair_delta {
            match self.store.get_mut(&pair) {
                Some(w) => {
                    *w += dw;
                    if *w == 0 {
                        self.store.remove(&pair);
                    }
                }
                None if dw > 0 => {
                    if self.store.len() >= self.max_results {
                        self.overflow = true;
                    } else {
                        self.store.insert(pair, dw);
                    }
                }
                None => {
                    // A retraction for a pair the capped store dropped.
                    debug_assert!(self.overflow, "result store lost a live pair");
                }
            }
        }
    }
}

#[cfg(test)]
mod join_tests {
    use super::*;
    use crate::engine::types::Value;

    fn row(vals: &[i64]) -> Row {
        vals.iter().map(|&v| Value::Int(v)).collect()
    }

    fn key(v: i64) -> Row {
        row(&[v])
    }

    fn delta(entries: &[(i64, &[i64], Weight)]) -> IndexedZSet {
        let mut ix = IndexedZSet::new();
        for (k, r, w) in entries {
            ix.insert(key(*k), row(r), *w);
        }
        ix
    }

    fn step(state: &mut JoinState, dl: IndexedZSet, dr: IndexedZSet) -> ZSet {
        let (out, pending) = state.eval(&dl, &dr).unwrap();
        state.commit(pending);
        out
    }

    #[test]
    fn emits_matches_across_steps() {
        let mut j = JoinState::new(DEFAULT_MAX_RESULTS, false);
        // right first: z = (1, 'A')
        let out = step(&mut j, delta(&[]), delta(&[(1, &[1, 100], 1)]));
        assert!(out.is_empty());
        // left: s = (10, 1), (11, 2)
        let out = step(
            &mut j,
            delta(&[(1, &[10, 1], 1), (2, &[11, 2], 1)]),
            delta(&[]),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out.weight(&row(&[10, 1, 1, 100])), 1);
        // right catches up for key 2
        let out = step(&mut j, delta(&[]), delta(&[(2, &[2, 200], 1)]));
        assert_eq!(out.weight(&row(&[11, 2, 2, 200])), 1);
    }

    #[test]
    fn same_step_deltas_counted_once() {
        let mut j = JoinState::new(DEFAULT_MAX_RESULTS, false);
        let out = step(
            &mut j,
            delta(&[(1, &[10, 1], 1)]),
            delta(&[(1, &[1, 100], 1)]),
        );
        assert_eq!(out.weight(&row(&[10, 1, 1, 100])), 1);
    }

    #[test]
    fn retraction_emits_negative_pairs() {
        let mut j = JoinState::new(DEFAULT_MAX_RESULTS, false);
        step(
            &mut j,
            delta(&[(1, &[10, 1], 1)]),
            delta(&[(1, &[1, 100], 1)]),
        );
        let out = step(&mut j, delta(&[(1, &[10, 1], -1)]), delta(&[]));
        assert_eq!(out.weight(&row(&[10, 1, 1, 100])), -1);
        assert_eq!(j.stored_results(), 0);
    }

    #[test]
    fn retracting_absent_row_fails_and_leaves_state() {
        let mut j = JoinState::new(DEFAULT_MAX_RESULTS, false);
        step(&mut j, delta(&[(1, &[10, 1], 1)]), delta(&[]));
        let err = j.eval(&delta(&[(1, &[99, 1], -1)]), &delta(&[]));
        assert!(matches!(err, Err(Error::InvariantViolated(_))));
        assert_eq!(j.left_entries(), 1);
    }

    #[test]
    fn append_only_rejects_retractions_and_skips_store() {
        let mut j = JoinState::new(DEFAULT_MAX_RESULTS, true);
        let out = step(
            &mut j,
            delta(&[(1, &[10, 1], 1)]),
            delta(&[(1, &[1, 100], 1)]),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(j.stored_results(), 0);
        assert!(j
            .eval(&delta(&[(1, &[10, 1], -1)]), &delta(&[]))
            .is_err());
    }

    #[test]
    fn overflow_latches_but_counts_stay_exact() {
        let mut j = JoinState::new(2, false);
        let out = step(
            &mut j,
            delta(&[(1, &[1, 1], 1), (1, &[2, 1], 1), (1, &[3, 1], 1)]),
            delta(&[(1, &[1, 50], 1)]),
        );
        // All three matches emitted even though only two fit the store.
        assert_eq!(out.len(), 3);
        assert!(j.overflow());
        assert_eq!(j.stored_results(), 2);
    }
}
