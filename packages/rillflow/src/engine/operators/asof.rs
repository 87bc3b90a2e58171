//! ASOF (temporal) join.
//!
//! Each left row with join key `j` and timestamp `t` matches the right
//! row with the same key whose timestamp is the largest `≤ t`
//! (backward) or the smallest `≥ t` (forward). Inner semantics: a left
//! row with no temporal match produces no output. The right side is
//! kept sorted per key so lookups are binary searches; timestamp ties
//! break by row order.

use crate::engine::types::{FastHashSet, FastMap, Row, Weight, ZSet};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsofDirection {
    Backward,
    Forward,
}

/// One keyed, timestamped delta entry, as extracted by the circuit node.
pub type AsofDelta = Vec<(Row, Row, i64, Weight)>;

type LeftRows = FastMap<Row, (i64, Weight)>;
type RightRows = Vec<(i64, Row, Weight)>;

#[derive(Debug, Clone)]
pub struct AsofJoinState {
    dir: AsofDirection,
    left: FastMap<Row, LeftRows>,
    right: FastMap<Row, RightRows>,
}

#[derive(Debug, Default)]
pub struct AsofPending {
    left_new: Vec<(Row, LeftRows)>,
    right_new: Vec<(Row, RightRows)>,
}

fn lookup<'a>(rows: &'a RightRows, ts: i64, dir: AsofDirection) -> Option<(&'a Row, Weight)> {
    match dir {
        AsofDirection::Backward => {
            let idx = rows.partition_point(|(rts, _, _)| *rts <= ts);
            if idx == 0 {
                None
            } else {
                let (_, row, w) = &rows[idx - 1];
                Some((row, *w))
            }
        }
        AsofDirection::Forward => {
            let idx = rows.partition_point(|(rts, _, _)| *rts < ts);
            rows.get(idx).map(|(_, row, w)| (row, *w))
        }
    }
}

fn emit_matches(out: &mut ZSet, left: &LeftRows, right: &RightRows, dir: AsofDirection, sign: Weight) {
    for (lrow, (ts, lw)) in left {
        if let Some((rrow, rw)) = lookup(right, *ts, dir) {
            out.insert(lrow.concat(rrow), sign * lw * rw);
        }
    }
}

impl AsofJoinState {
    pub fn new(dir: AsofDirection) -> Self {
        AsofJoinState {
            dir,
            left: FastMap::default(),
            right: FastMap::default(),
        }
    }

    pub fn direction(&self) -> AsofDirection {
        self.dir
    }

    pub fn eval(&self, dl: &AsofDelta, dr: &AsofDelta) -> Result<(ZSet, AsofPending)> {
        let mut affected: FastHashSet<&Row> = FastHashSet::default();
        for (key, ..) in dl {
            affected.insert(key);
        }
        for (key, ..) in dr {
            affected.insert(key);
        }

        let mut out = ZSet::new();
        let mut pending = AsofPending::default();

        for key in affected {
            let old_left = self.left.get(key);
            let old_right = self.right.get(key);

            let mut new_left: LeftRows = old_left.cloned().unwrap_or_default();
            for (k, row, ts, w) in dl {
                if k != key {
                    continue;
                }
                let entry = new_left.entry(row.clone()).or_insert((*ts, 0));
                entry.1 += w;
                if entry.1 < 0 {
                    return Err(Error::invariant(
                        "retraction of absent row on left side of asof join",
                    ));
                }
                if entry.1 == 0 {
                    new_left.remove(row);
                }
            }

            let mut new_right: RightRows = old_right.cloned().unwrap_or_default();
            for (k, row, ts, w) in dr {
                if k != key {
                    continue;
                }
                let pos = new_right
                    .iter()
                    .position(|(rts, rrow, _)| rts == ts && rrow == row);
                match pos {
                    Some(i) => {
                        new_right[i].2 += w;
                        if new_right[i].2 < 0 {
                            return Err(Error::invariant(
                                "retraction of absent row on right side of asof join",
                            ));
                        }
                        if new_right[i].2 == 0 {
                            new_right.remove(i);
                        }
                    }
                    None => {
                        if *w < 0 {
                            return Err(Error::invariant(
                                "retraction of absent row on right side of asof join",
                            ));
                        }
                        let at = new_right
                            .partition_point(|(rts, rrow, _)| (*rts, rrow) < (*ts, row));
                        new_right.insert(at, (*ts, row.clone(), *w));
                    }
                }
            }

            // Delta for this key: new matches minus old matches.
            if let (Some(ol), Some(or)) = (old_left, old_right) {
                emit_matches(&mut out, ol, or, self.dir, -1);
            }
            emit_matches(&mut out, &new_left, &new_right, self.dir, 1);

            pending.left_new.push((key.clone(), new_left));
            pending.right_new.push((key.clone(), new_right));
        }

        Ok((out, pending))
    }

    pub fn commit(&mut self, pending: AsofPending) {
        for (key, rows) in pending.left_new {
            if rows.is_empty() {
                self.left.remove(&key);
            } else {
                self.left.insert(key, rows);
            }
        }
        for (key, rows) in pending.right_new {
            if rows.is_empty() {
                self.right.remove(&key);
            } else {
                self.right.insert(key, rows);
            }
        }
    }
}

#[cfg(test)]
mod asof_tests {
    use super::*;
    use crate::engine::types::Value;

    fn key(s: &str) -> Row {
        Row::from_values(vec![Value::from(s)])
    }

    fn trade(sym: &str, ts: i64) -> Row {
        Row::from_values(vec![Value::from(sym), Value::Int(ts)])
    }

    fn price(sym: &str, ts: i64, p: i64) -> Row {
        Row::from_values(vec![Value::from(sym), Value::Int(ts), Value::Int(p)])
    }

    fn step(s: &mut AsofJoinState, dl: AsofDelta, dr: AsofDelta) -> ZSet {
        let (out, pending) = s.eval(&dl, &dr).unwrap();
        s.commit(pending);
        out
    }

    #[test]
    fn backward_match_takes_latest_at_or_before() {
        let mut j = AsofJoinState::new(AsofDirection::Backward);
        step(
            &mut j,
            vec![],
            vec![
                (key("AAPL"), price("AAPL", 1000, 100), 1000, 1),
                (key("AAPL"), price("AAPL", 2000, 105), 2000, 1),
            ],
        );
        let out = step(
            &mut j,
            vec![(key("AAPL"), trade("AAPL", 2500), 2500, 1)],
            vec![],
        );
        assert_eq!(out.len(), 1);
        let expected = trade("AAPL", 2500).concat(&price("AAPL", 2000, 105));
        assert_eq!(out.weight(&expected), 1);
    }

    #[test]
    fn late_right_row_rebinds_existing_left_rows() {
        let mut j = AsofJoinState::new(AsofDirection::Backward);
        step(
            &mut j,
            vec![(key("AAPL"), trade("AAPL", 2500), 2500, 1)],
            vec![(key("AAPL"), price("AAPL", 1000, 100), 1000, 1)],
        );
        // A closer price arrives: the trade retracts its old match and
        // re-emits against the new one.
        let out = step(
            &mut j,
            vec![],
            vec![(key("AAPL"), price("AAPL", 2000, 105), 2000, 1)],
        );
        let old = trade("AAPL", 2500).concat(&price("AAPL", 1000, 100));
        let new = trade("AAPL", 2500).concat(&price("AAPL", 2000, 105));
        assert_eq!(out.weight(&old), -1);
        assert_eq!(out.weight(&new), 1);
    }

    #[test]
    fn no_match_before_first_timestamp() {
        let mut j = AsofJoinState::new(AsofDirection::Backward);
        step(
            &mut j,
            vec![],
            vec![(key("AAPL"), price("AAPL", 1000, 100), 1000, 1)],
        );
        let out = step(
            &mut j,
            vec![(key("AAPL"), trade("AAPL", 500), 500, 1)],
            vec![],
        );
        assert!(out.is_empty());
    }

    #[test]
    fn forward_match_takes_earliest_at_or_after() {
        let mut j = AsofJoinState::new(AsofDirection::Forward);
        step(
            &mut j,
            vec![],
            vec![
                (key("AAPL"), price("AAPL", 1000, 100), 1000, 1),
                (key("AAPL"), price("AAPL", 2000, 105), 2000, 1),
            ],
        );
        let out = step(
            &mut j,
            vec![(key("AAPL"), trade("AAPL", 1500), 1500, 1)],
            vec![],
        );
        let expected = trade("AAPL", 1500).concat(&price("AAPL", 2000, 105));
        assert_eq!(out.weight(&expected), 1);
    }

    #[test]
    fn retracting_matched_right_row_falls_back() {
        let mut j = AsofJoinState::new(AsofDirection::Backward);
        step(
            &mut j,
            vec![(key("AAPL"), trade("AAPL", 2500), 2500, 1)],
            vec![
                (key("AAPL"), price("AAPL", 1000, 100), 1000, 1),
                (key("AAPL"), price("AAPL", 2000, 105), 2000, 1),
            ],
        );
        let out = step(
            &mut j,
            vec![],
            vec![(key("AAPL"), price("AAPL", 2000, 105), 2000, -1)],
        );
        let newer = trade("AAPL", 2500).concat(&price("AAPL", 2000, 105));
        let older = trade("AAPL", 2500).concat(&price("AAPL", 1000, 100));
        assert_eq!(out.weight(&newer), -1);
        assert_eq!(out.weight(&older), 1);
    }
}
