use super::row::Row;
use rustc_hash::FxHasher;
use std::collections::{HashMap, HashSet};
use std::hash::BuildHasherDefault;

pub type Weight = i64;
pub type FastMap<K, V> = HashMap<K, V, BuildHasherDefault<FxHasher>>;
pub type FastHashSet<T> = HashSet<T, BuildHasherDefault<FxHasher>>;

/// A signed multiset: a finite map from distinct rows to non-zero
/// weights. The free abelian group on rows — addition cancels, negation
/// flips every weight, and the empty set is the zero.
///
/// Entries with weight zero are removed eagerly; no operation ever leaves
/// one behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZSet {
    entries: FastMap<Row, Weight>,
}

impl ZSet {
    pub fn new() -> Self {
        ZSet::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        ZSet {
            entries: FastMap::with_capacity_and_hasher(capacity, Default::default()),
        }
    }

    /// Add `weight` to the row's entry, cancelling to removal at zero.
    /// A zero `weight` is a no-op.
    pub fn insert(&mut self, row: Row, weight: Weight) {
        if weight == 0 {
            return;
        }
        match self.entries.entry(row) {
            std::collections::hash_map::Entry::Occupied(mut e) => {
                *e.get_mut() += weight;
                if *e.get() == 0 {
                    e.remove();
                }
            }
            std::collections::hash_map::Entry::Vacant(e) => {
                e.insert(weight);
            }
        }
    }

    pub fn weight(&self, row: &Row) -> Weight {
        self.entries.get(row).copied().unwrap_or(0)
    }

    pub fn contains(&self, row: &Row) -> bool {
        self.entries.contains_key(row)
    }

    /// Number of distinct entries, not the sum of weights.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&Row, Weight)> {
        self.entries.iter().map(|(r, w)| (r, *w))
    }

    pub fn into_entries(self) -> impl Iterator<Item = (Row, Weight)> {
        self.entries.into_iter()
    }

    pub fn add_assign(&mut self, other: &ZSet) {
        for (row, w) in other.entries() {
            let entry = self.entries.entry(row.clone()).or_insert(0);
            *entry += w;
            if *entry == 0 {
                self.entries.remove(row);
            }
        }
    }

    pub fn add(&self, other: &ZSet) -> ZSet {
        let mut out = self.clone();
        out.add_assign(other);
        out
    }

    pub fn neg(&self) -> ZSet {
        ZSet {
            entries: self.entries.iter().map(|(r, w)| (r.clone(), -w)).collect(),
        }
    }

    pub fn sub(&self, other: &ZSet) -> ZSet {
        let mut out = self.clone();
        for (row, w) in other.entries() {
            let entry = out.entries.entry(row.clone()).or_insert(0);
            *entry -= w;
            if *entry == 0 {
                out.entries.remove(row);
            }
        }
        out
    }

    /// Linear image under a pointwise row function; weights preserved
    /// (and combined when `f` collapses rows).
    pub fn map(&self, f: impl Fn(&Row) -> Row) -> ZSet {
        let mut out = ZSet::with_capacity(self.len());
        for (row, w) in self.entries() {
            out.insert(f(row), w);
        }
        out
    }

    /// Linear restriction to rows satisfying the predicate.
    pub fn filter(&self, predicate: impl Fn(&Row) -> bool) -> ZSet {
        ZSet {
            entries: self
                .entries
                .iter()
                .filter(|(r, _)| predicate(r))
                .map(|(r, w)| (r.clone(), *w))
                .collect(),
        }
    }

    /// Linear image where each row expands into a Z-set; weights multiply.
    pub fn flat_map(&self, f: impl Fn(&Row) -> ZSet) -> ZSet {
        let mut out = ZSet::new();
        for (row, w) in self.entries() {
            for (expanded, inner_w) in f(row).into_entries() {
                out.insert(expanded, w * inner_w);
            }
        }
        out
    }

    /// Rows with positive weight, each at weight one.
    pub fn distinct(&self) -> ZSet {
        ZSet {
            entries: self
                .entries
                .iter()
                .filter(|(_, w)| **w > 0)
                .map(|(r, _)| (r.clone(), 1))
                .collect(),
        }
    }

    /// Naive indexed product, used as the test oracle for the
    /// incremental join. Weights multiply; combined rows come from
    /// `combine`.
    pub fn join(
        &self,
        other: &ZSet,
        key_left: impl Fn(&Row) -> Row,
        key_right: impl Fn(&Row) -> Row,
        combine: impl Fn(&Row, &Row) -> Row,
    ) -> ZSet {
        let mut right_index: FastMap<Row, Vec<(&Row, Weight)>> = FastMap::default();
        for (row, w) in other.entries() {
            right_index.entry(key_right(row)).or_default().push((row, w));
        }
        let mut out = ZSet::new();
        for (left_row, lw) in self.entries() {
            if let Some(matches) = right_index.get(&key_left(left_row)) {
                for (right_row, rw) in matches {
                    out.insert(combine(left_row, right_row), lw * rw);
                }
            }
        }
        out
    }
}

impl FromIterator<(Row, Weight)> for ZSet {
    fn from_iter<T: IntoIterator<Item = (Row, Weight)>>(iter: T) -> Self {
        let mut out = ZSet::new();
        for (row, w) in iter {
            out.insert(row, w);
        }
        out
    }
}

/// A Z-set partitioned by an extracted join key: join key → row → weight.
/// The two levels are kept coherent by construction; groups that cancel
/// to empty are removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexedZSet {
    groups: FastMap<Row, FastMap<Row, Weight>>,
    entry_count: usize,
}

impl IndexedZSet {
    pub fn new() -> Self {
        IndexedZSet::default()
    }

    pub fn from_zset(zset: &ZSet, key: impl Fn(&Row) -> Row) -> Self {
        let mut out = IndexedZSet::new();
        for (row, w) in zset.entries() {
            out.insert(key(row), row.clone(), w);
        }
        out
    }

    pub fn insert(&mut self, key: Row, row: Row, weight: Weight) {
        if weight == 0 {
            return;
        }
        let group = self.groups.entry(key.clone()).or_default();
        let had = group.contains_key(&row);
        let entry = group.entry(row.clone()).or_insert(0);
        *entry += weight;
        if *entry == 0 {
            group.remove(&row);
            self.entry_count -= 1;
            if group.is_empty() {
                self.groups.remove(&key);
            }
        } else if !had {
            self.entry_count += 1;
        }
    }

    /// Entries whose join key equals `key`; O(1) expected.
    pub fn get(&self, key: &Row) -> Option<&FastMap<Row, Weight>> {
        self.groups.get(key)
    }

    pub fn weight(&self, key: &Row, row: &Row) -> Weight {
        self.groups
            .get(key)
            .and_then(|g| g.get(row))
            .copied()
            .unwrap_or(0)
    }

    pub fn groups(&self) -> impl Iterator<Item = (&Row, &FastMap<Row, Weight>)> {
        self.groups.iter()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&Row, &Row, Weight)> {
        self.groups
            .iter()
            .flat_map(|(k, g)| g.iter().map(move |(r, w)| (k, r, *w)))
    }

    /// Total number of (key, row) entries.
    pub fn len(&self) -> usize {
        self.entry_count
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    pub fn key_count(&self) -> usize {
        self.groups.len()
    }

    pub fn add_assign(&mut self, other: &IndexedZSet) {
        for (key, row, w) in other.entries() {
            self.insert(key.clone(), row.clone(), w);
        }
    }

    pub fn neg(&self) -> IndexedZSet {
        let mut out = self.clone();
        for group in out.groups.values_mut() {
            for w in group.values_mut() {
                *w = -*w;
            }
        }
        out
    }
}

#[cfg(test)]
mod zset_tests {
    use super::*;
    use crate::engine::types::value::Value;

    fn row(vals: &[i64]) -> Row {
        vals.iter().map(|&v| Value::Int(v)).collect()
    }

    #[test]
    fn insert_cancels_to_removal() {
        let mut z = ZSet::new();
        z.insert(row(&[1]), 2);
        z.insert(row(&[1]), -2);
        assert!(z.is_empty());
        z.insert(row(&[1]), 0);
        assert!(z.is_empty());
    }

    #[test]
    fn group_operations() {
        let a: ZSet = [(row(&[1]), 1), (row(&[2]), 2)].into_iter().collect();
        let b: ZSet = [(row(&[2]), -2), (row(&[3]), 1)].into_iter().collect();
        let sum = a.add(&b);
        assert_eq!(sum.weight(&row(&[1])), 1);
        assert_eq!(sum.weight(&row(&[2])), 0);
        assert_eq!(sum.weight(&row(&[3])), 1);
        assert_eq!(sum.len(), 2);
        assert_eq!(a.add(&a.neg()), ZSet::new());
        assert_eq!(a.sub(&b), a.add(&b.neg()));
    }

    #[test]
    fn map_collapses_and_preserves_weights() {
        let a: ZSet = [(row(&[1, 10]), 1), (row(&[2, 10]), 1)].into_iter().collect();
        let mapped = a.map(|r| r.project(&[1]));
        assert_eq!(mapped.weight(&row(&[10])), 2);
        assert_eq!(mapped.len(), 1);
    }

    #[test]
    fn filter_is_linear_restriction() {
        let a: ZSet = [(row(&[1]), 1), (row(&[2]), -3)].into_iter().collect();
        let kept = a.filter(|r| r.get(0) == &Value::Int(2));
        assert_eq!(kept.weight(&row(&[2])), -3);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn flat_map_multiplies_weights() {
        let a: ZSet = [(row(&[2]), 2)].into_iter().collect();
        let out = a.flat_map(|r| {
            let n = r.get(0).as_int().unwrap();
            (0..n).map(|i| (row(&[i]), 3)).collect()
        });
        assert_eq!(out.weight(&row(&[0])), 6);
        assert_eq!(out.weight(&row(&[1])), 6);
    }

    #[test]
    fn naive_join_matches_keys() {
        let left: ZSet = [(row(&[10, 1]), 1), (row(&[11, 2]), 1)].into_iter().collect();
        let right: ZSet = [(row(&[1, 100]), 1)].into_iter().collect();
        let joined = left.join(
            &right,
            |l| l.project(&[1]),
            |r| r.project(&[0]),
            |l, r| l.concat(r),
        );
        assert_eq!(joined.len(), 1);
        assert_eq!(joined.weight(&row(&[10, 1, 1, 100])), 1);
    }

    #[test]
    fn indexed_zset_stays_coherent() {
        let mut ix = IndexedZSet::new();
        ix.insert(row(&[1]), row(&[10, 1]), 1);
        ix.insert(row(&[1]), row(&[11, 1]), 1);
        ix.insert(row(&[2]), row(&[12, 2]), 1);
        assert_eq!(ix.len(), 3);
        assert_eq!(ix.key_count(), 2);
        assert_eq!(ix.get(&row(&[1])).unwrap().len(), 2);

        ix.insert(row(&[1]), row(&[10, 1]), -1);
        assert_eq!(ix.len(), 2);
        ix.insert(row(&[1]), row(&[11, 1]), -1);
        assert!(ix.get(&row(&[1])).is_none());
        assert_eq!(ix.key_count(), 1);
    }
}
