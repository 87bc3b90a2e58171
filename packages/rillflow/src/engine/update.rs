//! View output packaging.
//!
//! A view delta is a Z-set of result rows; the running materialization
//! is the running sum of delivered deltas. Every update carries a
//! deterministic blake3 digest of the full materialization so consumers
//! can cheaply detect divergence, and the latched overflow flag of the
//! view's join/source caps.

use crate::engine::types::{Row, Schema, Weight, ZSet};
use smol_str::SmolStr;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ViewUpdate {
    pub view: SmolStr,
    pub schema: Arc<Schema>,
    /// This step's delta, sorted by row for deterministic consumption.
    pub delta: Vec<(Row, Weight)>,
    /// blake3 digest of the sorted materialization after this step.
    pub result_hash: String,
    /// True once a join result store or source exceeded its cap.
    pub overflow: bool,
}

impl ViewUpdate {
    pub fn json_delta(&self) -> Vec<(serde_json::Value, Weight)> {
        self.delta
            .iter()
            .map(|(row, w)| (row.to_json(&self.schema), *w))
            .collect()
    }
}

/// Deterministic digest of a materialized Z-set: rows sorted, each
/// hashed with type tags so e.g. `1` and `'1'` cannot collide.
pub fn result_digest(materialized: &ZSet) -> String {
    let mut entries: Vec<(&Row, Weight)> = materialized.entries().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let mut hasher = blake3::Hasher::new();
    for (row, weight) in entries {
        for value in row.iter() {
            hasher.update(value.type_name().as_bytes());
            hasher.update(&[0]);
            hasher.update(value.render_text().as_bytes());
            hasher.update(&[0]);
        }
        hasher.update(&weight.to_le_bytes());
        hasher.update(&[1]);
    }
    hasher.finalize().to_hex().to_string()
}

/// Sort a delta into the deterministic order updates are delivered in.
pub fn sorted_delta(delta: &ZSet) -> Vec<(Row, Weight)> {
    let mut entries: Vec<(Row, Weight)> = delta
        .entries()
        .map(|(row, w)| (row.clone(), w))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries
}
