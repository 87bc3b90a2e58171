//! Shared helpers for the integration tests: engine setup, row
//! construction and view-delta assertions.

#![allow(dead_code)]

use rillflow::{Engine, Row, SourceBatch, Value, ViewUpdate, Weight};

pub fn engine(script: &str) -> Engine {
    let mut engine = Engine::new();
    engine.execute(script).expect("schema script should compile");
    engine
}

pub fn row(values: Vec<Value>) -> Row {
    Row::from_values(values)
}

pub fn int(v: i64) -> Value {
    Value::Int(v)
}

pub fn text(v: &str) -> Value {
    Value::from(v)
}

/// The update for one view out of a step's updates; panics if absent.
pub fn update_for<'a>(updates: &'a [ViewUpdate], view: &str) -> &'a ViewUpdate {
    updates
        .iter()
        .find(|u| u.view == view)
        .unwrap_or_else(|| panic!("no update for view {:?} in {:?}", view, updates))
}

/// Assert a view delta matches exactly (order-insensitive).
pub fn assert_delta(updates: &[ViewUpdate], view: &str, expected: &[(Row, Weight)]) {
    let update = update_for(updates, view);
    let mut actual = update.delta.clone();
    actual.sort();
    let mut expected: Vec<(Row, Weight)> = expected.to_vec();
    expected.sort();
    assert_eq!(actual, expected, "delta mismatch for view {:?}", view);
}

/// Assert that no update was emitted for the view this step.
pub fn assert_no_update(updates: &[ViewUpdate], view: &str) {
    assert!(
        updates.iter().all(|u| u.view != view),
        "expected no update for {:?}, got {:?}",
        view,
        updates
    );
}

/// Assert the full materialization (weights included), order-insensitive.
pub fn assert_materialized(engine: &Engine, view: &str, expected: &[(Row, Weight)]) {
    let mut actual = engine.materialize(view).expect("view exists");
    actual.sort();
    let mut expected: Vec<(Row, Weight)> = expected.to_vec();
    expected.sort();
    assert_eq!(actual, expected, "materialization mismatch for {:?}", view);
}

pub fn inserts(rows: Vec<serde_json::Value>) -> SourceBatch {
    let mut batch = SourceBatch::new();
    for r in rows {
        batch = batch.insert(r);
    }
    batch
}

pub fn deletes(rows: Vec<serde_json::Value>) -> SourceBatch {
    let mut batch = SourceBatch::new();
    for r in rows {
        batch = batch.delete(r);
    }
    batch
}
