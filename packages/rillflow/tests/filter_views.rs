//! Linear views: filter/project semantics, upsert idempotence and
//! self-cancellation through the whole engine.

mod common;

use common::*;
use rillflow::SourceBatch;
use serde_json::json;

const SCHEMA: &str = "
    CREATE TABLE orders (id INT PRIMARY KEY, status TEXT);
    CREATE VIEW pending AS SELECT * FROM orders WHERE status = 'pending';
";

#[test]
fn filter_scenario() {
    let mut engine = engine(SCHEMA);

    let updates = engine
        .push(
            "orders",
            inserts(vec![
                json!({"id": 1, "status": "pending"}),
                json!({"id": 2, "status": "shipped"}),
            ]),
        )
        .unwrap();
    assert_delta(&updates, "pending", &[(row(vec![int(1), text("pending")]), 1)]);

    // order 1 ships: the view retracts it
    let updates = engine
        .push(
            "orders",
            SourceBatch::new().update(json!({"id": 1, "status": "shipped"})),
        )
        .unwrap();
    assert_delta(&updates, "pending", &[(row(vec![int(1), text("pending")]), -1)]);
    assert_materialized(&engine, "pending", &[]);
}

#[test]
fn upsert_is_idempotent() {
    let mut engine = engine(SCHEMA);
    let batch = || inserts(vec![json!({"id": 1, "status": "pending"})]);

    let first = engine.push("orders", batch()).unwrap();
    assert_eq!(first.len(), 1);
    let hash_after_first = first[0].result_hash.clone();

    // Same row again: no view update at all, same materialization.
    let second = engine.push("orders", batch()).unwrap();
    assert!(second.is_empty());
    assert_materialized(&engine, "pending", &[(row(vec![int(1), text("pending")]), 1)]);

    let third = engine.push("orders", batch()).unwrap();
    assert!(third.is_empty());
    let _ = hash_after_first;
}

#[test]
fn insert_then_delete_cancels_everywhere() {
    let mut engine = engine(SCHEMA);

    engine
        .push("orders", inserts(vec![json!({"id": 7, "status": "pending"})]))
        .unwrap();
    let updates = engine
        .push("orders", deletes(vec![json!({"id": 7})]))
        .unwrap();
    assert_delta(&updates, "pending", &[(row(vec![int(7), text("pending")]), -1)]);
    assert_materialized(&engine, "pending", &[]);

    // Same-step insert+delete is invisible downstream.
    let updates = engine
        .push(
            "orders",
            SourceBatch::new()
                .insert(json!({"id": 8, "status": "pending"}))
                .delete(json!({"id": 8})),
        )
        .unwrap();
    assert!(updates.is_empty());
}

#[test]
fn projection_and_expressions_are_linear() {
    let mut engine = engine(
        "CREATE TABLE orders (id INT PRIMARY KEY, amount INT);
         CREATE VIEW doubled AS SELECT id, amount * 2 AS twice FROM orders;",
    );

    let updates = engine
        .push(
            "orders",
            inserts(vec![
                json!({"id": 1, "amount": 10}),
                json!({"id": 2, "amount": 20}),
            ]),
        )
        .unwrap();
    assert_delta(
        &updates,
        "doubled",
        &[
            (row(vec![int(1), int(20)]), 1),
            (row(vec![int(2), int(40)]), 1),
        ],
    );

    // Linearity: the delta for a retraction is exactly Q applied to it.
    let updates = engine
        .push("orders", deletes(vec![json!({"id": 1})]))
        .unwrap();
    assert_delta(&updates, "doubled", &[(row(vec![int(1), int(20)]), -1)]);
}

#[test]
fn three_valued_logic_in_where() {
    let mut engine = engine(
        "CREATE TABLE t (id INT PRIMARY KEY, v INT);
         CREATE VIEW big AS SELECT id FROM t WHERE v > 10;
         CREATE VIEW missing AS SELECT id FROM t WHERE v IS NULL;
         CREATE VIEW not_small AS SELECT id FROM t WHERE NOT (v < 10);",
    );

    engine
        .push(
            "t",
            inserts(vec![
                json!({"id": 1, "v": 50}),
                json!({"id": 2, "v": 5}),
                json!({"id": 3, "v": null}),
            ]),
        )
        .unwrap();

    // NULL comparisons are UNKNOWN: excluded from both > and NOT <.
    assert_materialized(&engine, "big", &[(row(vec![int(1)]), 1)]);
    assert_materialized(&engine, "missing", &[(row(vec![int(3)]), 1)]);
    assert_materialized(&engine, "not_small", &[(row(vec![int(1)]), 1)]);
}

#[test]
fn view_deltas_are_ordered_across_steps() {
    let mut engine = engine(SCHEMA);
    let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let sink = seen.clone();
    engine
        .subscribe("pending", move |update| {
            sink.borrow_mut().push(update.delta.clone());
        })
        .unwrap();

    engine
        .push("orders", inserts(vec![json!({"id": 1, "status": "pending"})]))
        .unwrap();
    engine
        .push("orders", deletes(vec![json!({"id": 1})]))
        .unwrap();

    let seen = seen.borrow();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0], vec![(row(vec![int(1), text("pending")]), 1)]);
    assert_eq!(seen[1], vec![(row(vec![int(1), text("pending")]), -1)]);
}
