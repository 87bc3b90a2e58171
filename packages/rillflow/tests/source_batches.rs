//! Engine-level source semantics: batch ordering, schema validation,
//! caps, late view creation (backfill) and step atomicity.

mod common;

use common::*;
use rillflow::{Engine, Error, SourceBatch};
use serde_json::json;

#[test]
fn batch_sections_apply_in_order() {
    let mut engine = engine(
        "CREATE TABLE t (id INT PRIMARY KEY, v TEXT);
         CREATE VIEW all_rows AS SELECT * FROM t;",
    );

    // insert, overwrite and delete the same key within one batch
    let updates = engine
        .push(
            "t",
            SourceBatch::new()
                .insert(json!({"id": 1, "v": "a"}))
                .update(json!({"id": 1, "v": "b"}))
                .delete(json!({"id": 1})),
        )
        .unwrap();
    assert!(updates.is_empty());
    assert_eq!(engine.table_row_count("t").unwrap(), 0);

    // last-wins across duplicate inserts
    let updates = engine
        .push(
            "t",
            SourceBatch::new()
                .insert(json!({"id": 2, "v": "x"}))
                .insert(json!({"id": 2, "v": "y"})),
        )
        .unwrap();
    assert_delta(&updates, "all_rows", &[(row(vec![int(2), text("y")]), 1)]);
}

#[test]
fn schema_mismatch_aborts_the_step() {
    let mut engine = engine(
        "CREATE TABLE t (id INT PRIMARY KEY, v INT);
         CREATE VIEW all_rows AS SELECT * FROM t;",
    );

    let err = engine.push(
        "t",
        SourceBatch::new()
            .insert(json!({"id": 1, "v": 1}))
            .insert(json!({"id": 2, "v": "not an int"})),
    );
    assert!(matches!(err, Err(Error::SchemaMismatch(_))));
    // nothing from the batch landed, not even the valid first row
    assert_eq!(engine.table_row_count("t").unwrap(), 0);
    assert_materialized(&engine, "all_rows", &[]);

    assert!(matches!(
        engine.push("missing", SourceBatch::new().insert(json!({"id": 1}))),
        Err(Error::SchemaMismatch(_))
    ));
}

#[test]
fn views_created_after_data_are_backfilled() {
    let mut engine = Engine::new();
    engine
        .execute("CREATE TABLE t (id INT PRIMARY KEY, v INT);")
        .unwrap();
    engine
        .push(
            "t",
            inserts(vec![json!({"id": 1, "v": 5}), json!({"id": 2, "v": 50})]),
        )
        .unwrap();

    // the view sees the existing rows immediately
    engine
        .execute("CREATE VIEW big AS SELECT id FROM t WHERE v > 10;")
        .unwrap();
    assert_materialized(&engine, "big", &[(row(vec![int(2)]), 1)]);

    // and keeps updating incrementally afterwards
    let updates = engine
        .push("t", inserts(vec![json!({"id": 3, "v": 99})]))
        .unwrap();
    assert_delta(&updates, "big", &[(row(vec![int(3)]), 1)]);
}

#[test]
fn backfill_does_not_disturb_existing_views() {
    let mut engine = engine(
        "CREATE TABLE t (id INT PRIMARY KEY, v INT);
         CREATE VIEW count_all AS SELECT COUNT(*) FROM t;",
    );
    engine
        .push("t", inserts(vec![json!({"id": 1, "v": 1})]))
        .unwrap();
    assert_materialized(&engine, "count_all", &[(row(vec![int(1)]), 1)]);

    // creating a second view replays the snapshot only into it
    engine
        .execute("CREATE VIEW ids AS SELECT id FROM t;")
        .unwrap();
    assert_materialized(&engine, "ids", &[(row(vec![int(1)]), 1)]);
    assert_materialized(&engine, "count_all", &[(row(vec![int(1)]), 1)]);
}

#[test]
fn table_max_rows_sets_overflow_flag() {
    let mut engine = engine(
        "CREATE TABLE t (id INT PRIMARY KEY, v INT) WITH (max_rows = 2);
         CREATE VIEW all_rows AS SELECT * FROM t;",
    );

    let updates = engine
        .push(
            "t",
            inserts(vec![
                json!({"id": 1, "v": 1}),
                json!({"id": 2, "v": 2}),
                json!({"id": 3, "v": 3}),
            ]),
        )
        .unwrap();
    // counts stay exact and the flag is raised on the view update
    assert_eq!(engine.table_row_count("t").unwrap(), 3);
    assert!(update_for(&updates, "all_rows").overflow);
}

#[test]
fn composite_primary_keys() {
    let mut engine = engine(
        "CREATE TABLE t (a INT, b TEXT, v INT, PRIMARY KEY (a, b));
         CREATE VIEW all_rows AS SELECT * FROM t;",
    );

    engine
        .push(
            "t",
            inserts(vec![
                json!({"a": 1, "b": "x", "v": 1}),
                json!({"a": 1, "b": "y", "v": 2}),
            ]),
        )
        .unwrap();
    assert_eq!(engine.table_row_count("t").unwrap(), 2);

    // upsert on the composite key replaces just that row
    let updates = engine
        .push("t", inserts(vec![json!({"a": 1, "b": "x", "v": 9})]))
        .unwrap();
    assert_delta(
        &updates,
        "all_rows",
        &[
            (row(vec![int(1), text("x"), int(1)]), -1),
            (row(vec![int(1), text("x"), int(9)]), 1),
        ],
    );

    // a delete keyed by (a, b) removes only that row
    engine
        .push("t", deletes(vec![json!({"a": 1, "b": "x"})]))
        .unwrap();
    assert_eq!(engine.table_row_count("t").unwrap(), 1);
}

#[test]
fn missing_primary_key_is_rejected_at_create() {
    let mut engine = Engine::new();
    assert!(matches!(
        engine.execute("CREATE TABLE t (a INT, b TEXT);"),
        Err(Error::UnsupportedSql(_))
    ));
}
