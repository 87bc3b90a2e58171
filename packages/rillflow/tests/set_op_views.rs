//! UNION / EXCEPT / INTERSECT, with and without ALL.

mod common;

use common::*;
use serde_json::json;

const SCHEMA: &str = "
    CREATE TABLE a (id INT PRIMARY KEY, v INT);
    CREATE TABLE b (id INT PRIMARY KEY, v INT);
    CREATE VIEW union_all AS SELECT v FROM a UNION ALL SELECT v FROM b;
    CREATE VIEW union_set AS SELECT v FROM a UNION SELECT v FROM b;
    CREATE VIEW except_set AS SELECT v FROM a EXCEPT SELECT v FROM b;
    CREATE VIEW except_all AS SELECT v FROM a EXCEPT ALL SELECT v FROM b;
    CREATE VIEW intersect_set AS SELECT v FROM a INTERSECT SELECT v FROM b;
    CREATE VIEW intersect_all AS SELECT v FROM a INTERSECT ALL SELECT v FROM b;
";

fn seed() -> rillflow::Engine {
    let mut engine = engine(SCHEMA);
    // a: {1, 1, 2}  b: {1, 3}
    engine
        .apply(vec![
            (
                "a",
                inserts(vec![
                    json!({"id": 1, "v": 1}),
                    json!({"id": 2, "v": 1}),
                    json!({"id": 3, "v": 2}),
                ]),
            ),
            (
                "b",
                inserts(vec![json!({"id": 1, "v": 1}), json!({"id": 2, "v": 3})]),
            ),
        ])
        .unwrap();
    engine
}

#[test]
fn union_all_sums_multiplicities() {
    let engine = seed();
    assert_materialized(
        &engine,
        "union_all",
        &[
            (row(vec![int(1)]), 3),
            (row(vec![int(2)]), 1),
            (row(vec![int(3)]), 1),
        ],
    );
}

#[test]
fn union_set_collapses() {
    let engine = seed();
    assert_materialized(
        &engine,
        "union_set",
        &[
            (row(vec![int(1)]), 1),
            (row(vec![int(2)]), 1),
            (row(vec![int(3)]), 1),
        ],
    );
}

#[test]
fn except_variants() {
    let engine = seed();
    // set: {1,2} minus {1,3} = {2}
    assert_materialized(&engine, "except_set", &[(row(vec![int(2)]), 1)]);
    // all: {1,1,2} minus {1,3} = {1,2}
    assert_materialized(
        &engine,
        "except_all",
        &[(row(vec![int(1)]), 1), (row(vec![int(2)]), 1)],
    );
}

#[test]
fn intersect_variants() {
    let engine = seed();
    assert_materialized(&engine, "intersect_set", &[(row(vec![int(1)]), 1)]);
    assert_materialized(&engine, "intersect_all", &[(row(vec![int(1)]), 1)]);
}

#[test]
fn set_ops_update_incrementally() {
    let mut engine = seed();

    // delete one of a's duplicate 1s: union_all drops one copy,
    // except_all loses its remaining 1
    engine.push("a", deletes(vec![json!({"id": 2})])).unwrap();
    assert_materialized(
        &engine,
        "union_all",
        &[
            (row(vec![int(1)]), 2),
            (row(vec![int(2)]), 1),
            (row(vec![int(3)]), 1),
        ],
    );
    assert_materialized(&engine, "except_all", &[(row(vec![int(2)]), 1)]);

    // b loses its 1: except_set regains 1, intersect loses it
    engine.push("b", deletes(vec![json!({"id": 1})])).unwrap();
    assert_materialized(
        &engine,
        "except_set",
        &[(row(vec![int(1)]), 1), (row(vec![int(2)]), 1)],
    );
    assert_materialized(&engine, "intersect_set", &[]);
}

#[test]
fn arity_mismatch_is_rejected() {
    let mut engine = rillflow::Engine::new();
    let err = engine.execute(
        "CREATE TABLE a (id INT PRIMARY KEY, v INT);
         CREATE TABLE b (id INT PRIMARY KEY, v INT);
         CREATE VIEW bad AS SELECT v FROM a UNION SELECT id, v FROM b;",
    );
    assert!(matches!(err, Err(rillflow::Error::UnsupportedSql(_))));
}
