//! Chain-rule oracle: for random operation sequences, the running sum
//! of the incremental circuit's outputs must equal the non-incremental
//! query applied to the running sum of inputs.

mod common;

use common::text;
use proptest::prelude::*;
use rillflow::{Engine, Row, SourceBatch, Value, Weight};
use serde_json::json;
use std::collections::BTreeMap;

const SCHEMA: &str = "
    CREATE TABLE items (id INT PRIMARY KEY, cat INT, amount INT);
    CREATE TABLE cats (cat INT PRIMARY KEY, name TEXT);
    CREATE VIEW expensive AS SELECT id FROM items WHERE amount > 25;
    CREATE VIEW totals AS SELECT cat, SUM(amount) FROM items GROUP BY cat;
    CREATE VIEW named AS SELECT items.id, cats.name FROM items JOIN cats ON items.cat = cats.cat;
    CREATE VIEW labels AS SELECT cat FROM items UNION SELECT cat FROM cats;
";

#[derive(Debug, Clone)]
enum Op {
    UpsertItem { id: i64, cat: i64, amount: i64 },
    DeleteItem { id: i64 },
    UpsertCat { cat: i64, name: i64 },
    DeleteCat { cat: i64 },
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0i64..6, 0i64..3, 0i64..50)
            .prop_map(|(id, cat, amount)| Op::UpsertItem { id, cat, amount }),
        (0i64..6).prop_map(|id| Op::DeleteItem { id }),
        (0i64..3, 0i64..3).prop_map(|(cat, name)| Op::UpsertCat { cat, name }),
        (0i64..3).prop_map(|cat| Op::DeleteCat { cat }),
    ]
}

#[derive(Default)]
struct Model {
    items: BTreeMap<i64, (i64, i64)>,
    cats: BTreeMap<i64, String>,
}

fn sorted(mut rows: Vec<(Row, Weight)>) -> Vec<(Row, Weight)> {
    rows.sort();
    rows
}

impl Model {
    fn expensive(&self) -> Vec<(Row, Weight)> {
        self.items
            .iter()
            .filter(|(_, (_, amount))| *amount > 25)
            .map(|(id, _)| (Row::from_values(vec![Value::Int(*id)]), 1))
            .collect()
    }

    fn totals(&self) -> Vec<(Row, Weight)> {
        let mut sums: BTreeMap<i64, i64> = BTreeMap::new();
        for (cat, amount) in self.items.values() {
            *sums.entry(*cat).or_insert(0) += amount;
        }
        sums.into_iter()
            .map(|(cat, sum)| {
                (
                    Row::from_values(vec![Value::Int(cat), Value::Int(sum)]),
                    1,
                )
            })
            .collect()
    }

    fn named(&self) -> Vec<(Row, Weight)> {
        let mut out = Vec::new();
        for (id, (cat, _)) in &self.items {
            if let Some(name) = self.cats.get(cat) {
                out.push((
                    Row::from_values(vec![Value::Int(*id), text(name)]),
                    1,
                ));
            }
        }
        out
    }

    fn labels(&self) -> Vec<(Row, Weight)> {
        let mut cats: Vec<i64> = self
            .items
            .values()
            .map(|(cat, _)| *cat)
            .chain(self.cats.keys().copied())
            .collect();
        cats.sort_unstable();
        cats.dedup();
        cats.into_iter()
            .map(|cat| (Row::from_values(vec![Value::Int(cat)]), 1))
            .collect()
    }
}

fn apply_op(engine: &mut Engine, model: &mut Model, op: &Op) {
    match op {
        Op::UpsertItem { id, cat, amount } => {
            model.items.insert(*id, (*cat, *amount));
            engine
                .push(
                    "items",
                    SourceBatch::new()
                        .insert(json!({"id": id, "cat": cat, "amount": amount})),
                )
                .unwrap();
        }
        Op::DeleteItem { id } => {
            model.items.remove(id);
            engine
                .push("items", SourceBatch::new().delete(json!({"id": id})))
                .unwrap();
        }
        Op::UpsertCat { cat, name } => {
            let name = format!("cat{}", name);
            model.cats.insert(*cat, name.clone());
            engine
                .push(
                    "cats",
                    SourceBatch::new().insert(json!({"cat": cat, "name": name})),
                )
                .unwrap();
        }
        Op::DeleteCat { cat } => {
            model.cats.remove(cat);
            engine
                .push("cats", SourceBatch::new().delete(json!({"cat": cat})))
                .unwrap();
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn incremental_views_match_naive_reevaluation(ops in prop::collection::vec(arb_op(), 1..25)) {
        let mut engine = Engine::new();
        engine.execute(SCHEMA).unwrap();
        let mut model = Model::default();

        for op in &ops {
            apply_op(&mut engine, &mut model, op);

            prop_assert_eq!(
                sorted(engine.materialize("expensive").unwrap()),
                sorted(model.expensive())
            );
            prop_assert_eq!(
                sorted(engine.materialize("totals").unwrap()),
                sorted(model.totals())
            );
            prop_assert_eq!(
                sorted(engine.materialize("named").unwrap()),
                sorted(model.named())
            );
            prop_assert_eq!(
                sorted(engine.materialize("labels").unwrap()),
                sorted(model.labels())
            );
        }
    }
}
