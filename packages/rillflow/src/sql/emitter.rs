//! Emitter: relational tree → circuit subgraph.
//!
//! Linear nodes pass deltas through unchanged; joins, aggregates,
//! windows, distinct and set ops become the stateful incremental
//! operators. Outer joins are composed from the inner join plus
//! null-padded anti-joins, so the circuit itself only ever runs the
//! bilinear equi-join.

use super::planner::{RelNode, ViewPlan};
use crate::engine::circuit::{Circuit, NodeId};
use crate::engine::eval::ScalarExpr;
use crate::engine::operators::asof::AsofJoinState;
use crate::engine::operators::distinct::SetOpState;
use crate::engine::operators::join::JoinState;
use crate::engine::operators::topk::TopKState;
use crate::engine::types::Value;
use crate::engine::{JoinMode, ViewOptions};
use crate::error::Result;
use smol_str::SmolStr;

pub fn emit_view(
    circuit: &mut Circuit,
    view: &SmolStr,
    plan: &ViewPlan,
    options: &ViewOptions,
) -> Result<NodeId> {
    circuit.begin_view(view.clone());
    let root = emit(circuit, &plan.root, options)?;
    let sink = circuit.add_sink(root, view.clone());
    circuit.end_view();
    Ok(sink)
}

fn null_pad(width: usize) -> impl Iterator<Item = ScalarExpr> {
    (0..width).map(|_| ScalarExpr::Literal(Value::Null))
}

fn columns(range: std::ops::Range<usize>) -> impl Iterator<Item = ScalarExpr> {
    range.map(ScalarExpr::Column)
}

fn emit(circuit: &mut Circuit, rel: &RelNode, options: &ViewOptions) -> Result<NodeId> {
    let id = match rel {
        RelNode::Scan { table } => circuit.add_source(table.clone()),
        RelNode::Filter { input, predicate } => {
            let input = emit(circuit, input, options)?;
            circuit.add_filter(input, predicate.clone())
        }
        RelNode::Project { input, exprs } => {
            let input = emit(circuit, input, options)?;
            circuit.add_project(input, exprs.clone())
        }
        RelNode::Join {
            left,
            right,
            kind,
            left_key,
            right_key,
            left_width,
            right_width,
        } => {
            let l = emit(circuit, left, options)?;
            let r = emit(circuit, right, options)?;
            let join_state = || {
                JoinState::new(
                    options.max_results,
                    options.join_mode == JoinMode::AppendOnly,
                )
            };
            let inner =
                circuit.add_join(l, r, left_key.clone(), right_key.clone(), join_state());
            match kind {
                super::ast::JoinKind::Inner | super::ast::JoinKind::Cross => inner,
                super::ast::JoinKind::Left => {
                    let anti =
                        circuit.add_semi_join(l, r, left_key.clone(), right_key.clone(), true);
                    let pad = circuit.add_project(
                        anti,
                        columns(0..*left_width).chain(null_pad(*right_width)).collect(),
                    );
                    circuit.add_union(vec![inner, pad])
                }
                super::ast::JoinKind::Right => {
                    let anti =
                        circuit.add_semi_join(r, l, right_key.clone(), left_key.clone(), true);
                    let pad = circuit.add_project(
                        anti,
                        null_pad(*left_width).chain(columns(0..*right_width)).collect(),
                    );
                    circuit.add_union(vec![inner, pad])
                }
                super::ast::JoinKind::Full => {
                    let left_orphans =
                        circuit.add_semi_join(l, r, left_key.clone(), right_key.clone(), true);
                    let left_pad = circuit.add_project(
                        left_orphans,
                        columns(0..*left_width).chain(null_pad(*right_width)).collect(),
                    );
                    let right_orphans =
                        circuit.add_semi_join(r, l, right_key.clone(), left_key.clone(), true);
                    let right_pad = circuit.add_project(
                        right_orphans,
                        null_pad(*left_width).chain(columns(0..*right_width)).collect(),
                    );
                    circuit.add_union(vec![inner, left_pad, right_pad])
                }
                super::ast::JoinKind::Asof => unreachable!("asof plans as RelNode::Asof"),
            }
        }
        RelNode::Semi {
            left,
            right,
            left_key,
            right_key,
            anti,
        } => {
            let l = emit(circuit, left, options)?;
            let r = emit(circuit, right, options)?;
            circuit.add_semi_join(l, r, left_key.clone(), right_key.clone(), *anti)
        }
        RelNode::Asof {
            left,
            right,
            left_key,
            right_key,
            left_ts,
            right_ts,
            direction,
        } => {
            let l = emit(circuit, left, options)?;
            let r = emit(circuit, right, options)?;
            circuit.add_asof_join(
                l,
                r,
                left_key.clone(),
                right_key.clone(),
                left_ts.clone(),
                right_ts.clone(),
                AsofJoinState::new(*direction),
            )
        }
        RelNode::Aggregate { input, group, aggs } => {
            let input = emit(circuit, input, options)?;
            circuit.add_aggregate(input, group.clone(), aggs.clone())
        }
        RelNode::Window { input, spec } => {
            let input = emit(circuit, input, options)?;
            circuit.add_window(input, spec.clone())
        }
        RelNode::Distinct { input } => {
            let input = emit(circuit, input, options)?;
            circuit.add_distinct(input)
        }
        RelNode::Union { left, right } => {
            let l = emit(circuit, left, options)?;
            let r = emit(circuit, right, options)?;
            circuit.add_union(vec![l, r])
        }
        RelNode::SetOp {
            left,
            right,
            kind,
            all,
        } => {
            let l = emit(circuit, left, options)?;
            let r = emit(circuit, right, options)?;
            circuit.add_set_op(l, r, SetOpState::new(*kind, *all))
        }
        RelNode::TopK {
            input,
            order,
            limit,
            offset,
        } => {
            let input = emit(circuit, input, options)?;
            circuit.add_topk(input, TopKState::new(order.clone(), *limit, *offset))
        }
    };
    Ok(id)
}
