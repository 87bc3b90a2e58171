//! The circuit: a DAG of operator nodes evaluated one step at a time.
//!
//! Construction wires nodes by id; `build` validates the graph (every
//! cycle must pass through a delay, every source must be declared) and
//! fixes a topological order. A step evaluates every node against the
//! pre-step operator state, collecting staged state diffs, and commits
//! them only after the whole step succeeded — a failing step changes
//! nothing and delivers nothing.

use crate::engine::eval::{eval, eval_key, eval_predicate, eval_projection, ScalarExpr};
use crate::engine::operators::aggregate::{AggSpec, AggregatePending, AggregateState};
use crate::engine::operators::asof::{AsofDelta, AsofJoinState, AsofPending};
use crate::engine::operators::distinct::{
    DistinctPending, DistinctState, SetOpPending, SetOpState,
};
use crate::engine::operators::join::{JoinPending, JoinState};
use crate::engine::operators::pruned::{PrunedJoinPending, PrunedJoinState, TimestampedDelta};
use crate::engine::operators::semijoin::{SemiJoinPending, SemiJoinState};
use crate::engine::operators::topk::{TopKPending, TopKState};
use crate::engine::operators::window::{PartitionedWindowState, WindowPending, WindowSpec};
use crate::engine::types::{FastHashSet, FastMap, IndexedZSet, Row, Value, Weight, ZSet};
use crate::error::{Error, Result};
use smol_str::SmolStr;
use std::collections::VecDeque;
use std::sync::OnceLock;

pub type NodeId = usize;

#[derive(Debug)]
pub enum Node {
    Source {
        table: SmolStr,
    },
    Filter {
        input: NodeId,
        predicate: ScalarExpr,
    },
    Project {
        input: NodeId,
        exprs: Vec<ScalarExpr>,
    },
    Union {
        inputs: Vec<NodeId>,
    },
    Negate {
        input: NodeId,
    },
    Distinct {
        input: NodeId,
        state: DistinctState,
    },
    SetOp {
        left: NodeId,
        right: NodeId,
        state: SetOpState,
    },
    Join {
        left: NodeId,
        right: NodeId,
        left_key: Vec<ScalarExpr>,
        right_key: Vec<ScalarExpr>,
        state: JoinState,
    },
    SemiJoin {
        left: NodeId,
        right: NodeId,
        left_key: Vec<ScalarExpr>,
        right_key: Vec<ScalarExpr>,
        state: SemiJoinState,
    },
    AsofJoin {
        left: NodeId,
        right: NodeId,
        left_key: Vec<ScalarExpr>,
        right_key: Vec<ScalarExpr>,
        left_ts: ScalarExpr,
        right_ts: ScalarExpr,
        state: AsofJoinState,
    },
    PrunedJoin {
        left: NodeId,
        right: NodeId,
        left_key: Vec<ScalarExpr>,
        right_key: Vec<ScalarExpr>,
        left_ts: ScalarExpr,
        right_ts: ScalarExpr,
        state: PrunedJoinState,
    },
    Aggregate {
        input: NodeId,
        group: Vec<ScalarExpr>,
        aggs: Vec<AggSpec>,
        state: AggregateState,
    },
    Window {
        input: NodeId,
        spec: WindowSpec,
        state: PartitionedWindowState,
    },
    TopK {
        input: NodeId,
        state: TopKState,
    },
    Integrate {
        input: NodeId,
        state: ZSet,
    },
    Differentiate {
        input: NodeId,
        prev: ZSet,
    },
    /// z⁻¹: outputs last step's input; the only legal way to close a
    /// cycle.
    Delay {
        input: NodeId,
        prev: ZSet,
    },
    Sink {
        input: NodeId,
        view: SmolStr,
    },
}

impl Node {
    fn inputs(&self) -> Vec<NodeId> {
        match self {
            Node::Source { .. } => vec![],
            Node::Filter { input, .. }
            | Node::Project { input, .. }
            | Node::Negate { input }
            | Node::Distinct { input, .. }
            | Node::Aggregate { input, .. }
            | Node::Window { input, .. }
            | Node::TopK { input, .. }
            | Node::Integrate { input, .. }
            | Node::Differentiate { input, .. }
            | Node::Delay { input, .. }
            | Node::Sink { input, .. } => vec![*input],
            Node::Union { inputs } => inputs.clone(),
            Node::SetOp { left, right, .. }
            | Node::Join { left, right, .. }
            | Node::SemiJoin { left, right, .. }
            | Node::AsofJoin { left, right, .. }
            | Node::PrunedJoin { left, right, .. } => vec![*left, *right],
        }
    }
}

enum Pending {
    Distinct(DistinctPending),
    SetOp(SetOpPending),
    Join(JoinPending),
    SemiJoin(SemiJoinPending),
    Asof(AsofPending),
    Pruned(PrunedJoinPending),
    Aggregate(AggregatePending),
    Window(WindowPending),
    TopK(TopKPending),
    Integrate(ZSet),
    Differentiate(ZSet),
}

fn empty_zset() -> &'static ZSet {
    static EMPTY: OnceLock<ZSet> = OnceLock::new();
    EMPTY.get_or_init(ZSet::new)
}

fn timestamp_of(v: &Value) -> Option<i64> {
    match v {
        Value::DateTime(t) => Some(*t),
        Value::Int(i) => Some(*i),
        Value::Float(f) => Some(*f as i64),
        _ => None,
    }
}

fn keyed_delta(delta: &ZSet, key: &[ScalarExpr]) -> IndexedZSet {
    let mut out = IndexedZSet::new();
    for (row, w) in delta.entries() {
        if let Some(k) = eval_key(key, row) {
            out.insert(k, row.clone(), w);
        }
    }
    out
}

fn timestamped_delta(delta: &ZSet, key: &[ScalarExpr], ts: &ScalarExpr) -> TimestampedDelta {
    let mut out = Vec::new();
    for (row, w) in delta.entries() {
        let k = match eval_key(key, row) {
            Some(k) => k,
            None => continue,
        };
        let t = match timestamp_of(&eval(ts, row)) {
            Some(t) => t,
            None => continue,
        };
        out.push((k, row.clone(), t, w));
    }
    out
}

#[derive(Debug, Default)]
pub struct Circuit {
    nodes: Vec<Node>,
    view_tags: Vec<Option<SmolStr>>,
    current_view: Option<SmolStr>,
    declared_sources: FastHashSet<SmolStr>,
    topo: Vec<NodeId>,
    built: bool,
}

impl Circuit {
    pub fn new() -> Self {
        Circuit::default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Register a source name so `Source` nodes can reference it.
    pub fn declare_source(&mut self, table: impl Into<SmolStr>) {
        self.declared_sources.insert(table.into());
    }

    /// Nodes added until `end_view` belong to the named view subgraph.
    pub fn begin_view(&mut self, view: impl Into<SmolStr>) {
        self.current_view = Some(view.into());
    }

    pub fn end_view(&mut self) {
        self.current_view = None;
    }

    fn push(&mut self, node: Node) -> NodeId {
        for input in node.inputs() {
            assert!(input < self.nodes.len(), "node wired to unknown input");
        }
        let id = self.nodes.len();
        self.nodes.push(node);
        self.view_tags.push(self.current_view.clone());
        self.built = false;
        id
    }

    pub fn add_source(&mut self, table: impl Into<SmolStr>) -> NodeId {
        self.push(Node::Source {
            table: table.into(),
        })
    }

    pub fn add_filter(&mut self, input: NodeId, predicate: ScalarExpr) -> NodeId {
        self.push(Node::Filter { input, predicate })
    }

    pub fn add_project(&mut self, input: NodeId, exprs: Vec<ScalarExpr>) -> NodeId {
        self.push(Node::Project { input, exprs })
    }

    pub fn add_union(&mut self, inputs: Vec<NodeId>) -> NodeId {
        self.push(Node::Union { inputs })
    }

    pub fn add_negate(&mut self, input: NodeId) -> NodeId {
        self.push(Node::Negate { input })
    }

    pub fn add_distinct(&mut self, input: NodeId) -> NodeId {
        self.push(Node::Distinct {
            input,
            state: DistinctState::new(),
        })
    }

    pub fn add_set_op(&mut self, left: NodeId, right: NodeId, state: SetOpState) -> NodeId {
        self.push(Node::SetOp { left, right, state })
    }

    pub fn add_join(
        &mut self,
        left: NodeId,
        right: NodeId,
        left_key: Vec<ScalarExpr>,
        right_key: Vec<ScalarExpr>,
        state: JoinState,
    ) -> NodeId {
        self.push(Node::Join {
            left,
            right,
            left_key,
            right_key,
            state,
        })
    }

    pub fn add_semi_join(
        &mut self,
        left: NodeId,
        right: NodeId,
        left_key: Vec<ScalarExpr>,
        right_key: Vec<ScalarExpr>,
        anti: bool,
    ) -> NodeId {
        self.push(Node::SemiJoin {
            left,
            right,
            left_key,
            right_key,
            state: SemiJoinState::new(anti),
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_asof_join(
        &mut self,
        left: NodeId,
        right: NodeId,
        left_key: Vec<ScalarExpr>,
        right_key: Vec<ScalarExpr>,
        left_ts: ScalarExpr,
        right_ts: ScalarExpr,
        state: AsofJoinState,
    ) -> NodeId {
        self.push(Node::AsofJoin {
            left,
            right,
            left_key,
            right_key,
            left_ts,
            right_ts,
            state,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_pruned_join(
        &mut self,
        left: NodeId,
        right: NodeId,
        left_key: Vec<ScalarExpr>,
        right_key: Vec<ScalarExpr>,
        left_ts: ScalarExpr,
        right_ts: ScalarExpr,
        state: PrunedJoinState,
    ) -> NodeId {
        self.push(Node::PrunedJoin {
            left,
            right,
            left_key,
            right_key,
            left_ts,
            right_ts,
            state,
        })
    }

    pub fn add_aggregate(
        &mut self,
        input: NodeId,
        group: Vec<ScalarExpr>,
        aggs: Vec<AggSpec>,
    ) -> NodeId {
        self.push(Node::Aggregate {
            input,
            group,
            aggs,
            state: AggregateState::new(),
        })
    }

    pub fn add_window(&mut self, input: NodeId, spec: WindowSpec) -> NodeId {
        self.push(Node::Window {
            input,
            spec,
            state: PartitionedWindowState::new(),
        })
    }

    pub fn add_topk(&mut self, input: NodeId, state: TopKState) -> NodeId {
        self.push(Node::TopK { input, state })
    }

    pub fn add_integrate(&mut self, input: NodeId) -> NodeId {
        self.push(Node::Integrate {
            input,
            state: ZSet::new(),
        })
    }

    pub fn add_differentiate(&mut self, input: NodeId) -> NodeId {
        self.push(Node::Differentiate {
            input,
            prev: ZSet::new(),
        })
    }

    pub fn add_delay(&mut self, input: NodeId) -> NodeId {
        self.push(Node::Delay {
            input,
            prev: ZSet::new(),
        })
    }

    pub fn add_sink(&mut self, input: NodeId, view: impl Into<SmolStr>) -> NodeId {
        self.push(Node::Sink {
            input,
            view: view.into(),
        })
    }

    /// Re-point one input edge; the escape hatch for wiring feedback
    /// through a delay.
    pub fn rewire(&mut self, node: NodeId, input_index: usize, new_input: NodeId) {
        assert!(new_input < self.nodes.len());
        self.built = false;
        match &mut self.nodes[node] {
            Node::Filter { input, .. }
            | Node::Project { input, .. }
            | Node::Negate { input }
            | Node::Distinct { input, .. }
            | Node::Aggregate { input, .. }
            | Node::Window { input, .. }
            | Node::TopK { input, .. }
            | Node::Integrate { input, .. }
            | Node::Differentiate { input, .. }
            | Node::Delay { input, .. }
            | Node::Sink { input, .. } => {
                assert_eq!(input_index, 0);
                *input = new_input;
            }
            Node::Union { inputs } => inputs[input_index] = new_input,
            Node::SetOp { left, right, .. }
            | Node::Join { left, right, .. }
            | Node::SemiJoin { left, right, .. }
            | Node::AsofJoin { left, right, .. }
            | Node::PrunedJoin { left, right, .. } => {
                if input_index == 0 {
                    *left = new_input;
                } else {
                    *right = new_input;
                }
            }
            Node::Source { .. } => panic!("sources have no inputs"),
        }
    }

    /// Validate the graph and fix the evaluation order. Delay nodes
    /// count as sources (their output is last step's value), so a cycle
    /// is legal exactly when it passes through a delay.
    pub fn build(&mut self) -> Result<()> {
        for node in &self.nodes {
            if let Node::Source { table } = node {
                if !self.declared_sources.contains(table) {
                    return Err(Error::build(format!(
                        "reference to undeclared source {:?}",
                        table
                    )));
                }
            }
        }

        let n = self.nodes.len();
        let mut indegree = vec![0usize; n];
        let mut dependents: Vec<Vec<NodeId>> = vec![Vec::new(); n];
        for (id, node) in self.nodes.iter().enumerate() {
            if matches!(node, Node::Delay { .. }) {
                continue;
            }
            for input in node.inputs() {
                indegree[id] += 1;
                dependents[input].push(id);
            }
        }

        let mut queue: VecDeque<NodeId> =
            (0..n).filter(|&id| indegree[id] == 0).collect();
        let mut topo = Vec::with_capacity(n);
        while let Some(id) = queue.pop_front() {
            topo.push(id);
            for &dep in &dependents[id] {
                indegree[dep] -= 1;
                if indegree[dep] == 0 {
                    queue.push_back(dep);
                }
            }
        }
        if topo.len() != n {
            return Err(Error::build("cycle without a delay node"));
        }
        self.topo = topo;
        self.built = true;
        Ok(())
    }

    /// Latched overflow flag of any join inside the given view's
    /// subgraph.
    pub fn view_overflowed(&self, view: &str) -> bool {
        self.nodes
            .iter()
            .zip(self.view_tags.iter())
            .any(|(node, tag)| {
                tag.as_deref() == Some(view)
                    && matches!(node, Node::Join { state, .. } if state.overflow())
            })
    }

    /// Run one step. `inputs` maps source names to their deltas;
    /// `target` restricts delivery to one view's subgraph (used for
    /// backfilling newly created views).
    pub fn step(
        &mut self,
        inputs: &FastMap<SmolStr, ZSet>,
        target: Option<&str>,
    ) -> Result<FastMap<SmolStr, ZSet>> {
        if !self.built {
            self.build()?;
        }
        crate::debug_log!(
            "step: {} source deltas through {} nodes",
            inputs.len(),
            self.nodes.len()
        );

        let mut values: Vec<Option<ZSet>> = (0..self.nodes.len()).map(|_| None).collect();
        let mut pendings: Vec<(NodeId, Pending)> = Vec::new();
        let mut outputs: FastMap<SmolStr, ZSet> = FastMap::default();

        for idx in 0..self.topo.len() {
            let id = self.topo[idx];
            let (out, pending) = self.eval_node(id, &values, inputs, target)?;
            if let Some(pending) = pending {
                pendings.push((id, pending));
            }
            if let Node::Sink { view, .. } = &self.nodes[id] {
                outputs.insert(view.clone(), out.clone());
            }
            values[id] = Some(out);
        }

        // Commit phase: infallible.
        for (id, pending) in pendings {
            self.commit_node(id, pending);
        }
        for id in 0..self.nodes.len() {
            let delay_input = match &self.nodes[id] {
                Node::Delay { input, .. } => *input,
                _ => continue,
            };
            let next = values[delay_input].clone().unwrap_or_default();
            if let Node::Delay { prev, .. } = &mut self.nodes[id] {
                *prev = next;
            }
        }

        Ok(outputs)
    }

    fn eval_node(
        &self,
        id: NodeId,
        values: &[Option<ZSet>],
        inputs: &FastMap<SmolStr, ZSet>,
        target: Option<&str>,
    ) -> Result<(ZSet, Option<Pending>)> {
        let value = |nid: NodeId| values[nid].as_ref().unwrap_or_else(|| empty_zset());

        match &self.nodes[id] {
            Node::Source { table } => {
                let routed = match target {
                    Some(view) => self.view_tags[id].as_deref() == Some(view),
                    None => true,
                };
                let out = if routed {
                    inputs.get(table).cloned().unwrap_or_default()
                } else {
                    ZSet::new()
                };
                Ok((out, None))
            }
            Node::Filter { input, predicate } => {
                Ok((value(*input).filter(|row| eval_predicate(predicate, row)), None))
            }
            Node::Project { input, exprs } => {
                Ok((value(*input).map(|row| eval_projection(exprs, row)), None))
            }
            Node::Union { inputs: srcs } => {
                let mut out = ZSet::new();
                for src in srcs {
                    out.add_assign(value(*src));
                }
                Ok((out, None))
            }
            Node::Negate { input } => Ok((value(*input).neg(), None)),
            Node::Distinct { input, state } => {
                let (out, pending) = state.eval(value(*input))?;
                Ok((out, Some(Pending::Distinct(pending))))
            }
            Node::SetOp {
                left, right, state, ..
            } => {
                let (out, pending) = state.eval(value(*left), value(*right))?;
                Ok((out, Some(Pending::SetOp(pending))))
            }
            Node::Join {
                left,
                right,
                left_key,
                right_key,
                state,
            } => {
                let dl = keyed_delta(value(*left), left_key);
                let dr = keyed_delta(value(*right), right_key);
                let (out, pending) = state.eval(&dl, &dr)?;
                Ok((out, Some(Pending::Join(pending))))
            }
            Node::SemiJoin {
                left,
                right,
                left_key,
                right_key,
                state,
            } => {
                let mut dl = IndexedZSet::new();
                let mut null_keyed = ZSet::new();
                for (row, w) in value(*left).entries() {
                    match eval_key(left_key, row) {
                        Some(k) => dl.insert(k, row.clone(), w),
                        // NULL keys never match: anti keeps them
                        // unconditionally, semi drops them.
                        None => {
                            if state.is_anti() {
                                null_keyed.insert(row.clone(), w);
                            }
                        }
                    }
                }
                let mut dr: FastMap<Row, Weight> = FastMap::default();
                for (row, w) in value(*right).entries() {
                    if let Some(k) = eval_key(right_key, row) {
                        *dr.entry(k).or_insert(0) += w;
                    }
                }
                dr.retain(|_, w| *w != 0);
                let (mut out, pending) = state.eval(&dl, &dr)?;
                out.add_assign(&null_keyed);
                Ok((out, Some(Pending::SemiJoin(pending))))
            }
            Node::AsofJoin {
                left,
                right,
                left_key,
                right_key,
                left_ts,
                right_ts,
                state,
            } => {
                let dl: AsofDelta = timestamped_delta(value(*left), left_key, left_ts);
                let dr: AsofDelta = timestamped_delta(value(*right), right_key, right_ts);
                let (out, pending) = state.eval(&dl, &dr)?;
                Ok((out, Some(Pending::Asof(pending))))
            }
            Node::PrunedJoin {
                left,
                right,
                left_key,
                right_key,
                left_ts,
                right_ts,
                state,
            } => {
                let dl = timestamped_delta(value(*left), left_key, left_ts);
                let dr = timestamped_delta(value(*right), right_key, right_ts);
                let (out, pending) = state.eval(&dl, &dr)?;
                Ok((out, Some(Pending::Pruned(pending))))
            }
            Node::Aggregate {
                input,
                group,
                aggs,
                state,
            } => {
                let mut grouped: FastMap<Row, Vec<(Row, Weight)>> = FastMap::default();
                for (row, w) in value(*input).entries() {
                    let key = eval_projection(group, row);
                    grouped.entry(key).or_default().push((row.clone(), w));
                }
                let (out, pending) = state.eval(aggs, &grouped)?;
                Ok((out, Some(Pending::Aggregate(pending))))
            }
            Node::Window { input, spec, state } => {
                let (out, pending) = state.eval(spec, value(*input))?;
                Ok((out, Some(Pending::Window(pending))))
            }
            Node::TopK { input, state } => {
                let (out, pending) = state.eval(value(*input))?;
                Ok((out, Some(Pending::TopK(pending))))
            }
            Node::Integrate { input, state } => {
                let delta = value(*input);
                Ok((state.add(delta), Some(Pending::Integrate(delta.clone()))))
            }
            Node::Differentiate { input, prev } => {
                let current = value(*input);
                Ok((
                    current.sub(prev),
                    Some(Pending::Differentiate(current.clone())),
                ))
            }
            Node::Delay { prev, .. } => Ok((prev.clone(), None)),
            Node::Sink { input, .. } => Ok((value(*input).clone(), None)),
        }
    }

    fn commit_node(&mut self, id: NodeId, pending: Pending) {
        match (&mut self.nodes[id], pending) {
            (Node::Distinct { state, .. }, Pending::Distinct(p)) => state.commit(p),
            (Node::SetOp { state, .. }, Pending::SetOp(p)) => state.commit(p),
            (Node::Join { state, .. }, Pending::Join(p)) => state.commit(p),
            (Node::SemiJoin { state, .. }, Pending::SemiJoin(p)) => state.commit(p),
            (Node::AsofJoin { state, .. }, Pending::Asof(p)) => state.commit(p),
            (Node::PrunedJoin { state, .. }, Pending::Pruned(p)) => state.commit(p),
            (Node::Aggregate { state, .. }, Pending::Aggregate(p)) => state.commit(p),
            (Node::Window { spec, state, .. }, Pending::Window(p)) => state.commit(spec, p),
            (Node::TopK { state, .. }, Pending::TopK(p)) => state.commit(p),
            (Node::Integrate { state, .. }, Pending::Integrate(delta)) => {
                state.add_assign(&delta);
            }
            (Node::Differentiate { prev, .. }, Pending::Differentiate(current)) => {
                *prev = current;
            }
            _ => unreachable!("pending/state mismatch"),
        }
    }
}
