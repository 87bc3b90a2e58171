pub mod aggregate;
pub mod asof;
pub mod distinct;
pub mod join;
pub mod pruned;
pub mod semijoin;
pub mod topk;
pub mod window;

pub use aggregate::{AggKind, AggSpec, AggregateState};
pub use asof::{AsofDirection, AsofJoinState};
pub use distinct::{DistinctState, SetOpKind, SetOpState};
pub use join::{JoinState, DEFAULT_MAX_RESULTS};
pub use pruned::{PruneStats, PrunedJoinState};
pub use semijoin::SemiJoinState;
pub use topk::TopKState;
pub use window::{
    MonotonicDeque, PartitionedWindowState, RingAggregate, WindowAggKind, WindowFunc, WindowSpec,
};
