//! rillflow: an in-process incremental view maintenance engine.
//!
//! Base relations change by deltas; materialized SQL views update in
//! time proportional to the delta and the local index sizes, never by
//! rescanning whole relations. The core is a Z-set algebra, a circuit
//! of incremental operators, and a SQL-to-circuit compiler; everything
//! runs single-threaded and in memory.
//!
//! ```
//! use rillflow::{Engine, SourceBatch};
//! use serde_json::json;
//!
//! let mut engine = Engine::new();
//! engine
//!     .execute(
//!         "CREATE TABLE orders (id INT PRIMARY KEY, status TEXT);
//!          CREATE VIEW pending AS SELECT * FROM orders WHERE status = 'pending';",
//!     )
//!     .unwrap();
//!
//! let updates = engine
//!     .push(
//!         "orders",
//!         SourceBatch::new()
//!             .insert(json!({"id": 1, "status": "pending"}))
//!             .insert(json!({"id": 2, "status": "shipped"})),
//!     )
//!     .unwrap();
//! assert_eq!(updates.len(), 1);
//! assert_eq!(engine.materialize("pending").unwrap().len(), 1);
//! ```

pub mod engine;
pub mod error;
pub mod logging;
pub mod sql;

pub use engine::circuit::{Circuit, NodeId};
pub use engine::source::{SourceBatch, TableDef};
pub use engine::types::{
    ColumnDef, ColumnType, FastHashSet, FastMap, IndexedZSet, Row, Schema, Value, Weight, ZSet,
};
pub use engine::update::ViewUpdate;
pub use engine::{Engine, JoinMode, ViewOptions};
pub use error::{Error, Result};
