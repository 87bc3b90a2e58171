pub mod datetime;
pub mod row;
pub mod value;
pub mod zset;

pub use row::{ColumnDef, ColumnType, Row, Schema};
pub use value::Value;
pub use zset::{FastHashSet, FastMap, IndexedZSet, Weight, ZSet};
