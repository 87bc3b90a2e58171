//! SQL compiler: lex/parse (nom) → plan → emit into the circuit.

pub mod ast;
pub mod emitter;
pub mod parser;
pub mod planner;

pub use parser::{parse_query, parse_script};
pub use planner::{plan_view, ViewPlan};
