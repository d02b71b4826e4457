//! iamscope-query: Point queries and what-if simulation.
//!
//! Queries read a shared immutable graph; the simulation engine clones the
//! graph, applies a hypothetical binding change, re-derives escalation
//! edges, re-analyzes, and reports the delta in reachable attack paths.

pub mod error;
pub mod query;
pub mod simulate;

pub use error::QueryError;
pub use query::GraphQuery;
pub use simulate::{BindingAction, SimulationResult, Simulator};
