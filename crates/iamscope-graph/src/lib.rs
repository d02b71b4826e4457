//! iamscope-graph: Collected-data ingestion and graph construction.
//!
//! Consumes the JSON collected-data document produced by the cloud
//! collectors, builds an in-memory directed property graph of the tenant's
//! IAM surface, and synthesizes derived escalation edges from role and
//! permission knowledge. The built graph is treated as immutable by
//! downstream analysis; the what-if engine clones it before mutating.

pub mod builder;
pub mod document;
pub mod export;
pub mod graph;
pub mod synthesis;

pub use builder::GraphBuilder;
pub use document::CollectedData;
pub use export::{ExportError, GraphExport};
pub use graph::{GraphEdge, IamGraph};
