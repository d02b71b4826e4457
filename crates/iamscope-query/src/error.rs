//! Error types for the iamscope-query crate.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Node not found in graph: {node_id}")]
    NodeNotFound { node_id: String },

    #[error("Unrecognized identity or resource: {value}")]
    Unresolvable { value: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, QueryError>;
