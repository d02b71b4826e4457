//! Graph JSON export and reimport.
//!
//! The export carries the full node and edge sets plus per-kind counts, so
//! external renderers and a later `iamscope` invocation can reconstruct the
//! graph without the original snapshot.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::info;

use iamscope_core::types::{Edge, EdgeKind, GraphMetadata, Node};

use crate::graph::IamGraph;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Serialized graph: `{ nodes, edges, metadata }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphExport {
    pub nodes: Vec<Node>,
    pub edges: Vec<ExportEdge>,
    pub metadata: ExportMetadata,
}

/// One serialized edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportEdge {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub kind: EdgeKind,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl From<Edge> for ExportEdge {
    fn from(edge: Edge) -> Self {
        Self {
            source: edge.source_id,
            target: edge.target_id,
            kind: edge.kind,
            properties: edge.properties,
        }
    }
}

/// Export-level totals and per-kind counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportMetadata {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub node_types: BTreeMap<String, usize>,
    pub edge_types: BTreeMap<String, usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_fingerprint: Option<String>,
}

impl GraphExport {
    pub fn from_graph(graph: &IamGraph) -> Self {
        let nodes: Vec<Node> = graph.nodes().to_vec();
        let edges: Vec<ExportEdge> = graph
            .edges()
            .map(|(src, _, e)| graph.materialize_edge(src, e).into())
            .collect();

        let mut node_types = BTreeMap::new();
        for node in &nodes {
            *node_types.entry(node.kind.as_str().to_string()).or_insert(0) += 1;
        }
        let mut edge_types = BTreeMap::new();
        for edge in &edges {
            *edge_types.entry(edge.kind.as_str().to_string()).or_insert(0) += 1;
        }

        let meta: &GraphMetadata = graph.metadata();
        Self {
            metadata: ExportMetadata {
                total_nodes: nodes.len(),
                total_edges: edges.len(),
                node_types,
                edge_types,
                collection_time: meta.collection_time.clone(),
                snapshot_fingerprint: meta.snapshot_fingerprint.clone(),
            },
            nodes,
            edges,
        }
    }

    /// Rebuild the in-memory graph from an export.
    pub fn into_graph(self) -> IamGraph {
        let mut graph = IamGraph::new();
        for node in self.nodes {
            graph.add_node(node);
        }
        for edge in self.edges {
            graph.upsert_edge(&edge.source, &edge.target, edge.kind, edge.properties);
        }
        graph.recompute_metadata();
        graph.metadata_mut().collection_time = self.metadata.collection_time;
        graph.metadata_mut().snapshot_fingerprint = self.metadata.snapshot_fingerprint;
        graph
    }

    pub fn to_json(&self) -> Result<String, ExportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, ExportError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ExportError> {
        let path = path.as_ref();
        std::fs::write(path, self.to_json()?)?;
        info!(path = %path.display(), nodes = self.nodes.len(), edges = self.edges.len(), "exported graph");
        Ok(())
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ExportError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }
}
