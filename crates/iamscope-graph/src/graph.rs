//! In-memory IAM property graph.
//!
//! Arena-backed representation: nodes live in a `Vec` with a string-id
//! index; edges live in per-node out-adjacency lists with back-references
//! for predecessor lookups. Edge identity is `(source, target, kind)`;
//! writing an existing triple replaces its properties.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::warn;

use iamscope_core::types::{Edge, EdgeKind, GraphMetadata, Node, NodeKind};

/// An edge stored in the out-adjacency list of its source node.
#[derive(Debug, Clone)]
pub struct GraphEdge {
    /// Dense index of the target node.
    pub target: usize,
    pub kind: EdgeKind,
    pub properties: Map<String, Value>,
}

/// The in-memory IAM graph.
#[derive(Debug, Clone, Default)]
pub struct IamGraph {
    nodes: Vec<Node>,
    node_index: HashMap<String, usize>,
    out_edges: Vec<Vec<GraphEdge>>,
    in_edges: Vec<Vec<(usize, EdgeKind)>>,
    edge_count: usize,
    suppressed_edges: u64,
    metadata: GraphMetadata,
}

impl IamGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Nodes ─────────────────────────────────────────────────────

    /// Insert a node, replacing any existing node with the same id.
    /// Returns the node's dense index.
    pub fn add_node(&mut self, node: Node) -> usize {
        if let Some(&idx) = self.node_index.get(&node.id) {
            self.nodes[idx] = node;
            return idx;
        }
        let idx = self.nodes.len();
        self.node_index.insert(node.id.clone(), idx);
        self.nodes.push(node);
        self.out_edges.push(Vec::new());
        self.in_edges.push(Vec::new());
        idx
    }

    /// Insert a node only if its id is not yet present.
    pub fn ensure_node(&mut self, node: Node) -> usize {
        if let Some(&idx) = self.node_index.get(&node.id) {
            return idx;
        }
        self.add_node(node)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.node_index.contains_key(id)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.node_index.get(id).copied()
    }

    pub fn node(&self, idx: usize) -> &Node {
        &self.nodes[idx]
    }

    pub fn node_by_id(&self, id: &str) -> Option<&Node> {
        self.index_of(id).map(|idx| &self.nodes[idx])
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    // ── Edges ─────────────────────────────────────────────────────

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn out_edges(&self, idx: usize) -> &[GraphEdge] {
        &self.out_edges[idx]
    }

    /// Predecessor back-references: `(source index, edge kind)` pairs.
    pub fn in_edges(&self, idx: usize) -> &[(usize, EdgeKind)] {
        &self.in_edges[idx]
    }

    /// Iterate every edge as `(source index, position, edge)`.
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize, &GraphEdge)> {
        self.out_edges
            .iter()
            .enumerate()
            .flat_map(|(src, edges)| edges.iter().enumerate().map(move |(pos, e)| (src, pos, e)))
    }

    /// Insert or update an edge by node id. Edges referencing an id that was
    /// never created are suppressed and counted rather than panicking.
    pub fn upsert_edge(
        &mut self,
        source_id: &str,
        target_id: &str,
        kind: EdgeKind,
        properties: Map<String, Value>,
    ) -> bool {
        match (self.index_of(source_id), self.index_of(target_id)) {
            (Some(src), Some(tgt)) => {
                self.upsert_edge_idx(src, tgt, kind, properties);
                true
            }
            _ => {
                warn!(source = source_id, target = target_id, kind = %kind, "suppressing edge with unknown endpoint");
                self.suppressed_edges += 1;
                self.metadata.suppressed_edges = self.suppressed_edges;
                false
            }
        }
    }

    /// Insert or update an edge by dense index. The later write wins on
    /// properties for an existing `(source, target, kind)` triple.
    pub fn upsert_edge_idx(
        &mut self,
        src: usize,
        tgt: usize,
        kind: EdgeKind,
        properties: Map<String, Value>,
    ) {
        if let Some(existing) = self.out_edges[src]
            .iter_mut()
            .find(|e| e.target == tgt && e.kind == kind)
        {
            existing.properties = properties;
            return;
        }
        self.out_edges[src].push(GraphEdge {
            target: tgt,
            kind,
            properties,
        });
        self.in_edges[tgt].push((src, kind));
        self.edge_count += 1;
    }

    /// Remove one edge by its identity triple. Returns whether it existed.
    pub fn remove_edge(&mut self, source_id: &str, target_id: &str, kind: EdgeKind) -> bool {
        let (Some(src), Some(tgt)) = (self.index_of(source_id), self.index_of(target_id)) else {
            return false;
        };
        let before = self.out_edges[src].len();
        self.out_edges[src].retain(|e| !(e.target == tgt && e.kind == kind));
        if self.out_edges[src].len() == before {
            return false;
        }
        self.in_edges[tgt].retain(|&(s, k)| !(s == src && k == kind));
        self.edge_count -= 1;
        true
    }

    /// Drop every edge whose kind is in `kinds`, rebuilding back-references.
    pub fn remove_edges_of_kinds(&mut self, kinds: &[EdgeKind]) {
        for edges in &mut self.out_edges {
            edges.retain(|e| !kinds.contains(&e.kind));
        }
        self.rebuild_in_edges();
    }

    fn rebuild_in_edges(&mut self) {
        let mut count = 0;
        let mut incoming: Vec<Vec<(usize, EdgeKind)>> = vec![Vec::new(); self.nodes.len()];
        for (src, edges) in self.out_edges.iter().enumerate() {
            for e in edges {
                incoming[e.target].push((src, e.kind));
                count += 1;
            }
        }
        self.in_edges = incoming;
        self.edge_count = count;
    }

    /// First edge between two nodes, preferring escalation kinds.
    pub fn edge_between(&self, src: usize, tgt: usize) -> Option<&GraphEdge> {
        let candidates = self.out_edges[src].iter().filter(|e| e.target == tgt);
        candidates.max_by_key(|e| e.kind.is_escalation())
    }

    /// Look up one edge by its identity triple.
    pub fn find_edge(&self, source_id: &str, target_id: &str, kind: EdgeKind) -> Option<&GraphEdge> {
        let src = self.index_of(source_id)?;
        let tgt = self.index_of(target_id)?;
        self.out_edges[src]
            .iter()
            .find(|e| e.target == tgt && e.kind == kind)
    }

    /// Materialize a stored edge into the shared wire type.
    pub fn materialize_edge(&self, src: usize, edge: &GraphEdge) -> Edge {
        Edge::with_properties(
            self.nodes[src].id.clone(),
            self.nodes[edge.target].id.clone(),
            edge.kind,
            edge.properties.clone(),
        )
    }

    pub fn suppressed_edges(&self) -> u64 {
        self.suppressed_edges
    }

    // ── Metadata ──────────────────────────────────────────────────

    pub fn metadata(&self) -> &GraphMetadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut GraphMetadata {
        &mut self.metadata
    }

    /// Recount totals, per-kind tallies, projects, and organization.
    /// Collection time and snapshot fingerprint are left as-is.
    pub fn recompute_metadata(&mut self) {
        self.metadata.total_nodes = self.nodes.len();
        self.metadata.total_edges = self.edge_count;
        self.metadata.node_counts.clear();
        self.metadata.edge_counts.clear();
        self.metadata.projects.clear();
        self.metadata.organization = None;

        for node in &self.nodes {
            *self
                .metadata
                .node_counts
                .entry(node.kind.as_str().to_string())
                .or_insert(0) += 1;

            let natural_key = node.id.split_once(':').map(|(_, k)| k).unwrap_or(&node.id);
            match node.kind {
                NodeKind::Project => self.metadata.projects.push(natural_key.to_string()),
                NodeKind::Organization if self.metadata.organization.is_none() => {
                    self.metadata.organization = Some(natural_key.to_string());
                }
                _ => {}
            }
        }

        for edges in &self.out_edges {
            for e in edges {
                *self
                    .metadata
                    .edge_counts
                    .entry(e.kind.as_str().to_string())
                    .or_insert(0) += 1;
            }
        }

        self.metadata.suppressed_edges = self.suppressed_edges;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, kind: NodeKind) -> Node {
        let name = id.split_once(':').map(|(_, n)| n).unwrap_or(id).to_string();
        Node::new(id, kind, name)
    }

    fn small_graph() -> IamGraph {
        let mut g = IamGraph::new();
        g.add_node(node("user:alice@ex.com", NodeKind::User));
        g.add_node(node("sa:svc@p.iam.gserviceaccount.com", NodeKind::ServiceAccount));
        g.add_node(node("project:p", NodeKind::Project));
        g
    }

    #[test]
    fn node_index_mapping() {
        let g = small_graph();
        assert_eq!(g.index_of("user:alice@ex.com"), Some(0));
        assert_eq!(g.index_of("project:p"), Some(2));
        assert_eq!(g.index_of("user:nobody@ex.com"), None);
        assert_eq!(g.node_count(), 3);
    }

    #[test]
    fn ensure_node_keeps_existing() {
        let mut g = small_graph();
        let mut richer = node("user:alice@ex.com", NodeKind::User);
        richer
            .properties
            .insert("email".into(), Value::String("alice@ex.com".into()));
        g.add_node(richer);

        let idx = g.ensure_node(node("user:alice@ex.com", NodeKind::User));
        assert_eq!(idx, 0);
        // The property-bearing node survived the ensure call.
        assert!(g.node(0).properties.contains_key("email"));
        assert_eq!(g.node_count(), 3);
    }

    #[test]
    fn upsert_edge_dedupes_triple() {
        let mut g = small_graph();
        let mut props = Map::new();
        props.insert("role".into(), Value::String("roles/viewer".into()));
        assert!(g.upsert_edge(
            "user:alice@ex.com",
            "sa:svc@p.iam.gserviceaccount.com",
            EdgeKind::CanImpersonate,
            props,
        ));

        let mut props2 = Map::new();
        props2.insert("role".into(), Value::String("roles/editor".into()));
        g.upsert_edge(
            "user:alice@ex.com",
            "sa:svc@p.iam.gserviceaccount.com",
            EdgeKind::CanImpersonate,
            props2,
        );

        assert_eq!(g.edge_count(), 1);
        let edge = g
            .find_edge(
                "user:alice@ex.com",
                "sa:svc@p.iam.gserviceaccount.com",
                EdgeKind::CanImpersonate,
            )
            .unwrap();
        // Last write wins.
        assert_eq!(edge.properties.get("role").and_then(Value::as_str), Some("roles/editor"));
    }

    #[test]
    fn distinct_kinds_between_same_pair_coexist() {
        let mut g = small_graph();
        g.upsert_edge(
            "user:alice@ex.com",
            "sa:svc@p.iam.gserviceaccount.com",
            EdgeKind::CanImpersonate,
            Map::new(),
        );
        g.upsert_edge(
            "user:alice@ex.com",
            "sa:svc@p.iam.gserviceaccount.com",
            EdgeKind::CanImpersonateSa,
            Map::new(),
        );
        assert_eq!(g.edge_count(), 2);

        // edge_between prefers the escalation kind; both here are escalation,
        // so any of the two is acceptable.
        let between = g.edge_between(0, 1).unwrap();
        assert!(between.kind.is_escalation());
    }

    #[test]
    fn edge_with_unknown_endpoint_suppressed() {
        let mut g = small_graph();
        let added = g.upsert_edge("user:alice@ex.com", "sa:ghost@x.iam", EdgeKind::CanImpersonate, Map::new());
        assert!(!added);
        assert_eq!(g.edge_count(), 0);
        assert_eq!(g.suppressed_edges(), 1);
    }

    #[test]
    fn remove_edge_updates_backrefs() {
        let mut g = small_graph();
        g.upsert_edge(
            "user:alice@ex.com",
            "project:p",
            EdgeKind::CanAssignCustomRole,
            Map::new(),
        );
        assert_eq!(g.in_edges(2).len(), 1);

        assert!(g.remove_edge("user:alice@ex.com", "project:p", EdgeKind::CanAssignCustomRole));
        assert_eq!(g.edge_count(), 0);
        assert!(g.in_edges(2).is_empty());

        // Removing again reports absence.
        assert!(!g.remove_edge("user:alice@ex.com", "project:p", EdgeKind::CanAssignCustomRole));
    }

    #[test]
    fn remove_edges_of_kinds_rebuilds_counts() {
        let mut g = small_graph();
        g.upsert_edge(
            "user:alice@ex.com",
            "sa:svc@p.iam.gserviceaccount.com",
            EdgeKind::CanImpersonateSa,
            Map::new(),
        );
        g.upsert_edge(
            "user:alice@ex.com",
            "project:p",
            EdgeKind::CanAssignCustomRole,
            Map::new(),
        );
        g.upsert_edge("project:p", "sa:svc@p.iam.gserviceaccount.com", EdgeKind::RunsAs, Map::new());

        g.remove_edges_of_kinds(&[EdgeKind::CanImpersonateSa, EdgeKind::CanAssignCustomRole]);

        assert_eq!(g.edge_count(), 1);
        assert_eq!(g.in_edges(1).len(), 1);
        assert_eq!(g.in_edges(1)[0], (2, EdgeKind::RunsAs));
    }

    #[test]
    fn metadata_recompute() {
        let mut g = small_graph();
        g.add_node(node("org:123", NodeKind::Organization));
        g.upsert_edge("org:123", "project:p", EdgeKind::ParentOf, Map::new());
        g.recompute_metadata();

        let meta = g.metadata();
        assert_eq!(meta.total_nodes, 4);
        assert_eq!(meta.total_edges, 1);
        assert_eq!(meta.node_counts.get("project"), Some(&1));
        assert_eq!(meta.edge_counts.get("parent_of"), Some(&1));
        assert_eq!(meta.projects, vec!["p"]);
        assert_eq!(meta.organization.as_deref(), Some("123"));
    }
}
