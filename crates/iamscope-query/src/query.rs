//! Point queries over a shared immutable graph.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use serde_json::Value;

use iamscope_analyze::{paths, PathAnalyzer};
use iamscope_core::config::IamscopeConfig;
use iamscope_core::types::{AttackPath, EdgeKind};
use iamscope_graph::{synthesis, IamGraph};

/// Read-only query engine. Multiple instances may share one graph.
pub struct GraphQuery<'a> {
    graph: &'a IamGraph,
    analyzer: PathAnalyzer,
}

impl<'a> GraphQuery<'a> {
    pub fn new(graph: &'a IamGraph, config: IamscopeConfig) -> Self {
        Self {
            graph,
            analyzer: PathAnalyzer::new(config),
        }
    }

    pub fn graph(&self) -> &IamGraph {
        self.graph
    }

    pub fn analyzer(&self) -> &PathAnalyzer {
        &self.analyzer
    }

    /// Single shortest (fewest edges) directed path, or `None` when either
    /// endpoint is missing or unreachable.
    pub fn find_shortest_path(&self, source_id: &str, target_id: &str) -> Option<AttackPath> {
        let source = self.graph.index_of(source_id)?;
        let target = self.graph.index_of(target_id)?;
        let walk = paths::shortest_path(self.graph, source, target)?;
        self.analyzer.build_walk_path(self.graph, &walk)
    }

    /// All simple paths up to `max_length` edges (defaults to the
    /// configured `analysis.max_path_length`).
    pub fn find_all_paths(
        &self,
        source_id: &str,
        target_id: &str,
        max_length: Option<usize>,
    ) -> Vec<AttackPath> {
        let (Some(source), Some(target)) =
            (self.graph.index_of(source_id), self.graph.index_of(target_id))
        else {
            return Vec::new();
        };
        let max_edges =
            max_length.unwrap_or(self.analyzer.config().analysis.max_path_length);

        paths::all_paths_between(self.graph, source, target, max_edges)
            .iter()
            .filter_map(|walk| self.analyzer.build_walk_path(self.graph, walk))
            .collect()
    }

    /// Resolve the permission set a node holds, per resource.
    ///
    /// Walks `member_of` chains to collect every group the node belongs to,
    /// gathers `has_role` bindings from the whole closure, and expands each
    /// role through the permissions its role node declares.
    pub fn get_node_permissions(&self, node_id: &str) -> BTreeMap<String, BTreeSet<String>> {
        let mut permissions: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let Some(start) = self.graph.index_of(node_id) else {
            return permissions;
        };

        // Membership closure.
        let mut closure = vec![start];
        let mut seen: HashSet<usize> = closure.iter().copied().collect();
        let mut frontier = vec![start];
        while let Some(node) = frontier.pop() {
            for edge in self.graph.out_edges(node) {
                if edge.kind == EdgeKind::MemberOf && seen.insert(edge.target) {
                    closure.push(edge.target);
                    frontier.push(edge.target);
                }
            }
        }

        for holder in closure {
            for edge in self.graph.out_edges(holder) {
                if edge.kind != EdgeKind::HasRole {
                    continue;
                }
                let Some(resource) = edge.properties.get("resource").and_then(Value::as_str)
                else {
                    continue;
                };
                let entry = permissions.entry(resource.to_string()).or_default();
                let role_node = self.graph.node(edge.target);
                if let Some(perms) = role_node
                    .properties
                    .get("includedPermissions")
                    .and_then(Value::as_array)
                {
                    entry.extend(perms.iter().filter_map(Value::as_str).map(String::from));
                }
            }
        }

        permissions
    }

    /// Whether any directed path from the principal ends at the resource.
    pub fn can_access_resource(&self, principal_id: &str, resource_id: &str) -> bool {
        let (Some(source), Some(target)) = (
            self.graph.index_of(principal_id),
            self.graph.index_of(resource_id),
        ) else {
            return false;
        };
        if source == target {
            return false;
        }

        let mut visited = HashSet::new();
        visited.insert(source);
        let mut queue = VecDeque::new();
        queue.push_back(source);

        while let Some(node) = queue.pop_front() {
            for edge in self.graph.out_edges(node) {
                if edge.target == target {
                    return true;
                }
                if visited.insert(edge.target) {
                    queue.push_back(edge.target);
                }
            }
        }
        false
    }

    /// Map a user-supplied identity string onto a node id present in the
    /// graph (`user:alice@ex.com`, `serviceAccount:x@...`, or a bare email).
    pub fn resolve_identity(&self, raw: &str) -> Option<String> {
        if self.graph.contains(raw) {
            return Some(raw.to_string());
        }
        if let Some(email) = raw.strip_prefix("serviceAccount:") {
            let id = format!("sa:{email}");
            return self.graph.contains(&id).then_some(id);
        }
        if raw.contains('@') && !raw.contains(':') {
            for prefix in ["user", "sa", "group"] {
                let id = format!("{prefix}:{raw}");
                if self.graph.contains(&id) {
                    return Some(id);
                }
            }
        }
        None
    }

    /// Map a resource string (`projects/p`, `project:p`, a service-account
    /// path) onto a node id present in the graph.
    pub fn resolve_resource(&self, raw: &str) -> Option<String> {
        if self.graph.contains(raw) {
            return Some(raw.to_string());
        }
        let candidate = synthesis::resource_node_id(raw)?;
        self.graph.contains(&candidate).then_some(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iamscope_core::types::{Node, NodeKind};
    use serde_json::{json, Map};

    fn props(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    /// alice → admins → roles/owner on projects/p, plus the synthesized
    /// can_assign_custom_role edge the builder would emit.
    fn group_graph() -> IamGraph {
        let mut g = IamGraph::new();
        g.add_node(Node::new("user:alice@ex.com", NodeKind::User, "alice@ex.com"));
        g.add_node(Node::new("group:admins@ex.com", NodeKind::Group, "admins@ex.com"));
        g.add_node(Node::new("project:p", NodeKind::Project, "projects/p"));
        let mut owner = Node::new("role:roles/owner", NodeKind::Role, "roles/owner");
        owner.properties.insert(
            "includedPermissions".to_string(),
            json!([
                "resourcemanager.projects.get",
                "resourcemanager.projects.setIamPolicy",
                "iam.serviceAccounts.actAs"
            ]),
        );
        g.add_node(owner);

        g.upsert_edge("user:alice@ex.com", "group:admins@ex.com", EdgeKind::MemberOf, Map::new());
        g.upsert_edge(
            "group:admins@ex.com",
            "role:roles/owner",
            EdgeKind::HasRole,
            props(json!({"role": "roles/owner", "resource": "projects/p"})),
        );
        g.upsert_edge(
            "group:admins@ex.com",
            "project:p",
            EdgeKind::CanAssignCustomRole,
            props(json!({"via_role": "roles/owner", "resource": "projects/p"})),
        );
        g
    }

    #[test]
    fn permissions_expand_through_groups() {
        let g = group_graph();
        let q = GraphQuery::new(&g, IamscopeConfig::default());

        let perms = q.get_node_permissions("user:alice@ex.com");
        let on_p = perms.get("projects/p").expect("projects/p entry");
        assert!(on_p.contains("resourcemanager.projects.setIamPolicy"));
        assert!(on_p.contains("iam.serviceAccounts.actAs"));
        assert_eq!(on_p.len(), 3);
    }

    #[test]
    fn permissions_missing_node_empty() {
        let g = group_graph();
        let q = GraphQuery::new(&g, IamscopeConfig::default());
        assert!(q.get_node_permissions("user:ghost@ex.com").is_empty());
    }

    #[test]
    fn reachability_through_group_chain() {
        let g = group_graph();
        let q = GraphQuery::new(&g, IamscopeConfig::default());
        assert!(q.can_access_resource("user:alice@ex.com", "project:p"));
        assert!(!q.can_access_resource("project:p", "user:alice@ex.com"));
        assert!(!q.can_access_resource("user:ghost@ex.com", "project:p"));
    }

    #[test]
    fn shortest_path_and_all_paths() {
        let g = group_graph();
        let q = GraphQuery::new(&g, IamscopeConfig::default());

        let shortest = q
            .find_shortest_path("user:alice@ex.com", "project:p")
            .expect("path exists");
        assert_eq!(shortest.len(), 2);
        assert_eq!(shortest.path_nodes[1].id, "group:admins@ex.com");

        let all = q.find_all_paths("user:alice@ex.com", "project:p", None);
        assert_eq!(all.len(), 1);

        // Too tight a bound prunes the path.
        assert!(q.find_all_paths("user:alice@ex.com", "project:p", Some(1)).is_empty());

        // Missing endpoints yield empty results, never errors.
        assert!(q.find_shortest_path("user:alice@ex.com", "project:ghost").is_none());
        assert!(q.find_all_paths("user:ghost@ex.com", "project:p", None).is_empty());
    }

    #[test]
    fn identity_and_resource_resolution() {
        let g = group_graph();
        let q = GraphQuery::new(&g, IamscopeConfig::default());

        assert_eq!(
            q.resolve_identity("user:alice@ex.com").as_deref(),
            Some("user:alice@ex.com")
        );
        assert_eq!(
            q.resolve_identity("alice@ex.com").as_deref(),
            Some("user:alice@ex.com")
        );
        assert!(q.resolve_identity("nobody@ex.com").is_none());

        assert_eq!(q.resolve_resource("projects/p").as_deref(), Some("project:p"));
        assert_eq!(q.resolve_resource("project:p").as_deref(), Some("project:p"));
        assert!(q.resolve_resource("projects/ghost").is_none());
    }
}
