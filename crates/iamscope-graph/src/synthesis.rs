//! Derived-escalation edge synthesis.
//!
//! Synthesizes escalation capabilities from observed `has_role` bindings:
//! impersonation over service-account resources, dangerous-role fan-out to
//! every service account in the binding's project scope, and IAM-policy
//! control over the bound resource itself. All rules are pure functions of
//! the graph's `has_role` edges, so the what-if engine can clear and
//! re-derive them on a mutated clone and land on the same graph a full
//! rebuild would produce.

use serde_json::{Map, Value};
use tracing::debug;

use iamscope_core::types::{EdgeKind, Node, NodeKind};

use crate::graph::IamGraph;

/// Dangerous role → derived edge kind. Holding one of these on a project
/// scope yields the corresponding edge to every service account in scope.
const DANGEROUS_ROLE_EDGES: &[(&str, EdgeKind)] = &[
    ("roles/iam.serviceAccountTokenCreator", EdgeKind::CanImpersonateSa),
    ("roles/iam.serviceAccountKeyAdmin", EdgeKind::CanCreateServiceAccountKey),
    ("roles/iam.serviceAccountAdmin", EdgeKind::CanCreateServiceAccountKey),
    ("roles/compute.admin", EdgeKind::CanActAsViaVm),
    ("roles/compute.instanceAdmin", EdgeKind::CanActAsViaVm),
    ("roles/cloudfunctions.admin", EdgeKind::CanDeployFunctionAs),
    ("roles/cloudfunctions.developer", EdgeKind::CanDeployFunctionAs),
    ("roles/run.admin", EdgeKind::CanDeployCloudRunAs),
    ("roles/run.developer", EdgeKind::CanDeployCloudRunAs),
    ("roles/cloudbuild.builds.editor", EdgeKind::CanTriggerBuildAs),
    ("roles/container.admin", EdgeKind::CanDeployGkePodAs),
    ("roles/container.developer", EdgeKind::CanDeployGkePodAs),
];

/// Roles that grant `setIamPolicy` over the resource they are bound to.
const IAM_POLICY_ROLES: &[&str] = &[
    "roles/owner",
    "roles/resourcemanager.projectIamAdmin",
    "roles/resourcemanager.folderAdmin",
    "roles/resourcemanager.organizationAdmin",
    "roles/iam.securityAdmin",
];

/// Permissions that let a principal obtain a service account's identity.
const IMPERSONATION_PERMISSIONS: &[&str] = &[
    "iam.serviceAccounts.actAs",
    "iam.serviceAccounts.getAccessToken",
    "iam.serviceAccounts.implicitDelegation",
    "iam.serviceAccountKeys.create",
];

/// Roles assumed to grant impersonation when the role catalog carries no
/// permission list for them.
const IMPERSONATION_ROLES: &[&str] = &[
    "roles/iam.serviceAccountTokenCreator",
    "roles/iam.serviceAccountUser",
    "roles/iam.serviceAccountKeyAdmin",
    "roles/iam.serviceAccountAdmin",
    "roles/owner",
    "roles/editor",
];

/// Every edge kind this module produces. `resynthesize` clears exactly
/// these before re-deriving.
pub const SYNTHESIZED_KINDS: &[EdgeKind] = &[
    EdgeKind::CanImpersonate,
    EdgeKind::CanImpersonateSa,
    EdgeKind::CanCreateServiceAccountKey,
    EdgeKind::CanActAsViaVm,
    EdgeKind::CanDeployFunctionAs,
    EdgeKind::CanDeployCloudRunAs,
    EdgeKind::CanTriggerBuildAs,
    EdgeKind::CanDeployGkePodAs,
    EdgeKind::CanAssignCustomRole,
];

/// Snapshot of one `has_role` edge.
struct BindingRef {
    holder: usize,
    role: String,
    resource: String,
    condition: Option<Value>,
}

/// Synthesize all derived escalation edges from the graph's `has_role`
/// edges. Self-edges are skipped.
pub fn synthesize(graph: &mut IamGraph) {
    let bindings = collect_bindings(graph);
    let before = graph.edge_count();

    // Impersonation first: it may create service-account nodes that the
    // fan-out pass must see regardless of binding order.
    for binding in &bindings {
        synthesize_impersonation(graph, binding);
    }
    for binding in &bindings {
        synthesize_dangerous_role(graph, binding);
        synthesize_iam_policy_control(graph, binding);
    }

    debug!(
        added = graph.edge_count() - before,
        "synthesized derived escalation edges"
    );
}

/// Clear every synthesized edge and re-derive from the surviving
/// `has_role` edges. Produces a graph identical to a full rebuild on the
/// mutated input.
pub fn resynthesize(graph: &mut IamGraph) {
    graph.remove_edges_of_kinds(SYNTHESIZED_KINDS);
    synthesize(graph);
    graph.recompute_metadata();
}

fn collect_bindings(graph: &IamGraph) -> Vec<BindingRef> {
    graph
        .edges()
        .filter(|(_, _, e)| e.kind == EdgeKind::HasRole)
        .filter_map(|(src, _, e)| {
            let role = e.properties.get("role").and_then(Value::as_str)?;
            let resource = e
                .properties
                .get("resource")
                .and_then(Value::as_str)
                .unwrap_or_default();
            Some(BindingRef {
                holder: src,
                role: role.to_string(),
                resource: resource.to_string(),
                condition: e
                    .properties
                    .get("condition")
                    .filter(|c| !c.is_null())
                    .cloned(),
            })
        })
        .collect()
}

/// Bindings on a service-account resource whose role grants an
/// impersonation permission yield `can_impersonate` holder → SA.
fn synthesize_impersonation(graph: &mut IamGraph, binding: &BindingRef) {
    let Some(sa_email) = service_account_email(&binding.resource) else {
        return;
    };
    if !role_grants_impersonation(graph, &binding.role) {
        return;
    }

    let sa_id = format!("sa:{sa_email}");
    let mut sa_node = Node::new(sa_id.clone(), NodeKind::ServiceAccount, sa_email.clone());
    sa_node
        .properties
        .insert("email".to_string(), Value::String(sa_email));
    let sa_idx = graph.ensure_node(sa_node);

    if sa_idx == binding.holder {
        return;
    }

    let mut props = Map::new();
    props.insert("role".to_string(), Value::String(binding.role.clone()));
    props.insert("resource".to_string(), Value::String(binding.resource.clone()));
    if let Some(condition) = &binding.condition {
        props.insert("condition".to_string(), condition.clone());
    }
    graph.upsert_edge_idx(binding.holder, sa_idx, EdgeKind::CanImpersonate, props);
}

/// Dangerous-role fan-out: one derived edge per service account within the
/// binding's project scope.
fn synthesize_dangerous_role(graph: &mut IamGraph, binding: &BindingRef) {
    let Some(edge_kind) = dangerous_role_edge(&binding.role) else {
        return;
    };
    let Some(project) = project_scope(&binding.resource) else {
        return;
    };

    let marker = format!("@{project}.");
    let targets: Vec<usize> = graph
        .nodes()
        .iter()
        .enumerate()
        .filter(|(idx, n)| {
            n.kind == NodeKind::ServiceAccount
                && n.name.contains(&marker)
                && *idx != binding.holder
        })
        .map(|(idx, _)| idx)
        .collect();

    for sa_idx in targets {
        let mut props = Map::new();
        props.insert("via_role".to_string(), Value::String(binding.role.clone()));
        props.insert("resource".to_string(), Value::String(binding.resource.clone()));
        if let Some(condition) = &binding.condition {
            props.insert("condition".to_string(), condition.clone());
        }
        graph.upsert_edge_idx(binding.holder, sa_idx, edge_kind, props);
    }
}

/// Roles carrying `setIamPolicy` make the bound resource itself reachable:
/// the holder can grant themselves anything on it.
fn synthesize_iam_policy_control(graph: &mut IamGraph, binding: &BindingRef) {
    if !IAM_POLICY_ROLES.contains(&binding.role.as_str()) {
        return;
    }
    let Some(node_id) = resource_node_id(&binding.resource) else {
        return;
    };
    let Some(target) = graph.index_of(&node_id) else {
        return;
    };
    if target == binding.holder {
        return;
    }

    let mut props = Map::new();
    props.insert("via_role".to_string(), Value::String(binding.role.clone()));
    props.insert("resource".to_string(), Value::String(binding.resource.clone()));
    if let Some(condition) = &binding.condition {
        props.insert("condition".to_string(), condition.clone());
    }
    graph.upsert_edge_idx(binding.holder, target, EdgeKind::CanAssignCustomRole, props);
}

fn dangerous_role_edge(role: &str) -> Option<EdgeKind> {
    DANGEROUS_ROLE_EDGES.iter().find_map(|(name, kind)| {
        let matches = role == *name
            || role
                .strip_prefix(name)
                .map(|rest| rest.starts_with('.'))
                .unwrap_or(false);
        matches.then_some(*kind)
    })
}

fn role_grants_impersonation(graph: &IamGraph, role: &str) -> bool {
    let role_id = format!("role:{role}");
    if let Some(node) = graph.node_by_id(&role_id) {
        if let Some(perms) = node.properties.get("includedPermissions").and_then(Value::as_array) {
            return perms
                .iter()
                .filter_map(Value::as_str)
                .any(|p| IMPERSONATION_PERMISSIONS.contains(&p));
        }
    }
    IMPERSONATION_ROLES.contains(&role)
}

/// Email of the service account a resource path points at, if any.
pub fn service_account_email(resource: &str) -> Option<String> {
    let (_, tail) = resource.split_once("serviceAccounts/")?;
    let email = tail.split('/').next().unwrap_or(tail);
    (!email.is_empty()).then(|| email.to_string())
}

/// The project id a resource path is scoped to: the segment following
/// `projects`.
pub fn project_scope(resource: &str) -> Option<String> {
    let mut segments = resource.split('/');
    while let Some(segment) = segments.next() {
        if segment == "projects" {
            return segments.next().filter(|s| !s.is_empty()).map(String::from);
        }
    }
    None
}

/// Map a resource path onto the node id it denotes, when it denotes one.
pub fn resource_node_id(resource: &str) -> Option<String> {
    if let Some(email) = service_account_email(resource) {
        return Some(format!("sa:{email}"));
    }
    let mut segments = resource.split('/').filter(|s| !s.is_empty());
    let head = segments.next()?;
    let key = segments.next()?;
    if segments.next().is_some() {
        return None;
    }
    match head {
        "projects" => Some(format!("project:{key}")),
        "folders" => Some(format!("folder:{key}")),
        "organizations" => Some(format!("org:{key}")),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn binding_props(role: &str, resource: &str) -> Map<String, Value> {
        let mut props = Map::new();
        props.insert("role".to_string(), Value::String(role.to_string()));
        props.insert("resource".to_string(), Value::String(resource.to_string()));
        props
    }

    fn graph_with_identities() -> IamGraph {
        let mut g = IamGraph::new();
        g.add_node(Node::new("user:u@ex.com", NodeKind::User, "u@ex.com"));
        g.add_node(Node::new("project:p", NodeKind::Project, "projects/p"));
        g.add_node(Node::new(
            "sa:a@p.iam.gserviceaccount.com",
            NodeKind::ServiceAccount,
            "a@p.iam.gserviceaccount.com",
        ));
        g.add_node(Node::new(
            "sa:b@p.iam.gserviceaccount.com",
            NodeKind::ServiceAccount,
            "b@p.iam.gserviceaccount.com",
        ));
        g.add_node(Node::new(
            "sa:other@q.iam.gserviceaccount.com",
            NodeKind::ServiceAccount,
            "other@q.iam.gserviceaccount.com",
        ));
        g.add_node(Node::new(
            "role:roles/compute.admin",
            NodeKind::Role,
            "roles/compute.admin",
        ));
        g
    }

    #[test]
    fn dangerous_role_fans_out_within_project_scope() {
        let mut g = graph_with_identities();
        g.upsert_edge(
            "user:u@ex.com",
            "role:roles/compute.admin",
            EdgeKind::HasRole,
            binding_props("roles/compute.admin", "projects/p"),
        );

        synthesize(&mut g);

        assert!(g
            .find_edge("user:u@ex.com", "sa:a@p.iam.gserviceaccount.com", EdgeKind::CanActAsViaVm)
            .is_some());
        assert!(g
            .find_edge("user:u@ex.com", "sa:b@p.iam.gserviceaccount.com", EdgeKind::CanActAsViaVm)
            .is_some());
        // No edge to the SA living in another project.
        assert!(g
            .find_edge(
                "user:u@ex.com",
                "sa:other@q.iam.gserviceaccount.com",
                EdgeKind::CanActAsViaVm
            )
            .is_none());
    }

    #[test]
    fn derived_edge_carries_via_role_and_resource() {
        let mut g = graph_with_identities();
        g.upsert_edge(
            "user:u@ex.com",
            "role:roles/compute.admin",
            EdgeKind::HasRole,
            binding_props("roles/compute.admin", "projects/p"),
        );
        synthesize(&mut g);

        let edge = g
            .find_edge("user:u@ex.com", "sa:a@p.iam.gserviceaccount.com", EdgeKind::CanActAsViaVm)
            .unwrap();
        assert_eq!(
            edge.properties.get("via_role").and_then(Value::as_str),
            Some("roles/compute.admin")
        );
        assert_eq!(
            edge.properties.get("resource").and_then(Value::as_str),
            Some("projects/p")
        );
    }

    #[test]
    fn self_edges_suppressed() {
        let mut g = IamGraph::new();
        g.add_node(Node::new(
            "sa:a@p.iam.gserviceaccount.com",
            NodeKind::ServiceAccount,
            "a@p.iam.gserviceaccount.com",
        ));
        g.add_node(Node::new(
            "role:roles/iam.serviceAccountTokenCreator",
            NodeKind::Role,
            "roles/iam.serviceAccountTokenCreator",
        ));
        // The SA holds token creator on its own project.
        g.upsert_edge(
            "sa:a@p.iam.gserviceaccount.com",
            "role:roles/iam.serviceAccountTokenCreator",
            EdgeKind::HasRole,
            binding_props("roles/iam.serviceAccountTokenCreator", "projects/p"),
        );

        synthesize(&mut g);

        assert!(g
            .find_edge(
                "sa:a@p.iam.gserviceaccount.com",
                "sa:a@p.iam.gserviceaccount.com",
                EdgeKind::CanImpersonateSa
            )
            .is_none());
    }

    #[test]
    fn impersonation_on_service_account_resource() {
        let mut g = IamGraph::new();
        g.add_node(Node::new("user:bob@ex.com", NodeKind::User, "bob@ex.com"));
        g.add_node(Node::new(
            "role:roles/iam.serviceAccountTokenCreator",
            NodeKind::Role,
            "roles/iam.serviceAccountTokenCreator",
        ));
        g.upsert_edge(
            "user:bob@ex.com",
            "role:roles/iam.serviceAccountTokenCreator",
            EdgeKind::HasRole,
            binding_props(
                "roles/iam.serviceAccountTokenCreator",
                "projects/p/serviceAccounts/s1@p.iam.gserviceaccount.com",
            ),
        );

        synthesize(&mut g);

        // The SA node is created on demand and both the observed and the
        // derived capability edges appear.
        assert!(g
            .find_edge(
                "user:bob@ex.com",
                "sa:s1@p.iam.gserviceaccount.com",
                EdgeKind::CanImpersonate
            )
            .is_some());
        assert!(g
            .find_edge(
                "user:bob@ex.com",
                "sa:s1@p.iam.gserviceaccount.com",
                EdgeKind::CanImpersonateSa
            )
            .is_some());
    }

    #[test]
    fn impersonation_respects_role_catalog_permissions() {
        let mut g = IamGraph::new();
        g.add_node(Node::new("user:bob@ex.com", NodeKind::User, "bob@ex.com"));
        let mut role = Node::new("role:roles/custom.viewer", NodeKind::CustomRole, "roles/custom.viewer");
        role.properties.insert(
            "includedPermissions".to_string(),
            json!(["storage.objects.get"]),
        );
        g.add_node(role);
        g.upsert_edge(
            "user:bob@ex.com",
            "role:roles/custom.viewer",
            EdgeKind::HasRole,
            binding_props(
                "roles/custom.viewer",
                "projects/p/serviceAccounts/s1@p.iam.gserviceaccount.com",
            ),
        );

        synthesize(&mut g);

        assert!(g
            .find_edge(
                "user:bob@ex.com",
                "sa:s1@p.iam.gserviceaccount.com",
                EdgeKind::CanImpersonate
            )
            .is_none());
    }

    #[test]
    fn iam_policy_roles_reach_the_resource_node() {
        let mut g = IamGraph::new();
        g.add_node(Node::new("group:admins", NodeKind::Group, "admins"));
        g.add_node(Node::new("project:p", NodeKind::Project, "projects/p"));
        g.add_node(Node::new("role:roles/owner", NodeKind::Role, "roles/owner"));
        g.upsert_edge(
            "group:admins",
            "role:roles/owner",
            EdgeKind::HasRole,
            binding_props("roles/owner", "projects/p"),
        );

        synthesize(&mut g);

        assert!(g
            .find_edge("group:admins", "project:p", EdgeKind::CanAssignCustomRole)
            .is_some());
    }

    #[test]
    fn resynthesize_matches_full_rebuild() {
        let mut g = graph_with_identities();
        g.upsert_edge(
            "user:u@ex.com",
            "role:roles/compute.admin",
            EdgeKind::HasRole,
            binding_props("roles/compute.admin", "projects/p"),
        );
        synthesize(&mut g);
        let count_after_first = g.edge_count();

        // Re-deriving from the same structural edges is a fixpoint.
        resynthesize(&mut g);
        assert_eq!(g.edge_count(), count_after_first);
        assert!(g
            .find_edge("user:u@ex.com", "sa:a@p.iam.gserviceaccount.com", EdgeKind::CanActAsViaVm)
            .is_some());
    }

    #[test]
    fn resource_path_helpers() {
        assert_eq!(project_scope("projects/p"), Some("p".to_string()));
        assert_eq!(
            project_scope("projects/p/serviceAccounts/x@p.iam.gserviceaccount.com"),
            Some("p".to_string())
        );
        assert_eq!(project_scope("organizations/1"), None);

        assert_eq!(
            service_account_email("projects/p/serviceAccounts/x@p.iam.gserviceaccount.com"),
            Some("x@p.iam.gserviceaccount.com".to_string())
        );
        assert_eq!(service_account_email("projects/p"), None);

        assert_eq!(resource_node_id("projects/p"), Some("project:p".to_string()));
        assert_eq!(resource_node_id("organizations/1"), Some("org:1".to_string()));
        assert_eq!(
            resource_node_id("projects/p/serviceAccounts/x@p.iam.gserviceaccount.com"),
            Some("sa:x@p.iam.gserviceaccount.com".to_string())
        );
        assert_eq!(resource_node_id("projects/p/buckets/b"), None);
    }

    #[test]
    fn instance_admin_variants_match() {
        assert_eq!(
            dangerous_role_edge("roles/compute.instanceAdmin"),
            Some(EdgeKind::CanActAsViaVm)
        );
        assert_eq!(
            dangerous_role_edge("roles/compute.instanceAdmin.v1"),
            Some(EdgeKind::CanActAsViaVm)
        );
        assert_eq!(dangerous_role_edge("roles/viewer"), None);
    }
}
