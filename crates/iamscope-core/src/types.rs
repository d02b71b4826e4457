//! Core domain types for the iamscope IAM graph.
//!
//! These types model a cloud tenant's IAM surface as a directed property
//! graph: principals, resources, and roles as nodes; observed bindings,
//! derived escalation capabilities, and audit-confirmed activity as edges.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ── Node kinds ────────────────────────────────────────────────────

/// The closed set of node kinds in the IAM graph.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    User,
    ServiceAccount,
    Group,
    Project,
    Folder,
    Organization,
    Role,
    CustomRole,
    Resource,
    Bucket,
    Instance,
    Function,
    Dataset,
    Secret,
    KmsKey,
    Topic,
    CloudRunService,
    GkeCluster,
    GkeWorkload,
    Tag,
    TagValue,
    WorkloadIdentityProvider,
    CloudBuildTrigger,
    ComputeInstance,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::ServiceAccount => "service_account",
            Self::Group => "group",
            Self::Project => "project",
            Self::Folder => "folder",
            Self::Organization => "organization",
            Self::Role => "role",
            Self::CustomRole => "custom_role",
            Self::Resource => "resource",
            Self::Bucket => "bucket",
            Self::Instance => "instance",
            Self::Function => "function",
            Self::Dataset => "dataset",
            Self::Secret => "secret",
            Self::KmsKey => "kms_key",
            Self::Topic => "topic",
            Self::CloudRunService => "cloud_run_service",
            Self::GkeCluster => "gke_cluster",
            Self::GkeWorkload => "gke_workload",
            Self::Tag => "tag",
            Self::TagValue => "tag_value",
            Self::WorkloadIdentityProvider => "workload_identity_provider",
            Self::CloudBuildTrigger => "cloud_build_trigger",
            Self::ComputeInstance => "compute_instance",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Edge kinds ────────────────────────────────────────────────────

/// The closed set of edge kinds.
///
/// Three families: structural edges observed directly from collection,
/// derived escalation edges synthesized from roles and permissions, and
/// audit-confirmed edges enriched from cloud audit logs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    // Structural
    ParentOf,
    MemberOf,
    HasRole,
    RunsAs,

    // Derived escalation
    CanImpersonate,
    CanImpersonateSa,
    CanCreateServiceAccountKey,
    CanActAsViaVm,
    CanDeployFunctionAs,
    CanDeployCloudRunAs,
    CanTriggerBuildAs,
    CanLoginToVm,
    CanSatisfyIamCondition,
    ExternalPrincipalCanImpersonate,
    CanHijackWorkloadIdentity,
    CanModifyCustomRole,
    CanLaunchAsDefaultSa,
    CanAttachServiceAccount,
    CanUpdateMetadata,
    CanDeployGkePodAs,
    CanAssignCustomRole,
    HasTagBindingEscalation,
    CanSshAndImpersonate,

    // Audit-confirmed
    HasImpersonated,
    HasEscalatedPrivilege,
    HasAccessed,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ParentOf => "parent_of",
            Self::MemberOf => "member_of",
            Self::HasRole => "has_role",
            Self::RunsAs => "runs_as",
            Self::CanImpersonate => "can_impersonate",
            Self::CanImpersonateSa => "can_impersonate_sa",
            Self::CanCreateServiceAccountKey => "can_create_service_account_key",
            Self::CanActAsViaVm => "can_act_as_via_vm",
            Self::CanDeployFunctionAs => "can_deploy_function_as",
            Self::CanDeployCloudRunAs => "can_deploy_cloud_run_as",
            Self::CanTriggerBuildAs => "can_trigger_build_as",
            Self::CanLoginToVm => "can_login_to_vm",
            Self::CanSatisfyIamCondition => "can_satisfy_iam_condition",
            Self::ExternalPrincipalCanImpersonate => "external_principal_can_impersonate",
            Self::CanHijackWorkloadIdentity => "can_hijack_workload_identity",
            Self::CanModifyCustomRole => "can_modify_custom_role",
            Self::CanLaunchAsDefaultSa => "can_launch_as_default_sa",
            Self::CanAttachServiceAccount => "can_attach_service_account",
            Self::CanUpdateMetadata => "can_update_metadata",
            Self::CanDeployGkePodAs => "can_deploy_gke_pod_as",
            Self::CanAssignCustomRole => "can_assign_custom_role",
            Self::HasTagBindingEscalation => "has_tag_binding_escalation",
            Self::CanSshAndImpersonate => "can_ssh_and_impersonate",
            Self::HasImpersonated => "has_impersonated",
            Self::HasEscalatedPrivilege => "has_escalated_privilege",
            Self::HasAccessed => "has_accessed",
        }
    }

    /// Whether this edge kind counts as an escalation step in path
    /// classification. This set is the single source of truth for
    /// "counts as an escalation step".
    pub fn is_escalation(&self) -> bool {
        matches!(
            self,
            Self::CanImpersonate
                | Self::CanImpersonateSa
                | Self::CanCreateServiceAccountKey
                | Self::CanActAsViaVm
                | Self::CanDeployFunctionAs
                | Self::CanDeployCloudRunAs
                | Self::CanTriggerBuildAs
                | Self::CanLoginToVm
                | Self::CanSatisfyIamCondition
                | Self::ExternalPrincipalCanImpersonate
                | Self::CanHijackWorkloadIdentity
                | Self::CanModifyCustomRole
                | Self::CanLaunchAsDefaultSa
                | Self::CanAttachServiceAccount
                | Self::CanUpdateMetadata
                | Self::CanDeployGkePodAs
                | Self::CanAssignCustomRole
                | Self::HasTagBindingEscalation
                | Self::CanSshAndImpersonate
                | Self::HasEscalatedPrivilege
        )
    }

    /// Whether this edge kind is in the derived-escalation family
    /// (synthesized by the builder rather than observed).
    pub fn is_derived(&self) -> bool {
        self.is_escalation() && *self != Self::HasEscalatedPrivilege
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Nodes ─────────────────────────────────────────────────────────

/// Predefined roles that materially raise the risk of whoever holds them.
pub const BUILTIN_DANGEROUS_ROLES: &[&str] = &[
    "roles/owner",
    "roles/editor",
    "roles/iam.securityAdmin",
    "roles/iam.serviceAccountAdmin",
    "roles/iam.serviceAccountTokenCreator",
    "roles/iam.serviceAccountKeyAdmin",
    "roles/resourcemanager.organizationAdmin",
    "roles/resourcemanager.folderAdmin",
    "roles/resourcemanager.projectIamAdmin",
    "roles/cloudfunctions.admin",
    "roles/run.admin",
    "roles/container.admin",
    "roles/compute.admin",
    "roles/cloudbuild.builds.editor",
];

/// A node in the IAM graph.
///
/// Identifiers are globally unique strings of the form `<prefix>:<natural-key>`
/// (e.g. `user:alice@example.com`, `sa:svc@proj.iam.gserviceaccount.com`,
/// `project:p-1`, `role:roles/owner`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub name: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: NodeKind, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            name: name.into(),
            properties: Map::new(),
        }
    }

    pub fn with_properties(
        id: impl Into<String>,
        kind: NodeKind,
        name: impl Into<String>,
        properties: Map<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            name: name.into(),
            properties,
        }
    }

    fn prop_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(Value::as_str)
    }

    fn prop_truthy(&self, key: &str) -> bool {
        match self.properties.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s == "true",
            _ => false,
        }
    }

    /// Human-readable display name, preferring identity properties over the
    /// raw name.
    pub fn display_name(&self) -> String {
        let preferred = match self.kind {
            NodeKind::User | NodeKind::ServiceAccount => self.prop_str("email"),
            NodeKind::Group | NodeKind::Project => self.prop_str("displayName"),
            NodeKind::Role | NodeKind::CustomRole => self.prop_str("title"),
            _ => None,
        };
        preferred.unwrap_or(&self.name).to_string()
    }

    /// Intrinsic risk score in `[0.0, 1.0]`, a deterministic function of
    /// kind and danger-signal properties.
    pub fn risk_score(&self) -> f64 {
        let mut score: f64 = 0.0;

        match self.kind {
            NodeKind::Organization => score += 0.3,
            NodeKind::Folder => score += 0.25,
            NodeKind::Project => score += 0.2,
            NodeKind::ServiceAccount => {
                score += 0.1;
                if self.prop_truthy("hasTokenCreatorRole") {
                    score += 0.3;
                }
                if self.prop_truthy("hasOwnerRole") {
                    score += 0.4;
                }
                if self.prop_truthy("isDefaultServiceAccount") {
                    score += 0.2;
                }
                if self.prop_truthy("hasEditorRole") {
                    score += 0.3;
                }
            }
            NodeKind::Role => {
                if BUILTIN_DANGEROUS_ROLES.contains(&self.name.as_str()) {
                    score += 0.5;
                }
            }
            NodeKind::CustomRole => {
                if let Some(perms) = self.properties.get("dangerousPermissions").and_then(Value::as_array) {
                    if !perms.is_empty() {
                        score += (perms.len() as f64 * 0.1).min(0.6);
                    }
                }
            }
            NodeKind::Secret | NodeKind::KmsKey => score += 0.3,
            NodeKind::Function | NodeKind::CloudRunService => {
                score += 0.25;
                if let Some(email) = self.prop_str("serviceAccountEmail") {
                    if email.contains("editor") || email.contains("owner") {
                        score += 0.2;
                    }
                }
            }
            NodeKind::GkeCluster => {
                score += 0.3;
                if self.prop_truthy("workloadIdentityEnabled") {
                    score += 0.1;
                }
            }
            NodeKind::ComputeInstance => {
                score += 0.15;
                if let Some(sas) = self.properties.get("serviceAccounts").and_then(Value::as_array) {
                    let uses_default = sas.iter().any(|sa| {
                        sa.get("email")
                            .and_then(Value::as_str)
                            .map(|e| e.ends_with("-compute@developer.gserviceaccount.com"))
                            .unwrap_or(false)
                    });
                    if uses_default {
                        score += 0.2;
                    }
                }
            }
            NodeKind::Tag | NodeKind::TagValue => {
                score += 0.2;
                if self.prop_truthy("usedInIAMConditions") {
                    score += 0.3;
                }
            }
            NodeKind::WorkloadIdentityProvider => {
                score += 0.25;
                if self.prop_truthy("allowsAnyPrincipal") {
                    score += 0.4;
                }
            }
            NodeKind::CloudBuildTrigger => {
                score += 0.2;
                if self.prop_truthy("usesPrivilegedServiceAccount") {
                    score += 0.3;
                }
            }
            _ => {}
        }

        score.min(1.0)
    }
}

// ── Edges ─────────────────────────────────────────────────────────

/// A directed edge in the IAM graph.
///
/// Edge identity is the `(source, target, kind)` triple; writing the same
/// triple again merges, with the later properties winning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Edge {
    pub source_id: String,
    pub target_id: String,
    #[serde(rename = "type")]
    pub kind: EdgeKind,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl Edge {
    pub fn new(source_id: impl Into<String>, target_id: impl Into<String>, kind: EdgeKind) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            kind,
            properties: Map::new(),
        }
    }

    pub fn with_properties(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        kind: EdgeKind,
        properties: Map<String, Value>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            kind,
            properties,
        }
    }

    fn prop_truthy(&self, key: &str) -> bool {
        match self.properties.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s == "true",
            _ => false,
        }
    }

    /// Risk score in `[0.0, 1.0]`: a static per-kind base, damped for
    /// conditional bindings, boosted for audit-confirmed activity.
    pub fn risk_score(&self) -> f64 {
        let mut score: f64 = match self.kind {
            EdgeKind::CanImpersonateSa => 0.9,
            EdgeKind::CanCreateServiceAccountKey => 0.85,
            EdgeKind::CanActAsViaVm => 0.8,
            EdgeKind::CanDeployFunctionAs => 0.9,
            EdgeKind::CanDeployCloudRunAs => 0.9,
            EdgeKind::CanTriggerBuildAs => 0.85,
            EdgeKind::CanLoginToVm => {
                if self.prop_truthy("vmRunsAsPrivilegedSA") {
                    0.8
                } else {
                    0.6
                }
            }
            EdgeKind::RunsAs => {
                if self.prop_truthy("serviceAccountPrivileged") {
                    0.8
                } else {
                    0.5
                }
            }
            EdgeKind::CanSatisfyIamCondition => 0.75,
            EdgeKind::ExternalPrincipalCanImpersonate => 0.95,
            EdgeKind::CanHijackWorkloadIdentity => 0.85,
            EdgeKind::CanModifyCustomRole => 0.8,
            EdgeKind::CanLaunchAsDefaultSa => {
                if self.prop_truthy("defaultSAIsEditor") {
                    0.9
                } else {
                    0.7
                }
            }
            EdgeKind::CanAttachServiceAccount => 0.75,
            EdgeKind::CanUpdateMetadata => 0.7,
            EdgeKind::CanDeployGkePodAs => 0.85,
            EdgeKind::CanAssignCustomRole => 0.8,
            EdgeKind::HasTagBindingEscalation => 0.75,
            EdgeKind::CanSshAndImpersonate => 0.8,
            EdgeKind::HasImpersonated => 0.95,
            EdgeKind::HasEscalatedPrivilege => 1.0,
            EdgeKind::HasAccessed => 0.6,
            EdgeKind::CanImpersonate => 0.8,
            EdgeKind::HasRole => {
                let role = self
                    .properties
                    .get("role")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                let dangerous = ["owner", "editor", "admin", "tokenCreator", "keyAdmin"]
                    .iter()
                    .any(|d| role.contains(d));
                if dangerous {
                    0.6
                } else {
                    0.2
                }
            }
            EdgeKind::MemberOf => 0.1,
            EdgeKind::ParentOf => 0.0,
        };

        // Conditional bindings reduce risk; audit confirmation raises it.
        if self.properties.get("condition").map(|c| !c.is_null()).unwrap_or(false) {
            score *= 0.7;
        }
        if self.prop_truthy("confirmed_by_audit") {
            score = (score * 1.2).min(1.0);
        }

        score.min(1.0)
    }

    pub fn is_escalation(&self) -> bool {
        self.kind.is_escalation()
    }

    pub fn is_high_risk(&self) -> bool {
        self.risk_score() >= 0.6
    }
}

// ── Attack paths ──────────────────────────────────────────────────

/// Risk level bucket used in visualization metadata.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

/// A single escalation technique, keyed by edge kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TechniqueInfo {
    pub name: String,
    pub icon: String,
    pub description: String,
    pub permission: String,
    pub edge_type: EdgeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub via_role: Option<String>,
}

/// Precomputed display data for one node of an attack path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDisplay {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub icon: String,
    pub color: String,
    pub risk_level: RiskLevel,
    pub properties: Map<String, Value>,
}

/// Precomputed display data for one edge of an attack path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDisplay {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub kind: EdgeKind,
    pub label: String,
    pub color: String,
    pub risk_score: f64,
    pub properties: Map<String, Value>,
}

/// Visualization metadata attached to every emitted attack path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualizationMetadata {
    pub escalation_techniques: Vec<TechniqueInfo>,
    pub permissions_used: Vec<String>,
    pub node_metadata: Vec<NodeDisplay>,
    pub edge_metadata: Vec<EdgeDisplay>,
    pub attack_summary: String,
}

/// An attack path: an ordered walk from an identity to a higher-privileged
/// target, with at least one edge and no repeated nodes (lateral-movement
/// pivots excepted).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttackPath {
    pub id: Uuid,
    pub source_node: Node,
    pub target_node: Node,
    pub path_nodes: Vec<Node>,
    pub path_edges: Vec<Edge>,
    pub risk_score: f64,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visualization_metadata: Option<VisualizationMetadata>,
}

impl AttackPath {
    /// Path length in edges.
    pub fn len(&self) -> usize {
        self.path_edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.path_edges.is_empty()
    }

    /// Stable identity for diffing: the node-id sequence plus the edge-kind
    /// sequence. Two paths are the same walk iff these match.
    pub fn walk_key(&self) -> String {
        let nodes: Vec<&str> = self.path_nodes.iter().map(|n| n.id.as_str()).collect();
        let kinds: Vec<&str> = self.path_edges.iter().map(|e| e.kind.as_str()).collect();
        format!("{}|{}", nodes.join(">"), kinds.join(">"))
    }

    /// String rendering like `alice --[can_impersonate]--> svc@p.iam`.
    pub fn path_string(&self) -> String {
        let mut parts = Vec::new();
        for (i, edge) in self.path_edges.iter().enumerate() {
            if i == 0 {
                parts.push(self.path_nodes[i].display_name());
            }
            parts.push(format!("--[{}]-->", edge.kind));
            if let Some(node) = self.path_nodes.get(i + 1) {
                parts.push(node.display_name());
            }
        }
        parts.join(" ")
    }
}

// ── Graph metadata ────────────────────────────────────────────────

/// Metadata about a built graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphMetadata {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub node_counts: std::collections::BTreeMap<String, usize>,
    pub edge_counts: std::collections::BTreeMap<String, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection_time: Option<String>,
    pub projects: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    /// Content hash of the collected-data document this graph was built from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_fingerprint: Option<String>,
    /// Edges dropped because an endpoint node was never created.
    pub suppressed_edges: u64,
}
