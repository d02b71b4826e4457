//! Serde model of the collected-data document.
//!
//! The collectors emit one JSON object per collector under `data`, each
//! either as `{"data": {...}}` or as the bare payload (older snapshots).
//! Every field is optional; missing sections produce an empty sub-graph.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// The top-level collected-data document (one snapshot of a tenant).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectedData {
    #[serde(default)]
    pub metadata: DocumentMetadata,
    #[serde(default)]
    pub data: CollectorSections,
}

impl CollectedData {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Collector-run bookkeeping carried alongside the data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default)]
    pub collectors_run: Vec<String>,
    #[serde(default)]
    pub errors: Vec<Value>,
    #[serde(default)]
    pub stats: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_time: Option<String>,
}

/// One entry per collector. Unknown collectors are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectorSections {
    pub hierarchy: Option<Section<HierarchyData>>,
    pub identity: Option<Section<IdentityData>>,
    pub iam: Option<Section<IamData>>,
    pub resources: Option<Section<ResourceData>>,
    pub logs: Option<Section<LogData>>,
    pub gke: Option<Section<GkeData>>,
    pub tags: Option<Section<TagData>>,
    pub cloudbuild: Option<Section<CloudBuildData>>,
}

/// A collector payload, with or without the `{"data": ...}` wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Section<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> Section<T> {
    pub fn data(&self) -> &T {
        match self {
            Section::Wrapped { data } => data,
            Section::Bare(data) => data,
        }
    }
}

// ── Hierarchy ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HierarchyData {
    #[serde(default)]
    pub organizations: BTreeMap<String, Value>,
    #[serde(default)]
    pub folders: BTreeMap<String, Value>,
    #[serde(default)]
    pub projects: BTreeMap<String, Value>,
    #[serde(default)]
    pub hierarchy: HierarchyRelations,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HierarchyRelations {
    #[serde(default)]
    pub organizations: BTreeMap<String, ChildRefs>,
    #[serde(default)]
    pub folders: BTreeMap<String, ChildRefs>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChildRefs {
    #[serde(default)]
    pub folders: Vec<String>,
    #[serde(default)]
    pub projects: Vec<String>,
}

// ── Identity ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityData {
    #[serde(default)]
    pub service_accounts: BTreeMap<String, Value>,
    #[serde(default)]
    pub groups: BTreeMap<String, Value>,
    #[serde(default)]
    pub users: BTreeMap<String, Value>,
    #[serde(default)]
    pub group_memberships: BTreeMap<String, Vec<GroupMember>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupMember {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

// ── IAM ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IamData {
    #[serde(default)]
    pub policies: PolicyScopes,
    #[serde(default)]
    pub roles: RoleCatalog,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyScopes {
    #[serde(default)]
    pub organizations: BTreeMap<String, ResourcePolicy>,
    #[serde(default)]
    pub folders: BTreeMap<String, ResourcePolicy>,
    #[serde(default)]
    pub projects: BTreeMap<String, ResourcePolicy>,
}

/// An IAM policy attached to one resource.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourcePolicy {
    /// Full resource name (e.g. `projects/p-1`). Falls back to the map key.
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub bindings: Vec<Binding>,
}

/// One `(role, members, condition?)` binding.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Binding {
    #[serde(default)]
    pub role: Option<String>,
    /// Member strings; non-string entries are skipped at build time.
    #[serde(default)]
    pub members: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleCatalog {
    #[serde(default)]
    pub predefined: BTreeMap<String, Value>,
    #[serde(default)]
    pub custom: BTreeMap<String, Value>,
}

// ── Resources ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceData {
    #[serde(default)]
    pub resources: ResourceInventory,
    /// Per-resource IAM policies keyed by resource URI (service accounts,
    /// functions, topics, keys, secrets).
    #[serde(default)]
    pub resource_iam_policies: BTreeMap<String, ResourcePolicy>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceInventory {
    #[serde(default)]
    pub buckets: BTreeMap<String, Value>,
    #[serde(default)]
    pub compute_instances: BTreeMap<String, Value>,
    #[serde(default)]
    pub functions: BTreeMap<String, Value>,
    #[serde(default)]
    pub pubsub_topics: BTreeMap<String, Value>,
    #[serde(default)]
    pub bigquery_datasets: BTreeMap<String, Value>,
    #[serde(default)]
    pub kms_keys: BTreeMap<String, Value>,
    #[serde(default)]
    pub secrets: BTreeMap<String, Value>,
    #[serde(default)]
    pub cloud_run_services: BTreeMap<String, Value>,
}

// ── Logs ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogData {
    #[serde(default)]
    pub impersonation_events: Vec<Value>,
    #[serde(default)]
    pub privilege_escalation_events: Vec<Value>,
    #[serde(default)]
    pub sensitive_access_events: Vec<Value>,
}

// ── GKE / Tags / Cloud Build ──────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GkeData {
    #[serde(default)]
    pub clusters: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagData {
    #[serde(default)]
    pub tag_keys: BTreeMap<String, Value>,
    #[serde(default)]
    pub tag_values: BTreeMap<String, Value>,
    #[serde(default)]
    pub tag_bindings: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloudBuildData {
    #[serde(default)]
    pub triggers: BTreeMap<String, Value>,
}
