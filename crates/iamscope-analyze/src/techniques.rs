//! Escalation-technique descriptors and display lookups.
//!
//! Static per-edge-kind tables: technique name, icon, human description, and
//! the permission the capability maps to. Node and edge colors come from the
//! visualization config so external renderers can re-theme without touching
//! analysis output.

use serde_json::{Map, Value};

use iamscope_core::config::VisualizationConfig;
use iamscope_core::types::{EdgeKind, NodeKind, TechniqueInfo};

/// Technique descriptor for an edge, enriched with binding properties.
pub fn technique_for(kind: EdgeKind, properties: &Map<String, Value>) -> TechniqueInfo {
    let (name, icon, description, permission) = match kind {
        EdgeKind::CanImpersonateSa => (
            "Service Account Impersonation",
            "🔑",
            "Generate access tokens for service account",
            "iam.serviceAccounts.getAccessToken",
        ),
        EdgeKind::CanCreateServiceAccountKey => (
            "Service Account Key Creation",
            "🗝️",
            "Create and download service account keys",
            "iam.serviceAccountKeys.create",
        ),
        EdgeKind::CanActAsViaVm => (
            "VM ActAs Exploitation",
            "💻",
            "Deploy VM with service account attached",
            "iam.serviceAccounts.actAs + compute.instances.create",
        ),
        EdgeKind::CanDeployFunctionAs => (
            "Cloud Function Deployment",
            "⚡",
            "Deploy function running as service account",
            "cloudfunctions.functions.create + iam.serviceAccounts.actAs",
        ),
        EdgeKind::CanDeployCloudRunAs => (
            "Cloud Run Deployment",
            "🏃",
            "Deploy Cloud Run service with SA",
            "run.services.create + iam.serviceAccounts.actAs",
        ),
        EdgeKind::CanTriggerBuildAs => (
            "Cloud Build Trigger",
            "🔨",
            "Trigger build running as service account",
            "cloudbuild.builds.create",
        ),
        EdgeKind::CanLoginToVm => (
            "VM SSH Access",
            "🖥️",
            "SSH into VM and access metadata service",
            "compute.instances.osLogin",
        ),
        EdgeKind::CanDeployGkePodAs => (
            "GKE Pod Deployment",
            "☸️",
            "Deploy pod in GKE with service account",
            "container.pods.create + iam.serviceAccounts.actAs",
        ),
        EdgeKind::CanSatisfyIamCondition => (
            "IAM Condition Bypass",
            "🔓",
            "Satisfy IAM conditions to gain access",
            "Varies by condition",
        ),
        EdgeKind::ExternalPrincipalCanImpersonate => (
            "External Identity Impersonation",
            "🌐",
            "External identity can impersonate service account",
            "iam.workloadIdentityPools.providers.use",
        ),
        EdgeKind::CanHijackWorkloadIdentity => (
            "Workload Identity Hijacking",
            "🎭",
            "Hijack GKE workload identity",
            "container.pods.create",
        ),
        EdgeKind::CanModifyCustomRole => (
            "Custom Role Modification",
            "✏️",
            "Modify custom role to add permissions",
            "iam.roles.update",
        ),
        EdgeKind::CanLaunchAsDefaultSa => (
            "Default Service Account Usage",
            "🤖",
            "Launch resources using default service account",
            "Varies by service",
        ),
        EdgeKind::CanAttachServiceAccount => (
            "Service Account Attachment",
            "📎",
            "Attach service account to resources",
            "iam.serviceAccounts.actAs",
        ),
        EdgeKind::CanUpdateMetadata => (
            "Metadata Manipulation",
            "📝",
            "Update instance metadata",
            "compute.instances.setMetadata",
        ),
        EdgeKind::CanAssignCustomRole => (
            "Custom Role Assignment",
            "🎯",
            "Assign custom roles with dangerous permissions",
            "resourcemanager.projects.setIamPolicy",
        ),
        EdgeKind::HasTagBindingEscalation => (
            "Tag-based Escalation",
            "🏷️",
            "Use tag bindings for privilege escalation",
            "resourcemanager.tagBindings.create",
        ),
        EdgeKind::CanSshAndImpersonate => (
            "SSH + Impersonation",
            "🔐",
            "SSH access combined with impersonation",
            "compute.instances.osLogin + iam.serviceAccounts.getAccessToken",
        ),
        EdgeKind::HasEscalatedPrivilege => (
            "Confirmed Privilege Escalation",
            "⚠️",
            "Privilege escalation detected in audit logs",
            "N/A - detected from logs",
        ),
        EdgeKind::HasImpersonated => (
            "Observed Impersonation",
            "👁️",
            "Impersonation confirmed in audit logs",
            "iam.serviceAccounts.getAccessToken",
        ),
        EdgeKind::HasAccessed => (
            "Observed Access",
            "👁️",
            "Sensitive access confirmed in audit logs",
            "N/A - detected from logs",
        ),
        EdgeKind::CanImpersonate => (
            "General Impersonation",
            "🔑",
            "Can impersonate identity",
            "iam.serviceAccounts.getAccessToken",
        ),
        EdgeKind::HasRole => (
            "Role Assignment",
            "👤",
            "Has IAM role granting permissions",
            "IAM role",
        ),
        EdgeKind::MemberOf => ("Group Membership", "👥", "Member of group", "N/A"),
        EdgeKind::RunsAs => (
            "Runtime Identity",
            "🤖",
            "Workload runs as service account",
            "iam.serviceAccounts.actAs",
        ),
        EdgeKind::ParentOf => ("Hierarchy", "🏢", "Resource hierarchy parent", "N/A"),
    };

    let via_role = properties
        .get("via_role")
        .and_then(Value::as_str)
        .map(String::from);

    // Role-based edges carry the concrete role as their permission.
    let mut permission = permission.to_string();
    if permission == "IAM role" {
        if let Some(role) = via_role
            .as_deref()
            .or_else(|| properties.get("role").and_then(Value::as_str))
        {
            permission = role.to_string();
        }
    }

    TechniqueInfo {
        name: name.to_string(),
        icon: icon.to_string(),
        description: description.to_string(),
        permission,
        edge_type: kind,
        via_role,
    }
}

/// The permission a capability edge implies, without binding context.
pub fn infer_permission(kind: EdgeKind) -> &'static str {
    match kind {
        EdgeKind::CanImpersonateSa => "iam.serviceAccounts.getAccessToken",
        EdgeKind::CanCreateServiceAccountKey => "iam.serviceAccountKeys.create",
        EdgeKind::CanActAsViaVm => "iam.serviceAccounts.actAs",
        EdgeKind::CanDeployFunctionAs => "cloudfunctions.functions.create",
        EdgeKind::CanDeployCloudRunAs => "run.services.create",
        EdgeKind::CanTriggerBuildAs => "cloudbuild.builds.create",
        EdgeKind::CanLoginToVm => "compute.instances.osLogin",
        EdgeKind::CanDeployGkePodAs => "container.pods.create",
        EdgeKind::CanSatisfyIamCondition => "iam.conditions.check",
        EdgeKind::ExternalPrincipalCanImpersonate => "iam.workloadIdentityPools.providers.use",
        EdgeKind::CanHijackWorkloadIdentity => "container.pods.create",
        EdgeKind::CanModifyCustomRole => "iam.roles.update",
        EdgeKind::CanLaunchAsDefaultSa => "compute.instances.create",
        EdgeKind::CanAttachServiceAccount => "iam.serviceAccounts.actAs",
        EdgeKind::CanUpdateMetadata => "compute.instances.setMetadata",
        EdgeKind::CanAssignCustomRole => "resourcemanager.projects.setIamPolicy",
        EdgeKind::HasTagBindingEscalation => "resourcemanager.tagBindings.create",
        EdgeKind::CanSshAndImpersonate => "compute.instances.osLogin",
        EdgeKind::HasEscalatedPrivilege => "N/A - detected from logs",
        EdgeKind::HasImpersonated => "iam.serviceAccounts.getAccessToken",
        EdgeKind::HasAccessed => "N/A - detected from logs",
        EdgeKind::HasRole => "iam.roles.get",
        EdgeKind::MemberOf => "N/A - group membership",
        EdgeKind::RunsAs => "iam.serviceAccounts.actAs",
        EdgeKind::ParentOf => "N/A - hierarchy",
        EdgeKind::CanImpersonate => "iam.serviceAccounts.getAccessToken",
    }
}

/// Display label for an edge, preferring the concrete role on bindings.
pub fn edge_label(kind: EdgeKind, properties: &Map<String, Value>) -> String {
    if kind == EdgeKind::HasRole {
        if let Some(role) = properties
            .get("via_role")
            .or_else(|| properties.get("role"))
            .and_then(Value::as_str)
        {
            return role.strip_prefix("roles/").unwrap_or(role).to_string();
        }
    }

    match kind {
        EdgeKind::CanImpersonateSa | EdgeKind::CanImpersonate => "impersonate".to_string(),
        EdgeKind::CanCreateServiceAccountKey => "create key".to_string(),
        EdgeKind::CanActAsViaVm => "actAs VM".to_string(),
        EdgeKind::CanDeployFunctionAs => "deploy function".to_string(),
        EdgeKind::CanDeployCloudRunAs => "deploy run".to_string(),
        EdgeKind::CanTriggerBuildAs => "trigger build".to_string(),
        EdgeKind::CanLoginToVm => "SSH access".to_string(),
        EdgeKind::CanDeployGkePodAs => "deploy pod".to_string(),
        EdgeKind::CanSatisfyIamCondition => "satisfy condition".to_string(),
        EdgeKind::ExternalPrincipalCanImpersonate => "external impersonate".to_string(),
        EdgeKind::CanHijackWorkloadIdentity => "hijack workload".to_string(),
        EdgeKind::CanModifyCustomRole => "modify role".to_string(),
        EdgeKind::CanLaunchAsDefaultSa => "use default SA".to_string(),
        EdgeKind::CanAttachServiceAccount => "attach SA".to_string(),
        EdgeKind::CanUpdateMetadata => "update metadata".to_string(),
        EdgeKind::CanAssignCustomRole => "assign role".to_string(),
        EdgeKind::HasTagBindingEscalation => "tag escalation".to_string(),
        EdgeKind::CanSshAndImpersonate => "SSH + impersonate".to_string(),
        EdgeKind::HasEscalatedPrivilege => "escalated".to_string(),
        EdgeKind::HasImpersonated => "impersonated".to_string(),
        EdgeKind::HasAccessed => "accessed".to_string(),
        EdgeKind::MemberOf => "member of".to_string(),
        EdgeKind::HasRole => "has role".to_string(),
        EdgeKind::RunsAs => "runs as".to_string(),
        EdgeKind::ParentOf => "parent of".to_string(),
    }
}

pub fn node_icon(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::User => "👤",
        NodeKind::ServiceAccount => "🤖",
        NodeKind::Group => "👥",
        NodeKind::Project => "📁",
        NodeKind::Folder => "📂",
        NodeKind::Organization => "🏢",
        NodeKind::Role => "🎭",
        NodeKind::CustomRole => "🎨",
        NodeKind::Resource => "📦",
        NodeKind::Bucket => "🪣",
        NodeKind::Instance | NodeKind::ComputeInstance => "💻",
        NodeKind::Function => "⚡",
        NodeKind::Secret => "🔐",
        NodeKind::KmsKey => "🔑",
        NodeKind::CloudRunService => "🏃",
        NodeKind::GkeCluster => "☸️",
        _ => "📍",
    }
}

pub fn node_color(kind: NodeKind, viz: &VisualizationConfig) -> String {
    viz.node_colors
        .get(kind.as_str())
        .cloned()
        .unwrap_or_else(|| "#9E9E9E".to_string())
}

pub fn edge_color(kind: EdgeKind, viz: &VisualizationConfig) -> String {
    if kind.is_escalation() {
        return viz.attack_path_color.clone();
    }
    viz.edge_colors
        .get(kind.as_str())
        .cloned()
        .unwrap_or_else(|| "#BDBDBD".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(value: serde_json::Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn technique_table_core_entries() {
        let t = technique_for(EdgeKind::CanImpersonateSa, &Map::new());
        assert_eq!(t.name, "Service Account Impersonation");
        assert_eq!(t.permission, "iam.serviceAccounts.getAccessToken");
        assert_eq!(t.edge_type, EdgeKind::CanImpersonateSa);
        assert!(t.via_role.is_none());
    }

    #[test]
    fn technique_carries_via_role() {
        let t = technique_for(
            EdgeKind::CanActAsViaVm,
            &props(json!({"via_role": "roles/compute.admin"})),
        );
        assert_eq!(t.via_role.as_deref(), Some("roles/compute.admin"));
    }

    #[test]
    fn has_role_permission_resolves_to_role() {
        let t = technique_for(EdgeKind::HasRole, &props(json!({"role": "roles/owner"})));
        assert_eq!(t.permission, "roles/owner");
    }

    #[test]
    fn every_derived_kind_has_a_technique() {
        for kind in [
            EdgeKind::CanImpersonate,
            EdgeKind::CanImpersonateSa,
            EdgeKind::CanCreateServiceAccountKey,
            EdgeKind::CanActAsViaVm,
            EdgeKind::CanDeployFunctionAs,
            EdgeKind::CanDeployCloudRunAs,
            EdgeKind::CanTriggerBuildAs,
            EdgeKind::CanLoginToVm,
            EdgeKind::CanSatisfyIamCondition,
            EdgeKind::ExternalPrincipalCanImpersonate,
            EdgeKind::CanHijackWorkloadIdentity,
            EdgeKind::CanModifyCustomRole,
            EdgeKind::CanLaunchAsDefaultSa,
            EdgeKind::CanAttachServiceAccount,
            EdgeKind::CanUpdateMetadata,
            EdgeKind::CanDeployGkePodAs,
            EdgeKind::CanAssignCustomRole,
            EdgeKind::HasTagBindingEscalation,
            EdgeKind::CanSshAndImpersonate,
        ] {
            let t = technique_for(kind, &Map::new());
            assert!(!t.name.is_empty());
            assert!(!t.permission.is_empty());
            assert!(!infer_permission(kind).is_empty());
        }
    }

    #[test]
    fn has_role_label_strips_prefix() {
        let label = edge_label(EdgeKind::HasRole, &props(json!({"role": "roles/editor"})));
        assert_eq!(label, "editor");
    }

    #[test]
    fn escalation_edges_use_attack_path_color() {
        let viz = VisualizationConfig::default();
        assert_eq!(edge_color(EdgeKind::CanImpersonateSa, &viz), "#FF0000");
        assert_eq!(edge_color(EdgeKind::MemberOf, &viz), "#9E9E9E");
    }
}
