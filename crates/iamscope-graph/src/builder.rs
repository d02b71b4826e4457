//! Graph construction from a collected-data document.
//!
//! Phased, best-effort, deterministic: hierarchy, identities, IAM bindings,
//! resources, derived-escalation synthesis, audit-log enrichment, metadata.
//! Malformed individual records are logged and skipped; the builder never
//! fails outright.

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{info, warn};

use iamscope_core::types::{EdgeKind, Node, NodeKind};

use crate::document::{
    Binding, CloudBuildData, CollectedData, GkeData, HierarchyData, IamData, IdentityData,
    LogData, ResourceData, ResourcePolicy, TagData,
};
use crate::graph::IamGraph;
use crate::synthesis;

/// Builds an [`IamGraph`] from a collected-data document.
pub struct GraphBuilder {
    graph: IamGraph,
}

impl GraphBuilder {
    /// Build a graph from one snapshot. Pure: same document, same graph.
    pub fn build_from_collected_data(doc: &CollectedData) -> IamGraph {
        let mut builder = Self {
            graph: IamGraph::new(),
        };
        builder.ingest(doc);
        builder.graph
    }

    fn ingest(&mut self, doc: &CollectedData) {
        info!("building graph from collected data");

        if let Some(section) = &doc.data.hierarchy {
            self.build_hierarchy(section.data());
        }
        if let Some(section) = &doc.data.identity {
            self.build_identities(section.data());
        }
        if let Some(section) = &doc.data.iam {
            self.build_iam(section.data());
        }
        if let Some(section) = &doc.data.resources {
            self.build_resources(section.data());
        }
        if let Some(section) = &doc.data.gke {
            self.build_gke(section.data());
        }
        if let Some(section) = &doc.data.tags {
            self.build_tags(section.data());
        }
        if let Some(section) = &doc.data.cloudbuild {
            self.build_cloudbuild(section.data());
        }

        // Per-resource IAM policies live under the resources section but are
        // ordinary bindings.
        if let Some(section) = &doc.data.resources {
            for (key, policy) in &section.data().resource_iam_policies {
                self.ingest_policy(key, policy);
            }
        }

        synthesis::synthesize(&mut self.graph);

        if let Some(section) = &doc.data.logs {
            self.enrich_from_logs(section.data());
        }

        self.finish_metadata(doc);

        info!(
            nodes = self.graph.node_count(),
            edges = self.graph.edge_count(),
            "graph build complete"
        );
    }

    // ── Phase 1: hierarchy ────────────────────────────────────────

    fn build_hierarchy(&mut self, hierarchy: &HierarchyData) {
        for (org_id, org_data) in &hierarchy.organizations {
            let name = name_or(org_data, &format!("organizations/{org_id}"));
            self.graph.add_node(Node::with_properties(
                format!("org:{org_id}"),
                NodeKind::Organization,
                name,
                props_of(org_data),
            ));
        }
        for (folder_id, folder_data) in &hierarchy.folders {
            let name = name_or(folder_data, &format!("folders/{folder_id}"));
            self.graph.add_node(Node::with_properties(
                format!("folder:{folder_id}"),
                NodeKind::Folder,
                name,
                props_of(folder_data),
            ));
        }
        for (project_id, project_data) in &hierarchy.projects {
            let name = name_or(project_data, &format!("projects/{project_id}"));
            self.graph.add_node(Node::with_properties(
                format!("project:{project_id}"),
                NodeKind::Project,
                name,
                props_of(project_data),
            ));
        }

        for (org_id, children) in &hierarchy.hierarchy.organizations {
            let source = format!("org:{org_id}");
            for folder_id in &children.folders {
                self.graph
                    .upsert_edge(&source, &format!("folder:{folder_id}"), EdgeKind::ParentOf, Map::new());
            }
            for project_id in &children.projects {
                self.graph
                    .upsert_edge(&source, &format!("project:{project_id}"), EdgeKind::ParentOf, Map::new());
            }
        }
        for (folder_id, children) in &hierarchy.hierarchy.folders {
            let source = format!("folder:{folder_id}");
            for child_id in &children.folders {
                self.graph
                    .upsert_edge(&source, &format!("folder:{child_id}"), EdgeKind::ParentOf, Map::new());
            }
            for project_id in &children.projects {
                self.graph
                    .upsert_edge(&source, &format!("project:{project_id}"), EdgeKind::ParentOf, Map::new());
            }
        }
    }

    // ── Phase 2: identities ───────────────────────────────────────

    fn build_identities(&mut self, identity: &IdentityData) {
        for (sa_email, sa_data) in &identity.service_accounts {
            self.graph.add_node(Node::with_properties(
                format!("sa:{sa_email}"),
                NodeKind::ServiceAccount,
                sa_email.clone(),
                props_of(sa_data),
            ));
        }
        for (group_id, group_data) in &identity.groups {
            self.graph.add_node(Node::with_properties(
                format!("group:{group_id}"),
                NodeKind::Group,
                group_id.clone(),
                props_of(group_data),
            ));
        }
        for (user_email, user_data) in &identity.users {
            self.graph.add_node(Node::with_properties(
                format!("user:{user_email}"),
                NodeKind::User,
                user_email.clone(),
                props_of(user_data),
            ));
        }

        for (group_id, members) in &identity.group_memberships {
            let group_node_id = format!("group:{group_id}");
            self.graph
                .ensure_node(Node::new(group_node_id.clone(), NodeKind::Group, group_id.clone()));

            for member in members {
                let Some(member_id) = member.id.as_deref() else {
                    warn!(group = group_id.as_str(), "skipping group member without id");
                    continue;
                };
                // Users carry an email; anything under gserviceaccount.com
                // is a service account.
                let member_node_id =
                    if member_id.contains('@') && !member_id.ends_with(".gserviceaccount.com") {
                        let id = format!("user:{member_id}");
                        self.graph
                            .ensure_node(Node::new(id.clone(), NodeKind::User, member_id));
                        id
                    } else {
                        let id = format!("sa:{member_id}");
                        self.graph
                            .ensure_node(Node::new(id.clone(), NodeKind::ServiceAccount, member_id));
                        id
                    };

                self.graph
                    .upsert_edge(&member_node_id, &group_node_id, EdgeKind::MemberOf, Map::new());
            }
        }
    }

    // ── Phase 3: IAM bindings ─────────────────────────────────────

    fn build_iam(&mut self, iam: &IamData) {
        for (role_name, role_data) in &iam.roles.predefined {
            self.graph.add_node(Node::with_properties(
                format!("role:{role_name}"),
                NodeKind::Role,
                role_name.clone(),
                props_of(role_data),
            ));
        }
        for (role_name, role_data) in &iam.roles.custom {
            self.graph.add_node(Node::with_properties(
                format!("role:{role_name}"),
                NodeKind::CustomRole,
                role_name.clone(),
                props_of(role_data),
            ));
        }

        for (key, policy) in &iam.policies.organizations {
            self.ingest_policy(&format!("organizations/{key}"), policy);
        }
        for (key, policy) in &iam.policies.folders {
            self.ingest_policy(&format!("folders/{key}"), policy);
        }
        for (key, policy) in &iam.policies.projects {
            self.ingest_policy(&format!("projects/{key}"), policy);
        }
    }

    fn ingest_policy(&mut self, fallback_resource: &str, policy: &ResourcePolicy) {
        let resource = policy.resource.as_deref().unwrap_or(fallback_resource);
        for binding in &policy.bindings {
            self.ingest_binding(resource, binding);
        }
    }

    fn ingest_binding(&mut self, resource: &str, binding: &Binding) {
        let Some(role) = binding.role.as_deref() else {
            warn!(resource, "skipping binding without role");
            return;
        };

        let role_node_id = format!("role:{role}");
        self.graph
            .ensure_node(Node::new(role_node_id.clone(), NodeKind::Role, role));

        for member in &binding.members {
            let Some(member_str) = member.as_str() else {
                warn!(resource, role, "skipping non-string binding member");
                continue;
            };
            let member_node_id = self.ensure_member_node(member_str);

            let mut props = Map::new();
            props.insert("resource".to_string(), Value::String(resource.to_string()));
            props.insert("role".to_string(), Value::String(role.to_string()));
            if let Some(condition) = &binding.condition {
                if !condition.is_null() {
                    props.insert("condition".to_string(), condition.clone());
                }
            }
            self.graph
                .upsert_edge(&member_node_id, &role_node_id, EdgeKind::HasRole, props);
        }
    }

    /// Normalize a binding member string to a node id, creating the node if
    /// absent. Unparseable members become `special:` nodes rather than being
    /// discarded.
    fn ensure_member_node(&mut self, member: &str) -> String {
        if let Some(email) = member.strip_prefix("user:") {
            let id = format!("user:{email}");
            let mut node = Node::new(id.clone(), NodeKind::User, email);
            node.properties
                .insert("email".to_string(), Value::String(email.to_string()));
            self.graph.ensure_node(node);
            id
        } else if let Some(email) = member.strip_prefix("serviceAccount:") {
            let id = format!("sa:{email}");
            let mut node = Node::new(id.clone(), NodeKind::ServiceAccount, email);
            node.properties
                .insert("email".to_string(), Value::String(email.to_string()));
            self.graph.ensure_node(node);
            id
        } else if let Some(group_id) = member.strip_prefix("group:") {
            let id = format!("group:{group_id}");
            let mut node = Node::new(id.clone(), NodeKind::Group, group_id);
            node.properties
                .insert("id".to_string(), Value::String(group_id.to_string()));
            self.graph.ensure_node(node);
            id
        } else {
            // allUsers, allAuthenticatedUsers, deleted principals, domains.
            let id = format!("special:{member}");
            let mut node = Node::new(id.clone(), NodeKind::User, member);
            node.properties.insert("special".to_string(), Value::Bool(true));
            self.graph.ensure_node(node);
            id
        }
    }

    // ── Phase 4: resources ────────────────────────────────────────

    fn build_resources(&mut self, resources: &ResourceData) {
        let inventory = &resources.resources;
        self.build_resource_kind(&inventory.buckets, NodeKind::Bucket, "bucket");
        self.build_resource_kind(&inventory.compute_instances, NodeKind::ComputeInstance, "instance");
        self.build_resource_kind(&inventory.functions, NodeKind::Function, "function");
        self.build_resource_kind(&inventory.pubsub_topics, NodeKind::Topic, "topic");
        self.build_resource_kind(&inventory.bigquery_datasets, NodeKind::Dataset, "dataset");
        self.build_resource_kind(&inventory.kms_keys, NodeKind::KmsKey, "kms_key");
        self.build_resource_kind(&inventory.secrets, NodeKind::Secret, "secret");
        self.build_resource_kind(&inventory.cloud_run_services, NodeKind::CloudRunService, "run");
    }

    fn build_resource_kind(
        &mut self,
        entries: &std::collections::BTreeMap<String, Value>,
        kind: NodeKind,
        prefix: &str,
    ) {
        for (key, data) in entries {
            let name = name_or(data, key);
            let node_id = format!("{prefix}:{key}");
            self.graph
                .add_node(Node::with_properties(node_id.clone(), kind, name, props_of(data)));
            self.link_runtime_service_account(&node_id, data);
        }
    }

    /// Emit a `runs_as` edge when a resource declares the service account it
    /// executes as.
    fn link_runtime_service_account(&mut self, node_id: &str, data: &Value) {
        let mut emails: Vec<String> = Vec::new();
        for key in ["serviceAccountEmail", "serviceAccount"] {
            if let Some(email) = data.get(key).and_then(Value::as_str) {
                emails.push(email.to_string());
            }
        }
        if let Some(list) = data.get("serviceAccounts").and_then(Value::as_array) {
            for entry in list {
                if let Some(email) = entry.get("email").and_then(Value::as_str) {
                    emails.push(email.to_string());
                }
            }
        }

        for email in emails {
            let sa_id = format!("sa:{email}");
            let mut sa_node = Node::new(sa_id.clone(), NodeKind::ServiceAccount, email.clone());
            sa_node
                .properties
                .insert("email".to_string(), Value::String(email));
            self.graph.ensure_node(sa_node);
            self.graph
                .upsert_edge(node_id, &sa_id, EdgeKind::RunsAs, Map::new());
        }
    }

    fn build_gke(&mut self, gke: &GkeData) {
        for (cluster_id, data) in &gke.clusters {
            let name = name_or(data, cluster_id);
            self.graph.add_node(Node::with_properties(
                format!("gke:{cluster_id}"),
                NodeKind::GkeCluster,
                name,
                props_of(data),
            ));
        }
    }

    fn build_tags(&mut self, tags: &TagData) {
        for (key_name, data) in &tags.tag_keys {
            self.graph.add_node(Node::with_properties(
                format!("tag:{key_name}"),
                NodeKind::Tag,
                name_or(data, key_name),
                props_of(data),
            ));
        }
        for (value_name, data) in &tags.tag_values {
            self.graph.add_node(Node::with_properties(
                format!("tag_value:{value_name}"),
                NodeKind::TagValue,
                name_or(data, value_name),
                props_of(data),
            ));
        }
    }

    fn build_cloudbuild(&mut self, cloudbuild: &CloudBuildData) {
        for (trigger_id, data) in &cloudbuild.triggers {
            let node_id = format!("trigger:{trigger_id}");
            self.graph.add_node(Node::with_properties(
                node_id.clone(),
                NodeKind::CloudBuildTrigger,
                name_or(data, trigger_id),
                props_of(data),
            ));
            self.link_runtime_service_account(&node_id, data);
        }
    }

    // ── Phase 6: audit-log enrichment ─────────────────────────────

    fn enrich_from_logs(&mut self, logs: &LogData) {
        for event in &logs.impersonation_events {
            let Some(principal) = event.get("principal").and_then(Value::as_str) else {
                continue;
            };
            let target = event
                .get("impersonationDetails")
                .and_then(|d| d.get("targetServiceAccount"))
                .and_then(Value::as_str)
                .map(String::from)
                .or_else(|| {
                    event
                        .get("resourceName")
                        .and_then(Value::as_str)
                        .and_then(synthesis::service_account_email)
                });
            let Some(sa_email) = target else {
                warn!(principal, "impersonation event without target service account");
                continue;
            };

            let principal_id = self.ensure_principal_node(principal);
            let sa_id = format!("sa:{sa_email}");
            self.graph.ensure_node(Node::new(
                sa_id.clone(),
                NodeKind::ServiceAccount,
                sa_email,
            ));
            self.graph
                .upsert_edge(&principal_id, &sa_id, EdgeKind::HasImpersonated, audit_props(event));
        }

        for event in &logs.privilege_escalation_events {
            if event.get("failed").and_then(Value::as_bool).unwrap_or(false) {
                continue;
            }
            let Some(principal) = event.get("principal").and_then(Value::as_str) else {
                continue;
            };
            let target_id = event
                .get("escalationDetails")
                .and_then(|d| d.get("targetResource"))
                .and_then(Value::as_str)
                .and_then(synthesis::resource_node_id);
            let Some(target_id) = target_id else {
                continue;
            };
            if !self.graph.contains(&target_id) && !target_id.starts_with("sa:") {
                continue;
            }
            if let Some(email) = target_id.strip_prefix("sa:") {
                self.graph
                    .ensure_node(Node::new(target_id.clone(), NodeKind::ServiceAccount, email));
            }

            let principal_id = self.ensure_principal_node(principal);
            self.graph.upsert_edge(
                &principal_id,
                &target_id,
                EdgeKind::HasEscalatedPrivilege,
                audit_props(event),
            );
        }

        for event in &logs.sensitive_access_events {
            let Some(principal) = event.get("principal").and_then(Value::as_str) else {
                continue;
            };
            let target_id = event
                .get("resourceName")
                .and_then(Value::as_str)
                .and_then(synthesis::resource_node_id);
            let Some(target_id) = target_id else {
                continue;
            };
            if !self.graph.contains(&target_id) {
                continue;
            }
            let principal_id = self.ensure_principal_node(principal);
            self.graph
                .upsert_edge(&principal_id, &target_id, EdgeKind::HasAccessed, audit_props(event));
        }
    }

    fn ensure_principal_node(&mut self, principal: &str) -> String {
        if principal.ends_with(".gserviceaccount.com") {
            let id = format!("sa:{principal}");
            self.graph
                .ensure_node(Node::new(id.clone(), NodeKind::ServiceAccount, principal));
            id
        } else {
            let id = format!("user:{principal}");
            self.graph
                .ensure_node(Node::new(id.clone(), NodeKind::User, principal));
            id
        }
    }

    // ── Phase 7: metadata ─────────────────────────────────────────

    fn finish_metadata(&mut self, doc: &CollectedData) {
        self.graph.recompute_metadata();

        let collection_time = doc
            .metadata
            .collection_time
            .clone()
            .unwrap_or_else(|| Utc::now().to_rfc3339());
        self.graph.metadata_mut().collection_time = Some(collection_time);

        if let Ok(bytes) = serde_json::to_vec(doc) {
            self.graph.metadata_mut().snapshot_fingerprint =
                Some(blake3::hash(&bytes).to_hex().to_string());
        }
    }
}

fn props_of(value: &Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    }
}

fn name_or(value: &Value, fallback: &str) -> String {
    value
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or(fallback)
        .to_string()
}

fn audit_props(event: &Value) -> Map<String, Value> {
    let mut props = Map::new();
    if let Some(ts) = event.get("timestamp") {
        props.insert("timestamp".to_string(), ts.clone());
    }
    if let Some(method) = event.get("methodName") {
        props.insert("method".to_string(), method.clone());
    }
    props.insert("confirmed_by_audit".to_string(), Value::Bool(true));
    props
}
