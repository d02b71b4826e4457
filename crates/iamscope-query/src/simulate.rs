//! What-if simulation of IAM binding changes.
//!
//! Each simulation clones the baseline graph, applies the hypothetical
//! `has_role` mutation, re-derives the synthesized escalation edges, re-runs
//! the analyzer, and diffs the reachable attack paths against the baseline.
//! The baseline graph itself is never mutated.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use iamscope_analyze::{AnalysisResult, PathAnalyzer};
use iamscope_core::config::IamscopeConfig;
use iamscope_core::types::{AttackPath, EdgeKind, Node, NodeKind};
use iamscope_graph::{synthesis, IamGraph};

/// The kind of binding change being simulated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BindingAction {
    Add,
    Remove,
    Change,
}

/// Risk-delta report for one simulated change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    pub action: BindingAction,
    pub member: String,
    pub role: String,
    pub resource: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Sum of new-path risks minus sum of broken-path risks.
    pub risk_delta: f64,
    pub new_paths: Vec<AttackPath>,
    pub broken_paths: Vec<AttackPath>,
    pub new_attack_vectors: Vec<String>,
    pub recommendations: Vec<String>,
}

impl SimulationResult {
    fn empty(action: BindingAction, member: &str, role: &str, resource: &str) -> Self {
        Self {
            action,
            member: member.to_string(),
            role: role.to_string(),
            resource: resource.to_string(),
            error: None,
            risk_delta: 0.0,
            new_paths: Vec::new(),
            broken_paths: Vec::new(),
            new_attack_vectors: Vec::new(),
            recommendations: Vec::new(),
        }
    }
}

/// Owns a baseline graph plus its analysis; answers what-if queries.
pub struct Simulator {
    baseline_graph: IamGraph,
    baseline: AnalysisResult,
    analyzer: PathAnalyzer,
}

impl Simulator {
    pub fn new(graph: IamGraph, config: IamscopeConfig) -> Self {
        let analyzer = PathAnalyzer::new(config);
        let baseline = analyzer.analyze_all_paths(&graph);
        Self {
            baseline_graph: graph,
            baseline,
            analyzer,
        }
    }

    pub fn baseline(&self) -> &AnalysisResult {
        &self.baseline
    }

    pub fn graph(&self) -> &IamGraph {
        &self.baseline_graph
    }

    pub fn simulate_binding_addition(
        &self,
        member: &str,
        role: &str,
        resource: &str,
    ) -> SimulationResult {
        self.run(BindingAction::Add, member, role, resource, None)
    }

    pub fn simulate_binding_removal(
        &self,
        member: &str,
        role: &str,
        resource: &str,
    ) -> SimulationResult {
        self.run(BindingAction::Remove, member, role, resource, None)
    }

    pub fn simulate_role_change(
        &self,
        member: &str,
        old_role: &str,
        new_role: &str,
        resource: &str,
    ) -> SimulationResult {
        self.run(BindingAction::Change, member, old_role, resource, Some(new_role))
    }

    fn run(
        &self,
        action: BindingAction,
        member: &str,
        role: &str,
        resource: &str,
        new_role: Option<&str>,
    ) -> SimulationResult {
        let mut result = SimulationResult::empty(action, member, role, resource);

        let mut mutated = self.baseline_graph.clone();
        let outcome = match action {
            BindingAction::Add => apply_addition(&mut mutated, member, role, resource),
            BindingAction::Remove => apply_removal(&mut mutated, member, role, resource),
            BindingAction::Change => {
                apply_removal(&mut mutated, member, role, resource).and_then(|_| {
                    let new_role = new_role.ok_or_else(|| "new role required".to_string())?;
                    apply_addition(&mut mutated, member, new_role, resource)
                })
            }
        };
        if let Err(message) = outcome {
            result.error = Some(message);
            return result;
        }

        synthesis::resynthesize(&mut mutated);
        let after = self.analyzer.analyze_all_paths(&mutated);
        self.diff(&after, &mut result);

        info!(
            action = ?action,
            member,
            role,
            risk_delta = result.risk_delta,
            new = result.new_paths.len(),
            broken = result.broken_paths.len(),
            "simulation complete"
        );
        result
    }

    /// Two paths are the same walk iff their node sequence and edge-kind
    /// sequence match; category duplicates collapse to one entry.
    fn diff(&self, after: &AnalysisResult, result: &mut SimulationResult) {
        let before_map = walk_map(&self.baseline);
        let after_map = walk_map(after);

        for (key, path) in &after_map {
            if !before_map.contains_key(key) {
                result.new_paths.push((*path).clone());
            }
        }
        for (key, path) in &before_map {
            if !after_map.contains_key(key) {
                result.broken_paths.push((*path).clone());
            }
        }

        let gained: f64 = result.new_paths.iter().map(|p| p.risk_score).sum();
        let lost: f64 = result.broken_paths.iter().map(|p| p.risk_score).sum();
        result.risk_delta = gained - lost;

        for path in &result.new_paths {
            if let Some(viz) = &path.visualization_metadata {
                for technique in &viz.escalation_techniques {
                    if technique.edge_type.is_escalation()
                        && !result.new_attack_vectors.contains(&technique.name)
                    {
                        result.new_attack_vectors.push(technique.name.clone());
                    }
                }
            }
        }

        self.recommend(result);
    }

    fn recommend(&self, result: &mut SimulationResult) {
        let critical_cutoff = self
            .analyzer
            .config()
            .analysis
            .risk_thresholds
            .critical;

        if !result.new_paths.is_empty() {
            result.recommendations.push(format!(
                "Review whether {} needs {} on {}: {} new attack path(s) would be created",
                result.member,
                result.role,
                result.resource,
                result.new_paths.len()
            ));
            if result.new_paths.iter().any(|p| p.risk_score >= critical_cutoff) {
                result.recommendations.push(
                    "Change introduces a critical escalation path; consider a narrower role or a conditional binding"
                        .to_string(),
                );
            }
        }
        if !result.broken_paths.is_empty() {
            result.recommendations.push(format!(
                "{} attack path(s) would be eliminated; applying this change reduces exposure",
                result.broken_paths.len()
            ));
        }
        if result.new_paths.is_empty() && result.broken_paths.is_empty() {
            result
                .recommendations
                .push("No change in reachable attack paths".to_string());
        }
    }
}

fn walk_map(result: &AnalysisResult) -> BTreeMap<String, &AttackPath> {
    let mut map = BTreeMap::new();
    for path in result.all_paths() {
        map.entry(path.walk_key()).or_insert(path);
    }
    map
}

/// Normalize a binding member into `(node id, kind)`.
fn member_node_id(member: &str) -> Result<(String, NodeKind), String> {
    if let Some(email) = member.strip_prefix("user:") {
        Ok((format!("user:{email}"), NodeKind::User))
    } else if let Some(email) = member.strip_prefix("serviceAccount:") {
        Ok((format!("sa:{email}"), NodeKind::ServiceAccount))
    } else if let Some(email) = member.strip_prefix("sa:") {
        Ok((format!("sa:{email}"), NodeKind::ServiceAccount))
    } else if let Some(group) = member.strip_prefix("group:") {
        Ok((format!("group:{group}"), NodeKind::Group))
    } else if member.contains('@') && !member.contains(':') {
        if member.ends_with(".gserviceaccount.com") {
            Ok((format!("sa:{member}"), NodeKind::ServiceAccount))
        } else {
            Ok((format!("user:{member}"), NodeKind::User))
        }
    } else {
        Err(format!("unrecognized member '{member}'"))
    }
}

fn apply_addition(graph: &mut IamGraph, member: &str, role: &str, resource: &str) -> Result<(), String> {
    let (member_id, member_kind) = member_node_id(member)?;

    let role_id = format!("role:{role}");
    if !graph.contains(&role_id) && !role.starts_with("roles/") {
        return Err(format!("unknown role '{role}'"));
    }

    let resolvable = synthesis::resource_node_id(resource)
        .map(|id| graph.contains(&id))
        .unwrap_or(false);
    if !resolvable {
        return Err(format!("unknown resource '{resource}'"));
    }

    let name = member_id.split_once(':').map(|(_, n)| n.to_string()).unwrap_or_default();
    graph.ensure_node(Node::new(member_id.clone(), member_kind, name));
    graph.ensure_node(Node::new(role_id.clone(), NodeKind::Role, role));

    let mut props = Map::new();
    props.insert("resource".to_string(), Value::String(resource.to_string()));
    props.insert("role".to_string(), Value::String(role.to_string()));
    graph.upsert_edge(&member_id, &role_id, EdgeKind::HasRole, props);
    Ok(())
}

fn apply_removal(graph: &mut IamGraph, member: &str, role: &str, resource: &str) -> Result<(), String> {
    let (member_id, _) = member_node_id(member)?;
    if !graph.contains(&member_id) {
        return Err(format!("unknown member '{member}'"));
    }

    let role_id = format!("role:{role}");
    let Some(edge) = graph.find_edge(&member_id, &role_id, EdgeKind::HasRole) else {
        return Err(format!("no binding of '{role}' to '{member}'"));
    };
    let bound_resource = edge.properties.get("resource").and_then(Value::as_str);
    if bound_resource != Some(resource) {
        return Err(format!(
            "no binding of '{role}' to '{member}' on '{resource}'"
        ));
    }

    graph.remove_edge(&member_id, &role_id, EdgeKind::HasRole);
    Ok(())
}
