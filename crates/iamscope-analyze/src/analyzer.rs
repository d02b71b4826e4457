//! The attack-path analyzer.
//!
//! `analyze_all_paths` orchestrates: single-step escalation enumeration,
//! multi-step chain discovery, lateral-movement detection, node risk
//! scoring, critical-node identification, and vulnerability detection.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::{debug, info};
use uuid::Uuid;

use iamscope_core::config::IamscopeConfig;
use iamscope_core::types::{
    AttackPath, Edge, EdgeKind, Node, NodeKind, VisualizationMetadata,
};
use iamscope_graph::IamGraph;

use crate::centrality;
use crate::paths::{self, RawWalk};
use crate::result::{
    AnalysisResult, CriticalNode, PathCategory, RiskScore, Statistics, Vulnerability,
};
use crate::techniques;

/// Roles whose holders are worth reaching: targets for multi-step
/// enumeration.
const HIGH_VALUE_ROLES: &[&str] = &[
    "roles/owner",
    "roles/editor",
    "roles/iam.securityAdmin",
    "roles/iam.serviceAccountAdmin",
    "roles/iam.serviceAccountTokenCreator",
    "roles/resourcemanager.organizationAdmin",
    "roles/resourcemanager.folderAdmin",
    "roles/resourcemanager.projectIamAdmin",
];

const IDENTITY_PREFIXES: &[&str] = &["user:", "sa:", "group:"];

/// Analyzes the graph for attack paths and security risks.
pub struct PathAnalyzer {
    config: IamscopeConfig,
}

impl Default for PathAnalyzer {
    fn default() -> Self {
        Self::new(IamscopeConfig::default())
    }
}

impl PathAnalyzer {
    pub fn new(config: IamscopeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &IamscopeConfig {
        &self.config
    }

    /// Perform comprehensive path analysis. Pure over the graph.
    pub fn analyze_all_paths(&self, graph: &IamGraph) -> AnalysisResult {
        info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "starting path analysis"
        );

        let mut attack_paths: BTreeMap<PathCategory, Vec<AttackPath>> = BTreeMap::new();
        self.single_step_paths(graph, &mut attack_paths);
        self.multi_step_paths(graph, &mut attack_paths);
        self.lateral_movement_paths(graph, &mut attack_paths);

        let risk_scores = self.node_risk_scores(graph);
        let critical_nodes = self.critical_nodes(graph, &risk_scores);
        let vulnerabilities = self.detect_vulnerabilities(graph);

        let total_attack_paths = attack_paths.values().map(Vec::len).sum();
        let statistics = Statistics {
            total_nodes: graph.node_count(),
            total_edges: graph.edge_count(),
            total_attack_paths,
            privilege_escalation_paths: attack_paths
                .get(&PathCategory::PrivilegeEscalation)
                .map_or(0, Vec::len),
            lateral_movement_paths: attack_paths
                .get(&PathCategory::LateralMovement)
                .map_or(0, Vec::len),
            critical_nodes: critical_nodes.len(),
            vulnerabilities: vulnerabilities.len(),
            high_risk_nodes: risk_scores.values().filter(|r| r.total > 0.7).count(),
        };

        info!(paths = total_attack_paths, "path analysis complete");

        AnalysisResult {
            attack_paths,
            risk_scores,
            critical_nodes,
            vulnerabilities,
            statistics,
        }
    }

    /// All bounded attack paths from one identity to every service account.
    pub fn find_paths_from_identity(&self, graph: &IamGraph, identity_id: &str) -> Vec<AttackPath> {
        let Some(source) = graph.index_of(identity_id) else {
            return Vec::new();
        };
        let targets: HashSet<usize> = graph
            .nodes()
            .iter()
            .enumerate()
            .filter(|(idx, n)| n.id.starts_with("sa:") && *idx != source)
            .map(|(idx, _)| idx)
            .collect();

        paths::all_simple_paths(graph, source, &targets, self.config.analysis.max_path_length)
            .iter()
            .filter_map(|walk| self.build_walk_path(graph, walk))
            .collect()
    }

    // ── Single-step escalation (one path per escalation edge) ─────

    fn single_step_paths(
        &self,
        graph: &IamGraph,
        attack_paths: &mut BTreeMap<PathCategory, Vec<AttackPath>>,
    ) {
        let mut count = 0;
        for (src, pos, edge) in graph.edges() {
            if !edge.kind.is_escalation() {
                continue;
            }
            let walk = RawWalk {
                node_indices: vec![src, edge.target],
                edges: vec![(src, pos)],
            };
            let Some(mut path) = self.build_walk_path(graph, &walk) else {
                continue;
            };

            let mut description = format!(
                "{}: {} -> {}",
                edge.kind,
                graph.node(src).id,
                graph.node(edge.target).id
            );
            if let Some(via_role) = edge.properties.get("via_role").and_then(|v| v.as_str()) {
                description.push_str(&format!(" (via {via_role})"));
            }
            path.description = description;

            let category = match edge.kind {
                EdgeKind::CanImpersonateSa | EdgeKind::CanCreateServiceAccountKey => {
                    PathCategory::Critical
                }
                EdgeKind::CanDeployFunctionAs | EdgeKind::CanDeployCloudRunAs => PathCategory::High,
                _ => PathCategory::Medium,
            };
            attack_paths.entry(category).or_default().push(path);
            count += 1;
        }
        debug!(count, "enumerated single-step escalation paths");
    }

    // ── Multi-step escalation ─────────────────────────────────────

    fn multi_step_paths(
        &self,
        graph: &IamGraph,
        attack_paths: &mut BTreeMap<PathCategory, Vec<AttackPath>>,
    ) {
        let identities: Vec<usize> = graph
            .nodes()
            .iter()
            .enumerate()
            .filter(|(_, n)| IDENTITY_PREFIXES.iter().any(|p| n.id.starts_with(p)))
            .map(|(idx, _)| idx)
            .collect();

        let targets: HashSet<usize> = graph
            .nodes()
            .iter()
            .enumerate()
            .filter(|(_, n)| {
                n.id.starts_with("sa:")
                    || (n.id.starts_with("role:")
                        && HIGH_VALUE_ROLES.iter().any(|r| n.id.contains(r)))
                    || n.id.starts_with("project:")
                    || n.id.starts_with("folder:")
                    || n.id.starts_with("org:")
            })
            .map(|(idx, _)| idx)
            .collect();

        debug!(
            identities = identities.len(),
            targets = targets.len(),
            "enumerating multi-step paths"
        );

        let max_edges = self.config.analysis.max_path_length;
        let mut multi_step_count = 0;

        for &identity in &identities {
            for walk in paths::all_simple_paths(graph, identity, &targets, max_edges) {
                let escalation_kinds: Vec<EdgeKind> = walk
                    .edges
                    .iter()
                    .map(|&(src, pos)| graph.out_edges(src)[pos].kind)
                    .filter(EdgeKind::is_escalation)
                    .collect();

                match escalation_kinds.len() {
                    0 => {}
                    1 => {
                        if let Some(path) = self.build_walk_path(graph, &walk) {
                            attack_paths
                                .entry(PathCategory::PrivilegeEscalation)
                                .or_default()
                                .push(path);
                        }
                    }
                    steps => {
                        if let Some(mut path) = self.build_walk_path(graph, &walk) {
                            path.risk_score = (0.85 + 0.05 * (steps as f64 - 2.0)).min(1.0);
                            let step_list: Vec<String> = escalation_kinds
                                .iter()
                                .enumerate()
                                .map(|(i, kind)| format!("Step {}: {kind}", i + 1))
                                .collect();
                            path.description = format!(
                                "Multi-step attack ({steps} steps): {}",
                                step_list.join(" → ")
                            );
                            attack_paths
                                .entry(PathCategory::CriticalMultiStep)
                                .or_default()
                                .push(path);
                            multi_step_count += 1;
                        }
                    }
                }
            }
        }

        debug!(count = multi_step_count, "found multi-step attack paths");
    }

    // ── Lateral movement ──────────────────────────────────────────

    fn lateral_movement_paths(
        &self,
        graph: &IamGraph,
        attack_paths: &mut BTreeMap<PathCategory, Vec<AttackPath>>,
    ) {
        let projects: Vec<usize> = graph
            .nodes()
            .iter()
            .enumerate()
            .filter(|(_, n)| n.kind == NodeKind::Project)
            .map(|(idx, _)| idx)
            .collect();

        for (i, &p1) in projects.iter().enumerate() {
            let ids1 = self.identity_predecessors(graph, p1);
            for &p2 in &projects[i + 1..] {
                let ids2 = self.identity_predecessors(graph, p2);
                for &identity in ids1.intersection(&ids2) {
                    let Some(e1) = graph.edge_between(identity, p1) else {
                        continue;
                    };
                    let Some(e2) = graph.edge_between(identity, p2) else {
                        continue;
                    };

                    let path_nodes = vec![
                        graph.node(identity).clone(),
                        graph.node(p1).clone(),
                        graph.node(identity).clone(),
                        graph.node(p2).clone(),
                    ];
                    let path_edges = vec![
                        graph.materialize_edge(identity, e1),
                        graph.materialize_edge(identity, e2),
                    ];
                    let risk_score = intrinsic_path_risk(&path_edges);
                    let description = format!(
                        "Lateral movement: {} can pivot between {} and {}",
                        graph.node(identity).display_name(),
                        graph.node(p1).display_name(),
                        graph.node(p2).display_name()
                    );
                    let visualization_metadata =
                        Some(self.visualization_for(&path_nodes, &path_edges));

                    attack_paths
                        .entry(PathCategory::LateralMovement)
                        .or_default()
                        .push(AttackPath {
                            id: Uuid::new_v4(),
                            source_node: path_nodes[0].clone(),
                            target_node: path_nodes[3].clone(),
                            path_nodes,
                            path_edges,
                            risk_score,
                            description,
                            visualization_metadata,
                        });
                }
            }
        }
    }

    fn identity_predecessors(&self, graph: &IamGraph, project: usize) -> BTreeSet<usize> {
        graph
            .in_edges(project)
            .iter()
            .map(|&(src, _)| src)
            .filter(|&src| {
                let id = &graph.node(src).id;
                IDENTITY_PREFIXES.iter().any(|p| id.starts_with(p))
            })
            .collect()
    }

    // ── Node risk scoring ─────────────────────────────────────────

    fn node_risk_scores(&self, graph: &IamGraph) -> BTreeMap<String, RiskScore> {
        let degree = centrality::degree_centrality(graph);
        let dangerous = &self.config.analysis.dangerous_roles;

        graph
            .nodes()
            .iter()
            .enumerate()
            .map(|(idx, node)| {
                let mut base = match node.kind {
                    NodeKind::Organization => 0.3,
                    NodeKind::Folder => 0.25,
                    NodeKind::Project => 0.2,
                    NodeKind::ServiceAccount => 0.1,
                    _ => 0.0,
                };
                if matches!(node.kind, NodeKind::Role | NodeKind::CustomRole)
                    && dangerous.iter().any(|d| node.id.contains(d.as_str()))
                {
                    base += 0.5;
                }
                let centrality = degree[idx];
                let total = (base + 0.2 * centrality).min(1.0);
                (
                    node.id.clone(),
                    RiskScore {
                        base,
                        centrality,
                        total,
                    },
                )
            })
            .collect()
    }

    // ── Critical nodes ────────────────────────────────────────────

    fn critical_nodes(
        &self,
        graph: &IamGraph,
        risk_scores: &BTreeMap<String, RiskScore>,
    ) -> Vec<CriticalNode> {
        let betweenness = centrality::betweenness_centrality(graph);

        let mut ranked: Vec<(usize, f64)> = betweenness.into_iter().enumerate().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| graph.node(a.0).id.cmp(&graph.node(b.0).id))
        });

        ranked
            .into_iter()
            .take(20)
            .filter(|&(_, c)| c > 0.1)
            .map(|(idx, c)| {
                let node = graph.node(idx);
                CriticalNode {
                    node_id: node.id.clone(),
                    centrality: c,
                    kind: node.kind,
                    risk_score: risk_scores.get(&node.id).map_or(0.0, |r| r.total),
                }
            })
            .collect()
    }

    // ── Vulnerability detection ───────────────────────────────────

    fn detect_vulnerabilities(&self, graph: &IamGraph) -> Vec<Vulnerability> {
        let mut vulnerabilities = Vec::new();
        let dangerous = &self.config.analysis.dangerous_roles;
        let trusted = &self.config.analysis.trusted_domains;

        for (idx, node) in graph.nodes().iter().enumerate() {
            if node.id.starts_with("sa:") {
                let bad_roles = self.dangerous_role_neighbors(graph, idx, dangerous);
                if !bad_roles.is_empty() {
                    vulnerabilities.push(Vulnerability {
                        vuln_type: "overprivileged_service_account".to_string(),
                        severity: "high".to_string(),
                        resource: node.id.clone(),
                        details: format!(
                            "Service account has {} dangerous roles",
                            bad_roles.len()
                        ),
                        roles: bad_roles,
                    });
                }
            } else if node.id.starts_with("user:") && node.id.contains('@') && !trusted.is_empty() {
                let email = node.id.trim_start_matches("user:");
                let external = email
                    .rsplit_once('@')
                    .map(|(_, domain)| !trusted.iter().any(|t| t == domain))
                    .unwrap_or(false);
                if external {
                    let bad_roles = self.dangerous_role_neighbors(graph, idx, dangerous);
                    if !bad_roles.is_empty() {
                        vulnerabilities.push(Vulnerability {
                            vuln_type: "external_user_high_privilege".to_string(),
                            severity: "critical".to_string(),
                            resource: node.id.clone(),
                            details: format!(
                                "External user has {} dangerous roles",
                                bad_roles.len()
                            ),
                            roles: bad_roles,
                        });
                    }
                }
            }
        }

        vulnerabilities
    }

    fn dangerous_role_neighbors(
        &self,
        graph: &IamGraph,
        idx: usize,
        dangerous: &[String],
    ) -> Vec<String> {
        graph
            .out_edges(idx)
            .iter()
            .filter(|e| e.kind == EdgeKind::HasRole)
            .map(|e| graph.node(e.target).id.clone())
            .filter(|role_id| dangerous.iter().any(|d| role_id.contains(d.as_str())))
            .collect()
    }

    // ── Path construction ─────────────────────────────────────────

    /// Build an [`AttackPath`] (with visualization metadata) from a raw
    /// walk. Returns `None` for degenerate walks.
    pub fn build_walk_path(&self, graph: &IamGraph, walk: &RawWalk) -> Option<AttackPath> {
        if walk.node_indices.len() < 2 || walk.edges.is_empty() {
            return None;
        }

        let path_nodes: Vec<Node> = walk
            .node_indices
            .iter()
            .map(|&idx| graph.node(idx).clone())
            .collect();
        let path_edges: Vec<Edge> = walk
            .edges
            .iter()
            .map(|&(src, pos)| graph.materialize_edge(src, &graph.out_edges(src)[pos]))
            .collect();

        let risk_score = intrinsic_path_risk(&path_edges);
        let visualization_metadata = self.visualization_for(&path_nodes, &path_edges);

        let description = {
            let mut parts = vec![format!(
                "Attack path from {} to {}",
                path_nodes.first()?.display_name(),
                path_nodes.last()?.display_name()
            )];
            for (i, technique) in visualization_metadata.escalation_techniques.iter().enumerate() {
                parts.push(format!(
                    "Step {}: {} ({})",
                    i + 1,
                    technique.name,
                    technique.permission
                ));
            }
            parts.join(" | ")
        };

        Some(AttackPath {
            id: Uuid::new_v4(),
            source_node: path_nodes.first()?.clone(),
            target_node: path_nodes.last()?.clone(),
            path_nodes,
            path_edges,
            risk_score,
            description,
            visualization_metadata: Some(visualization_metadata),
        })
    }

    fn visualization_for(&self, nodes: &[Node], edges: &[Edge]) -> VisualizationMetadata {
        let viz = &self.config.visualization;
        let thresholds = &self.config.analysis.risk_thresholds;

        let escalation_techniques: Vec<_> = edges
            .iter()
            .map(|e| techniques::technique_for(e.kind, &e.properties))
            .collect();

        let permissions_used: Vec<String> = edges
            .iter()
            .map(|e| {
                e.properties
                    .get("via_role")
                    .or_else(|| e.properties.get("permission"))
                    .and_then(|v| v.as_str())
                    .map(String::from)
                    .unwrap_or_else(|| techniques::infer_permission(e.kind).to_string())
            })
            .collect();

        let node_metadata = nodes
            .iter()
            .map(|n| iamscope_core::types::NodeDisplay {
                id: n.id.clone(),
                label: n.display_name(),
                kind: n.kind,
                icon: techniques::node_icon(n.kind).to_string(),
                color: techniques::node_color(n.kind, viz),
                risk_level: thresholds.bucket(n.risk_score()),
                properties: n.properties.clone(),
            })
            .collect();

        let edge_metadata = edges
            .iter()
            .map(|e| iamscope_core::types::EdgeDisplay {
                source: e.source_id.clone(),
                target: e.target_id.clone(),
                kind: e.kind,
                label: techniques::edge_label(e.kind, &e.properties),
                color: techniques::edge_color(e.kind, viz),
                risk_score: e.risk_score(),
                properties: e.properties.clone(),
            })
            .collect();

        let attack_summary = {
            let source = nodes.first().map(Node::display_name).unwrap_or_default();
            let target = nodes.last().map(Node::display_name).unwrap_or_default();
            let names: Vec<&str> = escalation_techniques
                .iter()
                .map(|t| t.name.as_str())
                .collect();
            if names.len() == 1 {
                format!("{source} can reach {target} via {}", names[0])
            } else {
                format!(
                    "{source} can reach {target} via {} steps: {}",
                    names.len(),
                    names.join(" → ")
                )
            }
        };

        VisualizationMetadata {
            escalation_techniques,
            permissions_used,
            node_metadata,
            edge_metadata,
            attack_summary,
        }
    }
}

/// Risk of a path from its edge kinds: paths containing a token-theft edge
/// are critical outright, deployment-style edges are high, everything else
/// averages out with a ceiling.
pub fn intrinsic_path_risk(edges: &[Edge]) -> f64 {
    if edges.is_empty() {
        return 0.0;
    }
    let has_critical = edges.iter().any(|e| {
        matches!(
            e.kind,
            EdgeKind::CanImpersonateSa | EdgeKind::CanCreateServiceAccountKey
        )
    });
    if has_critical {
        return 0.9;
    }
    let has_high = edges.iter().any(|e| {
        matches!(
            e.kind,
            EdgeKind::CanDeployFunctionAs | EdgeKind::CanDeployCloudRunAs | EdgeKind::CanActAsViaVm
        )
    });
    if has_high {
        return 0.7;
    }
    let average = edges.iter().map(Edge::risk_score).sum::<f64>() / edges.len() as f64;
    if average > 0.6 {
        0.5
    } else {
        average
    }
}
