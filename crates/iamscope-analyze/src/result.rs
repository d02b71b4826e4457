//! Analysis result types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use iamscope_core::types::{AttackPath, NodeKind};

/// Categories an attack path is filed under. A path may appear in several
/// categories at once (single-hop severity and multi-step classification are
/// independent); the duplication is intentional and preserved.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PathCategory {
    Critical,
    High,
    Medium,
    CriticalMultiStep,
    PrivilegeEscalation,
    LateralMovement,
}

impl PathCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::CriticalMultiStep => "critical_multi_step",
            Self::PrivilegeEscalation => "privilege_escalation",
            Self::LateralMovement => "lateral_movement",
        }
    }
}

impl std::fmt::Display for PathCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-node risk decomposition.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RiskScore {
    pub base: f64,
    pub centrality: f64,
    pub total: f64,
}

/// A structural chokepoint: high betweenness centrality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticalNode {
    pub node_id: String,
    pub centrality: f64,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub risk_score: f64,
}

/// A detected misconfiguration pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vulnerability {
    #[serde(rename = "type")]
    pub vuln_type: String,
    pub severity: String,
    pub resource: String,
    pub details: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
}

/// Analysis totals.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Statistics {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub total_attack_paths: usize,
    pub privilege_escalation_paths: usize,
    pub lateral_movement_paths: usize,
    pub critical_nodes: usize,
    pub vulnerabilities: usize,
    pub high_risk_nodes: usize,
}

/// Immutable bundle returned by the analyzer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub attack_paths: BTreeMap<PathCategory, Vec<AttackPath>>,
    pub risk_scores: BTreeMap<String, RiskScore>,
    pub critical_nodes: Vec<CriticalNode>,
    pub vulnerabilities: Vec<Vulnerability>,
    pub statistics: Statistics,
}

impl AnalysisResult {
    /// Every path across all categories.
    pub fn all_paths(&self) -> impl Iterator<Item = &AttackPath> {
        self.attack_paths.values().flatten()
    }

    pub fn paths_in(&self, category: PathCategory) -> &[AttackPath] {
        self.attack_paths
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&PathCategory::CriticalMultiStep).unwrap(),
            "\"critical_multi_step\""
        );
        assert_eq!(
            serde_json::to_string(&PathCategory::LateralMovement).unwrap(),
            "\"lateral_movement\""
        );
    }

    #[test]
    fn category_map_keys_are_strings() {
        let mut result = AnalysisResult::default();
        result.attack_paths.insert(PathCategory::Critical, Vec::new());
        result
            .attack_paths
            .insert(PathCategory::PrivilegeEscalation, Vec::new());

        let json = serde_json::to_value(&result).unwrap();
        assert!(json["attack_paths"].get("critical").is_some());
        assert!(json["attack_paths"].get("privilege_escalation").is_some());
    }

    #[test]
    fn vulnerability_serializes_type_key() {
        let vuln = Vulnerability {
            vuln_type: "overprivileged_service_account".to_string(),
            severity: "high".to_string(),
            resource: "sa:svc@p.iam.gserviceaccount.com".to_string(),
            details: "Service account has 1 dangerous roles".to_string(),
            roles: vec!["role:roles/owner".to_string()],
        };
        let json = serde_json::to_value(&vuln).unwrap();
        assert_eq!(json["type"], "overprivileged_service_account");
        assert_eq!(json["severity"], "high");
    }
}
