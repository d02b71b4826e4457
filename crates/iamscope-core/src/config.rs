//! Configuration management for iamscope.
//!
//! Configuration is loaded from (in priority order):
//! 1. Environment variables (IAMSCOPE__ prefix)
//! 2. Config file (iamscope.toml)
//! 3. Defaults

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::IamscopeError;
use crate::types::RiskLevel;

/// Top-level iamscope configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IamscopeConfig {
    #[serde(default)]
    pub analysis: AnalysisConfig,

    #[serde(default)]
    pub visualization: VisualizationConfig,
}

impl IamscopeConfig {
    /// Load configuration from `<file_prefix>.toml` (optional) layered under
    /// `IAMSCOPE__`-prefixed environment variables.
    pub fn load(file_prefix: &str) -> Result<Self, IamscopeError> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("IAMSCOPE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| IamscopeError::Config(e.to_string()))?;

        cfg.try_deserialize()
            .map_err(|e| IamscopeError::Config(e.to_string()))
    }
}

/// Analysis tuning knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    /// Upper bound on path length (in edges) for multi-step enumeration and
    /// point queries. Simple-path enumeration is exponential; this bound is
    /// enforced strictly.
    #[serde(default = "default_max_path_length")]
    pub max_path_length: usize,

    /// Role names that contribute to node risk and vulnerability detection.
    #[serde(default = "default_dangerous_roles")]
    pub dangerous_roles: Vec<String>,

    /// Email domains considered internal. Empty disables the
    /// external-principal check.
    #[serde(default)]
    pub trusted_domains: Vec<String>,

    /// Cutoffs for bucketing risk scores into levels.
    #[serde(default)]
    pub risk_thresholds: RiskThresholds,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_path_length: default_max_path_length(),
            dangerous_roles: default_dangerous_roles(),
            trusted_domains: Vec::new(),
            risk_thresholds: RiskThresholds::default(),
        }
    }
}

/// Risk-level cutoffs.
#[derive(Debug, Clone, Deserialize)]
pub struct RiskThresholds {
    #[serde(default = "default_critical")]
    pub critical: f64,
    #[serde(default = "default_high")]
    pub high: f64,
    #[serde(default = "default_medium")]
    pub medium: f64,
    #[serde(default = "default_low")]
    pub low: f64,
}

impl RiskThresholds {
    /// Bucket a `[0.0, 1.0]` risk score.
    pub fn bucket(&self, score: f64) -> RiskLevel {
        if score >= self.critical {
            RiskLevel::Critical
        } else if score >= self.high {
            RiskLevel::High
        } else if score >= self.medium {
            RiskLevel::Medium
        } else if score >= self.low {
            RiskLevel::Low
        } else {
            RiskLevel::Info
        }
    }
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            critical: default_critical(),
            high: default_high(),
            medium: default_medium(),
            low: default_low(),
        }
    }
}

/// Display options passed through to external renderers.
#[derive(Debug, Clone, Deserialize)]
pub struct VisualizationConfig {
    #[serde(default = "default_node_colors")]
    pub node_colors: BTreeMap<String, String>,

    #[serde(default = "default_edge_colors")]
    pub edge_colors: BTreeMap<String, String>,

    #[serde(default = "default_attack_path_color")]
    pub attack_path_color: String,
}

impl Default for VisualizationConfig {
    fn default() -> Self {
        Self {
            node_colors: default_node_colors(),
            edge_colors: default_edge_colors(),
            attack_path_color: default_attack_path_color(),
        }
    }
}

fn default_max_path_length() -> usize {
    5
}

fn default_dangerous_roles() -> Vec<String> {
    [
        "roles/owner",
        "roles/editor",
        "roles/iam.securityAdmin",
        "roles/resourcemanager.organizationAdmin",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_critical() -> f64 {
    0.8
}

fn default_high() -> f64 {
    0.6
}

fn default_medium() -> f64 {
    0.4
}

fn default_low() -> f64 {
    0.2
}

fn default_node_colors() -> BTreeMap<String, String> {
    [
        ("user", "#4285F4"),
        ("service_account", "#34A853"),
        ("group", "#FBBC04"),
        ("project", "#EA4335"),
        ("folder", "#FF6D00"),
        ("organization", "#9C27B0"),
        ("role", "#757575"),
        ("custom_role", "#616161"),
        ("resource", "#00ACC1"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_edge_colors() -> BTreeMap<String, String> {
    [
        ("has_role", "#757575"),
        ("member_of", "#9E9E9E"),
        ("parent_of", "#BDBDBD"),
        ("runs_as", "#FF9800"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_attack_path_color() -> String {
    "#FF0000".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_analysis_config() {
        let config = AnalysisConfig::default();
        assert_eq!(config.max_path_length, 5);
        assert!(config.dangerous_roles.contains(&"roles/owner".to_string()));
        assert!(config.trusted_domains.is_empty());
    }

    #[test]
    fn threshold_bucketing() {
        let thresholds = RiskThresholds::default();
        assert_eq!(thresholds.bucket(0.95), RiskLevel::Critical);
        assert_eq!(thresholds.bucket(0.8), RiskLevel::Critical);
        assert_eq!(thresholds.bucket(0.7), RiskLevel::High);
        assert_eq!(thresholds.bucket(0.5), RiskLevel::Medium);
        assert_eq!(thresholds.bucket(0.3), RiskLevel::Low);
        assert_eq!(thresholds.bucket(0.1), RiskLevel::Info);
    }

    #[test]
    fn default_colors_present() {
        let viz = VisualizationConfig::default();
        assert_eq!(viz.node_colors.get("user").map(String::as_str), Some("#4285F4"));
        assert_eq!(viz.attack_path_color, "#FF0000");
    }

    #[test]
    fn config_deserializes_partial_toml() {
        let raw = r#"
            [analysis]
            max_path_length = 3
            dangerous_roles = ["roles/owner"]
        "#;
        let parsed: IamscopeConfig = toml_like(raw);
        assert_eq!(parsed.analysis.max_path_length, 3);
        assert_eq!(parsed.analysis.dangerous_roles, vec!["roles/owner"]);
        // Unspecified sections fall back to defaults.
        assert!((parsed.analysis.risk_thresholds.critical - 0.8).abs() < f64::EPSILON);
    }

    fn toml_like(raw: &str) -> IamscopeConfig {
        config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }
}
