//! iamscope-analyze: Attack path computation over the IAM graph.
//!
//! Enumerates single- and multi-step escalation chains, detects lateral
//! movement between projects, scores nodes, identifies structural
//! chokepoints via betweenness centrality, and surfaces vulnerability
//! patterns. Pure over the graph: analyzing the same graph twice yields the
//! same result.

pub mod analyzer;
pub mod centrality;
pub mod paths;
pub mod result;
pub mod techniques;

pub use analyzer::PathAnalyzer;
pub use result::{AnalysisResult, CriticalNode, PathCategory, RiskScore, Statistics, Vulnerability};
