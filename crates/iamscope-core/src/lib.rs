//! iamscope-core: Shared types, configuration, and error handling for iamscope.
//!
//! This crate provides the foundational types used across all iamscope components:
//! - Node kinds (users, service accounts, projects, roles, resources) for the IAM graph
//! - Edge kinds (structural bindings, derived escalation capabilities, audit confirmations)
//! - Attack path and risk scoring primitives
//! - Configuration management
//! - Common error types

pub mod config;
pub mod error;
pub mod types;

pub use config::IamscopeConfig;
pub use error::IamscopeError;
