//! # reprise-core
//!
//! Core library for Reprise providing:
//! - Retry runners: one operation, a retry budget, delay and outcome policies
//! - Fallback chains ("try, then try") built from runners
//! - Pluggable delay strategies (none, fixed, backoff, fibonacci)
//! - Retry configuration documents (YAML) with environment overrides

pub mod config;
pub mod error;
pub mod retry;
pub mod types;

pub use config::RetryConfigLoader;
pub use error::{ConfigError, Result};
pub use retry::{Builder, Operation, RetryError, RunStatus, Runner};
pub use types::{DelayKind, RetryConfig, RetryPoliciesConfig};
