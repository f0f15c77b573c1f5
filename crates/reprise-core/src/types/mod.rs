//! Configuration types

mod retry_config;

pub use retry_config::{DelayKind, RetryConfig, RetryPoliciesConfig};
