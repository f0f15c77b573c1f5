//! Retry configuration loader
//!
//! Loads retry policies with the following precedence (low to high):
//! 1. Built-in defaults
//! 2. A YAML document (`default` policy plus named `operations`)
//! 3. Environment variables (REPRISE_* prefix), applied to the default policy

use crate::error::{ConfigError, Result};
use crate::types::{DelayKind, RetryPoliciesConfig};
use camino::{Utf8Path, Utf8PathBuf};
use std::env;
use std::fs;

/// Environment variable overriding the default policy's attempt limit
pub const ENV_MAX_ATTEMPTS: &str = "REPRISE_MAX_ATTEMPTS";
/// Environment variable overriding the default policy's delay strategy
pub const ENV_DELAY_STRATEGY: &str = "REPRISE_DELAY_STRATEGY";
/// Environment variable overriding the default policy's base delay
pub const ENV_DELAY_MS: &str = "REPRISE_DELAY_MS";
/// Environment variable overriding the default policy's delay cap
pub const ENV_MAX_DELAY_MS: &str = "REPRISE_MAX_DELAY_MS";
/// Environment variable toggling jitter on the default policy
pub const ENV_JITTER: &str = "REPRISE_JITTER";

/// Loader for a retry policies document
#[derive(Debug, Clone)]
pub struct RetryConfigLoader {
    path: Utf8PathBuf,
}

impl RetryConfigLoader {
    /// Create a loader for the document at `path`
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the document
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Load the document; a missing file is an error
    pub fn load(&self) -> Result<RetryPoliciesConfig> {
        if !self.path.exists() {
            return Err(ConfigError::config_not_found(self.path.as_str()));
        }

        let config = self.load_yaml_file()?;
        Self::finish(config)
    }

    /// Load the document, falling back to built-in defaults when it is missing
    pub fn load_or_default(&self) -> Result<RetryPoliciesConfig> {
        let config = if self.path.exists() {
            self.load_yaml_file()?
        } else {
            tracing::debug!(path = %self.path, "retry config not found, using defaults");
            RetryPoliciesConfig::default()
        };
        Self::finish(config)
    }

    /// Parse a document from a string, without environment overrides
    pub fn from_yaml_str(content: &str) -> Result<RetryPoliciesConfig> {
        let config: RetryPoliciesConfig = serde_yaml_ng::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply REPRISE_* overrides, then validate
    fn finish(config: RetryPoliciesConfig) -> Result<RetryPoliciesConfig> {
        let config = Self::apply_env_overrides(config)?;
        config.validate()?;
        Ok(config)
    }

    fn load_yaml_file(&self) -> Result<RetryPoliciesConfig> {
        let content = fs::read_to_string(&self.path)?;
        let config = serde_yaml_ng::from_str(&content).map_err(|e| {
            ConfigError::invalid_config(format!("Failed to parse {}: {}", self.path, e))
        })?;
        tracing::debug!(path = %self.path, "loaded retry config");
        Ok(config)
    }

    /// Apply environment variable overrides to the default policy
    pub fn apply_env_overrides(mut config: RetryPoliciesConfig) -> Result<RetryPoliciesConfig> {
        let policy = &mut config.default;

        if let Ok(val) = env::var(ENV_MAX_ATTEMPTS) {
            policy.max_attempts = val.trim().parse().map_err(|_| {
                ConfigError::invalid_config("REPRISE_MAX_ATTEMPTS must be a positive number")
            })?;
        }

        if let Ok(val) = env::var(ENV_DELAY_STRATEGY) {
            policy.strategy = val.parse::<DelayKind>()?;
        }

        if let Ok(val) = env::var(ENV_DELAY_MS) {
            policy.delay_ms = val
                .trim()
                .parse()
                .map_err(|_| ConfigError::invalid_config("REPRISE_DELAY_MS must be a valid number"))?;
        }

        if let Ok(val) = env::var(ENV_MAX_DELAY_MS) {
            policy.max_delay_ms = Some(val.trim().parse().map_err(|_| {
                ConfigError::invalid_config("REPRISE_MAX_DELAY_MS must be a valid number")
            })?);
        }

        if let Ok(val) = env::var(ENV_JITTER) {
            policy.jitter = val.trim().parse().unwrap_or(false);
        }

        Ok(config)
    }
}
