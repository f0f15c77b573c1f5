//! Error types for reprise-core configuration

use std::time::Duration;

use thiserror::Error;

/// Result type alias using reprise-core's configuration error type
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors raised while configuring runners, builders and delay strategies
///
/// These are always returned synchronously at configuration time, never from
/// inside an attempt loop.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Retry limit outside the accepted range
    #[error("Invalid retry limit: {limit}. A runner needs at least one attempt")]
    InvalidRetryLimit { limit: u32 },

    /// Delay duration outside the accepted range
    #[error("Invalid delay: {delay:?}. Delay strategies need a positive duration")]
    InvalidDelay { delay: Duration },

    /// Invalid configuration value
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml_ng::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    /// Create an invalid retry limit error
    pub fn invalid_retry_limit(limit: u32) -> Self {
        Self::InvalidRetryLimit { limit }
    }

    /// Create an invalid delay error
    pub fn invalid_delay(delay: Duration) -> Self {
        Self::InvalidDelay { delay }
    }

    /// Create an invalid config error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a config not found error
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    /// Whether the error rejects an argument value (as opposed to I/O or parsing)
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            Self::InvalidRetryLimit { .. } | Self::InvalidDelay { .. } | Self::InvalidConfig { .. }
        )
    }
}
