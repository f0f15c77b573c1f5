//! Retry configuration documents

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::retry::{
    BackoffDelay, DelayStrategy, DelayStrategyExt, FibonacciDelay, FixedDelay, NoDelay,
    DEFAULT_RETRY_LIMIT,
};

/// Retry policy configurations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetryPoliciesConfig {
    /// Default retry policy
    #[serde(default)]
    pub default: RetryConfig,

    /// Per-operation retry policies
    #[serde(default)]
    pub operations: HashMap<String, RetryConfig>,
}

impl RetryPoliciesConfig {
    /// The policy for a named operation, falling back to the default
    pub fn for_operation(&self, name: &str) -> &RetryConfig {
        self.operations.get(name).unwrap_or(&self.default)
    }

    /// Validate the default and every named policy
    pub fn validate(&self) -> Result<()> {
        self.default.validate()?;
        for (name, config) in &self.operations {
            config.validate().map_err(|e| {
                ConfigError::invalid_config(format!("retry policy '{}': {}", name, e))
            })?;
        }
        Ok(())
    }

    /// Overlay another document: its default wins, its operations are merged in
    pub fn merge(mut self, overlay: RetryPoliciesConfig) -> Self {
        for (name, config) in overlay.operations {
            self.operations.insert(name, config);
        }
        self.default = overlay.default;
        self
    }
}

/// Retry settings for one runner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RetryConfig {
    /// Maximum number of attempts
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay strategy between attempts
    #[serde(default)]
    pub strategy: DelayKind,

    /// Base delay in milliseconds
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,

    /// Upper bound on any single delay, in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,

    /// Add up to 25% random extra delay
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            strategy: DelayKind::default(),
            delay_ms: default_delay_ms(),
            max_delay_ms: None,
            jitter: false,
        }
    }
}

fn default_max_attempts() -> u32 {
    DEFAULT_RETRY_LIMIT
}
fn default_delay_ms() -> u64 {
    1000
}

impl RetryConfig {
    /// Check the document can configure a runner
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid_retry_limit(self.max_attempts));
        }
        if self.strategy != DelayKind::None && self.delay_ms == 0 {
            return Err(ConfigError::invalid_delay(Duration::ZERO));
        }
        if self.max_delay_ms == Some(0) {
            return Err(ConfigError::invalid_config("max-delay-ms must be positive"));
        }
        Ok(())
    }

    /// Build the delay strategy this document describes
    pub fn delay_strategy(&self) -> Result<Arc<dyn DelayStrategy>> {
        let mut strategy: Box<dyn DelayStrategy> = match self.strategy {
            DelayKind::None => return Ok(Arc::new(NoDelay)),
            DelayKind::Fixed => Box::new(FixedDelay::from_millis(self.delay_ms)?),
            DelayKind::Backoff => Box::new(BackoffDelay::from_millis(self.delay_ms)?),
            DelayKind::Fibonacci => Box::new(FibonacciDelay::from_millis(self.delay_ms)?),
        };

        if let Some(max) = self.max_delay_ms {
            strategy = Box::new(strategy.capped(Duration::from_millis(max)));
        }
        if self.jitter {
            strategy = Box::new(strategy.jittered());
        }

        Ok(Arc::from(strategy))
    }
}

/// Named delay strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DelayKind {
    /// Retry immediately
    #[default]
    None,

    /// Constant delay
    Fixed,

    /// Doubling delay
    Backoff,

    /// Fibonacci-growing delay
    Fibonacci,
}

impl std::str::FromStr for DelayKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(DelayKind::None),
            "fixed" => Ok(DelayKind::Fixed),
            "backoff" => Ok(DelayKind::Backoff),
            "fibonacci" => Ok(DelayKind::Fibonacci),
            other => Err(ConfigError::invalid_config(format!(
                "unknown delay strategy '{}' (expected none, fixed, backoff or fibonacci)",
                other
            ))),
        }
    }
}
