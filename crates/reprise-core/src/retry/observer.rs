//! Attempt and chain events
//!
//! Runners report every attempt to a [`RetryObserver`]; builders also report
//! hand-overs between steps. [`TracingObserver`] (the default) turns events
//! into structured `tracing` events, [`StatsObserver`] counts them.

use std::error::Error;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

/// Receiver of runner and builder events
///
/// Attempt numbers are 1-indexed. Only [`RetryObserver::on_attempt`] and
/// [`RetryObserver::on_retry`] are required; the terminal events default to
/// doing nothing.
///
/// # Example
///
/// ```rust
/// use reprise_core::retry::RetryObserver;
/// use std::error::Error;
/// use std::time::Duration;
///
/// struct PrintRetries;
///
/// impl RetryObserver for PrintRetries {
///     fn on_attempt(&self, _attempt: u32, _limit: u32) {}
///
///     fn on_retry(&self, attempt: u32, failure: &dyn Error, pause: Duration) {
///         eprintln!("attempt {attempt} failed ({failure}), next in {pause:?}");
///     }
/// }
/// ```
pub trait RetryObserver: Send + Sync {
    /// An attempt is about to invoke the operation
    fn on_attempt(&self, attempt: u32, limit: u32);

    /// An attempt failed and the runner will pause for `pause` before the next one
    fn on_retry(&self, attempt: u32, failure: &dyn Error, pause: Duration);

    /// An attempt succeeded after `elapsed` in the runner
    fn on_success(&self, attempt: u32, elapsed: Duration) {
        let _ = (attempt, elapsed);
    }

    /// The final allowed attempt failed
    fn on_exhausted(&self, attempts: u32, last: &dyn Error) {
        let _ = (attempts, last);
    }

    /// The error policy declined to retry after `attempt`
    fn on_vetoed(&self, attempt: u32, vetoed: &dyn Error) {
        let _ = (attempt, vetoed);
    }

    /// Cancellation stopped the runner or chain after `attempts` attempts
    fn on_cancelled(&self, attempts: u32) {
        let _ = attempts;
    }

    /// A builder hands over from step `from` to step `to`
    fn on_fallback(&self, from: usize, to: usize) {
        let _ = (from, to);
    }
}

impl<O: RetryObserver + ?Sized> RetryObserver for Arc<O> {
    fn on_attempt(&self, attempt: u32, limit: u32) {
        (**self).on_attempt(attempt, limit)
    }

    fn on_retry(&self, attempt: u32, failure: &dyn Error, pause: Duration) {
        (**self).on_retry(attempt, failure, pause)
    }

    fn on_success(&self, attempt: u32, elapsed: Duration) {
        (**self).on_success(attempt, elapsed)
    }

    fn on_exhausted(&self, attempts: u32, last: &dyn Error) {
        (**self).on_exhausted(attempts, last)
    }

    fn on_vetoed(&self, attempt: u32, vetoed: &dyn Error) {
        (**self).on_vetoed(attempt, vetoed)
    }

    fn on_cancelled(&self, attempts: u32) {
        (**self).on_cancelled(attempts)
    }

    fn on_fallback(&self, from: usize, to: usize) {
        (**self).on_fallback(from, to)
    }
}

/// Ignores every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpObserver;

impl RetryObserver for NoOpObserver {
    fn on_attempt(&self, _attempt: u32, _limit: u32) {}

    fn on_retry(&self, _attempt: u32, _failure: &dyn Error, _pause: Duration) {}
}

/// Logs events through `tracing`, tagged with an operation name
///
/// | event | level |
/// |-------|-------|
/// | attempt | DEBUG |
/// | retry | WARN |
/// | success | DEBUG on the first attempt, INFO after retries |
/// | exhausted | ERROR |
/// | vetoed, cancelled | WARN |
/// | fallback | INFO |
#[derive(Debug, Clone)]
pub struct TracingObserver {
    operation: String,
}

impl TracingObserver {
    /// Observer logging under `operation`
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
        }
    }

    /// Name attached to every event
    pub fn operation(&self) -> &str {
        &self.operation
    }
}

impl Default for TracingObserver {
    fn default() -> Self {
        Self::new("retry")
    }
}

impl RetryObserver for TracingObserver {
    fn on_attempt(&self, attempt: u32, limit: u32) {
        tracing::debug!(operation = %self.operation, attempt, max_attempts = limit, "attempt starting");
    }

    fn on_retry(&self, attempt: u32, failure: &dyn Error, pause: Duration) {
        tracing::warn!(
            operation = %self.operation,
            attempt,
            error = %failure,
            delay_ms = pause.as_millis() as u64,
            "attempt failed, retrying"
        );
    }

    fn on_success(&self, attempt: u32, elapsed: Duration) {
        let elapsed_ms = elapsed.as_millis() as u64;
        if attempt == 1 {
            tracing::debug!(operation = %self.operation, elapsed_ms, "succeeded on first attempt");
        } else {
            tracing::info!(operation = %self.operation, attempt, elapsed_ms, "succeeded after retries");
        }
    }

    fn on_exhausted(&self, attempts: u32, last: &dyn Error) {
        tracing::error!(operation = %self.operation, attempts, error = %last, "retry budget exhausted");
    }

    fn on_vetoed(&self, attempt: u32, vetoed: &dyn Error) {
        tracing::warn!(operation = %self.operation, attempt, error = %vetoed, "retry vetoed by error policy");
    }

    fn on_cancelled(&self, attempts: u32) {
        tracing::warn!(operation = %self.operation, attempts, "retry cancelled");
    }

    fn on_fallback(&self, from: usize, to: usize) {
        tracing::info!(operation = %self.operation, from_step = from, to_step = to, "falling back to next step");
    }
}

/// Point-in-time event counts of a [`StatsObserver`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ObservedStats {
    pub attempts: u32,
    pub retries: u32,
    pub successes: u32,
    pub exhaustions: u32,
    pub vetoes: u32,
    pub cancellations: u32,
    pub fallbacks: u32,
}

/// Counts events; share it through an `Arc` and read it with [`StatsObserver::snapshot`]
#[derive(Debug, Default)]
pub struct StatsObserver {
    counters: [AtomicU32; 7],
}

const ATTEMPTS: usize = 0;
const RETRIES: usize = 1;
const SUCCESSES: usize = 2;
const EXHAUSTIONS: usize = 3;
const VETOES: usize = 4;
const CANCELLATIONS: usize = 5;
const FALLBACKS: usize = 6;

impl StatsObserver {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&self, counter: usize) {
        self.counters[counter].fetch_add(1, Ordering::Relaxed);
    }

    fn read(&self, counter: usize) -> u32 {
        self.counters[counter].load(Ordering::Relaxed)
    }

    /// Current counts
    pub fn snapshot(&self) -> ObservedStats {
        ObservedStats {
            attempts: self.read(ATTEMPTS),
            retries: self.read(RETRIES),
            successes: self.read(SUCCESSES),
            exhaustions: self.read(EXHAUSTIONS),
            vetoes: self.read(VETOES),
            cancellations: self.read(CANCELLATIONS),
            fallbacks: self.read(FALLBACKS),
        }
    }
}

impl RetryObserver for StatsObserver {
    fn on_attempt(&self, _attempt: u32, _limit: u32) {
        self.bump(ATTEMPTS);
    }

    fn on_retry(&self, _attempt: u32, _failure: &dyn Error, _pause: Duration) {
        self.bump(RETRIES);
    }

    fn on_success(&self, _attempt: u32, _elapsed: Duration) {
        self.bump(SUCCESSES);
    }

    fn on_exhausted(&self, _attempts: u32, _last: &dyn Error) {
        self.bump(EXHAUSTIONS);
    }

    fn on_vetoed(&self, _attempt: u32, _vetoed: &dyn Error) {
        self.bump(VETOES);
    }

    fn on_cancelled(&self, _attempts: u32) {
        self.bump(CANCELLATIONS);
    }

    fn on_fallback(&self, _from: usize, _to: usize) {
        self.bump(FALLBACKS);
    }
}
