//! Runner: one operation, one retry budget, one attempt loop
//!
//! A runner drives attempts until one succeeds, the error policy stops it,
//! its retry limit is reached, or cancellation is observed. The blocking
//! [`Runner::run`] and the suspending [`Runner::run_async`] share every
//! decision; they only differ in how the operation and the pause between
//! attempts are awaited.

use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{ConfigError, Result};

use super::delay::{default_delay, sleep_async, sleep_blocking, DelayStrategy};
use super::error::{Failure, RetryError};
use super::observer::{RetryObserver, TracingObserver};
use super::operation::Operation;
use super::policy::{ErrorPolicy, SuccessPolicy};

/// Retry limit of a freshly created runner
pub const DEFAULT_RETRY_LIMIT: u32 = 3;

/// Lifecycle of a runner (and, derived, of a builder)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    /// No attempt has been made
    #[default]
    NotStarted,
    /// The first attempt succeeded
    Success,
    /// An attempt after the first succeeded
    SuccessAfterRetries,
    /// The retry budget was spent or the error policy stopped retrying
    Fail,
    /// Cancellation was observed
    Canceled,
}

impl RunStatus {
    /// Whether the status is final
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::NotStarted)
    }

    /// Whether an attempt succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::SuccessAfterRetries)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStatus::NotStarted => "not-started",
            RunStatus::Success => "success",
            RunStatus::SuccessAfterRetries => "success-after-retries",
            RunStatus::Fail => "fail",
            RunStatus::Canceled => "canceled",
        };
        f.write_str(name)
    }
}

/// What the attempt loop does after settling one attempt
enum Next<T, E> {
    Done(T),
    Stop(RetryError<E>),
    Retry(Duration),
}

/// One configured, retryable attempt loop
///
/// # Example
///
/// ```rust
/// use reprise_core::retry::{Operation, RunStatus, Runner};
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::sync::Arc;
/// use tokio_util::sync::CancellationToken;
///
/// let calls = Arc::new(AtomicU32::new(0));
/// let counter = calls.clone();
/// let mut runner = Runner::new(Operation::function(move || {
///     if counter.fetch_add(1, Ordering::SeqCst) < 1 {
///         Err(std::io::Error::other("not yet"))
///     } else {
///         Ok("ready")
///     }
/// }));
///
/// assert_eq!(runner.run(&CancellationToken::new()).unwrap(), "ready");
/// assert_eq!(runner.status(), RunStatus::SuccessAfterRetries);
/// assert_eq!(runner.attempts(), 2);
/// ```
pub struct Runner<T, E> {
    operation: Operation<T, E>,
    retry_limit: u32,
    delay: Option<Arc<dyn DelayStrategy>>,
    success_policy: Option<SuccessPolicy<T, E>>,
    error_policy: Option<ErrorPolicy<E>>,
    observer: Arc<dyn RetryObserver>,
    attempts: u32,
    status: RunStatus,
    failures: Vec<Arc<Failure<E>>>,
    result: Option<T>,
}

impl<T, E> fmt::Debug for Runner<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("operation", &self.operation)
            .field("retry_limit", &self.retry_limit)
            .field("delay", &self.delay)
            .field("has_success_policy", &self.success_policy.is_some())
            .field("has_error_policy", &self.error_policy.is_some())
            .field("attempts", &self.attempts)
            .field("status", &self.status)
            .field("failures", &self.failures.len())
            .finish()
    }
}

impl<T, E> Runner<T, E> {
    /// Create a runner with the default retry limit and no policies
    pub fn new(operation: Operation<T, E>) -> Self {
        Self {
            operation,
            retry_limit: DEFAULT_RETRY_LIMIT,
            delay: None,
            success_policy: None,
            error_policy: None,
            observer: Arc::new(TracingObserver::default()),
            attempts: 0,
            status: RunStatus::NotStarted,
            failures: Vec::new(),
            result: None,
        }
    }

    /// Set the retry limit, consuming the runner
    pub fn with_retry_limit(mut self, limit: u32) -> Result<Self> {
        self.set_retry_limit(limit)?;
        Ok(self)
    }

    /// Set the maximum number of attempts; zero is rejected
    pub fn set_retry_limit(&mut self, limit: u32) -> Result<()> {
        if limit == 0 {
            return Err(ConfigError::invalid_retry_limit(limit));
        }
        self.retry_limit = limit;
        Ok(())
    }

    /// Set the delay strategy used between attempts
    pub fn set_delay(&mut self, delay: Arc<dyn DelayStrategy>) {
        self.delay = Some(delay);
    }

    /// Fall back to the process-wide default delay
    pub fn clear_delay(&mut self) {
        self.delay = None;
    }

    /// Set the success policy
    pub fn set_success_policy(&mut self, policy: SuccessPolicy<T, E>) {
        self.success_policy = Some(policy);
    }

    /// Set the error policy
    pub fn set_error_policy(&mut self, policy: ErrorPolicy<E>) {
        self.error_policy = Some(policy);
    }

    /// Set the observer notified about attempts
    pub fn set_observer(&mut self, observer: Arc<dyn RetryObserver>) {
        self.observer = observer;
    }

    /// A fresh runner for the same operation with the same settings
    pub fn chained(&self) -> Self {
        self.chained_with(self.operation.clone())
    }

    /// A fresh runner for `operation` with this runner's settings
    ///
    /// Settings are shared, not copied: the new runner's delay, policies and
    /// observer are the same `Arc`s.
    pub fn chained_with(&self, operation: Operation<T, E>) -> Self {
        Self {
            operation,
            retry_limit: self.retry_limit,
            delay: self.delay.clone(),
            success_policy: self.success_policy.clone(),
            error_policy: self.error_policy.clone(),
            observer: Arc::clone(&self.observer),
            attempts: 0,
            status: RunStatus::NotStarted,
            failures: Vec::new(),
            result: None,
        }
    }

    /// The operation this runner invokes
    pub fn operation(&self) -> &Operation<T, E> {
        &self.operation
    }

    /// Maximum number of attempts
    pub fn retry_limit(&self) -> u32 {
        self.retry_limit
    }

    /// Explicit delay strategy, if one was set
    pub fn delay(&self) -> Option<&Arc<dyn DelayStrategy>> {
        self.delay.as_ref()
    }

    /// Success policy, if one was set
    pub fn success_policy(&self) -> Option<&SuccessPolicy<T, E>> {
        self.success_policy.as_ref()
    }

    /// Error policy, if one was set
    pub fn error_policy(&self) -> Option<&ErrorPolicy<E>> {
        self.error_policy.as_ref()
    }

    /// Observer notified about attempts
    pub fn observer(&self) -> &Arc<dyn RetryObserver> {
        &self.observer
    }

    /// Attempts made so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Current status
    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Captured failures, oldest first
    pub fn failures(&self) -> &[Arc<Failure<E>>] {
        &self.failures
    }

    /// Value of the successful attempt, if any
    pub fn result(&self) -> Option<&T> {
        self.result.as_ref()
    }

    /// The delay strategy in effect: explicit, else the process-wide default
    fn effective_delay(&self) -> Arc<dyn DelayStrategy> {
        self.delay.clone().unwrap_or_else(default_delay)
    }

    fn exhausted_error(&self) -> RetryError<E> {
        RetryError::exhausted(self.attempts, self.failures.clone())
    }

    fn cancel(&mut self) -> RetryError<E> {
        self.status = RunStatus::Canceled;
        self.observer.on_cancelled(self.attempts);
        RetryError::cancelled(self.attempts)
    }
}

impl<T, E> Runner<T, E>
where
    T: Clone + Send + 'static,
    E: Error + Send + Sync + 'static,
{
    /// Run the attempt loop on the calling thread
    ///
    /// Blocks for every attempt and every pause. Task operations are driven
    /// with a local executor; use [`Runner::run_async`] for tasks that need
    /// a tokio reactor.
    ///
    /// A runner that already finished is not restarted: its terminal outcome
    /// is returned again without invoking the operation.
    pub fn run(&mut self, token: &CancellationToken) -> std::result::Result<T, RetryError<E>> {
        if let Some(outcome) = self.begin(token) {
            return outcome;
        }

        let delay = self.effective_delay();
        let started = Instant::now();

        while self.attempts < self.retry_limit {
            let attempt = self.start_attempt(token)?;
            let output = self.operation.invoke_blocking(token);

            match self.settle(attempt, output, token, delay.as_ref(), started) {
                Next::Done(value) => return Ok(value),
                Next::Stop(err) => return Err(err),
                Next::Retry(pause) => {
                    if sleep_blocking(pause, token).is_err() {
                        return Err(self.cancel());
                    }
                }
            }
        }

        self.status = RunStatus::Fail;
        Err(self.exhausted_error())
    }

    /// Run the attempt loop, suspending on task operations and pauses
    ///
    /// Blocking operations are invoked inline. Outcomes are identical to
    /// [`Runner::run`].
    pub async fn run_async(
        &mut self,
        token: &CancellationToken,
    ) -> std::result::Result<T, RetryError<E>> {
        if let Some(outcome) = self.begin(token) {
            return outcome;
        }

        let delay = self.effective_delay();
        let started = Instant::now();

        while self.attempts < self.retry_limit {
            let attempt = self.start_attempt(token)?;
            let output = self.operation.invoke_async(token).await;

            match self.settle(attempt, output, token, delay.as_ref(), started) {
                Next::Done(value) => return Ok(value),
                Next::Stop(err) => return Err(err),
                Next::Retry(pause) => {
                    if sleep_async(pause, token).await.is_err() {
                        return Err(self.cancel());
                    }
                }
            }
        }

        self.status = RunStatus::Fail;
        Err(self.exhausted_error())
    }

    /// Replay a finished runner, or stop before the first attempt if already cancelled
    fn begin(
        &mut self,
        token: &CancellationToken,
    ) -> Option<std::result::Result<T, RetryError<E>>> {
        match self.status {
            RunStatus::NotStarted => {}
            RunStatus::Success | RunStatus::SuccessAfterRetries => {
                return Some(self.result.clone().ok_or_else(|| self.exhausted_error()));
            }
            RunStatus::Fail => return Some(Err(self.exhausted_error())),
            RunStatus::Canceled => return Some(Err(RetryError::cancelled(self.attempts))),
        }

        if token.is_cancelled() {
            return Some(Err(self.cancel()));
        }

        None
    }

    fn start_attempt(&mut self, token: &CancellationToken) -> std::result::Result<u32, RetryError<E>> {
        if token.is_cancelled() {
            return Err(self.cancel());
        }

        self.attempts += 1;
        self.observer.on_attempt(self.attempts, self.retry_limit);
        Ok(self.attempts)
    }

    /// Turn one attempt's output into the loop's next move
    fn settle(
        &mut self,
        attempt: u32,
        output: std::result::Result<T, E>,
        token: &CancellationToken,
        delay: &dyn DelayStrategy,
        started: Instant,
    ) -> Next<T, E> {
        let failure = match output {
            // The operation gave up because it saw the token.
            Err(_) if token.is_cancelled() => return Next::Stop(self.cancel()),
            Err(source) => Failure::Operation { attempt, source },
            Ok(value) => {
                let accepted = match &self.success_policy {
                    Some(policy) => policy(&value, attempt),
                    None => Ok(()),
                };
                match accepted {
                    Ok(()) => return Next::Done(self.succeed(value, attempt, started)),
                    Err(source) => Failure::SuccessPolicy { attempt, source },
                }
            }
        };

        self.fail(failure, attempt, delay)
    }

    fn succeed(&mut self, value: T, attempt: u32, started: Instant) -> T {
        self.status = if attempt == 1 {
            RunStatus::Success
        } else {
            RunStatus::SuccessAfterRetries
        };
        self.result = Some(value.clone());
        self.observer.on_success(attempt, started.elapsed());
        value
    }

    fn fail(&mut self, failure: Failure<E>, attempt: u32, delay: &dyn DelayStrategy) -> Next<T, E> {
        let decision = match &self.error_policy {
            Some(policy) => policy(failure.error(), attempt),
            None => Ok(true),
        };

        match decision {
            Err(source) => {
                self.failures.push(Arc::new(failure));
                self.status = RunStatus::Fail;
                Next::Stop(RetryError::policy(attempt, source))
            }
            Ok(false) => {
                let vetoed = failure.vetoed();
                self.observer.on_vetoed(attempt, &vetoed);
                self.failures.push(Arc::new(vetoed));
                self.status = RunStatus::Fail;
                Next::Stop(self.exhausted_error())
            }
            Ok(true) if attempt < self.retry_limit => {
                let pause = delay.delay(attempt);
                self.observer.on_retry(attempt, &failure, pause);
                self.failures.push(Arc::new(failure));
                Next::Retry(pause)
            }
            Ok(true) => {
                self.observer.on_exhausted(attempt, &failure);
                self.failures.push(Arc::new(failure));
                self.status = RunStatus::Fail;
                Next::Stop(self.exhausted_error())
            }
        }
    }
}
