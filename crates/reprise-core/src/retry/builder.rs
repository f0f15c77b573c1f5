//! Fallback chains of runners
//!
//! A [`Builder`] owns an ordered, non-empty list of [`Runner`]s. Running it
//! walks the chain: the first runner that succeeds ends the run, a runner
//! that exhausts its budget hands over to the next one, and the last
//! runner's exhaustion returns every failure of the chain at once.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::types::RetryConfig;

use super::delay::DelayStrategy;
use super::error::{Failure, RetryError};
use super::observer::RetryObserver;
use super::operation::Operation;
use super::policy::{ErrorPolicy, SuccessPolicy};
use super::runner::{RunStatus, Runner};

/// Fluent builder and executor for a "try, then try" chain
///
/// Configuration methods apply to the most recently added runner.
///
/// # Example
///
/// ```rust
/// use reprise_core::retry::{Builder, FixedDelay, Operation, RunStatus};
/// use std::io;
///
/// let mut chain = Builder::new(Operation::function(|| {
///     Err::<u32, _>(io::Error::other("primary is down"))
/// }))
/// .retry_count(2)
/// .unwrap()
/// .delay(FixedDelay::from_millis(1).unwrap())
/// .then_try_with(Operation::function(|| Ok(7)))
/// .retry_count(1)
/// .unwrap();
///
/// assert_eq!(chain.run_blocking().unwrap(), 7);
/// assert_eq!(chain.status(), RunStatus::Success);
/// assert_eq!(chain.attempts(), 3);
/// ```
pub struct Builder<T, E> {
    runners: Vec<Runner<T, E>>,
    last: usize,
    cancelled: bool,
}

impl<T, E> fmt::Debug for Builder<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("runners", &self.runners)
            .field("last", &self.last)
            .field("cancelled", &self.cancelled)
            .finish()
    }
}

impl<T, E> Builder<T, E> {
    /// Start a chain whose first step runs `operation` with default settings
    pub fn new(operation: Operation<T, E>) -> Self {
        Self::from_runner(Runner::new(operation))
    }

    /// Start a chain from a configured runner
    pub fn from_runner(runner: Runner<T, E>) -> Self {
        Self {
            runners: vec![runner],
            last: 0,
            cancelled: false,
        }
    }

    /// Append a caller-configured runner as-is
    pub fn add_runner(mut self, runner: Runner<T, E>) -> Self {
        self.runners.push(runner);
        self.last = self.runners.len() - 1;
        self
    }

    /// Append a step retrying the same operation with the current settings
    pub fn then_try(self) -> Self {
        let next = self.last_runner().chained();
        self.add_runner(next)
    }

    /// Append a step running `operation` with the current settings
    pub fn then_try_with(self, operation: Operation<T, E>) -> Self {
        let next = self.last_runner().chained_with(operation);
        self.add_runner(next)
    }

    /// Set the last step's retry limit; zero is rejected
    pub fn retry_count(mut self, limit: u32) -> Result<Self> {
        self.last_mut().set_retry_limit(limit)?;
        Ok(self)
    }

    /// Set the last step's delay strategy
    pub fn delay<S: DelayStrategy + 'static>(self, strategy: S) -> Self {
        self.shared_delay(Arc::new(strategy))
    }

    /// Set the last step's delay strategy from a shared instance
    pub fn shared_delay(mut self, strategy: Arc<dyn DelayStrategy>) -> Self {
        self.last_mut().set_delay(strategy);
        self
    }

    /// Set the last step's success policy from a closure
    pub fn on_success<F>(self, f: F) -> Self
    where
        F: Fn(&T, u32) -> std::result::Result<(), E> + Send + Sync + 'static,
    {
        self.success_policy(Arc::new(f))
    }

    /// Set the last step's error policy from a closure
    pub fn on_error<F>(self, f: F) -> Self
    where
        F: Fn(&E, u32) -> std::result::Result<bool, E> + Send + Sync + 'static,
    {
        self.error_policy(Arc::new(f))
    }

    /// Set the last step's success policy
    pub fn success_policy(mut self, policy: SuccessPolicy<T, E>) -> Self {
        self.last_mut().set_success_policy(policy);
        self
    }

    /// Set the last step's error policy
    pub fn error_policy(mut self, policy: ErrorPolicy<E>) -> Self {
        self.last_mut().set_error_policy(policy);
        self
    }

    /// Set the observer of every step in the chain
    pub fn observer<O: RetryObserver + 'static>(self, observer: O) -> Self {
        self.shared_observer(Arc::new(observer))
    }

    /// Set the observer of every step from a shared instance
    pub fn shared_observer(mut self, observer: Arc<dyn RetryObserver>) -> Self {
        for runner in &mut self.runners {
            runner.set_observer(Arc::clone(&observer));
        }
        self
    }

    /// Apply a configuration document's retry limit and delay to the last step
    pub fn configure(mut self, config: &RetryConfig) -> Result<Self> {
        config.validate()?;
        let strategy = config.delay_strategy()?;

        let runner = self.last_mut();
        runner.set_retry_limit(config.max_attempts)?;
        runner.set_delay(strategy);
        Ok(self)
    }

    /// Every step, in execution order
    pub fn runners(&self) -> &[Runner<T, E>] {
        &self.runners
    }

    /// The step at `index`
    pub fn runner(&self, index: usize) -> Option<&Runner<T, E>> {
        self.runners.get(index)
    }

    /// The step configuration calls currently apply to
    pub fn last_runner(&self) -> &Runner<T, E> {
        &self.runners[self.last]
    }

    fn last_mut(&mut self) -> &mut Runner<T, E> {
        &mut self.runners[self.last]
    }

    /// Status of the chain
    ///
    /// Canceled if cancellation stopped the chain between steps, else the
    /// status of the last step that ran.
    pub fn status(&self) -> RunStatus {
        if self.cancelled {
            return RunStatus::Canceled;
        }

        self.runners
            .iter()
            .rev()
            .map(Runner::status)
            .find(RunStatus::is_terminal)
            .unwrap_or_default()
    }

    /// Attempts made across every step
    pub fn attempts(&self) -> u32 {
        self.runners.iter().map(Runner::attempts).sum()
    }

    /// Every captured failure across the chain, oldest first
    pub fn failures(&self) -> Vec<Arc<Failure<E>>> {
        self.runners
            .iter()
            .flat_map(|runner| runner.failures().iter().cloned())
            .collect()
    }

    fn aggregate(&self) -> RetryError<E> {
        RetryError::exhausted(self.attempts(), self.failures())
    }

    fn cancel_before(&mut self, step: usize) -> RetryError<E> {
        self.cancelled = true;
        tracing::debug!(step, "chain cancelled before step started");
        self.runners[step].observer().on_cancelled(self.attempts());
        RetryError::cancelled(self.attempts())
    }

    /// Decide what a step's terminal error means for the chain
    ///
    /// `None` continues with the next step.
    fn after_step(&self, step: usize, err: RetryError<E>) -> Option<RetryError<E>> {
        match err {
            RetryError::Exhausted { .. } if step + 1 < self.runners.len() => {
                tracing::debug!(
                    from_step = step,
                    to_step = step + 1,
                    attempts = self.runners[step].attempts(),
                    "step exhausted, advancing chain"
                );
                self.runners[step].observer().on_fallback(step, step + 1);
                None
            }
            RetryError::Exhausted { .. } => Some(self.aggregate()),
            RetryError::Cancelled { .. } => Some(RetryError::cancelled(self.attempts())),
            policy @ RetryError::Policy { .. } => Some(policy),
        }
    }
}

impl<T, E: fmt::Display> Builder<T, E> {
    /// Serializable snapshot of the chain's progress
    pub fn report(&self) -> RunReport {
        RunReport {
            status: self.status(),
            attempts: self.attempts(),
            steps: self
                .runners
                .iter()
                .map(|runner| StepReport {
                    status: runner.status(),
                    attempts: runner.attempts(),
                    retry_limit: runner.retry_limit(),
                    failures: runner.failures().iter().map(|f| f.to_string()).collect(),
                })
                .collect(),
        }
    }
}

impl<T, E> Builder<T, E>
where
    T: Clone + Send + 'static,
    E: Error + Send + Sync + 'static,
{
    /// Run the chain on the calling thread
    ///
    /// A chain that was cancelled stays cancelled; running it again returns
    /// the same cancellation without touching any step.
    pub fn run(&mut self, token: &CancellationToken) -> std::result::Result<T, RetryError<E>> {
        if self.cancelled {
            return Err(RetryError::cancelled(self.attempts()));
        }

        for step in 0..self.runners.len() {
            if token.is_cancelled() {
                return Err(self.cancel_before(step));
            }

            match self.runners[step].run(token) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if let Some(stop) = self.after_step(step, err) {
                        return Err(stop);
                    }
                }
            }
        }

        Err(self.aggregate())
    }

    /// Run the chain, suspending on task operations and pauses
    ///
    /// Cancellation is terminal here as well.
    pub async fn run_async(
        &mut self,
        token: &CancellationToken,
    ) -> std::result::Result<T, RetryError<E>> {
        if self.cancelled {
            return Err(RetryError::cancelled(self.attempts()));
        }

        for step in 0..self.runners.len() {
            if token.is_cancelled() {
                return Err(self.cancel_before(step));
            }

            match self.runners[step].run_async(token).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if let Some(stop) = self.after_step(step, err) {
                        return Err(stop);
                    }
                }
            }
        }

        Err(self.aggregate())
    }

    /// Run the chain on the calling thread without cancellation
    pub fn run_blocking(&mut self) -> std::result::Result<T, RetryError<E>> {
        self.run(&CancellationToken::new())
    }

    /// Run the chain asynchronously without cancellation
    pub async fn run_async_uncancelled(&mut self) -> std::result::Result<T, RetryError<E>> {
        self.run_async(&CancellationToken::new()).await
    }
}

/// Diagnostic snapshot of a builder
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunReport {
    /// Overall chain status
    pub status: RunStatus,
    /// Attempts across every step
    pub attempts: u32,
    /// One entry per step, in execution order
    pub steps: Vec<StepReport>,
}

/// One step of a [`RunReport`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct StepReport {
    pub status: RunStatus,
    pub attempts: u32,
    pub retry_limit: u32,
    /// Rendered failures, oldest first
    pub failures: Vec<String>,
}
