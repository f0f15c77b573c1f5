//! # reprise
//!
//! Retry actions, functions and async tasks, with fallback chains.
//!
//! The `try_*` functions wrap a callable into a [`Builder`] ready to be
//! configured and run. The `retry_*` functions run a callable once under a
//! [`RetryConfig`] document.
//!
//! ```rust
//! use std::io;
//!
//! let mut chain = reprise::try_function(|| "42".parse::<u32>().map_err(io::Error::other))
//!     .retry_count(3)
//!     .unwrap();
//!
//! assert_eq!(chain.run_blocking().unwrap(), 42);
//! ```

use std::future::Future;

pub use reprise_core::config::RetryConfigLoader;
pub use reprise_core::error::ConfigError;
pub use reprise_core::retry::{
    default_delay, error_policy, never_retry, retry_when, set_default_delay, success_policy, wait,
    wait_async, BackoffDelay, Builder, Cancelled, Capped, DelayStrategy, DelayStrategyExt,
    ErrorPolicy, Failure, FibonacciDelay, FixedDelay, Jittered, NoDelay, NoOpObserver,
    ObservedStats, Operation, RetryError, RetryObserver, RunReport, RunStatus, Runner,
    StatsObserver, StepReport, SuccessPolicy, TracingObserver, DEFAULT_RETRY_LIMIT,
};
pub use reprise_core::types::{DelayKind, RetryConfig, RetryPoliciesConfig};
pub use tokio_util::sync::CancellationToken;

/// Errors from the config-driven `retry_*` helpers
#[derive(Debug, thiserror::Error)]
pub enum Error<E: std::error::Error + 'static> {
    /// The configuration document was rejected before any attempt
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Retrying stopped without a successful attempt
    #[error(transparent)]
    Retry(#[from] RetryError<E>),
}

impl<E: std::error::Error + 'static> Error<E> {
    /// The retry outcome, if the configuration was accepted
    pub fn retry_error(&self) -> Option<&RetryError<E>> {
        match self {
            Error::Retry(err) => Some(err),
            Error::Config(_) => None,
        }
    }
}

/// Retry a side-effecting action
pub fn try_action<E, F>(f: F) -> Builder<(), E>
where
    E: 'static,
    F: Fn() -> Result<(), E> + Send + Sync + 'static,
{
    Builder::new(Operation::action(f))
}

/// Retry a value-returning function
pub fn try_function<T, E, F>(f: F) -> Builder<T, E>
where
    T: 'static,
    E: 'static,
    F: Fn() -> Result<T, E> + Send + Sync + 'static,
{
    Builder::new(Operation::function(f))
}

/// Retry a function with bound arguments
///
/// `args` is captured once and a clone is passed to every attempt. Bind
/// several arguments as a tuple.
///
/// ```rust
/// let mut chain = reprise::try_with_args(
///     |(text, radix): (String, u32)| u32::from_str_radix(&text, radix),
///     ("ff".to_string(), 16),
/// );
/// assert_eq!(chain.run_blocking().unwrap(), 255);
/// ```
pub fn try_with_args<A, T, E, F>(f: F, args: A) -> Builder<T, E>
where
    A: Clone + Send + Sync + 'static,
    T: 'static,
    E: 'static,
    F: Fn(A) -> Result<T, E> + Send + Sync + 'static,
{
    Builder::new(Operation::with_args(f, args))
}

/// Retry an async task; each attempt receives the invocation's cancellation token
pub fn try_task<T, E, F, Fut>(f: F) -> Builder<T, E>
where
    T: 'static,
    E: 'static,
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    Builder::new(Operation::task(f))
}

/// Retry an async task with bound arguments
pub fn try_task_with_args<A, T, E, F, Fut>(f: F, args: A) -> Builder<T, E>
where
    A: Clone + Send + Sync + 'static,
    T: 'static,
    E: 'static,
    F: Fn(A, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    Builder::new(Operation::task_with_args(f, args))
}

/// Run an async operation under a configuration document
pub async fn retry_with_config<T, E, F, Fut>(config: &RetryConfig, f: F) -> Result<T, Error<E>>
where
    T: Clone + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    let mut chain = try_task(move |_token| f()).configure(config)?;
    Ok(chain.run_async_uncancelled().await?)
}

/// Run a blocking operation under a configuration document
pub fn retry_blocking_with_config<T, E, F>(config: &RetryConfig, f: F) -> Result<T, Error<E>>
where
    T: Clone + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
    F: Fn() -> Result<T, E> + Send + Sync + 'static,
{
    let mut chain = try_function(f).configure(config)?;
    Ok(chain.run_blocking()?)
}

/// Run an async operation under the named policy of a policies document
///
/// Unknown names use the document's default policy. Attempts are logged with
/// `name` as the operation.
pub async fn retry_named<T, E, F, Fut>(
    policies: &RetryPoliciesConfig,
    name: &str,
    f: F,
) -> Result<T, Error<E>>
where
    T: Clone + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    let mut chain = try_task(move |_token| f())
        .configure(policies.for_operation(name))?
        .observer(TracingObserver::new(name));
    Ok(chain.run_async_uncancelled().await?)
}
