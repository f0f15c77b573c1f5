//! Success and error policies
//!
//! Policies are optional shared callbacks a runner consults after each
//! attempt. Without a success policy every `Ok` is accepted; without an error
//! policy every failure is retryable.

use std::sync::Arc;

/// Inspects a successful attempt's value; an `Err` turns the attempt into a failure
pub type SuccessPolicy<T, E> = Arc<dyn Fn(&T, u32) -> Result<(), E> + Send + Sync>;

/// Decides whether a failed attempt may be retried
///
/// `Ok(true)` retries, `Ok(false)` vetoes further attempts, and `Err` aborts
/// the whole chain with the policy's own error.
pub type ErrorPolicy<E> = Arc<dyn Fn(&E, u32) -> Result<bool, E> + Send + Sync>;

/// Wrap a closure as a [`SuccessPolicy`]
pub fn success_policy<T, E, F>(f: F) -> SuccessPolicy<T, E>
where
    F: Fn(&T, u32) -> Result<(), E> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap a closure as an [`ErrorPolicy`]
pub fn error_policy<E, F>(f: F) -> ErrorPolicy<E>
where
    F: Fn(&E, u32) -> Result<bool, E> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// An error policy that retries while `predicate` holds and never fails itself
pub fn retry_when<E, F>(predicate: F) -> ErrorPolicy<E>
where
    E: 'static,
    F: Fn(&E) -> bool + Send + Sync + 'static,
{
    Arc::new(move |error: &E, _attempt: u32| Ok(predicate(error)))
}

/// An error policy that vetoes every retry
pub fn never_retry<E: 'static>() -> ErrorPolicy<E> {
    Arc::new(|_: &E, _: u32| Ok(false))
}
