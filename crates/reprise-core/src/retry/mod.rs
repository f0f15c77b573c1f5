//! Retry runners and fallback chains
//!
//! This module provides the retry engine: a [`Runner`] drives one operation
//! through its attempt loop, and a [`Builder`] chains runners so a failing
//! operation can hand over to a fallback ("try, then try").
//!
//! # Features
//!
//! - Blocking and async execution with identical outcomes
//! - Delay strategies: none, fixed, doubling backoff, fibonacci, plus caps and jitter
//! - Optional success and error policies per runner
//! - Cooperative cancellation through `CancellationToken`
//! - Observable attempts via the `RetryObserver` trait, logged with `tracing` by default
//! - Every failure of a chain is kept and returned when nothing succeeds
//!
//! # Example
//!
//! ```rust
//! use reprise_core::retry::{Builder, FibonacciDelay, Operation, RetryError};
//! use std::io;
//!
//! fn fetch() -> Result<String, RetryError<io::Error>> {
//!     Builder::new(Operation::function(|| Ok::<_, io::Error>("payload".to_string())))
//!         .retry_count(5)
//!         .expect("positive retry count")
//!         .delay(FibonacciDelay::from_millis(10).expect("positive delay"))
//!         .run_blocking()
//! }
//!
//! assert_eq!(fetch().unwrap(), "payload");
//! ```

mod builder;
mod delay;
mod error;
mod observer;
mod operation;
mod policy;
mod runner;

pub use builder::{Builder, RunReport, StepReport};
pub use delay::{
    default_delay, set_default_delay, wait, wait_async, BackoffDelay, Cancelled, Capped,
    DelayStrategy, DelayStrategyExt, FibonacciDelay, FixedDelay, Jittered, NoDelay,
};
pub use error::{Failure, RetryError};
pub use observer::{NoOpObserver, ObservedStats, RetryObserver, StatsObserver, TracingObserver};
pub use operation::Operation;
pub use policy::{error_policy, never_retry, retry_when, success_policy, ErrorPolicy, SuccessPolicy};
pub use runner::{RunStatus, Runner, DEFAULT_RETRY_LIMIT};

#[cfg(test)]
mod tests;
