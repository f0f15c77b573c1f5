//! Delay strategies
//!
//! A delay strategy maps a 1-indexed attempt number to the pause taken before
//! the next attempt. The blocking [`wait`] and the suspending [`wait_async`]
//! share the same timing: both pause for exactly `strategy.delay(attempt)`
//! unless the cancellation token fires first.

use std::fmt;
use std::future::Future;
use std::pin::pin;
use std::sync::{Arc, PoisonError, RwLock};
use std::task::Context;
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

use futures::task::{self, ArcWake};
use rand::Rng;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::error::{ConfigError, Result};

/// Maximum extra delay added by [`Jittered`], as a divisor of the base delay (25%)
const JITTER_DIVISOR: u32 = 4;

/// A pluggable time computation for the pause between attempts
///
/// # Example
///
/// ```rust
/// use reprise_core::retry::DelayStrategy;
/// use std::time::Duration;
///
/// #[derive(Debug)]
/// struct Linear(Duration);
///
/// impl DelayStrategy for Linear {
///     fn delay(&self, attempt: u32) -> Duration {
///         self.0.saturating_mul(attempt.max(1))
///     }
/// }
///
/// assert_eq!(Linear(Duration::from_millis(10)).delay(3), Duration::from_millis(30));
/// ```
pub trait DelayStrategy: fmt::Debug + Send + Sync {
    /// Duration to pause after the given attempt (1-indexed) failed
    fn delay(&self, attempt: u32) -> Duration;
}

impl<S: DelayStrategy + ?Sized> DelayStrategy for Arc<S> {
    fn delay(&self, attempt: u32) -> Duration {
        (**self).delay(attempt)
    }
}

impl<S: DelayStrategy + ?Sized> DelayStrategy for Box<S> {
    fn delay(&self, attempt: u32) -> Duration {
        (**self).delay(attempt)
    }
}

/// The wait was interrupted by cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("delay interrupted by cancellation")]
pub struct Cancelled;

/// Block the calling thread for the strategy's delay after `attempt`
pub fn wait(
    strategy: &dyn DelayStrategy,
    attempt: u32,
    token: &CancellationToken,
) -> std::result::Result<(), Cancelled> {
    sleep_blocking(strategy.delay(attempt), token)
}

/// Suspend for the strategy's delay after `attempt`
pub async fn wait_async(
    strategy: &dyn DelayStrategy,
    attempt: u32,
    token: &CancellationToken,
) -> std::result::Result<(), Cancelled> {
    sleep_async(strategy.delay(attempt), token).await
}

/// Wakes a parked thread when the token it waits on fires
struct Unpark(Thread);

impl ArcWake for Unpark {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.0.unpark();
    }
}

/// Park the calling thread for `duration`, waking early if the token fires
///
/// A deadline past the clock's range waits for cancellation only.
pub(crate) fn sleep_blocking(
    duration: Duration,
    token: &CancellationToken,
) -> std::result::Result<(), Cancelled> {
    if duration.is_zero() {
        return Ok(());
    }

    let deadline = Instant::now().checked_add(duration);
    let waker = task::waker(Arc::new(Unpark(thread::current())));
    let mut cx = Context::from_waker(&waker);
    let mut cancelled = pin!(token.cancelled());

    loop {
        if cancelled.as_mut().poll(&mut cx).is_ready() {
            return Err(Cancelled);
        }
        match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(());
                }
                thread::park_timeout(deadline - now);
            }
            None => thread::park(),
        }
    }
}

/// Sleep for `duration` on the tokio timer, racing the token
pub(crate) async fn sleep_async(
    duration: Duration,
    token: &CancellationToken,
) -> std::result::Result<(), Cancelled> {
    if duration.is_zero() {
        return Ok(());
    }

    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = token.cancelled() => Err(Cancelled),
    }
}

fn ensure_positive(delay: Duration) -> Result<Duration> {
    if delay.is_zero() {
        return Err(ConfigError::invalid_delay(delay));
    }
    Ok(delay)
}

/// No pause between attempts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoDelay;

impl DelayStrategy for NoDelay {
    fn delay(&self, _attempt: u32) -> Duration {
        Duration::ZERO
    }
}

/// The same pause after every attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDelay {
    delay: Duration,
}

impl FixedDelay {
    /// Create a fixed delay; zero is rejected
    pub fn new(delay: Duration) -> Result<Self> {
        Ok(Self {
            delay: ensure_positive(delay)?,
        })
    }

    /// Create a fixed delay from milliseconds
    pub fn from_millis(millis: u64) -> Result<Self> {
        Self::new(Duration::from_millis(millis))
    }

    /// The configured pause
    pub fn base(&self) -> Duration {
        self.delay
    }
}

impl DelayStrategy for FixedDelay {
    fn delay(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

/// Exponential doubling: `base * 2^(attempt - 1)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffDelay {
    base: Duration,
}

impl BackoffDelay {
    /// Create a doubling backoff; zero is rejected
    pub fn new(base: Duration) -> Result<Self> {
        Ok(Self {
            base: ensure_positive(base)?,
        })
    }

    /// Create a doubling backoff from milliseconds
    pub fn from_millis(millis: u64) -> Result<Self> {
        Self::new(Duration::from_millis(millis))
    }

    /// The pause after the first attempt
    pub fn base(&self) -> Duration {
        self.base
    }
}

impl DelayStrategy for BackoffDelay {
    fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor)
    }
}

/// Fibonacci growth: `base * fib(attempt)` with `fib(1) = fib(2) = 1`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FibonacciDelay {
    base: Duration,
}

impl FibonacciDelay {
    /// Create a fibonacci backoff; zero is rejected
    pub fn new(base: Duration) -> Result<Self> {
        Ok(Self {
            base: ensure_positive(base)?,
        })
    }

    /// Create a fibonacci backoff from milliseconds
    pub fn from_millis(millis: u64) -> Result<Self> {
        Self::new(Duration::from_millis(millis))
    }

    /// The pause after the first attempt
    pub fn base(&self) -> Duration {
        self.base
    }
}

/// fib(1) = 1, fib(2) = 1, fib(3) = 2, ... saturating at `u32::MAX`
fn fibonacci(n: u32) -> u32 {
    let (mut previous, mut current) = (0u32, 1u32);
    for _ in 1..n {
        let next = previous.saturating_add(current);
        previous = current;
        current = next;
    }
    current
}

impl DelayStrategy for FibonacciDelay {
    fn delay(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(fibonacci(attempt.max(1)))
    }
}

/// Caps the delay produced by another strategy
#[derive(Debug, Clone)]
pub struct Capped<S> {
    inner: S,
    max: Duration,
}

impl<S: DelayStrategy> DelayStrategy for Capped<S> {
    fn delay(&self, attempt: u32) -> Duration {
        self.inner.delay(attempt).min(self.max)
    }
}

/// Adds up to 25% random extra delay to another strategy
#[derive(Debug, Clone)]
pub struct Jittered<S> {
    inner: S,
}

impl<S: DelayStrategy> DelayStrategy for Jittered<S> {
    fn delay(&self, attempt: u32) -> Duration {
        let base = self.inner.delay(attempt);
        if base.is_zero() {
            return base;
        }

        let range = u64::try_from((base / JITTER_DIVISOR).as_millis()).unwrap_or(u64::MAX);
        let extra = rand::rng().random_range(0..=range);
        base.saturating_add(Duration::from_millis(extra))
    }
}

/// Combinators available on every delay strategy
pub trait DelayStrategyExt: DelayStrategy + Sized {
    /// Never pause longer than `max`
    fn capped(self, max: Duration) -> Capped<Self> {
        Capped { inner: self, max }
    }

    /// Spread retries out with up to 25% random extra delay
    fn jittered(self) -> Jittered<Self> {
        Jittered { inner: self }
    }
}

impl<S: DelayStrategy + Sized> DelayStrategyExt for S {}

static DEFAULT_DELAY: RwLock<Option<Arc<dyn DelayStrategy>>> = RwLock::new(None);

/// The process-wide delay used by runners without an explicit strategy
///
/// Yields [`NoDelay`] until [`set_default_delay`] installs something else.
pub fn default_delay() -> Arc<dyn DelayStrategy> {
    DEFAULT_DELAY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
        .unwrap_or_else(|| Arc::new(NoDelay))
}

/// Install the process-wide default delay; `None` resets it to [`NoDelay`]
pub fn set_default_delay(strategy: Option<Arc<dyn DelayStrategy>>) {
    *DEFAULT_DELAY.write().unwrap_or_else(PoisonError::into_inner) = strategy;
}
