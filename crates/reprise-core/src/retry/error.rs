//! Error types for the retry engine
//!
//! [`Failure`] records one failed attempt. [`RetryError`] is what a runner or
//! builder returns once it stops: the aggregate of every failure when the
//! budget (or the whole chain) is exhausted, the error policy's own error, or
//! cancellation.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// One captured attempt failure
#[derive(Debug)]
pub enum Failure<E> {
    /// The operation returned an error
    Operation {
        /// Attempt that failed (1-indexed)
        attempt: u32,
        /// The operation's error
        source: E,
    },

    /// The success policy rejected an otherwise successful attempt
    SuccessPolicy {
        /// Attempt whose value was rejected (1-indexed)
        attempt: u32,
        /// The success policy's error
        source: E,
    },

    /// The error policy declined to retry after this failure
    ///
    /// `cause` is the failure the policy was shown.
    Vetoed {
        /// Attempt after which retrying stopped (1-indexed)
        attempt: u32,
        /// The original failure
        cause: Box<Failure<E>>,
    },
}

impl<E> Failure<E> {
    /// Attempt number this failure belongs to
    pub fn attempt(&self) -> u32 {
        match self {
            Failure::Operation { attempt, .. }
            | Failure::SuccessPolicy { attempt, .. }
            | Failure::Vetoed { attempt, .. } => *attempt,
        }
    }

    /// The underlying error, looking through a veto
    pub fn error(&self) -> &E {
        match self {
            Failure::Operation { source, .. } | Failure::SuccessPolicy { source, .. } => source,
            Failure::Vetoed { cause, .. } => cause.error(),
        }
    }

    /// Whether the error policy vetoed retrying after this failure
    pub fn is_vetoed(&self) -> bool {
        matches!(self, Failure::Vetoed { .. })
    }

    /// The vetoed failure, if this is a veto
    pub fn vetoed_cause(&self) -> Option<&Failure<E>> {
        match self {
            Failure::Vetoed { cause, .. } => Some(&**cause),
            _ => None,
        }
    }

    /// Wrap this failure as an error-policy veto
    pub(crate) fn vetoed(self) -> Self {
        Failure::Vetoed {
            attempt: self.attempt(),
            cause: Box::new(self),
        }
    }
}

impl<E: fmt::Display> fmt::Display for Failure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Operation { attempt, source } => {
                write!(f, "attempt {} failed: {}", attempt, source)
            }
            Failure::SuccessPolicy { attempt, source } => {
                write!(f, "attempt {} rejected by success policy: {}", attempt, source)
            }
            Failure::Vetoed { attempt, cause } => {
                write!(
                    f,
                    "error policy declined to retry after attempt {}: {}",
                    attempt,
                    cause.error()
                )
            }
        }
    }
}

impl<E: Error + 'static> Error for Failure<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Failure::Operation { source, .. } | Failure::SuccessPolicy { source, .. } => {
                Some(source)
            }
            Failure::Vetoed { cause, .. } => Some(&**cause),
        }
    }
}

/// Terminal errors returned by runners and builders
#[derive(Debug)]
pub enum RetryError<E> {
    /// No attempt succeeded and nothing is left to try
    ///
    /// Carries every captured failure in chronological order, across every
    /// runner of a chain.
    Exhausted {
        /// Attempts made before giving up
        attempts: u32,
        /// Every captured failure, oldest first
        failures: Vec<Arc<Failure<E>>>,
    },

    /// The error policy itself failed; its error is surfaced unwrapped
    Policy {
        /// Attempt whose failure the policy was judging (1-indexed)
        attempt: u32,
        /// The policy's error
        source: E,
    },

    /// Cancellation was observed
    Cancelled {
        /// Attempts made before cancellation
        attempts: u32,
    },
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Exhausted { attempts, failures } => match failures.last() {
                Some(last) => write!(
                    f,
                    "retry failed after {} attempts with {} failures; last: {}",
                    attempts,
                    failures.len(),
                    last
                ),
                None => write!(f, "retry failed after {} attempts", attempts),
            },
            RetryError::Policy { attempt, source } => {
                write!(f, "error policy failed at attempt {}: {}", attempt, source)
            }
            RetryError::Cancelled { attempts } => {
                write!(f, "retry cancelled after {} attempts", attempts)
            }
        }
    }
}

impl<E: Error + 'static> Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RetryError::Exhausted { failures, .. } => failures
                .last()
                .map(|failure| &**failure as &(dyn Error + 'static)),
            RetryError::Policy { source, .. } => Some(source),
            RetryError::Cancelled { .. } => None,
        }
    }
}

impl<E> RetryError<E> {
    /// Create a new exhausted error
    pub fn exhausted(attempts: u32, failures: Vec<Arc<Failure<E>>>) -> Self {
        RetryError::Exhausted { attempts, failures }
    }

    /// Create a new policy error
    pub fn policy(attempt: u32, source: E) -> Self {
        RetryError::Policy { attempt, source }
    }

    /// Create a new cancelled error
    pub fn cancelled(attempts: u32) -> Self {
        RetryError::Cancelled { attempts }
    }

    /// Get the number of attempts made
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. } => *attempts,
            RetryError::Policy { attempt, .. } => *attempt,
            RetryError::Cancelled { attempts } => *attempts,
        }
    }

    /// Check if this error indicates all retries were exhausted
    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }

    /// Check if this error came from a failing error policy
    pub fn is_policy(&self) -> bool {
        matches!(self, RetryError::Policy { .. })
    }

    /// Check if this error indicates cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled { .. })
    }

    /// Captured failures; empty unless exhausted
    pub fn failures(&self) -> &[Arc<Failure<E>>] {
        match self {
            RetryError::Exhausted { failures, .. } => failures,
            _ => &[],
        }
    }

    /// Get the error policy's error, consuming this error
    pub fn into_source(self) -> Option<E> {
        match self {
            RetryError::Policy { source, .. } => Some(source),
            _ => None,
        }
    }
}
