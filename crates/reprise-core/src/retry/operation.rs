//! Retryable operations
//!
//! An [`Operation`] is the unit of work a runner invokes once per attempt. It
//! is either a blocking closure or a producer of futures. Bound arguments are
//! captured by value when the operation is built and a clone of them is
//! handed to every attempt, so arity never leaks into the runner.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

type BlockingFn<T, E> = dyn Fn(&CancellationToken) -> Result<T, E> + Send + Sync;
type TaskFn<T, E> = dyn Fn(CancellationToken) -> BoxFuture<'static, Result<T, E>> + Send + Sync;

/// A retryable unit of work producing `T` or failing with `E`
///
/// Actions are operations with `T = ()`. Cloning an operation shares the
/// underlying callable.
///
/// # Example
///
/// ```rust
/// use reprise_core::retry::Operation;
///
/// let parse = Operation::with_args(
///     |(text, radix): (String, u32)| u32::from_str_radix(&text, radix),
///     ("ff".to_string(), 16),
/// );
/// assert!(parse.is_blocking());
/// ```
pub enum Operation<T, E> {
    /// Runs on the calling thread
    Blocking(Arc<BlockingFn<T, E>>),
    /// Produces a future per attempt
    Task(Arc<TaskFn<T, E>>),
}

impl<T, E> Clone for Operation<T, E> {
    fn clone(&self) -> Self {
        match self {
            Operation::Blocking(f) => Operation::Blocking(Arc::clone(f)),
            Operation::Task(f) => Operation::Task(Arc::clone(f)),
        }
    }
}

impl<T, E> fmt::Debug for Operation<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Blocking(_) => write!(f, "Operation::Blocking(<function>)"),
            Operation::Task(_) => write!(f, "Operation::Task(<function>)"),
        }
    }
}

impl<E: 'static> Operation<(), E> {
    /// A side-effecting blocking action
    pub fn action<F>(f: F) -> Self
    where
        F: Fn() -> Result<(), E> + Send + Sync + 'static,
    {
        Operation::Blocking(Arc::new(move |_: &CancellationToken| f()))
    }
}

impl<T: 'static, E: 'static> Operation<T, E> {
    /// A blocking value-returning function
    pub fn function<F>(f: F) -> Self
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
    {
        Operation::Blocking(Arc::new(move |_: &CancellationToken| f()))
    }

    /// A blocking function that observes the invocation's cancellation token
    pub fn cancellable<F>(f: F) -> Self
    where
        F: Fn(&CancellationToken) -> Result<T, E> + Send + Sync + 'static,
    {
        Operation::Blocking(Arc::new(f))
    }

    /// A blocking function with bound arguments, cloned for every attempt
    pub fn with_args<A, F>(f: F, args: A) -> Self
    where
        A: Clone + Send + Sync + 'static,
        F: Fn(A) -> Result<T, E> + Send + Sync + 'static,
    {
        Operation::Blocking(Arc::new(move |_: &CancellationToken| f(args.clone())))
    }

    /// An asynchronous task; the producer receives the cancellation token
    pub fn task<F, Fut>(f: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Operation::Task(Arc::new(move |token: CancellationToken| f(token).boxed()))
    }

    /// An asynchronous task with bound arguments, cloned for every attempt
    pub fn task_with_args<A, F, Fut>(f: F, args: A) -> Self
    where
        A: Clone + Send + Sync + 'static,
        F: Fn(A, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Operation::Task(Arc::new(move |token: CancellationToken| {
            f(args.clone(), token).boxed()
        }))
    }

    /// Whether attempts run on the calling thread
    pub fn is_blocking(&self) -> bool {
        matches!(self, Operation::Blocking(_))
    }

    /// Whether two operations share the same callable
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Operation::Blocking(a), Operation::Blocking(b)) => Arc::ptr_eq(a, b),
            (Operation::Task(a), Operation::Task(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Run one attempt on the calling thread
    ///
    /// Task operations are driven to completion with a local executor, so
    /// they must not depend on a tokio reactor.
    pub(crate) fn invoke_blocking(&self, token: &CancellationToken) -> Result<T, E> {
        match self {
            Operation::Blocking(f) => f(token),
            Operation::Task(f) => futures::executor::block_on(f(token.clone())),
        }
    }

    /// Run one attempt, suspending on task operations
    pub(crate) async fn invoke_async(&self, token: &CancellationToken) -> Result<T, E> {
        match self {
            Operation::Blocking(f) => f(token),
            Operation::Task(f) => f(token.clone()).await,
        }
    }
}
