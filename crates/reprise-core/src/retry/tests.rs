//! Scenario tests for the retry engine
//!
//! These tests drive complete runners and chains, sync and async, through
//! success, exhaustion, vetoes, policy failures and cancellation.

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serial_test::serial;
use tokio_util::sync::CancellationToken;

use crate::retry::builder::Builder;
use crate::retry::delay::{set_default_delay, DelayStrategy, FixedDelay, NoDelay};
use crate::retry::error::Failure;
use crate::retry::observer::{RetryObserver, StatsObserver};
use crate::retry::operation::Operation;
use crate::retry::policy::{never_retry, retry_when};
use crate::retry::runner::{RunStatus, Runner};

/// Fires the token once a step runs out of attempts
struct CancelOnExhausted(CancellationToken);

impl RetryObserver for CancelOnExhausted {
    fn on_attempt(&self, _attempt: u32, _limit: u32) {}

    fn on_retry(&self, _attempt: u32, _failure: &dyn std::error::Error, _pause: Duration) {}

    fn on_exhausted(&self, _attempts: u32, _last: &dyn std::error::Error) {
        self.0.cancel();
    }
}

/// An operation that fails `failures` times, then yields `value`
fn fails_then(
    failures: u32,
    value: &'static str,
) -> (Operation<&'static str, io::Error>, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let op = Operation::function(move || {
        let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= failures {
            Err(io::Error::other(format!("call {} failed", call)))
        } else {
            Ok(value)
        }
    });
    (op, calls)
}

/// Async counterpart of [`fails_then`]
fn task_fails_then(
    failures: u32,
    value: &'static str,
) -> (Operation<&'static str, io::Error>, Arc<AtomicU32>) {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let op = Operation::task(move |_token| {
        let counter = counter.clone();
        async move {
            let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= failures {
                Err(io::Error::other(format!("call {} failed", call)))
            } else {
                Ok(value)
            }
        }
    });
    (op, calls)
}

fn always_fails() -> (Operation<&'static str, io::Error>, Arc<AtomicU32>) {
    fails_then(u32::MAX, "unreachable")
}

// ============================================================================
// Single Runner Tests
// ============================================================================

#[test]
fn test_always_failing_spends_whole_budget() {
    let (op, calls) = always_fails();
    let mut chain = Builder::new(op).retry_count(4).unwrap();

    let err = chain.run_blocking().unwrap_err();

    assert!(err.is_exhausted());
    assert_eq!(err.attempts(), 4);
    assert_eq!(err.failures().len(), 4);
    assert_eq!(chain.status(), RunStatus::Fail);
    assert_eq!(chain.attempts(), 4);
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    let attempts: Vec<u32> = err.failures().iter().map(|f| f.attempt()).collect();
    assert_eq!(attempts, vec![1, 2, 3, 4]);
}

#[test]
fn test_fails_twice_then_ok() {
    let (op, calls) = fails_then(2, "ok");
    let mut chain = Builder::new(op).retry_count(3).unwrap();

    assert_eq!(chain.run_blocking().unwrap(), "ok");
    assert_eq!(chain.status(), RunStatus::SuccessAfterRetries);
    assert_eq!(chain.attempts(), 3);
    assert_eq!(chain.failures().len(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn test_first_attempt_success_has_no_failures() {
    let (op, _calls) = fails_then(0, "first");
    let mut chain = Builder::new(op);

    assert_eq!(chain.run_blocking().unwrap(), "first");
    assert_eq!(chain.status(), RunStatus::Success);
    assert_eq!(chain.attempts(), 1);
    assert!(chain.failures().is_empty());
}

#[test]
fn test_veto_on_first_failure() {
    let (op, calls) = always_fails();
    let stats = Arc::new(StatsObserver::new());
    let mut chain = Builder::new(op)
        .retry_count(5)
        .unwrap()
        .error_policy(never_retry())
        .shared_observer(stats.clone());

    let err = chain.run_blocking().unwrap_err();

    assert!(err.is_exhausted());
    assert_eq!(chain.status(), RunStatus::Fail);
    assert_eq!(chain.attempts(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(stats.snapshot().vetoes, 1);

    let failures = err.failures();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].is_vetoed());
    let cause = failures[0].vetoed_cause().unwrap();
    assert!(matches!(cause, Failure::Operation { attempt: 1, .. }));
    assert_eq!(cause.error().to_string(), "call 1 failed");
}

#[test]
fn test_selective_error_policy() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let op: Operation<(), io::Error> = Operation::action(move || {
        let kind = if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            io::ErrorKind::TimedOut
        } else {
            io::ErrorKind::NotFound
        };
        Err(io::Error::new(kind, "lookup failed"))
    });

    let mut chain = Builder::new(op)
        .retry_count(10)
        .unwrap()
        .error_policy(retry_when(|err: &io::Error| err.kind() == io::ErrorKind::TimedOut));

    let err = chain.run_blocking().unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(err.failures().len(), 2);
    assert!(!err.failures()[0].is_vetoed());
    assert!(err.failures()[1].is_vetoed());
}

#[test]
fn test_error_policy_failure_surfaces_unwrapped() {
    let (op, calls) = always_fails();
    let mut chain = Builder::new(op)
        .retry_count(5)
        .unwrap()
        .on_error(|_err, _attempt| Err(io::Error::new(io::ErrorKind::Unsupported, "cannot judge")))
        .then_try_with(Operation::function(|| Ok("fallback")));

    let err = chain.run_blocking().unwrap_err();

    assert!(err.is_policy());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(chain.runner(1).unwrap().status(), RunStatus::NotStarted);
    assert_eq!(err.into_source().unwrap().kind(), io::ErrorKind::Unsupported);
}

#[test]
fn test_success_policy_turns_value_into_failure() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let op = Operation::function(move || Ok::<u32, io::Error>(counter.fetch_add(1, Ordering::SeqCst)));

    let mut chain = Builder::new(op)
        .retry_count(5)
        .unwrap()
        .on_success(|value: &u32, _attempt| {
            if *value < 2 {
                Err(io::Error::other(format!("{} is not ready", value)))
            } else {
                Ok(())
            }
        });

    assert_eq!(chain.run_blocking().unwrap(), 2);
    assert_eq!(chain.status(), RunStatus::SuccessAfterRetries);
    let failures = chain.failures();
    assert_eq!(failures.len(), 2);
    assert!(matches!(failures[0].as_ref(), Failure::SuccessPolicy { attempt: 1, .. }));
}

#[test]
fn test_retry_count_zero_rejected_before_any_attempt() {
    let (op, calls) = fails_then(0, "never");
    let err = Builder::new(op).retry_count(0).unwrap_err();

    assert!(err.is_invalid_argument());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_delay_between_attempts() {
    let (op, _calls) = fails_then(2, "ok");
    let mut chain = Builder::new(op)
        .retry_count(3)
        .unwrap()
        .delay(FixedDelay::from_millis(20).unwrap());

    let start = Instant::now();
    chain.run_blocking().unwrap();
    assert!(start.elapsed() >= Duration::from_millis(40));
}

#[test]
#[serial]
fn test_default_delay_used_when_unset() {
    set_default_delay(Some(Arc::new(FixedDelay::from_millis(15).unwrap())));

    let (op, _calls) = fails_then(1, "ok");
    let mut chain = Builder::new(op);
    let start = Instant::now();
    let outcome = chain.run_blocking();
    let elapsed = start.elapsed();

    set_default_delay(None);

    assert_eq!(outcome.unwrap(), "ok");
    assert!(elapsed >= Duration::from_millis(15));
}

#[test]
#[serial]
fn test_explicit_delay_overrides_default() {
    set_default_delay(Some(Arc::new(FixedDelay::from_millis(500).unwrap())));

    let (op, _calls) = fails_then(1, "ok");
    let mut chain = Builder::new(op).delay(NoDelay);
    let start = Instant::now();
    let outcome = chain.run_blocking();
    let elapsed = start.elapsed();

    set_default_delay(None);

    assert_eq!(outcome.unwrap(), "ok");
    assert!(elapsed < Duration::from_millis(400));
}

// ============================================================================
// Chain Tests
// ============================================================================

#[test]
fn test_fallback_to_second_runner() {
    let (primary, primary_calls) = always_fails();
    let (fallback, fallback_calls) = fails_then(0, "from fallback");
    let stats = Arc::new(StatsObserver::new());

    let mut chain = Builder::new(primary)
        .retry_count(2)
        .unwrap()
        .then_try_with(fallback)
        .retry_count(1)
        .unwrap()
        .shared_observer(stats.clone());

    assert_eq!(chain.run_blocking().unwrap(), "from fallback");
    assert_eq!(chain.runner(1).unwrap().status(), RunStatus::Success);
    assert_eq!(chain.status(), RunStatus::Success);
    assert_eq!(chain.attempts(), 3);
    assert_eq!(chain.runner(0).unwrap().failures().len(), 2);
    assert_eq!(chain.runner(0).unwrap().status(), RunStatus::Fail);
    assert_eq!(primary_calls.load(Ordering::SeqCst), 2);
    assert_eq!(fallback_calls.load(Ordering::SeqCst), 1);
    assert_eq!(stats.snapshot().fallbacks, 1);
}

#[test]
fn test_exhausted_chain_aggregates_every_failure() {
    let (primary, _) = always_fails();
    let fallback: Operation<&'static str, io::Error> =
        Operation::function(|| Err(io::Error::other("fallback down")));

    let mut chain = Builder::new(primary)
        .retry_count(2)
        .unwrap()
        .then_try_with(fallback)
        .retry_count(3)
        .unwrap();

    let err = chain.run_blocking().unwrap_err();

    assert!(err.is_exhausted());
    assert_eq!(err.attempts(), 5);
    let messages: Vec<String> = err.failures().iter().map(|f| f.error().to_string()).collect();
    assert_eq!(
        messages,
        vec![
            "call 1 failed",
            "call 2 failed",
            "fallback down",
            "fallback down",
            "fallback down"
        ]
    );
    assert_eq!(chain.status(), RunStatus::Fail);
}

#[test]
fn test_veto_ends_only_its_own_runner() {
    let (primary, primary_calls) = always_fails();
    let (fallback, _) = fails_then(0, "recovered");

    let mut chain = Builder::new(primary)
        .retry_count(5)
        .unwrap()
        .error_policy(never_retry())
        .then_try_with(fallback)
        .error_policy(retry_when(|_: &io::Error| true));

    assert_eq!(chain.run_blocking().unwrap(), "recovered");
    assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
    assert!(chain.runner(0).unwrap().failures()[0].is_vetoed());
}

#[test]
fn test_then_try_inherits_settings_by_identity() {
    let (op, _) = always_fails();
    let delay: Arc<dyn DelayStrategy> = Arc::new(FixedDelay::from_millis(1).unwrap());

    let chain = Builder::new(op)
        .retry_count(6)
        .unwrap()
        .shared_delay(delay.clone())
        .on_success(|_value, _attempt| Ok(()))
        .error_policy(never_retry())
        .then_try();

    let first = chain.runner(0).unwrap();
    let second = chain.runner(1).unwrap();

    assert_eq!(second.retry_limit(), 6);
    assert!(Arc::ptr_eq(second.delay().unwrap(), &delay));
    assert!(Arc::ptr_eq(
        second.success_policy().unwrap(),
        first.success_policy().unwrap()
    ));
    assert!(Arc::ptr_eq(
        second.error_policy().unwrap(),
        first.error_policy().unwrap()
    ));
    assert!(Arc::ptr_eq(second.observer(), first.observer()));
    assert!(second.operation().ptr_eq(first.operation()));
}

#[test]
fn test_then_try_retries_same_operation() {
    let (op, calls) = fails_then(3, "third time lucky");
    let mut chain = Builder::new(op).retry_count(2).unwrap().then_try();

    assert_eq!(chain.run_blocking().unwrap(), "third time lucky");
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(chain.runner(1).unwrap().status(), RunStatus::SuccessAfterRetries);
}

#[test]
fn test_add_runner_keeps_caller_configuration() {
    let (primary, _) = always_fails();
    let (fallback, _) = fails_then(0, "custom");
    let custom = Runner::new(fallback).with_retry_limit(9).unwrap();

    let chain = Builder::new(primary)
        .retry_count(2)
        .unwrap()
        .error_policy(never_retry())
        .add_runner(custom);

    let last = chain.last_runner();
    assert_eq!(last.retry_limit(), 9);
    assert!(last.error_policy().is_none());
}

// ============================================================================
// Cancellation Tests
// ============================================================================

#[test]
fn test_cancel_before_start_runs_nothing() {
    let (op, calls) = fails_then(0, "never");
    let mut chain = Builder::new(op).then_try();

    let token = CancellationToken::new();
    token.cancel();

    let err = chain.run(&token).unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(err.attempts(), 0);
    assert_eq!(chain.status(), RunStatus::Canceled);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(chain.runner(0).unwrap().status(), RunStatus::NotStarted);
    assert_eq!(chain.runner(1).unwrap().status(), RunStatus::NotStarted);
}

#[test]
fn test_runner_cancel_before_start() {
    let (op, calls) = fails_then(0, "never");
    let mut runner = Runner::new(op);
    let token = CancellationToken::new();
    token.cancel();

    assert!(runner.run(&token).unwrap_err().is_cancelled());
    assert_eq!(runner.status(), RunStatus::Canceled);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_cancel_between_runners() {
    let token = CancellationToken::new();
    let trigger = token.clone();
    let primary: Operation<&'static str, io::Error> = Operation::function(move || {
        trigger.cancel();
        Err(io::Error::other("primary down"))
    });
    let (fallback, fallback_calls) = fails_then(0, "never");

    // The failing primary cancels, so its error counts as cancellation.
    let mut chain = Builder::new(primary).retry_count(1).unwrap().then_try_with(fallback);

    let err = chain.run(&token).unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(err.attempts(), 1);
    assert_eq!(chain.status(), RunStatus::Canceled);
    assert_eq!(fallback_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_cancel_after_exhausted_step_skips_fallback() {
    let token = CancellationToken::new();
    let (primary, primary_calls) = always_fails();
    let (fallback, fallback_calls) = fails_then(0, "resumed");

    let mut chain = Builder::new(primary)
        .retry_count(2)
        .unwrap()
        .then_try_with(fallback)
        .observer(CancelOnExhausted(token.clone()));

    let err = chain.run(&token).unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(err.attempts(), 2);
    assert_eq!(chain.status(), RunStatus::Canceled);
    assert_eq!(chain.runner(0).unwrap().status(), RunStatus::Fail);
    assert_eq!(chain.runner(1).unwrap().status(), RunStatus::NotStarted);

    // Cancellation is terminal: a fresh token does not resume the chain.
    let err = chain.run(&CancellationToken::new()).unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(err.attempts(), 2);
    assert_eq!(chain.status(), RunStatus::Canceled);
    assert_eq!(chain.runner(1).unwrap().status(), RunStatus::NotStarted);
    assert_eq!(primary_calls.load(Ordering::SeqCst), 2);
    assert_eq!(fallback_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_unbounded_delay_cancelled() {
    let (op, calls) = always_fails();
    let mut chain = Builder::new(op)
        .retry_count(2)
        .unwrap()
        .delay(FixedDelay::new(Duration::MAX).unwrap());

    let token = CancellationToken::new();
    let trigger = token.clone();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        trigger.cancel();
    });

    let err = chain.run(&token).unwrap_err();
    canceller.join().unwrap();

    assert!(err.is_cancelled());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(chain.status(), RunStatus::Canceled);
}

#[test]
fn test_blocking_delay_interrupted_by_cancel() {
    let (op, calls) = always_fails();
    let mut chain = Builder::new(op)
        .retry_count(5)
        .unwrap()
        .delay(FixedDelay::from_millis(10_000).unwrap());

    let token = CancellationToken::new();
    let trigger = token.clone();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(30));
        trigger.cancel();
    });

    let start = Instant::now();
    let err = chain.run(&token).unwrap_err();
    canceller.join().unwrap();

    assert!(err.is_cancelled());
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(chain.status(), RunStatus::Canceled);
}

// ============================================================================
// Async Tests
// ============================================================================

#[tokio::test]
async fn test_async_fails_twice_then_ok() {
    let (op, calls) = task_fails_then(2, "ok");
    let mut chain = Builder::new(op).retry_count(3).unwrap();

    assert_eq!(chain.run_async_uncancelled().await.unwrap(), "ok");
    assert_eq!(chain.status(), RunStatus::SuccessAfterRetries);
    assert_eq!(chain.attempts(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_async_always_failing() {
    let (op, _calls) = task_fails_then(u32::MAX, "unreachable");
    let mut chain = Builder::new(op)
        .retry_count(3)
        .unwrap()
        .delay(FixedDelay::from_millis(1).unwrap());

    let err = chain.run_async_uncancelled().await.unwrap_err();
    assert!(err.is_exhausted());
    assert_eq!(err.failures().len(), 3);
    assert_eq!(chain.status(), RunStatus::Fail);
}

#[tokio::test]
async fn test_async_fallback_chain() {
    let (primary, _) = task_fails_then(u32::MAX, "unreachable");
    let (fallback, _) = task_fails_then(0, "async fallback");

    let mut chain = Builder::new(primary)
        .retry_count(2)
        .unwrap()
        .then_try_with(fallback)
        .retry_count(1)
        .unwrap();

    assert_eq!(chain.run_async_uncancelled().await.unwrap(), "async fallback");
    assert_eq!(chain.attempts(), 3);
    assert_eq!(chain.runner(1).unwrap().status(), RunStatus::Success);
}

#[tokio::test]
async fn test_async_cancel_before_start() {
    let (op, calls) = task_fails_then(0, "never");
    let mut chain = Builder::new(op);
    let token = CancellationToken::new();
    token.cancel();

    let err = chain.run_async(&token).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(chain.status(), RunStatus::Canceled);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_async_cancel_after_exhausted_step_skips_fallback() {
    let token = CancellationToken::new();
    let (primary, _) = always_fails();
    let fallback: Operation<&'static str, io::Error> =
        Operation::task(|_token| async { Ok("resumed") });

    let mut chain = Builder::new(primary)
        .retry_count(1)
        .unwrap()
        .then_try_with(fallback)
        .observer(CancelOnExhausted(token.clone()));

    let err = chain.run_async(&token).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(err.attempts(), 1);
    assert_eq!(chain.status(), RunStatus::Canceled);
    assert_eq!(chain.runner(1).unwrap().status(), RunStatus::NotStarted);

    let err = chain.run_async_uncancelled().await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(chain.runner(1).unwrap().status(), RunStatus::NotStarted);
}

#[tokio::test]
async fn test_async_runs_blocking_operations_inline() {
    let (op, _calls) = fails_then(1, "inline");
    let mut chain = Builder::new(op);

    assert_eq!(chain.run_async_uncancelled().await.unwrap(), "inline");
    assert_eq!(chain.attempts(), 2);
}

#[test]
fn test_task_driven_by_blocking_run() {
    let (op, calls) = task_fails_then(1, "driven");
    let mut chain = Builder::new(op);

    assert_eq!(chain.run_blocking().unwrap(), "driven");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_task_observes_cancellation_token() {
    let op: Operation<(), io::Error> = Operation::task(|token: CancellationToken| async move {
        token.cancelled().await;
        Err(io::Error::other("stopped"))
    });
    let mut chain = Builder::new(op).retry_count(5).unwrap();

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    });

    let err = chain.run_async(&token).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(chain.attempts(), 1);
    assert!(chain.failures().is_empty());
}
