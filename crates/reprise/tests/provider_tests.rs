//! Operation provider tests
//!
//! Each `try_*` entry point is driven end to end through a builder, sync and
//! async, with and without bound arguments.

mod common;

use std::io;
use std::time::Duration;

use common::*;
use reprise::{
    try_action, try_function, try_task, try_task_with_args, try_with_args, CancellationToken,
    FixedDelay, Operation, RunStatus, StatsObserver,
};
use std::sync::Arc;

#[test]
fn test_action_exhausts_budget() {
    init_tracing();
    let counter = CallCounter::new();
    let calls = counter.clone();

    let mut chain = try_action(move || Err(transient(calls.hit())))
        .retry_count(3)
        .unwrap();

    let err = chain.run_blocking().unwrap_err();
    assert!(err.is_exhausted());
    assert_eq!(err.failures().len(), 3);
    assert_eq!(counter.count(), 3);
    assert_eq!(chain.status(), RunStatus::Fail);
}

#[test]
fn test_function_fails_twice_then_ok() {
    init_tracing();
    let counter = CallCounter::new();
    let calls = counter.clone();

    let mut chain = try_function(move || {
        let call = calls.hit();
        if call < 3 {
            Err(transient(call))
        } else {
            Ok("ok".to_string())
        }
    })
    .retry_count(3)
    .unwrap()
    .delay(FixedDelay::from_millis(1).unwrap());

    assert_eq!(chain.run_blocking().unwrap(), "ok");
    assert_eq!(chain.status(), RunStatus::SuccessAfterRetries);
    assert_eq!(chain.attempts(), 3);
}

#[test]
fn test_bound_arguments_reach_every_attempt() {
    init_tracing();
    let counter = CallCounter::new();
    let calls = counter.clone();

    let mut chain = try_with_args(
        move |(host, port, path): (String, u16, String)| {
            let call = calls.hit();
            let url = format!("{}:{}{}", host, port, path);
            if call == 1 {
                Err(transient(call))
            } else {
                Ok(url)
            }
        },
        ("localhost".to_string(), 8080u16, "/health".to_string()),
    );

    assert_eq!(chain.run_blocking().unwrap(), "localhost:8080/health");
    assert_eq!(counter.count(), 2);
}

#[test]
fn test_zero_retry_count_rejected() {
    let counter = CallCounter::new();
    let calls = counter.clone();

    let result = try_action(move || {
        calls.hit();
        Ok::<(), io::Error>(())
    })
    .retry_count(0);

    assert!(result.unwrap_err().is_invalid_argument());
    assert_eq!(counter.count(), 0);
}

#[tokio::test]
async fn test_task_fails_twice_then_ok() {
    init_tracing();
    let counter = CallCounter::new();
    let calls = counter.clone();

    let mut chain = try_task(move |_token| {
        let call = calls.hit();
        async move {
            if call < 3 {
                Err(transient(call))
            } else {
                Ok(call)
            }
        }
    })
    .retry_count(3)
    .unwrap();

    assert_eq!(chain.run_async_uncancelled().await.unwrap(), 3);
    assert_eq!(chain.status(), RunStatus::SuccessAfterRetries);
}

#[tokio::test]
async fn test_task_with_args() {
    init_tracing();
    let mut chain = try_task_with_args(
        |(a, b): (u64, u64), _token| async move {
            tokio::time::sleep(Duration::from_millis(1)).await;
            a.checked_mul(b).ok_or_else(|| io::Error::other("overflow"))
        },
        (6u64, 7u64),
    );

    assert_eq!(chain.run_async_uncancelled().await.unwrap(), 42);
    assert_eq!(chain.status(), RunStatus::Success);
}

#[tokio::test]
async fn test_task_fallback_to_alternate_operation() {
    init_tracing();
    let stats = Arc::new(StatsObserver::new());

    let mut chain = try_task(|_token| async { Err::<&'static str, _>(transient(0)) })
        .retry_count(2)
        .unwrap()
        .then_try_with(Operation::task(|_token| async { Ok("cached copy") }))
        .retry_count(1)
        .unwrap()
        .shared_observer(stats.clone());

    assert_eq!(chain.run_async_uncancelled().await.unwrap(), "cached copy");
    assert_eq!(chain.attempts(), 3);
    assert_eq!(chain.runner(0).unwrap().failures().len(), 2);
    assert_eq!(chain.runner(1).unwrap().status(), RunStatus::Success);
    assert_eq!(stats.snapshot().fallbacks, 1);
}

#[tokio::test]
async fn test_task_cancelled_before_start() {
    let counter = CallCounter::new();
    let calls = counter.clone();

    let mut chain = try_task(move |_token| {
        calls.hit();
        async { Ok::<_, io::Error>(()) }
    })
    .then_try();

    let token = CancellationToken::new();
    token.cancel();

    let err = chain.run_async(&token).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(chain.status(), RunStatus::Canceled);
    assert_eq!(counter.count(), 0);
}

#[tokio::test]
async fn test_cancellation_interrupts_delay() {
    init_tracing();
    let mut chain = try_task(|_token| async { Err::<(), _>(transient(0)) })
        .retry_count(10)
        .unwrap()
        .delay(FixedDelay::from_millis(60_000).unwrap());

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = chain.run_async(&token).await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(err.attempts(), 1);
    assert_eq!(chain.status(), RunStatus::Canceled);
}
