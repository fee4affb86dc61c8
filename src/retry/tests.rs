//! Tests for the retry module

use super::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use test_case::test_case;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
struct FakeFailure {
    status: Option<u16>,
    retry_after: Option<Duration>,
    canceled: bool,
}

impl FakeFailure {
    fn with_status(status: u16) -> Self {
        Self {
            status: Some(status),
            retry_after: None,
            canceled: false,
        }
    }

    fn throttled(retry_after: Option<Duration>) -> Self {
        Self {
            status: Some(429),
            retry_after,
            canceled: false,
        }
    }

    fn canceled() -> Self {
        Self {
            status: None,
            retry_after: None,
            canceled: true,
        }
    }
}

impl std::fmt::Display for FakeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fake failure {:?}", self.status)
    }
}

impl RetryableFailure for FakeFailure {
    fn status(&self) -> Option<u16> {
        self.status
    }

    fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    fn is_canceled(&self) -> bool {
        self.canceled
    }
}

fn fast_config(max_retries: u32) -> RetryConfig {
    RetryConfig::new(
        max_retries,
        Duration::from_millis(10),
        Duration::from_millis(100),
    )
}

// ============================================================================
// Config
// ============================================================================

#[test]
fn test_retry_config_default() {
    let config = RetryConfig::default();
    assert_eq!(config.max_retries, 4);
    assert_eq!(config.base_delay, Duration::from_millis(400));
    assert_eq!(config.max_delay, Duration::from_millis(8000));
}

#[test]
fn test_retry_config_disabled() {
    assert_eq!(RetryConfig::disabled().max_retries, 0);
}

#[test]
fn test_policy_with_max_retries() {
    let policy = RetryPolicy::default().with_max_retries(1);
    assert_eq!(policy.config().max_retries, 1);
    assert_eq!(policy.config().base_delay, Duration::from_millis(400));
}

// ============================================================================
// Retry-After parsing
// ============================================================================

#[test_case("2", Some(Duration::from_secs(2)); "whole seconds")]
#[test_case(" 0 ", Some(Duration::ZERO); "zero with whitespace")]
#[test_case("1.5", Some(Duration::from_millis(1500)); "fractional")]
#[test_case("-1", None; "negative")]
#[test_case("soon", None; "not a number")]
#[test_case("Wed, 21 Oct 2015 07:28:00 GMT", None; "http date")]
#[test_case("NaN", None; "nan")]
fn test_parse_retry_after(raw: &str, expected: Option<Duration>) {
    assert_eq!(parse_retry_after(raw), expected);
}

// ============================================================================
// Delay computation
// ============================================================================

#[test_case(0, 0.0, 400; "first retry")]
#[test_case(1, 0.0, 800; "second retry")]
#[test_case(3, 0.0, 3200; "fourth retry")]
#[test_case(5, 0.0, 8000; "capped at max")]
#[test_case(40, 0.0, 8000; "huge attempt does not overflow")]
#[test_case(0, 0.5, 440; "positive jitter")]
#[test_case(0, -0.5, 360; "negative jitter")]
fn test_compute_delay_exponential(attempt: u32, jitter: f64, expected_ms: u64) {
    let delay = compute_delay(&RetryConfig::default(), attempt, None, jitter);
    assert_eq!(delay.as_millis(), u128::from(expected_ms));
}

#[test]
fn test_compute_delay_jitter_bounds() {
    let config = RetryConfig::default();
    for attempt in 0..6 {
        let base = compute_delay(&config, attempt, None, 0.0);
        let low = compute_delay(&config, attempt, None, -1.0);
        let high = compute_delay(&config, attempt, None, 0.999);
        assert!(low >= base.mul_f64(0.8).max(MIN_DELAY));
        assert!(high <= base.mul_f64(1.2));
    }
}

#[test]
fn test_compute_delay_respects_retry_after() {
    let config = RetryConfig::default();
    let hint = Some(Duration::from_secs(2));

    for jitter in [-1.0, -0.5, 0.0, 0.5, 0.999] {
        let delay = compute_delay(&config, 0, hint, jitter);
        assert!(delay >= Duration::from_millis(2000), "{delay:?}");
        assert!(delay < Duration::from_millis(2400), "{delay:?}");
    }
}

#[test]
fn test_compute_delay_retry_after_not_capped() {
    let config = RetryConfig::default();
    let delay = compute_delay(&config, 0, Some(Duration::from_secs(30)), -1.0);
    assert_eq!(delay, Duration::from_secs(30));
}

#[test]
fn test_compute_delay_floor() {
    let config = fast_config(3);
    assert_eq!(compute_delay(&config, 0, None, -1.0), MIN_DELAY);
    assert_eq!(
        compute_delay(&config, 0, Some(Duration::ZERO), 0.9),
        MIN_DELAY
    );
}

#[test]
fn test_delay_for_is_within_bounds() {
    let policy = RetryPolicy::default();
    for _ in 0..200 {
        let delay = policy.delay_for(0, Some(Duration::from_secs(2)));
        assert!(delay >= Duration::from_millis(2000));
        assert!(delay < Duration::from_millis(2400));

        let delay = policy.delay_for(2, None);
        assert!(delay >= Duration::from_millis(1280));
        assert!(delay <= Duration::from_millis(1920));
    }
}

// ============================================================================
// Retry loop
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_success_without_delay() {
    let calls = AtomicU32::new(0);
    let started = Instant::now();

    let result: Result<&str, FakeFailure> = RetryPolicy::default()
        .run(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok("done") }
        })
        .await;

    assert_eq!(result.unwrap(), "done");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_always_throttled_is_bounded() {
    let calls = AtomicU32::new(0);

    let result: Result<(), FakeFailure> = RetryPolicy::new(fast_config(3))
        .run(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(FakeFailure::throttled(None)) }
        })
        .await;

    assert_eq!(result.unwrap_err().status, Some(429));
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn test_throttled_three_times_then_success() {
    let calls = AtomicU32::new(0);

    let result: Result<u32, FakeFailure> = RetryPolicy::new(RetryConfig::default())
        .run(|| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n <= 3 {
                    Err(FakeFailure::throttled(None))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), 4);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_is_waited() {
    let calls = AtomicU32::new(0);
    let started = Instant::now();

    let result: Result<(), FakeFailure> = RetryPolicy::default()
        .run(|| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(FakeFailure::throttled(Some(Duration::from_secs(2))))
                } else {
                    Ok(())
                }
            }
        })
        .await;

    assert!(result.is_ok());
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(2000), "{waited:?}");
    // the paused clock advances in whole milliseconds
    assert!(waited <= Duration::from_millis(2400), "{waited:?}");
}

#[tokio::test(start_paused = true)]
async fn test_zero_retry_after_waits_minimum() {
    let calls = AtomicU32::new(0);
    let started = Instant::now();

    let _: Result<(), FakeFailure> = RetryPolicy::default()
        .run(|| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(FakeFailure::throttled(Some(Duration::ZERO)))
                } else {
                    Ok(())
                }
            }
        })
        .await;

    assert!(started.elapsed() >= MIN_DELAY);
}

#[tokio::test(start_paused = true)]
async fn test_canceled_is_attempted_once() {
    let calls = AtomicU32::new(0);

    let result: Result<(), FakeFailure> = RetryPolicy::new(fast_config(10))
        .run(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(FakeFailure::canceled()) }
        })
        .await;

    assert!(result.unwrap_err().canceled);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_canceled_with_429_status_is_not_retried() {
    let calls = AtomicU32::new(0);

    let _: Result<(), FakeFailure> = RetryPolicy::new(fast_config(10))
        .run(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(FakeFailure {
                    status: Some(429),
                    retry_after: None,
                    canceled: true,
                })
            }
        })
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_interrupts_backoff() {
    let calls = AtomicU32::new(0);
    let cancel = CancellationToken::new();
    let started = Instant::now();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let result: Result<(), FakeFailure> = RetryPolicy::default()
        .run_with_cancel(Some(&cancel), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            let canceled = cancel.is_cancelled();
            async move {
                if n > 0 && canceled {
                    Err(FakeFailure::canceled())
                } else {
                    Err(FakeFailure::throttled(Some(Duration::from_secs(60))))
                }
            }
        })
        .await;

    assert!(result.unwrap_err().canceled);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(started.elapsed() < Duration::from_secs(1), "{:?}", started.elapsed());
}

#[tokio::test(start_paused = true)]
async fn test_uncanceled_token_waits_full_backoff() {
    let calls = AtomicU32::new(0);
    let cancel = CancellationToken::new();
    let started = Instant::now();

    let result: Result<(), FakeFailure> = RetryPolicy::default()
        .run_with_cancel(Some(&cancel), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(FakeFailure::throttled(Some(Duration::from_secs(2))))
                } else {
                    Ok(())
                }
            }
        })
        .await;

    assert!(result.is_ok());
    assert!(started.elapsed() >= Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_unbounded_max_retries_does_not_overflow() {
    let calls = AtomicU32::new(0);

    let result: Result<u32, FakeFailure> = RetryPolicy::new(fast_config(u32::MAX))
        .run(|| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(FakeFailure::throttled(None))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), 1);
}

#[test_case(400; "bad request")]
#[test_case(401; "unauthorized")]
#[test_case(500; "server error")]
#[test_case(503; "unavailable")]
#[tokio::test(start_paused = true)]
async fn test_other_statuses_not_retried(status: u16) {
    let calls = AtomicU32::new(0);

    let result: Result<(), FakeFailure> = RetryPolicy::new(fast_config(5))
        .run(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(FakeFailure::with_status(status)) }
        })
        .await;

    assert_eq!(result.unwrap_err().status, Some(status));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_on_rate_limit_helper() {
    let calls = AtomicU32::new(0);

    let result: Result<(), FakeFailure> = retry_on_rate_limit(fast_config(2), || {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err(FakeFailure::throttled(None)) }
    })
    .await;

    assert!(result.is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_each_run_starts_fresh() {
    let policy = RetryPolicy::new(fast_config(1));

    for _ in 0..2 {
        let calls = AtomicU32::new(0);
        let _: Result<(), FakeFailure> = policy
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FakeFailure::throttled(None)) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
