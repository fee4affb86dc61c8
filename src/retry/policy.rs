//! Retry policy implementation
//!
//! The policy is stateless across calls: every `run` starts at attempt 0 and
//! each attempt invokes the operation from scratch.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Lower bound for any computed delay
pub const MIN_DELAY: Duration = Duration::from_millis(200);

/// Fraction of the delay used as jitter
const JITTER_RATIO: f64 = 0.2;

/// Status code that triggers a retry
const TOO_MANY_REQUESTS: u16 = 429;

/// Failure shape the retry policy understands
pub trait RetryableFailure {
    /// HTTP-like status code, if the failure carries one
    fn status(&self) -> Option<u16>;

    /// Parsed `Retry-After` hint sent with the failure
    fn retry_after(&self) -> Option<Duration>;

    /// Whether the caller aborted the operation
    fn is_canceled(&self) -> bool;
}

/// Configuration for rate-limit retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry when no hint is given
    pub base_delay: Duration,
    /// Cap for the exponential delay
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 4,
            base_delay: Duration::from_millis(400),
            max_delay: Duration::from_millis(8000),
        }
    }
}

impl RetryConfig {
    /// Create a new retry config
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Config that never retries
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Copy of this config with a different retry budget
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Parse a `Retry-After` header value given in seconds
///
/// Fractional values are accepted. Negative, non-finite, and non-numeric
/// values (including HTTP dates) yield `None`.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let seconds: f64 = value.trim().parse().ok()?;
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(seconds).ok()
}

/// Compute the wait before the next attempt
///
/// `jitter` is a sample in `[-1.0, 1.0)`. The exponential delay is scaled by
/// up to ±20%. A server hint is a minimum, so the sample is remapped onto
/// `[0, 20%)` above it.
pub fn compute_delay(
    config: &RetryConfig,
    attempt: u32,
    retry_after: Option<Duration>,
    jitter: f64,
) -> Duration {
    let jitter = jitter.clamp(-1.0, 1.0);
    let (base, factor) = match retry_after {
        Some(hint) => (hint, 1.0 + JITTER_RATIO * (jitter + 1.0) / 2.0),
        None => {
            let exponential = config
                .base_delay
                .checked_mul(2u32.saturating_pow(attempt))
                .unwrap_or(config.max_delay);
            (
                exponential.min(config.max_delay),
                1.0 + JITTER_RATIO * jitter,
            )
        }
    };

    Duration::try_from_secs_f64(base.as_secs_f64() * factor)
        .unwrap_or(Duration::MAX)
        .max(MIN_DELAY)
}

/// Retry policy for rate-limited operations
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a policy with the given config
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Get the policy config
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Copy of this policy with a different retry budget
    #[must_use]
    pub fn with_max_retries(&self, max_retries: u32) -> Self {
        Self::new(self.config.with_max_retries(max_retries))
    }

    /// Whether a failure at `attempt` should be retried
    pub fn should_retry<E: RetryableFailure>(&self, error: &E, attempt: u32) -> bool {
        !error.is_canceled()
            && error.status() == Some(TOO_MANY_REQUESTS)
            && attempt < self.config.max_retries
    }

    /// Randomized delay for the given attempt
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let jitter = rand::thread_rng().gen_range(-1.0..1.0);
        compute_delay(&self.config, attempt, retry_after, jitter)
    }

    /// Run `operation`, retrying while it fails with 429
    pub async fn run<T, E, F, Fut>(&self, operation: F) -> Result<T, E>
    where
        E: RetryableFailure + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_with_cancel(None, operation).await
    }

    /// Run `operation`, cutting the backoff short when `cancel` fires
    ///
    /// A canceled wait goes straight to the next attempt. The operation is
    /// expected to observe the same token and fail as canceled, which ends the
    /// loop.
    pub async fn run_with_cancel<T, E, F, Fut>(
        &self,
        cancel: Option<&CancellationToken>,
        mut operation: F,
    ) -> Result<T, E>
    where
        E: RetryableFailure + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if error.is_canceled() {
                        debug!("Operation canceled, not retrying");
                        return Err(error);
                    }
                    if !self.should_retry(&error, attempt) {
                        return Err(error);
                    }

                    let delay = self.delay_for(attempt, error.retry_after());
                    warn!(
                        error = %error,
                        "Rate limited (429), attempt {}/{}, retrying in {:?}",
                        attempt + 1,
                        self.config.max_retries.saturating_add(1),
                        delay
                    );
                    match cancel {
                        Some(cancel) => tokio::select! {
                            biased;
                            () = cancel.cancelled() => debug!("Backoff interrupted by cancellation"),
                            () = tokio::time::sleep(delay) => {}
                        },
                        None => tokio::time::sleep(delay).await,
                    }
                    attempt += 1;
                }
            }
        }
    }
}

/// Run `operation` under a one-off policy built from `config`
pub async fn retry_on_rate_limit<T, E, F, Fut>(config: RetryConfig, operation: F) -> Result<T, E>
where
    E: RetryableFailure + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    RetryPolicy::new(config).run(operation).await
}
