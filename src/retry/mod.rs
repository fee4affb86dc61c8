//! Rate-limit retry module
//!
//! Wraps any async operation and retries it while the server answers with
//! HTTP 429.
//!
//! # Features
//!
//! - **Retry-After**: Honors the server's hint when one is sent
//! - **Exponential Backoff**: `base_delay * 2^attempt`, capped at `max_delay`
//! - **Jitter**: Up to 20% randomization, floored at 200ms
//! - **Cancellation**: Canceled operations are never retried

mod policy;

pub use policy::{
    compute_delay, parse_retry_after, retry_on_rate_limit, RetryConfig, RetryPolicy,
    RetryableFailure, MIN_DELAY,
};

#[cfg(test)]
mod tests;
