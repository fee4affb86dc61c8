//! HTTP client module
//!
//! Provides the single "perform request with resilience" entry point used by
//! every service call.
//!
//! # Features
//!
//! - **Rate-Limit Retries**: 429 responses are retried with backoff
//! - **Token Renewal**: 401 responses are recovered through the auth module
//! - **Cancellation**: Requests can be aborted with a cancellation token
//! - **Pacing**: Optional token bucket rate limiter using governor

mod client;
mod rate_limit;

pub use client::{
    join_url, retry_after_from_headers, HttpClient, HttpClientConfig, HttpClientConfigBuilder,
    RequestConfig,
};
pub use rate_limit::{RateLimiter, RateLimiterConfig};
