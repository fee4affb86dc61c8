//! HTTP client with rate-limit retries and token renewal
//!
//! Every request goes through one path:
//! - wait for the client-side pacer (if configured)
//! - attach the bearer token
//! - on 401, recover through the `AuthCoordinator` and replay once
//! - on 429, back off and retry the whole attempt

use super::rate_limit::{RateLimiter, RateLimiterConfig};
use crate::auth::AuthCoordinator;
use crate::error::{Error, Result};
use crate::retry::{parse_retry_after, RetryConfig, RetryPolicy};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Configuration for the HTTP client
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Base URL for all requests
    pub base_url: Option<String>,
    /// Request timeout
    pub timeout: Duration,
    /// Rate-limit retry configuration
    pub retry: RetryConfig,
    /// Rate limiter configuration
    pub rate_limit: Option<RateLimiterConfig>,
    /// Default headers for all requests
    pub default_headers: HashMap<String, String>,
    /// User agent string
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            rate_limit: None,
            default_headers: HashMap::new(),
            user_agent: format!("portal-client/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpClientConfig {
    /// Create a new config builder
    pub fn builder() -> HttpClientConfigBuilder {
        HttpClientConfigBuilder::default()
    }
}

/// Builder for HTTP client config
#[derive(Default)]
pub struct HttpClientConfigBuilder {
    config: HttpClientConfig,
}

impl HttpClientConfigBuilder {
    /// Set the base URL
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = Some(url.into());
        self
    }

    /// Set the request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set max retries
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.retry.max_retries = retries;
        self
    }

    /// Set backoff configuration
    pub fn backoff(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.config.retry.base_delay = base_delay;
        self.config.retry.max_delay = max_delay;
        self
    }

    /// Set the whole retry configuration
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Set rate limiter
    pub fn rate_limit(mut self, config: RateLimiterConfig) -> Self {
        self.config.rate_limit = Some(config);
        self
    }

    /// Disable rate limiting
    pub fn no_rate_limit(mut self) -> Self {
        self.config.rate_limit = None;
        self
    }

    /// Add a default header
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.default_headers.insert(key.into(), value.into());
        self
    }

    /// Set user agent
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.config.user_agent = agent.into();
        self
    }

    /// Build the config
    pub fn build(self) -> HttpClientConfig {
        self.config
    }
}

/// Configuration for a single request
#[derive(Debug, Clone, Default)]
pub struct RequestConfig {
    /// Query parameters
    pub query: HashMap<String, String>,
    /// Request headers
    pub headers: HashMap<String, String>,
    /// Request body (JSON)
    pub body: Option<Value>,
    /// Override timeout for this request
    pub timeout: Option<Duration>,
    /// Override max retries for this request
    pub max_retries: Option<u32>,
    /// Abort signal for this request
    pub cancel: Option<CancellationToken>,
}

impl RequestConfig {
    /// Create a new request config
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a query parameter
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    /// Add a header
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set JSON body
    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Set timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set max retries
    #[must_use]
    pub fn retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Abort the request when `token` is cancelled
    #[must_use]
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub(crate) fn is_canceled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }
}

/// HTTP client with rate-limit retries and token renewal
pub struct HttpClient {
    client: Client,
    config: HttpClientConfig,
    auth: Option<Arc<AuthCoordinator>>,
    rate_limiter: Option<RateLimiter>,
    retry: RetryPolicy,
}

impl HttpClient {
    /// Create a new HTTP client with default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(HttpClientConfig::default())
    }

    /// Create a new HTTP client with custom configuration
    pub fn with_config(config: HttpClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {e}")))?;

        let rate_limiter = config.rate_limit.as_ref().map(RateLimiter::new);
        let retry = RetryPolicy::new(config.retry);

        Ok(Self {
            client,
            config,
            auth: None,
            rate_limiter,
            retry,
        })
    }

    /// Create a client that authenticates through `auth`
    pub fn with_auth(config: HttpClientConfig, auth: Arc<AuthCoordinator>) -> Result<Self> {
        let mut client = Self::with_config(config)?;
        client.auth = Some(auth);
        Ok(client)
    }

    /// Set the auth coordinator
    pub fn set_auth(&mut self, auth: Arc<AuthCoordinator>) {
        self.auth = Some(auth);
    }

    /// Get the auth coordinator
    pub fn auth(&self) -> Option<&Arc<AuthCoordinator>> {
        self.auth.as_ref()
    }

    /// Get the underlying reqwest client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Get the retry policy
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Make a GET request
    pub async fn get(&self, url: &str) -> Result<Response> {
        self.request(Method::GET, url, RequestConfig::default())
            .await
    }

    /// Make a GET request with config
    pub async fn get_with_config(&self, url: &str, config: RequestConfig) -> Result<Response> {
        self.request(Method::GET, url, config).await
    }

    /// Make a POST request
    pub async fn post(&self, url: &str, body: Value) -> Result<Response> {
        self.request(Method::POST, url, RequestConfig::default().json(body))
            .await
    }

    /// Make a PUT request
    pub async fn put(&self, url: &str, body: Value) -> Result<Response> {
        self.request(Method::PUT, url, RequestConfig::default().json(body))
            .await
    }

    /// Make a PATCH request
    pub async fn patch(&self, url: &str, body: Value) -> Result<Response> {
        self.request(Method::PATCH, url, RequestConfig::default().json(body))
            .await
    }

    /// Make a DELETE request
    pub async fn delete(&self, url: &str) -> Result<Response> {
        self.request(Method::DELETE, url, RequestConfig::default())
            .await
    }

    /// Perform a request with rate-limit retries and token renewal
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        config: RequestConfig,
    ) -> Result<Response> {
        let full_url = self.build_url(url);
        let policy = match config.max_retries {
            Some(max_retries) => self.retry.with_max_retries(max_retries),
            None => self.retry.clone(),
        };

        // set once the request has been replayed after a renewal
        let replayed = AtomicBool::new(false);

        let method = &method;
        let full_url = full_url.as_str();
        let config = &config;
        let replayed = &replayed;
        policy
            .run_with_cancel(config.cancel.as_ref(), move || {
                self.attempt(method, full_url, config, replayed)
            })
            .await
    }

    /// One attempt: send, and on 401 renew and replay once
    async fn attempt(
        &self,
        method: &Method,
        url: &str,
        config: &RequestConfig,
        replayed: &AtomicBool,
    ) -> Result<Response> {
        let token = match &self.auth {
            Some(auth) => auth.bearer_token().await?,
            None => None,
        };

        match self.send(method, url, config, token.as_deref()).await {
            Err(err) if err.is_unauthorized() => {
                let Some(auth) = &self.auth else {
                    return Err(err);
                };
                if replayed.load(Ordering::SeqCst) {
                    return Err(err);
                }

                let token = auth.recover(url, err).await?;
                replayed.store(true, Ordering::SeqCst);

                if config.is_canceled() {
                    return Err(Error::Canceled);
                }
                debug!("Replaying {} {} with renewed token", method, url);
                self.send(method, url, config, Some(&token)).await
            }
            other => other,
        }
    }

    /// Send a single request and classify the response
    async fn send(
        &self,
        method: &Method,
        url: &str,
        config: &RequestConfig,
        token: Option<&str>,
    ) -> Result<Response> {
        if config.is_canceled() {
            return Err(Error::Canceled);
        }

        // Wait for rate limiter
        if let Some(ref limiter) = self.rate_limiter {
            limiter.wait().await;
        }

        // Build request
        let mut req = self.client.request(method.clone(), url);

        // Add default headers
        for (key, value) in &self.config.default_headers {
            req = req.header(key.as_str(), value.as_str());
        }

        // Add request-specific headers
        for (key, value) in &config.headers {
            req = req.header(key.as_str(), value.as_str());
        }

        // Add query parameters
        if !config.query.is_empty() {
            req = req.query(&config.query);
        }

        // Add body
        if let Some(ref body) = config.body {
            req = req.json(body);
        }

        let timeout = config.timeout.unwrap_or(self.config.timeout);
        req = req.timeout(timeout);

        if let Some(token) = token {
            req = req.bearer_auth(token);
        }

        debug!("Sending {} {}", method, url);
        let sent = match &config.cancel {
            Some(cancel) => tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Error::Canceled),
                sent = req.send() => sent,
            },
            None => req.send().await,
        };

        let response = match sent {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return Err(Error::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            Err(e) => return Err(Error::Http(e)),
        };

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = retry_after_from_headers(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(Error::RateLimited { retry_after, body });
        }

        if status.is_client_error() || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        debug!("Request succeeded: {} {}", method, url);
        Ok(response)
    }

    /// Make a request and parse JSON response
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        config: RequestConfig,
    ) -> Result<T> {
        let response = self.request(method, url, config).await?;
        let json: T = response.json().await.map_err(Error::Http)?;
        Ok(json)
    }

    /// Make a GET request and parse JSON response
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        self.request_json(Method::GET, url, RequestConfig::default())
            .await
    }

    /// Check if rate limiting is enabled
    pub fn has_rate_limiter(&self) -> bool {
        self.rate_limiter.is_some()
    }

    /// Build full URL from path
    pub fn build_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }

        match &self.config.base_url {
            Some(base) => join_url(base, path),
            None => path.to_string(),
        }
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("config", &self.config)
            .field("has_auth", &self.auth.is_some())
            .field("has_rate_limiter", &self.rate_limiter.is_some())
            .finish_non_exhaustive()
    }
}

/// Join a base URL and a path with exactly one slash between them
pub fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

/// Extract the `Retry-After` hint from response headers
pub fn retry_after_from_headers(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after)
}
