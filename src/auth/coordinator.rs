//! Auth refresh coordinator
//!
//! Attaches bearer tokens to outbound requests and recovers from 401s by
//! renewing the access token. At most one renewal runs at a time per
//! coordinator; requests that fail while it is in flight queue up and share
//! its outcome.

use super::session::{InvalidationReason, LoggingListener, SessionListener};
use super::store::CredentialStore;
use super::types::{
    ApiEnvelope, Credential, CredentialStatus, LoginRequest, RefreshRequest, TokenGrant,
    DEFAULT_REFRESH_TTL_DAYS,
};
use crate::error::{Error, Result};
use crate::http::retry_after_from_headers;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Login and renewal endpoint URLs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEndpoints {
    /// Full URL of the login endpoint
    pub login_url: String,
    /// Full URL of the renewal endpoint
    pub refresh_url: String,
}

impl AuthEndpoints {
    /// Create endpoints from full URLs
    pub fn new(login_url: impl Into<String>, refresh_url: impl Into<String>) -> Self {
        Self {
            login_url: login_url.into(),
            refresh_url: refresh_url.into(),
        }
    }

    /// Check if `url` targets the login or renewal endpoint
    pub fn is_auth_endpoint(&self, url: &str) -> bool {
        let path = url_path(url);
        path == url_path(&self.login_url) || path == url_path(&self.refresh_url)
    }
}

/// Path component of `url` without a trailing slash
fn url_path(url: &str) -> String {
    let path = match url::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split('?').next().unwrap_or(url).to_string(),
    };
    path.trim_end_matches('/').to_string()
}

/// Why a renewal did not produce a token
///
/// Cloned to every queued request, so it carries plain data only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewalFailure {
    /// HTTP status of the renewal response, if one arrived
    pub status: Option<u16>,
    /// `Retry-After` sent with a throttled renewal
    pub retry_after: Option<Duration>,
    /// Description of the failure
    pub message: String,
}

impl RenewalFailure {
    fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            retry_after: None,
            message: message.into(),
        }
    }

    /// Whether the renewal endpoint only rate-limited us
    pub fn is_throttled(&self) -> bool {
        self.status == Some(StatusCode::TOO_MANY_REQUESTS.as_u16())
    }
}

impl From<RenewalFailure> for Error {
    fn from(failure: RenewalFailure) -> Self {
        if failure.is_throttled() {
            Error::RateLimited {
                retry_after: failure.retry_after,
                body: failure.message,
            }
        } else {
            Error::TokenRefresh {
                status: failure.status,
                message: failure.message,
            }
        }
    }
}

type RenewalOutcome = std::result::Result<String, RenewalFailure>;
type Waiter = oneshot::Sender<RenewalOutcome>;

enum RefreshState {
    Idle,
    Refreshing(Vec<Waiter>),
}

/// Returns the coordinator to idle if the renewing task goes away early
struct RefreshGuard<'a> {
    state: &'a Mutex<RefreshState>,
    settled: bool,
}

impl<'a> RefreshGuard<'a> {
    fn new(state: &'a Mutex<RefreshState>) -> Self {
        Self {
            state,
            settled: false,
        }
    }

    /// Go idle and hand back the queued waiters
    fn settle(mut self) -> Vec<Waiter> {
        self.settled = true;
        take_waiters(self.state)
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        // dropping the senders fails every queued receiver
        let waiters = take_waiters(self.state);
        warn!(
            queued = waiters.len(),
            "Token renewal abandoned before it settled"
        );
    }
}

fn take_waiters(state: &Mutex<RefreshState>) -> Vec<Waiter> {
    match std::mem::replace(&mut *state.lock(), RefreshState::Idle) {
        RefreshState::Refreshing(waiters) => waiters,
        RefreshState::Idle => Vec::new(),
    }
}

/// Coordinates bearer tokens and single-flight renewal
pub struct AuthCoordinator {
    endpoints: AuthEndpoints,
    store: Arc<dyn CredentialStore>,
    listener: Arc<dyn SessionListener>,
    http_client: Client,
    refresh_ttl: chrono::Duration,
    /// Live token from the current session, preferred over the stored one
    session_token: RwLock<Option<String>>,
    state: Mutex<RefreshState>,
}

impl AuthCoordinator {
    /// Create a coordinator for `endpoints` backed by `store`
    pub fn new(endpoints: AuthEndpoints, store: Arc<dyn CredentialStore>) -> Self {
        Self::with_client(endpoints, store, Client::new())
    }

    /// Create a coordinator with a custom HTTP client for login and renewal
    pub fn with_client(
        endpoints: AuthEndpoints,
        store: Arc<dyn CredentialStore>,
        http_client: Client,
    ) -> Self {
        Self {
            endpoints,
            store,
            listener: Arc::new(LoggingListener),
            http_client,
            refresh_ttl: chrono::Duration::days(DEFAULT_REFRESH_TTL_DAYS),
            session_token: RwLock::new(None),
            state: Mutex::new(RefreshState::Idle),
        }
    }

    /// Set the session-invalidated listener
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn SessionListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Set the refresh token lifetime used when the server sends none
    #[must_use]
    pub fn with_refresh_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.refresh_ttl = ttl;
        self
    }

    /// Get the configured endpoints
    pub fn endpoints(&self) -> &AuthEndpoints {
        &self.endpoints
    }

    /// Get the credential store
    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Set or clear the live session token
    pub fn set_session_token(&self, token: Option<String>) {
        *self.session_token.write() = token;
    }

    /// Check if a renewal is in flight
    pub fn is_refreshing(&self) -> bool {
        matches!(*self.state.lock(), RefreshState::Refreshing(_))
    }

    /// Token to attach to the next request, if any
    pub async fn bearer_token(&self) -> Result<Option<String>> {
        let session = self.session_token.read().clone();
        if let Some(token) = session {
            return Ok(Some(token));
        }
        let credential = self.store.get().await?;
        Ok(credential.access_token.map(|t| t.value))
    }

    /// Report which tokens are stored
    pub async fn status(&self) -> Result<CredentialStatus> {
        let credential = self.store.get().await?;
        Ok(CredentialStatus::from(&credential))
    }

    /// Recover from a 401 on `url`
    ///
    /// Returns the token to replay the request with. `original` is handed back
    /// when recovery is not possible (auth endpoints, no refresh token).
    pub async fn recover(&self, url: &str, original: Error) -> Result<String> {
        if self.endpoints.is_auth_endpoint(url) {
            debug!(url, "401 from an auth endpoint, not renewing");
            return Err(original);
        }

        let credential = self.store.get().await?;
        let Some(refresh_token) = credential.refresh_token.clone() else {
            self.invalidate(InvalidationReason::MissingRefreshToken)
                .await;
            return Err(original);
        };

        // check-and-set: no await while the state lock is held
        let waiter = {
            let mut state = self.state.lock();
            match &mut *state {
                RefreshState::Refreshing(waiters) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Some(rx)
                }
                RefreshState::Idle => {
                    *state = RefreshState::Refreshing(Vec::new());
                    None
                }
            }
        };

        if let Some(rx) = waiter {
            debug!(url, "Renewal in flight, queueing request");
            return match rx.await {
                Ok(outcome) => outcome.map_err(Error::from),
                Err(_) => Err(Error::token_refresh(
                    None,
                    "Renewal was abandoned before it settled",
                )),
            };
        }

        let guard = RefreshGuard::new(&self.state);
        debug!(url, "Renewing access token");
        let outcome = self.renew(&refresh_token.value, &credential).await;

        match &outcome {
            Ok(_) => info!("Access token renewed"),
            Err(failure) if failure.is_throttled() => {
                warn!(message = %failure.message, "Renewal rate limited, keeping credentials");
            }
            Err(failure) => {
                warn!(status = ?failure.status, message = %failure.message, "Renewal failed");
                self.clear_credentials().await;
            }
        }

        let waiters = guard.settle();
        if !waiters.is_empty() {
            debug!(queued = waiters.len(), "Releasing queued requests");
        }
        for waiter in waiters {
            // a waiter whose request was dropped no longer listens
            let _ = waiter.send(outcome.clone());
        }

        outcome.map_err(|failure| {
            if !failure.is_throttled() {
                self.listener
                    .session_invalidated(InvalidationReason::RenewalRejected);
            }
            Error::from(failure)
        })
    }

    /// Log in and persist the returned credential
    pub async fn login(&self, email: &str, password: &str) -> Result<CredentialStatus> {
        let response = self
            .http_client
            .post(&self.endpoints.login_url)
            .json(&LoginRequest { email, password })
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = retry_after_from_headers(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(Error::RateLimited { retry_after, body });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::auth(format!(
                "Login request failed with status {}: {body}",
                status.as_u16()
            )));
        }

        let envelope: ApiEnvelope<TokenGrant> = response.json().await?;
        let message = envelope.message.clone();
        let grant = envelope
            .into_data()
            .ok_or_else(|| Error::auth(message.unwrap_or_else(|| "Login rejected".to_string())))?;

        let credential = Credential::default().replaced_by(&grant, Utc::now(), self.refresh_ttl);
        self.store.set(&credential).await?;
        self.set_session_token(Some(grant.token));

        info!("Logged in");
        Ok(CredentialStatus::from(&credential))
    }

    /// Forget all credentials without notifying the listener
    pub async fn logout(&self) -> Result<()> {
        self.set_session_token(None);
        self.store.clear().await?;
        info!("Logged out");
        Ok(())
    }

    /// Call the renewal endpoint and persist the result
    async fn renew(&self, refresh_token: &str, current: &Credential) -> RenewalOutcome {
        let response = self
            .http_client
            .post(&self.endpoints.refresh_url)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(|e| RenewalFailure::new(None, format!("Refresh token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_from_headers(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(RenewalFailure {
                status: Some(status.as_u16()),
                retry_after,
                message: format!(
                    "Refresh token request failed with status {}: {body}",
                    status.as_u16()
                ),
            });
        }

        let envelope: ApiEnvelope<TokenGrant> = response.json().await.map_err(|e| {
            RenewalFailure::new(None, format!("Malformed renewal response: {e}"))
        })?;
        let message = envelope.message.clone();
        let grant = envelope.into_data().ok_or_else(|| {
            RenewalFailure::new(
                None,
                message.unwrap_or_else(|| "Renewal rejected by server".to_string()),
            )
        })?;

        let credential = current.replaced_by(&grant, Utc::now(), self.refresh_ttl);
        if let Err(e) = self.store.set(&credential).await {
            // the new token is still good for this process
            warn!(error = %e, "Failed to persist renewed credentials");
        }
        self.set_session_token(Some(grant.token.clone()));

        Ok(grant.token)
    }

    async fn clear_credentials(&self) {
        self.set_session_token(None);
        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "Failed to clear credentials");
        }
    }

    async fn invalidate(&self, reason: InvalidationReason) {
        warn!(%reason, "Cannot recover from 401, clearing credentials");
        self.clear_credentials().await;
        self.listener.session_invalidated(reason);
    }
}

impl std::fmt::Debug for AuthCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthCoordinator")
            .field("endpoints", &self.endpoints)
            .field("refreshing", &self.is_refreshing())
            .finish_non_exhaustive()
    }
}
