//! Credential types
//!
//! Tokens, their expiries, and the wire shapes of the login and renewal
//! endpoints.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default lifetime of a refresh token when the server gives none
pub const DEFAULT_REFRESH_TTL_DAYS: i64 = 7;

/// A bearer token with an optional expiry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    /// Opaque token value
    pub value: String,
    /// When the token expires (`None` = session-scoped)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl StoredToken {
    /// Create a new stored token
    pub fn new(value: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    /// Check if the token is expired at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    /// Render the token as a `Set-Cookie` header value
    pub fn set_cookie(&self, name: &str, attributes: &CookieAttributes) -> String {
        let mut cookie = format!("{name}={}; Path={}", self.value, attributes.path);
        if let Some(expires_at) = self.expires_at {
            cookie.push_str("; Expires=");
            cookie.push_str(&expires_at.format("%a, %d %b %Y %H:%M:%S GMT").to_string());
        }
        cookie.push_str("; SameSite=");
        cookie.push_str(attributes.same_site.as_str());
        if attributes.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

/// `SameSite` cookie policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SameSite {
    #[default]
    Strict,
    Lax,
}

impl SameSite {
    fn as_str(self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
        }
    }
}

/// Attributes for credentials rendered as cookies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieAttributes {
    /// Send only over HTTPS (production)
    pub secure: bool,
    /// Cross-site policy
    pub same_site: SameSite,
    /// Cookie path
    pub path: String,
}

impl Default for CookieAttributes {
    fn default() -> Self {
        Self {
            secure: true,
            same_site: SameSite::Strict,
            path: "/".to_string(),
        }
    }
}

impl CookieAttributes {
    /// Attributes for a development or production deployment
    pub fn for_environment(production: bool) -> Self {
        Self {
            secure: production,
            ..Self::default()
        }
    }
}

/// The pair of credentials persisted between runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Short-lived token sent with every request
    #[serde(default)]
    pub access_token: Option<StoredToken>,
    /// Longer-lived token used only for renewal
    #[serde(default)]
    pub refresh_token: Option<StoredToken>,
}

impl Credential {
    /// Check whether neither token is present
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none()
    }

    /// Drop tokens that have expired at `now`
    #[must_use]
    pub fn without_expired(mut self, now: DateTime<Utc>) -> Self {
        if self.access_token.as_ref().is_some_and(|t| t.is_expired_at(now)) {
            self.access_token = None;
        }
        if self.refresh_token.as_ref().is_some_and(|t| t.is_expired_at(now)) {
            self.refresh_token = None;
        }
        self
    }

    /// Build the credential that replaces this one after a login or renewal
    ///
    /// The refresh token is kept when the server did not rotate it.
    #[must_use]
    pub fn replaced_by(&self, grant: &TokenGrant, now: DateTime<Utc>, refresh_ttl: Duration) -> Self {
        let access_token = StoredToken::new(
            grant.token.clone(),
            sanitize_expiry(grant.expires_at.as_deref(), now),
        );

        let refresh_token = match &grant.refresh_token {
            Some(value) => Some(StoredToken::new(
                value.clone(),
                sanitize_expiry(grant.refresh_expires_at.as_deref(), now)
                    .or_else(|| now.checked_add_signed(refresh_ttl)),
            )),
            None => self.refresh_token.clone(),
        };

        Self {
            access_token: Some(access_token),
            refresh_token,
        }
    }
}

/// Parse a server-supplied expiry, dropping past or unparsable values
pub fn sanitize_expiry(raw: Option<&str>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw?.trim()).ok()?;
    let expires_at = parsed.with_timezone(&Utc);
    (expires_at > now).then_some(expires_at)
}

/// Standard response envelope of the portal API
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    /// Whether the call succeeded
    pub status: bool,
    /// Human-readable message
    #[serde(default)]
    pub message: Option<String>,
    /// Payload
    #[serde(default = "Option::default")]
    pub data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    /// Payload of a successful envelope
    pub fn into_data(self) -> Option<T> {
        if self.status {
            self.data
        } else {
            None
        }
    }
}

/// Tokens returned by the login and renewal endpoints
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenGrant {
    /// New access token
    pub token: String,
    /// Rotated refresh token, if any
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Access token expiry (ISO 8601)
    #[serde(default)]
    pub expires_at: Option<String>,
    /// Refresh token expiry (ISO 8601)
    #[serde(default)]
    pub refresh_expires_at: Option<String>,
}

/// Body of the renewal call
#[derive(Debug, Clone, Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Body of the login call
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// Snapshot of the stored credential for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialStatus {
    /// Whether an access token is available
    pub authenticated: bool,
    /// Access token expiry
    pub access_expires_at: Option<DateTime<Utc>>,
    /// Whether a refresh token is available
    pub can_refresh: bool,
    /// Refresh token expiry
    pub refresh_expires_at: Option<DateTime<Utc>>,
}

impl From<&Credential> for CredentialStatus {
    fn from(credential: &Credential) -> Self {
        Self {
            authenticated: credential.access_token.is_some(),
            access_expires_at: credential.access_token.as_ref().and_then(|t| t.expires_at),
            can_refresh: credential.refresh_token.is_some(),
            refresh_expires_at: credential.refresh_token.as_ref().and_then(|t| t.expires_at),
        }
    }
}
