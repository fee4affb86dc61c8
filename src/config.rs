//! Client configuration
//!
//! `PortalConfig` is loaded from YAML, every section optional, then
//! overridden from the environment. It converts into the runtime
//! `HttpClientConfig` and `AuthEndpoints`.

use crate::auth::{AuthEndpoints, CookieAttributes, DEFAULT_REFRESH_TTL_DAYS};
use crate::error::{Error, Result};
use crate::http::{join_url, HttpClientConfig, RateLimiterConfig};
use crate::retry::RetryConfig;
use crate::types::OptionStringExt;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding `base_url`
pub const ENV_BASE_URL: &str = "PORTAL_BASE_URL";

/// Environment variable overriding `credentials.path`
pub const ENV_CREDENTIALS_PATH: &str = "PORTAL_CREDENTIALS_PATH";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Complete client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    /// Base URL of the portal API
    pub base_url: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// User agent sent with every request
    pub user_agent: Option<String>,

    /// Rate-limit retry settings
    pub retry: RetryDef,

    /// Client-side pacing (disabled when absent)
    pub rate_limit: Option<RateLimiterConfig>,

    /// Auth endpoint paths
    pub auth: AuthDef,

    /// Credential persistence
    pub credentials: CredentialsDef,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api".to_string(),
            timeout_secs: 30,
            user_agent: None,
            retry: RetryDef::default(),
            rate_limit: None,
            auth: AuthDef::default(),
            credentials: CredentialsDef::default(),
        }
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Retry settings as written in the config file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryDef {
    /// Maximum retries after the first attempt
    pub max_retries: u32,
    /// Base backoff in milliseconds
    pub base_delay_ms: u64,
    /// Backoff cap in milliseconds
    pub max_delay_ms: u64,
}

impl Default for RetryDef {
    fn default() -> Self {
        let defaults = RetryConfig::default();
        Self {
            max_retries: defaults.max_retries,
            base_delay_ms: defaults.base_delay.as_millis() as u64,
            max_delay_ms: defaults.max_delay.as_millis() as u64,
        }
    }
}

impl From<RetryDef> for RetryConfig {
    fn from(def: RetryDef) -> Self {
        RetryConfig::new(
            def.max_retries,
            Duration::from_millis(def.base_delay_ms),
            Duration::from_millis(def.max_delay_ms),
        )
    }
}

/// Auth endpoint paths, relative to `base_url`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthDef {
    /// Login endpoint
    pub login_path: String,
    /// Token renewal endpoint
    pub refresh_path: String,
}

impl Default for AuthDef {
    fn default() -> Self {
        Self {
            login_path: "/auth/login".to_string(),
            refresh_path: "/auth/refresh-token".to_string(),
        }
    }
}

/// Credential persistence settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsDef {
    /// File holding the tokens
    pub path: PathBuf,
    /// Production deployment (`Secure` cookies)
    pub secure: bool,
    /// Refresh token lifetime when the server sends none
    pub refresh_ttl_days: i64,
}

impl Default for CredentialsDef {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".portal-credentials.json"),
            secure: true,
            refresh_ttl_days: DEFAULT_REFRESH_TTL_DAYS,
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

impl PortalConfig {
    /// Parse a config from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Load config from an optional YAML file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path).map_err(|e| {
                    Error::config(format!("Failed to read {}: {e}", path.display()))
                })?;
                Self::from_yaml(&contents)?
            }
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(base_url) = lookup(ENV_BASE_URL).none_if_empty() {
            self.base_url = base_url;
        }
        if let Some(path) = lookup(ENV_CREDENTIALS_PATH).none_if_empty() {
            self.credentials.path = PathBuf::from(path);
        }
    }

    /// Reject values the client cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(Error::invalid_value("base_url", "must not be empty"));
        }
        url::Url::parse(&self.base_url)
            .map_err(|e| Error::invalid_value("base_url", e.to_string()))?;

        if self.timeout_secs == 0 {
            return Err(Error::invalid_value("timeout_secs", "must be positive"));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(Error::invalid_value(
                "retry.base_delay_ms",
                "must not exceed retry.max_delay_ms",
            ));
        }
        if self.credentials.refresh_ttl_days <= 0 {
            return Err(Error::invalid_value(
                "credentials.refresh_ttl_days",
                "must be positive",
            ));
        }
        Ok(())
    }

    /// Runtime HTTP client configuration
    pub fn http_config(&self) -> HttpClientConfig {
        let mut builder = HttpClientConfig::builder()
            .base_url(self.base_url.clone())
            .timeout(Duration::from_secs(self.timeout_secs))
            .retry(self.retry.into());

        builder = match &self.rate_limit {
            Some(rate_limit) => builder.rate_limit(rate_limit.clone()),
            None => builder.no_rate_limit(),
        };
        if let Some(agent) = &self.user_agent {
            builder = builder.user_agent(agent.clone());
        }
        builder.build()
    }

    /// Full login and renewal URLs
    pub fn auth_endpoints(&self) -> AuthEndpoints {
        AuthEndpoints::new(
            join_url(&self.base_url, &self.auth.login_path),
            join_url(&self.base_url, &self.auth.refresh_path),
        )
    }

    /// Refresh token lifetime
    pub fn refresh_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.credentials.refresh_ttl_days)
    }

    /// Cookie attributes for rendering stored tokens
    pub fn cookie_attributes(&self) -> CookieAttributes {
        CookieAttributes::for_environment(self.credentials.secure)
    }
}
