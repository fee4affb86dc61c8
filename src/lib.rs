// Allow common clippy pedantic lints that aren't critical for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::needless_pass_by_value)]

//! # Portal Client
//!
//! Resilient HTTP client for the admin portal API.
//!
//! ## Features
//!
//! - **Rate-Limit Retries**: 429 responses are retried with jittered
//!   exponential backoff that honors `Retry-After`
//! - **Token Renewal**: a 401 triggers at most one concurrent renewal; other
//!   failing requests wait for it and replay with the new token
//! - **Credential Persistence**: tokens survive between runs in a JSON file
//! - **Cancellation**: in-flight requests and pending retries can be aborted
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use portal_client::auth::{AuthCoordinator, FileCredentialStore};
//! use portal_client::config::PortalConfig;
//! use portal_client::http::HttpClient;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> portal_client::Result<()> {
//!     let config = PortalConfig::load(None)?;
//!     let store = Arc::new(FileCredentialStore::new(&config.credentials.path));
//!     let auth = Arc::new(AuthCoordinator::new(config.auth_endpoints(), store));
//!     let client = HttpClient::with_auth(config.http_config(), auth)?;
//!
//!     let products: serde_json::Value = client.get_json("/products").await?;
//!     println!("{products}");
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                HttpClient::request()                     │
//! └──────────────────────────────────────────────────────────┘
//!                             │
//! ┌──────────────────┬────────┴─────────┬────────────────────┐
//! │   RetryPolicy    │  AuthCoordinator │  CredentialStore   │
//! ├──────────────────┼──────────────────┼────────────────────┤
//! │ 429 backoff      │ bearer attach    │ memory             │
//! │ Retry-After      │ single renewal   │ JSON file          │
//! │ jitter           │ waiter queue     │ expiry filtering   │
//! └──────────────────┴──────────────────┴────────────────────┘
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

// ============================================================================
// Module declarations
// ============================================================================

/// Error types for the client
pub mod error;

/// Common types and type aliases
pub mod types;

/// Client configuration
pub mod config;

/// Rate-limit retry policy
pub mod retry;

/// Bearer tokens and single-flight renewal
pub mod auth;

/// HTTP client with retries and token renewal
pub mod http;

/// Command-line interface
pub mod cli;

// ============================================================================
// Re-exports
// ============================================================================

pub use error::{Error, Result};
pub use types::*;

// Re-export commonly used types
pub use auth::{AuthCoordinator, CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use config::PortalConfig;
pub use http::{HttpClient, HttpClientConfig, RequestConfig};
pub use retry::{RetryConfig, RetryPolicy};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
