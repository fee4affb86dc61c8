//! Authentication module
//!
//! Bearer token attachment and single-flight token renewal.
//!
//! The `AuthCoordinator` owns the renewal state and the waiter queue; the
//! `CredentialStore` persists tokens between runs; a `SessionListener` is told
//! when a 401 cannot be recovered.

mod coordinator;
mod session;
mod store;
mod types;

pub use coordinator::{AuthCoordinator, AuthEndpoints, RenewalFailure};
pub use session::{InvalidationReason, LoggingListener, SessionListener};
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use types::{
    sanitize_expiry, ApiEnvelope, CookieAttributes, Credential, CredentialStatus, SameSite,
    StoredToken, TokenGrant, DEFAULT_REFRESH_TTL_DAYS,
};
