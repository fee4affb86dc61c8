//! Session invalidation hook
//!
//! When a 401 cannot be recovered, the coordinator tells the embedding
//! application through a [`SessionListener`]. A UI would navigate to its login
//! page; the CLI prints a hint.

use tracing::warn;

/// Why the session was invalidated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationReason {
    /// A request got 401 and there was no refresh token to renew with
    MissingRefreshToken,
    /// The renewal endpoint rejected the refresh token
    RenewalRejected,
}

impl std::fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingRefreshToken => write!(f, "no refresh token stored"),
            Self::RenewalRejected => write!(f, "refresh token rejected"),
        }
    }
}

/// Receives "session invalidated" notifications
pub trait SessionListener: Send + Sync {
    /// Called once per unrecoverable auth failure, after credentials are cleared
    fn session_invalidated(&self, reason: InvalidationReason);
}

impl<F> SessionListener for F
where
    F: Fn(InvalidationReason) + Send + Sync,
{
    fn session_invalidated(&self, reason: InvalidationReason) {
        self(reason);
    }
}

/// Listener that only logs
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingListener;

impl SessionListener for LoggingListener {
    fn session_invalidated(&self, reason: InvalidationReason) {
        warn!(%reason, "Session invalidated, login required");
    }
}
