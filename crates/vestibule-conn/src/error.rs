//! Error types for the connection layer.

use vestibule_protocol::PlayerId;

/// Errors that can occur while redeeming a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The token doesn't match any session this process issued. Could be
    /// stale, mistyped, or malicious.
    #[error("session token not recognized")]
    NotFound,

    /// The session exists but can no longer be recovered — the absolute
    /// lifetime or the post-disconnect grace window elapsed.
    #[error("session expired for player {0}")]
    Expired(PlayerId),
}
