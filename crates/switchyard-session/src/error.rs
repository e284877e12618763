//! Error types for the session layer.

use crate::SessionState;

/// Errors that can occur during a session's lifecycle.
///
/// None of these ever take the server down: they end one login attempt,
/// or leave a session where it was.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The [`Authenticator`](crate::Authenticator) rejected the player.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Another live session is already registered under this name.
    #[error("player {0} is already connected")]
    NameConflict(String),

    /// The registry already holds as many sessions as it was asked to
    /// admit.
    #[error("server is full ({max} players)")]
    ServerFull { max: usize },

    /// The session has ended; it no longer accepts commands.
    #[error("session for {0} is closed")]
    Closed(String),

    /// The session could not be attached to a backend. The client stays on
    /// whatever backend it had before.
    #[error("backend {backend} unavailable: {reason}")]
    BackendUnavailable { backend: String, reason: String },

    /// A state change the session state machine does not allow.
    #[error("invalid session transition from {from} to {to}")]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },
}
