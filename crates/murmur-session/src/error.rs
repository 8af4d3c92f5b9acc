//! Error types for the session layer.

use murmur_transport::ConnectionId;

use crate::SessionState;

/// Reason sent when the login name is empty after trimming.
pub const EMPTY_USERNAME: &str = "Username cannot be empty.";

/// Reason sent when the first frame is not a login request.
pub const INVALID_LOGIN: &str = "Invalid login request";

/// Errors that can occur during the session lifecycle.
///
/// The `Display` text of [`Handshake`](Self::Handshake) and
/// [`DuplicateUsername`](Self::DuplicateUsername) is exactly what the
/// client sees in its `LoginFailure`.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The first frame was not a usable login request.
    #[error("{0}")]
    Handshake(String),

    /// Another authenticated session already holds this name
    /// (compared case-insensitively).
    #[error("Username \"{0}\" is already taken.")]
    DuplicateUsername(String),

    /// The connection already holds a registry entry under another name.
    #[error("{id} is already registered as \"{username}\"")]
    AlreadyRegistered { id: ConnectionId, username: String },

    /// The session state machine does not allow this move.
    #[error("invalid session transition from {from} to {to}")]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },

    /// A message could not be queued for a session.
    #[error("delivery to {id} failed: {reason}")]
    Delivery {
        id: ConnectionId,
        reason: &'static str,
    },
}
