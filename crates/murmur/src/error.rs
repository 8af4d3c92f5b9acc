//! Unified error type for Murmur.

use murmur_protocol::ProtocolError;
use murmur_session::SessionError;
use murmur_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `murmur` crate you deal with this single error type
/// instead of importing errors from each layer. The `#[from]` attribute on
/// each variant lets `?` convert layer errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum MurmurError {
    /// A transport-level error (bind, connection, send, recv, timeout).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (framing, encode, decode).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (login rejected, delivery failed).
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl MurmurError {
    /// The reason to show a user whose login was refused, if that is what
    /// this error is.
    pub fn login_failure(&self) -> Option<String> {
        match self {
            Self::Session(e @ (SessionError::Handshake(_) | SessionError::DuplicateUsername(_))) => {
                Some(e.to_string())
            }
            _ => None,
        }
    }
}
