use std::time::Duration;

use murmur_protocol::ProtocolError;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The peer is gone, or the connection was used after it closed.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// A read or write did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding or accepting connections failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// The bytes on the wire could not be framed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl TransportError {
    /// Returns `true` if the connection can keep reading after this error
    /// (an unsupported message type whose frame was consumed whole).
    pub fn is_skippable(&self) -> bool {
        matches!(self, Self::Protocol(err) if err.is_skippable())
    }

    /// Maps a codec error raised while writing. I/O failures become
    /// [`SendFailed`](Self::SendFailed); anything else stays a protocol
    /// error.
    pub(crate) fn from_write(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Io(io) => Self::SendFailed(io),
            other => Self::Protocol(other),
        }
    }

    /// Maps a codec error raised while reading.
    pub(crate) fn from_read(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Io(io) => Self::ReceiveFailed(io),
            other => Self::Protocol(other),
        }
    }
}
