//! Error types for the protocol layer.
//!
//! Each crate in Murmur defines its own error enum. A `ProtocolError` always
//! means the bytes on the wire were wrong (or could not be produced), never
//! that a socket went away or a login was refused.

/// Errors that can occur while encoding or decoding frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The frame header is unusable: a length prefix outside
    /// `1..=MAX_FRAME_LEN`, a wrong native stream header, or an XML document
    /// missing a required element.
    ///
    /// Raised before any payload is buffered, so a hostile length prefix
    /// never turns into an allocation.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// The stream ended in the middle of a frame.
    #[error("stream truncated with {buffered} byte(s) of an incomplete frame")]
    TruncatedStream { buffered: usize },

    /// The codec has no mapping for this message type (an unknown JSON
    /// `type`, XML root element, command or event name).
    #[error("unsupported message type: {0}")]
    UnsupportedMessageType(String),

    /// The JSON payload could not be parsed or produced.
    #[error("json codec failed: {0}")]
    Json(#[from] serde_json::Error),

    /// The XML payload could not be parsed.
    #[error("xml codec failed: {0}")]
    Xml(#[from] quick_xml::Error),

    /// The native object stream could not be parsed or produced.
    #[error("native codec failed: {0}")]
    Native(#[from] bincode::Error),

    /// Reading or writing the underlying stream failed.
    ///
    /// `tokio_util` requires codec errors to be constructible from
    /// `io::Error`, which is how socket errors surface through a framed
    /// reader or writer.
    #[error("i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns `true` when the offending frame was consumed whole and the
    /// stream is still aligned on a frame boundary, so reading can go on.
    pub fn is_skippable(&self) -> bool {
        matches!(self, Self::UnsupportedMessageType(_))
    }
}
