//! The [`Codec`] trait and the length-prefix framing shared by the JSON and
//! XML codecs.
//!
//! A codec is a `tokio_util` [`Decoder`] + [`Encoder`] pair over
//! [`Message`]. Decoders are fed a growing [`BytesMut`] and either return a
//! whole message (consuming exactly its bytes), ask for more input with
//! `Ok(None)`, or fail. They never hand back a partially-populated message.
//!
//! Length-prefixed wire shape:
//!
//! ```text
//! +----------------------------+---------------------------+
//! | Length L (4 bytes, BE)     | L bytes of UTF-8 payload  |
//! +----------------------------+---------------------------+
//! ```

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{Message, ProtocolError, ProtocolKind};

/// Largest payload a single frame may declare (and the largest native
/// object the native decoder will buffer).
pub const MAX_FRAME_LEN: usize = 1_000_000;

/// Size of the big-endian length prefix.
pub const LENGTH_HEADER_LEN: usize = 4;

/// A wire codec for [`Message`]s.
///
/// One instance belongs to one direction of one connection. A connection
/// clones the codec for its read half and its write half, so any state a
/// codec carries (the native stream header, the XML session identifier) is
/// per-connection by construction and never shared across connections.
///
/// ## Trait bounds
///
/// - `Clone + Default` → a fresh codec per connection half.
/// - `Send + Sync + 'static` → codecs live inside tasks spawned on the
///   Tokio runtime.
/// - `Unpin` → a framed writer over the codec can be driven through
///   `SinkExt` without pinning.
pub trait Codec:
    Decoder<Item = Message, Error = ProtocolError>
    + Encoder<Message, Error = ProtocolError>
    + Clone
    + Default
    + Send
    + Sync
    + Unpin
    + 'static
{
    /// Which protocol this codec speaks.
    const KIND: ProtocolKind;

    /// Binds the session identifier issued at login to this codec.
    ///
    /// Only the XML codec puts the identifier on the wire; the default is a
    /// no-op.
    fn bind_session(&mut self, _session_id: &str) {}

    /// The session identifier currently bound, if any.
    fn session_id(&self) -> Option<&str> {
        None
    }
}

/// Splits one length-prefixed payload off the front of `src`.
///
/// The declared length is validated before anything is reserved, so a
/// prefix of 2,000,000 fails immediately instead of waiting for (and
/// buffering) two megabytes.
pub(crate) fn split_frame(
    src: &mut BytesMut,
) -> Result<Option<BytesMut>, ProtocolError> {
    if src.len() < LENGTH_HEADER_LEN {
        return Ok(None);
    }

    let mut header = [0u8; LENGTH_HEADER_LEN];
    header.copy_from_slice(&src[..LENGTH_HEADER_LEN]);
    let declared = i32::from_be_bytes(header);
    if declared <= 0 || declared as usize > MAX_FRAME_LEN {
        return Err(ProtocolError::MalformedFrame(format!(
            "declared length {declared} outside 1..={MAX_FRAME_LEN}"
        )));
    }

    let len = declared as usize;
    let total = LENGTH_HEADER_LEN + len;
    if src.len() < total {
        src.reserve(total - src.len());
        return Ok(None);
    }

    src.advance(LENGTH_HEADER_LEN);
    Ok(Some(src.split_to(len)))
}

/// Appends `payload` to `dst` behind its length prefix.
pub(crate) fn put_frame(
    payload: &[u8],
    dst: &mut BytesMut,
) -> Result<(), ProtocolError> {
    if payload.is_empty() || payload.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::MalformedFrame(format!(
            "payload of {} bytes outside 1..={MAX_FRAME_LEN}",
            payload.len()
        )));
    }
    dst.reserve(LENGTH_HEADER_LEN + payload.len());
    dst.put_u32(payload.len() as u32);
    dst.extend_from_slice(payload);
    Ok(())
}

/// End-of-stream handling shared by every codec: a clean end on a frame
/// boundary ends the stream, leftover bytes are a truncated frame.
pub(crate) fn finish_at_eof(
    decoded: Option<Message>,
    src: &BytesMut,
) -> Result<Option<Message>, ProtocolError> {
    match decoded {
        Some(message) => Ok(Some(message)),
        None if src.is_empty() => Ok(None),
        None => Err(ProtocolError::TruncatedStream {
            buffered: src.len(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_frame_waits_for_full_header() {
        let mut buf = BytesMut::from(&[0u8, 0, 0][..]);
        assert!(split_frame(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 3, "nothing consumed");
    }

    #[test]
    fn test_split_frame_waits_for_full_payload() {
        let mut buf = BytesMut::new();
        buf.put_u32(5);
        buf.extend_from_slice(b"abc");
        assert!(split_frame(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 7, "nothing consumed");
    }

    #[test]
    fn test_split_frame_returns_exactly_one_payload() {
        let mut buf = BytesMut::new();
        put_frame(b"first", &mut buf).unwrap();
        put_frame(b"second", &mut buf).unwrap();

        let first = split_frame(&mut buf).unwrap().unwrap();
        assert_eq!(&first[..], b"first");
        let second = split_frame(&mut buf).unwrap().unwrap();
        assert_eq!(&second[..], b"second");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_split_frame_rejects_zero_length() {
        let mut buf = BytesMut::new();
        buf.put_u32(0);
        assert!(matches!(
            split_frame(&mut buf),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_split_frame_rejects_negative_length() {
        let mut buf = BytesMut::new();
        buf.put_i32(-1);
        assert!(matches!(
            split_frame(&mut buf),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_split_frame_rejects_oversized_length_without_reserving() {
        let mut buf = BytesMut::with_capacity(LENGTH_HEADER_LEN);
        buf.put_u32(2_000_000);
        let capacity_before = buf.capacity();

        assert!(matches!(
            split_frame(&mut buf),
            Err(ProtocolError::MalformedFrame(_))
        ));
        assert_eq!(buf.capacity(), capacity_before);
    }

    #[test]
    fn test_put_frame_rejects_empty_payload() {
        let mut buf = BytesMut::new();
        assert!(put_frame(b"", &mut buf).is_err());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_finish_at_eof_distinguishes_clean_end_from_truncation() {
        assert!(finish_at_eof(None, &BytesMut::new()).unwrap().is_none());

        let leftover = BytesMut::from(&b"\x00\x00"[..]);
        assert!(matches!(
            finish_at_eof(None, &leftover),
            Err(ProtocolError::TruncatedStream { buffered: 2 })
        ));
    }
}
