//! Length-prefixed JSON codec.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{finish_at_eof, put_frame, split_frame};
use crate::{Codec, Message, ProtocolError, ProtocolKind, WireMessage};

/// A [`Codec`] that frames each message as a flat JSON object behind a
/// 4-byte big-endian length.
///
/// The object always carries all four keys (`type`, `sender`, `content`,
/// `userList`); the ones a variant does not use are `null`. On input, any of
/// the three optional keys may also be omitted.
///
/// ## Example
///
/// ```rust
/// use bytes::BytesMut;
/// use murmur_protocol::{JsonCodec, Message};
/// use tokio_util::codec::{Decoder, Encoder};
///
/// let mut codec = JsonCodec;
/// let mut buf = BytesMut::new();
/// codec.encode(Message::chat("hi"), &mut buf).unwrap();
///
/// let decoded = codec.decode(&mut buf).unwrap();
/// assert_eq!(decoded, Some(Message::chat("hi")));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    const KIND: ProtocolKind = ProtocolKind::Json;
}

impl Decoder for JsonCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(
        &mut self,
        src: &mut BytesMut,
    ) -> Result<Option<Message>, ProtocolError> {
        let Some(payload) = split_frame(src)? else {
            return Ok(None);
        };
        // The frame is already consumed here, so an unknown `type` leaves
        // the stream aligned on the next frame.
        let wire: WireMessage = serde_json::from_slice(&payload)?;
        Message::try_from(wire).map(Some)
    }

    fn decode_eof(
        &mut self,
        src: &mut BytesMut,
    ) -> Result<Option<Message>, ProtocolError> {
        let decoded = self.decode(src)?;
        finish_at_eof(decoded, src)
    }
}

impl Encoder<Message> for JsonCodec {
    type Error = ProtocolError;

    fn encode(
        &mut self,
        message: Message,
        dst: &mut BytesMut,
    ) -> Result<(), ProtocolError> {
        let payload = serde_json::to_vec(&WireMessage::from(message))?;
        put_frame(&payload, dst)
    }
}

#[cfg(test)]
mod tests {
    use bytes::BufMut;

    use super::*;

    fn frame(json: &str) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u32(json.len() as u32);
        buf.extend_from_slice(json.as_bytes());
        buf
    }

    // =====================================================================
    // Decoding
    // =====================================================================

    #[test]
    fn test_decode_accepts_omitted_optional_keys() {
        let mut buf = frame(r#"{"type":"USER_LIST_REQUEST"}"#);
        let decoded = JsonCodec.decode(&mut buf).unwrap();
        assert_eq!(decoded, Some(Message::UserListRequest));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_reads_roster_from_user_list() {
        let mut buf = frame(
            r#"{"type":"USER_LIST_RESPONSE","sender":null,"content":null,"userList":["alice","bob"]}"#,
        );
        let decoded = JsonCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.user_list().unwrap(), ["alice", "bob"]);
    }

    #[test]
    fn test_decode_unknown_type_consumes_frame() {
        let mut buf = frame(r#"{"type":"PING"}"#);
        buf.extend_from_slice(&frame(r#"{"type":"LOGOUT_REQUEST"}"#));

        let first = JsonCodec.decode(&mut buf);
        assert!(matches!(first, Err(ref e) if e.is_skippable()));

        let second = JsonCodec.decode(&mut buf).unwrap();
        assert_eq!(second, Some(Message::LogoutRequest));
    }

    #[test]
    fn test_decode_invalid_json_is_error() {
        let mut buf = frame("{not json");
        assert!(matches!(
            JsonCodec.decode(&mut buf),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn test_decode_oversized_declared_length_is_malformed() {
        let mut buf = BytesMut::new();
        buf.put_u32(2_000_000);
        assert!(matches!(
            JsonCodec.decode(&mut buf),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }

    // =====================================================================
    // Truncation
    // =====================================================================

    #[test]
    fn test_decode_eof_after_header_is_truncated() {
        let mut buf = BytesMut::new();
        buf.put_u32(40);
        assert!(matches!(
            JsonCodec.decode_eof(&mut buf),
            Err(ProtocolError::TruncatedStream { buffered: 4 })
        ));
    }

    #[test]
    fn test_decode_eof_mid_payload_is_truncated() {
        let mut buf = frame(r#"{"type":"LOGOUT_REQUEST"}"#);
        buf.truncate(buf.len() - 3);
        assert!(matches!(
            JsonCodec.decode_eof(&mut buf),
            Err(ProtocolError::TruncatedStream { .. })
        ));
    }

    #[test]
    fn test_decode_eof_on_frame_boundary_ends_cleanly() {
        let mut buf = BytesMut::new();
        assert!(JsonCodec.decode_eof(&mut buf).unwrap().is_none());
    }

    // =====================================================================
    // Encoding
    // =====================================================================

    #[test]
    fn test_encode_writes_length_prefix_and_null_fields() {
        let mut buf = BytesMut::new();
        JsonCodec
            .encode(
                Message::UserJoined {
                    username: "carol".into(),
                },
                &mut buf,
            )
            .unwrap();

        let declared = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        assert_eq!(declared as usize, buf.len() - 4);

        let json: serde_json::Value = serde_json::from_slice(&buf[4..]).unwrap();
        assert_eq!(json["type"], "USER_JOINED");
        assert_eq!(json["sender"], "carol");
        assert!(json["content"].is_null());
        assert!(json["userList"].is_null());
    }

    #[test]
    fn test_round_trip_preserves_every_variant() {
        let messages = vec![
            Message::LoginRequest {
                username: "alice".into(),
            },
            Message::LoginSuccess {
                session_id: Some("abc".into()),
            },
            Message::LoginFailure {
                reason: "nope".into(),
            },
            Message::UserMessage {
                sender: Some("bob".into()),
                content: "hi \"there\"".into(),
            },
            Message::ServerMessage {
                sender: Some("server".into()),
                content: "restart at noon".into(),
            },
            Message::UserListRequest,
            Message::roster(vec!["alice".into()]),
            Message::UserJoined {
                username: "carol".into(),
            },
            Message::UserLeft {
                username: "bob".into(),
            },
            Message::LogoutRequest,
        ];

        let mut buf = BytesMut::new();
        for message in &messages {
            JsonCodec.encode(message.clone(), &mut buf).unwrap();
        }
        for message in messages {
            assert_eq!(JsonCodec.decode(&mut buf).unwrap(), Some(message));
        }
        assert!(buf.is_empty());
    }
}
