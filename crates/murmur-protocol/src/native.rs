//! Native binary codec: a stateful stream of serialized object graphs.
//!
//! Each direction of a connection opens with a four-byte stream header and
//! then carries back-to-back `bincode` encodings of [`Message`], with no
//! length prefix in between. The decoder finds object boundaries by
//! attempting a parse and retrying when the buffer runs short.
//!
//! ```text
//! +------+-----------+-----------+-----
//! | MRN1 | message 1 | message 2 | ...
//! +------+-----------+-----------+-----
//! ```

use std::io::{self, Cursor};

use bincode::Options;
use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{MAX_FRAME_LEN, finish_at_eof};
use crate::{Codec, Message, ProtocolError, ProtocolKind};

/// Opens every native stream.
pub const STREAM_MAGIC: &[u8; 4] = b"MRN1";

fn options() -> impl Options + Copy {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_limit(MAX_FRAME_LEN as u64)
}

/// A [`Codec`] for the native object stream.
///
/// The codec remembers whether the stream header has been read (decoder
/// side) or written (encoder side), so one instance must stay with one
/// connection half for its whole life. Native peers only talk to native
/// peers; the format is not readable by the JSON or XML codecs.
#[derive(Debug, Clone, Default)]
pub struct NativeCodec {
    header_read: bool,
    header_written: bool,
}

impl NativeCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_header(&mut self, src: &mut BytesMut) -> Result<bool, ProtocolError> {
        if self.header_read {
            return Ok(true);
        }
        if src.len() < STREAM_MAGIC.len() {
            return Ok(false);
        }
        if &src[..STREAM_MAGIC.len()] != STREAM_MAGIC {
            return Err(ProtocolError::MalformedFrame(format!(
                "bad native stream header {:02x?}",
                &src[..STREAM_MAGIC.len()]
            )));
        }
        src.advance(STREAM_MAGIC.len());
        self.header_read = true;
        Ok(true)
    }
}

impl Codec for NativeCodec {
    const KIND: ProtocolKind = ProtocolKind::Native;
}

impl Decoder for NativeCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(
        &mut self,
        src: &mut BytesMut,
    ) -> Result<Option<Message>, ProtocolError> {
        if !self.read_header(src)? || src.is_empty() {
            return Ok(None);
        }

        let mut cursor = Cursor::new(&src[..]);
        match options().deserialize_from::<_, Message>(&mut cursor) {
            Ok(message) => {
                let consumed = cursor.position() as usize;
                src.advance(consumed);
                Ok(Some(message))
            }
            Err(err) => match *err {
                bincode::ErrorKind::Io(ref io_err)
                    if io_err.kind() == io::ErrorKind::UnexpectedEof =>
                {
                    if src.len() > MAX_FRAME_LEN {
                        return Err(ProtocolError::MalformedFrame(format!(
                            "native object exceeds {MAX_FRAME_LEN} bytes"
                        )));
                    }
                    Ok(None)
                }
                bincode::ErrorKind::SizeLimit => {
                    Err(ProtocolError::MalformedFrame(format!(
                        "native object exceeds {MAX_FRAME_LEN} bytes"
                    )))
                }
                _ => Err(ProtocolError::Native(err)),
            },
        }
    }

    fn decode_eof(
        &mut self,
        src: &mut BytesMut,
    ) -> Result<Option<Message>, ProtocolError> {
        let decoded = self.decode(src)?;
        finish_at_eof(decoded, src)
    }
}

impl Encoder<Message> for NativeCodec {
    type Error = ProtocolError;

    fn encode(
        &mut self,
        message: Message,
        dst: &mut BytesMut,
    ) -> Result<(), ProtocolError> {
        let body = options().serialize(&message).map_err(|err| match *err {
            bincode::ErrorKind::SizeLimit => ProtocolError::MalformedFrame(
                format!("native object exceeds {MAX_FRAME_LEN} bytes"),
            ),
            _ => ProtocolError::Native(err),
        })?;

        if !self.header_written {
            dst.extend_from_slice(STREAM_MAGIC);
            self.header_written = true;
        }
        dst.extend_from_slice(&body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_all(messages: &[Message]) -> BytesMut {
        let mut codec = NativeCodec::new();
        let mut buf = BytesMut::new();
        for message in messages {
            codec.encode(message.clone(), &mut buf).unwrap();
        }
        buf
    }

    #[test]
    fn test_encode_writes_header_once() {
        let buf = encode_all(&[Message::LogoutRequest, Message::UserListRequest]);
        assert_eq!(&buf[..4], STREAM_MAGIC);
        let rest = &buf[4..];
        assert!(!rest.windows(4).any(|w| w == STREAM_MAGIC));
    }

    #[test]
    fn test_decode_round_trips_every_variant_within_itself() {
        let messages = vec![
            Message::LoginRequest {
                username: "alice".into(),
            },
            Message::LoginSuccess { session_id: None },
            Message::LoginFailure {
                reason: "Username cannot be empty.".into(),
            },
            Message::UserMessage {
                sender: Some("alice".into()),
                content: "ünïcödé".into(),
            },
            Message::ServerMessage {
                sender: None,
                content: "restart at noon".into(),
            },
            Message::UserListRequest,
            Message::roster(vec!["alice".into(), "bob".into()]),
            Message::UserJoined {
                username: "bob".into(),
            },
            Message::UserLeft {
                username: "bob".into(),
            },
            Message::LogoutRequest,
        ];
        let mut buf = encode_all(&messages);

        let mut codec = NativeCodec::new();
        for message in messages {
            assert_eq!(codec.decode(&mut buf).unwrap(), Some(message));
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_waits_when_object_is_split() {
        let full = encode_all(&[Message::chat("split across reads")]);
        let mut codec = NativeCodec::new();
        let mut buf = BytesMut::from(&full[..full.len() - 5]);

        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&full[full.len() - 5..]);
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Message::chat("split across reads"))
        );
    }

    #[test]
    fn test_decode_bad_header_is_malformed() {
        let mut buf = BytesMut::from(&b"JAVA\x00\x00\x00\x00"[..]);
        assert!(matches!(
            NativeCodec::new().decode(&mut buf),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_decode_eof_mid_object_is_truncated() {
        let full = encode_all(&[Message::chat("hello")]);
        let mut buf = BytesMut::from(&full[..full.len() - 2]);
        assert!(matches!(
            NativeCodec::new().decode_eof(&mut buf),
            Err(ProtocolError::TruncatedStream { .. })
        ));
    }

    #[test]
    fn test_decode_eof_after_header_only_ends_cleanly() {
        let mut buf = BytesMut::from(&STREAM_MAGIC[..]);
        assert!(NativeCodec::new().decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_huge_declared_string_is_malformed() {
        // UserMessage tag, `None` sender, then a string claiming 2 MB.
        let mut buf = BytesMut::from(&STREAM_MAGIC[..]);
        buf.extend_from_slice(&3u32.to_le_bytes());
        buf.extend_from_slice(&[0u8]);
        buf.extend_from_slice(&2_000_000u64.to_le_bytes());

        assert!(matches!(
            NativeCodec::new().decode(&mut buf),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }
}
