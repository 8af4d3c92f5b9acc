//! Length-prefixed XML codec.
//!
//! Each frame carries one small XML document whose root element is one of
//! `command`, `success`, `error` or `event`:
//!
//! | Message            | Document                                                         |
//! |--------------------|------------------------------------------------------------------|
//! | `LoginRequest`     | `<command name="login"><name>N</name><type>T</type></command>`   |
//! | `LoginSuccess`     | `<success><session>ID</session></success>`                       |
//! | `LoginFailure`     | `<error><message>R</message></error>`                            |
//! | `UserListRequest`  | `<command name="list"><session>ID</session></command>`           |
//! | `UserListResponse` | `<success><listusers><user><name>N</name>..</user>*</listusers></success>` |
//! | `UserMessage`      | `<command name="message"><message>C</message><session>ID</session></command>` |
//! | `ServerMessage`    | `<event name="message"><message>C</message><name>N</name></event>` |
//! | `UserJoined`       | `<event name="userlogin"><name>N</name></event>`                 |
//! | `UserLeft`         | `<event name="userlogout"><name>N</name></event>`                |
//! | `LogoutRequest`    | `<command name="logout"><session>ID</session></command>`         |

use std::borrow::Cow;

use bytes::BytesMut;
use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{finish_at_eof, put_frame, split_frame};
use crate::{Codec, Message, ProtocolError, ProtocolKind, generate_session_id};

/// Client type string sent in `<type>` elements.
pub const CLIENT_TYPE: &str = "MurmurClient";

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// A [`Codec`] for the XML command/event schema.
///
/// The codec owns the connection's session identifier. It is learned from a
/// decoded `LoginSuccess` (client side) or from an encoded one (server
/// side), or bound explicitly with [`Codec::bind_session`], and is written
/// into every `list`, `message` and `logout` command this codec encodes.
#[derive(Debug, Clone, Default)]
pub struct XmlCodec {
    session_id: Option<String>,
}

impl XmlCodec {
    pub fn new() -> Self {
        Self::default()
    }

    fn encode_document(&mut self, message: Message) -> String {
        let mut out = String::from(XML_DECLARATION);
        match message {
            Message::LoginRequest { username } => {
                out.push_str(r#"<command name="login">"#);
                leaf(&mut out, "name", &username);
                leaf(&mut out, "type", CLIENT_TYPE);
                out.push_str("</command>");
            }
            Message::LoginSuccess { session_id } => {
                let id = session_id
                    .or_else(|| self.session_id.clone())
                    .unwrap_or_else(generate_session_id);
                out.push_str("<success>");
                leaf(&mut out, "session", &id);
                out.push_str("</success>");
                self.session_id = Some(id);
            }
            Message::LoginFailure { reason } => {
                out.push_str("<error>");
                leaf(&mut out, "message", &reason);
                out.push_str("</error>");
            }
            Message::UserListRequest => {
                out.push_str(r#"<command name="list">"#);
                self.push_session(&mut out);
                out.push_str("</command>");
            }
            Message::UserListResponse { users } => {
                out.push_str("<success><listusers>");
                for user in &users {
                    out.push_str("<user>");
                    leaf(&mut out, "name", user);
                    leaf(&mut out, "type", CLIENT_TYPE);
                    out.push_str("</user>");
                }
                out.push_str("</listusers></success>");
            }
            Message::UserMessage { sender, content } => {
                out.push_str(r#"<command name="message">"#);
                leaf(&mut out, "message", &content);
                self.push_session(&mut out);
                if let Some(sender) = sender {
                    leaf(&mut out, "name", &sender);
                }
                out.push_str("</command>");
            }
            Message::ServerMessage { sender, content } => {
                out.push_str(r#"<event name="message">"#);
                leaf(&mut out, "message", &content);
                if let Some(sender) = sender {
                    leaf(&mut out, "name", &sender);
                }
                out.push_str("</event>");
            }
            Message::UserJoined { username } => {
                out.push_str(r#"<event name="userlogin">"#);
                leaf(&mut out, "name", &username);
                out.push_str("</event>");
            }
            Message::UserLeft { username } => {
                out.push_str(r#"<event name="userlogout">"#);
                leaf(&mut out, "name", &username);
                out.push_str("</event>");
            }
            Message::LogoutRequest => {
                out.push_str(r#"<command name="logout">"#);
                self.push_session(&mut out);
                out.push_str("</command>");
            }
        }
        out
    }

    fn push_session(&self, out: &mut String) {
        leaf(out, "session", self.session_id.as_deref().unwrap_or_default());
    }

    fn decode_document(&mut self, root: Element) -> Result<Message, ProtocolError> {
        match root.name.as_str() {
            "command" => decode_command(&root),
            "event" => decode_event(&root),
            "error" => Ok(Message::LoginFailure {
                reason: root.child_text("message").unwrap_or_default().to_string(),
            }),
            "success" => {
                if let Some(session) = root.child("session") {
                    let id = session.text.clone();
                    self.session_id = Some(id.clone());
                    Ok(Message::LoginSuccess {
                        session_id: Some(id),
                    })
                } else if let Some(list) = root.child("listusers") {
                    let users = list
                        .children
                        .iter()
                        .filter(|child| child.name == "user")
                        .filter_map(|user| user.child_text("name"))
                        .map(str::to_string)
                        .collect();
                    Ok(Message::UserListResponse { users })
                } else {
                    Err(ProtocolError::MalformedFrame(
                        "<success> without <session> or <listusers>".into(),
                    ))
                }
            }
            other => Err(ProtocolError::UnsupportedMessageType(other.to_string())),
        }
    }
}

impl Codec for XmlCodec {
    const KIND: ProtocolKind = ProtocolKind::Xml;

    fn bind_session(&mut self, session_id: &str) {
        self.session_id = Some(session_id.to_string());
    }

    fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }
}

impl Decoder for XmlCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(
        &mut self,
        src: &mut BytesMut,
    ) -> Result<Option<Message>, ProtocolError> {
        let Some(payload) = split_frame(src)? else {
            return Ok(None);
        };
        let text = std::str::from_utf8(&payload).map_err(|err| {
            ProtocolError::MalformedFrame(format!("xml payload is not utf-8: {err}"))
        })?;
        let root = parse_tree(text)?;
        self.decode_document(root).map(Some)
    }

    fn decode_eof(
        &mut self,
        src: &mut BytesMut,
    ) -> Result<Option<Message>, ProtocolError> {
        let decoded = self.decode(src)?;
        finish_at_eof(decoded, src)
    }
}

impl Encoder<Message> for XmlCodec {
    type Error = ProtocolError;

    fn encode(
        &mut self,
        message: Message,
        dst: &mut BytesMut,
    ) -> Result<(), ProtocolError> {
        let document = self.encode_document(message);
        put_frame(document.as_bytes(), dst)
    }
}

fn leaf(out: &mut String, tag: &str, text: &str) {
    out.push('<');
    out.push_str(tag);
    out.push('>');
    out.push_str(&escape(text));
    out.push_str("</");
    out.push_str(tag);
    out.push('>');
}

// ---------------------------------------------------------------------------
// Decoding helpers
// ---------------------------------------------------------------------------

fn decode_command(root: &Element) -> Result<Message, ProtocolError> {
    let name = root.attr_name.as_deref().unwrap_or_default();
    if name == "login" {
        return Ok(Message::LoginRequest {
            username: root.child_text("name").unwrap_or_default().to_string(),
        });
    }

    let message = match name {
        "list" => Message::UserListRequest,
        "logout" => Message::LogoutRequest,
        "message" => Message::UserMessage {
            sender: root.child_text("name").map(str::to_string),
            content: root.child_text("message").unwrap_or_default().to_string(),
        },
        other => {
            return Err(ProtocolError::UnsupportedMessageType(format!(
                "command {other:?}"
            )));
        }
    };
    if root.child("session").is_none() {
        return Err(ProtocolError::MalformedFrame(format!(
            "command {name:?} without <session>"
        )));
    }
    Ok(message)
}

fn decode_event(root: &Element) -> Result<Message, ProtocolError> {
    let username = root.child_text("name").unwrap_or_default().to_string();
    match root.attr_name.as_deref().unwrap_or_default() {
        "message" => Ok(Message::ServerMessage {
            sender: root.child_text("name").map(str::to_string),
            content: root.child_text("message").unwrap_or_default().to_string(),
        }),
        "userlogin" => Ok(Message::UserJoined { username }),
        "userlogout" => Ok(Message::UserLeft { username }),
        other => Err(ProtocolError::UnsupportedMessageType(format!(
            "event {other:?}"
        ))),
    }
}

/// Just enough of a DOM for the schema: element name, the `name`
/// attribute, accumulated text and child elements.
#[derive(Debug, Default)]
struct Element {
    name: String,
    attr_name: Option<String>,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn open(start: &BytesStart<'_>) -> Result<Self, ProtocolError> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let attr_name = match start
            .try_get_attribute("name")
            .map_err(quick_xml::Error::from)?
        {
            Some(attr) => Some(attr.unescape_value()?.into_owned()),
            None => None,
        };
        Ok(Self {
            name,
            attr_name,
            ..Self::default()
        })
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|child| child.name == name)
    }

    fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|child| child.text.as_str())
    }
}

fn parse_tree(text: &str) -> Result<Element, ProtocolError> {
    let mut reader = Reader::from_str(text);
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let finished = match reader.read_event()? {
            Event::Start(start) => {
                stack.push(Element::open(&start)?);
                None
            }
            Event::Empty(start) => Some(Element::open(&start)?),
            Event::End(_) => stack.pop(),
            Event::Text(chunk) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&chunk.unescape()?);
                }
                None
            }
            Event::CData(chunk) => {
                if let Some(current) = stack.last_mut() {
                    let raw: Cow<'_, str> = String::from_utf8_lossy(&chunk);
                    current.text.push_str(&raw);
                }
                None
            }
            Event::Eof => break,
            _ => None,
        };

        if let Some(element) = finished {
            match stack.last_mut() {
                Some(parent) => parent.children.push(element),
                None if root.is_none() => root = Some(element),
                None => {
                    return Err(ProtocolError::MalformedFrame(
                        "more than one root element".into(),
                    ));
                }
            }
        }
    }

    if let Some(open) = stack.last() {
        return Err(ProtocolError::MalformedFrame(format!(
            "unclosed <{}>",
            open.name
        )));
    }
    root.ok_or_else(|| ProtocolError::MalformedFrame("empty xml document".into()))
}

#[cfg(test)]
mod tests {
    use bytes::BufMut;

    use super::*;

    fn frame(xml: &str) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u32(xml.len() as u32);
        buf.extend_from_slice(xml.as_bytes());
        buf
    }

    fn encoded_text(codec: &mut XmlCodec, message: Message) -> String {
        let mut buf = BytesMut::new();
        codec.encode(message, &mut buf).unwrap();
        String::from_utf8(buf[4..].to_vec()).unwrap()
    }

    // =====================================================================
    // Document shapes
    // =====================================================================

    #[test]
    fn test_encode_login_request_shape() {
        let xml = encoded_text(
            &mut XmlCodec::new(),
            Message::LoginRequest {
                username: "alice".into(),
            },
        );
        assert!(xml.starts_with(XML_DECLARATION));
        assert!(xml.ends_with(
            r#"<command name="login"><name>alice</name><type>MurmurClient</type></command>"#
        ));
    }

    #[test]
    fn test_encode_commands_carry_bound_session() {
        let mut codec = XmlCodec::new();
        codec.bind_session("s-1");

        let list = encoded_text(&mut codec, Message::UserListRequest);
        assert!(list.ends_with(r#"<command name="list"><session>s-1</session></command>"#));

        let chat = encoded_text(&mut codec, Message::chat("hello"));
        assert!(chat.ends_with(
            r#"<command name="message"><message>hello</message><session>s-1</session></command>"#
        ));

        let logout = encoded_text(&mut codec, Message::LogoutRequest);
        assert!(logout.ends_with(r#"<command name="logout"><session>s-1</session></command>"#));
    }

    #[test]
    fn test_encode_events_and_roster_shapes() {
        let mut codec = XmlCodec::new();

        let joined = encoded_text(&mut codec, Message::UserJoined { username: "bob".into() });
        assert!(joined.ends_with(r#"<event name="userlogin"><name>bob</name></event>"#));

        let left = encoded_text(&mut codec, Message::UserLeft { username: "bob".into() });
        assert!(left.ends_with(r#"<event name="userlogout"><name>bob</name></event>"#));

        let server = encoded_text(
            &mut codec,
            Message::ServerMessage {
                sender: Some("server".into()),
                content: "restart soon".into(),
            },
        );
        assert!(server.ends_with(
            r#"<event name="message"><message>restart soon</message><name>server</name></event>"#
        ));

        let roster = encoded_text(&mut codec, Message::roster(vec!["a".into(), "b".into()]));
        assert!(roster.ends_with(
            "<success><listusers>\
             <user><name>a</name><type>MurmurClient</type></user>\
             <user><name>b</name><type>MurmurClient</type></user>\
             </listusers></success>"
        ));

        let failure = encoded_text(&mut codec, Message::LoginFailure { reason: "taken".into() });
        assert!(failure.ends_with("<error><message>taken</message></error>"));
    }

    #[test]
    fn test_encode_escapes_markup_in_content() {
        let mut codec = XmlCodec::new();
        codec.bind_session("s");
        let xml = encoded_text(&mut codec, Message::chat("<b>&</b>"));
        assert!(xml.contains("<message>&lt;b&gt;&amp;&lt;/b&gt;</message>"));

        let mut buf = frame(&xml);
        assert_eq!(
            XmlCodec::new().decode(&mut buf).unwrap(),
            Some(Message::chat("<b>&</b>"))
        );
    }

    // =====================================================================
    // Session identifier threading
    // =====================================================================

    #[test]
    fn test_decode_login_success_binds_session() {
        let mut codec = XmlCodec::new();
        let mut buf = frame("<success><session>abc123</session></success>");

        let decoded = codec.decode(&mut buf).unwrap();
        assert_eq!(
            decoded,
            Some(Message::LoginSuccess {
                session_id: Some("abc123".into())
            })
        );
        assert_eq!(codec.session_id(), Some("abc123"));
    }

    #[test]
    fn test_encode_login_success_without_id_generates_one() {
        let mut codec = XmlCodec::new();
        let xml = encoded_text(&mut codec, Message::LoginSuccess { session_id: None });

        let bound = codec.session_id().unwrap().to_string();
        assert_eq!(bound.len(), 32);
        assert!(xml.contains(&format!("<session>{bound}</session>")));
    }

    #[test]
    fn test_session_ids_are_per_codec_instance() {
        let mut first = XmlCodec::new();
        first.bind_session("first");
        let second = XmlCodec::new();
        assert_eq!(second.session_id(), None);
    }

    // =====================================================================
    // Decoding rules
    // =====================================================================

    #[test]
    fn test_decode_command_without_session_is_malformed() {
        let mut buf = frame(r#"<command name="list"></command>"#);
        assert!(matches!(
            XmlCodec::new().decode(&mut buf),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_decode_relayed_message_reads_sender_name() {
        let mut buf = frame(
            r#"<?xml version="1.0" encoding="UTF-8"?><command name="message"><message>hi</message><session>x</session><name>bob</name></command>"#,
        );
        assert_eq!(
            XmlCodec::new().decode(&mut buf).unwrap(),
            Some(Message::UserMessage {
                sender: Some("bob".into()),
                content: "hi".into()
            })
        );
    }

    #[test]
    fn test_decode_tolerates_whitespace_between_elements() {
        let mut buf = frame(
            "<success>\n  <listusers>\n    <user><name>alice</name><type>x</type></user>\n  </listusers>\n</success>",
        );
        assert_eq!(
            XmlCodec::new().decode(&mut buf).unwrap(),
            Some(Message::roster(vec!["alice".into()]))
        );
    }

    #[test]
    fn test_decode_unknown_root_is_unsupported_and_consumed() {
        let mut buf = frame("<ping/>");
        buf.extend_from_slice(&frame(r#"<event name="userlogin"><name>z</name></event>"#));

        let mut codec = XmlCodec::new();
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::UnsupportedMessageType(_))
        ));
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Message::UserJoined { username: "z".into() })
        );
    }

    #[test]
    fn test_decode_unknown_command_is_unsupported() {
        let mut buf = frame(r#"<command name="kick"><session>x</session></command>"#);
        assert!(matches!(
            XmlCodec::new().decode(&mut buf),
            Err(ProtocolError::UnsupportedMessageType(_))
        ));
    }

    #[test]
    fn test_decode_unclosed_document_is_malformed() {
        let mut buf = frame("<error><message>oops");
        assert!(XmlCodec::new().decode(&mut buf).is_err());
    }

    // =====================================================================
    // Framing guards
    // =====================================================================

    #[test]
    fn test_decode_declared_length_two_million_is_malformed() {
        let mut buf = BytesMut::new();
        buf.put_u32(2_000_000);
        buf.extend_from_slice(b"<error>");
        assert!(matches!(
            XmlCodec::new().decode(&mut buf),
            Err(ProtocolError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_decode_eof_after_length_header_is_truncated() {
        let mut buf = BytesMut::new();
        buf.put_u32(64);
        assert!(matches!(
            XmlCodec::new().decode_eof(&mut buf),
            Err(ProtocolError::TruncatedStream { .. })
        ));
    }

    #[test]
    fn test_decode_eof_after_partial_payload_is_truncated() {
        let mut buf = frame(r#"<event name="userlogout"><name>bob</name></event>"#);
        buf.truncate(10);
        assert!(matches!(
            XmlCodec::new().decode_eof(&mut buf),
            Err(ProtocolError::TruncatedStream { buffered: 10 })
        ));
    }

    #[test]
    fn test_round_trip_every_variant() {
        let messages = vec![
            Message::LoginRequest { username: "alice".into() },
            Message::LoginSuccess { session_id: Some("sid".into()) },
            Message::LoginFailure { reason: "no".into() },
            Message::UserMessage { sender: Some("alice".into()), content: "hi".into() },
            Message::ServerMessage { sender: Some("srv".into()), content: "up".into() },
            Message::UserListRequest,
            Message::roster(vec!["alice".into(), "bob".into()]),
            Message::UserJoined { username: "bob".into() },
            Message::UserLeft { username: "bob".into() },
            Message::LogoutRequest,
        ];

        let mut writer = XmlCodec::new();
        let mut reader = XmlCodec::new();
        let mut buf = BytesMut::new();
        for message in &messages {
            writer.encode(message.clone(), &mut buf).unwrap();
        }
        for message in messages {
            assert_eq!(reader.decode(&mut buf).unwrap(), Some(message));
        }
    }
}
