//! Core message types for Murmur's wire formats.
//!
//! Every codec in this crate turns a [`Message`] into bytes and back. The
//! message is wire-agnostic: it knows nothing about length prefixes, XML
//! tags or stream headers, only which variant it is and which fields that
//! variant carries.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// MessageType
// ---------------------------------------------------------------------------

/// The discriminant of a [`Message`], as it appears in the JSON `type` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    LoginRequest,
    LoginSuccess,
    LoginFailure,
    UserMessage,
    ServerMessage,
    UserListRequest,
    UserListResponse,
    UserJoined,
    UserLeft,
    LogoutRequest,
}

impl MessageType {
    /// All ten variants, in declaration order.
    pub const ALL: [MessageType; 10] = [
        Self::LoginRequest,
        Self::LoginSuccess,
        Self::LoginFailure,
        Self::UserMessage,
        Self::ServerMessage,
        Self::UserListRequest,
        Self::UserListResponse,
        Self::UserJoined,
        Self::UserLeft,
        Self::LogoutRequest,
    ];

    /// The SCREAMING_SNAKE_CASE name used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LoginRequest => "LOGIN_REQUEST",
            Self::LoginSuccess => "LOGIN_SUCCESS",
            Self::LoginFailure => "LOGIN_FAILURE",
            Self::UserMessage => "USER_MESSAGE",
            Self::ServerMessage => "SERVER_MESSAGE",
            Self::UserListRequest => "USER_LIST_REQUEST",
            Self::UserListResponse => "USER_LIST_RESPONSE",
            Self::UserJoined => "USER_JOINED",
            Self::UserLeft => "USER_LEFT",
            Self::LogoutRequest => "LOGOUT_REQUEST",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ProtocolError::UnsupportedMessageType(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single unit of chat traffic.
///
/// Each variant carries exactly the fields meaningful to it, so a message
/// can never hold stale data from another variant. The flat view used by
/// the JSON codec (`sender` / `content` / `userList`) is available through
/// [`sender`](Self::sender), [`content`](Self::content) and
/// [`user_list`](Self::user_list).
///
/// The serde derive is the native codec's object-graph representation.
/// JSON goes through [`WireMessage`] instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Client → Server: "I want to be known as `username`."
    LoginRequest { username: String },

    /// Server → Client: login accepted. The session identifier is what an
    /// XML client must echo on every later command.
    LoginSuccess { session_id: Option<String> },

    /// Server → Client: login rejected, with a human-readable reason.
    LoginFailure { reason: String },

    /// A chat line. Clients send it without a sender; the server stamps the
    /// authenticated username before relaying it.
    UserMessage {
        sender: Option<String>,
        content: String,
    },

    /// A chat line produced by the server itself.
    ServerMessage {
        sender: Option<String>,
        content: String,
    },

    /// Client → Server: "who is online?"
    UserListRequest,

    /// Server → Client: the roster, in join order.
    UserListResponse { users: Vec<String> },

    /// Server → Client: `username` joined the conversation.
    UserJoined { username: String },

    /// Server → Client: `username` left the conversation.
    UserLeft { username: String },

    /// Client → Server: "I'm leaving."
    LogoutRequest,
}

impl Message {
    /// Builds a chat line as a client sends it (no sender).
    pub fn chat(content: impl Into<String>) -> Self {
        Self::UserMessage {
            sender: None,
            content: content.into(),
        }
    }

    /// Builds a roster response.
    pub fn roster(users: Vec<String>) -> Self {
        Self::UserListResponse { users }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Self::LoginRequest { .. } => MessageType::LoginRequest,
            Self::LoginSuccess { .. } => MessageType::LoginSuccess,
            Self::LoginFailure { .. } => MessageType::LoginFailure,
            Self::UserMessage { .. } => MessageType::UserMessage,
            Self::ServerMessage { .. } => MessageType::ServerMessage,
            Self::UserListRequest => MessageType::UserListRequest,
            Self::UserListResponse { .. } => MessageType::UserListResponse,
            Self::UserJoined { .. } => MessageType::UserJoined,
            Self::UserLeft { .. } => MessageType::UserLeft,
            Self::LogoutRequest => MessageType::LogoutRequest,
        }
    }

    /// The `sender` field of the flat view.
    pub fn sender(&self) -> Option<&str> {
        match self {
            Self::LoginRequest { username }
            | Self::UserJoined { username }
            | Self::UserLeft { username } => Some(username),
            Self::UserMessage { sender, .. }
            | Self::ServerMessage { sender, .. } => sender.as_deref(),
            _ => None,
        }
    }

    /// The `content` field of the flat view.
    pub fn content(&self) -> Option<&str> {
        match self {
            Self::LoginSuccess { session_id } => session_id.as_deref(),
            Self::LoginFailure { reason } => Some(reason),
            Self::UserMessage { content, .. }
            | Self::ServerMessage { content, .. } => Some(content),
            _ => None,
        }
    }

    /// The `userList` field of the flat view.
    pub fn user_list(&self) -> Option<&[String]> {
        match self {
            Self::UserListResponse { users } => Some(users),
            _ => None,
        }
    }

    /// Whether this message is kept in the history ring and replayed to
    /// newcomers. Login, roster and control traffic never is.
    pub fn is_history_eligible(&self) -> bool {
        matches!(
            self,
            Self::UserMessage { .. }
                | Self::ServerMessage { .. }
                | Self::UserJoined { .. }
                | Self::UserLeft { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// WireMessage: the flat JSON shape
// ---------------------------------------------------------------------------

/// The flat object the JSON codec puts on the wire:
///
/// ```text
/// {"type": "USER_MESSAGE", "sender": "bob", "content": "hi", "userList": null}
/// ```
///
/// Absent fields serialize as `null` and may be omitted on input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub sender: Option<String>,
    pub content: Option<String>,
    pub user_list: Option<Vec<String>>,
}

impl From<Message> for WireMessage {
    fn from(message: Message) -> Self {
        let kind = message.message_type().as_str().to_string();
        let mut wire = WireMessage {
            kind,
            ..WireMessage::default()
        };
        match message {
            Message::LoginRequest { username }
            | Message::UserJoined { username }
            | Message::UserLeft { username } => wire.sender = Some(username),
            Message::LoginSuccess { session_id } => wire.content = session_id,
            Message::LoginFailure { reason } => wire.content = Some(reason),
            Message::UserMessage { sender, content }
            | Message::ServerMessage { sender, content } => {
                wire.sender = sender;
                wire.content = Some(content);
            }
            Message::UserListResponse { users } => wire.user_list = Some(users),
            Message::UserListRequest | Message::LogoutRequest => {}
        }
        wire
    }
}

impl TryFrom<WireMessage> for Message {
    type Error = ProtocolError;

    /// Missing strings become empty strings: an empty username or chat line
    /// is a session-level decision, not a decode failure.
    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        let WireMessage {
            kind,
            sender,
            content,
            user_list,
        } = wire;

        let message = match kind.parse::<MessageType>()? {
            MessageType::LoginRequest => Message::LoginRequest {
                username: sender.unwrap_or_default(),
            },
            MessageType::LoginSuccess => Message::LoginSuccess {
                session_id: content,
            },
            MessageType::LoginFailure => Message::LoginFailure {
                reason: content.unwrap_or_default(),
            },
            MessageType::UserMessage => Message::UserMessage {
                sender,
                content: content.unwrap_or_default(),
            },
            MessageType::ServerMessage => Message::ServerMessage {
                sender,
                content: content.unwrap_or_default(),
            },
            MessageType::UserListRequest => Message::UserListRequest,
            MessageType::UserListResponse => Message::UserListResponse {
                users: user_list.unwrap_or_default(),
            },
            MessageType::UserJoined => Message::UserJoined {
                username: sender.unwrap_or_default(),
            },
            MessageType::UserLeft => Message::UserLeft {
                username: sender.unwrap_or_default(),
            },
            MessageType::LogoutRequest => Message::LogoutRequest,
        };
        Ok(message)
    }
}

// ---------------------------------------------------------------------------
// ProtocolKind
// ---------------------------------------------------------------------------

/// Which codec a server or client speaks. Both ends must agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProtocolKind {
    /// Stateful stream of serialized object graphs.
    #[default]
    Native,
    /// Length-prefixed flat JSON objects.
    Json,
    /// Length-prefixed XML command/event documents.
    Xml,
}

impl ProtocolKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Json => "json",
            Self::Xml => "xml",
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a protocol name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown protocol {0:?} (expected native, json or xml)")]
pub struct UnknownProtocol(pub String);

impl FromStr for ProtocolKind {
    type Err = UnknownProtocol;

    /// Accepts the canonical names plus the legacy aliases `binary`,
    /// `java` and `rest`, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" | "binary" | "java" => Ok(Self::Native),
            "json" | "rest" => Ok(Self::Json),
            "xml" => Ok(Self::Xml),
            _ => Err(UnknownProtocol(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Session identifiers
// ---------------------------------------------------------------------------

/// Generates a random 32-character hex session identifier (128 bits).
pub fn generate_session_id() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 16] = rng.random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // =====================================================================
    // MessageType
    // =====================================================================

    #[test]
    fn test_message_type_parses_every_wire_name() {
        for kind in MessageType::ALL {
            assert_eq!(kind.as_str().parse::<MessageType>().unwrap(), kind);
        }
    }

    #[test]
    fn test_message_type_unknown_name_is_unsupported() {
        let result = "FLY_TO_MOON".parse::<MessageType>();
        assert!(matches!(
            result,
            Err(ProtocolError::UnsupportedMessageType(ref t)) if t == "FLY_TO_MOON"
        ));
    }

    // =====================================================================
    // Flat view
    // =====================================================================

    #[test]
    fn test_flat_view_populates_only_meaningful_fields() {
        let joined = Message::UserJoined {
            username: "alice".into(),
        };
        assert_eq!(joined.sender(), Some("alice"));
        assert_eq!(joined.content(), None);
        assert_eq!(joined.user_list(), None);

        let roster = Message::roster(vec!["alice".into(), "bob".into()]);
        assert_eq!(roster.sender(), None);
        assert_eq!(roster.content(), None);
        assert_eq!(roster.user_list().unwrap().len(), 2);

        assert_eq!(Message::LogoutRequest.sender(), None);
        assert_eq!(Message::LogoutRequest.content(), None);
    }

    #[test]
    fn test_is_history_eligible_only_for_conversation_traffic() {
        assert!(Message::chat("hi").is_history_eligible());
        assert!(Message::UserLeft { username: "a".into() }.is_history_eligible());
        assert!(!Message::UserListRequest.is_history_eligible());
        assert!(!Message::roster(vec![]).is_history_eligible());
        assert!(!Message::LoginSuccess { session_id: None }.is_history_eligible());
    }

    // =====================================================================
    // WireMessage conversions
    // =====================================================================

    #[test]
    fn test_wire_message_json_shape_for_user_message() {
        let wire = WireMessage::from(Message::UserMessage {
            sender: Some("bob".into()),
            content: "hi".into(),
        });
        let json: serde_json::Value = serde_json::to_value(&wire).unwrap();

        assert_eq!(json["type"], "USER_MESSAGE");
        assert_eq!(json["sender"], "bob");
        assert_eq!(json["content"], "hi");
        assert!(json["userList"].is_null());
    }

    #[test]
    fn test_wire_message_missing_fields_default_to_empty() {
        let wire: WireMessage =
            serde_json::from_str(r#"{"type": "LOGIN_REQUEST"}"#).unwrap();
        let message = Message::try_from(wire).unwrap();
        assert_eq!(
            message,
            Message::LoginRequest {
                username: String::new()
            }
        );
    }

    #[test]
    fn test_wire_message_unknown_type_is_rejected() {
        let wire = WireMessage {
            kind: "PING".into(),
            ..WireMessage::default()
        };
        assert!(matches!(
            Message::try_from(wire),
            Err(ProtocolError::UnsupportedMessageType(_))
        ));
    }

    // =====================================================================
    // ProtocolKind
    // =====================================================================

    #[test]
    fn test_protocol_kind_accepts_aliases_case_insensitively() {
        assert_eq!("XML".parse::<ProtocolKind>().unwrap(), ProtocolKind::Xml);
        assert_eq!("rest".parse::<ProtocolKind>().unwrap(), ProtocolKind::Json);
        assert_eq!("java".parse::<ProtocolKind>().unwrap(), ProtocolKind::Native);
        assert!("carrier-pigeon".parse::<ProtocolKind>().is_err());
    }

    #[test]
    fn test_protocol_kind_default_is_native() {
        assert_eq!(ProtocolKind::default(), ProtocolKind::Native);
        assert_eq!(ProtocolKind::Json.to_string(), "json");
    }

    #[test]
    fn test_generate_session_id_is_32_hex_chars() {
        let id = generate_session_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, generate_session_id());
    }
}
