//! # Murmur
//!
//! A multi-protocol chat relay.
//!
//! Clients log in with a unique username and every chat line is relayed to
//! everyone else in one shared conversation. Newcomers are replayed the
//! last few messages, and everyone is told who joins and leaves. The wire
//! format is chosen once at startup: a native object stream, length-prefixed
//! JSON, or length-prefixed XML.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use murmur::prelude::*;
//!
//! # async fn run() -> Result<(), MurmurError> {
//! let config = ServerConfig {
//!     protocol: ProtocolKind::Json,
//!     ..ServerConfig::with_port(9000)
//! };
//! serve(config).await
//! # }
//! ```

mod client;
mod config;
mod error;
mod handler;
mod server;

pub use client::{ChatClient, ClientEvent, ConnectionState, LOGIN_TIMEOUT};
pub use config::{DEFAULT_MAX_CLIENTS, DEFAULT_PORT, ServerConfig};
pub use error::MurmurError;
pub use server::{ChatServer, ChatServerBuilder, serve, serve_until};

pub mod prelude {
    pub use crate::{
        ChatClient, ChatServer, ChatServerBuilder, ClientEvent, ConnectionState, MurmurError,
        ServerConfig, serve, serve_until,
    };
    pub use murmur_protocol::{
        Codec, JsonCodec, Message, MessageType, NativeCodec, ProtocolError, ProtocolKind, XmlCodec,
    };
    pub use murmur_room::{History, Lobby};
    pub use murmur_session::{SessionConfig, SessionError};
    pub use murmur_transport::{Connection, ConnectionId, TcpConnection, TransportError};
}
