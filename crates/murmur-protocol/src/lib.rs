//! Wire protocol for Murmur.
//!
//! This crate defines what clients and the relay say to each other:
//!
//! - **Types** ([`Message`], [`MessageType`], [`WireMessage`]): the
//!   wire-agnostic chat traffic.
//! - **Codecs** ([`Codec`] trait, [`NativeCodec`], [`JsonCodec`],
//!   [`XmlCodec`]): three interchangeable ways of putting a [`Message`] on
//!   a byte stream. Client and server pick one at startup and must agree.
//! - **Errors** ([`ProtocolError`]): what can go wrong while framing.
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw bytes) and session
//! (login state). It doesn't know about sockets or rosters.
//!
//! ```text
//! Transport (bytes) → Protocol (Message) → Session (username, state)
//! ```

mod codec;
mod error;
mod json;
mod native;
mod types;
mod xml;

pub use codec::{Codec, LENGTH_HEADER_LEN, MAX_FRAME_LEN};
pub use error::ProtocolError;
pub use json::JsonCodec;
pub use native::{NativeCodec, STREAM_MAGIC};
pub use types::{
    Message, MessageType, ProtocolKind, UnknownProtocol, WireMessage,
    generate_session_id,
};
pub use xml::{CLIENT_TYPE, XmlCodec};
