//! The shared chat room for Murmur.
//!
//! Every authenticated session is in the same conversation. This crate
//! decides who receives what and what newcomers are shown.
//!
//! # Key types
//!
//! - [`Lobby`]: the broadcast engine: admission, fan-out, departure
//! - [`Audience`]: exclusion rules for a single broadcast
//! - [`History`]: the bounded replay ring

mod history;
mod lobby;

pub use history::{DEFAULT_HISTORY_CAPACITY, History};
pub use lobby::{Audience, Lobby};
