//! Session management for Murmur.
//!
//! This crate handles the lifecycle of a chat connection:
//!
//! 1. **Login**: turning the first frame into a trimmed username
//!    ([`login_name`])
//! 2. **State**: where a connection is in its lifecycle ([`Session`],
//!    [`SessionState`])
//! 3. **Outbound queueing**: one bounded queue per session ([`Outbox`])
//! 4. **Uniqueness**: who is logged in, under which name ([`Registry`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Room Layer (above)  ← fans messages out over registered outboxes
//!     ↕
//! Session Layer (this crate)  ← login state and username uniqueness
//!     ↕
//! Protocol Layer (below)  ← provides Message
//! ```

mod error;
mod outbox;
mod registry;
mod session;

pub use error::{EMPTY_USERNAME, INVALID_LOGIN, SessionError};
pub use outbox::Outbox;
pub use registry::{Member, Registry};
pub use session::{Session, SessionConfig, SessionState, login_name};
