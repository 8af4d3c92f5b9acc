//! Session types: the server's record of one accepted connection.
//!
//! A session tracks:
//! - WHICH connection it belongs to (`ConnectionId`)
//! - WHERE it is in the login lifecycle (`SessionState`)
//! - WHO it is once logged in (a write-once username)
//! - the session identifier handed out in `LoginSuccess`

use std::fmt;
use std::time::Duration;

use murmur_protocol::{Message, generate_session_id};
use murmur_transport::ConnectionId;

use crate::SessionError;
use crate::error::{EMPTY_USERNAME, INVALID_LOGIN};

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Configuration for per-connection behaviour.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long a connection may stay silent before it is treated as dead.
    ///
    /// Default: 30 seconds.
    pub read_timeout: Duration,

    /// How long a single frame write may take before the peer is treated
    /// as stalled and the connection is torn down.
    ///
    /// Default: 10 seconds.
    pub send_timeout: Duration,

    /// How many outbound messages may queue for one session before
    /// broadcasts to it count as failed deliveries.
    ///
    /// Default: 256.
    pub outbox_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(30),
            send_timeout: Duration::from_secs(10),
            outbox_capacity: 256,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// The lifecycle state of a session.
///
/// ```text
/// Connected → AwaitingLogin ──→ Authenticated → Closing → Closed
///                  │                                        ↑
///                  └────────────(login rejected)────────────┘
/// ```
///
/// - **Connected**: socket accepted, nothing read yet.
/// - **AwaitingLogin**: the first frame must be a `LoginRequest`.
/// - **Authenticated**: registered under a unique name; chat, roster and
///   logout requests are served.
/// - **Closing**: leaving for any reason (logout, error, timeout). The
///   registry entry is removed on the way out.
/// - **Closed**: socket shut down. Terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Connected,
    AwaitingLogin,
    Authenticated,
    Closing,
    Closed,
}

impl SessionState {
    /// The next state on the happy path, or `None` from `Closed`.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Connected => Some(Self::AwaitingLogin),
            Self::AwaitingLogin => Some(Self::Authenticated),
            Self::Authenticated => Some(Self::Closing),
            Self::Closing => Some(Self::Closed),
            Self::Closed => None,
        }
    }

    /// Returns `true` if moving to `target` is allowed.
    ///
    /// Besides the happy path, a rejected login goes straight from
    /// `AwaitingLogin` to `Closed`, and a connection that dies before its
    /// first frame goes from `Connected` to `Closed`.
    pub fn can_transition_to(self, target: Self) -> bool {
        self.next() == Some(target)
            || matches!(
                (self, target),
                (Self::AwaitingLogin | Self::Connected, Self::Closed)
            )
    }

    pub fn is_authenticated(self) -> bool {
        matches!(self, Self::Authenticated)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "Connected"),
            Self::AwaitingLogin => write!(f, "AwaitingLogin"),
            Self::Authenticated => write!(f, "Authenticated"),
            Self::Closing => write!(f, "Closing"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One accepted connection's login state.
///
/// The socket and codec live in the transport's connection; this struct is
/// the part the state machine mutates.
#[derive(Debug, Clone)]
pub struct Session {
    id: ConnectionId,
    session_id: String,
    state: SessionState,
    username: Option<String>,
}

impl Session {
    /// Creates a session in the `Connected` state with a fresh session
    /// identifier.
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            session_id: generate_session_id(),
            state: SessionState::Connected,
            username: None,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The identifier sent in `LoginSuccess`.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The authenticated name, once there is one.
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Moves to `target`.
    ///
    /// # Errors
    /// [`SessionError::InvalidTransition`] when the move is not allowed.
    pub fn transition(&mut self, target: SessionState) -> Result<(), SessionError> {
        if !self.state.can_transition_to(target) {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to: target,
            });
        }
        tracing::trace!(id = %self.id, from = %self.state, to = %target, "session transition");
        self.state = target;
        Ok(())
    }

    /// Records the registered name and enters `Authenticated`.
    ///
    /// The username is write-once: it is only set on the
    /// `AwaitingLogin → Authenticated` move.
    pub fn authenticate(&mut self, username: String) -> Result<(), SessionError> {
        self.transition(SessionState::Authenticated)?;
        self.username = Some(username);
        Ok(())
    }
}

/// Checks that `message` is a usable first frame and returns the trimmed
/// username it asks for.
///
/// # Errors
/// [`SessionError::Handshake`] when the frame is not a `LoginRequest` or
/// the name is empty after trimming.
pub fn login_name(message: &Message) -> Result<String, SessionError> {
    let Message::LoginRequest { username } = message else {
        return Err(SessionError::Handshake(INVALID_LOGIN.to_string()));
    };
    let trimmed = username.trim();
    if trimmed.is_empty() {
        return Err(SessionError::Handshake(EMPTY_USERNAME.to_string()));
    }
    Ok(trimmed.to_string())
}
