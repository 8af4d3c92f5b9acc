//! The broadcast engine: one shared conversation over every registered
//! session.
//!
//! All state lives in two mutex-guarded collections, the [`Registry`] and
//! the [`History`] ring. When both are needed they are always locked in
//! that order (registry, then history). Delivery never touches a socket:
//! messages are queued on each recipient's [`Outbox`] while the registry
//! lock is held, so every recipient sees broadcasts in the same order and
//! a slow peer cannot stall the sender.

use murmur_protocol::Message;
use murmur_session::{Outbox, Registry, SessionError};
use murmur_transport::ConnectionId;
use tokio::sync::Mutex;

use crate::History;

/// Who a broadcast goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience<'a> {
    /// Every registered session.
    All,
    /// Everyone except one connection (the author of a chat line).
    AllExcept(ConnectionId),
    /// Everyone except the session registered under this name (the subject
    /// of a join or leave event).
    AllExceptNamed(&'a str),
}

impl<'a> Audience<'a> {
    /// The exclusion rule for `message` sent on behalf of `origin`.
    pub fn for_message(message: &'a Message, origin: Option<ConnectionId>) -> Self {
        match (message, origin) {
            (Message::UserMessage { .. }, Some(origin)) => Self::AllExcept(origin),
            (Message::UserJoined { username } | Message::UserLeft { username }, _) => {
                Self::AllExceptNamed(username)
            }
            _ => Self::All,
        }
    }

    fn includes(&self, id: ConnectionId, username: &str) -> bool {
        match *self {
            Self::All => true,
            Self::AllExcept(excluded) => id != excluded,
            Self::AllExceptNamed(excluded) => username != excluded,
        }
    }
}

/// Queues `message` for every member in `audience`. Returns the
/// connections whose delivery failed; the rest are unaffected.
fn fan_out(registry: &Registry, message: &Message, audience: Audience<'_>) -> Vec<ConnectionId> {
    let mut failed = Vec::new();
    for member in registry.members() {
        if !audience.includes(member.id(), &member.username) {
            continue;
        }
        if let Err(e) = member.outbox.deliver(message.clone()) {
            tracing::warn!(username = %member.username, error = %e, "delivery failed");
            failed.push(member.id());
        }
    }
    failed
}

/// The shared chat room every authenticated session belongs to.
#[derive(Debug)]
pub struct Lobby {
    registry: Mutex<Registry>,
    history: Mutex<History>,
}

impl Lobby {
    /// Creates an empty lobby that replays up to `history_capacity`
    /// messages to newcomers.
    pub fn new(history_capacity: usize) -> Self {
        Self {
            registry: Mutex::new(Registry::new()),
            history: Mutex::new(History::new(history_capacity)),
        }
    }

    /// Logs a session in under `username`.
    ///
    /// Under one registry lock this checks the name is free, queues
    /// `LoginSuccess` and the history replay for the newcomer only,
    /// registers it, announces `UserJoined` to everyone else and sends the
    /// new roster to everyone including the newcomer.
    ///
    /// # Errors
    /// [`SessionError::DuplicateUsername`] if the name is taken, or
    /// [`SessionError::Delivery`] if the newcomer's own outbox cannot take
    /// the welcome. Either way nobody else hears about it and `outbox` is
    /// dropped.
    pub async fn admit(
        &self,
        session_id: &str,
        username: &str,
        outbox: Outbox,
    ) -> Result<(), SessionError> {
        let id = outbox.id();
        let failed = {
            let mut registry = self.registry.lock().await;
            if registry.contains_name(username) {
                return Err(SessionError::DuplicateUsername(username.to_string()));
            }

            let mut welcome = vec![Message::LoginSuccess {
                session_id: Some(session_id.to_string()),
            }];
            welcome.extend(self.history.lock().await.snapshot());
            for message in welcome {
                outbox.deliver(message)?;
            }

            registry.try_insert(username, outbox)?;
            tracing::info!(%id, username, online = registry.len(), "user joined");

            let joined = Message::UserJoined {
                username: username.to_string(),
            };
            self.history.lock().await.append(&joined);

            let mut failed = fan_out(&registry, &joined, Audience::AllExceptNamed(username));
            let roster = Message::roster(registry.roster());
            failed.extend(fan_out(&registry, &roster, Audience::All));
            failed
        };

        self.evict(failed).await;
        Ok(())
    }

    /// Relays `message` from `origin` (or from the server when `None`) to
    /// every session its exclusion rule allows, recording it in history
    /// when eligible. Returns the number of sessions it was queued for.
    ///
    /// Sessions whose delivery fails are removed afterwards, each with its
    /// own `UserLeft` and roster broadcast. A message whose `origin` is no
    /// longer registered is dropped without being recorded.
    pub async fn broadcast(&self, message: Message, origin: Option<ConnectionId>) -> usize {
        let (delivered, failed) = {
            let registry = self.registry.lock().await;
            if let Some(origin) = origin {
                if registry.get(origin).is_none() {
                    tracing::debug!(%origin, "dropping message from unregistered session");
                    return 0;
                }
            }
            self.history.lock().await.append(&message);

            let audience = Audience::for_message(&message, origin);
            let eligible = registry
                .members()
                .filter(|member| audience.includes(member.id(), &member.username))
                .count();
            let failed = fan_out(&registry, &message, audience);
            (eligible - failed.len(), failed)
        };

        self.evict(failed).await;
        delivered
    }

    /// Queues `message` for one registered session only.
    ///
    /// # Errors
    /// [`SessionError::Delivery`] if `id` is no longer registered or its
    /// outbox refuses the message.
    pub async fn send_to(&self, id: ConnectionId, message: Message) -> Result<(), SessionError> {
        let registry = self.registry.lock().await;
        let member = registry.get(id).ok_or(SessionError::Delivery {
            id,
            reason: "not registered",
        })?;
        member.outbox.deliver(message)
    }

    /// Queues the current roster for `id` only, read under the same lock
    /// that delivers it.
    ///
    /// # Errors
    /// As for [`send_to`](Self::send_to).
    pub async fn send_roster(&self, id: ConnectionId) -> Result<(), SessionError> {
        let registry = self.registry.lock().await;
        let member = registry.get(id).ok_or(SessionError::Delivery {
            id,
            reason: "not registered",
        })?;
        member.outbox.deliver(Message::roster(registry.roster()))
    }

    /// Removes the session for `id`, if it is still registered, and tells
    /// the others.
    ///
    /// Idempotent: the `UserLeft` and roster broadcasts happen only on the
    /// call that actually removes the entry. Returns the departed username.
    pub async fn depart(&self, id: ConnectionId) -> Option<String> {
        let (username, failed) = {
            let mut registry = self.registry.lock().await;
            let member = registry.remove(id)?;
            tracing::info!(%id, username = %member.username, online = registry.len(), "user left");
            let failed = self.announce_departure(&registry, &member.username).await;
            (member.username, failed)
        };

        self.evict(failed).await;
        Some(username)
    }

    /// The current roster, in join order.
    pub async fn roster(&self) -> Vec<String> {
        self.registry.lock().await.roster()
    }

    /// The current history contents, oldest first.
    pub async fn history(&self) -> Vec<Message> {
        self.history.lock().await.snapshot()
    }

    /// Number of logged-in sessions.
    pub async fn len(&self) -> usize {
        self.registry.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.registry.lock().await.is_empty()
    }

    async fn announce_departure(&self, registry: &Registry, username: &str) -> Vec<ConnectionId> {
        let left = Message::UserLeft {
            username: username.to_string(),
        };
        self.history.lock().await.append(&left);

        let mut failed = fan_out(registry, &left, Audience::AllExceptNamed(username));
        let roster = Message::roster(registry.roster());
        failed.extend(fan_out(registry, &roster, Audience::All));
        failed
    }

    /// Removes sessions whose delivery failed. Each removal can surface
    /// further failures, so this works through a queue instead of
    /// recursing.
    async fn evict(&self, mut pending: Vec<ConnectionId>) {
        while let Some(id) = pending.pop() {
            let mut registry = self.registry.lock().await;
            let Some(member) = registry.remove(id) else {
                continue;
            };
            tracing::info!(%id, username = %member.username, "evicted after failed delivery");
            pending.extend(self.announce_departure(&registry, &member.username).await);
        }
    }
}

impl Default for Lobby {
    fn default() -> Self {
        Self::new(crate::DEFAULT_HISTORY_CAPACITY)
    }
}
