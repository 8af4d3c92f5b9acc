//! Per-session outbound queues.

use murmur_protocol::Message;
use murmur_transport::ConnectionId;
use tokio::sync::mpsc;

use crate::SessionError;

/// The sending side of one session's outbound queue.
///
/// Everything addressed to a session goes through its outbox, and exactly
/// one writer task drains the matching receiver onto the socket. Enqueuing
/// never waits: a full or closed queue is reported straight back so the
/// broadcaster can move on to the next recipient.
#[derive(Debug, Clone)]
pub struct Outbox {
    id: ConnectionId,
    sender: mpsc::Sender<Message>,
}

impl Outbox {
    /// Creates an outbox and the receiver its writer task drains.
    pub fn channel(id: ConnectionId, capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { id, sender }, receiver)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues `message` without waiting.
    ///
    /// # Errors
    /// [`SessionError::Delivery`] if the queue is full (the peer is not
    /// keeping up) or closed (the writer is gone).
    pub fn deliver(&self, message: Message) -> Result<(), SessionError> {
        self.sender.try_send(message).map_err(|err| {
            let reason = match err {
                mpsc::error::TrySendError::Full(_) => "outbox full",
                mpsc::error::TrySendError::Closed(_) => "outbox closed",
            };
            SessionError::Delivery {
                id: self.id,
                reason,
            }
        })
    }

    /// Returns `true` once the writer task has dropped its receiver.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Resolves when the writer task has dropped its receiver.
    pub async fn closed(&self) {
        self.sender.closed().await
    }
}
