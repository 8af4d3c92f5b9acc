//! Bounded replay buffer of recent conversation traffic.

use std::collections::VecDeque;

use murmur_protocol::Message;

/// Default number of messages kept for replay.
pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

/// The last `capacity` history-eligible messages, oldest first.
///
/// Only chat lines and join/leave events are kept (see
/// [`Message::is_history_eligible`]); anything else offered to
/// [`append`](Self::append) is ignored.
#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<Message>,
    capacity: usize,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Adds `message` at the tail, evicting from the head when full.
    /// Returns `false` if the message is not eligible and was not stored.
    pub fn append(&mut self, message: &Message) -> bool {
        if !message.is_history_eligible() || self.capacity == 0 {
            return false;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(message.clone());
        true
    }

    /// The current contents in arrival order.
    pub fn snapshot(&self) -> Vec<Message> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat(n: usize) -> Message {
        Message::UserMessage {
            sender: Some("alice".into()),
            content: format!("line {n}"),
        }
    }

    #[test]
    fn test_append_keeps_last_n_in_arrival_order() {
        let mut history = History::default();
        for n in 0..15 {
            history.append(&chat(n));
        }

        let snapshot = history.snapshot();
        assert_eq!(snapshot.len(), 10);
        let expected: Vec<Message> = (5..15).map(chat).collect();
        assert_eq!(snapshot, expected);
    }

    #[test]
    fn test_append_never_exceeds_capacity() {
        let mut history = History::new(3);
        for n in 0..100 {
            history.append(&chat(n));
            assert!(history.len() <= 3);
        }
    }

    #[test]
    fn test_append_ignores_control_traffic() {
        let mut history = History::default();
        assert!(!history.append(&Message::roster(vec!["alice".into()])));
        assert!(!history.append(&Message::LoginSuccess { session_id: None }));
        assert!(!history.append(&Message::UserListRequest));
        assert!(history.is_empty());

        assert!(history.append(&Message::UserJoined {
            username: "bob".into()
        }));
        assert!(history.append(&Message::ServerMessage {
            sender: None,
            content: "maintenance at noon".into()
        }));
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let mut history = History::new(0);
        assert!(!history.append(&chat(1)));
        assert!(history.snapshot().is_empty());
    }
}
