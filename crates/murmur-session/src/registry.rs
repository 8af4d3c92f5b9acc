//! The registry: every authenticated session, keyed by unique username.
//!
//! # Concurrency note
//!
//! `Registry` is a plain struct over `HashMap`s. The broadcast engine
//! keeps it behind a single mutex, which is what makes "check the name is
//! free, then insert" one indivisible step: [`try_insert`](Registry::try_insert)
//! does both under one `&mut self` borrow.

use std::collections::HashMap;

use murmur_transport::ConnectionId;

use crate::{Outbox, SessionError};

/// A registered session.
#[derive(Debug, Clone)]
pub struct Member {
    /// The name as the user typed it (trimmed), used for display and for
    /// self-event exclusion.
    pub username: String,
    /// Where messages for this session are queued.
    pub outbox: Outbox,
    /// Join order, used to sort the roster.
    joined: u64,
}

impl Member {
    pub fn id(&self) -> ConnectionId {
        self.outbox.id()
    }
}

/// Authenticated sessions, unique by case-insensitive username.
///
/// ```text
/// try_insert(name, outbox) ──→ [registered] ──→ remove(id)
///        │                                         │
///        └─ DuplicateUsername if name taken        └─ None if already gone
/// ```
#[derive(Debug, Default)]
pub struct Registry {
    /// Members keyed by lowercased username.
    members: HashMap<String, Member>,

    /// An index from connection to username key, so teardown can find its
    /// entry without knowing the name. Kept in sync with `members`.
    by_connection: HashMap<ConnectionId, String>,

    next_join: u64,
}

fn key(username: &str) -> String {
    username.to_lowercase()
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `username` for the outbox's connection, unless the name
    /// (ignoring case) or the connection is already registered.
    ///
    /// # Errors
    /// [`SessionError::DuplicateUsername`] when the name is taken, and
    /// [`SessionError::AlreadyRegistered`] when the connection already has
    /// an entry. Nothing is modified in either case.
    pub fn try_insert(&mut self, username: &str, outbox: Outbox) -> Result<(), SessionError> {
        let name_key = key(username);
        if self.members.contains_key(&name_key) {
            return Err(SessionError::DuplicateUsername(username.to_string()));
        }
        if let Some(existing) = self.by_connection.get(&outbox.id()) {
            return Err(SessionError::AlreadyRegistered {
                id: outbox.id(),
                username: self
                    .members
                    .get(existing)
                    .map_or_else(|| existing.clone(), |member| member.username.clone()),
            });
        }

        let joined = self.next_join;
        self.next_join += 1;
        self.by_connection.insert(outbox.id(), name_key.clone());
        self.members.insert(
            name_key,
            Member {
                username: username.to_string(),
                outbox,
                joined,
            },
        );
        tracing::debug!(username, "registered");
        Ok(())
    }

    /// Removes the session registered for `id`.
    ///
    /// Idempotent: returns `None` (and changes nothing) when `id` is not
    /// registered, whether it never was or was already removed.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Member> {
        let name_key = self.by_connection.remove(&id)?;
        let member = self.members.remove(&name_key);
        if let Some(member) = &member {
            tracing::debug!(username = %member.username, "unregistered");
        }
        member
    }

    /// Returns `true` if `username` is taken, ignoring case.
    pub fn contains_name(&self, username: &str) -> bool {
        self.members.contains_key(&key(username))
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Member> {
        self.by_connection
            .get(&id)
            .and_then(|name_key| self.members.get(name_key))
    }

    /// All members, in no particular order.
    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    /// Registered usernames in join order.
    pub fn roster(&self) -> Vec<String> {
        let mut members: Vec<&Member> = self.members.values().collect();
        members.sort_by_key(|member| member.joined);
        members
            .into_iter()
            .map(|member| member.username.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}
