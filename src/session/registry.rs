//! # Session Registry
//!
//! The set of live sessions, owned by the relay server and shared by handle.
//!
//! ## Locking:
//! One mutex, held only while inserting, removing, or copying entries out. Session
//! traffic never touches the registry, so the lock is never on the audio hot path.
//!
//! ## Who mutates it:
//! - the WebSocket endpoint registers a session right after the upgrade
//! - the session actor unregisters itself when it stops
//! - health and shutdown only read

use actix::prelude::*;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Ask a session to close both of its endpoints.
#[derive(Message, Debug, Clone, Copy)]
#[rtype(result = "()")]
pub struct CloseSession {
    pub reason: &'static str,
}

struct SessionEntry {
    created_at: DateTime<Utc>,
    closer: Recipient<CloseSession>,
}

/// Public view of one live session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub age_seconds: i64,
}

/// Registration refused because every slot is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryFull {
    pub capacity: usize,
}

impl std::fmt::Display for RegistryFull {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Session limit of {} reached", self.capacity)
    }
}

impl std::error::Error for RegistryFull {}

#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<String, SessionEntry>>>,
    capacity: usize,
}

impl SessionRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            capacity,
        }
    }

    // A panic elsewhere cannot leave a half-written HashMap entry behind, so a
    // poisoned lock is still safe to use.
    fn entries(&self) -> MutexGuard<'_, HashMap<String, SessionEntry>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a session. Fails when the registry is at capacity.
    pub fn register(&self, id: &str, closer: Recipient<CloseSession>) -> Result<(), RegistryFull> {
        let mut sessions = self.entries();
        if sessions.len() >= self.capacity {
            return Err(RegistryFull {
                capacity: self.capacity,
            });
        }

        sessions.insert(
            id.to_string(),
            SessionEntry {
                created_at: Utc::now(),
                closer,
            },
        );
        Ok(())
    }

    /// Remove a session. Returns false if it was not registered.
    pub fn unregister(&self, id: &str) -> bool {
        self.entries().remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries().contains_key(id)
    }

    /// Live sessions, oldest first.
    pub fn snapshot(&self) -> Vec<SessionInfo> {
        let now = Utc::now();
        let mut sessions: Vec<SessionInfo> = self
            .entries()
            .iter()
            .map(|(id, entry)| SessionInfo {
                id: id.clone(),
                created_at: entry.created_at,
                age_seconds: (now - entry.created_at).num_seconds(),
            })
            .collect();
        sessions.sort_by_key(|info| info.created_at);
        sessions
    }

    /// Close every live session and wait until each has acknowledged.
    ///
    /// The lock is released before any message is sent; sessions unregister
    /// themselves as they stop.
    pub async fn close_all(&self, reason: &'static str) -> usize {
        let closers: Vec<Recipient<CloseSession>> = self
            .entries()
            .values()
            .map(|entry| entry.closer.clone())
            .collect();

        let count = closers.len();
        let acks = closers
            .into_iter()
            .map(|closer| async move { closer.send(CloseSession { reason }).await });

        // A mailbox error means the session already stopped, which is the goal anyway
        let _ = futures_util::future::join_all(acks).await;
        count
    }
}
