//! Session registry — which users are reachable, and how.
//!
//! Keyed on username. Shared by every inbound task of one node; all access
//! goes through the methods below so no map guard ever crosses an `.await`.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::transport::PeerHandle;

/// One registered user.
#[derive(Debug, Clone)]
pub struct UserSession {
    /// Current reachability handle. Replaced silently on reconnection.
    pub handle: PeerHandle,
    pub connected_at: Instant,
    /// Last time any frame from this user was observed.
    pub last_seen: Instant,
}

/// What `register` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// First registration; the user was unknown.
    New,
    /// Already registered; the handle changed.
    Moved,
    /// Already registered on the same handle.
    Refreshed,
}

/// Private delivery to a user who is not registered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("user {0:?} is not online")]
pub struct UnknownRecipient(pub String);

#[derive(Clone, Default)]
pub struct SessionRegistry {
    users: Arc<DashMap<String, UserSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a user. Re-registering replaces the handle and
    /// resets last-seen; there is never more than one entry per username.
    pub fn register(&self, username: &str, handle: PeerHandle) -> Registration {
        let now = Instant::now();
        match self.users.entry(username.to_string()) {
            Entry::Occupied(mut entry) => {
                let session = entry.get_mut();
                session.last_seen = now;
                if session.handle == handle {
                    Registration::Refreshed
                } else {
                    session.handle = handle;
                    Registration::Moved
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(UserSession {
                    handle,
                    connected_at: now,
                    last_seen: now,
                });
                Registration::New
            }
        }
    }

    /// Like `register`, but only for users already present.
    pub fn refresh(&self, username: &str, handle: PeerHandle) -> Option<Registration> {
        let mut session = self.users.get_mut(username)?;
        session.last_seen = Instant::now();
        if session.handle == handle {
            Some(Registration::Refreshed)
        } else {
            session.handle = handle;
            Some(Registration::Moved)
        }
    }

    /// Update last-seen without touching the handle.
    pub fn touch(&self, username: &str) -> bool {
        match self.users.get_mut(username) {
            Some(mut session) => {
                session.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    pub fn resolve(&self, username: &str) -> Result<PeerHandle, UnknownRecipient> {
        self.users
            .get(username)
            .map(|s| s.handle)
            .ok_or_else(|| UnknownRecipient(username.to_string()))
    }

    pub fn contains(&self, username: &str) -> bool {
        self.users.contains_key(username)
    }

    /// All registered usernames, sorted.
    pub fn all(&self) -> Vec<String> {
        let mut names: Vec<String> = self.users.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Username → handle pairs, for fan-out.
    pub fn handles(&self) -> Vec<(String, PeerHandle)> {
        self.users
            .iter()
            .map(|e| (e.key().clone(), e.value().handle))
            .collect()
    }

    /// Full copy of every session, sorted by username.
    pub fn snapshot(&self) -> Vec<(String, UserSession)> {
        let mut sessions: Vec<(String, UserSession)> = self
            .users
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        sessions.sort_by(|a, b| a.0.cmp(&b.0));
        sessions
    }

    pub fn remove(&self, username: &str) -> Option<UserSession> {
        self.users.remove(username).map(|(_, session)| session)
    }

    /// Remove `username` only while its current handle is `handle`.
    pub fn remove_if_handle(&self, username: &str, handle: &PeerHandle) -> Option<UserSession> {
        self.users
            .remove_if(username, |_, session| session.handle == *handle)
            .map(|(_, session)| session)
    }

    /// Remove whichever user is currently reachable through `handle`.
    ///
    /// Used when a stream connection closes. A user who already reconnected
    /// on a new handle is left alone.
    pub fn remove_handle(&self, handle: &PeerHandle) -> Option<String> {
        let username = self
            .users
            .iter()
            .find(|e| e.value().handle == *handle)
            .map(|e| e.key().clone())?;
        self.remove_if_handle(&username, handle).map(|_| username)
    }

    /// Remove every user silent for longer than `timeout`.
    pub fn expire(&self, timeout: Duration) -> Vec<(String, UserSession)> {
        let mut expired = Vec::new();
        self.users.retain(|username, session| {
            let stale = session.last_seen.elapsed() > timeout;
            if stale {
                expired.push((username.clone(), session.clone()));
            }
            !stale
        });
        expired.sort_by(|a, b| a.0.cmp(&b.0));
        expired
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
