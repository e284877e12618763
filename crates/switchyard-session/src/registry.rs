//! The session registry: who is currently connected as whom.
//!
//! Maps player names to [`SessionHandle`]s. It is the single source of
//! truth for name ownership and is shared by every session task, the
//! redirect handler and extensions, all of which may call it at the same
//! time from different threads.
//!
//! # Name conflicts
//!
//! A name belongs to the first live session that registers it. A second
//! connection claiming the same name is rejected with
//! [`SessionError::NameConflict`]; the player already online is never
//! evicted. The one exception is an entry whose session has already closed
//! but not yet unregistered itself: that entry is stale and is replaced.
//!
//! Names are compared ASCII case-insensitively, so `Alice` and `alice` are
//! the same player.
//!
//! # Capacity
//!
//! [`SessionRegistry::register_bounded`] counts and inserts in one step, so
//! simultaneous logins racing for the last free slot cannot overfill the
//! server.

use std::sync::{Mutex, PoisonError};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::{SessionError, SessionHandle};

/// Concurrent directory of active sessions, keyed by player name.
///
/// Every operation is atomic with respect to every other: the check and
/// the insert in [`register`](Self::register) happen under the same shard
/// lock, so two connections racing for one name cannot both win.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, SessionHandle>,
    /// Serializes admissions so the size seen by a capacity check is still
    /// the size when the insert lands. Lookups and removals skip it.
    admission: Mutex<()>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the session registered under `name`.
    pub fn get_by_name(&self, name: &str) -> Option<SessionHandle> {
        self.sessions
            .get(&registry_key(name))
            .map(|entry| entry.value().clone())
    }

    /// Registers `session` under its player name.
    ///
    /// # Errors
    /// [`SessionError::NameConflict`] if a live session already holds the
    /// name.
    pub fn register(&self, session: SessionHandle) -> Result<(), SessionError> {
        self.admit(session, None)
    }

    /// Registers `session` unless `max` sessions are already registered.
    ///
    /// # Errors
    /// [`SessionError::ServerFull`] if the registry is at capacity;
    /// [`SessionError::NameConflict`] if a live session already holds the
    /// name.
    pub fn register_bounded(&self, session: SessionHandle, max: usize) -> Result<(), SessionError> {
        self.admit(session, Some(max))
    }

    fn admit(&self, session: SessionHandle, max: Option<usize>) -> Result<(), SessionError> {
        let _admission = self.admission.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(max) = max {
            if self.sessions.len() >= max {
                tracing::info!(player = %session.name(), max, "registry full, rejecting new session");
                return Err(SessionError::ServerFull { max });
            }
        }

        let name = session.name().to_string();
        match self.sessions.entry(registry_key(&name)) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().is_closed() {
                    tracing::warn!(
                        player = %name,
                        existing = %occupied.get().id(),
                        rejected = %session.id(),
                        "name already in use, rejecting new session"
                    );
                    return Err(SessionError::NameConflict(name));
                }
                tracing::debug!(player = %name, "replacing closed session entry");
                occupied.insert(session);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(session);
            }
        }
        tracing::info!(player = %name, "session registered");
        Ok(())
    }

    /// Removes whatever is registered under `name`. Removing a name that is
    /// not registered is a no-op.
    ///
    /// Returns `true` if an entry was removed.
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.sessions.remove(&registry_key(name)).is_some();
        if removed {
            tracing::info!(player = %name, "session unregistered");
        }
        removed
    }

    /// Removes `session`'s entry, but only if the name is still held by
    /// that same session.
    ///
    /// Sessions use this on close so a slow-closing session can never
    /// remove a newer session that took over its name.
    pub fn unregister_session(&self, session: &SessionHandle) -> bool {
        let removed = self
            .sessions
            .remove_if(&registry_key(session.name()), |_, current| {
                current.id() == session.id()
            })
            .is_some();
        if removed {
            tracing::info!(player = %session.name(), "session unregistered");
        }
        removed
    }

    /// Names of every registered player, in no particular order.
    pub fn names(&self) -> Vec<String> {
        self.sessions
            .iter()
            .map(|entry| entry.value().name().to_string())
            .collect()
    }

    /// Returns the number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if nobody is registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

fn registry_key(name: &str) -> String {
    name.to_ascii_lowercase()
}

// =========================================================================
// Tests
// =========================================================================
