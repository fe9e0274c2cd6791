//! Registry of live sessions.
//!
//! Sessions are keyed by id in a [`DashMap`], so operations on different ids
//! never block each other. A session is present exactly while it is
//! `Connecting` or `Active`.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::error::RegistryError;
use super::pty::Geometry;
use super::state::{Session, SessionInfo};
use super::SessionId;

/// Default maximum number of concurrent sessions.
pub const DEFAULT_MAX_SESSIONS: usize = 100;

/// Concurrent table of live sessions.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
    max_sessions: usize,
}

impl SessionRegistry {
    /// Creates an empty registry holding at most `max_sessions` sessions.
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            max_sessions,
        }
    }

    /// Returns the configured capacity.
    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Atomically registers a new `Connecting` session.
    pub fn create(
        &self,
        id: SessionId,
        target_host: &str,
    ) -> Result<Arc<Session>, RegistryError> {
        // Checked before taking the entry: len() locks every shard.
        if self.sessions.len() >= self.max_sessions {
            return Err(RegistryError::CapacityExceeded(self.max_sessions));
        }

        match self.sessions.entry(id) {
            Entry::Occupied(entry) => Err(RegistryError::DuplicateId(entry.key().clone())),
            Entry::Vacant(entry) => {
                let session = Arc::new(Session::new(
                    entry.key().clone(),
                    target_host,
                    Geometry::default(),
                ));
                entry.insert(Arc::clone(&session));

                tracing::debug!(
                    session_id = %session.id(),
                    target_host = %target_host,
                    "Registered session"
                );
                Ok(session)
            }
        }
    }

    /// Returns the live session with this id.
    pub fn lookup(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Removes a session by id. Removing an absent id is a no-op.
    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    /// Removes `session` only if it is still the entry registered under its id.
    pub fn remove_session(&self, session: &Arc<Session>) -> bool {
        self.sessions
            .remove_if(session.id(), |_, current| Arc::ptr_eq(current, session))
            .is_some()
    }

    /// Returns handles to every live session.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Returns status snapshots of every live session.
    pub async fn list(&self) -> Vec<SessionInfo> {
        // Snapshot first so no shard guard is held across an await.
        let sessions = self.sessions();
        let mut infos = Vec::with_capacity(sessions.len());
        for session in sessions {
            infos.push(session.info().await);
        }
        infos.sort_by_key(|info| info.created_at);
        infos
    }

    /// Returns every live session bound to `target_host`.
    pub fn find_by_host(&self, target_host: &str) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().target_host() == target_host)
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Returns the number of live sessions.
    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Whether a live session uses this id.
    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SESSIONS)
    }
}
