//! Process-wide registry of open sessions.
//!
//! The registry holds only weak references: sessions are owned by whoever
//! created them, and `reset()` uses the registry to terminate whatever is
//! still alive.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Role of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionRole {
    /// Publisher session
    Publisher,
    /// Subscriber session
    Subscriber,
}

/// A session that can be torn down in bulk
#[async_trait]
pub trait ManagedSession: Send + Sync {
    /// Registry id
    fn id(&self) -> u64;

    /// Role of the session
    fn role(&self) -> SessionRole;

    /// Terminate; must be idempotent and infallible
    async fn terminate(&self);
}

/// Weak registry of live sessions
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<u64, Weak<dyn ManagedSession>>,
    claims: DashMap<(SessionRole, String), u64>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve an id for a new session
    pub fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Track a session without extending its lifetime
    pub fn insert(&self, session: &Arc<dyn ManagedSession>) {
        debug!("Registered {:?} session {}", session.role(), session.id());
        self.sessions.insert(session.id(), Arc::downgrade(session));
    }

    /// Stop tracking a session
    pub fn remove(&self, id: u64) {
        if self.sessions.remove(&id).is_some() {
            debug!("Unregistered session {}", id);
        }
    }

    /// Claim a topic name for a role. Fails if another session holds it.
    pub fn claim(&self, role: SessionRole, topic: &str, id: u64) -> bool {
        match self.claims.entry((role, topic.to_string())) {
            Entry::Occupied(entry) => *entry.get() == id,
            Entry::Vacant(entry) => {
                entry.insert(id);
                true
            }
        }
    }

    /// Release a claim held by `id`
    pub fn release(&self, role: SessionRole, topic: &str, id: u64) {
        self.claims
            .remove_if(&(role, topic.to_string()), |_, holder| *holder == id);
    }

    /// Number of tracked sessions that are still alive
    pub fn live_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.value().strong_count() > 0)
            .count()
    }

    /// Remove every entry and return the sessions still alive
    pub fn drain(&self) -> Vec<Arc<dyn ManagedSession>> {
        let ids: Vec<u64> = self.sessions.iter().map(|entry| *entry.key()).collect();
        ids.into_iter()
            .filter_map(|id| self.sessions.remove(&id))
            .filter_map(|(_, weak)| weak.upgrade())
            .collect()
    }

    /// Terminate sessions taken out with [`SessionRegistry::drain`].
    ///
    /// Kept apart from `drain` so callers can release their own locks first.
    pub async fn terminate_sessions(sessions: Vec<Arc<dyn ManagedSession>>) -> usize {
        let count = sessions.len();
        for session in sessions {
            session.terminate().await;
        }
        count
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.sessions.len())
            .finish()
    }
}
