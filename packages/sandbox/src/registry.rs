// ABOUTME: In-memory session registry mapping internal session ids to sandbox handles
// ABOUTME: One lock guards entries, identity mappings and provisioning reservations; no I/O under it

use crate::identity::IdentityTable;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Reference to one live sandbox environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxHandle {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub handle: SandboxHandle,
    pub last_accessed: Instant,
}

#[derive(Debug, Default)]
struct RegistryState {
    sessions: HashMap<String, SessionEntry>,
    identity: IdentityTable,
    /// Sandboxes being created but not yet registered
    provisioning: usize,
}

/// Shared session bookkeeping.
///
/// Every method takes the lock, does its bookkeeping and releases it before
/// returning, so callers can never hold it across an executor call.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("Session registry mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Refresh `last_accessed` and return the cached handle
    pub fn touch(&self, internal_id: &str) -> Option<SandboxHandle> {
        let mut state = self.lock();
        let entry = state.sessions.get_mut(internal_id)?;
        entry.last_accessed = Instant::now();
        Some(entry.handle.clone())
    }

    /// Cached handle without refreshing the timestamp
    pub fn handle(&self, internal_id: &str) -> Option<SandboxHandle> {
        self.lock()
            .sessions
            .get(internal_id)
            .map(|entry| entry.handle.clone())
    }

    pub fn last_accessed(&self, internal_id: &str) -> Option<Instant> {
        self.lock()
            .sessions
            .get(internal_id)
            .map(|entry| entry.last_accessed)
    }

    pub fn contains(&self, internal_id: &str) -> bool {
        self.lock().sessions.contains_key(internal_id)
    }

    /// Number of registered sessions
    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().sessions.is_empty()
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.lock().sessions.keys().cloned().collect()
    }

    /// Claim a capacity slot for a sandbox about to be created.
    ///
    /// Registered sessions and outstanding reservations both count against
    /// `max_sessions`. The slot is released when the guard is dropped unless
    /// it is consumed by [`SessionRegistry::register`].
    pub fn try_reserve(&self, max_sessions: usize) -> Option<ProvisioningGuard> {
        let mut state = self.lock();
        if state.sessions.len() + state.provisioning >= max_sessions {
            debug!(
                live = state.sessions.len(),
                provisioning = state.provisioning,
                max = max_sessions,
                "Capacity reservation refused"
            );
            return None;
        }

        state.provisioning += 1;
        Some(ProvisioningGuard {
            registry: self.clone(),
            armed: true,
        })
    }

    fn release_reservation(&self) {
        let mut state = self.lock();
        state.provisioning = state.provisioning.saturating_sub(1);
    }

    /// Register a freshly provisioned sandbox, consuming its reservation.
    ///
    /// If another caller registered the same id in the meantime, that entry
    /// wins: it is touched and returned as `Err` so the caller can discard
    /// its own sandbox.
    pub fn register(
        &self,
        internal_id: &str,
        handle: SandboxHandle,
        mut reservation: ProvisioningGuard,
    ) -> Result<SandboxHandle, SandboxHandle> {
        let mut state = self.lock();
        state.provisioning = state.provisioning.saturating_sub(1);
        reservation.armed = false;

        if let Some(existing) = state.sessions.get_mut(internal_id) {
            existing.last_accessed = Instant::now();
            return Err(existing.handle.clone());
        }

        state.sessions.insert(
            internal_id.to_string(),
            SessionEntry {
                handle: handle.clone(),
                last_accessed: Instant::now(),
            },
        );
        Ok(handle)
    }

    /// Insert an entry found during recovery; ignores capacity.
    ///
    /// Returns false when the id is already tracked.
    pub fn adopt(&self, internal_id: &str, handle: SandboxHandle) -> bool {
        let mut state = self.lock();
        if state.sessions.contains_key(internal_id) {
            return false;
        }

        state.sessions.insert(
            internal_id.to_string(),
            SessionEntry {
                handle,
                last_accessed: Instant::now(),
            },
        );
        true
    }

    /// Drop the entry only while it still points at `handle_id`.
    ///
    /// Keeps a replacement registered by a concurrent caller intact. Identity
    /// mappings are kept: the logical session lives on.
    pub fn evict_handle(&self, internal_id: &str, handle_id: &str) -> Option<SessionEntry> {
        let mut state = self.lock();
        match state.sessions.get(internal_id) {
            Some(entry) if entry.handle.id == handle_id => state.sessions.remove(internal_id),
            _ => None,
        }
    }

    /// Drop the identity mappings of a session that has no registered entry.
    ///
    /// Returns false (and keeps the mappings) when the id is registered.
    pub fn forget_unregistered(&self, internal_id: &str) -> bool {
        let mut state = self.lock();
        if state.sessions.contains_key(internal_id) {
            return false;
        }
        state.identity.remove_session(internal_id);
        true
    }

    /// Ids whose idle time at `now` strictly exceeds `ttl`
    pub fn expired(&self, now: Instant, ttl: Duration) -> Vec<String> {
        self.lock()
            .sessions
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.last_accessed) > ttl)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Remove a session together with its identity mappings, provided it is
    /// still expired (it may have been touched since it was selected)
    pub fn remove_expired(
        &self,
        internal_id: &str,
        now: Instant,
        ttl: Duration,
    ) -> Option<SessionEntry> {
        let mut state = self.lock();
        let still_expired = state
            .sessions
            .get(internal_id)
            .map(|entry| now.saturating_duration_since(entry.last_accessed) > ttl)?;
        if !still_expired {
            return None;
        }

        state.identity.remove_session(internal_id);
        state.sessions.remove(internal_id)
    }

    /// Run `f` against the identity table under the registry lock
    pub fn with_identity<R>(&self, f: impl FnOnce(&mut IdentityTable) -> R) -> R {
        f(&mut self.lock().identity)
    }
}

/// Capacity slot held while a sandbox is being provisioned
pub struct ProvisioningGuard {
    registry: SessionRegistry,
    armed: bool,
}

impl Drop for ProvisioningGuard {
    fn drop(&mut self) {
        if self.armed {
            self.registry.release_reservation();
        }
    }
}
