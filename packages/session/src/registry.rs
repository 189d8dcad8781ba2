use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex;

use crate::types::{OwnerKey, SandboxSession};

/// Process-wide session map with per-owner-key exclusion.
///
/// The map itself is guarded by a std mutex held only for in-memory reads and
/// writes; it never spans an await point. Transitions that involve backend
/// calls serialize on the per-key async lock from [`key_lock`], so unrelated
/// owner keys proceed fully in parallel while two first turns for the same
/// key cannot both reach the adapter's `create`.
///
/// [`key_lock`]: SessionRegistry::key_lock
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: StdMutex<HashMap<OwnerKey, SandboxSession>>,
    key_locks: StdMutex<HashMap<OwnerKey, Arc<Mutex<()>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transition token for one owner key. Hold the returned lock across the
    /// whole create/resume/destroy transition, including the backend call.
    pub fn key_lock(&self, owner_key: &OwnerKey) -> Arc<Mutex<()>> {
        self.key_locks
            .lock()
            .expect("key_locks lock")
            .entry(owner_key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn get(&self, owner_key: &OwnerKey) -> Option<SandboxSession> {
        self.sessions
            .lock()
            .expect("sessions lock")
            .get(owner_key)
            .cloned()
    }

    pub fn insert(&self, session: SandboxSession) {
        self.sessions
            .lock()
            .expect("sessions lock")
            .insert(session.owner_key.clone(), session);
    }

    /// Apply `mutate` to the record for `owner_key`, if present. Returns the
    /// updated record.
    pub fn update<F>(&self, owner_key: &OwnerKey, mutate: F) -> Option<SandboxSession>
    where
        F: FnOnce(&mut SandboxSession),
    {
        let mut sessions = self.sessions.lock().expect("sessions lock");
        let session = sessions.get_mut(owner_key)?;
        mutate(session);
        Some(session.clone())
    }

    pub fn remove(&self, owner_key: &OwnerKey) -> Option<SandboxSession> {
        self.sessions
            .lock()
            .expect("sessions lock")
            .remove(owner_key)
    }

    pub fn find_by_session_id(&self, session_id: &str) -> Option<SandboxSession> {
        self.sessions
            .lock()
            .expect("sessions lock")
            .values()
            .find(|session| session.session_id == session_id)
            .cloned()
    }

    /// Point-in-time view of every known session. Never blocks on in-flight
    /// transitions; used by the monitoring surface and the reaper scan.
    pub fn snapshot(&self) -> Vec<SandboxSession> {
        let mut sessions = self
            .sessions
            .lock()
            .expect("sessions lock")
            .values()
            .cloned()
            .collect::<Vec<_>>();
        sessions.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        sessions
    }

    /// Drop the lock entry for `owner_key` once its session record is gone
    /// and no task holds or awaits the lock. Call after releasing the key
    /// lock, or the entry outlives the session it guarded.
    pub fn prune_key_lock(&self, owner_key: &OwnerKey) {
        if self.get(owner_key).is_some() {
            return;
        }
        let mut key_locks = self.key_locks.lock().expect("key_locks lock");
        if let Some(lock) = key_locks.get(owner_key) {
            // The map's clone is the only one left, so nothing is waiting.
            if Arc::strong_count(lock) == 1 {
                key_locks.remove(owner_key);
            }
        }
    }

    /// Bump `last_activity_at` for the owner's record.
    pub fn touch(&self, owner_key: &OwnerKey, now_ms: i64) {
        let mut sessions = self.sessions.lock().expect("sessions lock");
        if let Some(session) = sessions.get_mut(owner_key) {
            session.last_activity_at = now_ms;
        }
    }
}

#[cfg(test)]
mod tests {
    use sandbox_orchestrator_backend::BackendKind;

    use super::*;
    use crate::types::{SandboxSession, SessionStatus};

    fn session(owner_key: &OwnerKey) -> SandboxSession {
        SandboxSession {
            session_id: format!("sess_{owner_key}"),
            owner_key: owner_key.clone(),
            backend_kind: BackendKind::CodeInterpreter,
            backend_ref: None,
            status: SessionStatus::Active,
            created_at: 0,
            last_activity_at: 0,
        }
    }

    #[test]
    fn prune_drops_lock_entry_after_session_removal() {
        let registry = SessionRegistry::new();
        let owner = OwnerKey::new("alice", "proj-1");
        registry.insert(session(&owner));
        drop(registry.key_lock(&owner));

        registry.remove(&owner);
        registry.prune_key_lock(&owner);

        assert!(registry.key_locks.lock().expect("key_locks lock").is_empty());
    }

    #[test]
    fn prune_keeps_lock_entry_while_session_exists() {
        let registry = SessionRegistry::new();
        let owner = OwnerKey::new("alice", "proj-1");
        registry.insert(session(&owner));
        drop(registry.key_lock(&owner));

        registry.prune_key_lock(&owner);

        assert_eq!(registry.key_locks.lock().expect("key_locks lock").len(), 1);
    }

    #[test]
    fn prune_keeps_lock_entry_while_a_task_holds_it() {
        let registry = SessionRegistry::new();
        let owner = OwnerKey::new("alice", "proj-1");
        let held = registry.key_lock(&owner);

        registry.prune_key_lock(&owner);

        assert_eq!(registry.key_locks.lock().expect("key_locks lock").len(), 1);
        drop(held);
    }
}
