use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::now_ms;
use crate::orchestrator::SessionOrchestrator;
use crate::types::{SandboxSession, SessionStatus};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReaperStats {
    pub paused: usize,
    pub destroyed: usize,
}

/// Periodic reclamation of stale sessions: active sessions past the idle
/// threshold are paused, paused ones past the destroy threshold are torn
/// down. Each transition takes the same per-key lock as the orchestrator, so
/// a scan never races an in-flight get-or-create for the same owner.
pub struct IdleReaper {
    orchestrator: Arc<SessionOrchestrator>,
}

impl IdleReaper {
    pub fn new(orchestrator: Arc<SessionOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// One deterministic scan pass, evaluated against `now`. The periodic
    /// loop calls this with the wall clock; tests drive it manually.
    pub async fn run_once(&self, now: i64) -> ReaperStats {
        let mut stats = ReaperStats::default();
        for scanned in self.orchestrator.registry().snapshot() {
            if self.reap_session(&scanned, now, &mut stats).await {
                // The registry entry is gone; its lock entry goes with it.
                self.orchestrator
                    .registry()
                    .prune_key_lock(&scanned.owner_key);
            }
        }
        stats
    }

    /// Evaluate one session under its key lock. Returns whether the registry
    /// entry was removed.
    async fn reap_session(
        &self,
        scanned: &SandboxSession,
        now: i64,
        stats: &mut ReaperStats,
    ) -> bool {
        let registry = self.orchestrator.registry();
        let key_lock = registry.key_lock(&scanned.owner_key);
        let _guard = key_lock.lock().await;

        // Re-read under the lock; activity or a transition may have landed
        // since the snapshot.
        let Some(current) = registry.get(&scanned.owner_key) else {
            return false;
        };
        if current.session_id != scanned.session_id {
            return false;
        }
        let stale_for = now.saturating_sub(current.last_activity_at);
        if stale_for < 0 {
            return false;
        }
        let config = self.orchestrator.config();

        match current.status {
            // Destroyed and Creating cover records left behind by failed or
            // abandoned creations; they have no sandbox to tear down but age
            // out on the same threshold.
            SessionStatus::Paused
            | SessionStatus::Idle
            | SessionStatus::Destroyed
            | SessionStatus::Creating
                if stale_for > config.to_destroy.as_millis() as i64 =>
            {
                if let Some(backend_ref) = current.backend_ref.as_ref() {
                    if let Err(err) = self.orchestrator.backend().destroy(backend_ref).await {
                        warn!(
                            error = %err,
                            session_id = %current.session_id,
                            "reaper backend destroy failed, dropping entry anyway"
                        );
                    }
                }
                registry.remove(&current.owner_key);
                info!(
                    session_id = %current.session_id,
                    owner_key = %current.owner_key,
                    stale_ms = stale_for,
                    "reaped stale session"
                );
                stats.destroyed += 1;
                true
            }
            SessionStatus::Active | SessionStatus::Idle
                if stale_for > config.idle_to_pause.as_millis() as i64 =>
            {
                let Some(backend_ref) = current.backend_ref.as_ref() else {
                    return false;
                };
                match self.orchestrator.backend().pause(backend_ref).await {
                    Ok(()) => {
                        registry.update(&current.owner_key, |session| {
                            session.status = SessionStatus::Paused;
                        });
                        info!(
                            session_id = %current.session_id,
                            owner_key = %current.owner_key,
                            stale_ms = stale_for,
                            "paused idle session"
                        );
                        stats.paused += 1;
                    }
                    Err(err) => {
                        // Still running; mark Idle and retry next pass.
                        registry.update(&current.owner_key, |session| {
                            session.status = SessionStatus::Idle;
                        });
                        warn!(
                            error = %err,
                            session_id = %current.session_id,
                            "pause failed, will retry"
                        );
                    }
                }
                false
            }
            _ => false,
        }
    }

    /// Start the periodic loop. The returned handle stops it; dropping the
    /// handle stops it too.
    pub fn spawn(self) -> ReaperHandle {
        let scan_interval = self.orchestrator.config().scan_interval;
        let task = tokio::spawn(async move {
            let mut ticker = interval(scan_interval);
            // The first tick fires immediately; skip it so a fresh server
            // does not scan an empty registry.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let stats = self.run_once(now_ms()).await;
                if stats != ReaperStats::default() {
                    debug!(paused = stats.paused, destroyed = stats.destroyed, "reaper pass");
                }
            }
        });
        ReaperHandle { task }
    }
}

pub struct ReaperHandle {
    task: JoinHandle<()>,
}

impl ReaperHandle {
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for ReaperHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
