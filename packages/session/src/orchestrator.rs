use std::sync::Arc;

use tracing::{info, warn};

use sandbox_orchestrator_backend::{SandboxBackend, SandboxSpec};
use sandbox_orchestrator_error::OrchestratorError;

use crate::registry::SessionRegistry;
use crate::types::{OwnerKey, SandboxSession, SessionStatus};
use crate::{now_ms, OrchestratorConfig};

/// Decides, per lookup, whether to reuse, resume, or create a session, and
/// performs the backend calls to realize that decision.
///
/// All transitions for one owner key run under the registry's per-key lock,
/// so concurrent first turns serialize and observe a single sandbox.
pub struct SessionOrchestrator {
    registry: Arc<SessionRegistry>,
    backend: Arc<dyn SandboxBackend>,
    config: OrchestratorConfig,
    sandbox_spec: SandboxSpec,
}

impl SessionOrchestrator {
    pub fn new(
        backend: Arc<dyn SandboxBackend>,
        config: OrchestratorConfig,
        sandbox_spec: SandboxSpec,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry: Arc::new(SessionRegistry::new()),
            backend,
            config,
            sandbox_spec,
        })
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub(crate) fn backend(&self) -> &Arc<dyn SandboxBackend> {
        &self.backend
    }

    /// Resolve the session for `owner_key`, creating or resuming its sandbox
    /// as needed. Waits for any in-flight transition on the same key.
    pub async fn get_or_create(
        &self,
        owner_key: &OwnerKey,
    ) -> Result<SandboxSession, OrchestratorError> {
        let key_lock = self.registry.key_lock(owner_key);
        let _guard = key_lock.lock().await;

        if let Some(existing) = self.registry.get(owner_key) {
            match existing.status {
                SessionStatus::Active | SessionStatus::Idle => {
                    let touched = self.registry.update(owner_key, |session| {
                        session.status = SessionStatus::Active;
                        session.last_activity_at = now_ms();
                    });
                    return Ok(touched.unwrap_or(existing));
                }
                SessionStatus::Paused => {
                    return self.resume_locked(owner_key, existing).await;
                }
                // `Creating` observed while holding the key lock means an
                // earlier attempt was cancelled mid-flight; like `Destroyed`
                // it is treated as absent.
                SessionStatus::Creating | SessionStatus::Destroyed => {
                    self.registry.remove(owner_key);
                }
            }
        }

        self.create_locked(owner_key).await
    }

    /// Non-waiting lookup. Unlike [`get_or_create`] this never performs a
    /// backend call; callers that observe `ConcurrentCreationInProgress` or
    /// `SessionNotReady` should re-resolve.
    ///
    /// [`get_or_create`]: SessionOrchestrator::get_or_create
    pub fn resolve(&self, owner_key: &OwnerKey) -> Result<SandboxSession, OrchestratorError> {
        let Some(session) = self.registry.get(owner_key) else {
            return Err(OrchestratorError::SessionNotFound {
                session_id: owner_key.to_string(),
            });
        };
        match session.status {
            SessionStatus::Active | SessionStatus::Idle => {
                self.registry.touch(owner_key, now_ms());
                Ok(session)
            }
            SessionStatus::Creating => Err(OrchestratorError::ConcurrentCreationInProgress {
                owner_key: owner_key.to_string(),
            }),
            SessionStatus::Paused | SessionStatus::Destroyed => {
                Err(OrchestratorError::SessionNotReady {
                    session_id: session.session_id,
                    status: session.status.as_str().to_string(),
                })
            }
        }
    }

    /// Destroy the session's sandbox and drop its registry entry. Idempotent:
    /// unknown session ids succeed without any backend call.
    pub async fn destroy_session(&self, session_id: &str) -> Result<(), OrchestratorError> {
        let Some(found) = self.registry.find_by_session_id(session_id) else {
            return Ok(());
        };

        {
            let key_lock = self.registry.key_lock(&found.owner_key);
            let _guard = key_lock.lock().await;

            // Re-check under the lock; the record may have been replaced.
            let Some(current) = self.registry.get(&found.owner_key) else {
                return Ok(());
            };
            if current.session_id != session_id {
                return Ok(());
            }

            if let Some(backend_ref) = current.backend_ref.as_ref() {
                if let Err(err) = self.backend.destroy(backend_ref).await {
                    warn!(
                        error = %err,
                        session_id,
                        owner_key = %current.owner_key,
                        "backend destroy failed, dropping registry entry anyway"
                    );
                }
            }
            self.registry.remove(&found.owner_key);
            info!(session_id, owner_key = %found.owner_key, "session destroyed");
        }
        self.registry.prune_key_lock(&found.owner_key);
        Ok(())
    }

    /// Record activity for the owner's session. Called per normalized event
    /// so long-running turns are not reaped as idle.
    pub fn touch(&self, owner_key: &OwnerKey) {
        self.registry.touch(owner_key, now_ms());
    }

    /// Point-in-time, non-blocking monitoring view.
    pub fn snapshot(&self) -> Vec<SandboxSession> {
        self.registry.snapshot()
    }

    async fn resume_locked(
        &self,
        owner_key: &OwnerKey,
        existing: SandboxSession,
    ) -> Result<SandboxSession, OrchestratorError> {
        let backend_ref =
            existing
                .backend_ref
                .clone()
                .ok_or_else(|| OrchestratorError::SessionNotReady {
                    session_id: existing.session_id.clone(),
                    status: existing.status.as_str().to_string(),
                })?;

        // On failure the record stays Paused and the error propagates.
        self.backend.resume(&backend_ref).await?;

        let resumed = self
            .registry
            .update(owner_key, |session| {
                session.status = SessionStatus::Active;
                session.last_activity_at = now_ms();
            })
            .ok_or_else(|| OrchestratorError::SessionNotFound {
                session_id: existing.session_id.clone(),
            })?;
        info!(
            session_id = %resumed.session_id,
            owner_key = %owner_key,
            "session resumed"
        );
        Ok(resumed)
    }

    async fn create_locked(
        &self,
        owner_key: &OwnerKey,
    ) -> Result<SandboxSession, OrchestratorError> {
        let now = now_ms();
        let session_id = format!(
            "sess_{}_{}_{now}",
            owner_key.user_id, owner_key.project_id
        );
        self.registry.insert(SandboxSession {
            session_id: session_id.clone(),
            owner_key: owner_key.clone(),
            backend_kind: self.backend.kind(),
            backend_ref: None,
            status: SessionStatus::Creating,
            created_at: now,
            last_activity_at: now,
        });
        info!(session_id, owner_key = %owner_key, "creating sandbox session");

        match self
            .backend
            .create(&owner_key.to_string(), &self.sandbox_spec)
            .await
        {
            Ok(backend_ref) => self
                .registry
                .update(owner_key, |session| {
                    session.status = SessionStatus::Active;
                    session.backend_ref = Some(backend_ref.clone());
                    session.last_activity_at = now_ms();
                })
                .ok_or_else(|| OrchestratorError::SessionNotFound {
                    session_id: session_id.clone(),
                }),
            Err(err) => {
                // Status flips before the error surfaces, so the next
                // get_or_create sees consistent state. The Destroyed record
                // is kept for observability and treated as absent.
                self.registry.update(owner_key, |session| {
                    session.status = SessionStatus::Destroyed;
                });
                warn!(
                    error = %err,
                    session_id,
                    owner_key = %owner_key,
                    "sandbox creation failed"
                );
                Err(err)
            }
        }
    }
}
