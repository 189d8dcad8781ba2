use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use sandbox_orchestrator_backend::{BackendKind, BackendRef};

/// Identifies the logical conversation a session serves. At most one live
/// session exists per owner key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, ToSchema)]
pub struct OwnerKey {
    pub user_id: String,
    pub project_id: String,
}

impl OwnerKey {
    pub fn new(user_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            project_id: project_id.into(),
        }
    }
}

impl fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.project_id)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Creating,
    Active,
    /// Stale but still running; the reaper failed to pause it and will retry.
    Idle,
    Paused,
    Destroyed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Active => "active",
            Self::Idle => "idle",
            Self::Paused => "paused",
            Self::Destroyed => "destroyed",
        }
    }

    /// A session in this status can serve a turn without any backend call.
    pub fn reusable(&self) -> bool {
        matches!(self, Self::Active | Self::Idle)
    }
}

/// One sandbox session. Mutated only by the orchestrator and the reaper,
/// under the registry's per-key exclusion.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToSchema)]
pub struct SandboxSession {
    pub session_id: String,
    pub owner_key: OwnerKey,
    pub backend_kind: BackendKind,
    /// Absent while the session is still `Creating` or after a failed
    /// creation.
    pub backend_ref: Option<BackendRef>,
    pub status: SessionStatus,
    pub created_at: i64,
    pub last_activity_at: i64,
}
