//! Sandbox session lifecycle: registry, orchestrator, and idle reaper.

use std::time::Duration;

mod orchestrator;
mod reaper;
mod registry;
pub mod types;

pub use orchestrator::SessionOrchestrator;
pub use reaper::{IdleReaper, ReaperHandle, ReaperStats};
pub use registry::SessionRegistry;
pub use types::{OwnerKey, SandboxSession, SessionStatus};

/// Runtime-tunable lifecycle thresholds. Nothing here is a compiled-in
/// constant; the defaults track the cost profile of the workspace backend.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// How long a session may sit without activity before the reaper pauses
    /// its sandbox.
    pub idle_to_pause: Duration,
    /// How long a paused (or idle) session is kept before the reaper destroys
    /// its sandbox.
    pub to_destroy: Duration,
    /// Interval between reaper passes.
    pub scan_interval: Duration,
    /// Bound on individual backend calls; must be shorter than
    /// `idle_to_pause`.
    pub request_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            idle_to_pause: Duration::from_secs(30 * 60),
            to_destroy: Duration::from_secs(2 * 60 * 60),
            scan_interval: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
        }
    }
}

pub(crate) fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
