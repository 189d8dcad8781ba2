//! Sandbox backend adapters.
//!
//! A [`SandboxBackend`] is the uniform capability surface over one remote
//! compute provider: provision, command execution, file access, and lifecycle
//! control. The orchestrator and the stream normalizer never branch on which
//! provider sits behind the trait.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use sandbox_orchestrator_error::OrchestratorError;

mod code_interpreter;
mod http;
pub mod testing;
mod workspace;

pub use code_interpreter::{CodeInterpreterBackend, CodeInterpreterConfig};
pub use workspace::{WorkspaceBackend, WorkspaceConfig};

pub type BackendFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, OrchestratorError>> + Send + 'a>>;

/// Which provider implementation serves a session. Selected by configuration,
/// never by the core logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Ephemeral code-interpreter sandbox. Cheap to create, short-lived.
    CodeInterpreter,
    /// Long-lived workspace container. Slower cold start, pausable.
    Workspace,
}

impl BackendKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "code-interpreter" => Some(Self::CodeInterpreter),
            "workspace" => Some(Self::Workspace),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CodeInterpreter => "code-interpreter",
            Self::Workspace => "workspace",
        }
    }
}

/// Handle to one remote sandbox. The backend owns the remote resource; a
/// session record only carries this reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, ToSchema)]
pub struct BackendRef {
    /// Provider-assigned identifier, used to route lifecycle calls.
    pub id: String,
    /// Base URL of the agent served from inside the sandbox.
    pub agent_url: String,
}

#[derive(Debug, Clone, Default)]
pub struct SandboxSpec {
    /// Environment injected into the sandbox at creation time.
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToSchema)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Capability interface over a remote sandbox provider.
///
/// Every method is a remote network call and may fail with
/// `BackendUnreachable` (network/5xx) or `BackendRejected` (4xx). `create` is
/// not idempotent at the business level; callers must serialize creation per
/// owner key. `resume` on a running resource and `destroy` on a destroyed
/// resource are no-ops.
pub trait SandboxBackend: Send + Sync + 'static {
    fn kind(&self) -> BackendKind;

    fn create<'a>(&'a self, owner_key: &'a str, spec: &'a SandboxSpec)
        -> BackendFuture<'a, BackendRef>;

    fn run_command<'a>(
        &'a self,
        backend_ref: &'a BackendRef,
        command: &'a str,
    ) -> BackendFuture<'a, CommandOutput>;

    fn read_file<'a>(
        &'a self,
        backend_ref: &'a BackendRef,
        path: &'a str,
    ) -> BackendFuture<'a, String>;

    fn write_file<'a>(
        &'a self,
        backend_ref: &'a BackendRef,
        path: &'a str,
        contents: &'a str,
    ) -> BackendFuture<'a, ()>;

    fn list_files<'a>(
        &'a self,
        backend_ref: &'a BackendRef,
        path: &'a str,
    ) -> BackendFuture<'a, Vec<String>>;

    fn pause<'a>(&'a self, backend_ref: &'a BackendRef) -> BackendFuture<'a, ()>;

    fn resume<'a>(&'a self, backend_ref: &'a BackendRef) -> BackendFuture<'a, ()>;

    fn destroy<'a>(&'a self, backend_ref: &'a BackendRef) -> BackendFuture<'a, ()>;
}

pub(crate) fn build_http_client(timeout: Duration) -> Result<reqwest::Client, OrchestratorError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|err| OrchestratorError::BackendUnreachable {
            operation: "client_init".to_string(),
            message: err.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBackend;

    #[test]
    fn backend_kind_round_trips() {
        for kind in [BackendKind::CodeInterpreter, BackendKind::Workspace] {
            assert_eq!(BackendKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(BackendKind::parse("firecracker"), None);
    }

    #[tokio::test]
    async fn mock_backend_counts_lifecycle_calls() {
        let backend = MockBackend::new();
        let spec = SandboxSpec::default();

        let backend_ref = backend.create("alice/proj-1", &spec).await.expect("create");
        assert_eq!(backend.create_calls(), 1);
        assert!(backend.is_live(&backend_ref.id));

        let output = backend
            .run_command(&backend_ref, "echo hi")
            .await
            .expect("run");
        assert_eq!(output.exit_code, 0);

        backend.destroy(&backend_ref).await.expect("destroy");
        backend.destroy(&backend_ref).await.expect("destroy again");
        assert_eq!(backend.destroy_calls(), 2);
        assert!(!backend.is_live(&backend_ref.id));

        // A reclaimed sandbox no longer accepts commands.
        let err = backend
            .run_command(&backend_ref, "echo hi")
            .await
            .expect_err("reclaimed");
        assert!(matches!(
            err,
            sandbox_orchestrator_error::OrchestratorError::BackendUnreachable { .. }
        ));
    }
}
