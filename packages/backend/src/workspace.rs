//! Workspace-container provider.
//!
//! Long-lived containers created from a pre-built agent image, authenticated
//! with a bearer token. Stop/start map to the pause/resume capabilities, so
//! filesystem state survives idle periods cheaply.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use sandbox_orchestrator_error::OrchestratorError;

use crate::http::expect_success;
use crate::{
    build_http_client, BackendFuture, BackendKind, BackendRef, CommandOutput, SandboxBackend,
    SandboxSpec,
};

#[derive(Debug, Clone)]
pub struct WorkspaceConfig {
    pub api_url: String,
    pub api_token: String,
    /// Image the workspace is created from; expected to serve the agent.
    pub image: String,
    /// Port the agent listens on inside the workspace.
    pub agent_port: u16,
    pub request_timeout: Duration,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.daytona.io".to_string(),
            api_token: String::new(),
            image: "opencode-agent".to_string(),
            agent_port: 8080,
            request_timeout: Duration::from_secs(30),
        }
    }
}

pub struct WorkspaceBackend {
    http: reqwest::Client,
    config: WorkspaceConfig,
}

impl WorkspaceBackend {
    pub fn new(config: WorkspaceConfig) -> Result<Self, OrchestratorError> {
        Ok(Self {
            http: build_http_client(config.request_timeout)?,
            config,
        })
    }

    fn workspace_url(&self, id: &str, suffix: &str) -> String {
        format!("{}/workspaces/{id}{suffix}", self.config.api_url)
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.config.api_token)
    }
}

#[derive(Debug, Deserialize)]
struct CreateWorkspaceResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExecResponse {
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    #[serde(default, rename = "exitCode")]
    exit_code: i32,
}

#[derive(Debug, Deserialize)]
struct ListFilesResponse {
    #[serde(default)]
    files: Vec<String>,
}

impl SandboxBackend for WorkspaceBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Workspace
    }

    fn create<'a>(
        &'a self,
        owner_key: &'a str,
        spec: &'a SandboxSpec,
    ) -> BackendFuture<'a, BackendRef> {
        Box::pin(async move {
            let name = owner_key.replace(['/', ':'], "-");
            let response = expect_success(
                "create",
                self.http
                    .post(format!("{}/workspaces", self.config.api_url))
                    .header("Authorization", self.bearer())
                    .json(&json!({
                        "name": name,
                        "image": self.config.image,
                        "env": spec.env,
                        "ports": [self.config.agent_port],
                        "autoStart": true,
                    }))
                    .send()
                    .await,
            )
            .await?;

            let body: CreateWorkspaceResponse = response.json().await.map_err(|err| {
                OrchestratorError::BackendUnreachable {
                    operation: "create".to_string(),
                    message: err.to_string(),
                }
            })?;

            let id = body.id.unwrap_or_else(|| name.clone());
            let agent_url = body
                .url
                .unwrap_or_else(|| format!("https://{id}-{}.daytona.run", self.config.agent_port));
            debug!(workspace_id = %id, owner_key, "created workspace container");
            Ok(BackendRef { id, agent_url })
        })
    }

    fn run_command<'a>(
        &'a self,
        backend_ref: &'a BackendRef,
        command: &'a str,
    ) -> BackendFuture<'a, CommandOutput> {
        Box::pin(async move {
            let response = expect_success(
                "run_command",
                self.http
                    .post(self.workspace_url(&backend_ref.id, "/exec"))
                    .header("Authorization", self.bearer())
                    .json(&json!({ "command": command }))
                    .send()
                    .await,
            )
            .await?;

            let body: ExecResponse = response.json().await.map_err(|err| {
                OrchestratorError::BackendUnreachable {
                    operation: "run_command".to_string(),
                    message: err.to_string(),
                }
            })?;
            Ok(CommandOutput {
                stdout: body.stdout,
                stderr: body.stderr,
                exit_code: body.exit_code,
            })
        })
    }

    fn read_file<'a>(
        &'a self,
        backend_ref: &'a BackendRef,
        path: &'a str,
    ) -> BackendFuture<'a, String> {
        Box::pin(async move {
            let response = expect_success(
                "read_file",
                self.http
                    .get(self.workspace_url(&backend_ref.id, "/files"))
                    .header("Authorization", self.bearer())
                    .query(&[("path", path)])
                    .send()
                    .await,
            )
            .await?;

            response
                .text()
                .await
                .map_err(|err| OrchestratorError::BackendUnreachable {
                    operation: "read_file".to_string(),
                    message: err.to_string(),
                })
        })
    }

    fn write_file<'a>(
        &'a self,
        backend_ref: &'a BackendRef,
        path: &'a str,
        contents: &'a str,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            expect_success(
                "write_file",
                self.http
                    .put(self.workspace_url(&backend_ref.id, "/files"))
                    .header("Authorization", self.bearer())
                    .query(&[("path", path)])
                    .body(contents.to_string())
                    .send()
                    .await,
            )
            .await?;
            Ok(())
        })
    }

    fn list_files<'a>(
        &'a self,
        backend_ref: &'a BackendRef,
        path: &'a str,
    ) -> BackendFuture<'a, Vec<String>> {
        Box::pin(async move {
            let response = expect_success(
                "list_files",
                self.http
                    .get(self.workspace_url(&backend_ref.id, "/files/list"))
                    .header("Authorization", self.bearer())
                    .query(&[("path", path)])
                    .send()
                    .await,
            )
            .await?;

            let body: ListFilesResponse = response.json().await.map_err(|err| {
                OrchestratorError::BackendUnreachable {
                    operation: "list_files".to_string(),
                    message: err.to_string(),
                }
            })?;
            Ok(body.files)
        })
    }

    fn pause<'a>(&'a self, backend_ref: &'a BackendRef) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            expect_success(
                "pause",
                self.http
                    .post(self.workspace_url(&backend_ref.id, "/stop"))
                    .header("Authorization", self.bearer())
                    .send()
                    .await,
            )
            .await?;
            Ok(())
        })
    }

    fn resume<'a>(&'a self, backend_ref: &'a BackendRef) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            match expect_success(
                "resume",
                self.http
                    .post(self.workspace_url(&backend_ref.id, "/start"))
                    .header("Authorization", self.bearer())
                    .send()
                    .await,
            )
            .await
            {
                Ok(_) => Ok(()),
                // Already running counts as resumed.
                Err(OrchestratorError::BackendRejected { message, .. })
                    if message.starts_with("409") =>
                {
                    Ok(())
                }
                Err(err) => Err(err),
            }
        })
    }

    fn destroy<'a>(&'a self, backend_ref: &'a BackendRef) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            match expect_success(
                "destroy",
                self.http
                    .delete(self.workspace_url(&backend_ref.id, ""))
                    .header("Authorization", self.bearer())
                    .send()
                    .await,
            )
            .await
            {
                // A workspace that is already gone counts as destroyed.
                Ok(_) | Err(OrchestratorError::NotFound { .. }) => Ok(()),
                Err(err) => Err(err),
            }
        })
    }
}
