//! Code-interpreter sandbox provider.
//!
//! Ephemeral sandboxes provisioned from a template id, authenticated with an
//! `X-API-Key` header. The agent inside the sandbox is reached through the
//! provider's port-forwarding domain.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use sandbox_orchestrator_error::OrchestratorError;

use crate::http::expect_success;
use crate::{
    build_http_client, BackendFuture, BackendKind, BackendRef, CommandOutput, SandboxBackend,
    SandboxSpec,
};

#[derive(Debug, Clone)]
pub struct CodeInterpreterConfig {
    pub api_url: String,
    pub api_key: String,
    /// Template the sandbox is provisioned from.
    pub template_id: String,
    /// Pattern for the in-sandbox agent URL; `{id}` is replaced with the
    /// provider-assigned sandbox id.
    pub agent_url_template: String,
    pub request_timeout: Duration,
}

impl Default for CodeInterpreterConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.e2b.dev".to_string(),
            api_key: String::new(),
            template_id: "base".to_string(),
            agent_url_template: "https://8080-{id}.e2b.app".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

pub struct CodeInterpreterBackend {
    http: reqwest::Client,
    config: CodeInterpreterConfig,
}

impl CodeInterpreterBackend {
    pub fn new(config: CodeInterpreterConfig) -> Result<Self, OrchestratorError> {
        Ok(Self {
            http: build_http_client(config.request_timeout)?,
            config,
        })
    }

    // Provisioning is served at the unversioned root; every per-sandbox
    // operation lives under /v2. That split is the provider's, not ours.
    fn sandbox_url(&self, id: &str, suffix: &str) -> String {
        format!("{}/v2/sandboxes/{id}{suffix}", self.config.api_url)
    }
}

#[derive(Debug, Deserialize)]
struct CommandResponse {
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
    entries: Vec<FileEntry>,
}

#[derive(Debug, Deserialize)]
struct FileEntry {
    path: String,
}

impl SandboxBackend for CodeInterpreterBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::CodeInterpreter
    }

    fn create<'a>(
        &'a self,
        owner_key: &'a str,
        spec: &'a SandboxSpec,
    ) -> BackendFuture<'a, BackendRef> {
        Box::pin(async move {
            let response = expect_success(
                "create",
                self.http
                    .post(format!("{}/sandboxes", self.config.api_url))
                    .header("X-API-Key", &self.config.api_key)
                    .json(&json!({
                        "templateID": self.config.template_id,
                        "metadata": { "ownerKey": owner_key },
                        "envVars": spec.env,
                    }))
                    .send()
                    .await,
            )
            .await?;

            let body: Value = response.json().await.map_err(|err| {
                OrchestratorError::BackendUnreachable {
                    operation: "create".to_string(),
                    message: err.to_string(),
                }
            })?;

            // The provider has shipped several field spellings for the id.
            let id = body
                .get("sandboxID")
                .or_else(|| body.get("sandboxId"))
                .or_else(|| body.get("id"))
                .and_then(Value::as_str)
                .ok_or_else(|| OrchestratorError::BackendRejected {
                    operation: "create".to_string(),
                    message: format!("no sandbox id in response: {body}"),
                })?
                .to_string();

            debug!(sandbox_id = %id, owner_key, "created code-interpreter sandbox");
            let agent_url = self.config.agent_url_template.replace("{id}", &id);
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
                    .post(self.sandbox_url(&backend_ref.id, "/commands"))
                    .header("X-API-Key", &self.config.api_key)
                    .json(&json!({ "command": command }))
                    .send()
                    .await,
            )
            .await?;

            let body: CommandResponse = response.json().await.map_err(|err| {
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
                    .get(self.sandbox_url(&backend_ref.id, "/files"))
                    .header("X-API-Key", &self.config.api_key)
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
                    .put(self.sandbox_url(&backend_ref.id, "/files"))
                    .header("X-API-Key", &self.config.api_key)
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
                    .get(self.sandbox_url(&backend_ref.id, "/files/list"))
                    .header("X-API-Key", &self.config.api_key)
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
            Ok(body.entries.into_iter().map(|entry| entry.path).collect())
        })
    }

    fn pause<'a>(&'a self, backend_ref: &'a BackendRef) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            expect_success(
                "pause",
                self.http
                    .post(self.sandbox_url(&backend_ref.id, "/pause"))
                    .header("X-API-Key", &self.config.api_key)
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
                    .post(self.sandbox_url(&backend_ref.id, "/resume"))
                    .header("X-API-Key", &self.config.api_key)
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
                    .delete(self.sandbox_url(&backend_ref.id, ""))
                    .header("X-API-Key", &self.config.api_key)
                    .send()
                    .await,
            )
            .await
            {
                // A sandbox that is already gone counts as destroyed.
                Ok(_) | Err(OrchestratorError::NotFound { .. }) => Ok(()),
                Err(err) => Err(err),
            }
        })
    }
}
