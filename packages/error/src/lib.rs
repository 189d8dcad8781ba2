use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    BackendUnreachable,
    BackendRejected,
    SessionNotReady,
    SessionNotFound,
    NotFound,
    InvocationRejected,
    ConcurrentCreationInProgress,
    StreamError,
    /// Bounded adapter call expired. A narrower signal than
    /// `BackendUnreachable`, and equally retryable.
    Timeout,
}

impl ErrorType {
    pub fn as_urn(&self) -> &'static str {
        match self {
            Self::BackendUnreachable => "urn:sandbox-orchestrator:error:backend_unreachable",
            Self::BackendRejected => "urn:sandbox-orchestrator:error:backend_rejected",
            Self::SessionNotReady => "urn:sandbox-orchestrator:error:session_not_ready",
            Self::SessionNotFound => "urn:sandbox-orchestrator:error:session_not_found",
            Self::NotFound => "urn:sandbox-orchestrator:error:not_found",
            Self::InvocationRejected => "urn:sandbox-orchestrator:error:invocation_rejected",
            Self::ConcurrentCreationInProgress => {
                "urn:sandbox-orchestrator:error:concurrent_creation_in_progress"
            }
            Self::StreamError => "urn:sandbox-orchestrator:error:stream_error",
            Self::Timeout => "urn:sandbox-orchestrator:error:timeout",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::BackendUnreachable => "Backend Unreachable",
            Self::BackendRejected => "Backend Rejected",
            Self::SessionNotReady => "Session Not Ready",
            Self::SessionNotFound => "Session Not Found",
            Self::NotFound => "Not Found",
            Self::InvocationRejected => "Invocation Rejected",
            Self::ConcurrentCreationInProgress => "Concurrent Creation In Progress",
            Self::StreamError => "Stream Error",
            Self::Timeout => "Timeout",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::BackendUnreachable => 502,
            Self::BackendRejected => 422,
            Self::SessionNotReady => 409,
            Self::SessionNotFound => 404,
            Self::NotFound => 404,
            Self::InvocationRejected => 400,
            Self::ConcurrentCreationInProgress => 409,
            Self::StreamError => 502,
            Self::Timeout => 504,
        }
    }

    /// Whether the caller may retry the same request with backoff.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::BackendUnreachable | Self::ConcurrentCreationInProgress | Self::Timeout
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToSchema)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub type_: String,
    pub title: String,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    #[serde(flatten, default, skip_serializing_if = "Map::is_empty")]
    pub extensions: Map<String, Value>,
}

impl ProblemDetails {
    pub fn new(error_type: ErrorType, detail: Option<String>) -> Self {
        Self {
            type_: error_type.as_urn().to_string(),
            title: error_type.title().to_string(),
            status: error_type.status_code(),
            detail,
            instance: None,
            extensions: Map::new(),
        }
    }
}

/// Errors surfaced by the orchestrator, the backend adapters, and the
/// invocation client. Every variant carries enough context to diagnose the
/// failure without reproducing it (owner key, session id, operation name).
#[derive(Debug, Clone, Error)]
pub enum OrchestratorError {
    #[error("backend unreachable during {operation}: {message}")]
    BackendUnreachable { operation: String, message: String },
    #[error("backend rejected {operation}: {message}")]
    BackendRejected { operation: String, message: String },
    #[error("session not ready: {session_id} is {status}")]
    SessionNotReady { session_id: String, status: String },
    #[error("session not found: {session_id}")]
    SessionNotFound { session_id: String },
    #[error("not found: {path}")]
    NotFound { path: String },
    #[error("invocation rejected: {message}")]
    InvocationRejected { message: String },
    #[error("creation already in flight for {owner_key}")]
    ConcurrentCreationInProgress { owner_key: String },
    #[error("stream error: {message}")]
    StreamError { message: String },
    #[error("timeout during {operation}")]
    Timeout { operation: String },
}

impl OrchestratorError {
    pub fn error_type(&self) -> ErrorType {
        match self {
            Self::BackendUnreachable { .. } => ErrorType::BackendUnreachable,
            Self::BackendRejected { .. } => ErrorType::BackendRejected,
            Self::SessionNotReady { .. } => ErrorType::SessionNotReady,
            Self::SessionNotFound { .. } => ErrorType::SessionNotFound,
            Self::NotFound { .. } => ErrorType::NotFound,
            Self::InvocationRejected { .. } => ErrorType::InvocationRejected,
            Self::ConcurrentCreationInProgress { .. } => ErrorType::ConcurrentCreationInProgress,
            Self::StreamError { .. } => ErrorType::StreamError,
            Self::Timeout { .. } => ErrorType::Timeout,
        }
    }

    pub fn to_problem_details(&self) -> ProblemDetails {
        let mut problem = ProblemDetails::new(self.error_type(), Some(self.to_string()));

        let mut extensions = Map::new();
        match self {
            Self::BackendUnreachable { operation, .. }
            | Self::BackendRejected { operation, .. }
            | Self::Timeout { operation } => {
                extensions.insert("operation".to_string(), Value::String(operation.clone()));
            }
            Self::SessionNotReady { session_id, .. } | Self::SessionNotFound { session_id } => {
                extensions.insert("sessionId".to_string(), Value::String(session_id.clone()));
            }
            Self::ConcurrentCreationInProgress { owner_key } => {
                extensions.insert("ownerKey".to_string(), Value::String(owner_key.clone()));
            }
            Self::NotFound { path } => {
                extensions.insert("path".to_string(), Value::String(path.clone()));
            }
            Self::InvocationRejected { .. } | Self::StreamError { .. } => {}
        }
        problem.extensions = extensions;
        problem
    }
}

impl From<OrchestratorError> for ProblemDetails {
    fn from(value: OrchestratorError) -> Self {
        value.to_problem_details()
    }
}

impl From<&OrchestratorError> for ProblemDetails {
    fn from(value: &OrchestratorError) -> Self {
        value.to_problem_details()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn problem_details_carry_operation_context() {
        let err = OrchestratorError::BackendUnreachable {
            operation: "create".to_string(),
            message: "connection refused".to_string(),
        };
        let problem = err.to_problem_details();
        assert_eq!(problem.status, 502);
        assert_eq!(
            problem.type_,
            "urn:sandbox-orchestrator:error:backend_unreachable"
        );
        assert_eq!(
            problem.extensions.get("operation"),
            Some(&Value::String("create".to_string()))
        );
    }

    #[test]
    fn transient_errors_are_retryable() {
        assert!(ErrorType::BackendUnreachable.retryable());
        assert!(ErrorType::ConcurrentCreationInProgress.retryable());
        assert!(!ErrorType::BackendRejected.retryable());
        assert!(!ErrorType::InvocationRejected.retryable());
    }
}
