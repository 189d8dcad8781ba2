use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

use sandbox_orchestrator_error::OrchestratorError;
use sandbox_orchestrator_session::{
    IdleReaper, OwnerKey, SandboxSession, SessionOrchestrator,
};
use sandbox_orchestrator_stream::{normalize, ActivityHook, AgentInvoker};

#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<SessionOrchestrator>,
    invoker: Arc<dyn AgentInvoker>,
}

impl AppState {
    pub fn new(orchestrator: Arc<SessionOrchestrator>, invoker: Arc<dyn AgentInvoker>) -> Self {
        Self {
            orchestrator,
            invoker,
        }
    }

    pub fn orchestrator(&self) -> &Arc<SessionOrchestrator> {
        &self.orchestrator
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/chat", post(chat))
        .route("/v1/sessions", get(list_sessions))
        .route("/v1/sessions/cleanup", post(cleanup_sessions))
        .route("/v1/sessions/:session_id", delete(delete_session))
        .with_state(state)
}

#[derive(Debug, Deserialize, JsonSchema, ToSchema)]
pub struct ChatRequest {
    pub user_id: String,
    pub project_id: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema, ToSchema)]
pub struct SessionListResponse {
    pub sessions: Vec<SandboxSession>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema, ToSchema)]
pub struct CleanupResponse {
    pub paused: usize,
    pub destroyed: usize,
}

pub struct ApiError(OrchestratorError);

impl From<OrchestratorError> for ApiError {
    fn from(value: OrchestratorError) -> Self {
        Self(value)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let problem = self.0.to_problem_details();
        let status =
            StatusCode::from_u16(problem.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (
            status,
            [(header::CONTENT_TYPE, "application/problem+json")],
            Json(problem),
        )
            .into_response()
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// Resolve the caller's session, forward the turn to the sandbox-hosted
/// agent, and relay the normalized event stream over SSE. Client disconnects
/// drop the stream, which cancels the agent connection; the session itself
/// stays live for reuse.
async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let owner_key = OwnerKey::new(request.user_id, request.project_id);
    let session = state.orchestrator.get_or_create(&owner_key).await?;
    let raw = state.invoker.invoke(&session, &request.message).await?;

    let on_event: ActivityHook = {
        let orchestrator = state.orchestrator.clone();
        let owner_key = owner_key.clone();
        Arc::new(move || orchestrator.touch(&owner_key))
    };

    let events = normalize(raw, on_event).map(|event| {
        let payload = serde_json::to_string(&event).unwrap_or_default();
        Ok(Event::default().data(payload))
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn list_sessions(State(state): State<AppState>) -> Json<SessionListResponse> {
    Json(SessionListResponse {
        sessions: state.orchestrator.snapshot(),
    })
}

async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.orchestrator.destroy_session(&session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// One on-demand reaper pass, for external cleanup/ops processes. The
/// periodic loop runs independently.
async fn cleanup_sessions(State(state): State<AppState>) -> Json<CleanupResponse> {
    let stats = IdleReaper::new(state.orchestrator.clone())
        .run_once(now_ms())
        .await;
    Json(CleanupResponse {
        paused: stats.paused,
        destroyed: stats.destroyed,
    })
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
