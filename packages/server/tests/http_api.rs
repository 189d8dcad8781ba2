use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::util::ServiceExt;

use sandbox_orchestrator::router::{build_router, AppState};
use sandbox_orchestrator_backend::testing::MockBackend;
use sandbox_orchestrator_backend::{SandboxBackend, SandboxSpec};
use sandbox_orchestrator_error::OrchestratorError;
use sandbox_orchestrator_session::{OrchestratorConfig, SessionOrchestrator, SessionStatus};
use sandbox_orchestrator_stream::testing::ScriptedInvoker;

struct TestApp {
    app: Router,
    backend: Arc<MockBackend>,
}

fn test_app(invoker: ScriptedInvoker) -> TestApp {
    let backend = Arc::new(MockBackend::new());
    let orchestrator = SessionOrchestrator::new(
        backend.clone() as Arc<dyn SandboxBackend>,
        OrchestratorConfig {
            idle_to_pause: Duration::from_secs(60),
            to_destroy: Duration::from_secs(600),
            scan_interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(5),
        },
        SandboxSpec::default(),
    );
    let state = AppState::new(orchestrator, Arc::new(invoker));
    TestApp {
        app: build_router(state),
        backend,
    }
}

fn scripted_turn() -> ScriptedInvoker {
    ScriptedInvoker::new(vec![
        json!({"type": "text", "delta": "hello"}),
        json!({"type": "heartbeat"}),
        json!({"type": "tool_start", "name": "bash", "arguments": {"command": "ls"}}),
        json!({"type": "tool_end", "name": "bash", "output": "README.md"}),
        json!({"type": "done"}),
    ])
}

async fn send_request(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Option<String>, Vec<u8>) {
    let mut builder = Request::builder().method(method).uri(uri);
    let request = if let Some(body) = body {
        builder = builder.header(header::CONTENT_TYPE, "application/json");
        builder
            .body(Body::from(body.to_string()))
            .expect("build request")
    } else {
        builder.body(Body::empty()).expect("build request")
    };

    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("router response");
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("collect body")
        .to_bytes()
        .to_vec();
    (status, content_type, bytes)
}

fn chat_body() -> Value {
    json!({
        "user_id": "alice",
        "project_id": "proj-1",
        "message": "run ls",
    })
}

fn sse_events(body: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(body)
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .filter_map(|data| serde_json::from_str(data).ok())
        .collect()
}

#[tokio::test]
async fn chat_streams_normalized_events_in_order() {
    let test = test_app(scripted_turn());

    let (status, content_type, body) =
        send_request(&test.app, Method::POST, "/v1/chat", Some(chat_body())).await;
    assert_eq!(status, StatusCode::OK);
    assert!(content_type
        .as_deref()
        .unwrap_or_default()
        .starts_with("text/event-stream"));

    let events = sse_events(&body);
    assert_eq!(events.len(), 4);
    assert_eq!(events[0], json!({"type": "text_delta", "delta": "hello"}));
    assert_eq!(
        events[1],
        json!({"type": "tool_started", "name": "bash", "arguments": {"command": "ls"}})
    );
    assert_eq!(
        events[2],
        json!({"type": "tool_completed", "name": "bash", "result": "README.md"})
    );
    assert_eq!(events[3], json!({"type": "done"}));

    assert_eq!(test.backend.create_calls(), 1);
}

#[tokio::test]
async fn chat_reuses_the_session_across_turns() {
    let test = test_app(scripted_turn());

    send_request(&test.app, Method::POST, "/v1/chat", Some(chat_body())).await;
    send_request(&test.app, Method::POST, "/v1/chat", Some(chat_body())).await;

    assert_eq!(test.backend.create_calls(), 1);

    let (status, _, body) = send_request(&test.app, Method::GET, "/v1/sessions", None).await;
    assert_eq!(status, StatusCode::OK);
    let response: Value = serde_json::from_slice(&body).expect("sessions json");
    let sessions = response["sessions"].as_array().expect("sessions array");
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["status"], json!("active"));
    assert_eq!(sessions[0]["owner_key"]["user_id"], json!("alice"));
    assert!(sessions[0]["session_id"].as_str().is_some());
}

#[tokio::test]
async fn rejected_invocation_returns_problem_details() {
    let test = test_app(ScriptedInvoker::failing(
        OrchestratorError::InvocationRejected {
            message: "empty prompt".to_string(),
        },
    ));

    let (status, content_type, body) =
        send_request(&test.app, Method::POST, "/v1/chat", Some(chat_body())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(content_type.as_deref(), Some("application/problem+json"));
    let problem: Value = serde_json::from_slice(&body).expect("problem json");
    assert_eq!(
        problem["type"],
        json!("urn:sandbox-orchestrator:error:invocation_rejected")
    );
}

#[tokio::test]
async fn failed_creation_surfaces_backend_error() {
    let test = test_app(scripted_turn());
    test.backend.fail_next(
        "create",
        OrchestratorError::BackendRejected {
            operation: "create".to_string(),
            message: "quota exceeded".to_string(),
        },
    );

    let (status, content_type, _) =
        send_request(&test.app, Method::POST, "/v1/chat", Some(chat_body())).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(content_type.as_deref(), Some("application/problem+json"));
}

#[tokio::test]
async fn delete_session_is_idempotent_over_http() {
    let test = test_app(scripted_turn());
    send_request(&test.app, Method::POST, "/v1/chat", Some(chat_body())).await;

    let (_, _, body) = send_request(&test.app, Method::GET, "/v1/sessions", None).await;
    let response: Value = serde_json::from_slice(&body).expect("sessions json");
    let session_id = response["sessions"][0]["session_id"]
        .as_str()
        .expect("session id")
        .to_string();

    let uri = format!("/v1/sessions/{session_id}");
    let (status, _, _) = send_request(&test.app, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _, _) = send_request(&test.app, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    assert_eq!(test.backend.destroy_calls(), 1);
    let (_, _, body) = send_request(&test.app, Method::GET, "/v1/sessions", None).await;
    let response: Value = serde_json::from_slice(&body).expect("sessions json");
    assert_eq!(response["sessions"].as_array().expect("array").len(), 0);
}

#[tokio::test]
async fn cleanup_reports_zero_for_fresh_sessions() {
    let test = test_app(scripted_turn());
    send_request(&test.app, Method::POST, "/v1/chat", Some(chat_body())).await;

    let (status, _, body) =
        send_request(&test.app, Method::POST, "/v1/sessions/cleanup", None).await;
    assert_eq!(status, StatusCode::OK);
    let response: Value = serde_json::from_slice(&body).expect("cleanup json");
    assert_eq!(response, json!({"paused": 0, "destroyed": 0}));
    assert_eq!(test.backend.pause_calls(), 0);
}

#[tokio::test]
async fn rejected_turn_leaves_session_reusable() {
    let test = test_app(ScriptedInvoker::failing(
        OrchestratorError::InvocationRejected {
            message: "bad turn".to_string(),
        },
    ));

    send_request(&test.app, Method::POST, "/v1/chat", Some(chat_body())).await;

    let (_, _, body) = send_request(&test.app, Method::GET, "/v1/sessions", None).await;
    let response: Value = serde_json::from_slice(&body).expect("sessions json");
    let sessions = response["sessions"].as_array().expect("array");
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["status"], json!(SessionStatus::Active.as_str()));
}
