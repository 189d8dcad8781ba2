use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::{stream, StreamExt};
use serde_json::{json, Value};

use sandbox_orchestrator_stream::{normalize, NormalizedEvent, RawEventStream};

fn raw_stream(events: Vec<Value>) -> RawEventStream {
    Box::pin(stream::iter(events.into_iter().map(Ok)))
}

async fn collect(raw: RawEventStream) -> Vec<NormalizedEvent> {
    normalize(raw, Arc::new(|| {})).collect().await
}

#[tokio::test]
async fn preserves_backend_emission_order() {
    let events = collect(raw_stream(vec![
        json!({"type": "text", "part": {"text": "a"}}),
        json!({"type": "text", "part": {"text": "b"}}),
        json!({"type": "tool_start", "name": "x"}),
        json!({"type": "tool_end", "name": "x", "output": "ok"}),
        json!({"type": "done"}),
    ]))
    .await;

    assert_eq!(
        events,
        vec![
            NormalizedEvent::TextDelta {
                delta: "a".to_string()
            },
            NormalizedEvent::TextDelta {
                delta: "b".to_string()
            },
            NormalizedEvent::ToolStarted {
                name: "x".to_string(),
                arguments: None,
            },
            NormalizedEvent::ToolCompleted {
                name: "x".to_string(),
                result: Some(json!("ok")),
            },
            NormalizedEvent::Done,
        ]
    );
}

#[tokio::test]
async fn unknown_events_are_dropped_without_error() {
    let events = collect(raw_stream(vec![
        json!({"type": "text", "delta": "a"}),
        json!({"type": "heartbeat"}),
        Value::String("npm WARN deprecated".to_string()),
        json!({"type": "text", "delta": "b"}),
        json!({"type": "done"}),
    ]))
    .await;

    assert_eq!(
        events,
        vec![
            NormalizedEvent::TextDelta {
                delta: "a".to_string()
            },
            NormalizedEvent::TextDelta {
                delta: "b".to_string()
            },
            NormalizedEvent::Done,
        ]
    );
}

#[tokio::test]
async fn error_event_terminates_the_stream() {
    let events = collect(raw_stream(vec![
        json!({"type": "text", "delta": "partial"}),
        json!({"type": "error", "message": "agent crashed", "code": "crash"}),
        json!({"type": "text", "delta": "never delivered"}),
        json!({"type": "done"}),
    ]))
    .await;

    assert_eq!(
        events,
        vec![
            NormalizedEvent::TextDelta {
                delta: "partial".to_string()
            },
            NormalizedEvent::Error {
                message: "agent crashed".to_string(),
                code: Some("crash".to_string()),
            },
        ]
    );
}

#[tokio::test]
async fn nothing_follows_done() {
    let events = collect(raw_stream(vec![
        json!({"type": "done"}),
        json!({"type": "text", "delta": "late"}),
    ]))
    .await;

    assert_eq!(events, vec![NormalizedEvent::Done]);
}

#[tokio::test]
async fn raw_end_of_stream_synthesizes_done() {
    let events = collect(raw_stream(vec![json!({"type": "text", "delta": "a"})])).await;
    assert_eq!(
        events,
        vec![
            NormalizedEvent::TextDelta {
                delta: "a".to_string()
            },
            NormalizedEvent::Done,
        ]
    );
}

#[tokio::test]
async fn transport_error_surfaces_as_terminal_error() {
    let raw: RawEventStream = Box::pin(stream::iter(vec![
        Ok(json!({"type": "text", "delta": "a"})),
        Err(
            sandbox_orchestrator_error::OrchestratorError::StreamError {
                message: "connection reset".to_string(),
            },
        ),
        Ok(json!({"type": "text", "delta": "b"})),
    ]));
    let events = collect(raw).await;

    assert_eq!(events.len(), 2);
    assert_eq!(
        events[0],
        NormalizedEvent::TextDelta {
            delta: "a".to_string()
        }
    );
    assert!(matches!(events[1], NormalizedEvent::Error { .. }));
}

#[tokio::test]
async fn each_normalized_event_reports_activity() {
    let touches = Arc::new(AtomicUsize::new(0));
    let hook = {
        let touches = touches.clone();
        Arc::new(move || {
            touches.fetch_add(1, Ordering::SeqCst);
        })
    };

    let events: Vec<_> = normalize(
        raw_stream(vec![
            json!({"type": "text", "delta": "a"}),
            json!({"type": "heartbeat"}),
            json!({"type": "text", "delta": "b"}),
            json!({"type": "done"}),
        ]),
        hook,
    )
    .collect()
    .await;

    assert_eq!(events.len(), 3);
    // The dropped heartbeat does not count as activity.
    assert_eq!(touches.load(Ordering::SeqCst), 3);
}
