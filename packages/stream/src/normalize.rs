use std::sync::Arc;

use futures::{stream, Stream, StreamExt};
use serde_json::Value;
use tracing::trace;

use crate::events::NormalizedEvent;
use crate::RawEventStream;

/// Called once per successfully normalized event, so the owning session's
/// activity timestamp keeps moving while a long turn streams.
pub type ActivityHook = Arc<dyn Fn() + Send + Sync>;

struct NormalizeState {
    raw: RawEventStream,
    on_event: ActivityHook,
    finished: bool,
}

/// Re-emit a heterogeneous raw event stream as ordered [`NormalizedEvent`]s.
///
/// Classification never reorders, only re-tags: each raw delta becomes
/// exactly one `TextDelta`, unknown or unparseable raw events are dropped
/// (backends emit heartbeat and log lines the protocol does not need), and
/// the output always ends with exactly one terminal event. A raw error, a
/// transport error, or raw end-of-stream all terminate; nothing is emitted
/// after the terminal event. Dropping the returned stream cancels the
/// underlying connection.
pub fn normalize(
    raw: RawEventStream,
    on_event: ActivityHook,
) -> impl Stream<Item = NormalizedEvent> + Send {
    let state = NormalizeState {
        raw,
        on_event,
        finished: false,
    };
    stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }
        loop {
            match state.raw.next().await {
                // Backend closed the stream without a completion signal;
                // the caller still gets its terminal event.
                None => {
                    state.finished = true;
                    (state.on_event)();
                    return Some((NormalizedEvent::Done, state));
                }
                Some(Err(err)) => {
                    state.finished = true;
                    let event = NormalizedEvent::Error {
                        message: err.to_string(),
                        code: Some(err.error_type().as_urn().to_string()),
                    };
                    return Some((event, state));
                }
                Some(Ok(value)) => match classify(&value) {
                    Some(event) => {
                        (state.on_event)();
                        if event.is_terminal() {
                            state.finished = true;
                        }
                        return Some((event, state));
                    }
                    None => {
                        trace!(?value, "dropping unrecognized raw event");
                        continue;
                    }
                },
            }
        }
    })
}

/// Map one raw backend event to the normalized protocol. Returns `None` for
/// anything that does not carry a recognized discriminant or payload.
pub fn classify(raw: &Value) -> Option<NormalizedEvent> {
    let discriminant = raw.get("type").and_then(Value::as_str)?;
    match discriminant {
        "text" | "delta" | "item.delta" => {
            let delta = raw
                .get("delta")
                .and_then(Value::as_str)
                .or_else(|| raw.pointer("/part/text").and_then(Value::as_str))
                .or_else(|| raw.get("text").and_then(Value::as_str))?;
            Some(NormalizedEvent::TextDelta {
                delta: delta.to_string(),
            })
        }
        "tool_start" | "tool.started" | "tool_use" => Some(NormalizedEvent::ToolStarted {
            name: tool_name(raw)?,
            arguments: raw
                .get("arguments")
                .or_else(|| raw.get("input"))
                .cloned(),
        }),
        "tool_end" | "tool.completed" | "tool_result" => Some(NormalizedEvent::ToolCompleted {
            name: tool_name(raw)?,
            result: raw.get("result").or_else(|| raw.get("output")).cloned(),
        }),
        "error" => {
            let message = raw
                .get("message")
                .and_then(Value::as_str)
                .or_else(|| raw.pointer("/error/message").and_then(Value::as_str))
                .unwrap_or("backend error")
                .to_string();
            Some(NormalizedEvent::Error {
                message,
                code: raw.get("code").and_then(Value::as_str).map(str::to_string),
            })
        }
        "done" | "finish" | "turn.ended" | "session.idle" => Some(NormalizedEvent::Done),
        _ => None,
    }
}

fn tool_name(raw: &Value) -> Option<String> {
    raw.get("name")
        .and_then(Value::as_str)
        .or_else(|| raw.pointer("/tool/name").and_then(Value::as_str))
        .map(str::to_string)
}
