use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::{stream, Stream, StreamExt};
use serde_json::{json, Value};
use tracing::debug;

use sandbox_orchestrator_error::OrchestratorError;
use sandbox_orchestrator_session::SandboxSession;

use crate::{InvokeFuture, RawEventStream};

/// Sends a user turn to the sandbox-hosted agent and hands back the raw event
/// stream. Returns as soon as the remote call is accepted; it never blocks on
/// turn completion. Transport failures are not retried here; retry policy
/// belongs to the caller.
pub trait AgentInvoker: Send + Sync + 'static {
    fn invoke<'a>(&'a self, session: &'a SandboxSession, turn_text: &'a str) -> InvokeFuture<'a>;
}

pub struct HttpAgentInvoker {
    http: reqwest::Client,
}

impl HttpAgentInvoker {
    pub fn new(request_timeout: Duration) -> Result<Self, OrchestratorError> {
        // Only connection setup is bounded; the response body is a long-lived
        // stream and must not be cut off by a whole-request timeout.
        let http = reqwest::Client::builder()
            .connect_timeout(request_timeout)
            .build()
            .map_err(|err| OrchestratorError::BackendUnreachable {
                operation: "client_init".to_string(),
                message: err.to_string(),
            })?;
        Ok(Self { http })
    }
}

impl AgentInvoker for HttpAgentInvoker {
    fn invoke<'a>(&'a self, session: &'a SandboxSession, turn_text: &'a str) -> InvokeFuture<'a> {
        Box::pin(async move {
            if !session.status.reusable() {
                return Err(OrchestratorError::SessionNotReady {
                    session_id: session.session_id.clone(),
                    status: session.status.as_str().to_string(),
                });
            }
            let backend_ref = session.backend_ref.as_ref().ok_or_else(|| {
                OrchestratorError::SessionNotReady {
                    session_id: session.session_id.clone(),
                    status: session.status.as_str().to_string(),
                }
            })?;

            let response = self
                .http
                .post(format!("{}/v1/turns", backend_ref.agent_url))
                .json(&json!({ "text": turn_text }))
                .send()
                .await
                .map_err(|err| OrchestratorError::BackendUnreachable {
                    operation: "invoke".to_string(),
                    message: err.to_string(),
                })?;

            let status = response.status();
            if status.is_client_error() {
                let body = response.text().await.unwrap_or_default();
                return Err(OrchestratorError::InvocationRejected {
                    message: format!("{status}: {body}"),
                });
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(OrchestratorError::BackendUnreachable {
                    operation: "invoke".to_string(),
                    message: format!("{status}: {body}"),
                });
            }

            debug!(session_id = %session.session_id, "agent turn accepted");
            Ok(ndjson_stream(Box::pin(response.bytes_stream())))
        })
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

struct LineState {
    inner: ByteStream,
    buffer: BytesMut,
    pending: VecDeque<Value>,
    done: bool,
}

/// Split a streaming body into line-delimited raw events. Lines that are not
/// JSON are passed through as strings; the normalizer drops them.
///
/// Raw bytes stay buffered until a full line arrives; a multibyte character
/// split across network chunks must decode intact.
fn ndjson_stream(inner: ByteStream) -> RawEventStream {
    let state = LineState {
        inner,
        buffer: BytesMut::new(),
        pending: VecDeque::new(),
        done: false,
    };
    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(value) = state.pending.pop_front() {
                return Some((Ok(value), state));
            }
            if state.done {
                return None;
            }
            match state.inner.next().await {
                None => {
                    state.done = true;
                    let tail = state.buffer.split();
                    let tail = String::from_utf8_lossy(&tail);
                    let tail = tail.trim();
                    if !tail.is_empty() {
                        state.pending.push_back(parse_line(tail));
                    }
                }
                Some(Err(err)) => {
                    state.done = true;
                    let error = OrchestratorError::StreamError {
                        message: err.to_string(),
                    };
                    return Some((Err(error), state));
                }
                Some(Ok(chunk)) => {
                    state.buffer.extend_from_slice(&chunk);
                    while let Some(newline) = state.buffer.iter().position(|&b| b == b'\n') {
                        let raw_line = state.buffer.split_to(newline + 1);
                        let line = String::from_utf8_lossy(&raw_line[..newline]);
                        let line = line.trim();
                        if !line.is_empty() {
                            state.pending.push_back(parse_line(line));
                        }
                    }
                }
            }
        }
    }))
}

fn parse_line(line: &str) -> Value {
    serde_json::from_str(line).unwrap_or_else(|_| Value::String(line.to_string()))
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use serde_json::json;

    use super::*;

    fn byte_stream(chunks: Vec<&'static [u8]>) -> ByteStream {
        Box::pin(stream::iter(
            chunks.into_iter().map(|chunk| Ok(Bytes::from_static(chunk))),
        ))
    }

    async fn collect_values(chunks: Vec<&'static [u8]>) -> Vec<Value> {
        ndjson_stream(byte_stream(chunks))
            .map(|item| item.expect("raw event"))
            .collect()
            .await
    }

    #[tokio::test]
    async fn multibyte_character_split_across_chunks_decodes_intact() {
        // "héllo": the é (0xC3 0xA9) is cut between the two chunks.
        let values = collect_values(vec![
            b"{\"type\":\"text\",\"delta\":\"h\xc3",
            b"\xa9llo\"}\n",
        ])
        .await;
        assert_eq!(values, vec![json!({"type": "text", "delta": "h\u{e9}llo"})]);
    }

    #[tokio::test]
    async fn lines_split_across_chunks_reassemble() {
        let values = collect_values(vec![
            b"{\"type\":\"text\",",
            b"\"delta\":\"a\"}\n{\"type\":\"done\"}\n",
        ])
        .await;
        assert_eq!(
            values,
            vec![
                json!({"type": "text", "delta": "a"}),
                json!({"type": "done"}),
            ]
        );
    }

    #[tokio::test]
    async fn unterminated_tail_line_is_still_emitted() {
        let values = collect_values(vec![b"{\"type\":\"done\"}"]).await;
        assert_eq!(values, vec![json!({"type": "done"})]);
    }

    #[tokio::test]
    async fn non_json_lines_pass_through_as_strings() {
        let values = collect_values(vec![b"npm WARN deprecated\n{\"type\":\"done\"}\n"]).await;
        assert_eq!(
            values,
            vec![
                Value::String("npm WARN deprecated".to_string()),
                json!({"type": "done"}),
            ]
        );
    }
}
