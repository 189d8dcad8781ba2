//! Scripted invoker for router and normalizer tests.

use std::sync::Mutex;

use futures::stream;
use serde_json::Value;

use sandbox_orchestrator_error::OrchestratorError;
use sandbox_orchestrator_session::SandboxSession;

use crate::{AgentInvoker, InvokeFuture, RawEventStream};

/// Yields a pre-scripted raw event sequence per invocation, or a scripted
/// rejection, without touching the network.
#[derive(Default)]
pub struct ScriptedInvoker {
    events: Mutex<Vec<Value>>,
    failure: Mutex<Option<OrchestratorError>>,
}

impl ScriptedInvoker {
    pub fn new(events: Vec<Value>) -> Self {
        Self {
            events: Mutex::new(events),
            failure: Mutex::new(None),
        }
    }

    pub fn failing(error: OrchestratorError) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            failure: Mutex::new(Some(error)),
        }
    }
}

impl AgentInvoker for ScriptedInvoker {
    fn invoke<'a>(&'a self, session: &'a SandboxSession, _turn_text: &'a str) -> InvokeFuture<'a> {
        Box::pin(async move {
            if !session.status.reusable() {
                return Err(OrchestratorError::SessionNotReady {
                    session_id: session.session_id.clone(),
                    status: session.status.as_str().to_string(),
                });
            }
            if let Some(err) = self.failure.lock().expect("failure lock").take() {
                return Err(err);
            }
            let events = self.events.lock().expect("events lock").clone();
            let raw: RawEventStream = Box::pin(stream::iter(events.into_iter().map(Ok)));
            Ok(raw)
        })
    }
}
