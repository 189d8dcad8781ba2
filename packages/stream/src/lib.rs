//! Agent invocation and event-stream normalization.
//!
//! Backends emit divergent event shapes over divergent framings. This crate
//! turns each of them into one ordered stream of [`NormalizedEvent`]s that
//! always terminates with exactly one `Done` or `Error`.

use std::future::Future;
use std::pin::Pin;

use futures::Stream;
use serde_json::Value;

use sandbox_orchestrator_error::OrchestratorError;

mod events;
mod invoke;
mod normalize;
pub mod testing;

pub use events::NormalizedEvent;
pub use invoke::{AgentInvoker, HttpAgentInvoker};
pub use normalize::{normalize, ActivityHook};

/// Lazy, finite, non-restartable sequence of raw backend events. Dropping the
/// stream cancels it and releases the underlying connection.
pub type RawEventStream =
    Pin<Box<dyn Stream<Item = Result<Value, OrchestratorError>> + Send>>;

pub type InvokeFuture<'a> =
    Pin<Box<dyn Future<Output = Result<RawEventStream, OrchestratorError>> + Send + 'a>>;
