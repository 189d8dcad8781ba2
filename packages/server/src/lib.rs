//! Sandbox orchestrator server.

pub mod cli;
pub mod router;
