//! In-memory backend double for orchestrator and API tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use sandbox_orchestrator_error::OrchestratorError;

use crate::{
    BackendFuture, BackendKind, BackendRef, CommandOutput, SandboxBackend, SandboxSpec,
};

/// Backend that provisions nothing and records every adapter call, so tests
/// can assert exact call counts and script failures per operation.
#[derive(Debug, Default)]
pub struct MockBackend {
    next_id: AtomicU64,
    create_calls: AtomicU64,
    pause_calls: AtomicU64,
    resume_calls: AtomicU64,
    destroy_calls: AtomicU64,
    live: Mutex<HashSet<String>>,
    failures: Mutex<HashMap<String, OrchestratorError>>,
    create_delay: Mutex<Option<Duration>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arrange for the next call to `operation` to fail with `error`.
    pub fn fail_next(&self, operation: &str, error: OrchestratorError) {
        self.failures
            .lock()
            .expect("failures lock")
            .insert(operation.to_string(), error);
    }

    /// Hold `create` open for `delay`, widening race windows in concurrency
    /// tests.
    pub fn set_create_delay(&self, delay: Duration) {
        *self.create_delay.lock().expect("delay lock") = Some(delay);
    }

    pub fn create_calls(&self) -> u64 {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn pause_calls(&self) -> u64 {
        self.pause_calls.load(Ordering::SeqCst)
    }

    pub fn resume_calls(&self) -> u64 {
        self.resume_calls.load(Ordering::SeqCst)
    }

    pub fn destroy_calls(&self) -> u64 {
        self.destroy_calls.load(Ordering::SeqCst)
    }

    pub fn is_live(&self, id: &str) -> bool {
        self.live.lock().expect("live lock").contains(id)
    }

    fn take_failure(&self, operation: &str) -> Option<OrchestratorError> {
        self.failures
            .lock()
            .expect("failures lock")
            .remove(operation)
    }
}

impl SandboxBackend for MockBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::CodeInterpreter
    }

    fn create<'a>(
        &'a self,
        _owner_key: &'a str,
        _spec: &'a SandboxSpec,
    ) -> BackendFuture<'a, BackendRef> {
        Box::pin(async move {
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            let delay = *self.create_delay.lock().expect("delay lock");
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(err) = self.take_failure("create") {
                return Err(err);
            }
            let id = format!("mock-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
            self.live.lock().expect("live lock").insert(id.clone());
            Ok(BackendRef {
                agent_url: format!("http://mock.invalid/{id}"),
                id,
            })
        })
    }

    fn run_command<'a>(
        &'a self,
        backend_ref: &'a BackendRef,
        command: &'a str,
    ) -> BackendFuture<'a, CommandOutput> {
        Box::pin(async move {
            if let Some(err) = self.take_failure("run_command") {
                return Err(err);
            }
            if !self.is_live(&backend_ref.id) {
                return Err(OrchestratorError::BackendUnreachable {
                    operation: "run_command".to_string(),
                    message: format!("sandbox {} was reclaimed", backend_ref.id),
                });
            }
            Ok(CommandOutput {
                stdout: command.to_string(),
                stderr: String::new(),
                exit_code: 0,
            })
        })
    }

    fn read_file<'a>(
        &'a self,
        _backend_ref: &'a BackendRef,
        path: &'a str,
    ) -> BackendFuture<'a, String> {
        Box::pin(async move {
            if let Some(err) = self.take_failure("read_file") {
                return Err(err);
            }
            Err(OrchestratorError::NotFound {
                path: path.to_string(),
            })
        })
    }

    fn write_file<'a>(
        &'a self,
        _backend_ref: &'a BackendRef,
        _path: &'a str,
        _contents: &'a str,
    ) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            if let Some(err) = self.take_failure("write_file") {
                return Err(err);
            }
            Ok(())
        })
    }

    fn list_files<'a>(
        &'a self,
        _backend_ref: &'a BackendRef,
        _path: &'a str,
    ) -> BackendFuture<'a, Vec<String>> {
        Box::pin(async move {
            if let Some(err) = self.take_failure("list_files") {
                return Err(err);
            }
            Ok(Vec::new())
        })
    }

    fn pause<'a>(&'a self, _backend_ref: &'a BackendRef) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.pause_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.take_failure("pause") {
                return Err(err);
            }
            Ok(())
        })
    }

    fn resume<'a>(&'a self, _backend_ref: &'a BackendRef) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.resume_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.take_failure("resume") {
                return Err(err);
            }
            Ok(())
        })
    }

    fn destroy<'a>(&'a self, backend_ref: &'a BackendRef) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.destroy_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.take_failure("destroy") {
                return Err(err);
            }
            // Destroy is idempotent; removing an absent id is fine.
            self.live.lock().expect("live lock").remove(&backend_ref.id);
            Ok(())
        })
    }
}
