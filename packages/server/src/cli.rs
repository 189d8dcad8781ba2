use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderValue;
use clap::{Args, Parser, Subcommand};
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sandbox_orchestrator_backend::{
    BackendKind, CodeInterpreterBackend, CodeInterpreterConfig, SandboxBackend, SandboxSpec,
    WorkspaceBackend, WorkspaceConfig,
};
use sandbox_orchestrator_error::OrchestratorError;
use sandbox_orchestrator_session::{
    IdleReaper, OrchestratorConfig, SessionOrchestrator,
};
use sandbox_orchestrator_stream::HttpAgentInvoker;

use crate::router::{build_router, AppState};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 2470;
const BACKEND_API_KEY_ENV: &str = "SANDBOX_BACKEND_API_KEY";

#[derive(Parser, Debug)]
#[command(name = "sandbox-orchestrator", bin_name = "sandbox-orchestrator")]
#[command(about = "Session orchestration for agent sandboxes")]
#[command(arg_required_else_help = true)]
pub struct OrchestratorCli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the orchestrator HTTP server.
    Server(ServerArgs),
}

#[derive(Args, Debug)]
pub struct ServerArgs {
    #[arg(long, short = 'H', default_value = DEFAULT_HOST)]
    host: String,

    #[arg(long, short = 'p', default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Which sandbox provider serves sessions.
    #[arg(long, default_value = "workspace")]
    backend: String,

    /// Base URL of the provider API. Defaults to the provider's public
    /// endpoint.
    #[arg(long = "backend-api-url")]
    backend_api_url: Option<String>,

    /// Provider credential; falls back to SANDBOX_BACKEND_API_KEY.
    #[arg(long = "backend-api-key")]
    backend_api_key: Option<String>,

    /// Seconds without activity before an active session is paused.
    #[arg(long = "idle-to-pause-secs", default_value_t = 30 * 60)]
    idle_to_pause_secs: u64,

    /// Seconds without activity before a paused session is destroyed.
    #[arg(long = "to-destroy-secs", default_value_t = 2 * 60 * 60)]
    to_destroy_secs: u64,

    /// Seconds between reaper passes.
    #[arg(long = "scan-interval-secs", default_value_t = 60)]
    scan_interval_secs: u64,

    /// Bound on individual backend calls, in seconds.
    #[arg(long = "request-timeout-secs", default_value_t = 30)]
    request_timeout_secs: u64,

    #[arg(long = "cors-allow-origin", short = 'O')]
    cors_allow_origin: Vec<String>,
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("unknown backend: {0} (expected code-interpreter or workspace)")]
    UnknownBackend(String),
    #[error("missing backend api key (pass --backend-api-key or set {BACKEND_API_KEY_ENV})")]
    MissingApiKey,
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub fn run() -> Result<(), CliError> {
    let cli = OrchestratorCli::parse();
    match cli.command {
        Command::Server(args) => {
            init_tracing();
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(serve(args))
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_logfmt::layer())
        .init();
}

async fn serve(args: ServerArgs) -> Result<(), CliError> {
    let config = OrchestratorConfig {
        idle_to_pause: Duration::from_secs(args.idle_to_pause_secs),
        to_destroy: Duration::from_secs(args.to_destroy_secs),
        scan_interval: Duration::from_secs(args.scan_interval_secs),
        request_timeout: Duration::from_secs(args.request_timeout_secs),
    };

    let backend = build_backend(&args, &config)?;
    let backend_kind = backend.kind();
    let orchestrator = SessionOrchestrator::new(backend, config.clone(), sandbox_spec());
    let invoker = Arc::new(HttpAgentInvoker::new(config.request_timeout)?);

    let reaper = IdleReaper::new(orchestrator.clone()).spawn();

    let state = AppState::new(orchestrator, invoker);
    let mut router = build_router(state);
    if !args.cors_allow_origin.is_empty() {
        let cors = if args.cors_allow_origin.iter().any(|origin| origin == "*") {
            CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
        } else {
            let origins = args
                .cors_allow_origin
                .iter()
                .filter_map(|origin| origin.parse::<HeaderValue>().ok())
                .collect::<Vec<_>>();
            CorsLayer::new().allow_origin(origins).allow_methods(Any).allow_headers(Any)
        };
        router = router.layer(cors);
    }

    let address = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(%address, backend = backend_kind.as_str(), "sandbox orchestrator listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    reaper.stop();
    Ok(())
}

fn build_backend(
    args: &ServerArgs,
    config: &OrchestratorConfig,
) -> Result<Arc<dyn SandboxBackend>, CliError> {
    let kind = BackendKind::parse(&args.backend)
        .ok_or_else(|| CliError::UnknownBackend(args.backend.clone()))?;
    let api_key = args
        .backend_api_key
        .clone()
        .or_else(|| env::var(BACKEND_API_KEY_ENV).ok())
        .ok_or(CliError::MissingApiKey)?;

    match kind {
        BackendKind::CodeInterpreter => {
            let mut backend_config = CodeInterpreterConfig {
                api_key,
                request_timeout: config.request_timeout,
                ..CodeInterpreterConfig::default()
            };
            if let Some(api_url) = args.backend_api_url.clone() {
                backend_config.api_url = api_url;
            }
            Ok(Arc::new(CodeInterpreterBackend::new(backend_config)?))
        }
        BackendKind::Workspace => {
            let mut backend_config = WorkspaceConfig {
                api_token: api_key,
                request_timeout: config.request_timeout,
                ..WorkspaceConfig::default()
            };
            if let Some(api_url) = args.backend_api_url.clone() {
                backend_config.api_url = api_url;
            }
            Ok(Arc::new(WorkspaceBackend::new(backend_config)?))
        }
    }
}

/// Credentials forwarded into every sandbox so the hosted agent can reach its
/// model provider.
fn sandbox_spec() -> SandboxSpec {
    let mut env_vars = HashMap::new();
    for key in ["OPENROUTER_API_KEY", "ANTHROPIC_API_KEY"] {
        if let Ok(value) = env::var(key) {
            env_vars.insert(key.to_string(), value);
        }
    }
    SandboxSpec { env: env_vars }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to install ctrl-c handler");
    }
}
