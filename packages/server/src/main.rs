fn main() {
    if let Err(err) = sandbox_orchestrator::cli::run() {
        tracing::error!(error = %err, "sandbox-orchestrator failed");
        std::process::exit(1);
    }
}
