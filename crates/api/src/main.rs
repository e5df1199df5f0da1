//! Assistant Authentication Service - Main Entry Point
//!
//! Usage: `assistant-auth [CONFIG.toml]`. Environment variables prefixed
//! `ASSISTANT_AUTH__` override the file.

use anyhow::Context;
use api::{init_logging, run_server, ServerConfig};
use metrics_exporter_prometheus::PrometheusBuilder;
use orchestrator::{telemetry, AuthConfig, AuthOrchestrator, Backends};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let server = ServerConfig::load(config_path.as_deref())?;
    init_logging(server.json_logs).map_err(|e| anyhow::anyhow!(e))?;

    info!("=== Assistant Auth v{} ===", env!("CARGO_PKG_VERSION"));

    let config = AuthConfig::load(config_path.as_deref()).context("loading auth configuration")?;
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data directory {}", config.data_dir.display()))?;

    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("installing metrics recorder")?;
    telemetry::describe();

    // Device and model backends are supplied by the embedding assistant;
    // standalone, the service answers session and token requests only.
    let orchestrator = Arc::new(AuthOrchestrator::from_config(&config, Backends::default()));
    if !orchestrator.strong_signing_active() {
        warn!("No token secret configured; issued tokens are unsigned");
    }

    run_server(&server, orchestrator, Some(metrics)).await
}
