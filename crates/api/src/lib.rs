//! Assistant Authentication API Server
//!
//! HTTP surface for collaborators that act on behalf of the user (IoT hubs,
//! chat bridges): authentication, bearer tokens, and per-command
//! authorization.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use config::{Config, Environment, File};
use metrics_exporter_prometheus::PrometheusHandle;
use orchestrator::{AuthOrchestrator, ENV_PREFIX};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tower_governor::GovernorLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod error;
pub mod rate_limit;
mod routes;

pub use error::ApiError;
pub use rate_limit::RateLimitConfig;

/// Server settings, read from the `[server]` table of the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub bind: String,
    /// Emit logs as JSON lines
    pub json_logs: bool,
    /// Limits for the authentication and token endpoints
    pub rate_limit: RateLimitConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            json_logs: false,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct Settings {
    #[serde(default)]
    server: ServerConfig,
}

impl ServerConfig {
    /// Load from the same file and environment as the auth configuration
    pub fn load(path: Option<&Path>) -> Result<Self, ApiError> {
        Self::load_from(path, None)
    }

    pub fn load_from(
        path: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ApiError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .source(env),
        );

        let settings: Settings = builder
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|e| ApiError::Config(e.to_string()))?;
        Ok(settings.server)
    }
}

/// Application state shared across handlers
pub struct AppState {
    pub orchestrator: Arc<AuthOrchestrator>,
    /// Prometheus recorder handle; `/metrics` is 404 without one
    pub metrics: Option<PrometheusHandle>,
    pub version: String,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(orchestrator: Arc<AuthOrchestrator>, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            orchestrator,
            metrics,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: std::time::Instant::now(),
        }
    }
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    /// False when tokens are issued unsigned
    pub strong_signing: bool,
    pub components: ComponentStatus,
}

/// Availability of each backend and device
#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub face: bool,
    pub voice: bool,
    pub liveness: bool,
    pub camera: bool,
    pub microphone: bool,
}

/// Create the application router.
///
/// `limits` puts a per-IP rate limit on the authentication and token
/// endpoints.
pub fn create_router(state: Arc<AppState>, limits: Option<&RateLimitConfig>) -> Result<Router, ApiError> {
    let mut guarded = Router::new()
        .route("/api/v1/auth/authenticate", post(routes::auth::authenticate))
        .route("/api/v1/token", post(routes::token::renew))
        .route("/api/v1/token/verify", post(routes::token::verify))
        .route("/api/v1/authorize", post(routes::token::authorize));
    if let Some(limits) = limits {
        guarded = guarded.layer(GovernorLayer {
            config: rate_limit::create_governor_config(limits)?,
        });
    }

    Ok(Router::new()
        .route("/api/v1/health", get(health_handler))
        .route("/api/v1/auth/status", get(routes::auth::get_status))
        .route("/api/v1/auth/logout", post(routes::auth::logout))
        .route("/metrics", get(metrics_handler))
        .merge(guarded)
        .with_state(state)
        .layer(TraceLayer::new_for_http()))
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let status = state.orchestrator.status();

    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp,
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        strong_signing: status.strong_signing,
        components: ComponentStatus {
            face: status.face_available,
            voice: status.voice_available,
            liveness: status.liveness_available,
            camera: status.camera_available,
            microphone: status.microphone_available,
        },
    })
}

/// Prometheus text exposition
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed".to_string()),
    }
}

/// Initialize logging. `RUST_LOG` overrides the default `info` level.
pub fn init_logging(json: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true);

    if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    }
}

/// Run the server until Ctrl-C
pub async fn run_server(
    config: &ServerConfig,
    orchestrator: Arc<AuthOrchestrator>,
    metrics: Option<PrometheusHandle>,
) -> anyhow::Result<()> {
    let state = Arc::new(AppState::new(orchestrator, metrics));
    let app = create_router(state, Some(&config.rate_limit))?;

    info!("Starting API server on {}", config.bind);

    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
