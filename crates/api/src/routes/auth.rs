//! Authentication Routes

use axum::{extract::State, http::StatusCode, Json};
use orchestrator::{AuthFailure, AuthResult, AuthStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::AppState;

/// Body of `POST /api/v1/auth/authenticate`
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AuthenticateRequest {
    pub require_face: bool,
    pub require_voice: bool,
    pub require_liveness: bool,
    /// Liveness time budget; the configured one when absent
    pub timeout_ms: Option<u64>,
}

impl Default for AuthenticateRequest {
    fn default() -> Self {
        Self {
            require_face: true,
            require_voice: false,
            require_liveness: true,
            timeout_ms: None,
        }
    }
}

/// Response of `POST /api/v1/auth/authenticate`
#[derive(Debug, Serialize)]
pub struct AuthenticateResponse {
    #[serde(flatten)]
    pub result: AuthResult,
    /// Bearer token for the new session, handed only to this caller
    pub token: Option<String>,
}

/// Response of `POST /api/v1/auth/logout`
#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub logged_out: bool,
}

/// Get enrollment, capability, and session status
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<AuthStatus> {
    Json(state.orchestrator.status())
}

/// Run a full authentication
pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AuthenticateRequest>,
) -> (StatusCode, Json<AuthenticateResponse>) {
    let orchestrator = &state.orchestrator;
    let timeout = Duration::from_millis(
        request
            .timeout_ms
            .unwrap_or(orchestrator.liveness().config().timeout_ms),
    );
    info!(
        "Authenticate request (face {}, voice {}, liveness {})",
        request.require_face, request.require_voice, request.require_liveness
    );

    let result = orchestrator
        .authenticate(
            request.require_face,
            request.require_voice,
            request.require_liveness,
            timeout,
        )
        .await;

    let token = result.session.as_ref().and_then(|session| {
        orchestrator
            .sessions()
            .issue_token(&session.id, None)
            .map_err(|e| warn!("No token for session {}: {}", session.id, e))
            .ok()
    });
    (status_for(&result), Json(AuthenticateResponse { result, token }))
}

/// End the current session
pub async fn logout(State(state): State<Arc<AppState>>) -> Json<LogoutResponse> {
    Json(LogoutResponse {
        logged_out: state.orchestrator.logout(),
    })
}

fn status_for(result: &AuthResult) -> StatusCode {
    match &result.failure {
        None => StatusCode::OK,
        Some(AuthFailure::Locked { .. }) => StatusCode::TOO_MANY_REQUESTS,
        Some(AuthFailure::NotConfigured { .. } | AuthFailure::DeviceUnavailable { .. }) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        Some(AuthFailure::Internal { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
        Some(_) => StatusCode::UNAUTHORIZED,
    }
}
