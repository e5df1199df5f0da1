//! Token and Authorization Routes

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use session::{AuthLevel, Claims};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::{ApiError, AppState};

/// Body of `POST /api/v1/token`
#[derive(Debug, Deserialize)]
pub struct RenewRequest {
    /// Valid token of the session to renew
    pub token: String,
    /// Token lifetime; the configured one when absent, capped by the store
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct RenewResponse {
    pub token: String,
    pub claims: Option<Claims>,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub valid: bool,
    pub claims: Option<Claims>,
}

#[derive(Debug, Deserialize)]
pub struct AuthorizeRequest {
    pub token: String,
    pub command: String,
}

#[derive(Debug, Serialize)]
pub struct AuthorizeResponse {
    pub authorized: bool,
    pub session_id: Uuid,
    pub user_id: String,
    pub auth_level: AuthLevel,
}

/// Exchange a valid token for a fresh one bound to the same session
pub async fn renew(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RenewRequest>,
) -> Result<Json<RenewResponse>, ApiError> {
    let token = state
        .orchestrator
        .renew_token(&request.token, request.ttl_secs.map(Duration::from_secs))?;
    let claims = state.orchestrator.verify_token(&token);
    Ok(Json(RenewResponse { token, claims }))
}

/// Check a token; invalid tokens are reported, not rejected
pub async fn verify(
    State(state): State<Arc<AppState>>,
    Json(request): Json<VerifyRequest>,
) -> Json<VerifyResponse> {
    let claims = state.orchestrator.verify_token(&request.token);
    Json(VerifyResponse {
        valid: claims.is_some(),
        claims,
    })
}

/// Authorize a command for the session a token is bound to
pub async fn authorize(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AuthorizeRequest>,
) -> Result<Json<AuthorizeResponse>, ApiError> {
    let session = state
        .orchestrator
        .authorize_token(&request.token, &request.command)?;
    Ok(Json(AuthorizeResponse {
        authorized: true,
        session_id: session.id,
        user_id: session.user_id,
        auth_level: session.auth_level,
    }))
}
