//! API error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use orchestrator::{AuthorizeError, ConfigError};
use serde_json::json;
use session::TokenError;
use thiserror::Error;

/// API error types
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Authorize(#[from] AuthorizeError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Settings(#[from] ConfigError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Token(_) | ApiError::Authorize(AuthorizeError::Token(_)) => StatusCode::UNAUTHORIZED,
            ApiError::Authorize(AuthorizeError::Denied(_)) => StatusCode::FORBIDDEN,
            ApiError::Config(_) | ApiError::Settings(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Sentence safe to show to a caller
    pub fn reason(&self) -> String {
        match self {
            ApiError::Token(_) => "Please authenticate first.".to_string(),
            ApiError::Authorize(e) => e.reason(),
            ApiError::Config(_) | ApiError::Settings(_) => "Service misconfigured.".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({
            "error": self.to_string(),
            "reason": self.reason(),
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use session::Denied;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::Token(TokenError::Expired).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::Authorize(AuthorizeError::Token(TokenError::SessionRevoked)).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::Authorize(AuthorizeError::Denied(Denied::NoSession)).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::Config("bad".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
