use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not authorized: {0}")]
    Authorization(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limit exceeded")]
    RateLimitExceeded,

    #[error("transaction failed: {0}")]
    Transaction(#[from] anyhow::Error),
}

impl AppError {
    /// Stable machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation_error",
            AppError::Authorization(_) => "authorization_error",
            AppError::Authentication(_) => "authentication_error",
            AppError::Conflict(_) => "conflict_error",
            AppError::NotFound(_) => "not_found_error",
            AppError::RateLimitExceeded => "rate_limit_error",
            AppError::Transaction(_) => "transaction_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Authorization(_) => StatusCode::FORBIDDEN,
            AppError::Authentication(_) => StatusCode::UNAUTHORIZED,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            AppError::Transaction(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Transaction(e.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (code, msg) = match &self {
            AppError::Validation(m) => ("invalid_request", m.clone()),
            AppError::Authorization(m) => ("insufficient_role", m.clone()),
            AppError::Authentication(m) => ("invalid_credentials", m.clone()),
            AppError::Conflict(m) => ("conflict", m.clone()),
            AppError::NotFound(m) => ("not_found", m.clone()),
            AppError::RateLimitExceeded => ("rate_limit_exceeded", "rate limit exceeded".to_string()),
            AppError::Transaction(e) => {
                tracing::error!("Transaction error: {:#}", e);
                ("internal_server_error", "internal server error".to_string())
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": self.kind(),
                "code": code,
            }
        }));

        let mut response = (self.status(), body).into_response();

        // Add Retry-After header for rate limit errors
        if matches!(self, AppError::RateLimitExceeded) {
            response.headers_mut().insert(
                "retry-after",
                axum::http::HeaderValue::from_static("60"),
            );
        }

        response
    }
}
