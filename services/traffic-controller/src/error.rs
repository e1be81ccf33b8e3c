//! Custom error types for the traffic controller

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Errors surfaced to HTTP callers
///
/// Only a generic phrase reaches the caller; the detail is logged.
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Bad request with message
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Downstream agent unreachable or timed out
    #[error("Agent service unavailable")]
    Unavailable,

    /// Identity, credential or session store failure
    #[error("Backend store error: {0}")]
    Backend(anyhow::Error),

    /// Internal server error
    #[error("Internal server error: {0}")]
    Internal(anyhow::Error),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            GatewayError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            GatewayError::Unavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Agent service unavailable".to_string(),
            ),
            GatewayError::Backend(e) => {
                error!("Backend store error: {:#}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Service temporarily unavailable".to_string(),
                )
            }
            GatewayError::Internal(e) => {
                error!("Internal error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "success": false,
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl GatewayError {
    /// Classify a store failure
    ///
    /// A blocking task that panicked or was cancelled is a gateway bug, not
    /// an unavailable backend.
    pub fn from_store(e: anyhow::Error) -> Self {
        if e.chain().any(|cause| cause.is::<tokio::task::JoinError>()) {
            GatewayError::Internal(e)
        } else {
            GatewayError::Backend(e)
        }
    }
}

/// Type alias for gateway results
pub type GatewayResult<T> = Result<T, GatewayError>;
