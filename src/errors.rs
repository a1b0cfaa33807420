//! HTTP error type.
//!
//! Handlers return `Result<Response, ApiError>`.  Client errors carry the
//! message sent back to the caller; internal errors are logged and replaced
//! by an opaque message.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::storage::StoreError;

/// Message returned for every server-side failure.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error.";

#[derive(Debug, Error)]
pub enum ApiError {
    /// Caller-correctable input problem (400).
    #[error("{0}")]
    BadRequest(String),

    /// Missing or unknown API token (401).
    #[error("{0}")]
    Unauthorized(String),

    /// Request body over the configured limit (413).
    #[error("{0}")]
    PayloadTooLarge(String),

    /// Catch-all for unexpected internal errors (500).
    #[error("Internal server error.")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    /// Return the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Rejected(rejection) => ApiError::BadRequest(rejection.to_string()),
            StoreError::Io(e) => ApiError::Internal(anyhow::Error::new(e)),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            // The auth layer reports under `errorMessage`, everything else
            // under `message`.
            ApiError::Unauthorized(message) => json!({ "errorMessage": message }),
            ApiError::Internal(cause) => {
                tracing::error!("Internal server error: {:#}", cause);
                json!({ "message": INTERNAL_ERROR_MESSAGE })
            }
            ApiError::BadRequest(message) | ApiError::PayloadTooLarge(message) => {
                json!({ "message": message })
            }
        };
        (status, Json(body)).into_response()
    }
}
