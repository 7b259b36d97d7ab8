//! Error taxonomy for the request-orchestration layer.
//!
//! Loader and generation failures carry their own types so callers can tell
//! a broken model apart from a broken request. Everything converges on
//! `ApiError` at the HTTP boundary, which renders the FastAPI-compatible
//! `{"detail": ...}` body shape clients already parse.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Failure while resolving a model name to a loaded bundle.
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("model '{0}' not found")]
    NotFound(String),

    #[error("config for model '{model}' is invalid: {reason}")]
    InvalidConfig { model: String, reason: String },

    #[error("config for model '{0}' is missing 'model_type'")]
    MissingModelType(String),

    #[error("backend error while loading model '{model}': {reason}")]
    Backend { model: String, reason: String },
}

/// Failure inside the external generation engine or one of its handles.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("runtime request failed: {0}")]
    Request(String),

    #[error("runtime returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to parse runtime response: {0}")]
    Parse(String),

    #[error("stream read error: {0}")]
    Stream(String),
}

/// Top-level error for API handlers. Maps the taxonomy onto HTTP statuses:
/// client mistakes to 400/404, loader and engine failures to 500.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    ModelLoad(#[from] ModelLoadError),

    #[error(transparent)]
    Generation(#[from] GenerationError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::ModelLoad(_) | ApiError::Generation(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}
