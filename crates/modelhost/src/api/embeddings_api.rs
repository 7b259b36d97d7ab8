//! Embeddings endpoint.

use axum::extract::State;
use axum::Json;
use tracing::info;

use crate::error::ApiError;
use crate::protocol::{EmbeddingsRequest, EmbeddingsResponse};
use crate::server::AppState;

/// POST /v1/embeddings
pub async fn create_embeddings(
    State(state): State<AppState>,
    Json(request): Json<EmbeddingsRequest>,
) -> Result<Json<EmbeddingsResponse>, ApiError> {
    info!("embeddings request for model '{}'", request.model);
    let response = state.orchestrator.embeddings(request).await?;
    Ok(Json(response))
}
