//! Model management endpoints: the static classification table, the cache
//! listing, warm-loading, and eviction.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::error::ApiError;
use crate::protocol::SupportedModels;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct ModelQuery {
    pub model_name: String,
}

/// GET /v1/supported_models
pub async fn supported_models() -> Json<SupportedModels> {
    Json(SupportedModels::catalog())
}

/// GET /v1/models — names currently cached in the registry.
pub async fn list_models(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "models": state.registry.list() }))
}

/// POST /v1/models?model_name=... — warm-load a model. Idempotent: a cached
/// model is returned as-is without a second load.
pub async fn add_model(
    State(state): State<AppState>,
    Query(query): Query<ModelQuery>,
) -> Result<Json<Value>, ApiError> {
    info!("warm-load requested for model '{}'", query.model_name);
    state.registry.acquire(&query.model_name).await?;
    Ok(Json(json!({
        "status": "success",
        "message": format!("Model {} added successfully", query.model_name),
    })))
}

/// DELETE /v1/models?model_name=... — evict a cached model. The name arrives
/// percent-decoded from the query layer; surrounding quotes are stripped.
pub async fn remove_model(
    State(state): State<AppState>,
    Query(query): Query<ModelQuery>,
) -> Result<StatusCode, ApiError> {
    let model_name = query.model_name.trim().trim_matches('"');
    if state.registry.release(model_name) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!(
            "Model '{}' not found",
            model_name
        )))
    }
}
