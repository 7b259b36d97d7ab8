//! Server assembly.
//!
//! Builds the explicitly-owned state (registry + orchestrator, no ambient
//! globals), wires the router, and serves. Each process owns its own model
//! cache; horizontal scaling runs several processes side by side with no
//! cross-process coherence.

use std::sync::Arc;

use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::model_runtime::{ModelRegistry, RuntimeClient};
use crate::orchestrator::RequestOrchestrator;
use crate::tool_prompt::DefaultToolPrompt;

/// Unified application state for all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ModelRegistry>,
    pub orchestrator: Arc<RequestOrchestrator>,
}

impl AppState {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        let orchestrator = Arc::new(RequestOrchestrator::new(
            registry.clone(),
            Arc::new(DefaultToolPrompt),
        ));
        Self {
            registry,
            orchestrator,
        }
    }
}

/// Run the HTTP server until shutdown.
pub async fn run_server(cfg: Config) -> anyhow::Result<()> {
    crate::telemetry::init_tracing();
    cfg.print_config();

    let runtime_client = Arc::new(RuntimeClient::new(
        cfg.runtime_url.clone(),
        cfg.models_dir.clone(),
    ));
    let registry = Arc::new(ModelRegistry::new(runtime_client));
    let state = AppState::new(registry);

    info!("Starting HTTP server on {}:{}", cfg.host, cfg.port);
    let listener = tokio::net::TcpListener::bind(format!("{}:{}", cfg.host, cfg.port)).await?;

    let app = build_router(state, &cfg.allowed_origins);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the OpenAI-compatible router.
pub fn build_router(state: AppState, allowed_origins: &[String]) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(crate::api::chat_completion))
        .route("/v1/embeddings", post(crate::api::create_embeddings))
        .route("/v1/supported_models", get(crate::api::supported_models))
        .route(
            "/v1/models",
            get(crate::api::list_models)
                .post(crate::api::add_model)
                .delete(crate::api::remove_model),
        )
        .route("/healthz", get(|| async { "OK" }))
        .layer(cors_layer(allowed_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Wildcard origins go out without credentials; an explicit origin list is
/// mirrored back with credentials allowed.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::PUT, Method::DELETE];
    if allowed_origins.iter().any(|origin| origin == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring unparsable CORS origin: {}", origin);
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(methods)
        .allow_headers(Any)
        .allow_credentials(true)
}
