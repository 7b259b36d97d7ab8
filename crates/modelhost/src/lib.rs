// modelhost/src/lib.rs

pub mod api;
pub mod config;
pub mod error;
pub mod model_runtime;
pub mod orchestrator;
pub mod protocol;
pub mod server;
pub mod streaming;
pub mod telemetry;
pub mod tool_calls;
pub mod tool_prompt;

// Public API exports
pub use config::Config;
pub use error::{ApiError, GenerationError, ModelLoadError};
pub use model_runtime::{ModelBundle, ModelKind, ModelRegistry, RuntimeClient};
pub use orchestrator::{ChatCompletionOutcome, RequestOrchestrator};
pub use server::{build_router, run_server, AppState};
pub use tool_calls::extract_tool_calls;

// API exports
pub use api::{
    chat_api::chat_completion,
    embeddings_api::create_embeddings,
    models_api::{add_model, list_models, remove_model, supported_models},
};
