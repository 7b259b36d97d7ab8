// modelhost/src/api/mod.rs
//! API module - OpenAI-compatible HTTP surface

pub mod chat_api;
pub mod embeddings_api;
pub mod models_api;

// Re-export API handlers
pub use chat_api::chat_completion;
pub use embeddings_api::create_embeddings;
pub use models_api::{add_model, list_models, remove_model, supported_models};
