//! Model bundle and the collaborator contracts it carries.
//!
//! The tensor work lives behind these traits: the orchestration layer never
//! sees weights or tokenizer internals, only opaque handles with a narrow
//! async surface.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde_json::{Map, Value};

use super::ModelKind;
use crate::error::{GenerationError, ModelLoadError};

/// Parsed model `config.json` contents. Must contain `model_type`.
pub type ConfigMap = Map<String, Value>;

/// One increment of generated text. A fragment carrying a finish reason is
/// the last one the engine will produce.
#[derive(Debug, Clone)]
pub struct GenerationFragment {
    pub text: String,
    pub finish_reason: Option<String>,
}

/// Finite, non-restartable sequence of fragments. Dropping it cancels
/// generation; there is no cleanup obligation beyond the drop.
pub type FragmentStream = BoxStream<'static, Result<GenerationFragment, GenerationError>>;

#[derive(Debug, Clone)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub stop_words: Vec<String>,
}

/// A flattened chat turn handed to the templating collaborator.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

/// Inference surface of a loaded model.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Generate the complete output for a prompt, blocking until done.
    async fn generate(
        &self,
        prompt: &str,
        image: Option<&str>,
        params: &GenerationParams,
    ) -> Result<String, GenerationError>;

    /// Generate incrementally. The returned stream yields fragments as the
    /// engine produces them.
    async fn stream(
        &self,
        prompt: &str,
        image: Option<&str>,
        params: &GenerationParams,
    ) -> Result<FragmentStream, GenerationError>;

    /// Forward pass over token ids, returning one hidden vector per input
    /// position. Used by the embeddings path only.
    async fn forward(&self, input_ids: &[u32]) -> Result<Vec<Vec<f32>>, GenerationError>;
}

#[async_trait]
pub trait Tokenizer: Send + Sync {
    async fn encode(&self, text: &str) -> Result<Vec<u32>, GenerationError>;
}

#[async_trait]
pub trait ChatTemplate: Send + Sync {
    /// Render a message history into the model-specific prompt string.
    async fn render(&self, turns: &[ChatTurn]) -> Result<String, GenerationError>;
}

/// Prepares an image reference for the backend (URL validation, inline-data
/// passthrough). Only vision bundles carry one.
pub trait ImageProcessor: Send + Sync {
    fn prepare(&self, image_url: &str) -> Result<String, GenerationError>;
}

/// Resolves a model name and kind to a runnable bundle. The registry owns
/// caching; loaders are stateless with respect to it.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load_config(&self, model_name: &str) -> Result<ConfigMap, ModelLoadError>;

    async fn load_language_model(
        &self,
        model_name: &str,
        config: ConfigMap,
    ) -> Result<ModelBundle, ModelLoadError>;

    async fn load_vision_model(
        &self,
        model_name: &str,
        config: ConfigMap,
    ) -> Result<ModelBundle, ModelLoadError>;

    async fn load_embedding_model(
        &self,
        model_name: &str,
        config: ConfigMap,
    ) -> Result<ModelBundle, ModelLoadError>;
}

/// The loaded, runnable form of a model plus its auxiliary handles. Owned by
/// the registry once inserted; clones share the underlying handles.
#[derive(Clone)]
pub struct ModelBundle {
    pub model_name: String,
    pub kind: ModelKind,
    pub backend: Arc<dyn ModelBackend>,
    pub tokenizer: Arc<dyn Tokenizer>,
    pub chat_template: Arc<dyn ChatTemplate>,
    pub image_processor: Option<Arc<dyn ImageProcessor>>,
    pub config: ConfigMap,
}

impl ModelBundle {
    pub fn model_type(&self) -> &str {
        self.config
            .get("model_type")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for ModelBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelBundle")
            .field("model_name", &self.model_name)
            .field("kind", &self.kind)
            .field("model_type", &self.model_type())
            .finish()
    }
}
