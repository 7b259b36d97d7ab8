//! Concurrency-safe model cache.
//!
//! One bundle per model name. Cache hits read lock-free; cache misses load
//! through the external loader and insert. A cold load is NOT serialized per
//! name: two racing first-requests for the same unseen model may both pay
//! for the load, and the second insert wins. The map itself never tears.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, info};

use super::bundle::{ModelBundle, ModelLoader};
use super::{classify_model_type, ModelKind};
use crate::error::ModelLoadError;

pub struct ModelRegistry {
    models: DashMap<String, ModelBundle>,
    loader: Arc<dyn ModelLoader>,
}

impl ModelRegistry {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            models: DashMap::new(),
            loader,
        }
    }

    /// Return the cached bundle for `model_name`, loading it on first use.
    ///
    /// The loader resolves the model type from config, the type classifies
    /// into a serving path, and the matching load sub-routine produces the
    /// bundle. Loader failures propagate; nothing is cached on failure.
    pub async fn acquire(&self, model_name: &str) -> Result<ModelBundle, ModelLoadError> {
        // Fast path: existing bundle, no waiting.
        if let Some(bundle) = self.models.get(model_name) {
            return Ok(bundle.clone());
        }

        // Slow path: load outside any lock so unrelated names never block
        // each other. Racing cold loads for the same name both run; the
        // second insert wins.
        let config = self.loader.load_config(model_name).await?;
        let model_type = config
            .get("model_type")
            .and_then(Value::as_str)
            .ok_or_else(|| ModelLoadError::MissingModelType(model_name.to_string()))?
            .to_string();
        let kind = classify_model_type(&model_type);
        debug!("loading model '{}' (type: {}, kind: {:?})", model_name, model_type, kind);

        let bundle = match kind {
            ModelKind::VisionLanguage => self.loader.load_vision_model(model_name, config).await?,
            ModelKind::Embedding => self.loader.load_embedding_model(model_name, config).await?,
            ModelKind::Language => self.loader.load_language_model(model_name, config).await?,
        };

        self.models.insert(model_name.to_string(), bundle.clone());
        info!("model '{}' loaded and cached ({:?})", model_name, kind);
        Ok(bundle)
    }

    /// Evict a cached model. Returns whether an entry was removed.
    pub fn release(&self, model_name: &str) -> bool {
        let removed = self.models.remove(model_name).is_some();
        if removed {
            info!("model '{}' evicted from cache", model_name);
        }
        removed
    }

    /// Snapshot of currently cached model names.
    pub fn list(&self) -> Vec<String> {
        self.models.iter().map(|entry| entry.key().clone()).collect()
    }
}
