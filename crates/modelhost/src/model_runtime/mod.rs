//! Model lifecycle: kind classification, bundle handles, and the registry
//! that caches loaded models by name.

pub mod bundle;
pub mod registry;
pub mod runtime_client;

pub use bundle::{
    ChatTemplate, ChatTurn, ConfigMap, FragmentStream, GenerationFragment, GenerationParams,
    ImageProcessor, ModelBackend, ModelBundle, ModelLoader, Tokenizer,
};
pub use registry::ModelRegistry;
pub use runtime_client::RuntimeClient;

use serde::Serialize;

/// Classification of a model into one of the three serving paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Language,
    VisionLanguage,
    Embedding,
}

/// Aliases that resolve to a canonical architecture name before
/// classification. Checked before the kind lists below.
pub const MODEL_REMAPPING: &[(&str, &str)] = &[
    ("mistral", "llama"),
    ("phi-msft", "phixtral"),
    ("falcon_mamba", "mamba"),
    ("llava-qwen2", "llava_bunny"),
    ("bunny-llama", "llava_bunny"),
];

pub const VLM_MODEL_TYPES: &[&str] = &[
    "llava",
    "llava_next",
    "llava_bunny",
    "qwen2_vl",
    "idefics2",
    "paligemma",
    "pixtral",
    "phi3_v",
    "multi_modality",
];

pub const LM_MODEL_TYPES: &[&str] = &[
    "llama",
    "phi",
    "phi3",
    "phixtral",
    "qwen2",
    "qwen2_moe",
    "gemma",
    "gemma2",
    "mixtral",
    "mamba",
    "starcoder2",
    "stablelm",
    "olmo",
    "internlm2",
    "minicpm",
    "cohere",
];

pub const EMBEDDING_MODEL_TYPES: &[&str] = &["bert", "roberta", "xlm-roberta"];

/// Resolve a raw `model_type` string to its canonical name.
pub fn remap_model_type(model_type: &str) -> &str {
    MODEL_REMAPPING
        .iter()
        .find(|(alias, _)| *alias == model_type)
        .map(|(_, canonical)| *canonical)
        .unwrap_or(model_type)
}

/// Classify a `model_type` into a serving path. Unknown types fall back to
/// the plain language-model path.
pub fn classify_model_type(model_type: &str) -> ModelKind {
    let canonical = remap_model_type(model_type);
    if VLM_MODEL_TYPES.contains(&canonical) {
        ModelKind::VisionLanguage
    } else if EMBEDDING_MODEL_TYPES.contains(&canonical) {
        ModelKind::Embedding
    } else {
        ModelKind::Language
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remapping_applies_before_membership() {
        // "mistral" is not in any kind list itself; its canonical form is.
        assert_eq!(classify_model_type("mistral"), ModelKind::Language);
        assert_eq!(classify_model_type("llava-qwen2"), ModelKind::VisionLanguage);
    }

    #[test]
    fn unknown_types_default_to_language() {
        assert_eq!(classify_model_type("some_new_arch"), ModelKind::Language);
    }

    #[test]
    fn classification_is_deterministic() {
        for _ in 0..100 {
            assert_eq!(classify_model_type("paligemma"), ModelKind::VisionLanguage);
            assert_eq!(classify_model_type("bert"), ModelKind::Embedding);
            assert_eq!(classify_model_type("phi3"), ModelKind::Language);
        }
    }
}
