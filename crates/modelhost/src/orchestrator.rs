//! Per-request coordination.
//!
//! One orchestrator instance is shared by all handlers; it owns no state of
//! its own beyond references to the registry and collaborators, so requests
//! only contend where the registry itself does.

use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use futures_util::Stream;
use tracing::debug;
use uuid::Uuid;

use crate::error::ApiError;
use crate::model_runtime::{
    ChatTurn, GenerationParams, ModelBundle, ModelKind, ModelRegistry,
};
use crate::protocol::{
    ChatChoice, ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ContentPart,
    EmbeddingData, EmbeddingUsage, EmbeddingsRequest, EmbeddingsResponse, MessageContent,
    ResponseMessage,
};
use crate::streaming::frame_completion;
use crate::tool_calls::extract_tool_calls;
use crate::tool_prompt::ToolPromptSynthesizer;

/// Models with native function-call training; synthesizing a tool prompt for
/// them degrades their output.
const TOOL_PROMPT_EXCLUSIONS: &[&str] = &["firefunction-v2"];

/// Result of a chat completion: either the full envelope or a live SSE line
/// stream whose body begins before generation completes.
pub enum ChatCompletionOutcome {
    Complete(ChatCompletionResponse),
    Stream(Pin<Box<dyn Stream<Item = String> + Send>>),
}

pub struct RequestOrchestrator {
    registry: Arc<ModelRegistry>,
    tool_prompt: Arc<dyn ToolPromptSynthesizer>,
}

impl RequestOrchestrator {
    pub fn new(registry: Arc<ModelRegistry>, tool_prompt: Arc<dyn ToolPromptSynthesizer>) -> Self {
        Self {
            registry,
            tool_prompt,
        }
    }

    pub async fn chat_completion(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionOutcome, ApiError> {
        if request.messages.is_empty() {
            return Err(ApiError::BadRequest(
                "Messages array cannot be empty".to_string(),
            ));
        }

        let bundle = self.registry.acquire(&request.model).await?;
        let params = GenerationParams {
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stop_words: eom_stop_words(&request.model),
        };

        match bundle.kind {
            ModelKind::VisionLanguage => self.vision_completion(bundle, request, params).await,
            // Embedding models requested here take the language path and
            // fail at the backend.
            ModelKind::Language | ModelKind::Embedding => {
                self.language_completion(bundle, request, params).await
            }
        }
    }

    async fn vision_completion(
        &self,
        bundle: ModelBundle,
        request: ChatCompletionRequest,
        params: GenerationParams,
    ) -> Result<ChatCompletionOutcome, ApiError> {
        let mut image_url: Option<String> = None;
        let mut turns = Vec::with_capacity(request.messages.len());
        for message in &request.messages {
            if let MessageContent::Parts(parts) = &message.content {
                for part in parts {
                    if let ContentPart::ImageUrl { image_url: image } = part {
                        image_url = Some(image.url.clone());
                    }
                }
            }
            turns.push(ChatTurn {
                role: message.role.clone(),
                content: message.content.flatten(),
            });
        }

        let image_url = image_url
            .or_else(|| request.image.clone())
            .ok_or_else(|| {
                ApiError::BadRequest("Image URL not provided for VLM model".to_string())
            })?;
        let image = match &bundle.image_processor {
            Some(processor) => processor
                .prepare(&image_url)
                .map_err(|e| ApiError::BadRequest(e.to_string()))?,
            None => image_url,
        };

        // paligemma takes the raw final turn; everything else goes through
        // the model's chat template.
        let prompt = if bundle.model_type() == "paligemma" {
            turns.last().map(|t| t.content.clone()).unwrap_or_default()
        } else {
            bundle.chat_template.render(&turns).await?
        };

        if request.stream {
            let fragments = bundle.backend.stream(&prompt, Some(&image), &params).await?;
            return Ok(ChatCompletionOutcome::Stream(Box::pin(frame_completion(
                request.model.clone(),
                fragments,
            ))));
        }
        let output = bundle.backend.generate(&prompt, Some(&image), &params).await?;
        Ok(ChatCompletionOutcome::Complete(assemble_response(
            &request.model,
            output,
        )))
    }

    async fn language_completion(
        &self,
        bundle: ModelBundle,
        mut request: ChatCompletionRequest,
        params: GenerationParams,
    ) -> Result<ChatCompletionOutcome, ApiError> {
        self.inject_tool_prompt(&mut request);

        let turns: Vec<ChatTurn> = request
            .messages
            .iter()
            .map(|message| ChatTurn {
                role: message.role.clone(),
                content: message.content.flatten(),
            })
            .collect();
        let prompt = bundle.chat_template.render(&turns).await?;

        if request.stream {
            let fragments = bundle.backend.stream(&prompt, None, &params).await?;
            return Ok(ChatCompletionOutcome::Stream(Box::pin(frame_completion(
                request.model.clone(),
                fragments,
            ))));
        }
        let output = bundle.backend.generate(&prompt, None, &params).await?;
        Ok(ChatCompletionOutcome::Complete(assemble_response(
            &request.model,
            output,
        )))
    }

    /// Describe the declared tools to the model, unless it has native
    /// function-calling or the caller already supplied a system message.
    fn inject_tool_prompt(&self, request: &mut ChatCompletionRequest) {
        let Some(tools) = request.tools.as_ref().filter(|t| !t.is_empty()) else {
            return;
        };
        if TOOL_PROMPT_EXCLUSIONS.iter().any(|m| request.model.contains(m)) {
            return;
        }
        if request
            .messages
            .first()
            .is_some_and(|m| m.role == "system")
        {
            return;
        }

        let final_user_content = request
            .messages
            .last()
            .map(|m| m.content.flatten())
            .unwrap_or_default();
        let (prompt, replaces_user_turn) = self.tool_prompt.synthesize(
            &request.model,
            tools,
            &final_user_content,
            request.tool_choice.as_ref(),
            request.parallel_tool_calls,
        );
        debug!(
            "synthesized tool prompt for '{}' ({} tools, replaces user turn: {})",
            request.model,
            tools.len(),
            replaces_user_turn
        );
        if replaces_user_turn {
            if let Some(last) = request.messages.last_mut() {
                last.content = MessageContent::Text(prompt);
            }
        } else {
            request.messages.insert(
                0,
                ChatMessage {
                    role: "system".to_string(),
                    content: MessageContent::Text(prompt),
                },
            );
        }
    }

    pub async fn embeddings(
        &self,
        request: EmbeddingsRequest,
    ) -> Result<EmbeddingsResponse, ApiError> {
        let bundle = self.registry.acquire(&request.model).await?;
        let input_ids = bundle.tokenizer.encode(&request.input).await?;
        let hidden = bundle.backend.forward(&input_ids).await?;
        // Single-vector projection: the first token position stands in for
        // the whole sequence.
        let embedding = hidden.into_iter().next().unwrap_or_default();
        let prompt_tokens = input_ids.len();

        Ok(EmbeddingsResponse {
            object: "list".to_string(),
            data: vec![EmbeddingData {
                object: "embedding".to_string(),
                embedding,
                index: 0,
            }],
            model: request.model,
            usage: EmbeddingUsage {
                prompt_tokens,
                total_tokens: prompt_tokens,
            },
        })
    }
}

fn assemble_response(model: &str, output: String) -> ChatCompletionResponse {
    let (content, tool_calls) = extract_tool_calls(&output);
    let finish_reason = if tool_calls.is_empty() {
        "stop"
    } else {
        "tool_calls"
    };
    ChatCompletionResponse {
        id: format!("chatcmpl-{}", Uuid::new_v4()),
        object: "chat.completion".to_string(),
        created: Utc::now().timestamp(),
        model: model.to_string(),
        choices: vec![ChatChoice {
            index: 0,
            message: ResponseMessage {
                role: "assistant".to_string(),
                content,
            },
            finish_reason: Some(finish_reason.to_string()),
        }],
        tool_calls: if tool_calls.is_empty() {
            None
        } else {
            Some(tool_calls)
        },
    }
}

/// End-of-message stop words by model family, passed to the engine so
/// generation halts at the template's turn boundary.
fn eom_stop_words(model_name: &str) -> Vec<String> {
    let lower = model_name.to_lowercase();
    if lower.contains("llama-3") || lower.contains("llama3") {
        vec!["<|eot_id|>".to_string()]
    } else if lower.contains("phi-3") || lower.contains("phi3") {
        vec!["<|end|>".to_string()]
    } else if lower.contains("qwen") || lower.contains("hermes") {
        vec!["<|im_end|>".to_string()]
    } else {
        Vec::new()
    }
}
