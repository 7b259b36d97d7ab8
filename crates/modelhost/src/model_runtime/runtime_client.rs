//! Default collaborators backed by a local runtime daemon.
//!
//! The daemon owns weights, tokenization, and templating; this client only
//! speaks its HTTP surface. The only network hop in the system is to
//! localhost.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::bundle::{
    ChatTemplate, ChatTurn, ConfigMap, FragmentStream, GenerationFragment, GenerationParams,
    ImageProcessor, ModelBackend, ModelBundle, ModelLoader, Tokenizer,
};
use super::ModelKind;
use crate::error::{GenerationError, ModelLoadError};

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<&'a str>,
    n_predict: u32,
    temperature: f32,
    stop: &'a [String],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    content: String,
}

/// One event of the daemon's completion stream.
#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(default)]
    content: String,
    #[serde(default)]
    stop: bool,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Serialize)]
struct TokenizeRequest<'a> {
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenizeResponse {
    tokens: Vec<u32>,
}

#[derive(Debug, Serialize)]
struct ForwardRequest<'a> {
    model: &'a str,
    tokens: &'a [u32],
}

#[derive(Debug, Deserialize)]
struct ForwardResponse {
    embedding: Vec<Vec<f32>>,
}

#[derive(Debug, Serialize)]
struct TemplateRequest<'a> {
    messages: Vec<TemplateMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct TemplateMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct TemplateResponse {
    prompt: String,
}

/// Loader and handle factory for a runtime daemon. Model configs come from
/// `{models_dir}/{name}/config.json`; everything else is proxied over HTTP.
pub struct RuntimeClient {
    base_url: String,
    models_dir: PathBuf,
    http_client: reqwest::Client,
}

impl RuntimeClient {
    pub fn new(base_url: String, models_dir: PathBuf) -> Self {
        info!("runtime client initialized with backend: {}", base_url);
        Self {
            base_url,
            models_dir,
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(600))
                .build()
                .unwrap_or_default(),
        }
    }

    fn handles(&self, model_name: &str) -> RuntimeHandles {
        RuntimeHandles {
            base_url: self.base_url.clone(),
            model_name: model_name.to_string(),
            http_client: self.http_client.clone(),
        }
    }

    fn bundle(
        &self,
        model_name: &str,
        kind: ModelKind,
        config: ConfigMap,
        with_image_processor: bool,
    ) -> ModelBundle {
        let handles = Arc::new(self.handles(model_name));
        let image_processor: Option<Arc<dyn ImageProcessor>> = if with_image_processor {
            Some(Arc::new(UrlImageProcessor))
        } else {
            None
        };
        ModelBundle {
            model_name: model_name.to_string(),
            kind,
            backend: handles.clone(),
            tokenizer: handles.clone(),
            chat_template: handles,
            image_processor,
            config,
        }
    }
}

#[async_trait]
impl ModelLoader for RuntimeClient {
    async fn load_config(&self, model_name: &str) -> Result<ConfigMap, ModelLoadError> {
        let path = self.models_dir.join(model_name).join("config.json");
        let raw = tokio::fs::read_to_string(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ModelLoadError::NotFound(model_name.to_string())
            } else {
                ModelLoadError::InvalidConfig {
                    model: model_name.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;
        let config: ConfigMap =
            serde_json::from_str(&raw).map_err(|e| ModelLoadError::InvalidConfig {
                model: model_name.to_string(),
                reason: e.to_string(),
            })?;
        if !config.contains_key("model_type") {
            return Err(ModelLoadError::MissingModelType(model_name.to_string()));
        }
        Ok(config)
    }

    async fn load_language_model(
        &self,
        model_name: &str,
        config: ConfigMap,
    ) -> Result<ModelBundle, ModelLoadError> {
        debug!("runtime client load (proxy mode): {}", model_name);
        Ok(self.bundle(model_name, ModelKind::Language, config, false))
    }

    async fn load_vision_model(
        &self,
        model_name: &str,
        config: ConfigMap,
    ) -> Result<ModelBundle, ModelLoadError> {
        debug!("runtime client load (proxy mode, vision): {}", model_name);
        Ok(self.bundle(model_name, ModelKind::VisionLanguage, config, true))
    }

    async fn load_embedding_model(
        &self,
        model_name: &str,
        config: ConfigMap,
    ) -> Result<ModelBundle, ModelLoadError> {
        debug!("runtime client load (proxy mode, embedding): {}", model_name);
        Ok(self.bundle(model_name, ModelKind::Embedding, config, false))
    }
}

/// Per-model handles sharing one HTTP client. Implements every bundle trait
/// by proxying the daemon.
struct RuntimeHandles {
    base_url: String,
    model_name: String,
    http_client: reqwest::Client,
}

impl RuntimeHandles {
    fn completion_url(&self) -> String {
        format!("{}/completion", self.base_url)
    }

    fn tokenize_url(&self) -> String {
        format!("{}/tokenize", self.base_url)
    }

    fn embedding_url(&self) -> String {
        format!("{}/embedding", self.base_url)
    }

    fn template_url(&self) -> String {
        format!("{}/apply-template", self.base_url)
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
    ) -> Result<reqwest::Response, GenerationError> {
        let response = self
            .http_client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| GenerationError::Request(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status { status, body });
        }
        Ok(response)
    }
}

#[async_trait]
impl ModelBackend for RuntimeHandles {
    async fn generate(
        &self,
        prompt: &str,
        image: Option<&str>,
        params: &GenerationParams,
    ) -> Result<String, GenerationError> {
        debug!("runtime generate for '{}' (non-streaming)", self.model_name);
        let request = CompletionRequest {
            model: &self.model_name,
            prompt,
            image,
            n_predict: params.max_tokens,
            temperature: params.temperature,
            stop: &params.stop_words,
            stream: false,
        };
        let response = self.post_json(&self.completion_url(), &request).await?;
        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Parse(e.to_string()))?;
        Ok(completion.content)
    }

    async fn stream(
        &self,
        prompt: &str,
        image: Option<&str>,
        params: &GenerationParams,
    ) -> Result<FragmentStream, GenerationError> {
        debug!("runtime generate for '{}' (streaming)", self.model_name);
        let request = CompletionRequest {
            model: &self.model_name,
            prompt,
            image,
            n_predict: params.max_tokens,
            temperature: params.temperature,
            stop: &params.stop_words,
            stream: true,
        };
        let response = self.post_json(&self.completion_url(), &request).await?;
        let byte_stream = response.bytes_stream();

        let fragments = async_stream::try_stream! {
            let mut buffer = String::new();
            futures_util::pin_mut!(byte_stream);
            while let Some(chunk_result) = byte_stream.next().await {
                let chunk = chunk_result
                    .map_err(|e| GenerationError::Stream(e.to_string()))?;
                buffer.push_str(&String::from_utf8_lossy(&chunk));
                while let Some(newline_pos) = buffer.find('\n') {
                    let line = buffer[..newline_pos].trim().to_string();
                    buffer = buffer[newline_pos + 1..].to_string();
                    if line.is_empty() {
                        continue;
                    }
                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    let event: StreamEvent = serde_json::from_str(data)
                        .map_err(|e| GenerationError::Parse(e.to_string()))?;
                    let finish_reason = if event.stop {
                        Some(if event.truncated { "length" } else { "stop" }.to_string())
                    } else {
                        None
                    };
                    let terminal = finish_reason.is_some();
                    yield GenerationFragment {
                        text: event.content,
                        finish_reason,
                    };
                    if terminal {
                        return;
                    }
                }
            }
        };
        Ok(Box::pin(fragments))
    }

    async fn forward(&self, input_ids: &[u32]) -> Result<Vec<Vec<f32>>, GenerationError> {
        let request = ForwardRequest {
            model: &self.model_name,
            tokens: input_ids,
        };
        let response = self.post_json(&self.embedding_url(), &request).await?;
        let forward: ForwardResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Parse(e.to_string()))?;
        Ok(forward.embedding)
    }
}

#[async_trait]
impl Tokenizer for RuntimeHandles {
    async fn encode(&self, text: &str) -> Result<Vec<u32>, GenerationError> {
        let request = TokenizeRequest { content: text };
        let response = self.post_json(&self.tokenize_url(), &request).await?;
        let tokenized: TokenizeResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Parse(e.to_string()))?;
        Ok(tokenized.tokens)
    }
}

#[async_trait]
impl ChatTemplate for RuntimeHandles {
    async fn render(&self, turns: &[ChatTurn]) -> Result<String, GenerationError> {
        let request = TemplateRequest {
            messages: turns
                .iter()
                .map(|t| TemplateMessage {
                    role: &t.role,
                    content: &t.content,
                })
                .collect(),
        };
        let response = self.post_json(&self.template_url(), &request).await?;
        let rendered: TemplateResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Parse(e.to_string()))?;
        Ok(rendered.prompt)
    }
}

/// Accepts http(s) URLs and inline data URIs untouched; anything else is
/// rejected before it reaches the daemon.
struct UrlImageProcessor;

impl ImageProcessor for UrlImageProcessor {
    fn prepare(&self, image_url: &str) -> Result<String, GenerationError> {
        if image_url.starts_with("http://")
            || image_url.starts_with("https://")
            || image_url.starts_with("data:")
        {
            Ok(image_url.to_string())
        } else {
            Err(GenerationError::Request(format!(
                "unsupported image reference: {}",
                image_url
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn client_for(server: &mockito::ServerGuard, models_dir: PathBuf) -> RuntimeClient {
        RuntimeClient::new(server.url(), models_dir)
    }

    fn write_config(dir: &std::path::Path, model: &str, body: &str) {
        let model_dir = dir.join(model);
        std::fs::create_dir_all(&model_dir).expect("mkdir");
        std::fs::write(model_dir.join("config.json"), body).expect("write config");
    }

    #[tokio::test]
    async fn load_config_reads_model_type() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write_config(tmp.path(), "phi-local", r#"{"model_type": "phi3"}"#);
        let server = mockito::Server::new_async().await;
        let client = client_for(&server, tmp.path().to_path_buf());

        let config = client.load_config("phi-local").await.expect("config");
        assert_eq!(config.get("model_type").and_then(Value::as_str), Some("phi3"));
    }

    #[tokio::test]
    async fn missing_config_is_not_found() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let server = mockito::Server::new_async().await;
        let client = client_for(&server, tmp.path().to_path_buf());

        let err = client.load_config("absent").await.expect_err("must fail");
        assert!(matches!(err, ModelLoadError::NotFound(_)));
    }

    #[tokio::test]
    async fn config_without_model_type_is_rejected() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write_config(tmp.path(), "typeless", r#"{"hidden_size": 1024}"#);
        let server = mockito::Server::new_async().await;
        let client = client_for(&server, tmp.path().to_path_buf());

        let err = client.load_config("typeless").await.expect_err("must fail");
        assert!(matches!(err, ModelLoadError::MissingModelType(_)));
    }

    #[tokio::test]
    async fn generate_returns_daemon_content() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/completion")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"content": "generated response"}"#)
            .create_async()
            .await;

        let client = client_for(&server, tmp.path().to_path_buf());
        let handles = client.handles("phi-local");
        let params = GenerationParams {
            max_tokens: 16,
            temperature: 0.2,
            stop_words: Vec::new(),
        };
        let output = handles.generate("hello", None, &params).await.expect("generate");
        assert_eq!(output, "generated response");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn daemon_error_status_propagates() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/completion")
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;

        let client = client_for(&server, tmp.path().to_path_buf());
        let handles = client.handles("phi-local");
        let params = GenerationParams {
            max_tokens: 16,
            temperature: 0.2,
            stop_words: Vec::new(),
        };
        let err = handles
            .generate("hello", None, &params)
            .await
            .expect_err("must fail");
        assert!(matches!(err, GenerationError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn tokenize_round_trip() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/tokenize")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"tokens": [1, 2, 3]}"#)
            .create_async()
            .await;

        let client = client_for(&server, tmp.path().to_path_buf());
        let handles = client.handles("bert-local");
        let tokens = handles.encode("Hello, world!").await.expect("tokens");
        assert_eq!(tokens, vec![1, 2, 3]);
    }

    #[test]
    fn image_processor_rejects_file_paths() {
        let processor = UrlImageProcessor;
        assert!(processor.prepare("https://example.com/cat.png").is_ok());
        assert!(processor.prepare("data:image/png;base64,AAAA").is_ok());
        assert!(processor.prepare("/etc/passwd").is_err());
    }
}
