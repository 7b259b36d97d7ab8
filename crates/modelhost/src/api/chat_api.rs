//! Chat completion endpoint.
//!
//! Non-streaming requests block until generation completes and return the
//! full envelope. Streaming requests return a `text/event-stream` body that
//! begins before generation completes; the handler holds no registry lock
//! while the stream drains.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::StreamExt;
use tracing::info;

use crate::error::ApiError;
use crate::orchestrator::ChatCompletionOutcome;
use crate::protocol::ChatCompletionRequest;
use crate::server::AppState;

/// POST /v1/chat/completions
pub async fn chat_completion(
    State(state): State<AppState>,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<Response, ApiError> {
    info!(
        "chat completion request for model '{}' (stream: {})",
        request.model, request.stream
    );

    match state.orchestrator.chat_completion(request).await? {
        ChatCompletionOutcome::Complete(response) => Ok(Json(response).into_response()),
        ChatCompletionOutcome::Stream(lines) => {
            let events = lines.map(|line| {
                let data = line.trim_start_matches("data: ").trim_end().to_string();
                Ok::<_, Infallible>(Event::default().data(data))
            });
            Ok(Sse::new(events)
                .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
                .into_response())
        }
    }
}
