//! Incremental response framing.
//!
//! Turns the generation engine's fragment stream into the SSE line sequence
//! `text/event-stream` clients consume: a role-announcing chunk, one chunk
//! per fragment, a terminal chunk carrying the finish reason, then the
//! `[DONE]` sentinel. Every chunk of one response shares a single id and
//! created timestamp, assigned at stream start.

use async_stream::stream;
use chrono::Utc;
use futures_util::{Stream, StreamExt};
use tracing::error;
use uuid::Uuid;

use crate::model_runtime::FragmentStream;
use crate::protocol::{ChunkChoice, ChunkDelta, StreamChunk};

pub const DONE_SENTINEL: &str = "[DONE]";

const CHUNK_OBJECT: &str = "chat.completion.chunk";
const DEFAULT_FINISH_REASON: &str = "stop";

fn chunk_line(
    id: &str,
    created: i64,
    model: &str,
    delta: ChunkDelta,
    finish_reason: Option<String>,
) -> String {
    let chunk = StreamChunk {
        id: id.to_string(),
        object: CHUNK_OBJECT.to_string(),
        created,
        model: model.to_string(),
        choices: vec![ChunkChoice {
            index: 0,
            delta,
            finish_reason,
        }],
    };
    // StreamChunk holds only plain fields; serialization cannot fail.
    let data = serde_json::to_string(&chunk).unwrap_or_default();
    format!("data: {}\n\n", data)
}

/// Render the fragment sequence as SSE lines. The stream is pull-based:
/// dropping it (consumer disconnect) stops pulling fragments and with them
/// generation. An engine error ends the stream with no `[DONE]` sentinel,
/// which is how clients tracking the sentinel detect abnormal termination.
pub fn frame_completion(model: String, fragments: FragmentStream) -> impl Stream<Item = String> {
    let id = format!("chatcmpl-{}", Uuid::new_v4());
    let created = Utc::now().timestamp();

    stream! {
        yield chunk_line(
            &id,
            created,
            &model,
            ChunkDelta {
                role: Some("assistant".to_string()),
                content: Some(String::new()),
            },
            None,
        );

        let mut fragments = fragments;
        let mut finish_reason: Option<String> = None;
        while let Some(item) = fragments.next().await {
            match item {
                Ok(fragment) => {
                    if !fragment.text.is_empty() {
                        yield chunk_line(
                            &id,
                            created,
                            &model,
                            ChunkDelta {
                                role: None,
                                content: Some(fragment.text),
                            },
                            None,
                        );
                    }
                    if fragment.finish_reason.is_some() {
                        finish_reason = fragment.finish_reason;
                        break;
                    }
                }
                Err(e) => {
                    error!("generation stream failed: {}", e);
                    return;
                }
            }
        }

        yield chunk_line(
            &id,
            created,
            &model,
            ChunkDelta::default(),
            Some(finish_reason.unwrap_or_else(|| DEFAULT_FINISH_REASON.to_string())),
        );
        yield format!("data: {}\n\n", DONE_SENTINEL);
    }
}
