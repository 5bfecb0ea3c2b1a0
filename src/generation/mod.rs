
use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::config::GenerationConfig;
use crate::{LecternError, Result};

/// One message in the prompt sent to the generation model.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: content.into(),
        }
    }
}

/// One incremental event decoded from the model's response stream.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationEvent {
    /// A fragment of visible answer text.
    Delta(String),
    /// A fragment of the model's thinking trace.
    Reasoning(String),
    /// The model requested a tool invocation.
    ToolCall {
        name: String,
        arguments: serde_json::Value,
    },
    /// The model finished the turn.
    Done,
}

#[derive(Debug, Deserialize)]
struct StreamLine {
    #[serde(default)]
    message: Option<StreamMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct StreamMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    thinking: Option<String>,
    #[serde(default)]
    tool_calls: Vec<StreamToolCall>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCall {
    function: StreamToolFunction,
}

#[derive(Debug, Deserialize)]
struct StreamToolFunction {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

/// Decode one NDJSON line from the generation endpoint into events. A line
/// may carry several at once (content plus tool calls plus the done flag).
fn parse_stream_line(line: &str) -> Result<Vec<GenerationEvent>> {
    let parsed: StreamLine = serde_json::from_str(line)
        .map_err(|e| LecternError::upstream(format!("Invalid generation stream line: {e}")))?;

    let mut events = Vec::new();
    if let Some(message) = parsed.message {
        if let Some(thinking) = message.thinking.filter(|t| !t.is_empty()) {
            events.push(GenerationEvent::Reasoning(thinking));
        }
        if let Some(content) = message.content.filter(|c| !c.is_empty()) {
            events.push(GenerationEvent::Delta(content));
        }
        for call in message.tool_calls {
            events.push(GenerationEvent::ToolCall {
                name: call.function.name,
                arguments: call.function.arguments,
            });
        }
    }
    if parsed.done {
        events.push(GenerationEvent::Done);
    }
    Ok(events)
}

/// Streaming client for the generation model's chat endpoint.
#[derive(Debug, Clone)]
pub struct GenerationClient {
    base_url: Url,
    model: String,
    http: reqwest::Client,
}

impl GenerationClient {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| LecternError::upstream(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: config.base_url()?,
            model: config.model.clone(),
            http,
        })
    }

    /// Start a streaming chat completion. Dropping the returned stream
    /// aborts the request, which cancels generation upstream.
    pub async fn stream_chat(&self, messages: &[ChatMessage]) -> Result<GenerationStream> {
        let url = self
            .base_url
            .join("api/chat")
            .map_err(|e| LecternError::upstream(format!("Invalid generation endpoint: {e}")))?;

        debug!(model = %self.model, messages = messages.len(), "starting generation stream");

        let response = self
            .http
            .post(url)
            .json(&serde_json::json!({
                "model": self.model,
                "messages": messages,
                "stream": true,
            }))
            .send()
            .await
            .map_err(|e| LecternError::upstream(format!("Generation request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "generation endpoint rejected request");
            return Err(LecternError::upstream(format!(
                "Generation endpoint returned {status}: {body}"
            )));
        }

        Ok(GenerationStream {
            bytes: response.bytes_stream().boxed(),
            buffer: bytes::BytesMut::new(),
            pending: std::collections::VecDeque::new(),
            finished: false,
        })
    }
}

/// Pull-based view over the NDJSON response body. Lines and multi-byte
/// characters may be split or coalesced arbitrarily across network reads,
/// so raw bytes are carried between reads and only complete lines are
/// decoded.
pub struct GenerationStream {
    bytes: futures::stream::BoxStream<'static, reqwest::Result<bytes::Bytes>>,
    buffer: bytes::BytesMut,
    pending: std::collections::VecDeque<GenerationEvent>,
    finished: bool,
}

fn decode_line(line: &[u8]) -> Result<&str> {
    std::str::from_utf8(line)
        .map_err(|e| LecternError::upstream(format!("Generation stream is not valid UTF-8: {e}")))
}

impl GenerationStream {
    /// Next event, or `None` once the model reported completion and the
    /// body is drained.
    pub async fn next_event(&mut self) -> Result<Option<GenerationEvent>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                if event == GenerationEvent::Done {
                    self.finished = true;
                }
                return Ok(Some(event));
            }
            if self.finished {
                return Ok(None);
            }

            match self.bytes.next().await {
                Some(chunk) => {
                    let chunk = chunk.map_err(|e| {
                        LecternError::upstream(format!("Generation stream failed: {e}"))
                    })?;
                    self.buffer.extend_from_slice(&chunk);
                    while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
                        let raw = self.buffer.split_to(newline + 1);
                        let line = decode_line(&raw)?.trim();
                        if !line.is_empty() {
                            self.pending.extend(parse_stream_line(line)?);
                        }
                    }
                }
                None => {
                    // Body ended without a done marker.
                    let raw = self.buffer.split();
                    let tail = decode_line(&raw)?.trim();
                    if !tail.is_empty() {
                        self.pending.extend(parse_stream_line(tail)?);
                        continue;
                    }
                    if !self.finished {
                        return Err(LecternError::upstream(
                            "Generation stream ended before completion",
                        ));
                    }
                    return Ok(None);
                }
            }
        }
    }
}

/// Collect an entire stream into its event list. Used by tests and the
/// non-streaming fallback paths.
pub async fn drain_stream(mut stream: GenerationStream) -> Result<Vec<GenerationEvent>> {
    let mut events = Vec::new();
    while let Some(event) = stream.next_event().await? {
        events.push(event);
    }
    Ok(events)
}

/// Abortable timeout wrapper for one whole generation turn.
pub async fn with_turn_timeout<T>(
    duration: Duration,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(duration, fut)
        .await
        .map_err(|_| LecternError::upstream("Generation timed out"))?
}
