//! Anthropic Messages API transport

use super::*;
use crate::config::TransportConfig;
use crate::error::{Error, ErrorKind};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

const API_VERSION: &str = "2023-06-01";

type SharedHistory = Arc<Mutex<Vec<AnthropicMessage>>>;

/// Streams replies from the Messages API and keeps the conversation.
///
/// The API is stateless, so every query resends the whole history. The
/// assistant's reply is appended once its stream reaches `message_stop`.
pub struct AnthropicTransport {
    config: TransportConfig,
    client: Option<Client>,
    messages: SharedHistory,
    pending: Option<reqwest::Response>,
}

impl AnthropicTransport {
    /// Unconnected transport; call `connect` before querying
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            client: None,
            messages: Arc::new(Mutex::new(Vec::new())),
            pending: None,
        }
    }

    /// Endpoint settings in use
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Number of messages in the running conversation
    pub fn history_len(&self) -> usize {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Forget the conversation, keeping the connection
    pub fn reset(&mut self) {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner).clear();
        self.pending = None;
    }

    fn build_request(&self) -> AnthropicRequest {
        let messages = self.messages.lock().unwrap_or_else(PoisonError::into_inner).clone();
        AnthropicRequest {
            model: self.config.model.clone(),
            messages,
            system: self.config.system_prompt.clone(),
            max_tokens: self.config.max_tokens,
            stream: true,
            thinking: self.config.thinking_budget.map(|budget_tokens| ThinkingConfig {
                kind: "enabled".into(),
                budget_tokens,
            }),
        }
    }
}

impl AgentTransport for AnthropicTransport {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn connect(&mut self) -> Result<()> {
        if self.config.api_key.is_none() {
            return Err(Error::new(ErrorKind::AuthenticationFailed, "no API key configured"));
        }
        let client = Client::builder()
            .timeout(self.config.timeout())
            .build()
            .map_err(|e| error::network_failed(format!("failed to create HTTP client: {}", e)).set_source(e))?;
        self.client = Some(client);
        info!(model = %self.config.model, base_url = %self.config.base_url, "anthropic transport connected");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.client = None;
        self.pending = None;
        Ok(())
    }

    async fn query(&mut self, input: &str) -> Result<()> {
        let client = self.client.as_ref().ok_or_else(error::not_connected)?;
        let api_key = self.config.api_key.as_deref().unwrap_or_default();

        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(AnthropicMessage::user(input));
        let request = self.build_request();

        let mut req = client
            .post(format!("{}/messages", self.config.base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&request);

        for (key, value) in &self.config.headers {
            req = req.header(key, value);
        }

        debug!(messages = request.messages.len(), "sending query");
        // On any failure the user turn was never accepted and leaves the history.
        let response = match req.send().await {
            Ok(response) => response,
            Err(e) => {
                forget_unanswered(&self.messages);
                return Err(error::network_failed(format!("request failed: {}", e))
                    .with_operation("AnthropicTransport::query")
                    .set_source(e));
            }
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            forget_unanswered(&self.messages);
            return Err(error::http_status(status, text).with_operation("AnthropicTransport::query"));
        }

        self.pending = Some(response);
        Ok(())
    }

    async fn receive_response(&mut self) -> Result<ResponseStream> {
        let response = self
            .pending
            .take()
            .ok_or_else(|| error::stream_failed("no query in flight"))?;
        let history = self.messages.clone();

        let stream = async_stream::stream! {
            let mut byte_stream = response.bytes_stream();
            let mut sse = SseBuffer::default();
            let mut blocks: HashMap<usize, PendingBlock> = HashMap::new();
            let mut reply_text = String::new();
            let mut stats = TurnStats::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        forget_unanswered(&history);
                        yield ResponseUnit::Error(e.to_string());
                        return;
                    }
                };
                sse.push(&bytes);

                while let Some(event) = sse.next_event() {
                    let Some((event_type, data)) = parse_sse_event(&event) else {
                        continue;
                    };

                    match event_type.as_str() {
                        "message_start" => {
                            if let Ok(start) = serde_json::from_str::<MessageStart>(&data) {
                                stats.input_tokens = start.message.usage.input_tokens;
                            }
                        }
                        "content_block_start" => {
                            if let Ok(start) = serde_json::from_str::<ContentBlockStart>(&data) {
                                blocks.insert(start.index, PendingBlock::from(start.content_block));
                            }
                        }
                        "content_block_delta" => {
                            if let Ok(delta) = serde_json::from_str::<ContentBlockDelta>(&data) {
                                if let Some(block) = blocks.get_mut(&delta.index) {
                                    block.apply(delta.delta);
                                }
                            }
                        }
                        "content_block_stop" => {
                            if let Ok(stop) = serde_json::from_str::<ContentBlockStop>(&data) {
                                if let Some(block) = blocks.remove(&stop.index) {
                                    if let PendingBlock::Text(text) = &block {
                                        reply_text.push_str(text);
                                    }
                                    if let Some(unit) = block.finish() {
                                        yield unit;
                                    }
                                }
                            }
                        }
                        "message_delta" => {
                            if let Ok(delta) = serde_json::from_str::<MessageDelta>(&data) {
                                if let Some(usage) = delta.usage {
                                    stats.output_tokens = usage.output_tokens;
                                }
                            }
                        }
                        "message_stop" => {
                            if !reply_text.is_empty() {
                                history
                                    .lock()
                                    .unwrap_or_else(PoisonError::into_inner)
                                    .push(AnthropicMessage::assistant(&reply_text));
                            }
                            yield ResponseUnit::Result(stats.clone());
                            return;
                        }
                        "error" => {
                            let message = serde_json::from_str::<StreamError>(&data)
                                .map(|e| e.error.message)
                                .unwrap_or(data);
                            forget_unanswered(&history);
                            yield ResponseUnit::Error(message);
                            return;
                        }
                        _ => {}
                    }
                }
            }

            warn!("response stream ended without message_stop");
            forget_unanswered(&history);
            yield ResponseUnit::Error("response stream ended unexpectedly".to_string());
        };

        Ok(ResponseStream::new(stream))
    }
}

/// Drop the trailing user turn of a query that got no reply
fn forget_unanswered(history: &SharedHistory) {
    let mut messages = history.lock().unwrap_or_else(PoisonError::into_inner);
    if messages.last().is_some_and(|m| m.role == "user") {
        messages.pop();
    }
}

/// Raw SSE bytes, cut into events only once an event is complete.
///
/// Network chunks may split a multi-byte character, so decoding waits for
/// the blank line that ends the event.
#[derive(Debug, Default)]
struct SseBuffer {
    bytes: Vec<u8>,
}

impl SseBuffer {
    fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    fn next_event(&mut self) -> Option<String> {
        let pos = self.bytes.windows(2).position(|w| w == b"\n\n")?;
        let event = String::from_utf8_lossy(&self.bytes[..pos]).into_owned();
        self.bytes.drain(..pos + 2);
        Some(event)
    }
}

fn parse_sse_event(event: &str) -> Option<(String, String)> {
    let mut event_type = None;
    let mut event_data = None;
    for line in event.lines() {
        if let Some(t) = line.strip_prefix("event: ") {
            event_type = Some(t.trim().to_string());
        } else if let Some(d) = line.strip_prefix("data: ") {
            event_data = Some(d.to_string());
        }
    }
    Some((event_type?, event_data?))
}

/// A content block being assembled from deltas
#[derive(Debug)]
enum PendingBlock {
    Text(String),
    Thinking(String),
    ToolUse { id: String, name: String, json: String },
    Other,
}

impl From<StartBlock> for PendingBlock {
    fn from(block: StartBlock) -> Self {
        match block {
            StartBlock::Text { text } => PendingBlock::Text(text),
            StartBlock::Thinking { thinking } => PendingBlock::Thinking(thinking),
            StartBlock::ToolUse { id, name } => PendingBlock::ToolUse {
                id,
                name,
                json: String::new(),
            },
            StartBlock::Other => PendingBlock::Other,
        }
    }
}

impl PendingBlock {
    fn apply(&mut self, delta: DeltaContent) {
        match (self, delta) {
            (PendingBlock::Text(buf), DeltaContent::TextDelta { text }) => buf.push_str(&text),
            (PendingBlock::Thinking(buf), DeltaContent::ThinkingDelta { thinking }) => {
                buf.push_str(&thinking)
            }
            (PendingBlock::ToolUse { json, .. }, DeltaContent::InputJsonDelta { partial_json }) => {
                json.push_str(&partial_json)
            }
            _ => {}
        }
    }

    fn finish(self) -> Option<ResponseUnit> {
        match self {
            PendingBlock::Text(text) => Some(ResponseUnit::Text(text)),
            PendingBlock::Thinking(thinking) => Some(ResponseUnit::Thinking(thinking)),
            PendingBlock::ToolUse { id, name, json } => {
                let input = if json.trim().is_empty() {
                    serde_json::Value::Object(Default::default())
                } else {
                    serde_json::from_str(&json).unwrap_or(serde_json::Value::String(json))
                };
                Some(ResponseUnit::ToolUse { id, name, input })
            }
            PendingBlock::Other => None,
        }
    }
}

// ============================================================================
// Anthropic API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    max_tokens: usize,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<ThinkingConfig>,
}

#[derive(Debug, Serialize)]
struct ThinkingConfig {
    #[serde(rename = "type")]
    kind: String,
    budget_tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

impl AnthropicMessage {
    fn user(content: &str) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    fn assistant(content: &str) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessageStart {
    message: MessageStartInfo,
}

#[derive(Debug, Deserialize)]
struct MessageStartInfo {
    usage: StartUsage,
}

#[derive(Debug, Deserialize)]
struct StartUsage {
    #[serde(default)]
    input_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct ContentBlockStart {
    index: usize,
    content_block: StartBlock,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StartBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    ToolUse {
        id: String,
        name: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ContentBlockDelta {
    index: usize,
    delta: DeltaContent,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum DeltaContent {
    TextDelta { text: String },
    ThinkingDelta { thinking: String },
    InputJsonDelta { partial_json: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ContentBlockStop {
    index: usize,
}

#[derive(Debug, Deserialize)]
struct MessageDelta {
    usage: Option<DeltaUsage>,
}

#[derive(Debug, Deserialize)]
struct DeltaUsage {
    output_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    error: StreamErrorBody,
}

#[derive(Debug, Deserialize)]
struct StreamErrorBody {
    message: String,
}
