//! Anthropic Claude provider implementation (streaming Messages API)

use super::types::*;
use super::{LlmError, LlmService};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;

const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Anthropic service implementation
pub struct AnthropicService {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    max_tokens: u32,
}

impl AnthropicService {
    pub fn new(api_key: String, model: String, gateway: Option<&str>, max_tokens: u32) -> Self {
        let base_url = match gateway {
            Some(gw) => format!("{}/_/gateway/anthropic/v1/messages", gw.trim_end_matches('/')),
            None => "https://api.anthropic.com/v1/messages".to_string(),
        };

        // Streams can legitimately stay open for a long time; only bound connect
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            client,
            api_key,
            model,
            base_url,
            max_tokens,
        }
    }

    fn translate_request(&self, request: &LlmRequest) -> AnthropicRequest {
        let system: Vec<AnthropicSystemBlock> = request
            .system
            .iter()
            .map(|s| AnthropicSystemBlock {
                r#type: "text".to_string(),
                text: s.text.clone(),
                cache_control: if s.cache {
                    Some(CacheControl {
                        r#type: "ephemeral".to_string(),
                    })
                } else {
                    None
                },
            })
            .collect();

        let messages: Vec<AnthropicMessage> = request.messages.iter().map(translate_turn).collect();

        let tools: Vec<AnthropicTool> = request
            .tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.input_schema.clone(),
            })
            .collect();

        AnthropicRequest {
            model: self.model.clone(),
            max_tokens: request.max_tokens.unwrap_or(if self.max_tokens == 0 {
                DEFAULT_MAX_TOKENS
            } else {
                self.max_tokens
            }),
            system,
            messages,
            tools: if tools.is_empty() { None } else { Some(tools) },
            stream: true,
        }
    }
}

fn translate_turn(turn: &Turn) -> AnthropicMessage {
    let role = match turn.role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
    };

    let content: Vec<AnthropicContentBlock> = turn
        .content
        .iter()
        .map(|block| match block {
            ContentBlock::Text { text } => AnthropicContentBlock::Text { text: text.clone() },
            ContentBlock::Image { media_type, data } => AnthropicContentBlock::Image {
                source: AnthropicImageSource {
                    r#type: "base64".to_string(),
                    media_type: media_type.clone(),
                    data: data.clone(),
                },
            },
            ContentBlock::ToolUse { id, name, input } => AnthropicContentBlock::ToolUse {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            },
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => AnthropicContentBlock::ToolResult {
                tool_use_id: tool_use_id.clone(),
                content: content.clone(),
                is_error: *is_error,
            },
        })
        .collect();

    AnthropicMessage {
        role: role.to_string(),
        content,
    }
}

fn classify_error(status: reqwest::StatusCode, body: &str) -> LlmError {
    match status.as_u16() {
        401 | 403 => LlmError::auth(format!("Authentication failed: {body}")),
        429 => LlmError::rate_limit(format!("Rate limited: {body}")),
        400 => LlmError::invalid_request(format!("Invalid request: {body}")),
        500..=599 => LlmError::server_error(format!("Server error: {body}")),
        _ => LlmError::malformed(format!("HTTP {status}: {body}")),
    }
}

#[async_trait]
impl LlmService for AnthropicService {
    async fn stream(
        &self,
        request: &LlmRequest,
        deltas: mpsc::UnboundedSender<String>,
    ) -> Result<LlmResponse, LlmError> {
        let anthropic_request = self.translate_request(request);

        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&anthropic_request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::network(format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    LlmError::network(format!("Connection failed: {e}"))
                } else {
                    LlmError::malformed(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_error(status, &body));
        }

        let mut parser = SseParser::default();
        let mut accumulator = StreamAccumulator::default();
        let mut byte_stream = response.bytes_stream();

        while let Some(chunk) = byte_stream.next().await {
            let bytes = chunk.map_err(|e| LlmError::network(format!("Stream interrupted: {e}")))?;
            for data in parser.push(&String::from_utf8_lossy(&bytes)) {
                let Ok(event) = serde_json::from_str::<Value>(&data) else {
                    tracing::debug!(data = %data, "Skipping unparseable SSE payload");
                    continue;
                };
                if accumulator.handle(&event, &deltas)? {
                    return accumulator.finish();
                }
            }
        }

        Err(LlmError::network("Stream ended before message_stop"))
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// SSE parsing
// ============================================================================

/// Splits a byte stream into SSE `data:` payloads
#[derive(Default)]
struct SseParser {
    buffer: String,
}

impl SseParser {
    /// Feed a chunk, returning every complete `data:` payload it finished
    fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let rest = self.buffer.split_off(pos + 1);
            let line = std::mem::replace(&mut self.buffer, rest);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(data) = line.strip_prefix("data:") {
                payloads.push(data.trim_start().to_string());
            }
        }
        payloads
    }
}

/// A content block being assembled from stream events
#[derive(Debug)]
enum PartialBlock {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        json: String,
    },
}

/// Assembles Anthropic stream events into a final response.
///
/// Events: `message_start`, `content_block_start`, `content_block_delta`
/// (`text_delta` / `input_json_delta`), `content_block_stop`,
/// `message_delta` (stop reason, output usage), `message_stop`, `error`.
#[derive(Debug, Default)]
struct StreamAccumulator {
    blocks: BTreeMap<u64, PartialBlock>,
    stop_reason: Option<String>,
    usage: Usage,
}

impl StreamAccumulator {
    /// Apply one event. Returns `Ok(true)` once the message is complete.
    fn handle(&mut self, event: &Value, deltas: &mpsc::UnboundedSender<String>) -> Result<bool, LlmError> {
        let index = event.get("index").and_then(Value::as_u64).unwrap_or(0);
        match event.get("type").and_then(Value::as_str).unwrap_or("") {
            "message_start" => {
                let usage = &event["message"]["usage"];
                self.usage.input_tokens = usage["input_tokens"].as_u64().unwrap_or(0);
                self.usage.cache_creation_tokens =
                    usage["cache_creation_input_tokens"].as_u64().unwrap_or(0);
                self.usage.cache_read_tokens = usage["cache_read_input_tokens"].as_u64().unwrap_or(0);
            }
            "content_block_start" => {
                let block = &event["content_block"];
                let partial = match block["type"].as_str() {
                    Some("tool_use") => PartialBlock::ToolUse {
                        id: block["id"].as_str().unwrap_or_default().to_string(),
                        name: block["name"].as_str().unwrap_or_default().to_string(),
                        json: String::new(),
                    },
                    _ => PartialBlock::Text(block["text"].as_str().unwrap_or_default().to_string()),
                };
                self.blocks.insert(index, partial);
            }
            "content_block_delta" => {
                let delta = &event["delta"];
                match (delta["type"].as_str(), self.blocks.get_mut(&index)) {
                    (Some("text_delta"), Some(PartialBlock::Text(text))) => {
                        if let Some(piece) = delta["text"].as_str() {
                            text.push_str(piece);
                            // Receiver may be gone when the caller only wants the final response
                            let _ = deltas.send(piece.to_string());
                        }
                    }
                    (Some("input_json_delta"), Some(PartialBlock::ToolUse { json, .. })) => {
                        if let Some(piece) = delta["partial_json"].as_str() {
                            json.push_str(piece);
                        }
                    }
                    _ => {}
                }
            }
            "message_delta" => {
                if let Some(reason) = event["delta"]["stop_reason"].as_str() {
                    self.stop_reason = Some(reason.to_string());
                }
                if let Some(output) = event["usage"]["output_tokens"].as_u64() {
                    self.usage.output_tokens = output;
                }
            }
            "message_stop" => return Ok(true),
            "error" => {
                let message = event["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown stream error")
                    .to_string();
                return Err(match event["error"]["type"].as_str() {
                    Some("overloaded_error" | "api_error") => LlmError::server_error(message),
                    Some("rate_limit_error") => LlmError::rate_limit(message),
                    Some("invalid_request_error") => LlmError::invalid_request(message),
                    _ => LlmError::malformed(message),
                });
            }
            // content_block_stop, ping
            _ => {}
        }
        Ok(false)
    }

    fn finish(self) -> Result<LlmResponse, LlmError> {
        let mut content = Vec::with_capacity(self.blocks.len());
        for block in self.blocks.into_values() {
            match block {
                PartialBlock::Text(text) => {
                    if !text.is_empty() {
                        content.push(ContentBlock::Text { text });
                    }
                }
                PartialBlock::ToolUse { id, name, json } => {
                    let input = if json.trim().is_empty() {
                        Value::Object(serde_json::Map::new())
                    } else {
                        serde_json::from_str(&json).map_err(|e| {
                            LlmError::malformed(format!("Invalid tool input for {name}: {e}"))
                        })?
                    };
                    content.push(ContentBlock::ToolUse { id, name, input });
                }
            }
        }

        Ok(LlmResponse {
            content,
            end_turn: self.stop_reason.as_deref() == Some("end_turn"),
            usage: self.usage,
        })
    }
}

// Anthropic API types

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    system: Vec<AnthropicSystemBlock>,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<AnthropicTool>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct AnthropicSystemBlock {
    r#type: String,
    text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<CacheControl>,
}

#[derive(Debug, Serialize)]
struct CacheControl {
    r#type: String,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: Vec<AnthropicContentBlock>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text { text: String },
    Image { source: AnthropicImageSource },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicImageSource {
    r#type: String,
    media_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}
