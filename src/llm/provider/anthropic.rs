// src/llm/provider/anthropic.rs
// Anthropic Messages API backend with native tool use, streamed.

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::sse::sse_json_stream;
use super::{BackendEvent, BackendRequest, BackendStream, ContentBlock, Message, ModelBackend, Role, TokenUsage};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicBackend {
    client: Client,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicBackend {
    pub fn new(api_key: String, model: String, max_tokens: u32) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(300))
                .build()
                .unwrap_or_default(),
            api_key,
            model,
            max_tokens,
        }
    }

    fn convert_message(msg: &Message) -> Value {
        let role = match msg.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        let content: Vec<Value> = msg
            .blocks
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => json!({"type": "text", "text": text}),
                ContentBlock::ToolCall { id, name, input } => {
                    json!({"type": "tool_use", "id": id, "name": name, "input": input})
                }
                ContentBlock::ToolResult { id, output, .. } => json!({
                    "type": "tool_result",
                    "tool_use_id": id,
                    "content": output.to_string(),
                }),
            })
            .collect();
        json!({"role": role, "content": content})
    }

    fn build_body(&self, request: &BackendRequest) -> Value {
        let messages: Vec<Value> = request.messages.iter().map(Self::convert_message).collect();
        let mut body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens.min(request.max_tokens),
            "stream": true,
            "system": request.system,
            "messages": messages,
        });
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(request.tools.clone());
        }
        body
    }
}

/// In-flight tool_use block while its arguments stream in.
#[derive(Debug, Default)]
struct ToolBlock {
    id: String,
    name: String,
    partial_json: String,
}

#[async_trait]
impl ModelBackend for AnthropicBackend {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn supports_native_tools(&self) -> bool {
        true
    }

    async fn start(&self, request: BackendRequest) -> Result<BackendStream> {
        let body = self.build_body(&request);
        debug!(model = %self.model, tools = request.tools.len(), "anthropic request");

        let response = self
            .client
            .post(API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "<no body>".into());
            return Err(anyhow!("Anthropic API error {}: {}", status, error_text));
        }

        let mut frames = Box::pin(sse_json_stream(response.bytes_stream()));

        let stream = async_stream::stream! {
            let mut tool_block: Option<ToolBlock> = None;
            let mut usage = TokenUsage::default();
            let mut finish_reason: Option<String> = None;
            let mut done_emitted = false;

            while let Some(frame) = frames.next().await {
                let frame = match frame {
                    Ok(f) => f,
                    Err(e) => {
                        yield Ok(BackendEvent::Error { message: e.to_string() });
                        continue;
                    }
                };

                match frame.get("type").and_then(|t| t.as_str()) {
                    Some("message_start") => {
                        usage.input_tokens = frame["message"]["usage"]["input_tokens"]
                            .as_i64()
                            .unwrap_or(0);
                    }
                    Some("content_block_start") => {
                        let block = &frame["content_block"];
                        if block["type"] == "tool_use" {
                            let id = block["id"].as_str().unwrap_or_default().to_string();
                            let name = block["name"].as_str().unwrap_or_default().to_string();
                            yield Ok(BackendEvent::ToolCallStart { id: id.clone(), name: name.clone() });
                            tool_block = Some(ToolBlock { id, name, partial_json: String::new() });
                        }
                    }
                    Some("content_block_delta") => {
                        let delta = &frame["delta"];
                        match delta.get("type").and_then(|t| t.as_str()) {
                            Some("text_delta") => {
                                if let Some(text) = delta["text"].as_str() {
                                    yield Ok(BackendEvent::TextDelta { delta: text.to_string() });
                                }
                            }
                            Some("input_json_delta") => {
                                if let Some(partial) = delta["partial_json"].as_str() {
                                    if let Some(block) = tool_block.as_mut() {
                                        block.partial_json.push_str(partial);
                                        yield Ok(BackendEvent::ToolCallArgumentsDelta {
                                            id: block.id.clone(),
                                            delta: partial.to_string(),
                                        });
                                    }
                                }
                            }
                            _ => {}
                        }
                    }
                    Some("content_block_stop") => {
                        if let Some(block) = tool_block.take() {
                            let arguments = if block.partial_json.trim().is_empty() {
                                json!({})
                            } else {
                                match serde_json::from_str(&block.partial_json) {
                                    Ok(v) => v,
                                    Err(e) => {
                                        warn!("malformed tool arguments from backend: {}", e);
                                        json!({})
                                    }
                                }
                            };
                            yield Ok(BackendEvent::ToolCallComplete {
                                id: block.id,
                                name: block.name,
                                arguments,
                            });
                        }
                    }
                    Some("message_delta") => {
                        if let Some(reason) = frame["delta"]["stop_reason"].as_str() {
                            finish_reason = Some(reason.to_string());
                        }
                        if let Some(out) = frame["usage"]["output_tokens"].as_i64() {
                            usage.output_tokens = out;
                        }
                    }
                    Some("message_stop") => {
                        usage.total_tokens = usage.input_tokens + usage.output_tokens;
                        done_emitted = true;
                        yield Ok(BackendEvent::Done {
                            usage,
                            finish_reason: finish_reason.clone(),
                        });
                    }
                    Some("error") => {
                        let message = frame["error"]["message"]
                            .as_str()
                            .unwrap_or("unknown backend error")
                            .to_string();
                        yield Ok(BackendEvent::Error { message });
                    }
                    // ping / unknown event types are keepalive noise
                    _ => {}
                }
            }

            if !done_emitted {
                usage.total_tokens = usage.input_tokens + usage.output_tokens;
                yield Ok(BackendEvent::Done { usage, finish_reason });
            }
        };

        Ok(Box::pin(stream))
    }
}
