// src/llm/provider/deepseek.rs
// DeepSeek Chat API backend (OpenAI-compatible), streaming, text only.
// Tool-calling semantics are layered on top by the emulation decorator.

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use super::sse::sse_json_stream;
use super::{BackendEvent, BackendRequest, BackendStream, ContentBlock, Message, ModelBackend, Role, TokenUsage};

const API_URL: &str = "https://api.deepseek.com/chat/completions";

pub struct DeepSeekBackend {
    client: Client,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl DeepSeekBackend {
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

    /// Flatten a transcript message to plain text. Tool blocks appear in
    /// the transcript even for text-only backends; they are rendered as
    /// the JSON the model emitted and the result text it should read.
    fn flatten(msg: &Message) -> Value {
        let role = match msg.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        let text = msg
            .blocks
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => text.clone(),
                ContentBlock::ToolCall { input, .. } => input.to_string(),
                ContentBlock::ToolResult { name, output, .. } => {
                    format!("{} result: {}", name, output)
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        json!({"role": role, "content": text})
    }

    fn build_body(&self, request: &BackendRequest) -> Value {
        let mut messages = vec![json!({"role": "system", "content": request.system})];
        messages.extend(request.messages.iter().map(Self::flatten));
        json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": self.max_tokens.min(request.max_tokens),
            "stream": true,
            "stream_options": {"include_usage": true},
        })
    }
}

#[async_trait]
impl ModelBackend for DeepSeekBackend {
    fn name(&self) -> &'static str {
        "deepseek"
    }

    async fn start(&self, request: BackendRequest) -> Result<BackendStream> {
        let body = self.build_body(&request);
        debug!(model = %self.model, "deepseek request");

        let response = self
            .client
            .post(API_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "<no body>".into());
            return Err(anyhow!("DeepSeek API error {}: {}", status, error_text));
        }

        let mut frames = Box::pin(sse_json_stream(response.bytes_stream()));

        let stream = async_stream::stream! {
            let mut usage = TokenUsage::default();
            let mut finish_reason: Option<String> = None;

            while let Some(frame) = frames.next().await {
                let frame = match frame {
                    Ok(f) => f,
                    Err(e) => {
                        yield Ok(BackendEvent::Error { message: e.to_string() });
                        continue;
                    }
                };

                // The final chunk carries usage with an empty choices array.
                if let Some(u) = frame.get("usage").filter(|u| !u.is_null()) {
                    usage.input_tokens = u["prompt_tokens"].as_i64().unwrap_or(0);
                    usage.output_tokens = u["completion_tokens"].as_i64().unwrap_or(0);
                    usage.total_tokens = u["total_tokens"].as_i64().unwrap_or(0);
                }

                let choice = &frame["choices"][0];
                if let Some(reason) = choice["finish_reason"].as_str() {
                    finish_reason = Some(reason.to_string());
                }
                if let Some(delta) = choice["delta"]["content"].as_str() {
                    if !delta.is_empty() {
                        yield Ok(BackendEvent::TextDelta { delta: delta.to_string() });
                    }
                }
            }

            if usage.total_tokens == 0 {
                usage.total_tokens = usage.input_tokens + usage.output_tokens;
            }
            yield Ok(BackendEvent::Done { usage, finish_reason });
        };

        Ok(Box::pin(stream))
    }
}
