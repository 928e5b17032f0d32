// src/llm/provider/mod.rs
// Backend trait and transcript types shared by every provider.

use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod anthropic;
pub mod deepseek;
pub mod sse;
pub mod stream;

pub use stream::BackendEvent;

use crate::config::MermendConfig;
use crate::llm::emulation::JsonToolEmulation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One piece of a conversation turn. Tool calls and tool results are
/// first-class blocks so the compactor can reason about them directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolCall { id: String, name: String, input: Value },
    ToolResult { id: String, name: String, output: Value },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub blocks: Vec<ContentBlock>,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            blocks: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn assistant(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            blocks,
        }
    }

    pub fn tool_result(id: impl Into<String>, name: impl Into<String>, output: Value) -> Self {
        Self {
            role: Role::User,
            blocks: vec![ContentBlock::ToolResult {
                id: id.into(),
                name: name.into(),
                output,
            }],
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        self.blocks
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolCall { .. }))
    }

    pub fn has_tool_results(&self) -> bool {
        self.blocks
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolResult { .. }))
    }

    /// Concatenated text content, ignoring tool blocks.
    pub fn text(&self) -> String {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone)]
pub struct BackendRequest {
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<Value>,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }
}

pub type BackendStream = Pin<Box<dyn Stream<Item = Result<BackendEvent>> + Send>>;

/// Universal model backend interface. Concrete implementations are
/// selected by configuration; the orchestrator never branches on them.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Backend name for logging/debugging.
    fn name(&self) -> &'static str;

    /// Whether the provider runtime understands declared tools. Backends
    /// answering false are expected to be wrapped in the JSON emulation
    /// decorator before the orchestrator sees them.
    fn supports_native_tools(&self) -> bool {
        false
    }

    /// Start one model round over the given transcript.
    async fn start(&self, request: BackendRequest) -> Result<BackendStream>;
}

/// Build the configured backend. Text-only backends come back wrapped in
/// the emulation decorator so every caller sees the same tool contract.
pub fn backend_from_config(config: &MermendConfig) -> Result<Arc<dyn ModelBackend>> {
    match config.backend.as_str() {
        "anthropic" => {
            let api_key = config
                .anthropic_api_key
                .clone()
                .ok_or_else(|| anyhow::anyhow!("ANTHROPIC_API_KEY is not set"))?;
            Ok(Arc::new(anthropic::AnthropicBackend::new(
                api_key,
                config.anthropic_model.clone(),
                config.max_output_tokens,
            )))
        }
        "deepseek" => {
            let api_key = config
                .deepseek_api_key
                .clone()
                .ok_or_else(|| anyhow::anyhow!("DEEPSEEK_API_KEY is not set"))?;
            let inner = deepseek::DeepSeekBackend::new(
                api_key,
                config.deepseek_model.clone(),
                config.max_output_tokens,
            );
            Ok(Arc::new(JsonToolEmulation::new(Arc::new(inner))))
        }
        other => Err(anyhow::anyhow!("unknown backend '{}'", other)),
    }
}
