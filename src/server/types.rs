// src/server/types.rs
// Request/response bodies for the HTTP surface.

use serde::{Deserialize, Serialize};

/// Single-shot repair request. `error` and `step` are what the client
/// last saw; they are accepted for logging but the loop always
/// re-derives validation state itself.
#[derive(Debug, Deserialize)]
pub struct RepairRequest {
    pub code: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub step: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Chat-style request. The diagram to repair is taken from the newest
/// user turn: its fenced ```mermaid block if present, otherwise the
/// whole turn text.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
}

impl ChatRequest {
    pub fn diagram_source(&self) -> Option<String> {
        let newest_user = self
            .messages
            .iter()
            .rev()
            .find(|m| m.role.eq_ignore_ascii_case("user"))?;
        Some(extract_fenced_block(&newest_user.content))
    }
}

/// Pull the first fenced code block out of chat text; fall back to the
/// text itself when there is no fence.
fn extract_fenced_block(text: &str) -> String {
    let mut in_fence = false;
    let mut block = String::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            if in_fence {
                return block.trim_end().to_string();
            }
            in_fence = true;
            continue;
        }
        if in_fence {
            block.push_str(line);
            block.push('\n');
        }
    }
    if in_fence && !block.trim().is_empty() {
        return block.trim_end().to_string();
    }
    text.trim().to_string()
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub backend: String,
    pub version: &'static str,
}
