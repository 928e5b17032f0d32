// src/llm/provider/stream.rs
// Events emitted by a backend while streaming one model round.

use serde_json::Value;

use super::TokenUsage;

#[derive(Debug, Clone)]
pub enum BackendEvent {
    /// Text delta - forward to the client immediately.
    TextDelta { delta: String },

    /// Tool call started; arguments follow as deltas.
    ToolCallStart { id: String, name: String },

    /// Tool call arguments chunk.
    ToolCallArgumentsDelta { id: String, delta: String },

    /// Tool call complete - ready to execute.
    ToolCallComplete {
        id: String,
        name: String,
        arguments: Value,
    },

    /// Round completed.
    Done {
        usage: TokenUsage,
        finish_reason: Option<String>,
    },

    /// Stream failed mid-round; the loop degrades instead of aborting.
    Error { message: String },
}
