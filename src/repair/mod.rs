// src/repair/mod.rs
// The repair state machine and its supporting pieces.

pub mod compactor;
pub mod orchestrator;
pub mod prompt;
pub mod resolver;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::llm::TokenUsage;

/// One tool invocation's outcome. Immutable once created; the attempts
/// list is append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairAttempt {
    pub candidate_code: String,
    pub explanation: String,
    pub validated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_error: Option<String>,
}

/// The authoritative result of one repair run. `validated` is always
/// recomputed by the validator on `fixed_code`, never copied from a
/// model or tool claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalOutcome {
    pub success: bool,
    pub is_complete: bool,
    pub fixed_code: String,
    pub explanation: String,
    pub validated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_error: Option<String>,
    pub attempts: Vec<RepairAttempt>,
    pub usage: TokenUsage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    pub steps_count: usize,
}

/// Step-level events surfaced to the caller while a run is in flight.
/// The wire encoding (count, timestamp) is layered on by the stream
/// encoder; the finish line is written by the owner of the stream so it
/// happens exactly once even when the run errors.
#[derive(Debug, Clone)]
pub enum RunEvent {
    TextDelta { delta: String },
    ToolCall { name: String, arguments: Value },
    ToolResult { name: String, output: Value },
    Error { message: String },
}

/// Errors that abort a run before the loop starts. Everything that can
/// happen mid-loop degrades into the `FinalOutcome` instead.
#[derive(Debug, Error)]
pub enum RepairError {
    #[error("input does not look like a Mermaid diagram")]
    NotDiagramInput,
    #[error("event sink rejected the run: {0}")]
    Sink(#[source] anyhow::Error),
}
