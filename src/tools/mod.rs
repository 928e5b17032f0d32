// src/tools/mod.rs
// The single tool the repair loop exposes: propose a candidate, get the
// validator's verdict back. Every backend path funnels through
// `ToolExecutor::execute`, so there is exactly one source of truth for
// "did this candidate parse".

use anyhow::Result;
use serde_json::{json, Value};
use tracing::debug;

use crate::validator::DiagramValidator;

pub const VALIDATE_TOOL: &str = "validate_diagram";

/// Declared input schema for native-calling backends.
pub fn validate_tool_schema() -> Value {
    json!({
        "name": VALIDATE_TOOL,
        "description": "Validate a proposed Mermaid diagram fix. Always call this with your candidate before giving a final answer.",
        "input_schema": {
            "type": "object",
            "properties": {
                "candidateCode": {
                    "type": "string",
                    "description": "The complete proposed diagram source, no markdown fences"
                },
                "explanation": {
                    "type": "string",
                    "description": "One or two sentences describing the fix"
                }
            },
            "required": ["candidateCode", "explanation"]
        }
    })
}

/// A proposed fix extracted from tool-call arguments.
#[derive(Debug, Clone)]
pub struct Proposal {
    pub candidate_code: String,
    pub explanation: String,
}

impl Proposal {
    /// Accepts both the tool schema key (`candidateCode`) and the final
    /// answer key (`fixedCode`) since emulated backends use one object
    /// shape for both.
    pub fn from_arguments(arguments: &Value) -> Option<Self> {
        let candidate_code = arguments
            .get("candidateCode")
            .or_else(|| arguments.get("fixedCode"))
            .and_then(|v| v.as_str())?
            .to_string();
        let explanation = arguments
            .get("explanation")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        Some(Self {
            candidate_code,
            explanation,
        })
    }
}

pub struct ToolExecutor {
    validator: DiagramValidator,
}

impl ToolExecutor {
    pub fn new(validator: DiagramValidator) -> Self {
        Self { validator }
    }

    pub fn validator(&self) -> &DiagramValidator {
        &self.validator
    }

    /// Execute a tool by name. The body of the only tool is exactly one
    /// validator call plus result shaping.
    pub fn execute(&self, tool_name: &str, arguments: &Value) -> Result<Value> {
        match tool_name {
            VALIDATE_TOOL => self.execute_validate(arguments),
            _ => Err(anyhow::anyhow!("Unknown tool: {}", tool_name)),
        }
    }

    fn execute_validate(&self, arguments: &Value) -> Result<Value> {
        let proposal = Proposal::from_arguments(arguments)
            .ok_or_else(|| anyhow::anyhow!("Missing 'candidateCode' parameter"))?;

        let result = self.validator.validate(&proposal.candidate_code);
        debug!(validated = result.is_valid, "tool validation");

        let mut output = json!({
            "candidateCode": proposal.candidate_code,
            "validated": result.is_valid,
        });
        if let Some(error) = result.error_message {
            output["validationError"] = json!(error);
        }
        if !result.hints.is_empty() {
            output["hints"] = json!(result.hints);
        }
        Ok(output)
    }
}
