// src/validator/mod.rs
// The deterministic authority on diagram validity. Everything the repair
// loop decides — entry gating, tool results, the final verdict — comes
// through `DiagramValidator::validate`.

use serde::{Deserialize, Serialize};

pub mod heuristics;
pub mod lint;
pub mod normalize;
pub mod parser;

pub use normalize::normalize;

pub const EMPTY_DIAGRAM_ERROR: &str = "diagram source is empty after normalization";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagram_type: Option<String>,
    pub is_likely_mermaid_like: bool,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub hints: Vec<String>,
}

impl ValidationResult {
    fn valid(diagram_type: String) -> Self {
        Self {
            is_valid: true,
            error_message: None,
            diagram_type: Some(diagram_type),
            is_likely_mermaid_like: true,
            hints: Vec::new(),
        }
    }

    fn invalid(error: String, mermaid_like: bool, hints: Vec<String>) -> Self {
        Self {
            is_valid: false,
            error_message: Some(error),
            diagram_type: None,
            is_likely_mermaid_like: mermaid_like,
            hints,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiagramValidator {
    max_hints: usize,
}

impl DiagramValidator {
    pub fn new(max_hints: usize) -> Self {
        Self { max_hints }
    }

    /// Normalize and validate raw diagram source. Hints are attached only
    /// on failure and never affect `is_valid`.
    pub fn validate(&self, raw: &str) -> ValidationResult {
        let source = normalize(raw);
        if source.is_empty() {
            return ValidationResult::invalid(EMPTY_DIAGRAM_ERROR.to_string(), false, Vec::new());
        }

        let mermaid_like = heuristics::is_likely_mermaid_like(&source);

        match parser::parse(&source) {
            Ok(diagram_type) => ValidationResult::valid(diagram_type),
            Err(err) => {
                let hints = lint::lint(&source, self.max_hints);
                ValidationResult::invalid(err.to_string(), mermaid_like, hints)
            }
        }
    }
}

impl Default for DiagramValidator {
    fn default() -> Self {
        Self::new(crate::config::CONFIG.max_hints)
    }
}
