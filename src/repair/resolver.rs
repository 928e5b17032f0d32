// src/repair/resolver.rs
// Extracts `{fixed_code, explanation}` once the loop halts, via ordered
// fallback. The caller performs the final independent re-validation; a
// stage here only chooses what to validate.

use serde_json::Value;
use tracing::debug;

use super::RepairAttempt;
use crate::tools::Proposal;

/// Which fallback stage produced the resolution. Ordered by preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedVia {
    ValidatedAttempt,
    StructuredChannel,
    RawTextJson,
    LastAttempt,
    OriginalEcho,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub fixed_code: String,
    pub explanation: String,
    pub via: ResolvedVia,
    /// What the producing stage claimed about validity, for the
    /// soundness cross-check against the final independent validation.
    pub claimed_validated: bool,
}

/// Unwrap one fenced code block, if the whole text is one.
fn unfence(text: &str) -> &str {
    crate::validator::normalize::strip_fence(text).trim()
}

fn parse_json_proposal(text: &str) -> Option<Proposal> {
    let value: Value = serde_json::from_str(unfence(text)).ok()?;
    Proposal::from_arguments(&value)
}

pub fn resolve(
    original_code: &str,
    attempts: &[RepairAttempt],
    structured: Option<&Proposal>,
    raw_text: &str,
) -> Resolution {
    // Stage 0: earliest attempt the validator accepted.
    if let Some(attempt) = attempts.iter().find(|a| a.validated) {
        return Resolution {
            fixed_code: attempt.candidate_code.clone(),
            explanation: attempt.explanation.clone(),
            via: ResolvedVia::ValidatedAttempt,
            claimed_validated: true,
        };
    }

    // Stage 1: the structured/partial-output channel.
    if let Some(proposal) = structured {
        debug!("resolving from structured channel");
        return Resolution {
            fixed_code: proposal.candidate_code.clone(),
            explanation: proposal.explanation.clone(),
            via: ResolvedVia::StructuredChannel,
            claimed_validated: false,
        };
    }

    // Stage 2: direct JSON parse of the accumulated raw text.
    if let Some(proposal) = parse_json_proposal(raw_text) {
        debug!("resolving from raw-text JSON");
        return Resolution {
            fixed_code: proposal.candidate_code,
            explanation: proposal.explanation,
            via: ResolvedVia::RawTextJson,
            claimed_validated: false,
        };
    }

    // Stage 3: the last recorded attempt, even though invalid.
    if let Some(attempt) = attempts.last() {
        let explanation = match &attempt.validation_error {
            Some(err) => format!("Best-effort fix; still fails validation: {err}"),
            None => "Best-effort fix; validation status unknown.".to_string(),
        };
        return Resolution {
            fixed_code: attempt.candidate_code.clone(),
            explanation,
            via: ResolvedVia::LastAttempt,
            claimed_validated: false,
        };
    }

    // Stage 4: nothing resolved; echo the caller's code as a no-op fix.
    let explanation = if raw_text.trim().is_empty() {
        "The model produced no usable fix; returning the original diagram unchanged.".to_string()
    } else {
        raw_text.trim().to_string()
    };
    Resolution {
        fixed_code: original_code.to_string(),
        explanation,
        via: ResolvedVia::OriginalEcho,
        claimed_validated: false,
    }
}
