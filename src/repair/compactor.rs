// src/repair/compactor.rs
// Bounds transcript growth between steps. Superseded tool-call/result
// pairs are token-expensive and decision-irrelevant once the next prompt
// restates the current failing state, and some backends reject requests
// that reference dangling tool-call ids.

use crate::llm::{Message, Role};

/// Compact a transcript in place:
/// 1. no tool result anywhere -> untouched;
/// 2. the newest tool-result message survives;
/// 3. the assistant tool-call message that triggered it survives;
/// 4. every other message carrying tool-call or tool-result content is
///    dropped; plain turns are kept.
pub fn compact(messages: &mut Vec<Message>) {
    let Some(last_result_idx) = messages.iter().rposition(|m| m.has_tool_results()) else {
        return;
    };
    let trigger_idx = messages[..last_result_idx]
        .iter()
        .rposition(|m| m.role == Role::Assistant && m.has_tool_calls());

    let mut idx = 0;
    messages.retain(|m| {
        let keep = idx == last_result_idx
            || Some(idx) == trigger_idx
            || (!m.has_tool_calls() && !m.has_tool_results());
        idx += 1;
        keep
    });
}
