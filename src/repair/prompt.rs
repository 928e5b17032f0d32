// src/repair/prompt.rs
// System and per-step prompts for the repair loop.

pub const SYSTEM_PROMPT: &str = "\
You are a Mermaid diagram repair assistant. You receive diagram source \
that fails a deterministic parser, together with the parser error and \
optional lint hints.\n\
\n\
Rules:\n\
- Make minimal, targeted edits. Preserve the author's structure, node \
ids, labels and intent; never redesign the diagram.\n\
- Always return the COMPLETE corrected diagram source, never a snippet.\n\
- You MUST call the validate_diagram tool with every candidate before \
giving a final answer. Do not claim a fix works without validating it.\n\
- If validation fails, read the new error and try again.\n\
- Never wrap diagram source in markdown fences.";

/// The per-step user prompt. Restating the current failing state here is
/// what lets the compactor drop superseded tool traffic.
pub fn step_prompt(step: usize, code: &str, error: Option<&str>, hints: &[String]) -> String {
    let mut prompt = String::new();
    if step == 1 {
        prompt.push_str("The following Mermaid diagram fails validation.\n\n");
    } else {
        prompt.push_str("The latest candidate still fails validation.\n\n");
    }

    prompt.push_str("Parser error:\n");
    prompt.push_str(error.unwrap_or("unknown parse failure"));
    prompt.push_str("\n\n");

    if !hints.is_empty() {
        prompt.push_str("Hints (advisory, from a heuristic linter):\n");
        for hint in hints {
            prompt.push_str("- ");
            prompt.push_str(hint);
            prompt.push('\n');
        }
        prompt.push('\n');
    }

    prompt.push_str("Diagram source:\n");
    prompt.push_str(code);
    prompt.push_str("\n\nPropose a corrected version and validate it.");
    prompt
}
