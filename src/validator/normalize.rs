// src/validator/normalize.rs
// Input normalization: the validator and the repair loop only ever see
// normalized source, re-derived from the raw request each time.

/// Characters that must never reach the parser: BOM, zero-width and
/// bidirectional control characters pasted in from rich-text editors.
fn is_invisible(ch: char) -> bool {
    matches!(
        ch,
        '\u{feff}'            // BOM
        | '\u{200b}'..='\u{200f}' // zero-width space/joiners, LRM/RLM
        | '\u{2060}'          // word joiner
        | '\u{202a}'..='\u{202e}' // bidi embedding/override
        | '\u{2066}'..='\u{2069}' // bidi isolates
    )
}

/// Strip a single surrounding markdown fence (```mermaid ... ``` or bare
/// ```), if the whole text is one fenced block.
pub fn strip_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return text;
    }
    let Some(rest) = trimmed.strip_prefix("```") else {
        return text;
    };
    // Skip the info string on the opening line (e.g. "mermaid").
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => return text,
    };
    match body.rfind("```") {
        Some(idx) => &body[..idx],
        None => body,
    }
}

/// Normalize raw diagram text: unwrap one fence, drop invisible
/// characters, normalize newlines, trim every line, and drop leading and
/// trailing blank lines.
pub fn normalize(raw: &str) -> String {
    let unfenced = strip_fence(raw);
    let cleaned: String = unfenced
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .chars()
        .filter(|c| !is_invisible(*c))
        .collect();

    let lines: Vec<&str> = cleaned.lines().map(|l| l.trim()).collect();
    let start = lines.iter().position(|l| !l.is_empty()).unwrap_or(lines.len());
    let end = lines.iter().rposition(|l| !l.is_empty()).map_or(start, |i| i + 1);
    lines[start..end].join("\n")
}
