// src/validator/heuristics.rs
// Cheap intake classification: does this text even look like a diagram?
// Runs before any model step so unrelated input never costs a call.

/// Header keywords that open a Mermaid diagram. Order matters only for
/// readability; matching is prefix-based on the first real line.
pub const HEADER_KEYWORDS: &[&str] = &[
    "flowchart",
    "graph",
    "sequenceDiagram",
    "classDiagram",
    "stateDiagram-v2",
    "stateDiagram",
    "erDiagram",
    "gantt",
    "pie",
    "journey",
    "gitGraph",
    "mindmap",
    "timeline",
    "quadrantChart",
    "requirementDiagram",
    "C4Context",
    "C4Container",
    "C4Component",
    "sankey-beta",
    "xychart-beta",
    "block-beta",
];

/// Structural tokens that only show up in diagram syntax. Any of these in
/// the body marks the input as diagram-like even without a clean header.
const STRUCTURAL_TOKENS: &[&str] = &[
    "-->", "---", "==>", "-.->", "-.-", "->>", "-->>", "--x", "--)",
    "%%{", "subgraph ", "participant ", "actor ", "state ", "section ",
    ":::", "<|--", "||--",
];

/// First line that is neither blank nor a `%%` comment.
pub fn first_content_line(source: &str) -> Option<&str> {
    source
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !is_comment(l))
}

/// A `%%` comment line that is not a `%%{...}%%` directive.
pub fn is_comment(line: &str) -> bool {
    line.starts_with("%%") && !line.starts_with("%%{")
}

pub fn matches_header(line: &str) -> Option<&'static str> {
    HEADER_KEYWORDS.iter().copied().find(|kw| {
        line.strip_prefix(kw)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with(|c: char| c.is_whitespace()))
    })
}

/// Classify whether normalized text plausibly is Mermaid-like. This only
/// gates entry into the repair loop; the parser stays the authority.
pub fn is_likely_mermaid_like(source: &str) -> bool {
    if source.is_empty() {
        return false;
    }
    if let Some(line) = first_content_line(source) {
        if matches_header(line).is_some() {
            return true;
        }
    }
    STRUCTURAL_TOKENS.iter().any(|tok| source.contains(tok))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_match() {
        assert!(is_likely_mermaid_like("graph TD\nA-->B"));
        assert!(is_likely_mermaid_like("flowchart LR\nA---B"));
        assert!(is_likely_mermaid_like("sequenceDiagram\nA->>B: hi"));
        assert!(is_likely_mermaid_like("pie\n\"a\" : 1"));
    }

    #[test]
    fn test_header_after_comment() {
        assert!(is_likely_mermaid_like("%% a comment\ngraph TD\nA-->B"));
    }

    #[test]
    fn test_structural_tokens_without_header() {
        // Broken header but clearly diagram-shaped.
        assert!(is_likely_mermaid_like("grph TD\nA-->B"));
        assert!(is_likely_mermaid_like("diagram\nparticipant Alice"));
    }

    #[test]
    fn test_prose_rejected() {
        assert!(!is_likely_mermaid_like("please write me a poem"));
        assert!(!is_likely_mermaid_like("The graph of y = x is a line."));
        assert!(!is_likely_mermaid_like(""));
    }

    #[test]
    fn test_keyword_needs_word_boundary() {
        // "graphics" must not count as a `graph` header.
        assert!(!is_likely_mermaid_like("graphics card settings"));
    }
}
