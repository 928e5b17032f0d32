// src/validator/lint.rs
// Heuristic hints attached to a parser failure. Pure text scans, no
// side effects, and never authoritative: a hint cannot change validity.

use once_cell::sync::Lazy;
use regex::Regex;

use super::heuristics::is_comment;
use super::parser::split_edge;

/// Two bare identifiers with only whitespace between them, e.g.
/// `graph TD A B` or the truncated-operator case `A-- B`.
static TWO_IDENTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*\s+[A-Za-z][A-Za-z0-9_]*$").unwrap());

/// Node id followed by a label opener where the id contains a space,
/// e.g. `my node[Label]`.
static SPACED_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z0-9_]+\s+[A-Za-z0-9_][^\[\({]*)[\[\({]").unwrap());

/// Collect up to `max_hints` advisory hints for source that failed the
/// parser. Rules run in priority order; the cap truncates the tail.
pub fn lint(source: &str, max_hints: usize) -> Vec<String> {
    let mut hints = Vec::new();
    let lines: Vec<(usize, &str)> = source
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty() && !is_comment(l))
        .collect();

    for &(line_no, line) in &lines {
        hint_missing_edge_operator(line_no, line, &mut hints);
    }
    for &(line_no, line) in &lines {
        hint_unquoted_parens_in_label(line_no, line, &mut hints);
    }
    hint_unbalanced_counts(source, &mut hints);
    for &(line_no, line) in &lines {
        hint_bad_node_id(line_no, line, &mut hints);
    }
    for &(line_no, line) in &lines {
        hint_unquoted_specials_in_label(line_no, line, &mut hints);
    }

    hints.truncate(max_hints);
    hints
}

fn hint_missing_edge_operator(line_no: usize, line: &str, hints: &mut Vec<String>) {
    // A terminated operator (`-->`, `---`, `==>`) on the line settles it.
    if let Some((_, op, _)) = split_edge(line) {
        if op.len() >= 3 || op.contains('>') || op.contains('<') {
            return;
        }
    }
    // Collapse a half-typed stroke (`A-- B` -> `A B`) so both the bare
    // and the truncated-operator case land here.
    let collapsed = line.replace("--", " ").replace("==", " ");
    let collapsed = collapsed.split_whitespace().collect::<Vec<_>>().join(" ");
    if TWO_IDENTS.is_match(&collapsed) && super::heuristics::matches_header(line).is_none() {
        hints.push(format!(
            "line {line_no}: two node references with no edge operator between them; did you mean '-->'?"
        ));
    }
}

fn hint_unquoted_parens_in_label(line_no: usize, line: &str, hints: &mut Vec<String>) {
    // Inside `[...]` labels, parentheses must be quoted.
    let mut depth = 0usize;
    let mut in_quote = false;
    for ch in line.chars() {
        match ch {
            '"' => in_quote = !in_quote,
            _ if in_quote => {}
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            '(' | ')' if depth > 0 => {
                hints.push(format!(
                    "line {line_no}: parentheses inside a [label] must be quoted, e.g. A[\"text (detail)\"]"
                ));
                return;
            }
            _ => {}
        }
    }
}

fn hint_unbalanced_counts(source: &str, hints: &mut Vec<String>) {
    for (open, close, name) in [('[', ']', "square brackets"), ('(', ')', "parentheses"), ('{', '}', "braces")] {
        let opens = source.matches(open).count();
        let closes = source.matches(close).count();
        if opens != closes {
            hints.push(format!(
                "unbalanced {name}: {opens} '{open}' vs {closes} '{close}'"
            ));
        }
    }
}

fn hint_bad_node_id(line_no: usize, line: &str, hints: &mut Vec<String>) {
    if let Some(caps) = SPACED_ID.captures(line) {
        let id = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
        hints.push(format!(
            "line {line_no}: node id {id:?} contains spaces; use a single identifier and put the text in the label"
        ));
        return;
    }
    let id_part = line
        .split(|c: char| matches!(c, '[' | '(' | '{' | '>'))
        .next()
        .unwrap_or(line);
    if split_edge(id_part).is_none() && id_part.chars().any(|c| !c.is_ascii() && !c.is_whitespace()) {
        hints.push(format!(
            "line {line_no}: node id contains non-ASCII characters; keep ids ASCII and move text into the label"
        ));
    }
}

fn hint_unquoted_specials_in_label(line_no: usize, line: &str, hints: &mut Vec<String>) {
    let mut depth = 0usize;
    let mut in_quote = false;
    for ch in line.chars() {
        match ch {
            '"' => in_quote = !in_quote,
            _ if in_quote => {}
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            '|' | '<' | '>' if depth > 0 => {
                hints.push(format!(
                    "line {line_no}: label contains '{ch}' which needs quoting, e.g. A[\"a {ch} b\"]"
                ));
                return;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_edge_operator_hint() {
        let hints = lint("graph TD\nA-- B", 4);
        assert!(hints.iter().any(|h| h.contains("no edge operator")), "{hints:?}");
    }

    #[test]
    fn test_unquoted_parens_hint() {
        let hints = lint("graph TD\nA[Call foo()] --> B", 4);
        assert!(hints.iter().any(|h| h.contains("must be quoted")), "{hints:?}");
    }

    #[test]
    fn test_unbalanced_hint() {
        let hints = lint("graph TD\nA[Start --> B", 4);
        assert!(hints.iter().any(|h| h.contains("unbalanced square brackets")), "{hints:?}");
    }

    #[test]
    fn test_spaced_id_hint() {
        let hints = lint("graph TD\nmy node[Label] --> B", 4);
        assert!(hints.iter().any(|h| h.contains("contains spaces")), "{hints:?}");
    }

    #[test]
    fn test_special_char_label_hint() {
        let hints = lint("graph TD\nA[a | b] --> C", 4);
        assert!(hints.iter().any(|h| h.contains("needs quoting")), "{hints:?}");
    }

    #[test]
    fn test_cap_respected() {
        let src = "graph TD\nA[foo(] B\nC[x | y\nmy node[z]";
        assert!(lint(src, 2).len() <= 2);
        assert!(lint(src, 1).len() == 1);
    }

    #[test]
    fn test_clean_source_has_no_hints() {
        assert!(lint("graph TD\nA-->B", 4).is_empty());
    }
}
