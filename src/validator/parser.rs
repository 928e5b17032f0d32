// src/validator/parser.rs
// Deterministic line-based parser. This is the sole authority on
// validity: heuristics and lint hints never override its verdict.
//
// Flowchart and sequence grammars are checked statement by statement;
// state and pie get a narrower per-line check; the remaining families
// are validated structurally (header + bracket balance + nonempty body).

use std::fmt;

use super::heuristics::{is_comment, matches_header};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    MissingHeader,
    EmptyBody,
    InvalidDirection { line_no: usize, direction: String },
    UnbalancedBrackets { line_no: usize, line: String },
    UnsupportedSyntax { line_no: usize, line: String },
    InvalidNodeId { line_no: usize, name: String },
    MissingMessageColon { line_no: usize, line: String },
    UnclosedBlock { keyword: String },
    UnexpectedEnd { line_no: usize },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingHeader => {
                f.write_str("expected a diagram type keyword on the first line")
            }
            Self::EmptyBody => f.write_str("diagram has a header but no statements"),
            Self::InvalidDirection { line_no, direction } => write!(
                f,
                "invalid direction on line {line_no}: {direction} (expected TD/TB/LR/RL/BT)"
            ),
            Self::UnbalancedBrackets { line_no, line } => {
                write!(f, "unbalanced brackets on line {line_no}: {line}")
            }
            Self::UnsupportedSyntax { line_no, line } => {
                write!(f, "unrecognized statement on line {line_no}: {line}")
            }
            Self::InvalidNodeId { line_no, name } => {
                write!(f, "invalid node id on line {line_no}: {name:?}")
            }
            Self::MissingMessageColon { line_no, line } => {
                write!(f, "missing ': message' after arrow on line {line_no}: {line}")
            }
            Self::UnclosedBlock { keyword } => {
                write!(f, "'{keyword}' block is never closed with 'end'")
            }
            Self::UnexpectedEnd { line_no } => {
                write!(f, "'end' on line {line_no} closes nothing")
            }
        }
    }
}

impl std::error::Error for ParseError {}

/// Parse normalized source. Returns the inferred diagram type.
pub fn parse(source: &str) -> Result<String, ParseError> {
    let first = super::heuristics::first_content_line(source).ok_or(ParseError::MissingHeader)?;
    let header = matches_header(first).ok_or(ParseError::MissingHeader)?;

    // Numbered content lines after the header, comments skipped.
    let mut body: Vec<(usize, &str)> = Vec::new();
    let mut seen_header = false;
    for (idx, line) in source.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || is_comment(line) {
            continue;
        }
        if !seen_header {
            seen_header = true;
            continue;
        }
        body.push((idx + 1, line));
    }

    match header {
        "graph" | "flowchart" => parse_flowchart(first, &body)?,
        "sequenceDiagram" => parse_sequence(&body)?,
        "stateDiagram" | "stateDiagram-v2" => parse_state(&body)?,
        "pie" => parse_pie(first, &body)?,
        _ => parse_structural(&body)?,
    }
    Ok(header.to_string())
}

fn check_line_balance(line_no: usize, line: &str) -> Result<(), ParseError> {
    let mut depth_sq = 0i32;
    let mut depth_par = 0i32;
    let mut depth_br = 0i32;
    let mut in_quote = false;
    for ch in line.chars() {
        match ch {
            '"' => in_quote = !in_quote,
            _ if in_quote => {}
            '[' => depth_sq += 1,
            ']' => depth_sq -= 1,
            '(' => depth_par += 1,
            ')' => depth_par -= 1,
            '{' => depth_br += 1,
            '}' => depth_br -= 1,
            _ => {}
        }
        if depth_sq < 0 || depth_par < 0 || depth_br < 0 {
            return Err(ParseError::UnbalancedBrackets {
                line_no,
                line: line.to_string(),
            });
        }
    }
    if depth_sq != 0 || depth_par != 0 {
        return Err(ParseError::UnbalancedBrackets {
            line_no,
            line: line.to_string(),
        });
    }
    // Braces may open a multi-line block; cross-line balance is checked
    // separately by the structural pass.
    Ok(())
}

fn is_valid_node_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn is_edge_op_char(ch: char) -> bool {
    matches!(ch, '<' | '>' | '-' | '=' | '.' | 'o' | 'x')
}

/// An edge operator needs at least two stroke characters (`--`, `==`,
/// `-.` and friends), which keeps single hyphens inside ids out.
fn is_probable_edge_operator(op: &str) -> bool {
    op.chars().filter(|c| matches!(c, '-' | '=' | '.')).count() >= 2
}

/// Split `lhs OP rest` at the first edge operator outside any label
/// delimiter. Returns None when the line has no edge.
pub fn split_edge(line: &str) -> Option<(&str, &str, &str)> {
    let mut in_label: Option<char> = None;
    let mut in_quote = false;
    let mut op_start = None;

    for (idx, ch) in line.char_indices() {
        if ch == '"' {
            in_quote = !in_quote;
            continue;
        }
        if in_quote {
            continue;
        }
        if let Some(close) = in_label {
            if ch == close {
                in_label = None;
            }
            continue;
        }
        match ch {
            '[' => in_label = Some(']'),
            '(' => in_label = Some(')'),
            '{' => in_label = Some('}'),
            '<' | '-' | '=' | '.' => {
                op_start = Some(idx);
            }
            _ => {}
        }
        if op_start.is_some() {
            break;
        }
    }

    let start = op_start?;
    let mut end = line.len();
    for (idx, ch) in line[start..].char_indices() {
        if !is_edge_op_char(ch) {
            end = start + idx;
            break;
        }
    }
    let op = &line[start..end];
    if !is_probable_edge_operator(op) {
        return None;
    }
    Some((line[..start].trim(), op, line[end..].trim()))
}

/// Flowchart keywords that make a line valid without node/edge parsing.
const FLOW_KEYWORDS: &[&str] = &[
    "classDef", "class ", "style ", "linkStyle", "click ", "direction ",
];

fn parse_flowchart(header_line: &str, body: &[(usize, &str)]) -> Result<(), ParseError> {
    // `graph TD` / `flowchart LR`; direction is optional for `flowchart`.
    let mut parts = header_line.split_whitespace();
    let keyword = parts.next().unwrap_or_default();
    if let Some(direction) = parts.next() {
        if !matches!(direction, "TD" | "TB" | "LR" | "RL" | "BT") {
            return Err(ParseError::InvalidDirection {
                line_no: 1,
                direction: direction.to_string(),
            });
        }
    } else if keyword == "graph" {
        return Err(ParseError::InvalidDirection {
            line_no: 1,
            direction: String::new(),
        });
    }

    if body.is_empty() {
        return Err(ParseError::EmptyBody);
    }

    let mut subgraph_depth = 0usize;
    for &(line_no, line) in body {
        check_line_balance(line_no, line)?;

        if let Some(rest) = line.strip_prefix("subgraph") {
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                subgraph_depth += 1;
                continue;
            }
        }
        if line == "end" {
            if subgraph_depth == 0 {
                return Err(ParseError::UnexpectedEnd { line_no });
            }
            subgraph_depth -= 1;
            continue;
        }
        if FLOW_KEYWORDS.iter().any(|kw| line.starts_with(kw)) {
            continue;
        }

        parse_flow_statement(line_no, line)?;
    }

    if subgraph_depth > 0 {
        return Err(ParseError::UnclosedBlock {
            keyword: "subgraph".to_string(),
        });
    }
    Ok(())
}

/// One flowchart statement: a node, or a chain of nodes joined by edges.
fn parse_flow_statement(line_no: usize, line: &str) -> Result<(), ParseError> {
    let mut rest = line;
    loop {
        match split_edge(rest) {
            Some((lhs, _op, rhs)) => {
                if !lhs.is_empty() {
                    parse_flow_node(line_no, lhs)?;
                }
                // `-->|label| B` — skip the pipe-delimited edge label.
                let rhs = match rhs.strip_prefix('|') {
                    Some(after) => match after.find('|') {
                        Some(i) => after[i + 1..].trim(),
                        None => {
                            return Err(ParseError::UnsupportedSyntax {
                                line_no,
                                line: line.to_string(),
                            })
                        }
                    },
                    None => rhs,
                };
                if rhs.is_empty() {
                    return Err(ParseError::UnsupportedSyntax {
                        line_no,
                        line: line.to_string(),
                    });
                }
                if split_edge(rhs).is_some() {
                    rest = rhs;
                    continue;
                }
                parse_flow_node(line_no, rhs)?;
                return Ok(());
            }
            None => {
                parse_flow_node(line_no, rest)?;
                return Ok(());
            }
        }
    }
}

/// A node token: `id`, `id[label]`, `id(label)`, `id((label))`,
/// `id{label}`, `id>label]`.
fn parse_flow_node(line_no: usize, token: &str) -> Result<(), ParseError> {
    let token = token.trim();
    if token.is_empty() {
        return Err(ParseError::UnsupportedSyntax {
            line_no,
            line: token.to_string(),
        });
    }
    let id_end = token
        .find(|c: char| matches!(c, '[' | '(' | '{' | '>'))
        .unwrap_or(token.len());
    let id = token[..id_end].trim();
    if !is_valid_node_id(id) {
        return Err(ParseError::InvalidNodeId {
            line_no,
            name: id.to_string(),
        });
    }
    Ok(())
}

const SEQ_BLOCK_OPENERS: &[&str] = &[
    "loop", "alt", "opt", "par", "critical", "rect", "break", "box",
];
const SEQ_BLOCK_CONTINUATIONS: &[&str] = &["else", "and", "option"];
const SEQ_KEYWORDS: &[&str] = &[
    "participant", "actor", "activate", "deactivate", "note", "Note",
    "autonumber", "title", "link", "links", "create", "destroy",
];
const SEQ_ARROWS: &[&str] = &[
    "-->>", "->>", "--x", "-x", "--)", "-)", "-->", "->",
];

fn parse_sequence(body: &[(usize, &str)]) -> Result<(), ParseError> {
    if body.is_empty() {
        return Err(ParseError::EmptyBody);
    }
    let mut block_depth = 0usize;
    for &(line_no, line) in body {
        let first_word = line.split_whitespace().next().unwrap_or_default();
        if SEQ_BLOCK_OPENERS.contains(&first_word) {
            block_depth += 1;
            continue;
        }
        if first_word == "end" {
            if block_depth == 0 {
                return Err(ParseError::UnexpectedEnd { line_no });
            }
            block_depth -= 1;
            continue;
        }
        if SEQ_BLOCK_CONTINUATIONS.contains(&first_word) {
            if block_depth == 0 {
                return Err(ParseError::UnexpectedEnd { line_no });
            }
            continue;
        }
        if SEQ_KEYWORDS.contains(&first_word) {
            continue;
        }

        // Otherwise this must be a message: `A->>B: text`.
        let arrow = SEQ_ARROWS.iter().find(|a| line.contains(**a));
        match arrow {
            Some(arrow) => {
                let (lhs, rhs) = line.split_once(arrow).unwrap_or((line, ""));
                if lhs.trim().is_empty() {
                    return Err(ParseError::UnsupportedSyntax {
                        line_no,
                        line: line.to_string(),
                    });
                }
                let rhs = rhs.trim_start_matches(['+', '-']);
                if !rhs.contains(':') {
                    return Err(ParseError::MissingMessageColon {
                        line_no,
                        line: line.to_string(),
                    });
                }
            }
            None => {
                return Err(ParseError::UnsupportedSyntax {
                    line_no,
                    line: line.to_string(),
                })
            }
        }
    }
    if block_depth > 0 {
        return Err(ParseError::UnclosedBlock {
            keyword: "loop/alt/opt".to_string(),
        });
    }
    Ok(())
}

fn parse_state(body: &[(usize, &str)]) -> Result<(), ParseError> {
    if body.is_empty() {
        return Err(ParseError::EmptyBody);
    }
    let mut brace_depth = 0i32;
    for &(line_no, line) in body {
        brace_depth += line.matches('{').count() as i32;
        brace_depth -= line.matches('}').count() as i32;
        if brace_depth < 0 {
            return Err(ParseError::UnbalancedBrackets {
                line_no,
                line: line.to_string(),
            });
        }
        if line == "}" || line.starts_with("state ") || line.starts_with("direction ")
            || line.starts_with("note ")
        {
            continue;
        }
        if line.contains("-->") {
            continue;
        }
        // A bare state name (or description continuation inside a block).
        let bare = line.trim_end_matches(':').split(':').next().unwrap_or(line).trim();
        if brace_depth > 0 || is_valid_node_id(bare) || bare.starts_with("[*]") {
            continue;
        }
        return Err(ParseError::UnsupportedSyntax {
            line_no,
            line: line.to_string(),
        });
    }
    if brace_depth != 0 {
        return Err(ParseError::UnclosedBlock {
            keyword: "state".to_string(),
        });
    }
    Ok(())
}

fn parse_pie(header_line: &str, body: &[(usize, &str)]) -> Result<(), ParseError> {
    // `pie` or `pie showData`, optionally followed by a title line.
    let _ = header_line;
    let mut slices = 0usize;
    for &(line_no, line) in body {
        if line.starts_with("title") || line.starts_with("showData") {
            continue;
        }
        // `"label" : 42.5`
        let valid = line
            .rsplit_once(':')
            .map(|(label, value)| {
                let label = label.trim();
                label.starts_with('"')
                    && label.ends_with('"')
                    && value.trim().parse::<f64>().is_ok()
            })
            .unwrap_or(false);
        if !valid {
            return Err(ParseError::UnsupportedSyntax {
                line_no,
                line: line.to_string(),
            });
        }
        slices += 1;
    }
    if slices == 0 {
        return Err(ParseError::EmptyBody);
    }
    Ok(())
}

/// Families without a dedicated grammar here: require a nonempty body and
/// globally balanced square brackets and parens. Braces are left alone;
/// ER cardinality markers (`||--o{`) use them unpaired by design of the
/// grammar, not by accident.
fn parse_structural(body: &[(usize, &str)]) -> Result<(), ParseError> {
    if body.is_empty() {
        return Err(ParseError::EmptyBody);
    }
    let (mut sq, mut par) = (0i32, 0i32);
    for &(line_no, line) in body {
        let mut in_quote = false;
        for ch in line.chars() {
            match ch {
                '"' => in_quote = !in_quote,
                _ if in_quote => {}
                '[' => sq += 1,
                ']' => sq -= 1,
                '(' => par += 1,
                ')' => par -= 1,
                _ => {}
            }
        }
        if sq < 0 || par < 0 {
            return Err(ParseError::UnbalancedBrackets {
                line_no,
                line: line.to_string(),
            });
        }
    }
    if sq != 0 || par != 0 {
        let &(line_no, line) = body.last().expect("nonempty body");
        return Err(ParseError::UnbalancedBrackets {
            line_no,
            line: line.to_string(),
        });
    }
    Ok(())
}
