//! Renders a loaded graph as Graphviz DOT, the engine's one supported
//! "human-readable visual form" (§6), and parses that same form back into a
//! node/edge set so the round-trip property in §8 ("Load(description)
//! .export_visual().parse_visual() preserves node set and edge set") is an
//! implemented, testable operation rather than an aspiration. Nodes are
//! colored by [`NodeKind`] so a rendered graph reads the same way a run's
//! tracing spans do.

use std::collections::HashSet;
use std::fmt::Write as _;

use crate::dag::graph::Graph;
use crate::dag::types::{EdgeDefinition, NodeKind, WorkflowDefinition};
use crate::{DagError, Result};

/// `dot -Tsvg` and friends accept this directly.
pub fn to_dot(workflow: &WorkflowDefinition, graph: &Graph) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "digraph \"{}\" {{", escape(&workflow.name));
    let _ = writeln!(out, "  rankdir=LR;");
    let _ = writeln!(out, "  node [shape=box, style=filled, fontname=\"monospace\"];");

    let mut names: Vec<&String> = graph.nodes.keys().collect();
    names.sort();
    for name in names {
        let node = &graph.nodes[name];
        let _ = writeln!(
            out,
            "  \"{}\" [label=\"{}\\n{}\", fillcolor=\"{}\"];",
            escape(name),
            escape(name),
            kind_label(node.kind),
            color_for_kind(node.kind),
        );
    }

    for edge in &graph.edges {
        let _ = writeln!(
            out,
            "  \"{}\" -> \"{}\" [label=\"{}\", weight=\"{}\", error_handling=\"{}\"];",
            escape(&edge.from),
            escape(&edge.to),
            escape(&edge.condition),
            edge.weight,
            edge.error_handling,
        );
    }

    let _ = writeln!(out, "}}");
    out
}

/// The node/edge set recovered from a rendered graph, per §8's round-trip
/// property. Node kinds are recovered from each node's `fillcolor` (the
/// unique, non-lossy encoding `to_dot` uses); anything else about a node
/// (task name, retry/cache policy, ...) is not part of the visual form and
/// is not a claim this parser makes.
#[derive(Debug, Clone, Default)]
pub struct ParsedDot {
    pub node_names: HashSet<String>,
    pub node_kinds: std::collections::HashMap<String, NodeKind>,
    pub edges: Vec<EdgeDefinition>,
}

/// Recover the node/edge set from DOT text produced by [`to_dot`]. Fails
/// with `DagError::Schema` if a node or edge line is missing its quoted
/// endpoints -- this is a reader for this crate's own export format, not a
/// general-purpose DOT grammar.
pub fn parse_dot(dot: &str) -> Result<ParsedDot> {
    let mut parsed = ParsedDot::default();

    for raw_line in dot.lines() {
        let line = raw_line.trim();
        if !line.starts_with('"') {
            continue;
        }

        if let Some(arrow) = line.find("->") {
            let (before, after) = line.split_at(arrow);
            let from = first_quoted(before)
                .ok_or_else(|| DagError::Schema("malformed DOT edge: missing 'from' node".into()))?;
            let rest = &after[2..];
            let to = first_quoted(rest)
                .ok_or_else(|| DagError::Schema("malformed DOT edge: missing 'to' node".into()))?;
            let attrs = bracket_attrs(rest);

            let weight = attrs
                .get("weight")
                .and_then(|w| w.parse::<f64>().ok())
                .unwrap_or(1.0);
            let error_handling = attrs
                .get("error_handling")
                .map(|v| v == "true")
                .unwrap_or(false);
            let condition = attrs.get("label").cloned().unwrap_or_else(|| "always".into());

            parsed.edges.push(EdgeDefinition {
                from,
                to,
                condition,
                weight,
                error_handling,
            });
        } else {
            let name = first_quoted(line)
                .ok_or_else(|| DagError::Schema("malformed DOT node: missing name".into()))?;
            let attrs = bracket_attrs(line);
            let kind = attrs
                .get("label")
                .and_then(|label| label.split("\\n").nth(1))
                .map(kind_from_label)
                .unwrap_or(NodeKind::Custom);

            parsed.node_kinds.insert(name.clone(), kind);
            parsed.node_names.insert(name);
        }
    }

    Ok(parsed)
}

/// The first `"..."`-quoted token in `s`, unescaping `\"` and `\\` the same
/// way [`escape`] produces them. Any other backslash sequence (notably the
/// literal `\n` line-break marker inside a label) passes through untouched.
fn first_quoted(s: &str) -> Option<String> {
    let mut chars = s.chars();
    loop {
        match chars.next()? {
            '"' => break,
            _ => continue,
        }
    }
    let mut out = String::new();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            },
            '"' => return Some(out),
            other => out.push(other),
        }
    }
    None
}

/// Parse the `key="value"` pairs inside the trailing `[...]` attribute list
/// of a node or edge line, in order, skipping the endpoint names that come
/// before it.
fn bracket_attrs(s: &str) -> std::collections::HashMap<String, String> {
    let mut attrs = std::collections::HashMap::new();
    let Some(open) = s.find('[') else {
        return attrs;
    };
    let Some(close) = s.rfind(']') else {
        return attrs;
    };
    let body = &s[open + 1..close];

    for pair in split_top_level(body) {
        let Some(eq) = pair.find('=') else { continue };
        let key = pair[..eq].trim().to_string();
        let value = pair[eq + 1..].trim();
        let value = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')).unwrap_or(value);
        attrs.insert(key, value.to_string());
    }

    attrs
}

/// Split `key="value", key="value"` on top-level commas, i.e. commas that
/// are not inside a quoted value.
fn split_top_level(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '\\' if in_quotes => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            ',' if !in_quotes => {
                out.push(std::mem::take(&mut current));
            }
            other => current.push(other),
        }
    }
    if !current.trim().is_empty() {
        out.push(current);
    }
    out
}

fn kind_from_label(label: &str) -> NodeKind {
    match label {
        "job_control" => NodeKind::JobControl,
        "ai_request" => NodeKind::AiRequest,
        "tool_execution" => NodeKind::ToolExecution,
        "validation" => NodeKind::Validation,
        "transform" => NodeKind::Transform,
        "health_check" => NodeKind::HealthCheck,
        _ => NodeKind::Custom,
    }
}

fn color_for_kind(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::JobControl => "#3aafa9",
        NodeKind::AiRequest => "#9b5de5",
        NodeKind::ToolExecution => "#f4a259",
        NodeKind::Validation => "#e15554",
        NodeKind::Transform => "#5390d9",
        NodeKind::HealthCheck => "#adb5bd",
        NodeKind::Custom => "#e9ecef",
    }
}

fn kind_label(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::JobControl => "job_control",
        NodeKind::AiRequest => "ai_request",
        NodeKind::ToolExecution => "tool_execution",
        NodeKind::Validation => "validation",
        NodeKind::Transform => "transform",
        NodeKind::HealthCheck => "health_check",
        NodeKind::Custom => "custom",
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
