//! Parses a declarative workflow description into a [`WorkflowDefinition`].
//!
//! Accepts either a path on disk or an in-memory TOML string, mirroring the
//! rest of the crate's `load(path)` / `parse(str)` split.

use std::collections::HashSet;
use std::path::Path;

use crate::dag::types::WorkflowDefinition;
use crate::{DagError, Result};

/// Read and parse a workflow description from a file on disk.
pub fn load(path: &Path) -> Result<WorkflowDefinition> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| DagError::Schema(format!("failed to read {}: {e}", path.display())))?;
    parse(&contents)
}

/// Parse a workflow description from an in-memory TOML document.
pub fn parse(data: &str) -> Result<WorkflowDefinition> {
    let workflow: WorkflowDefinition =
        toml::from_str(data).map_err(|e| DagError::Schema(format!("malformed workflow: {e}")))?;
    validate_schema(&workflow)?;
    Ok(workflow)
}

/// Structural checks the loader is responsible for, independent of graph
/// shape (cycles/reachability are the validator's concern, §4.2).
fn validate_schema(workflow: &WorkflowDefinition) -> Result<()> {
    if workflow.name.trim().is_empty() {
        return Err(DagError::Schema("workflow 'name' must not be empty".into()));
    }

    if workflow.nodes.is_empty() {
        return Err(DagError::Schema(
            "workflow must declare at least one node".into(),
        ));
    }

    let mut seen = HashSet::new();
    for node in &workflow.nodes {
        if node.name.trim().is_empty() {
            return Err(DagError::Schema("node 'name' must not be empty".into()));
        }
        if node.task_name.trim().is_empty() {
            return Err(DagError::Schema(format!(
                "node '{}' is missing 'task_name'",
                node.name
            )));
        }
        if !seen.insert(node.name.as_str()) {
            return Err(DagError::Schema(format!(
                "duplicate node name '{}'",
                node.name
            )));
        }
    }

    for edge in &workflow.edges {
        if !seen.contains(edge.from.as_str()) {
            return Err(DagError::Schema(format!(
                "edge references undeclared node '{}' (from)",
                edge.from
            )));
        }
        if !seen.contains(edge.to.as_str()) {
            return Err(DagError::Schema(format!(
                "edge references undeclared node '{}' (to)",
                edge.to
            )));
        }
    }

    if let Some(width) = workflow.settings.max_concurrent_tasks {
        if width == 0 {
            return Err(DagError::Schema(
                "settings.max_concurrent_tasks must be > 0".into(),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> &'static str {
        r#"
name = "example"

[[nodes]]
name = "a"
task_name = "noop"

[[nodes]]
name = "b"
task_name = "noop"

[[edges]]
from = "a"
to = "b"
"#
    }

    #[test]
    fn parses_minimal_workflow() {
        let workflow = parse(minimal_toml()).expect("parse");
        assert_eq!(workflow.name, "example");
        assert_eq!(workflow.nodes.len(), 2);
        assert_eq!(workflow.edges.len(), 1);
    }

    #[test]
    fn rejects_empty_name() {
        let data = r#"
name = ""
[[nodes]]
name = "a"
task_name = "noop"
"#;
        let err = parse(data).unwrap_err();
        assert!(matches!(err, DagError::Schema(_)));
    }

    #[test]
    fn rejects_duplicate_node_names() {
        let data = r#"
name = "dup"
[[nodes]]
name = "a"
task_name = "noop"
[[nodes]]
name = "a"
task_name = "noop"
"#;
        let err = parse(data).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn rejects_edge_to_undeclared_node() {
        let data = r#"
name = "bad-edge"
[[nodes]]
name = "a"
task_name = "noop"
[[edges]]
from = "a"
to = "ghost"
"#;
        let err = parse(data).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn rejects_node_missing_task_name() {
        let data = r#"
name = "missing-task"
[[nodes]]
name = "a"
task_name = ""
"#;
        let err = parse(data).unwrap_err();
        assert!(err.to_string().contains("task_name"));
    }

    #[test]
    fn rejects_zero_max_concurrent_tasks() {
        let data = r#"
name = "bad-settings"
[[nodes]]
name = "a"
task_name = "noop"
[settings]
max_concurrent_tasks = 0
"#;
        let err = parse(data).unwrap_err();
        assert!(err.to_string().contains("max_concurrent_tasks"));
    }

    #[test]
    fn load_missing_file_errors() {
        let err = load(Path::new("/nonexistent/workflow.toml")).unwrap_err();
        assert!(matches!(err, DagError::Schema(_)));
    }
}
