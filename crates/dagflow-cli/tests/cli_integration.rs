//! End-to-end coverage of the `dagflow` binary's subcommands, run against a
//! real workflow description on disk.

use std::io::Write;
use std::process::Command;

use tempfile::NamedTempFile;

const LINEAR_WORKFLOW: &str = r#"
name = "greeting"
description = "A three-node linear workflow"

[[nodes]]
name = "start"
task_name = "start_job"
kind = "job_control"

[[nodes]]
name = "check"
task_name = "check_health"
kind = "health_check"

[[nodes]]
name = "finish"
task_name = "complete_job"
kind = "job_control"

[[edges]]
from = "start"
to = "check"

[[edges]]
from = "check"
to = "finish"

[settings]
default_execution_mode = "sequential"
"#;

fn write_workflow() -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp workflow file");
    file.write_all(LINEAR_WORKFLOW.as_bytes())
        .expect("write workflow");
    file
}

fn dagflow() -> Command {
    Command::new(env!("CARGO_BIN_EXE_dagflow"))
}

#[test]
fn validate_reports_node_and_edge_counts() {
    let workflow = write_workflow();

    let output = dagflow()
        .arg("validate")
        .arg(workflow.path())
        .output()
        .expect("run dagflow validate");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("3 nodes"));
    assert!(stdout.contains("2 edges"));
}

#[test]
fn export_renders_dot_with_every_node() {
    let workflow = write_workflow();

    let output = dagflow()
        .arg("export")
        .arg(workflow.path())
        .output()
        .expect("run dagflow export");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("digraph \"greeting\" {"));
    assert!(stdout.contains("\"start\""));
    assert!(stdout.contains("\"check\""));
    assert!(stdout.contains("\"finish\""));
}

#[test]
fn run_executes_the_workflow_and_prints_json() {
    let workflow = write_workflow();

    let output = dagflow()
        .arg("run")
        .arg(workflow.path())
        .arg("--json")
        .output()
        .expect("run dagflow run");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let parsed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("run --json prints valid JSON");
    assert_eq!(parsed["overall_status"], "success");
    assert_eq!(parsed["per_node_status"]["start"], "success");
    assert_eq!(parsed["per_node_status"]["check"], "success");
    assert_eq!(parsed["per_node_status"]["finish"], "success");
}

#[test]
fn metrics_subcommand_executes_the_workflow_and_prints_real_counts() {
    let workflow = write_workflow();

    let output = dagflow()
        .arg("metrics")
        .arg(workflow.path())
        .output()
        .expect("run dagflow metrics");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let parsed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("metrics prints valid JSON");
    assert_eq!(parsed["total_executions"], 1);
    assert_eq!(parsed["successful_executions"], 1);
    assert_eq!(parsed["failed_executions"], 0);
}

#[test]
fn validate_rejects_a_cyclic_workflow() {
    let cyclic = r#"
name = "cyclic"

[[nodes]]
name = "a"
task_name = "check_health"

[[nodes]]
name = "b"
task_name = "check_health"

[[edges]]
from = "a"
to = "b"

[[edges]]
from = "b"
to = "a"
"#;
    let mut file = NamedTempFile::new().expect("create temp workflow file");
    file.write_all(cyclic.as_bytes()).expect("write workflow");

    let output = dagflow()
        .arg("validate")
        .arg(file.path())
        .output()
        .expect("run dagflow validate");

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("cycle"));
}
