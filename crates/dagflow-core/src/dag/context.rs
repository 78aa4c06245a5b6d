//! Execution Context: per-run identity, per-node status/result/error, and
//! the timing data used to derive per-run metrics.
//!
//! The scheduler is the sole writer. Reads (via [`ExecutionContext::snapshot`])
//! may observe an in-flight run and must tolerate partial state; writes are
//! synchronous under a single lock, never suspending, per the concurrency
//! model's shared-resource policy.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Status of a single node within a run. Transitions are strictly
/// `pending -> running -> (success | failed | skipped | cancelled)`; no
/// status ever regresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
    Cancelled,
}

/// Status of the run as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

struct Inner {
    dag_id: String,
    execution_id: Uuid,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    overall_status: OverallStatus,
    per_node_status: HashMap<String, NodeStatus>,
    per_node_result: HashMap<String, Value>,
    per_node_error: HashMap<String, String>,
    per_node_started_at: HashMap<String, Instant>,
    per_node_duration: HashMap<String, Duration>,
}

/// A cheap, read-only copy of the run's state at a point in time. Passed
/// into every task invocation so tasks can inspect prior nodes' outputs
/// without holding the live context's lock.
#[derive(Debug, Clone)]
pub struct ExecutionSnapshot {
    pub dag_id: String,
    pub execution_id: Uuid,
    pub overall_status: OverallStatus,
    pub per_node_status: HashMap<String, NodeStatus>,
    pub per_node_result: HashMap<String, Value>,
    pub per_node_error: HashMap<String, String>,
}

/// The live, shared execution context for one run. Cheaply cloneable --
/// clones share the same underlying state, matching the "owned by the
/// scheduler for the run's duration" contract while still letting spawned
/// per-node workers report back into it.
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Arc<Mutex<Inner>>,
}

impl ExecutionContext {
    pub fn new(dag_id: String) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                dag_id,
                execution_id: Uuid::new_v4(),
                started_at: Utc::now(),
                ended_at: None,
                overall_status: OverallStatus::Running,
                per_node_status: HashMap::new(),
                per_node_result: HashMap::new(),
                per_node_error: HashMap::new(),
                per_node_started_at: HashMap::new(),
                per_node_duration: HashMap::new(),
            })),
        }
    }

    /// Register every node as `pending` before the run begins dispatching.
    pub fn init_nodes(&self, names: impl IntoIterator<Item = String>) {
        let mut inner = self.inner.lock().expect("execution context mutex poisoned");
        for name in names {
            inner.per_node_status.entry(name).or_insert(NodeStatus::Pending);
        }
    }

    pub fn execution_id(&self) -> Uuid {
        self.inner.lock().expect("execution context mutex poisoned").execution_id
    }

    pub fn dag_id(&self) -> String {
        self.inner.lock().expect("execution context mutex poisoned").dag_id.clone()
    }

    pub fn transition_running(&self, node: &str) {
        let mut inner = self.inner.lock().expect("execution context mutex poisoned");
        inner.per_node_status.insert(node.to_string(), NodeStatus::Running);
        inner.per_node_started_at.insert(node.to_string(), Instant::now());
    }

    pub fn record_success(&self, node: &str, value: Value) {
        let mut inner = self.inner.lock().expect("execution context mutex poisoned");
        Self::record_duration(&mut inner, node);
        inner.per_node_status.insert(node.to_string(), NodeStatus::Success);
        inner.per_node_result.insert(node.to_string(), value);
    }

    pub fn record_failed(&self, node: &str, error: String) {
        let mut inner = self.inner.lock().expect("execution context mutex poisoned");
        Self::record_duration(&mut inner, node);
        inner.per_node_status.insert(node.to_string(), NodeStatus::Failed);
        inner.per_node_error.insert(node.to_string(), error);
    }

    pub fn record_skipped(&self, node: &str, reason: String) {
        let mut inner = self.inner.lock().expect("execution context mutex poisoned");
        inner.per_node_status.insert(node.to_string(), NodeStatus::Skipped);
        inner.per_node_error.insert(node.to_string(), reason);
    }

    pub fn record_cancelled(&self, node: &str) {
        let mut inner = self.inner.lock().expect("execution context mutex poisoned");
        Self::record_duration(&mut inner, node);
        inner.per_node_status.insert(node.to_string(), NodeStatus::Cancelled);
    }

    fn record_duration(inner: &mut Inner, node: &str) {
        if let Some(started) = inner.per_node_started_at.get(node) {
            inner.per_node_duration.insert(node.to_string(), started.elapsed());
        }
    }

    pub fn status_of(&self, node: &str) -> Option<NodeStatus> {
        self.inner
            .lock()
            .expect("execution context mutex poisoned")
            .per_node_status
            .get(node)
            .copied()
    }

    pub fn duration_of(&self, node: &str) -> Option<Duration> {
        self.inner
            .lock()
            .expect("execution context mutex poisoned")
            .per_node_duration
            .get(node)
            .copied()
    }

    /// A cheap read-only copy for passing into task invocations.
    pub fn snapshot(&self) -> ExecutionSnapshot {
        let inner = self.inner.lock().expect("execution context mutex poisoned");
        ExecutionSnapshot {
            dag_id: inner.dag_id.clone(),
            execution_id: inner.execution_id,
            overall_status: inner.overall_status,
            per_node_status: inner.per_node_status.clone(),
            per_node_result: inner.per_node_result.clone(),
            per_node_error: inner.per_node_error.clone(),
        }
    }

    /// Finalize the run: set `ended_at` and compute the overall status from
    /// final per-node statuses.
    pub fn finish(&self) -> FinishedContext {
        let mut inner = self.inner.lock().expect("execution context mutex poisoned");
        inner.ended_at = Some(Utc::now());

        let statuses: Vec<NodeStatus> = inner.per_node_status.values().copied().collect();
        let any_failed = statuses.iter().any(|s| *s == NodeStatus::Failed);
        let any_skipped = statuses.iter().any(|s| *s == NodeStatus::Skipped);
        let any_cancelled = statuses.iter().any(|s| *s == NodeStatus::Cancelled);

        inner.overall_status = if any_cancelled && !any_failed {
            OverallStatus::Cancelled
        } else if any_failed || any_skipped || any_cancelled {
            OverallStatus::Failed
        } else {
            OverallStatus::Success
        };

        FinishedContext {
            dag_id: inner.dag_id.clone(),
            execution_id: inner.execution_id,
            started_at: inner.started_at,
            ended_at: inner.ended_at.expect("just set"),
            overall_status: inner.overall_status,
            per_node_status: inner.per_node_status.clone(),
            per_node_result: inner.per_node_result.clone(),
            per_node_error: inner.per_node_error.clone(),
        }
    }
}

/// Immutable view of a terminated run, returned from `execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinishedContext {
    pub dag_id: String,
    pub execution_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub overall_status: OverallStatus,
    pub per_node_status: HashMap<String, NodeStatus>,
    pub per_node_result: HashMap<String, Value>,
    pub per_node_error: HashMap<String, String>,
}

impl FinishedContext {
    pub fn nodes_executed(&self) -> usize {
        self.per_node_status.len()
    }

    pub fn successful_nodes(&self) -> usize {
        self.per_node_status
            .values()
            .filter(|s| **s == NodeStatus::Success)
            .count()
    }

    pub fn failed_nodes(&self) -> usize {
        self.per_node_status
            .values()
            .filter(|s| **s == NodeStatus::Failed)
            .count()
    }

    pub fn wall_duration(&self) -> Duration {
        (self.ended_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }
}

/// A status report returned by `Workflow::status`, unified across in-flight
/// and terminated runs so callers don't need to branch on which they got.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub dag_id: String,
    pub execution_id: Uuid,
    pub overall_status: OverallStatus,
    pub per_node_status: HashMap<String, NodeStatus>,
    pub per_node_result: HashMap<String, Value>,
    pub per_node_error: HashMap<String, String>,
}

impl From<ExecutionSnapshot> for StatusSnapshot {
    fn from(snap: ExecutionSnapshot) -> Self {
        Self {
            dag_id: snap.dag_id,
            execution_id: snap.execution_id,
            overall_status: snap.overall_status,
            per_node_status: snap.per_node_status,
            per_node_result: snap.per_node_result,
            per_node_error: snap.per_node_error,
        }
    }
}

impl From<FinishedContext> for StatusSnapshot {
    fn from(finished: FinishedContext) -> Self {
        Self {
            dag_id: finished.dag_id,
            execution_id: finished.execution_id,
            overall_status: finished.overall_status,
            per_node_status: finished.per_node_status,
            per_node_result: finished.per_node_result,
            per_node_error: finished.per_node_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lifecycle_pending_to_success() {
        let ctx = ExecutionContext::new("dag-1".into());
        ctx.init_nodes(["a".to_string()]);
        assert_eq!(ctx.status_of("a"), Some(NodeStatus::Pending));

        ctx.transition_running("a");
        assert_eq!(ctx.status_of("a"), Some(NodeStatus::Running));

        ctx.record_success("a", json!({"ok": true}));
        assert_eq!(ctx.status_of("a"), Some(NodeStatus::Success));
    }

    #[test]
    fn finish_success_when_all_nodes_succeed() {
        let ctx = ExecutionContext::new("dag-1".into());
        ctx.init_nodes(["a".to_string(), "b".to_string()]);
        ctx.transition_running("a");
        ctx.record_success("a", json!(1));
        ctx.transition_running("b");
        ctx.record_success("b", json!(2));

        let finished = ctx.finish();
        assert_eq!(finished.overall_status, OverallStatus::Success);
        assert_eq!(finished.successful_nodes(), 2);
        assert_eq!(finished.failed_nodes(), 0);
    }

    #[test]
    fn finish_failed_when_any_node_fails() {
        let ctx = ExecutionContext::new("dag-1".into());
        ctx.init_nodes(["a".to_string()]);
        ctx.transition_running("a");
        ctx.record_failed("a", "boom".into());

        let finished = ctx.finish();
        assert_eq!(finished.overall_status, OverallStatus::Failed);
        assert_eq!(finished.per_node_error.get("a").unwrap(), "boom");
    }

    #[test]
    fn finish_cancelled_when_cancelled_without_failures() {
        let ctx = ExecutionContext::new("dag-1".into());
        ctx.init_nodes(["a".to_string()]);
        ctx.transition_running("a");
        ctx.record_cancelled("a");

        let finished = ctx.finish();
        assert_eq!(finished.overall_status, OverallStatus::Cancelled);
    }

    #[test]
    fn snapshot_reflects_in_flight_state() {
        let ctx = ExecutionContext::new("dag-1".into());
        ctx.init_nodes(["a".to_string(), "b".to_string()]);
        ctx.transition_running("a");
        ctx.record_success("a", json!({"v": 1}));

        let snap = ctx.snapshot();
        assert_eq!(snap.per_node_status.get("a"), Some(&NodeStatus::Success));
        assert_eq!(snap.per_node_status.get("b"), Some(&NodeStatus::Pending));
        assert_eq!(snap.per_node_result.get("a"), Some(&json!({"v": 1})));
        assert_eq!(snap.overall_status, OverallStatus::Running);
    }

    #[test]
    fn status_snapshot_conversions_preserve_fields() {
        let ctx = ExecutionContext::new("dag-1".into());
        ctx.init_nodes(["a".to_string()]);
        ctx.transition_running("a");
        ctx.record_failed("a", "boom".into());

        let live: StatusSnapshot = ctx.snapshot().into();
        assert_eq!(live.overall_status, OverallStatus::Running);
        assert_eq!(live.per_node_error.get("a").unwrap(), "boom");

        let finished: StatusSnapshot = ctx.finish().into();
        assert_eq!(finished.overall_status, OverallStatus::Failed);
        assert_eq!(finished.per_node_error.get("a").unwrap(), "boom");
    }
}
