//! Static data model for a loaded workflow: nodes, edges, and the policies
//! attached to each node. These types are produced once by the loader and
//! shared read-only across every run.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A single task instance: a name, a task reference, and the execution
/// policies that govern how it is retried, timed out, and cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDefinition {
    /// Unique identifier within the workflow.
    pub name: String,
    /// Key into the task registry.
    pub task_name: String,
    /// Classification label; informational only, used for export colors and logs.
    #[serde(default)]
    pub kind: NodeKind,
    /// Declared shape of required data. Carried verbatim, not schema-checked.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Declared shape of produced data. Carried verbatim, not schema-checked.
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    /// Per-attempt deadline, in seconds. `None` defers to the engine default.
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub cache_policy: CachePolicy,
}

impl NodeDefinition {
    pub fn timeout(&self, default_seconds: u64) -> Duration {
        Duration::from_secs(self.timeout_seconds.unwrap_or(default_seconds))
    }
}

/// Classification label for a node. Purely informational: used to pick an
/// export color and to tag log lines, never to gate dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    JobControl,
    AiRequest,
    ToolExecution,
    Validation,
    Transform,
    HealthCheck,
    #[default]
    Custom,
}

/// `{max_retries, base_delay, exponential_backoff}`. `max_retries == 0` means
/// "one attempt, no retries."
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub exponential_backoff: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 100,
            exponential_backoff: false,
        }
    }
}

impl RetryPolicy {
    /// Attempt budget: initial attempt plus every retry.
    pub fn attempt_budget(&self) -> u32 {
        self.max_retries + 1
    }

    /// `delay(attempt_index) = base_delay` when not exponential, else
    /// `base_delay * 2^attempt_index`. `attempt_index` starts at 0 for the
    /// first retry following the initial attempt.
    pub fn backoff(&self, attempt_index: u32) -> Duration {
        if self.exponential_backoff {
            let factor = 2u64.saturating_pow(attempt_index);
            Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
        } else {
            Duration::from_millis(self.base_delay_ms)
        }
    }
}

/// `{enabled, ttl, key_strategy, custom_template?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CachePolicy {
    pub enabled: bool,
    pub ttl_seconds: Option<u64>,
    pub key_strategy: CacheKeyStrategy,
    pub custom_template: Option<String>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_seconds: None,
            key_strategy: CacheKeyStrategy::ByName,
            custom_template: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CacheKeyStrategy {
    #[default]
    ByName,
    ByNameAndInputHash,
    CustomTemplate,
}

/// `{from, to, condition, weight, error_handling}`. The scheduler uses only
/// `from`/`to` for ordering; the remaining fields are carried verbatim and
/// exposed to observers and graph export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDefinition {
    pub from: String,
    pub to: String,
    #[serde(default = "default_condition")]
    pub condition: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub error_handling: bool,
}

fn default_condition() -> String {
    "always".to_string()
}

fn default_weight() -> f64 {
    1.0
}

/// One of the three supported concurrency disciplines for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Sequential,
    #[default]
    Parallel,
    Hybrid,
}

/// Governs what happens to the rest of a run after a node fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    StopOnFirstFailure,
    ContinueOnFailure,
}

/// Optional top-level settings carried by a workflow description.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WorkflowSettings {
    pub failure_policy: FailurePolicy,
    pub max_concurrent_tasks: Option<usize>,
    pub default_execution_mode: Option<ExecutionMode>,
}

/// A fully parsed, not-yet-validated workflow description: the output of the
/// loader and the input to the graph validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub nodes: Vec<NodeDefinition>,
    #[serde(default)]
    pub edges: Vec<EdgeDefinition>,
    #[serde(default)]
    pub settings: WorkflowSettings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_policy_fixed_backoff() {
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay_ms: 10,
            exponential_backoff: false,
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(10));
        assert_eq!(policy.backoff(1), Duration::from_millis(10));
        assert_eq!(policy.attempt_budget(), 3);
    }

    #[test]
    fn retry_policy_exponential_backoff() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_delay_ms: 10,
            exponential_backoff: true,
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(10));
        assert_eq!(policy.backoff(1), Duration::from_millis(20));
        assert_eq!(policy.backoff(2), Duration::from_millis(40));
    }

    #[test]
    fn node_timeout_falls_back_to_default() {
        let node = NodeDefinition {
            name: "a".into(),
            task_name: "noop".into(),
            kind: NodeKind::Custom,
            inputs: vec![],
            outputs: vec![],
            retry_policy: RetryPolicy::default(),
            timeout_seconds: None,
            cache_policy: CachePolicy::default(),
        };
        assert_eq!(node.timeout(30), Duration::from_secs(30));
    }
}
