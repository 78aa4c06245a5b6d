//! Task Registry: a mapping from task name to an executable unit.
//!
//! A task accepts `(inputs, context snapshot)` and returns a result value or
//! an error. The registry itself never runs a task with a timeout or a
//! retry budget -- that's the Retry/Timeout Engine's job (`dag::retry`).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::sleep;

use crate::dag::context::ExecutionSnapshot;
use crate::Result;

pub type TaskOutput = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;

/// A task implementation: takes the caller-supplied inputs for this node and
/// a read-only snapshot of the run so far, and returns a boxed future.
pub trait Task: Send + Sync {
    fn call(&self, inputs: Value, context: ExecutionSnapshot) -> TaskOutput;
}

impl<F, Fut> Task for F
where
    F: Fn(Value, ExecutionSnapshot) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    fn call(&self, inputs: Value, context: ExecutionSnapshot) -> TaskOutput {
        Box::pin(self(inputs, context))
    }
}

/// Maps task names to implementations. Reads are lock-free after setup;
/// mutation is expected only during registration, before any run starts.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, Arc<dyn Task>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in stub tasks used by tests and
    /// examples: real deployments register replacements for any of these.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtins::register_all(&mut registry);
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, task: impl Task + 'static) {
        self.tasks.insert(name.into(), Arc::new(task));
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Task>> {
        self.tasks.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }
}

/// The minimal built-in task set: deterministic stubs returning small
/// values after a bounded delay, standing in for the domain tasks (AI
/// calls, tool invocations, validation checks) a real deployment supplies.
pub mod builtins {
    use super::*;
    use serde_json::json;

    pub fn register_all(registry: &mut TaskRegistry) {
        registry.register("start_job", start_job);
        registry.register("complete_job", complete_job);
        registry.register("make_ai_request", make_ai_request);
        registry.register("process_ai_response", process_ai_response);
        registry.register("execute_tool", execute_tool);
        registry.register("validate_security", validate_security);
        registry.register("transform_data", transform_data);
        registry.register("check_health", check_health);
    }

    async fn start_job(inputs: Value, _context: ExecutionSnapshot) -> Result<Value> {
        Ok(json!({
            "job_id": inputs.get("job_id"),
            "user_id": inputs.get("user_id"),
        }))
    }

    async fn complete_job(inputs: Value, _context: ExecutionSnapshot) -> Result<Value> {
        let status = inputs
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("completed");
        Ok(json!({ "final_status": status }))
    }

    async fn make_ai_request(inputs: Value, _context: ExecutionSnapshot) -> Result<Value> {
        sleep(Duration::from_millis(20)).await;
        let prompt = inputs.get("prompt").and_then(Value::as_str).unwrap_or("");
        Ok(json!({
            "response": format!("AI response for: {prompt}"),
            "tokens_used": 150,
        }))
    }

    async fn process_ai_response(inputs: Value, _context: ExecutionSnapshot) -> Result<Value> {
        let response = inputs
            .get("response")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_uppercase();
        Ok(json!({
            "processed_response": response,
            "validation_status": "valid",
            "confidence_score": 0.95,
        }))
    }

    async fn execute_tool(inputs: Value, _context: ExecutionSnapshot) -> Result<Value> {
        sleep(Duration::from_millis(10)).await;
        let tool_name = inputs
            .get("tool_name")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        Ok(json!({
            "result": format!("tool '{tool_name}' executed successfully"),
            "status": "success",
        }))
    }

    async fn validate_security(_inputs: Value, _context: ExecutionSnapshot) -> Result<Value> {
        Ok(json!({ "blocked": false, "security_score": 0.9 }))
    }

    async fn transform_data(inputs: Value, _context: ExecutionSnapshot) -> Result<Value> {
        let transformed = match inputs.get("input_data").and_then(Value::as_object) {
            Some(map) => map
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.to_string().to_uppercase())))
                .collect::<serde_json::Map<_, _>>(),
            None => serde_json::Map::new(),
        };
        Ok(json!({ "transformed_data": transformed }))
    }

    async fn check_health(_inputs: Value, _context: ExecutionSnapshot) -> Result<Value> {
        Ok(json!({ "health_status": "healthy", "unhealthy_services": [] }))
    }
}
