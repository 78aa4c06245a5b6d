//! Retry/Timeout Engine (§4.5): wraps a task invocation with an attempt
//! budget, a per-attempt deadline, and backoff sleeps that never hold a
//! shared lock.

use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};

use crate::dag::cancel::CancelToken;
use crate::dag::context::ExecutionSnapshot;
use crate::dag::events::{EventEmitter, EventKind};
use crate::dag::registry::Task;
use crate::dag::types::RetryPolicy;
use crate::{DagError, Result};

/// Invoke `task` up to `policy.attempt_budget()` times, enforcing `timeout`
/// per attempt and sleeping `policy.backoff(attempt_index)` between
/// attempts. Returns the first success, or the last observed error once the
/// budget is exhausted. Every attempt and backoff sleep is raced against
/// `cancel`: a cancellation request observed mid-attempt surfaces as
/// `DagError::Cancelled` immediately, with no further retry (§7).
pub async fn execute_with_retry(
    task: Arc<dyn Task>,
    node_name: &str,
    inputs: Value,
    snapshot: ExecutionSnapshot,
    policy: &RetryPolicy,
    timeout: std::time::Duration,
    events: &EventEmitter,
    cancel: &CancelToken,
) -> Result<Value> {
    if cancel.is_cancelled() {
        return Err(DagError::Cancelled(node_name.to_string()));
    }

    let attempt_budget = policy.attempt_budget();
    let mut last_error: Option<DagError> = None;

    for attempt in 0..attempt_budget {
        let started = Instant::now();
        let attempt_fut = tokio::time::timeout(timeout, task.call(inputs.clone(), snapshot.clone()));

        let error = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(DagError::Cancelled(node_name.to_string()));
            }
            outcome = attempt_fut => {
                match outcome {
                    Ok(Ok(value)) => return Ok(value),
                    Ok(Err(err)) => err,
                    Err(_) => DagError::Timeout(node_name.to_string(), timeout),
                }
            }
        };

        let elapsed = started.elapsed();
        let is_final_attempt = attempt + 1 == attempt_budget;

        if !is_final_attempt {
            events.emit(
                EventKind::NodeAttemptFailed,
                Some(node_name),
                json!({
                    "attempt": attempt,
                    "elapsed_ms": elapsed.as_millis() as u64,
                    "error": error.to_string(),
                }),
            );

            let delay = policy.backoff(attempt);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(DagError::Cancelled(node_name.to_string()));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        last_error = Some(error);
    }

    Err(last_error.expect("attempt_budget is always >= 1, so the loop runs at least once"))
}
