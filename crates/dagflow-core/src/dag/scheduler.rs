//! The Scheduler (§4.6): computes the layered execution plan, dispatches
//! nodes per the selected concurrency discipline, and applies the run's
//! failure policy.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::sync::Semaphore;

use crate::dag::cache::{cache_key, ResultCache};
use crate::dag::cancel::CancelToken;
use crate::dag::context::{ExecutionContext, FinishedContext, NodeStatus};
use crate::dag::events::{EventEmitter, EventKind};
use crate::dag::graph::Graph;
use crate::dag::metrics::MetricsAggregator;
use crate::dag::registry::TaskRegistry;
use crate::dag::retry::execute_with_retry;
use crate::dag::types::{ExecutionMode, FailurePolicy, NodeDefinition};
use crate::DagError;

/// Everything the scheduler needs that is shared and long-lived across runs.
#[derive(Clone)]
pub struct Scheduler {
    pub graph: Arc<Graph>,
    pub registry: Arc<TaskRegistry>,
    pub cache: ResultCache,
    pub metrics: MetricsAggregator,
}

/// Parameters specific to a single run.
pub struct RunParams {
    pub dag_id: String,
    pub inputs: Value,
    pub mode: ExecutionMode,
    pub failure_policy: FailurePolicy,
    pub max_concurrent_tasks: usize,
    pub default_timeout_seconds: u64,
    pub default_cache_ttl_seconds: u64,
    pub cancel: CancelToken,
}

impl Scheduler {
    /// Build a fresh, fully-initialized context for a run against this
    /// scheduler's graph, without dispatching anything yet. Callers that
    /// need to publish the execution id before the run completes (e.g. for
    /// concurrent status polling) should use this with
    /// [`Scheduler::execute_with_context`] instead of [`Scheduler::execute`].
    pub fn new_context(&self, dag_id: &str) -> ExecutionContext {
        let context = ExecutionContext::new(dag_id.to_string());
        context.init_nodes(self.graph.nodes.keys().cloned());
        context
    }

    pub async fn execute(&self, params: RunParams, events: EventEmitter) -> FinishedContext {
        let context = self.new_context(&params.dag_id);
        self.execute_with_context(context, params, events).await
    }

    pub async fn execute_with_context(
        &self,
        context: ExecutionContext,
        params: RunParams,
        events: EventEmitter,
    ) -> FinishedContext {
        let run_started = Instant::now();
        events.emit(
            EventKind::RunStarted,
            None,
            json!({ "node_count": self.graph.nodes.len(), "mode": format!("{:?}", params.mode) }),
        );

        let layers = self.graph.layer_all();

        match params.mode {
            ExecutionMode::Sequential => {
                self.run_sequential(&layers, &context, &events, &params).await;
            }
            ExecutionMode::Parallel => {
                self.run_layered(&layers, &context, &events, &params, None).await;
            }
            ExecutionMode::Hybrid => {
                let semaphore = Arc::new(Semaphore::new(params.max_concurrent_tasks));
                self.run_layered(&layers, &context, &events, &params, Some(semaphore))
                    .await;
            }
        }

        let finished = context.finish();
        let succeeded = finished.overall_status == crate::dag::context::OverallStatus::Success;
        self.metrics
            .record_run_completion(succeeded, run_started.elapsed());

        events.emit(
            EventKind::RunCompleted,
            None,
            json!({
                "overall_status": format!("{:?}", finished.overall_status),
                "nodes_executed": finished.nodes_executed(),
                "successful_nodes": finished.successful_nodes(),
                "failed_nodes": finished.failed_nodes(),
                "wall_duration_ms": finished.wall_duration().as_millis() as u64,
            }),
        );

        finished
    }

    async fn run_sequential(
        &self,
        layers: &[Vec<String>],
        context: &ExecutionContext,
        events: &EventEmitter,
        params: &RunParams,
    ) {
        'outer: for layer in layers {
            for name in layer {
                if params.cancel.is_cancelled() {
                    context.record_cancelled(name);
                    continue;
                }

                if let Some(blocking) = self.blocked_by(&context, name) {
                    context.record_skipped(
                        name,
                        DagError::UpstreamSkipped(name.clone(), blocking).to_string(),
                    );
                    continue;
                }

                let ok = self.dispatch_node(name, context, events, params).await;
                if !ok && params.failure_policy == FailurePolicy::StopOnFirstFailure {
                    break 'outer;
                }
            }
        }
    }

    async fn run_layered(
        &self,
        layers: &[Vec<String>],
        context: &ExecutionContext,
        events: &EventEmitter,
        params: &RunParams,
        semaphore: Option<Arc<Semaphore>>,
    ) {
        for layer in layers {
            let mut runnable = Vec::new();

            for name in layer {
                if params.cancel.is_cancelled() {
                    context.record_cancelled(name);
                    continue;
                }
                if let Some(blocking) = self.blocked_by(context, name) {
                    context.record_skipped(
                        name,
                        DagError::UpstreamSkipped(name.clone(), blocking).to_string(),
                    );
                    continue;
                }
                runnable.push(name.clone());
            }

            if runnable.is_empty() {
                continue;
            }

            let mut handles = Vec::with_capacity(runnable.len());
            for name in runnable {
                let scheduler = self.clone();
                let context = context.clone();
                let events = events.clone();
                let inputs = params.inputs.clone();
                let timeout_default = params.default_timeout_seconds;
                let ttl_default = params.default_cache_ttl_seconds;
                let semaphore = semaphore.clone();
                let cancel = params.cancel.clone();

                handles.push(tokio::spawn(async move {
                    let _permit = match &semaphore {
                        Some(sem) => Some(sem.clone().acquire_owned().await.expect("semaphore not closed")),
                        None => None,
                    };
                    scheduler
                        .dispatch_node_owned(&name, &context, &events, &inputs, timeout_default, ttl_default, &cancel)
                        .await
                }));
            }

            let mut any_failed = false;
            for handle in handles {
                match handle.await {
                    Ok(ok) => any_failed |= !ok,
                    Err(_) => any_failed = true,
                }
            }

            if any_failed && params.failure_policy == FailurePolicy::StopOnFirstFailure {
                break;
            }
        }
    }

    /// `Some(predecessor_name)` if `name` must be skipped because a
    /// predecessor did not succeed; `None` if it is clear to dispatch.
    fn blocked_by(&self, context: &ExecutionContext, name: &str) -> Option<String> {
        self.graph.predecessors_of(name).iter().find_map(|pred| {
            match context.status_of(pred) {
                Some(NodeStatus::Success) | None => None,
                Some(_) => Some(pred.clone()),
            }
        })
    }

    async fn dispatch_node(
        &self,
        name: &str,
        context: &ExecutionContext,
        events: &EventEmitter,
        params: &RunParams,
    ) -> bool {
        self.dispatch_node_owned(
            name,
            context,
            events,
            &params.inputs,
            params.default_timeout_seconds,
            params.default_cache_ttl_seconds,
            &params.cancel,
        )
        .await
    }

    /// Per-node dispatch (§4.6.3): transition to running, consult the
    /// cache, fall back to the retry/timeout engine, record the outcome.
    #[allow(clippy::too_many_arguments)]
    async fn dispatch_node_owned(
        &self,
        name: &str,
        context: &ExecutionContext,
        events: &EventEmitter,
        inputs: &Value,
        default_timeout_seconds: u64,
        default_cache_ttl_seconds: u64,
        cancel: &CancelToken,
    ) -> bool {
        let node: NodeDefinition = match self.graph.nodes.get(name) {
            Some(n) => n.clone(),
            None => return false,
        };

        context.transition_running(name);
        events.emit(EventKind::NodeStarted, Some(name), json!({}));

        let key = if node.cache_policy.enabled {
            Some(cache_key(name, &node.cache_policy, inputs))
        } else {
            None
        };

        if let Some(ref key) = key {
            if let Some(entry) = self.cache.lookup(key).await {
                context.record_success(name, entry.value.clone());
                events.emit(EventKind::NodeCacheHit, Some(name), json!({ "key": key }));
                return true;
            }
            events.emit(EventKind::NodeCacheMiss, Some(name), json!({ "key": key }));
        }

        let task = match self.registry.lookup(&node.task_name) {
            Some(t) => t,
            None => {
                let err = DagError::UnknownTask(node.task_name.clone(), name.to_string());
                context.record_failed(name, err.to_string());
                events.emit(EventKind::NodeFailed, Some(name), json!({ "error": err.to_string() }));
                return false;
            }
        };

        let timeout = node.timeout(default_timeout_seconds);
        let snapshot = context.snapshot();
        let outcome = execute_with_retry(
            task,
            name,
            inputs.clone(),
            snapshot,
            &node.retry_policy,
            timeout,
            events,
            cancel,
        )
        .await;

        match outcome {
            Ok(value) => {
                context.record_success(name, value.clone());
                if let Some(d) = context.duration_of(name) {
                    self.metrics.observe_node_duration(d);
                }
                if let Some(key) = key {
                    let ttl = Duration::from_secs(
                        node.cache_policy.ttl_seconds.unwrap_or(default_cache_ttl_seconds),
                    );
                    self.cache.store(key, value, ttl, name.to_string()).await;
                }
                events.emit(EventKind::NodeSucceeded, Some(name), json!({}));
                true
            }
            Err(DagError::Cancelled(_)) => {
                context.record_cancelled(name);
                if let Some(d) = context.duration_of(name) {
                    self.metrics.observe_node_duration(d);
                }
                events.emit(EventKind::NodeFailed, Some(name), json!({ "error": "cancelled" }));
                false
            }
            Err(err) => {
                context.record_failed(name, err.to_string());
                if let Some(d) = context.duration_of(name) {
                    self.metrics.observe_node_duration(d);
                }
                events.emit(EventKind::NodeFailed, Some(name), json!({ "error": err.to_string() }));
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::context::OverallStatus;
    use crate::dag::registry::builtins;
    use crate::dag::types::{
        CachePolicy, EdgeDefinition, NodeKind, RetryPolicy, WorkflowDefinition, WorkflowSettings,
    };
    use uuid::Uuid;

    fn node(name: &str, task_name: &str) -> NodeDefinition {
        NodeDefinition {
            name: name.into(),
            task_name: task_name.into(),
            kind: NodeKind::Custom,
            inputs: vec![],
            outputs: vec![],
            retry_policy: RetryPolicy::default(),
            timeout_seconds: Some(5),
            cache_policy: CachePolicy::default(),
        }
    }

    fn edge(from: &str, to: &str) -> EdgeDefinition {
        EdgeDefinition {
            from: from.into(),
            to: to.into(),
            condition: "always".into(),
            weight: 1.0,
            error_handling: false,
        }
    }

    fn scheduler_with(registry: TaskRegistry, graph: Graph) -> Scheduler {
        Scheduler {
            graph: Arc::new(graph),
            registry: Arc::new(registry),
            cache: ResultCache::new(MetricsAggregator::new()),
            metrics: MetricsAggregator::new(),
        }
    }

    fn run_params(mode: ExecutionMode, failure_policy: FailurePolicy) -> RunParams {
        RunParams {
            dag_id: "dag".into(),
            inputs: json!({}),
            mode,
            failure_policy,
            max_concurrent_tasks: 2,
            default_timeout_seconds: 5,
            default_cache_ttl_seconds: 60,
            cancel: CancelToken::new(),
        }
    }

    #[tokio::test]
    async fn linear_run_succeeds_sequentially() {
        let mut registry = TaskRegistry::new();
        builtins::register_all(&mut registry);
        let wf = WorkflowDefinition {
            name: "w".into(),
            description: String::new(),
            nodes: vec![
                node("a", "start_job"),
                node("b", "check_health"),
                node("c", "complete_job"),
            ],
            edges: vec![edge("a", "b"), edge("b", "c")],
            settings: WorkflowSettings::default(),
        };
        let graph = Graph::build(&wf).unwrap();
        let scheduler = scheduler_with(registry, graph);
        let (events, _rx) = EventEmitter::with_subscriber(Uuid::new_v4());

        let finished = scheduler
            .execute(
                run_params(ExecutionMode::Sequential, FailurePolicy::StopOnFirstFailure),
                events,
            )
            .await;

        assert_eq!(finished.overall_status, OverallStatus::Success);
        assert_eq!(finished.successful_nodes(), 3);
    }

    #[tokio::test]
    async fn diamond_runs_in_parallel_mode() {
        let mut registry = TaskRegistry::new();
        builtins::register_all(&mut registry);
        let wf = WorkflowDefinition {
            name: "w".into(),
            description: String::new(),
            nodes: vec![
                node("a", "start_job"),
                node("b", "check_health"),
                node("c", "check_health"),
                node("d", "complete_job"),
            ],
            edges: vec![
                edge("a", "b"),
                edge("a", "c"),
                edge("b", "d"),
                edge("c", "d"),
            ],
            settings: WorkflowSettings::default(),
        };
        let graph = Graph::build(&wf).unwrap();
        let scheduler = scheduler_with(registry, graph);
        let (events, _rx) = EventEmitter::with_subscriber(Uuid::new_v4());

        let finished = scheduler
            .execute(
                run_params(ExecutionMode::Parallel, FailurePolicy::StopOnFirstFailure),
                events,
            )
            .await;

        assert_eq!(finished.overall_status, OverallStatus::Success);
        assert_eq!(finished.successful_nodes(), 4);
    }

    #[tokio::test]
    async fn stop_on_first_failure_leaves_later_layers_pending() {
        let mut registry = TaskRegistry::new();
        registry.register("fail", |_i: Value, _c: crate::dag::context::ExecutionSnapshot| async move {
            Err(DagError::Task("fail".into(), "boom".into()))
        });
        builtins::register_all(&mut registry);

        let wf = WorkflowDefinition {
            name: "w".into(),
            description: String::new(),
            nodes: vec![node("a", "fail"), node("b", "check_health")],
            edges: vec![edge("a", "b")],
            settings: WorkflowSettings::default(),
        };
        let graph = Graph::build(&wf).unwrap();
        let scheduler = scheduler_with(registry, graph);
        let (events, _rx) = EventEmitter::with_subscriber(Uuid::new_v4());

        let finished = scheduler
            .execute(
                run_params(ExecutionMode::Sequential, FailurePolicy::StopOnFirstFailure),
                events,
            )
            .await;

        assert_eq!(finished.overall_status, OverallStatus::Failed);
        assert_eq!(finished.per_node_status["a"], NodeStatus::Failed);
        assert_eq!(finished.per_node_status["b"], NodeStatus::Pending);
    }

    #[tokio::test]
    async fn continue_on_failure_skips_only_dependents() {
        let mut registry = TaskRegistry::new();
        registry.register("fail", |_i: Value, _c: crate::dag::context::ExecutionSnapshot| async move {
            Err(DagError::Task("fail".into(), "boom".into()))
        });
        builtins::register_all(&mut registry);

        let wf = WorkflowDefinition {
            name: "w".into(),
            description: String::new(),
            nodes: vec![
                node("a", "fail"),
                node("b", "check_health"),
                node("c", "check_health"),
            ],
            edges: vec![edge("a", "b")],
            settings: WorkflowSettings::default(),
        };
        let graph = Graph::build(&wf).unwrap();
        let scheduler = scheduler_with(registry, graph);
        let (events, _rx) = EventEmitter::with_subscriber(Uuid::new_v4());

        let finished = scheduler
            .execute(
                run_params(ExecutionMode::Parallel, FailurePolicy::ContinueOnFailure),
                events,
            )
            .await;

        assert_eq!(finished.overall_status, OverallStatus::Failed);
        assert_eq!(finished.per_node_status["a"], NodeStatus::Failed);
        assert_eq!(finished.per_node_status["b"], NodeStatus::Skipped);
        assert_eq!(finished.per_node_status["c"], NodeStatus::Success);
    }

    #[tokio::test]
    async fn hybrid_mode_respects_concurrency_bound() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let mut registry = TaskRegistry::new();
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let current_clone = current.clone();
        let peak_clone = peak.clone();
        registry.register(
            "slow",
            move |_i: Value, _c: crate::dag::context::ExecutionSnapshot| {
                let current = current_clone.clone();
                let peak = peak_clone.clone();
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok(json!({}))
                }
            },
        );

        let nodes: Vec<NodeDefinition> = (0..6).map(|i| node(&format!("n{i}"), "slow")).collect();
        let wf = WorkflowDefinition {
            name: "w".into(),
            description: String::new(),
            nodes,
            edges: vec![],
            settings: WorkflowSettings::default(),
        };
        let graph = Graph::build(&wf).unwrap();
        let scheduler = scheduler_with(registry, graph);
        let (events, _rx) = EventEmitter::with_subscriber(Uuid::new_v4());

        let mut params = run_params(ExecutionMode::Hybrid, FailurePolicy::StopOnFirstFailure);
        params.max_concurrent_tasks = 2;

        let finished = scheduler.execute(params, events).await;

        assert_eq!(finished.overall_status, OverallStatus::Success);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn unknown_task_fails_the_node() {
        let registry = TaskRegistry::new();
        let wf = WorkflowDefinition {
            name: "w".into(),
            description: String::new(),
            nodes: vec![node("a", "does_not_exist")],
            edges: vec![],
            settings: WorkflowSettings::default(),
        };
        let graph = Graph::build(&wf).unwrap();
        let scheduler = scheduler_with(registry, graph);
        let (events, _rx) = EventEmitter::with_subscriber(Uuid::new_v4());

        let finished = scheduler
            .execute(
                run_params(ExecutionMode::Sequential, FailurePolicy::StopOnFirstFailure),
                events,
            )
            .await;

        assert_eq!(finished.overall_status, OverallStatus::Failed);
        assert!(finished.per_node_error["a"].contains("unknown task"));
    }

    #[tokio::test]
    async fn cancellation_mid_run_stops_the_in_flight_node() {
        let mut registry = TaskRegistry::new();
        registry.register("slow", |_i: Value, _c: crate::dag::context::ExecutionSnapshot| async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(json!({}))
        });

        let wf = WorkflowDefinition {
            name: "w".into(),
            description: String::new(),
            nodes: vec![node("a", "slow")],
            edges: vec![],
            settings: WorkflowSettings::default(),
        };
        let graph = Graph::build(&wf).unwrap();
        let scheduler = scheduler_with(registry, graph);
        let (events, _rx) = EventEmitter::with_subscriber(Uuid::new_v4());

        let mut params = run_params(ExecutionMode::Sequential, FailurePolicy::StopOnFirstFailure);
        let cancel = CancelToken::new();
        params.cancel = cancel.clone();

        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel_clone.cancel();
        });

        let finished = scheduler.execute(params, events).await;

        assert_eq!(finished.overall_status, OverallStatus::Cancelled);
        assert_eq!(finished.per_node_status["a"], NodeStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancellation_before_dispatch_skips_later_layers() {
        let mut registry = TaskRegistry::new();
        builtins::register_all(&mut registry);
        let wf = WorkflowDefinition {
            name: "w".into(),
            description: String::new(),
            nodes: vec![node("a", "start_job"), node("b", "check_health")],
            edges: vec![edge("a", "b")],
            settings: WorkflowSettings::default(),
        };
        let graph = Graph::build(&wf).unwrap();
        let scheduler = scheduler_with(registry, graph);
        let (events, _rx) = EventEmitter::with_subscriber(Uuid::new_v4());

        let params = run_params(ExecutionMode::Sequential, FailurePolicy::StopOnFirstFailure);
        params.cancel.cancel();

        let finished = scheduler.execute(params, events).await;

        assert_eq!(finished.overall_status, OverallStatus::Cancelled);
        assert_eq!(finished.per_node_status["a"], NodeStatus::Cancelled);
        assert_eq!(finished.per_node_status["b"], NodeStatus::Cancelled);
    }
}
