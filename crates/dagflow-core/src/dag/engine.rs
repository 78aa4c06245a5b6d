//! Top-level Execution API (§6): the facade real callers hold onto. Wraps a
//! set of loaded workflows, the shared task registry, result cache, and
//! metrics aggregator, and keeps a run history so a concurrent caller can
//! poll [`Engine::status`] for a run that's still in flight.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use serde_json::Value;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::dag::cache::ResultCache;
use crate::dag::cancel::CancelToken;
use crate::dag::context::{ExecutionContext, FinishedContext, StatusSnapshot};
use crate::dag::events::EventEmitter;
use crate::dag::graph::Graph;
use crate::dag::metrics::{MetricsAggregator, MetricsSnapshot};
use crate::dag::registry::{Task, TaskRegistry};
use crate::dag::scheduler::{RunParams, Scheduler};
use crate::dag::loader;
use crate::dag::types::{ExecutionMode, WorkflowDefinition};
use crate::{DagError, Result};

/// A parsed, validated workflow ready to execute: its definition plus the
/// graph built and cycle-checked from it.
#[derive(Clone)]
pub struct LoadedWorkflow {
    pub definition: WorkflowDefinition,
    pub graph: std::sync::Arc<Graph>,
}

impl LoadedWorkflow {
    pub fn from_path(path: &Path) -> Result<Self> {
        Self::from_definition(loader::load(path)?)
    }

    pub fn from_str(data: &str) -> Result<Self> {
        Self::from_definition(loader::parse(data)?)
    }

    fn from_definition(definition: WorkflowDefinition) -> Result<Self> {
        let graph = Graph::build(&definition)?;
        Ok(Self {
            definition,
            graph: std::sync::Arc::new(graph),
        })
    }

    /// Render the graph as Graphviz DOT (§6's "visual form" export).
    pub fn export_dot(&self) -> String {
        crate::dag::export::to_dot(&self.definition, &self.graph)
    }
}

/// Structural diagnostics returned by [`Engine::diagnostics`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkflowDiagnostics {
    pub node_count: usize,
    pub edge_count: usize,
    pub orphan_nodes: Vec<String>,
    pub unreachable_nodes: Vec<String>,
}

enum RunRecord {
    Running(ExecutionContext),
    Finished(FinishedContext),
}

/// Engine-wide state shared across every loaded workflow and run. Cheap to
/// clone (everything inside is already `Arc`/`Mutex`-backed) so it can be
/// handed to multiple callers -- a CLI invocation typically owns exactly one.
pub struct Engine {
    config: EngineConfig,
    workflows: Mutex<HashMap<String, LoadedWorkflow>>,
    registry: Mutex<TaskRegistry>,
    cache: ResultCache,
    metrics: MetricsAggregator,
    runs: Mutex<HashMap<Uuid, RunRecord>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let metrics = MetricsAggregator::new();
        Self {
            config,
            workflows: Mutex::new(HashMap::new()),
            registry: Mutex::new(TaskRegistry::with_builtins()),
            cache: ResultCache::new(metrics.clone()),
            metrics,
            runs: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_default_config() -> Self {
        Self::new(EngineConfig::default())
    }

    /// Load a workflow description from disk, returning its `dag_id` (the
    /// workflow's declared name) for use with [`Engine::execute`].
    pub fn load_path(&self, path: &Path) -> Result<String> {
        self.insert(LoadedWorkflow::from_path(path)?)
    }

    /// Load a workflow description from an in-memory TOML document.
    pub fn load_str(&self, data: &str) -> Result<String> {
        self.insert(LoadedWorkflow::from_str(data)?)
    }

    fn insert(&self, loaded: LoadedWorkflow) -> Result<String> {
        let dag_id = loaded.definition.name.clone();
        self.workflows
            .lock()
            .expect("workflow registry mutex poisoned")
            .insert(dag_id.clone(), loaded);
        Ok(dag_id)
    }

    /// Register (or replace) a task implementation under `name`.
    pub fn register_task(&self, name: impl Into<String>, task: impl Task + 'static) {
        self.registry
            .lock()
            .expect("task registry mutex poisoned")
            .register(name, task);
    }

    pub fn export_dot(&self, dag_id: &str) -> Result<String> {
        self.loaded(dag_id).map(|w| w.export_dot())
    }

    /// Structural diagnostics for a loaded workflow: node/edge counts plus
    /// any orphan or unreachable nodes (warnings, not load-time errors).
    pub fn diagnostics(&self, dag_id: &str) -> Result<WorkflowDiagnostics> {
        let loaded = self.loaded(dag_id)?;
        Ok(WorkflowDiagnostics {
            node_count: loaded.graph.nodes.len(),
            edge_count: loaded.graph.edges.len(),
            orphan_nodes: loaded.graph.orphan_nodes(),
            unreachable_nodes: loaded.graph.unreachable_nodes(),
        })
    }

    fn loaded(&self, dag_id: &str) -> Result<LoadedWorkflow> {
        self.workflows
            .lock()
            .expect("workflow registry mutex poisoned")
            .get(dag_id)
            .cloned()
            .ok_or_else(|| DagError::Schema(format!("no workflow loaded with dag_id '{dag_id}'")))
    }

    /// Execute a previously loaded workflow to completion.
    ///
    /// `rerun_affected_only` is accepted for forward compatibility with
    /// incremental re-execution but is not yet implemented: every call runs
    /// every node, matching "no partial re-run support" until that lands.
    pub async fn execute(
        &self,
        dag_id: &str,
        inputs: Value,
        mode: Option<ExecutionMode>,
        rerun_affected_only: bool,
        cancel: Option<CancelToken>,
    ) -> Result<FinishedContext> {
        if rerun_affected_only {
            tracing::debug!(dag_id, "rerun_affected_only requested but unsupported; running full graph");
        }

        let loaded = self.loaded(dag_id)?;
        let settings = &loaded.definition.settings;

        let mode = mode
            .or(settings.default_execution_mode)
            .unwrap_or_else(|| self.config.default_execution_mode());
        let max_concurrent_tasks = settings
            .max_concurrent_tasks
            .unwrap_or(self.config.execution.max_concurrent_tasks);

        let registry = std::sync::Arc::new(
            self.registry
                .lock()
                .expect("task registry mutex poisoned")
                .clone(),
        );
        let scheduler = Scheduler {
            graph: loaded.graph.clone(),
            registry,
            cache: self.cache.clone(),
            metrics: self.metrics.clone(),
        };

        let context = scheduler.new_context(dag_id);
        let execution_id = context.execution_id();
        self.runs
            .lock()
            .expect("run history mutex poisoned")
            .insert(execution_id, RunRecord::Running(context.clone()));

        let params = RunParams {
            dag_id: dag_id.to_string(),
            inputs,
            mode,
            failure_policy: settings.failure_policy,
            max_concurrent_tasks,
            default_timeout_seconds: self.config.execution.default_timeout_seconds,
            default_cache_ttl_seconds: self.config.cache.default_ttl_seconds,
            cancel: cancel.unwrap_or_default(),
        };

        let events = EventEmitter::new(execution_id);
        let finished = scheduler.execute_with_context(context, params, events).await;

        self.runs
            .lock()
            .expect("run history mutex poisoned")
            .insert(execution_id, RunRecord::Finished(finished.clone()));

        Ok(finished)
    }

    /// Look up the status of a run by its execution id, whether still in
    /// flight or already finished. `None` if no such run is known.
    pub fn status(&self, execution_id: Uuid) -> Option<StatusSnapshot> {
        let runs = self.runs.lock().expect("run history mutex poisoned");
        runs.get(&execution_id).map(|record| match record {
            RunRecord::Running(ctx) => ctx.snapshot().into(),
            RunRecord::Finished(finished) => finished.clone().into(),
        })
    }

    /// Process-wide metrics accumulated across every run this engine has
    /// executed.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Drop every cached result. Hit/miss counters are left untouched.
    pub async fn clear_cache(&self) {
        self.cache.clear().await;
    }
}
