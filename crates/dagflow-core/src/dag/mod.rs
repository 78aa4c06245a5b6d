//! DAG workflow execution engine: load a declarative workflow description,
//! validate it into a graph, and run it under one of three concurrency
//! disciplines with caching, retries, and structured observability.

pub mod cache;
pub mod cancel;
pub mod context;
pub mod engine;
pub mod events;
pub mod export;
pub mod graph;
pub mod loader;
pub mod metrics;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod types;

pub use cache::{cache_key, CacheEntry, ResultCache};
pub use cancel::CancelToken;
pub use context::{
    ExecutionContext, ExecutionSnapshot, FinishedContext, NodeStatus, OverallStatus, StatusSnapshot,
};
pub use engine::{Engine, LoadedWorkflow, WorkflowDiagnostics};
pub use events::{EventEmitter, EventKind, RunEvent};
pub use export::{parse_dot, to_dot, ParsedDot};
pub use graph::Graph;
pub use metrics::{MetricsAggregator, MetricsSnapshot};
pub use registry::{builtins, Task, TaskOutput, TaskRegistry};
pub use scheduler::{RunParams, Scheduler};
pub use types::{
    CacheKeyStrategy, CachePolicy, EdgeDefinition, ExecutionMode, FailurePolicy, NodeDefinition,
    NodeKind, RetryPolicy, WorkflowDefinition, WorkflowSettings,
};
