use thiserror::Error;

/// Top-level error type for the dagflow-core library.
#[derive(Debug, Error)]
pub enum DagError {
    /// Workflow description is malformed: missing field, duplicate node name,
    /// edge referencing an undeclared node, or similar structural defect.
    #[error("schema error: {0}")]
    Schema(String),

    /// The graph validator found one or more cycles. Lists every node
    /// participating in a detected cycle, in no particular order.
    #[error("cyclic graph: cycle detected among nodes {nodes:?}")]
    CyclicGraph { nodes: Vec<String> },

    /// A node referenced a task name absent from the registry at dispatch time.
    #[error("unknown task '{0}' referenced by node '{1}'")]
    UnknownTask(String, String),

    /// An attempt's deadline elapsed before the task produced an outcome.
    #[error("node '{0}' timed out after {1:?}")]
    Timeout(String, std::time::Duration),

    /// The task implementation itself signalled failure.
    #[error("task error in node '{0}': {1}")]
    Task(String, String),

    /// A cancellation signal was observed before the node completed.
    #[error("node '{0}' cancelled")]
    Cancelled(String),

    /// Under `continue_on_failure`, a predecessor failed or was itself skipped.
    #[error("node '{0}' skipped: upstream dependency '{1}' did not succeed")]
    UpstreamSkipped(String, String),

    /// Configuration parse or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// Wraps `std::io::Error`.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, DagError>;
