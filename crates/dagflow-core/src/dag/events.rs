//! Structured observability events (§6): `node_started`, `node_cache_hit`,
//! `node_cache_miss`, `node_attempt_failed`, `node_succeeded`, `node_failed`,
//! `run_started`, `run_completed`. Transport is an external collaborator's
//! concern; the core only emits -- as `tracing` records and, for any
//! in-process subscriber, as a typed event over an mpsc channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    NodeStarted,
    NodeCacheHit,
    NodeCacheMiss,
    NodeAttemptFailed,
    NodeSucceeded,
    NodeFailed,
    RunStarted,
    RunCompleted,
}

/// One observability event. Carries at minimum the run id, node name
/// (where applicable), timestamp, and a free-form attribute bag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub execution_id: Uuid,
    pub kind: EventKind,
    pub node: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub attributes: Value,
}

impl RunEvent {
    pub fn new(execution_id: Uuid, kind: EventKind, node: Option<String>, attributes: Value) -> Self {
        Self {
            execution_id,
            kind,
            node,
            timestamp: Utc::now(),
            attributes,
        }
    }
}

/// Fans run events out to both `tracing` (always) and an optional
/// in-process subscriber channel. Cloning shares the same subscriber.
#[derive(Clone)]
pub struct EventEmitter {
    execution_id: Uuid,
    sender: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl EventEmitter {
    pub fn new(execution_id: Uuid) -> Self {
        Self {
            execution_id,
            sender: None,
        }
    }

    /// Create an emitter paired with a receiver a caller can poll for
    /// events as the run progresses.
    pub fn with_subscriber(execution_id: Uuid) -> (Self, mpsc::UnboundedReceiver<RunEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                execution_id,
                sender: Some(tx),
            },
            rx,
        )
    }

    pub fn emit(&self, kind: EventKind, node: Option<&str>, attributes: Value) {
        let event = RunEvent::new(self.execution_id, kind, node.map(str::to_string), attributes);

        match kind {
            EventKind::NodeAttemptFailed | EventKind::NodeFailed => {
                tracing::warn!(
                    execution_id = %event.execution_id,
                    node = ?event.node,
                    kind = ?event.kind,
                    attributes = %event.attributes,
                    "dag event"
                );
            }
            _ => {
                tracing::info!(
                    execution_id = %event.execution_id,
                    node = ?event.node,
                    kind = ?event.kind,
                    attributes = %event.attributes,
                    "dag event"
                );
            }
        }

        if let Some(sender) = &self.sender {
            // A dropped receiver just means nobody is subscribed; the run
            // itself never depends on this send succeeding.
            let _ = sender.send(event);
        }
    }
}
