//! Metrics Aggregator: process-wide, monotonic counters plus a bounded
//! duration histogram for reporting. Shared across every run and workflow,
//! guarded by a single lock so concurrent runs never lose an update.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const DURATION_HISTORY_CAP: usize = 1000;

struct Inner {
    total_executions: u64,
    successful_executions: u64,
    failed_executions: u64,
    cache_hits: u64,
    cache_misses: u64,
    total_execution_duration: Duration,
    node_durations: VecDeque<Duration>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            total_executions: 0,
            successful_executions: 0,
            failed_executions: 0,
            cache_hits: 0,
            cache_misses: 0,
            total_execution_duration: Duration::ZERO,
            node_durations: VecDeque::with_capacity(DURATION_HISTORY_CAP),
        }
    }
}

/// A stable, point-in-time copy of the aggregator's counters, suitable for
/// reporting over the Execution API's `metrics()` call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub total_execution_duration_ms: u64,
    pub node_duration_p50_ms: u64,
    pub node_duration_p95_ms: u64,
    pub node_duration_p99_ms: u64,
}

/// Process-wide counters and a reporting histogram. Cheaply cloneable --
/// clones share the same underlying state.
#[derive(Clone)]
pub struct MetricsAggregator {
    inner: std::sync::Arc<Mutex<Inner>>,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self {
            inner: std::sync::Arc::new(Mutex::new(Inner::default())),
        }
    }
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cache_hit(&self) {
        self.inner.lock().expect("metrics mutex poisoned").cache_hits += 1;
    }

    pub fn record_cache_miss(&self) {
        self.inner.lock().expect("metrics mutex poisoned").cache_misses += 1;
    }

    /// Record a completed run: one execution, success/failure split, and
    /// the wall-clock duration added to the running sum.
    pub fn record_run_completion(&self, succeeded: bool, duration: Duration) {
        let mut inner = self.inner.lock().expect("metrics mutex poisoned");
        inner.total_executions += 1;
        if succeeded {
            inner.successful_executions += 1;
        } else {
            inner.failed_executions += 1;
        }
        inner.total_execution_duration += duration;
    }

    /// Record one node's execution duration for the reporting histogram.
    /// Best-effort only: never relied on for correctness, only for the
    /// p50/p95/p99 fields of a metrics snapshot.
    pub fn observe_node_duration(&self, duration: Duration) {
        let mut inner = self.inner.lock().expect("metrics mutex poisoned");
        if inner.node_durations.len() == DURATION_HISTORY_CAP {
            inner.node_durations.pop_front();
        }
        inner.node_durations.push_back(duration);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock().expect("metrics mutex poisoned");
        let mut sorted: Vec<Duration> = inner.node_durations.iter().copied().collect();
        sorted.sort();

        let percentile = |p: f64| -> u64 {
            if sorted.is_empty() {
                return 0;
            }
            let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
            sorted[idx.min(sorted.len() - 1)].as_millis() as u64
        };

        MetricsSnapshot {
            total_executions: inner.total_executions,
            successful_executions: inner.successful_executions,
            failed_executions: inner.failed_executions,
            cache_hits: inner.cache_hits,
            cache_misses: inner.cache_misses,
            total_execution_duration_ms: inner.total_execution_duration.as_millis() as u64,
            node_duration_p50_ms: percentile(0.50),
            node_duration_p95_ms: percentile(0.95),
            node_duration_p99_ms: percentile(0.99),
        }
    }
}
