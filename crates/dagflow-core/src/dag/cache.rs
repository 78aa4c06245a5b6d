//! Result Cache: a concurrency-safe mapping from fingerprint to completed
//! result, with lazy TTL eviction. No background sweeper -- expiry is
//! checked (and acted on) only when a key is looked up.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::dag::metrics::MetricsAggregator;
use crate::dag::types::{CacheKeyStrategy, CachePolicy};

/// `{key, value, inserted_at, ttl, origin_node}`.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: Value,
    pub inserted_at: Instant,
    pub ttl: Duration,
    pub origin_node: String,
}

impl CacheEntry {
    fn is_live(&self) -> bool {
        self.inserted_at.elapsed() < self.ttl
    }
}

/// Shared across every run of every workflow. Guarded by a single async
/// mutex; the scheduler must never hold this lock while awaiting a task, so
/// every method here returns as soon as the map operation completes.
#[derive(Clone)]
pub struct ResultCache {
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
    metrics: MetricsAggregator,
}

impl ResultCache {
    pub fn new(metrics: MetricsAggregator) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            metrics,
        }
    }

    /// Returns the live entry for `key`, or records a miss and evicts the
    /// entry if it has expired.
    pub async fn lookup(&self, key: &str) -> Option<CacheEntry> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.is_live() => {
                let hit = entry.clone();
                drop(entries);
                self.metrics.record_cache_hit();
                Some(hit)
            }
            Some(_) => {
                entries.remove(key);
                drop(entries);
                self.metrics.record_cache_miss();
                None
            }
            None => {
                drop(entries);
                self.metrics.record_cache_miss();
                None
            }
        }
    }

    pub async fn store(&self, key: String, value: Value, ttl: Duration, origin_node: String) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
                ttl,
                origin_node,
            },
        );
    }

    /// Drops every entry unconditionally. Hit/miss counters are a process
    /// lifetime metric, not a cache-table metric, and are left untouched.
    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }
}

/// Compute the cache key for a node given its cache policy and the inputs
/// supplied for this run. `by_name` is stable across inputs; the other two
/// strategies fold in a canonical hash of the inputs.
pub fn cache_key(node_name: &str, policy: &CachePolicy, inputs: &Value) -> String {
    match policy.key_strategy {
        CacheKeyStrategy::ByName => node_name.to_string(),
        CacheKeyStrategy::ByNameAndInputHash => {
            format!("{node_name}:{}", input_hash(inputs))
        }
        CacheKeyStrategy::CustomTemplate => {
            let template = policy.custom_template.as_deref().unwrap_or("{node_name}");
            template
                .replace("{node_name}", node_name)
                .replace("{parameters_hash}", &input_hash(inputs))
        }
    }
}

/// SHA-256 hex digest of the inputs' canonical serialization: object keys
/// sorted lexically (via `serde_json`'s `BTreeMap`-backed canonicalization),
/// stable number formatting, UTF-8 encoding. Equal input mappings always
/// yield equal digests regardless of field insertion order.
fn input_hash(inputs: &Value) -> String {
    let canonical = canonicalize(inputs);
    let serialized = serde_json::to_string(&canonical).unwrap_or_default();
    let digest = Sha256::digest(serialized.as_bytes());
    hex_encode(&digest)
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: std::collections::BTreeMap<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), canonicalize(v)))
                .collect();
            serde_json::to_value(sorted).unwrap_or(Value::Null)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
