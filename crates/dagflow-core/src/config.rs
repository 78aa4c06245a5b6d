use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::dag::{ExecutionMode, FailurePolicy};
use crate::{DagError, Result};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Engine-wide defaults applied whenever a workflow description or a node
/// leaves the corresponding field unset. Loaded from `dagflow.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub execution: ExecutionConfig,
    pub retry: RetryConfig,
    pub cache: CacheConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            execution: ExecutionConfig::default(),
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load config from a specific `dagflow.toml` file path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| DagError::Config(format!("failed to read {}: {e}", path.display())))?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| DagError::Config(format!("failed to parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `./dagflow.toml` if it exists, otherwise return defaults.
    pub fn load_or_default() -> Self {
        let path = PathBuf::from("dagflow.toml");
        if path.exists() {
            match Self::load(&path) {
                Ok(cfg) => cfg,
                Err(e) => {
                    warn!(%e, "failed to load dagflow.toml, falling back to defaults");
                    Self::default()
                }
            }
        } else {
            Self::default()
        }
    }

    /// Validate the config and return actionable error messages.
    pub fn validate(&self) -> Result<()> {
        if self.execution.default_timeout_seconds == 0 {
            return Err(DagError::Config(
                "execution.default_timeout_seconds must be > 0".into(),
            ));
        }
        if self.execution.max_concurrent_tasks == 0 {
            return Err(DagError::Config(
                "execution.max_concurrent_tasks must be > 0".into(),
            ));
        }

        let valid_modes = ["sequential", "parallel", "hybrid"];
        if !valid_modes.contains(&self.execution.default_mode.as_str()) {
            return Err(DagError::Config(format!(
                "execution.default_mode '{}' is not recognised; valid modes: {}",
                self.execution.default_mode,
                valid_modes.join(", ")
            )));
        }

        let valid_policies = ["stop_on_first_failure", "continue_on_failure"];
        if !valid_policies.contains(&self.execution.default_failure_policy.as_str()) {
            return Err(DagError::Config(format!(
                "execution.default_failure_policy '{}' is not recognised; valid policies: {}",
                self.execution.default_failure_policy,
                valid_policies.join(", ")
            )));
        }

        if self.retry.base_delay_ms == 0 {
            return Err(DagError::Config("retry.base_delay_ms must be > 0".into()));
        }

        if self.cache.default_ttl_seconds == 0 {
            return Err(DagError::Config(
                "cache.default_ttl_seconds must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Parse the engine's execution mode default into the in-memory enum.
    pub fn default_execution_mode(&self) -> ExecutionMode {
        match self.execution.default_mode.as_str() {
            "sequential" => ExecutionMode::Sequential,
            "hybrid" => ExecutionMode::Hybrid,
            _ => ExecutionMode::Parallel,
        }
    }

    /// Parse the engine's failure policy default into the in-memory enum.
    pub fn default_failure_policy(&self) -> FailurePolicy {
        match self.execution.default_failure_policy.as_str() {
            "continue_on_failure" => FailurePolicy::ContinueOnFailure,
            _ => FailurePolicy::StopOnFirstFailure,
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutionConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Per-attempt deadline applied when a node does not declare its own.
    pub default_timeout_seconds: u64,
    /// Width of the hybrid-mode concurrency gate when a workflow does not
    /// declare `max_concurrent_tasks` in its settings.
    pub max_concurrent_tasks: usize,
    /// One of "sequential", "parallel", "hybrid".
    pub default_mode: String,
    /// One of "stop_on_first_failure", "continue_on_failure".
    pub default_failure_policy: String,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: 30,
            max_concurrent_tasks: 4,
            default_mode: "parallel".into(),
            default_failure_policy: "stop_on_first_failure".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// RetryConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempt budget applied when a node does not declare `max_retries`.
    pub default_max_retries: u32,
    pub base_delay_ms: u64,
    pub default_exponential_backoff: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            default_max_retries: 0,
            base_delay_ms: 100,
            default_exponential_backoff: false,
        }
    }
}

// ---------------------------------------------------------------------------
// CacheConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL applied when a node's cache policy enables caching but does not
    /// declare its own `ttl`.
    pub default_ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: 300,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
