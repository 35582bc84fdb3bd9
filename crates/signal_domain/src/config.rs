//! Engine configuration types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Scheduling and execution settings for the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds between ticks, measured from the end of the previous run.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// Concurrent per-instrument pipelines within one run.
    #[serde(default = "default_workers")]
    pub worker_pool_size: usize,

    /// Timeout for a single fetch or execute call.
    #[serde(default = "default_per_call_timeout")]
    pub per_call_timeout_ms: u64,

    /// Overall deadline for one run; pipelines still in flight when it
    /// expires are recorded as failed.
    #[serde(default = "default_run_deadline")]
    pub run_deadline_ms: u64,

    /// How long shutdown waits for an in-flight run before giving up.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_ms: u64,

    #[serde(default)]
    pub retry: RetryConfig,
}

/// Executor retry settings. Only transient failures are retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total executor attempts, including the first.
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: u32,

    #[serde(default = "default_backoff_cap")]
    pub backoff_cap_ms: u64,
}

fn default_tick_interval() -> u64 {
    60
}

fn default_workers() -> usize {
    4
}

fn default_per_call_timeout() -> u64 {
    5_000
}

fn default_run_deadline() -> u64 {
    30_000
}

fn default_shutdown_grace() -> u64 {
    10_000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_backoff_base() -> u64 {
    200
}

fn default_backoff_factor() -> u32 {
    2
}

fn default_backoff_cap() -> u64 {
    5_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            worker_pool_size: default_workers(),
            per_call_timeout_ms: default_per_call_timeout(),
            run_deadline_ms: default_run_deadline(),
            shutdown_grace_ms: default_shutdown_grace(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            backoff_base_ms: default_backoff_base(),
            backoff_factor: default_backoff_factor(),
            backoff_cap_ms: default_backoff_cap(),
        }
    }
}

impl EngineConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn per_call_timeout(&self) -> Duration {
        Duration::from_millis(self.per_call_timeout_ms)
    }

    pub fn run_deadline(&self) -> Duration {
        Duration::from_millis(self.run_deadline_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Validate all fields, collecting every issue before reporting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut issues: Vec<String> = Vec::new();

        if self.tick_interval_secs == 0 {
            issues.push("tick_interval_secs must be > 0".into());
        }
        if self.worker_pool_size == 0 {
            issues.push("worker_pool_size must be > 0".into());
        }
        if self.per_call_timeout_ms == 0 {
            issues.push("per_call_timeout_ms must be > 0".into());
        }
        if self.run_deadline_ms == 0 {
            issues.push("run_deadline_ms must be > 0".into());
        }
        if self.run_deadline_ms < self.per_call_timeout_ms {
            issues.push("run_deadline_ms must be >= per_call_timeout_ms".into());
        }
        if self.shutdown_grace_ms == 0 {
            issues.push("shutdown_grace_ms must be > 0".into());
        }
        if self.retry.max_attempts == 0 {
            issues.push("retry.max_attempts must be > 0".into());
        }
        if self.retry.backoff_base_ms == 0 {
            issues.push("retry.backoff_base_ms must be > 0".into());
        }
        if self.retry.backoff_factor == 0 {
            issues.push("retry.backoff_factor must be > 0".into());
        }
        if self.retry.backoff_cap_ms < self.retry.backoff_base_ms {
            issues.push("retry.backoff_cap_ms must be >= retry.backoff_base_ms".into());
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(issues.join("\n - ")))
        }
    }
}
