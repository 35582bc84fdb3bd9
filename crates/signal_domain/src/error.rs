//! Error taxonomy for the evaluation engine.
//!
//! One enum per collaborator boundary. Per-instrument errors are contained at
//! the pipeline-stage boundary and surface only in that instrument's outcome;
//! registry and scheduler errors surface synchronously to their callers.

use std::time::Duration;

use thiserror::Error;

use crate::types::PipelineStage;

/// Failures from the data provider adapter.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("fetch timed out after {0}ms")]
    Timeout(u64),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("invalid instrument: {0}")]
    InvalidInstrument(String),
}

/// Failures from the signal evaluator.
#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("malformed market data: {0}")]
    MalformedData(String),
}

/// Failures from the action executor.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Retryable, e.g. a network blip or rate limit. May carry a
    /// server-provided retry hint that overrides computed backoff.
    #[error("transient execution failure: {reason}")]
    Transient {
        reason: String,
        retry_after_ms: Option<u64>,
    },

    /// Not retryable, e.g. a rejected order.
    #[error("permanent execution failure: {0}")]
    Permanent(String),
}

impl ExecutionError {
    pub fn transient(reason: impl Into<String>) -> Self {
        ExecutionError::Transient {
            reason: reason.into(),
            retry_after_ms: None,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ExecutionError::Transient { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ExecutionError::Transient {
                retry_after_ms: Some(ms),
                ..
            } => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }
}

/// Administrative registry failures, surfaced to the caller of add/remove.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("instrument already registered: {0}")]
    DuplicateInstrument(String),

    #[error("instrument not found: {0}")]
    NotFound(String),
}

/// Scheduler-level conditions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// A tick fired while a run was in flight. The tick is dropped, never
    /// queued; this is a log entry, not an operator problem.
    #[error("run already in progress, tick dropped")]
    Overlap,

    #[error("shutdown timed out after {0}ms with a run still in flight")]
    ShutdownTimeout(u64),
}

/// Where and why one instrument's pipeline failed. Internal to the run:
/// recorded on the outcome, never propagated past it.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] AdapterError),

    #[error("evaluation failed: {0}")]
    Evaluate(#[from] EvaluationError),

    #[error("execution failed: {0}")]
    Execute(#[from] ExecutionError),

    #[error("run deadline exceeded")]
    DeadlineExceeded,
}

impl PipelineError {
    /// The stage the failure belongs to; `None` for a deadline expiry, where
    /// the in-flight stage is unknown.
    pub fn stage(&self) -> Option<PipelineStage> {
        match self {
            PipelineError::Fetch(_) => Some(PipelineStage::Fetch),
            PipelineError::Evaluate(_) => Some(PipelineStage::Evaluate),
            PipelineError::Execute(_) => Some(PipelineStage::Execute),
            PipelineError::DeadlineExceeded => None,
        }
    }
}

/// Configuration rejected at load time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config:\n - {0}")]
    Invalid(String),
}
