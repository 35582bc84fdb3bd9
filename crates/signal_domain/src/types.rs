//! Core data model: instruments, market snapshots, decisions, and run reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// A tradable instrument tracked by the engine.
///
/// The `id` is the ticker symbol, unique and stable for the lifetime of the
/// registration. Metadata is optional and opaque to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub id: String,

    /// Human-readable name, e.g. "Apple Inc.".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl Instrument {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            tags: Vec::new(),
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// Point-in-time market data for one instrument.
///
/// The payload is opaque to the engine; the data provider and the evaluator
/// agree on its shape between themselves. Snapshots are not retained beyond
/// the run that fetched them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub instrument_id: String,
    pub payload: serde_json::Value,
    pub fetched_at: DateTime<Utc>,
}

impl MarketSnapshot {
    pub fn new(instrument_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            payload,
            fetched_at: Utc::now(),
        }
    }
}

/// What the evaluator wants done for one instrument. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    NoAction,
    Buy,
    Sell,
    Alert,
}

impl DecisionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DecisionKind::NoAction => "no_action",
            DecisionKind::Buy => "buy",
            DecisionKind::Sell => "sell",
            DecisionKind::Alert => "alert",
        }
    }
}

/// The evaluator's verdict for one instrument in one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub instrument_id: String,
    pub kind: DecisionKind,

    /// Opaque decision parameters (order size, alert text, …) passed through
    /// to the executor untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,

    pub evaluated_at: DateTime<Utc>,
}

impl Decision {
    pub fn new(instrument_id: impl Into<String>, kind: DecisionKind) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            kind,
            params: None,
            evaluated_at: Utc::now(),
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = Some(params);
        self
    }
}

/// Deterministic execution key: the same (instrument, run, decision kind)
/// always derives the same key, so a retried delivery of the same decision
/// can never double-execute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn derive(instrument_id: &str, run_id: u64, kind: DecisionKind) -> Self {
        Self(format!("{instrument_id}:{run_id}:{}", kind.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pipeline stage an instrument failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Fetch,
    Evaluate,
    Execute,
}

/// Terminal state of one instrument's pass through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum OutcomeStatus {
    Succeeded,
    /// Evaluator returned `NoAction`; the executor was never called.
    Skipped,
    Failed {
        /// Absent when the run deadline expired before the stage was known.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stage: Option<PipelineStage>,
        error: String,
    },
}

impl OutcomeStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, OutcomeStatus::Failed { .. })
    }
}

/// Result of one instrument's pipeline in one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentOutcome {
    pub instrument_id: String,
    #[serde(flatten)]
    pub status: OutcomeStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<IdempotencyKey>,

    /// Executor attempts made; 0 when execution was never reached.
    pub attempts: u32,
}

impl InstrumentOutcome {
    pub fn succeeded(
        instrument_id: impl Into<String>,
        decision: Decision,
        key: IdempotencyKey,
        attempts: u32,
    ) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            status: OutcomeStatus::Succeeded,
            decision: Some(decision),
            idempotency_key: Some(key),
            attempts,
        }
    }

    pub fn skipped(instrument_id: impl Into<String>, decision: Decision) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            status: OutcomeStatus::Skipped,
            decision: Some(decision),
            idempotency_key: None,
            attempts: 0,
        }
    }

    pub fn failed(instrument_id: impl Into<String>, error: &PipelineError, attempts: u32) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            status: OutcomeStatus::Failed {
                stage: error.stage(),
                error: error.to_string(),
            },
            decision: None,
            idempotency_key: None,
            attempts,
        }
    }
}

/// Overall verdict for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    AllSucceeded,
    PartialFailure,
    RunFailed,
}

/// Everything that happened in one scheduled run, in snapshot order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<InstrumentOutcome>,
    pub status: RunStatus,
}

impl RunReport {
    /// Derive the overall status from per-instrument outcomes. An empty run
    /// counts as all-succeeded.
    pub fn status_from(outcomes: &[InstrumentOutcome]) -> RunStatus {
        if outcomes.iter().any(|o| o.status.is_failed()) {
            RunStatus::PartialFailure
        } else {
            RunStatus::AllSucceeded
        }
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status.is_failed())
            .count()
    }
}
