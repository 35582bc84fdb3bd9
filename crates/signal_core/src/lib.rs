//! Collaborator contracts consumed by the evaluation engine.
//!
//! Concrete data providers, evaluators, executors, and report sinks are
//! swapped in by dependency injection at construction time. The engine never
//! knows which implementation it is driving.

use std::sync::Arc;

use async_trait::async_trait;

use signal_domain::{
    AdapterError, Decision, EvaluationError, ExecutionError, IdempotencyKey, Instrument,
    MarketSnapshot, RunReport,
};

/// Fetches current market data for one instrument. May fail or time out;
/// the engine applies its own per-call timeout on top.
#[async_trait]
pub trait DataProvider: Send + Sync {
    async fn fetch(&self, instrument: &Instrument) -> Result<MarketSnapshot, AdapterError>;
}

/// Maps an instrument and its fetched data to a decision.
///
/// A pure function of its inputs: no I/O, no retained state. Failures
/// (malformed data) are recorded on the instrument's outcome and never abort
/// the run.
pub trait SignalEvaluator: Send + Sync {
    fn evaluate(
        &self,
        instrument: &Instrument,
        snapshot: &MarketSnapshot,
    ) -> Result<Decision, EvaluationError>;
}

/// How the executor acknowledged a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionAck {
    Executed,
    /// The idempotency key was seen before; nothing was re-executed.
    Duplicate,
}

/// Carries out a decision (place order, send alert).
///
/// Must be idempotent per key: re-delivery of an already-executed decision
/// acknowledges `Duplicate` instead of acting twice.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(
        &self,
        decision: &Decision,
        key: &IdempotencyKey,
    ) -> Result<ExecutionAck, ExecutionError>;
}

/// Receives each completed run's report. No return contract; persistence
/// and display are the sink's problem.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn publish(&self, report: &RunReport);
}

pub type SharedProvider = Arc<dyn DataProvider>;
pub type SharedEvaluator = Arc<dyn SignalEvaluator>;
pub type SharedExecutor = Arc<dyn ActionExecutor>;
pub type SharedSink = Arc<dyn ReportSink>;
