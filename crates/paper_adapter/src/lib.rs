//! Paper implementations of the collaborator contracts.
//!
//! In-process stand-ins for the real data source and broker: a provider that
//! serves configured payloads, a threshold evaluator, and an executor that
//! records instead of placing orders. Used by the daemon's paper mode and by
//! tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

use signal_core::{ActionExecutor, DataProvider, ExecutionAck, ReportSink, SignalEvaluator};
use signal_domain::{
    AdapterError, Decision, DecisionKind, EvaluationError, ExecutionError, IdempotencyKey,
    Instrument, MarketSnapshot, RunReport,
};

/// Serves a fixed payload per instrument. Unknown instruments fail the same
/// way a real feed rejects a bad symbol.
#[derive(Debug, Default)]
pub struct StaticDataProvider {
    payloads: Mutex<HashMap<String, serde_json::Value>>,
}

impl StaticDataProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor from plain prices.
    pub fn with_prices(prices: impl IntoIterator<Item = (String, f64)>) -> Self {
        let payloads = prices
            .into_iter()
            .map(|(id, price)| (id, serde_json::json!({ "price": price })))
            .collect();
        Self {
            payloads: Mutex::new(payloads),
        }
    }

    pub fn set_payload(&self, instrument_id: impl Into<String>, payload: serde_json::Value) {
        self.payloads
            .lock()
            .expect("payload lock poisoned")
            .insert(instrument_id.into(), payload);
    }
}

#[async_trait]
impl DataProvider for StaticDataProvider {
    async fn fetch(&self, instrument: &Instrument) -> Result<MarketSnapshot, AdapterError> {
        let payload = self
            .payloads
            .lock()
            .expect("payload lock poisoned")
            .get(&instrument.id)
            .cloned()
            .ok_or_else(|| AdapterError::InvalidInstrument(instrument.id.clone()))?;
        Ok(MarketSnapshot::new(&instrument.id, payload))
    }
}

/// Buys below an entry threshold, sells above an exit threshold, holds in
/// between. Expects a numeric `price` field in the payload.
#[derive(Debug, Clone)]
pub struct ThresholdEvaluator {
    pub buy_below: f64,
    pub sell_above: f64,
}

impl ThresholdEvaluator {
    pub fn new(buy_below: f64, sell_above: f64) -> Self {
        Self {
            buy_below,
            sell_above,
        }
    }
}

impl SignalEvaluator for ThresholdEvaluator {
    fn evaluate(
        &self,
        instrument: &Instrument,
        snapshot: &MarketSnapshot,
    ) -> Result<Decision, EvaluationError> {
        let price = snapshot
            .payload
            .get("price")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| {
                EvaluationError::MalformedData(format!(
                    "no numeric price for {}",
                    instrument.id
                ))
            })?;

        let kind = if price <= self.buy_below {
            DecisionKind::Buy
        } else if price >= self.sell_above {
            DecisionKind::Sell
        } else {
            DecisionKind::NoAction
        };

        debug!(
            instrument_id = %instrument.id,
            price,
            kind = kind.as_str(),
            "evaluated"
        );

        Ok(Decision::new(&instrument.id, kind)
            .with_params(serde_json::json!({ "price": price })))
    }
}

/// A decision the paper executor carried out.
#[derive(Debug, Clone)]
pub struct ExecutedAction {
    pub order_id: Uuid,
    pub key: IdempotencyKey,
    pub decision: Decision,
}

/// Records decisions instead of placing orders. Idempotent per key: a
/// replayed key is acknowledged as a duplicate and nothing is re-executed.
#[derive(Debug, Default)]
pub struct PaperExecutor {
    seen: Mutex<HashSet<IdempotencyKey>>,
    executed: Mutex<Vec<ExecutedAction>>,
}

impl PaperExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Effective executions so far, in order.
    pub fn executed(&self) -> Vec<ExecutedAction> {
        self.executed.lock().expect("executed lock poisoned").clone()
    }
}

#[async_trait]
impl ActionExecutor for PaperExecutor {
    async fn execute(
        &self,
        decision: &Decision,
        key: &IdempotencyKey,
    ) -> Result<ExecutionAck, ExecutionError> {
        {
            let mut seen = self.seen.lock().expect("seen lock poisoned");
            if !seen.insert(key.clone()) {
                debug!(key = %key, "duplicate key, not re-executing");
                return Ok(ExecutionAck::Duplicate);
            }
        }

        let order_id = Uuid::new_v4();
        info!(
            order_id = %order_id,
            instrument_id = %decision.instrument_id,
            kind = decision.kind.as_str(),
            "paper execution"
        );
        self.executed
            .lock()
            .expect("executed lock poisoned")
            .push(ExecutedAction {
                order_id,
                key: key.clone(),
                decision: decision.clone(),
            });
        Ok(ExecutionAck::Executed)
    }
}

/// Publishes run reports as structured log output.
#[derive(Debug, Default)]
pub struct LogReportSink;

#[async_trait]
impl ReportSink for LogReportSink {
    async fn publish(&self, report: &RunReport) {
        info!(
            run_id = report.run_id,
            status = ?report.status,
            outcomes = report.outcomes.len(),
            failed = report.failed_count(),
            "run report"
        );
    }
}
