//! Run coordinator: one full evaluation pass over a registry snapshot.
//!
//! Fans out fetch → evaluate → execute per instrument with bounded
//! parallelism. One instrument's failure never aborts the run; every failure
//! lands on exactly one outcome.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use signal_core::{ExecutionAck, SharedEvaluator, SharedExecutor, SharedProvider};
use signal_domain::{
    AdapterError, Decision, DecisionKind, EngineConfig, ExecutionError, IdempotencyKey, Instrument,
    InstrumentOutcome, PipelineError, RunReport, RunStatus,
};
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::retry::RetryPolicy;

pub struct RunCoordinator {
    provider: SharedProvider,
    evaluator: SharedEvaluator,
    executor: SharedExecutor,
    retry: RetryPolicy,
    per_call_timeout: Duration,
    run_deadline: Duration,
    workers: Arc<Semaphore>,
}

impl RunCoordinator {
    pub fn new(
        config: &EngineConfig,
        provider: SharedProvider,
        evaluator: SharedEvaluator,
        executor: SharedExecutor,
    ) -> Self {
        Self {
            provider,
            evaluator,
            executor,
            retry: RetryPolicy::from_config(&config.retry),
            per_call_timeout: config.per_call_timeout(),
            run_deadline: config.run_deadline(),
            workers: Arc::new(Semaphore::new(config.worker_pool_size)),
        }
    }

    /// Execute one full pass over the snapshot.
    ///
    /// Outcomes come back in snapshot order regardless of completion order.
    /// An empty snapshot yields an empty all-succeeded report.
    pub async fn run(&self, run_id: u64, snapshot: Vec<Instrument>) -> RunReport {
        let started_at = Utc::now();
        info!(run_id, instruments = snapshot.len(), "run started");

        let deadline = Instant::now() + self.run_deadline;
        let outcomes = join_all(
            snapshot
                .iter()
                .map(|instrument| self.run_instrument(run_id, instrument, deadline)),
        )
        .await;

        let status = RunReport::status_from(&outcomes);
        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            outcomes,
            status,
        };
        match status {
            RunStatus::AllSucceeded => info!(run_id, "run complete"),
            _ => warn!(
                run_id,
                failed = report.failed_count(),
                total = report.outcomes.len(),
                "run complete with failures"
            ),
        }
        report
    }

    /// One instrument's pipeline, bounded by the shared run deadline. Time
    /// spent waiting for a worker permit counts against the deadline too.
    async fn run_instrument(
        &self,
        run_id: u64,
        instrument: &Instrument,
        deadline: Instant,
    ) -> InstrumentOutcome {
        match timeout_at(deadline, self.pipeline(run_id, instrument)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    run_id,
                    instrument_id = %instrument.id,
                    "run deadline exceeded, pipeline cancelled"
                );
                InstrumentOutcome::failed(&instrument.id, &PipelineError::DeadlineExceeded, 0)
            }
        }
    }

    async fn pipeline(&self, run_id: u64, instrument: &Instrument) -> InstrumentOutcome {
        let _permit = self
            .workers
            .acquire()
            .await
            .expect("worker semaphore closed");

        // Fetch, with the per-call timeout layered on top of whatever the
        // provider does internally.
        let snapshot = match timeout(self.per_call_timeout, self.provider.fetch(instrument)).await {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(err)) => {
                warn!(run_id, instrument_id = %instrument.id, error = %err, "fetch failed");
                return InstrumentOutcome::failed(&instrument.id, &PipelineError::Fetch(err), 0);
            }
            Err(_) => {
                let err = AdapterError::Timeout(self.per_call_timeout.as_millis() as u64);
                warn!(run_id, instrument_id = %instrument.id, "fetch timed out");
                return InstrumentOutcome::failed(&instrument.id, &PipelineError::Fetch(err), 0);
            }
        };

        // Evaluate. Failures are contained here, never propagated.
        let decision = match self.evaluator.evaluate(instrument, &snapshot) {
            Ok(decision) => decision,
            Err(err) => {
                warn!(run_id, instrument_id = %instrument.id, error = %err, "evaluation failed");
                return InstrumentOutcome::failed(&instrument.id, &PipelineError::Evaluate(err), 0);
            }
        };

        if decision.kind == DecisionKind::NoAction {
            debug!(run_id, instrument_id = %instrument.id, "no action");
            return InstrumentOutcome::skipped(&instrument.id, decision);
        }

        self.execute_with_retry(run_id, instrument, decision).await
    }

    /// Drive the executor, retrying transient failures with backoff. A
    /// server-provided retry hint overrides the computed delay.
    async fn execute_with_retry(
        &self,
        run_id: u64,
        instrument: &Instrument,
        decision: Decision,
    ) -> InstrumentOutcome {
        let key = IdempotencyKey::derive(&instrument.id, run_id, decision.kind);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let result = timeout(
                self.per_call_timeout,
                self.executor.execute(&decision, &key),
            )
            .await;

            let err = match result {
                Ok(Ok(ack)) => {
                    if ack == ExecutionAck::Duplicate {
                        debug!(run_id, instrument_id = %instrument.id, key = %key, "duplicate execution suppressed");
                    }
                    info!(
                        run_id,
                        instrument_id = %instrument.id,
                        kind = decision.kind.as_str(),
                        attempt,
                        "decision executed"
                    );
                    return InstrumentOutcome::succeeded(&instrument.id, decision, key, attempt);
                }
                Ok(Err(err)) => err,
                // An execute timeout is a network blip until proven otherwise.
                Err(_) => ExecutionError::transient(format!(
                    "execute timed out after {}ms",
                    self.per_call_timeout.as_millis()
                )),
            };

            if err.is_transient() && attempt < self.retry.max_attempts() {
                let delay = err.retry_after().unwrap_or_else(|| self.retry.jittered(attempt));
                warn!(
                    run_id,
                    instrument_id = %instrument.id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient execution failure, retrying"
                );
                sleep(delay).await;
                continue;
            }

            warn!(run_id, instrument_id = %instrument.id, attempt, error = %err, "execution failed");
            return InstrumentOutcome::failed(&instrument.id, &PipelineError::Execute(err), attempt);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use signal_core::{ActionExecutor, DataProvider, SignalEvaluator};
    use signal_domain::{
        Decision, EvaluationError, MarketSnapshot, OutcomeStatus, PipelineStage,
    };

    /// Provider with scripted per-instrument behavior.
    #[derive(Default)]
    struct ScriptedProvider {
        fail: HashMap<String, AdapterError>,
        delay: HashMap<String, Duration>,
    }

    impl ScriptedProvider {
        fn failing(id: &str, err: AdapterError) -> Self {
            let mut provider = Self::default();
            provider.fail.insert(id.to_string(), err);
            provider
        }

        fn with_delay(mut self, id: &str, delay: Duration) -> Self {
            self.delay.insert(id.to_string(), delay);
            self
        }
    }

    #[async_trait]
    impl DataProvider for ScriptedProvider {
        async fn fetch(&self, instrument: &Instrument) -> Result<MarketSnapshot, AdapterError> {
            if let Some(delay) = self.delay.get(&instrument.id) {
                sleep(*delay).await;
            }
            if let Some(err) = self.fail.get(&instrument.id) {
                return Err(match err {
                    AdapterError::Timeout(ms) => AdapterError::Timeout(*ms),
                    AdapterError::Unavailable(s) => AdapterError::Unavailable(s.clone()),
                    AdapterError::InvalidInstrument(s) => {
                        AdapterError::InvalidInstrument(s.clone())
                    }
                });
            }
            Ok(MarketSnapshot::new(
                &instrument.id,
                serde_json::json!({ "price": 100.0 }),
            ))
        }
    }

    /// Evaluator that buys everything, with optional per-instrument overrides.
    #[derive(Default)]
    struct ScriptedEvaluator {
        kinds: HashMap<String, DecisionKind>,
        malformed: Vec<String>,
    }

    impl SignalEvaluator for ScriptedEvaluator {
        fn evaluate(
            &self,
            instrument: &Instrument,
            _snapshot: &MarketSnapshot,
        ) -> Result<Decision, EvaluationError> {
            if self.malformed.contains(&instrument.id) {
                return Err(EvaluationError::MalformedData("missing price".into()));
            }
            let kind = self
                .kinds
                .get(&instrument.id)
                .copied()
                .unwrap_or(DecisionKind::Buy);
            Ok(Decision::new(&instrument.id, kind))
        }
    }

    /// Executor that fails transiently N times before succeeding, counting
    /// every call.
    struct FlakyExecutor {
        calls: AtomicU32,
        fail_first: u32,
        permanent: bool,
    }

    impl FlakyExecutor {
        fn reliable() -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_first: 0,
                permanent: false,
            }
        }

        fn transient_failures(n: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_first: n,
                permanent: false,
            }
        }

        fn permanent_failure() -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_first: u32::MAX,
                permanent: true,
            }
        }

        fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ActionExecutor for FlakyExecutor {
        async fn execute(
            &self,
            _decision: &Decision,
            _key: &IdempotencyKey,
        ) -> Result<ExecutionAck, ExecutionError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.permanent {
                return Err(ExecutionError::Permanent("order rejected".into()));
            }
            if call < self.fail_first {
                return Err(ExecutionError::transient("connection reset"));
            }
            Ok(ExecutionAck::Executed)
        }
    }

    /// Executor that records keys, acking duplicates without re-executing.
    #[derive(Default)]
    struct RecordingExecutor {
        seen: Mutex<Vec<IdempotencyKey>>,
    }

    #[async_trait]
    impl ActionExecutor for RecordingExecutor {
        async fn execute(
            &self,
            _decision: &Decision,
            key: &IdempotencyKey,
        ) -> Result<ExecutionAck, ExecutionError> {
            let mut seen = self.seen.lock().unwrap();
            if seen.contains(key) {
                return Ok(ExecutionAck::Duplicate);
            }
            seen.push(key.clone());
            Ok(ExecutionAck::Executed)
        }
    }

    fn config() -> EngineConfig {
        EngineConfig {
            tick_interval_secs: 1,
            worker_pool_size: 4,
            per_call_timeout_ms: 1_000,
            run_deadline_ms: 60_000,
            ..EngineConfig::default()
        }
    }

    fn coordinator_with(
        config: EngineConfig,
        provider: impl DataProvider + 'static,
        evaluator: impl SignalEvaluator + 'static,
        executor: impl ActionExecutor + 'static,
    ) -> RunCoordinator {
        RunCoordinator::new(
            &config,
            Arc::new(provider),
            Arc::new(evaluator),
            Arc::new(executor),
        )
    }

    fn instruments(ids: &[&str]) -> Vec<Instrument> {
        ids.iter().map(|id| Instrument::new(*id)).collect()
    }

    #[tokio::test]
    async fn test_empty_snapshot_is_all_succeeded() {
        let coordinator = coordinator_with(
            config(),
            ScriptedProvider::default(),
            ScriptedEvaluator::default(),
            FlakyExecutor::reliable(),
        );

        let report = coordinator.run(1, Vec::new()).await;
        assert_eq!(report.outcomes.len(), 0);
        assert_eq!(report.status, RunStatus::AllSucceeded);
    }

    #[tokio::test]
    async fn test_one_fetch_failure_yields_partial_failure() {
        // AAPL fetch succeeds, MSFT times out at the provider; evaluator buys
        // AAPL and the executor succeeds.
        let coordinator = coordinator_with(
            config(),
            ScriptedProvider::failing("MSFT", AdapterError::Timeout(1_000)),
            ScriptedEvaluator::default(),
            FlakyExecutor::reliable(),
        );

        let report = coordinator.run(1, instruments(&["AAPL", "MSFT"])).await;
        assert_eq!(report.status, RunStatus::PartialFailure);
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.outcomes[0].instrument_id, "AAPL");
        assert_eq!(report.outcomes[0].status, OutcomeStatus::Succeeded);
        assert_eq!(report.outcomes[1].instrument_id, "MSFT");
        match &report.outcomes[1].status {
            OutcomeStatus::Failed { stage, error } => {
                assert_eq!(*stage, Some(PipelineStage::Fetch));
                assert!(error.contains("timed out"));
            }
            other => panic!("expected failed outcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_outcome_order_matches_snapshot_despite_completion_order() {
        // First instrument is slow, the rest are fast, with enough workers
        // that everything runs concurrently.
        let provider = ScriptedProvider::default()
            .with_delay("SLOW", Duration::from_millis(300));
        let coordinator = coordinator_with(
            config(),
            provider,
            ScriptedEvaluator::default(),
            FlakyExecutor::reliable(),
        );

        let report = coordinator
            .run(1, instruments(&["SLOW", "FAST1", "FAST2"]))
            .await;
        let ids: Vec<&str> = report
            .outcomes
            .iter()
            .map(|o| o.instrument_id.as_str())
            .collect();
        assert_eq!(ids, vec!["SLOW", "FAST1", "FAST2"]);
    }

    #[tokio::test]
    async fn test_evaluator_failure_contained_to_one_instrument() {
        let evaluator = ScriptedEvaluator {
            malformed: vec!["BAD".into()],
            ..Default::default()
        };
        let coordinator = coordinator_with(
            config(),
            ScriptedProvider::default(),
            evaluator,
            FlakyExecutor::reliable(),
        );

        let report = coordinator.run(1, instruments(&["GOOD", "BAD"])).await;
        assert_eq!(report.status, RunStatus::PartialFailure);
        assert_eq!(report.outcomes[0].status, OutcomeStatus::Succeeded);
        match &report.outcomes[1].status {
            OutcomeStatus::Failed { stage, .. } => assert_eq!(*stage, Some(PipelineStage::Evaluate)),
            other => panic!("expected failed outcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_action_skips_executor() {
        let evaluator = ScriptedEvaluator {
            kinds: HashMap::from([("AAPL".to_string(), DecisionKind::NoAction)]),
            ..Default::default()
        };
        let executor = Arc::new(FlakyExecutor::reliable());
        let coordinator = RunCoordinator::new(
            &config(),
            Arc::new(ScriptedProvider::default()),
            Arc::new(evaluator),
            executor.clone(),
        );

        let report = coordinator.run(1, instruments(&["AAPL"])).await;
        assert_eq!(report.outcomes[0].status, OutcomeStatus::Skipped);
        assert_eq!(report.status, RunStatus::AllSucceeded);
        assert_eq!(executor.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_retried_then_succeed() {
        // Fails twice, succeeds on the 3rd attempt with max_attempts = 3.
        let executor = Arc::new(FlakyExecutor::transient_failures(2));
        let coordinator = RunCoordinator::new(
            &config(),
            Arc::new(ScriptedProvider::default()),
            Arc::new(ScriptedEvaluator::default()),
            executor.clone(),
        );

        let report = coordinator.run(1, instruments(&["AAPL"])).await;
        assert_eq!(report.outcomes[0].status, OutcomeStatus::Succeeded);
        assert_eq!(report.outcomes[0].attempts, 3);
        assert_eq!(executor.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_exhaust_attempts() {
        let executor = Arc::new(FlakyExecutor::transient_failures(10));
        let coordinator = RunCoordinator::new(
            &config(),
            Arc::new(ScriptedProvider::default()),
            Arc::new(ScriptedEvaluator::default()),
            executor.clone(),
        );

        let report = coordinator.run(1, instruments(&["AAPL"])).await;
        match &report.outcomes[0].status {
            OutcomeStatus::Failed { stage, .. } => assert_eq!(*stage, Some(PipelineStage::Execute)),
            other => panic!("expected failed outcome, got {other:?}"),
        }
        assert_eq!(report.outcomes[0].attempts, 3);
        assert_eq!(executor.call_count(), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let executor = Arc::new(FlakyExecutor::permanent_failure());
        let coordinator = RunCoordinator::new(
            &config(),
            Arc::new(ScriptedProvider::default()),
            Arc::new(ScriptedEvaluator::default()),
            executor.clone(),
        );

        let report = coordinator.run(1, instruments(&["AAPL"])).await;
        assert!(report.outcomes[0].status.is_failed());
        assert_eq!(report.outcomes[0].attempts, 1);
        assert_eq!(executor.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_deadline_fails_stragglers_keeps_finished() {
        let mut cfg = config();
        cfg.per_call_timeout_ms = 30_000;
        cfg.run_deadline_ms = 5_000;

        let provider = ScriptedProvider::default()
            .with_delay("HUNG", Duration::from_secs(20));
        let coordinator = coordinator_with(
            cfg,
            provider,
            ScriptedEvaluator::default(),
            FlakyExecutor::reliable(),
        );

        let report = coordinator.run(1, instruments(&["FAST", "HUNG"])).await;
        assert_eq!(report.status, RunStatus::PartialFailure);
        assert_eq!(report.outcomes[0].status, OutcomeStatus::Succeeded);
        match &report.outcomes[1].status {
            OutcomeStatus::Failed { stage, error } => {
                assert_eq!(*stage, None);
                assert!(error.contains("deadline"));
            }
            other => panic!("expected failed outcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_bounded_workers_still_complete_everything() {
        let mut cfg = config();
        cfg.worker_pool_size = 2;

        let coordinator = coordinator_with(
            cfg,
            ScriptedProvider::default(),
            ScriptedEvaluator::default(),
            FlakyExecutor::reliable(),
        );

        let ids: Vec<String> = (0..10).map(|i| format!("SYM{i}")).collect();
        let snapshot: Vec<Instrument> = ids.iter().map(Instrument::new).collect();
        let report = coordinator.run(1, snapshot).await;

        assert_eq!(report.outcomes.len(), 10);
        assert!(report
            .outcomes
            .iter()
            .zip(&ids)
            .all(|(o, id)| &o.instrument_id == id));
        assert_eq!(report.status, RunStatus::AllSucceeded);
    }

    #[tokio::test]
    async fn test_replayed_key_is_duplicate_not_reexecution() {
        let executor = Arc::new(RecordingExecutor::default());
        let coordinator = RunCoordinator::new(
            &config(),
            Arc::new(ScriptedProvider::default()),
            Arc::new(ScriptedEvaluator::default()),
            executor.clone(),
        );

        // Same run id twice → same idempotency keys → one effective
        // execution per instrument.
        let first = coordinator.run(7, instruments(&["AAPL"])).await;
        let second = coordinator.run(7, instruments(&["AAPL"])).await;

        assert_eq!(first.outcomes[0].status, OutcomeStatus::Succeeded);
        assert_eq!(second.outcomes[0].status, OutcomeStatus::Succeeded);
        assert_eq!(executor.seen.lock().unwrap().len(), 1);
    }
}
