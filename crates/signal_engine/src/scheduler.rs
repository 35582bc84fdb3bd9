//! Single-flight scheduler: the ticking driver for recurring runs.
//!
//! At most one run is ever in flight. A tick that arrives while a run is
//! in progress is dropped (logged, never queued), so runs cannot overlap or
//! pile up. The inter-tick interval is measured from the end of the previous
//! run, so a slow run never causes back-to-back re-firing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use signal_core::SharedSink;
use signal_domain::{EngineConfig, RunReport, SchedulerError};
use tokio::sync::{watch, Notify};
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use crate::coordinator::RunCoordinator;
use crate::registry::InstrumentRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    Idle,
    Running,
    ShuttingDown,
}

/// Process-wide scheduler state. Mutated only through the scheduler and the
/// scoped [`RunGuard`].
#[derive(Debug)]
pub struct SchedulerState {
    phase: Mutex<SchedulerPhase>,
    next_run_id: AtomicU64,
    // 0 = no run completed yet; real run ids start at 1.
    last_completed_run: AtomicU64,
    next_tick_at: Mutex<Option<DateTime<Utc>>>,
    run_finished: Notify,
}

impl SchedulerState {
    pub fn new() -> Self {
        Self {
            phase: Mutex::new(SchedulerPhase::Idle),
            next_run_id: AtomicU64::new(1),
            last_completed_run: AtomicU64::new(0),
            next_tick_at: Mutex::new(None),
            run_finished: Notify::new(),
        }
    }

    pub fn phase(&self) -> SchedulerPhase {
        *self.phase.lock().expect("scheduler phase lock poisoned")
    }

    pub fn last_completed_run(&self) -> Option<u64> {
        match self.last_completed_run.load(Ordering::SeqCst) {
            0 => None,
            id => Some(id),
        }
    }

    pub fn next_tick_at(&self) -> Option<DateTime<Utc>> {
        *self
            .next_tick_at
            .lock()
            .expect("scheduler tick lock poisoned")
    }

    /// Atomically claim the run-in-progress flag. Fails with `Overlap` unless
    /// the scheduler is idle.
    fn try_begin_run(self: &Arc<Self>) -> Result<RunGuard, SchedulerError> {
        let mut phase = self.phase.lock().expect("scheduler phase lock poisoned");
        match *phase {
            SchedulerPhase::Idle => {
                *phase = SchedulerPhase::Running;
                Ok(RunGuard {
                    state: Arc::clone(self),
                })
            }
            _ => Err(SchedulerError::Overlap),
        }
    }

    fn request_shutdown(&self) {
        let mut phase = self.phase.lock().expect("scheduler phase lock poisoned");
        *phase = SchedulerPhase::ShuttingDown;
    }

    fn record_completed(&self, run_id: u64) {
        self.last_completed_run.store(run_id, Ordering::SeqCst);
    }

    fn allocate_run_id(&self) -> u64 {
        self.next_run_id.fetch_add(1, Ordering::SeqCst)
    }

    fn set_next_tick(&self, at: Option<DateTime<Utc>>) {
        *self
            .next_tick_at
            .lock()
            .expect("scheduler tick lock poisoned") = at;
    }
}

impl Default for SchedulerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases the run-in-progress flag on drop, crash paths included. If
/// shutdown was requested mid-run the phase stays `ShuttingDown`.
struct RunGuard {
    state: Arc<SchedulerState>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        {
            let mut phase = self
                .state
                .phase
                .lock()
                .expect("scheduler phase lock poisoned");
            if *phase == SchedulerPhase::Running {
                *phase = SchedulerPhase::Idle;
            }
        }
        self.state.run_finished.notify_waiters();
    }
}

pub struct Scheduler {
    tick_interval: Duration,
    shutdown_grace: Duration,
    registry: Arc<InstrumentRegistry>,
    coordinator: Arc<RunCoordinator>,
    sink: SharedSink,
    state: Arc<SchedulerState>,
    shutdown_tx: watch::Sender<bool>,
    trigger: Notify,
}

impl Scheduler {
    pub fn new(
        config: &EngineConfig,
        registry: Arc<InstrumentRegistry>,
        coordinator: Arc<RunCoordinator>,
        sink: SharedSink,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            tick_interval: config.tick_interval(),
            shutdown_grace: config.shutdown_grace(),
            registry,
            coordinator,
            sink,
            state: Arc::new(SchedulerState::new()),
            shutdown_tx,
            trigger: Notify::new(),
        }
    }

    pub fn state(&self) -> Arc<SchedulerState> {
        Arc::clone(&self.state)
    }

    /// Kick an immediate tick without waiting for the interval. If a run is
    /// already in flight the tick is dropped like any other.
    pub fn trigger_now(&self) {
        self.trigger.notify_one();
    }

    /// Drive the tick loop until shutdown. The interval is measured from the
    /// end of each run: run, then sleep, then tick again.
    pub async fn run(&self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        info!(
            tick_interval_secs = self.tick_interval.as_secs(),
            "scheduler started"
        );

        loop {
            let interval = chrono::Duration::from_std(self.tick_interval)
                .unwrap_or_else(|_| chrono::Duration::zero());
            self.state.set_next_tick(Some(Utc::now() + interval));

            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }

                _ = self.trigger.notified() => {}

                _ = sleep(self.tick_interval) => {}
            }

            if *shutdown_rx.borrow() {
                break;
            }

            self.execute_tick().await;
        }

        self.state.set_next_tick(None);
        info!("scheduler stopped");
    }

    /// Run one evaluation pass immediately, subject to the same single-flight
    /// guard as scheduled ticks.
    pub async fn run_once(&self) -> Result<RunReport, SchedulerError> {
        let guard = self.state.try_begin_run()?;
        let report = self.execute_run().await;
        drop(guard);
        Ok(report)
    }

    async fn execute_tick(&self) {
        let guard = match self.state.try_begin_run() {
            Ok(guard) => guard,
            Err(err) => {
                warn!(error = %err, "tick dropped");
                return;
            }
        };
        self.execute_run().await;
        drop(guard);
    }

    async fn execute_run(&self) -> RunReport {
        let run_id = self.state.allocate_run_id();
        let snapshot = self.registry.snapshot().await;
        let report = self.coordinator.run(run_id, snapshot).await;
        self.state.record_completed(run_id);
        self.sink.publish(&report).await;
        report
    }

    /// Request shutdown and wait for any in-flight run to finish, bounded by
    /// the configured grace period. Idle shutdown returns immediately; no new
    /// ticks fire once this has been called.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        // Register the waiter before reading the phase, so a run finishing
        // between the check and the await cannot slip past unnoticed.
        let finished = self.state.run_finished.notified();
        tokio::pin!(finished);
        finished.as_mut().enable();

        let running = self.state.phase() == SchedulerPhase::Running;
        self.state.request_shutdown();
        let _ = self.shutdown_tx.send(true);

        if !running {
            info!("shutdown requested while idle");
            return Ok(());
        }

        info!("shutdown requested, waiting for in-flight run");
        timeout(self.shutdown_grace, finished).await.map_err(|_| {
            SchedulerError::ShutdownTimeout(self.shutdown_grace.as_millis() as u64)
        })
    }
}
