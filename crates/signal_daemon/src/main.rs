//! signal_daemon: recurring instrument-evaluation service.
//!
//! Single-binary Tokio application that:
//! 1. Loads the tracked instrument list and engine settings
//! 2. Ticks on a fixed interval, one evaluation run per tick
//! 3. Runs fetch → evaluate → execute per instrument with bounded parallelism
//! 4. Journals every run report as JSONL

mod config;
mod journal;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use paper_adapter::{LogReportSink, PaperExecutor, StaticDataProvider, ThresholdEvaluator};
use signal_engine::{InstrumentRegistry, RunCoordinator, Scheduler};

use crate::config::{load_config, DaemonConfig};
use crate::journal::{resolve_journal_dir, JournalSink, ReportJournal};

/// Recurring instrument evaluation daemon (paper mode).
#[derive(Parser)]
#[command(name = "signal_daemon", about = "Recurring instrument evaluation daemon")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Validate the configuration and exit.
    #[arg(long)]
    check_config: bool,

    /// Run a single evaluation pass and exit.
    #[arg(long)]
    once: bool,
}

fn log_startup(config: &DaemonConfig) {
    info!(
        tick_interval_secs = config.engine.tick_interval_secs,
        worker_pool_size = config.engine.worker_pool_size,
        per_call_timeout_ms = config.engine.per_call_timeout_ms,
        run_deadline_ms = config.engine.run_deadline_ms,
        "engine settings"
    );
    info!(
        max_attempts = config.engine.retry.max_attempts,
        backoff_base_ms = config.engine.retry.backoff_base_ms,
        backoff_cap_ms = config.engine.retry.backoff_cap_ms,
        "retry settings"
    );
    info!(
        instruments = config.instruments.len(),
        buy_below = config.evaluator.buy_below,
        sell_above = config.evaluator.sell_above,
        "tracking {:?}",
        config
            .instruments
            .iter()
            .map(|i| i.symbol.as_str())
            .collect::<Vec<_>>()
    );
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "signal_daemon=info,signal_engine=info,paper_adapter=info".into()
            }),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    info!("signal daemon starting up");

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            error!("configuration error: {}", err);
            std::process::exit(1);
        }
    };

    log_startup(&config);

    if cli.check_config {
        info!("configuration OK");
        return;
    }

    if config.instruments.is_empty() {
        warn!("no instruments configured, runs will be empty");
    }

    let registry = match InstrumentRegistry::with_instruments(
        config.instruments.iter().map(|i| i.to_instrument()),
    ) {
        Ok(registry) => Arc::new(registry),
        Err(err) => {
            error!("registry error: {}", err);
            std::process::exit(1);
        }
    };

    let provider = Arc::new(StaticDataProvider::with_prices(
        config
            .instruments
            .iter()
            .map(|i| (i.symbol.clone(), i.paper_price)),
    ));
    let evaluator = Arc::new(ThresholdEvaluator::new(
        config.evaluator.buy_below,
        config.evaluator.sell_above,
    ));
    let executor = Arc::new(PaperExecutor::new());

    // A single diagnostic pass logs its report; only the recurring daemon
    // writes the journal.
    let sink: signal_core::SharedSink = if cli.once {
        Arc::new(LogReportSink)
    } else {
        let journal_dir = resolve_journal_dir(config.journal.dir.as_deref());
        let journal = match ReportJournal::open(journal_dir) {
            Ok(journal) => journal,
            Err(err) => {
                error!("failed to open report journal: {}", err);
                std::process::exit(1);
            }
        };
        info!("report journal path: {}", journal.dir().display());
        Arc::new(JournalSink::new(journal))
    };

    let coordinator = Arc::new(RunCoordinator::new(
        &config.engine,
        provider,
        evaluator,
        executor.clone(),
    ));
    let scheduler = Arc::new(Scheduler::new(
        &config.engine,
        registry,
        coordinator,
        sink,
    ));

    if cli.once {
        info!("running single evaluation pass");
        match scheduler.run_once().await {
            Ok(report) => {
                for outcome in &report.outcomes {
                    info!(
                        instrument_id = %outcome.instrument_id,
                        status = ?outcome.status,
                        attempts = outcome.attempts,
                        "outcome"
                    );
                }
                info!(
                    run_id = report.run_id,
                    status = ?report.status,
                    executed = executor.executed().len(),
                    "single pass complete"
                );
            }
            Err(err) => {
                error!("single pass failed to start: {}", err);
                std::process::exit(1);
            }
        }
        return;
    }

    // Ctrl-c requests a bounded shutdown: the in-flight run may finish
    // within the grace period, then the tick loop stops.
    {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("ctrl-c received, shutting down");
                if let Err(err) = scheduler.shutdown().await {
                    error!("shutdown: {}", err);
                    std::process::exit(1);
                }
            }
        });
    }

    scheduler.run().await;
}
