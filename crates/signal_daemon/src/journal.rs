//! Day-rotated JSONL journal for run reports.

use std::fs::{create_dir_all, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use signal_core::ReportSink;
use signal_domain::RunReport;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Journal directory: `SIGNAL_JOURNAL_DIR` env, then the configured dir,
/// then ./reports.
pub fn resolve_journal_dir(configured: Option<&str>) -> PathBuf {
    if let Ok(raw) = std::env::var("SIGNAL_JOURNAL_DIR") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    if let Some(dir) = configured {
        return PathBuf::from(dir);
    }
    PathBuf::from("reports")
}

pub struct ReportJournal {
    dir: PathBuf,
    day_key: String,
    file: File,
}

impl ReportJournal {
    pub fn open(dir: PathBuf) -> std::io::Result<Self> {
        create_dir_all(&dir)?;
        let day_key = Utc::now().format("%Y-%m-%d").to_string();
        let file = Self::open_day_file(&dir, &day_key)?;
        Ok(Self { dir, day_key, file })
    }

    fn open_day_file(dir: &Path, day_key: &str) -> std::io::Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(format!("runs-{}.jsonl", day_key)))
    }

    fn rotate_if_needed(&mut self) -> std::io::Result<()> {
        let today = Utc::now().format("%Y-%m-%d").to_string();
        if today != self.day_key {
            self.file = Self::open_day_file(&self.dir, &today)?;
            self.day_key = today;
        }
        Ok(())
    }

    pub fn write_event(&mut self, event: serde_json::Value) {
        let result = (|| -> std::io::Result<()> {
            self.rotate_if_needed()?;
            let line = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
            writeln!(self.file, "{}", line)?;
            self.file.flush()?;
            Ok(())
        })();

        if let Err(err) = result {
            warn!("journal write failed: {}", err);
        }
    }

    pub fn write_report(&mut self, report: &RunReport) {
        let event = serde_json::json!({
            "ts": now_iso(),
            "kind": "run_report",
            "report": serde_json::to_value(report).unwrap_or(serde_json::Value::Null),
        });
        self.write_event(event);
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// `ReportSink` over a shared journal: every completed run lands as one
/// JSONL line plus a structured log summary.
#[derive(Clone)]
pub struct JournalSink {
    journal: Arc<Mutex<ReportJournal>>,
}

impl JournalSink {
    pub fn new(journal: ReportJournal) -> Self {
        Self {
            journal: Arc::new(Mutex::new(journal)),
        }
    }
}

#[async_trait]
impl ReportSink for JournalSink {
    async fn publish(&self, report: &RunReport) {
        info!(
            run_id = report.run_id,
            status = ?report.status,
            outcomes = report.outcomes.len(),
            failed = report.failed_count(),
            "run report published"
        );
        let mut journal = self.journal.lock().await;
        journal.write_report(report);
    }
}
