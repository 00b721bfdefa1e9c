//! Run report.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use roll_core::{Error, Result};
use roll_storage::RollMapBuild;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    /// Roll map built, dispatch skipped on request.
    DryRun,
    Failed,
}

/// A table left out of the roll map, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedTableReport {
    pub table: String,
    pub reason: String,
}

/// The fatal failure that stopped a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    /// Stage name (`catalog`, `roll_map`, `dispatch`, ...).
    pub stage: String,
    /// Table name or date string, when the failure has one.
    pub key: Option<String>,
    pub message: String,
    pub exit_code: Option<i32>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

impl FailureReport {
    pub fn from_error(error: &Error) -> Self {
        let (exit_code, stdout, stderr) = match error {
            Error::ExternalProcessFailed {
                exit_code,
                stdout,
                stderr,
                ..
            } => (*exit_code, Some(stdout.clone()), Some(stderr.clone())),
            _ => (None, None, None),
        };
        Self {
            stage: error.stage().to_string(),
            key: error.key().map(str::to_string),
            message: error.to_string(),
            exit_code,
            stdout,
            stderr,
        }
    }
}

/// Summary of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub elapsed_secs: f64,
    /// Contract tables matched by the catalog.
    pub tables_found: usize,
    /// Tables that contributed volume to the roll map.
    pub tables_used: Vec<String>,
    pub tables_skipped: Vec<SkippedTableReport>,
    /// Dates in the roll map.
    pub days_total: usize,
    /// Dates the cleaner completed successfully.
    pub days_processed: usize,
    /// Whether dispatch stopped before the last date.
    pub halted_early: bool,
    pub failure: Option<FailureReport>,
}

impl RunReport {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            status: RunStatus::Running,
            started_at,
            finished_at: None,
            elapsed_secs: 0.0,
            tables_found: 0,
            tables_used: Vec::new(),
            tables_skipped: Vec::new(),
            days_total: 0,
            days_processed: 0,
            halted_early: false,
            failure: None,
        }
    }

    /// Record Pass 1 results.
    pub fn record_build(&mut self, build: &RollMapBuild) {
        self.tables_used = build.tables_used.clone();
        self.tables_skipped = build
            .skipped
            .iter()
            .map(|s| SkippedTableReport {
                table: s.table.clone(),
                reason: s.reason.clone(),
            })
            .collect();
        self.days_total = build.roll_map.len();
    }

    /// Close the report with a final status.
    pub fn finish(&mut self, status: RunStatus, finished_at: DateTime<Utc>, elapsed_secs: f64) {
        self.status = status;
        self.finished_at = Some(finished_at);
        self.elapsed_secs = elapsed_secs;
    }

    /// Record the fatal error that ended the run.
    pub fn record_failure(&mut self, error: &Error) {
        self.failure = Some(FailureReport::from_error(error));
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.status, RunStatus::Succeeded | RunStatus::DryRun)
    }

    /// Log a one-line summary.
    pub fn log_summary(&self) {
        info!(
            status = ?self.status,
            tables_found = self.tables_found,
            tables_used = self.tables_used.len(),
            tables_skipped = self.tables_skipped.len(),
            days_total = self.days_total,
            days_processed = self.days_processed,
            halted_early = self.halted_early,
            "Pipeline finished. Total time taken: {:.1}s",
            self.elapsed_secs
        );
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        write_json(path, self)
    }
}

/// Write a value as pretty JSON, creating parent directories.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use roll_core::Stage;

    #[test]
    fn test_failure_report_from_process_failure() {
        let err = Error::ExternalProcessFailed {
            date: "2024/01/03".into(),
            contract: "ES_H24_TICK".into(),
            exit_code: Some(1),
            stdout: "reading ticks\n".into(),
            stderr: "no rows\n".into(),
        };
        let failure = FailureReport::from_error(&err);
        assert_eq!(failure.stage, "dispatch");
        assert_eq!(failure.key.as_deref(), Some("2024/01/03"));
        assert_eq!(failure.exit_code, Some(1));
        assert_eq!(failure.stderr.as_deref(), Some("no rows\n"));
    }

    #[test]
    fn test_failure_report_without_key() {
        let err = Error::Cancelled {
            stage: Stage::Catalog,
            date: None,
        };
        let failure = FailureReport::from_error(&err);
        assert_eq!(failure.stage, "catalog");
        assert_eq!(failure.key, None);
        assert_eq!(failure.stdout, None);
    }

    #[test]
    fn test_report_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports").join("run.json");

        let mut report = RunReport::new(Utc::now());
        report.tables_found = 2;
        report.finish(RunStatus::Succeeded, Utc::now(), 1.5);
        report.write_json(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["status"], "succeeded");
        assert_eq!(value["tables_found"], 2);
        assert!(value["failure"].is_null());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_write_json_reports_failed_flush() {
        // Writes to /dev/full fail with ENOSPC; the small document only hits
        // the device when the buffer is flushed.
        let path = Path::new("/dev/full");
        if !path.exists() {
            return;
        }
        let err = write_json(path, &serde_json::json!({"2024/01/02": "ES_H24_TICK"})).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
