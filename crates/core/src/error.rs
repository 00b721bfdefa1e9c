//! Error types for the roll pipeline.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline stage an error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Configuration and startup.
    Setup,
    /// Contract table discovery.
    Catalog,
    /// Daily volume aggregation and roll map construction.
    RollMap,
    /// Per-day external cleaner invocations.
    Dispatch,
    /// Writing run artifacts (roll map, report).
    Report,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Setup => "setup",
            Stage::Catalog => "catalog",
            Stage::RollMap => "roll_map",
            Stage::Dispatch => "dispatch",
            Stage::Report => "report",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for the roll pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The store could not be opened or its tables could not be listed.
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// One contract table could not be aggregated. Recoverable: the table is skipped.
    #[error("Aggregation failed for table {table}: {reason}")]
    TableAggregation { table: String, reason: String },

    /// No table contributed any volume data.
    #[error("Roll map is empty: {0}")]
    RollMapEmpty(String),

    /// The cleaner executable does not exist or could not be located.
    #[error("Cleaner executable not found: {}", .path.display())]
    ExternalProcessNotFound {
        path: PathBuf,
        /// Date being processed when the lookup failed, if any.
        date: Option<String>,
    },

    /// The cleaner exited unsuccessfully.
    #[error("Cleaner failed on {date} for {contract} ({})", exit_label(.exit_code))]
    ExternalProcessFailed {
        date: String,
        contract: String,
        /// `None` when the process was terminated by a signal.
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    /// The cleaner exceeded its time budget and was killed.
    #[error("Cleaner timed out on {date} for {contract} after {}s", .timeout.as_secs())]
    ExternalProcessTimedOut {
        date: String,
        contract: String,
        timeout: Duration,
    },

    /// Any other failure while starting or monitoring the cleaner.
    #[error("Unexpected dispatch failure on {date} for {contract}: {reason}")]
    UnexpectedDispatch {
        date: String,
        contract: String,
        reason: String,
    },

    /// The output directory could not be created.
    #[error("Cannot create output directory {}: {reason}", .path.display())]
    OutputDir { path: PathBuf, reason: String },

    /// The run was interrupted by the operator.
    #[error("Cancelled during {stage}")]
    Cancelled {
        stage: Stage,
        /// Date whose invocation was interrupted, if any.
        date: Option<String>,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a catalog error.
    pub fn catalog(msg: impl Into<String>) -> Self {
        Error::Catalog(msg.into())
    }

    /// Create a table-scoped aggregation error.
    pub fn table(table: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::TableAggregation {
            table: table.into(),
            reason: reason.into(),
        }
    }

    /// Create a roll-map-empty error.
    pub fn roll_map_empty(msg: impl Into<String>) -> Self {
        Error::RollMapEmpty(msg.into())
    }

    /// Stage this error belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            Error::Config(_) => Stage::Setup,
            Error::Catalog(_) => Stage::Catalog,
            Error::TableAggregation { .. } | Error::RollMapEmpty(_) => Stage::RollMap,
            Error::ExternalProcessNotFound { .. }
            | Error::ExternalProcessFailed { .. }
            | Error::ExternalProcessTimedOut { .. }
            | Error::UnexpectedDispatch { .. }
            | Error::OutputDir { .. } => Stage::Dispatch,
            Error::Cancelled { stage, .. } => *stage,
            Error::Io(_) | Error::Json(_) => Stage::Report,
        }
    }

    /// Identifying key of the failure: a table name or a date string.
    pub fn key(&self) -> Option<&str> {
        match self {
            Error::TableAggregation { table, .. } => Some(table),
            Error::ExternalProcessNotFound { date, .. } | Error::Cancelled { date, .. } => {
                date.as_deref()
            }
            Error::ExternalProcessFailed { date, .. }
            | Error::ExternalProcessTimedOut { date, .. }
            | Error::UnexpectedDispatch { date, .. } => Some(date),
            _ => None,
        }
    }

    /// Whether this error halts the run. Only per-table aggregation failures are recovered.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::TableAggregation { .. })
    }
}
