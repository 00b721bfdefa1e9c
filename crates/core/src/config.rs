//! Configuration structures for the roll pipeline.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration, created once per run and read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tick database and contract table conventions.
    pub storage: StorageConfig,
    /// External day cleaner.
    pub cleaner: CleanerConfig,
    /// Output locations.
    pub output: OutputConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the SQLite tick database.
    pub db_path: PathBuf,
    /// Case-insensitive prefix of contract table names.
    pub table_prefix: String,
    /// Case-insensitive suffix of contract table names.
    pub table_suffix: String,
    /// Column holding the `YYYY/MM/DD` trading date.
    pub date_column: String,
    /// Column holding per-tick volume.
    pub volume_column: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("tick_data.db"),
            table_prefix: "ES".to_string(),
            table_suffix: "_TICK".to_string(),
            date_column: "Date".to_string(),
            volume_column: "Volume".to_string(),
        }
    }
}

/// External cleaner configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanerConfig {
    /// Path to the cleaner executable.
    pub executable: PathBuf,
    /// Per-invocation time limit in seconds. `None` waits indefinitely.
    pub timeout_secs: Option<u64>,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("data_cleaner"),
            timeout_secs: Some(3600),
        }
    }
}

impl CleanerConfig {
    /// Per-invocation timeout.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Output configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Root directory handed to the cleaner. Created if absent.
    pub dir: PathBuf,
    /// Where to write the roll map as JSON.
    pub roll_map_path: Option<PathBuf>,
    /// Where to write the run report as JSON.
    pub report_path: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("parquet_out"),
            roll_map_path: None,
            report_path: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text. Missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::config(e.to_string()))
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::config(e.to_string()))
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.storage.db_path.as_os_str().is_empty() {
            return Err(Error::config("storage.db_path is empty"));
        }
        if self.storage.table_prefix.is_empty() && self.storage.table_suffix.is_empty() {
            return Err(Error::config(
                "storage.table_prefix and storage.table_suffix are both empty",
            ));
        }
        if self.storage.date_column.is_empty() || self.storage.volume_column.is_empty() {
            return Err(Error::config("storage column names must not be empty"));
        }
        if self.cleaner.executable.as_os_str().is_empty() {
            return Err(Error::config("cleaner.executable is empty"));
        }
        if self.cleaner.timeout_secs == Some(0) {
            return Err(Error::config("cleaner.timeout_secs must be positive"));
        }
        if self.output.dir.as_os_str().is_empty() {
            return Err(Error::config("output.dir is empty"));
        }
        Ok(())
    }
}
