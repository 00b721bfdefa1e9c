//! SQLite-backed tick store.

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

use roll_core::{CancelToken, ContractTableRef, DailyVolumeRecord, Error, Result, TradingDate};

use crate::source::VolumeSource;

/// Quote an identifier for interpolation into SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Read-only connection to the tick database.
pub struct SqliteStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open the database read-only. Failure here is a catalog error.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| Error::catalog(format!("cannot open {}: {e}", path.display())))?;

        conn.execute_batch("PRAGMA query_only = ON;")
            .map_err(|e| Error::catalog(format!("cannot configure {}: {e}", path.display())))?;

        debug!(path = %path.display(), "Opened tick database read-only");

        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// Wrap an existing connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn, path: None }
    }

    /// Database file path, if opened from one.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Abort the running query as soon as `cancel` is set, for as long as
    /// the returned guard lives.
    ///
    /// Needs an ambient tokio runtime to watch the token. Without one, a
    /// query runs to completion and cancellation is seen between tables.
    pub fn interrupt_on_cancel(&self, cancel: &CancelToken) -> InterruptOnCancel {
        let watcher = match Handle::try_current() {
            Ok(handle) => {
                let interrupt = self.conn.get_interrupt_handle();
                let cancel = cancel.clone();
                Some(handle.spawn(async move {
                    cancel.cancelled().await;
                    debug!("Interrupting running query");
                    interrupt.interrupt();
                }))
            }
            Err(_) => {
                debug!("No async runtime, queries are not interruptible");
                None
            }
        };
        InterruptOnCancel { watcher }
    }
}

/// Guard returned by [`SqliteStore::interrupt_on_cancel`].
#[must_use = "the query is only interruptible while the guard is alive"]
pub struct InterruptOnCancel {
    watcher: Option<JoinHandle<()>>,
}

impl Drop for InterruptOnCancel {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

impl VolumeSource for SqliteStore {
    fn table_names(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT name FROM sqlite_master
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
                 ORDER BY name",
            )
            .map_err(|e| Error::catalog(format!("cannot list tables: {e}")))?;

        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| Error::catalog(format!("cannot list tables: {e}")))?;

        Ok(names)
    }

    fn columns(&self, table: &ContractTableRef) -> Result<Vec<String>> {
        let sql = format!("PRAGMA table_info({})", quote_ident(table.name()));
        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| Error::table(table.name(), e.to_string()))?;

        let columns = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| Error::table(table.name(), e.to_string()))?;

        if columns.is_empty() {
            return Err(Error::table(table.name(), "table does not exist"));
        }
        Ok(columns)
    }

    fn daily_volumes(
        &self,
        table: &ContractTableRef,
        date_column: &str,
        volume_column: &str,
    ) -> Result<Vec<DailyVolumeRecord>> {
        let date_col = quote_ident(date_column);
        let sql = format!(
            "SELECT {date_col}, SUM({}) FROM {} GROUP BY {date_col}",
            quote_ident(volume_column),
            quote_ident(table.name()),
        );

        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| Error::table(table.name(), e.to_string()))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, Option<String>>(0)?, row.get::<_, Option<f64>>(1)?))
            })
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| Error::table(table.name(), format!("malformed aggregate row: {e}")))?;

        rows.into_iter()
            .map(|(date, volume)| to_record(table, date, volume))
            .collect()
    }
}

/// Map one aggregate row into a typed record, rejecting anything malformed.
fn to_record(
    table: &ContractTableRef,
    date: Option<String>,
    volume: Option<f64>,
) -> Result<DailyVolumeRecord> {
    let raw = date.ok_or_else(|| Error::table(table.name(), "NULL date in aggregate"))?;
    let date = TradingDate::parse(&raw)
        .map_err(|e| Error::table(table.name(), format!("invalid date {raw:?}: {e}")))?;

    // SUM over only NULLs yields NULL.
    let volume = volume.unwrap_or(0.0);
    if !volume.is_finite() || volume < 0.0 {
        return Err(Error::table(
            table.name(),
            format!("invalid volume {volume} on {raw}"),
        ));
    }

    Ok(DailyVolumeRecord::new(date, table.name(), volume))
}
