//! Roll map construction from per-table daily volume aggregates.
//!
//! Every contract table is aggregated by the store (`SUM(Volume) GROUP BY
//! Date`), the records of all tables are merged, and for each date the
//! contract with the highest volume is selected. A table that cannot be
//! aggregated is skipped with a warning; only a scan that yields no volume at
//! all is an error. Cancellation is checked before and after every table.

use std::time::Instant;

use tracing::{debug, info, warn};

use roll_core::config::StorageConfig;
use roll_core::{
    CancelToken, ContractTableRef, DailyVolumeRecord, Error, Result, RollMap, Stage, TradingDate,
};

use crate::source::VolumeSource;

/// A table left out of the roll map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedTable {
    pub table: String,
    pub reason: String,
}

/// Finished roll map together with per-table scan results.
#[derive(Debug, Clone)]
pub struct RollMapBuild {
    /// Dominant contract per date.
    pub roll_map: RollMap,
    /// Tables that contributed at least one record with positive volume.
    pub tables_used: Vec<String>,
    /// Tables that failed aggregation.
    pub skipped: Vec<SkippedTable>,
}

/// Builds the roll map.
pub struct RollMapBuilder<'a, S: VolumeSource + ?Sized> {
    source: &'a S,
    date_column: String,
    volume_column: String,
    cancel: CancelToken,
}

impl<'a, S: VolumeSource + ?Sized> RollMapBuilder<'a, S> {
    /// Create a builder using the default `Date` / `Volume` columns.
    pub fn new(source: &'a S) -> Self {
        Self::with_columns(source, "Date", "Volume")
    }

    pub fn with_columns(source: &'a S, date_column: &str, volume_column: &str) -> Self {
        Self {
            source,
            date_column: date_column.to_string(),
            volume_column: volume_column.to_string(),
            cancel: CancelToken::new(),
        }
    }

    /// Stop between tables once `cancel` is set.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn from_config(source: &'a S, config: &StorageConfig) -> Self {
        Self::with_columns(source, &config.date_column, &config.volume_column)
    }

    /// Aggregate every table and select the dominant contract per date.
    pub fn build(&self, tables: &[ContractTableRef]) -> Result<RollMapBuild> {
        info!("--- Pass 1: building the roll map ---");
        let start = Instant::now();

        let mut records: Vec<DailyVolumeRecord> = Vec::new();
        let mut tables_used = Vec::new();
        let mut skipped = Vec::new();

        for (i, table) in tables.iter().enumerate() {
            self.checkpoint()?;
            info!("[{}/{}] Aggregating daily volume for {}", i + 1, tables.len(), table);

            let aggregated = self.aggregate(table, i == 0);
            // An interrupted query surfaces as a table error; report the cancel instead.
            self.checkpoint()?;

            match aggregated {
                Ok(table_records) => {
                    let days = table_records.iter().filter(|r| r.has_volume()).count();
                    debug!(table = %table, days, "Aggregated table");
                    if days > 0 {
                        tables_used.push(table.name().to_string());
                    } else {
                        warn!(table = %table, "Table has no traded volume");
                    }
                    records.extend(table_records);
                }
                Err(e) => {
                    warn!(table = %table, error = %e, "Skipping table");
                    skipped.push(SkippedTable {
                        table: table.name().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let roll_map = RollMap::from_records(records);

        if roll_map.is_empty() {
            return Err(Error::roll_map_empty(format!(
                "no volume data in {} tables ({} skipped)",
                tables.len(),
                skipped.len()
            )));
        }

        if let Some((first, last)) = roll_map.span() {
            info!(
                days = roll_map.len(),
                first = %first,
                last = %last,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Roll map built for {} trading days",
                roll_map.len()
            );
        }
        let mut previous: Option<&TradingDate> = None;
        for (date, _) in roll_map.iter() {
            if let Some(prev) = previous.filter(|prev| prev.day() == date.day()) {
                warn!(
                    first = ?prev.as_str(),
                    second = ?date.as_str(),
                    "One trading day is stored under two spellings; the cleaner runs for each"
                );
            }
            previous = Some(date);
        }
        for (contract, days) in roll_map.days_per_contract() {
            debug!(contract, days, "Dominant days");
        }

        Ok(RollMapBuild {
            roll_map,
            tables_used,
            skipped,
        })
    }

    fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            warn!("Roll map build cancelled");
            return Err(Error::Cancelled {
                stage: Stage::RollMap,
                date: None,
            });
        }
        Ok(())
    }

    /// Aggregate one table. All errors are scoped to the table.
    fn aggregate(&self, table: &ContractTableRef, log_columns: bool) -> Result<Vec<DailyVolumeRecord>> {
        let columns = self.source.columns(table).map_err(|e| scoped(table, e))?;
        if log_columns {
            debug!(table = %table, columns = ?columns, "Columns of first contract table");
        }

        // SQLite identifiers are case-insensitive.
        for required in [&self.date_column, &self.volume_column] {
            if !columns.iter().any(|c| c.eq_ignore_ascii_case(required)) {
                return Err(Error::table(
                    table.name(),
                    format!("missing column {required}"),
                ));
            }
        }

        self.source
            .daily_volumes(table, &self.date_column, &self.volume_column)
            .map_err(|e| scoped(table, e))
    }
}

fn scoped(table: &ContractTableRef, err: Error) -> Error {
    match err {
        Error::TableAggregation { .. } => err,
        other => Error::table(table.name(), other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// In-memory source: table → per-date volumes, or a failure message.
    #[derive(Default)]
    struct MemorySource {
        tables: HashMap<String, std::result::Result<Vec<(&'static str, f64)>, &'static str>>,
        columns: HashMap<String, Vec<&'static str>>,
        queried: RefCell<Vec<String>>,
        cancel_on_query: Option<CancelToken>,
    }

    impl MemorySource {
        fn table(mut self, name: &str, days: Vec<(&'static str, f64)>) -> Self {
            self.tables.insert(name.to_string(), Ok(days));
            self.columns.insert(name.to_string(), vec!["Date", "Time", "Volume"]);
            self
        }

        fn failing(mut self, name: &str, msg: &'static str) -> Self {
            self.tables.insert(name.to_string(), Err(msg));
            self.columns.insert(name.to_string(), vec!["Date", "Volume"]);
            self
        }

        fn without_volume(mut self, name: &str) -> Self {
            self.tables.insert(name.to_string(), Ok(vec![("2024/01/02", 1.0e9)]));
            self.columns.insert(name.to_string(), vec!["Date", "Price"]);
            self
        }

        fn refs(&self) -> Vec<ContractTableRef> {
            let mut refs: Vec<_> = self.tables.keys().map(ContractTableRef::new).collect();
            refs.sort();
            refs
        }
    }

    impl VolumeSource for MemorySource {
        fn table_names(&self) -> Result<Vec<String>> {
            Ok(self.tables.keys().cloned().collect())
        }

        fn columns(&self, table: &ContractTableRef) -> Result<Vec<String>> {
            self.columns
                .get(table.name())
                .map(|cols| cols.iter().map(|c| c.to_string()).collect())
                .ok_or_else(|| Error::table(table.name(), "table does not exist"))
        }

        fn daily_volumes(
            &self,
            table: &ContractTableRef,
            _date_column: &str,
            _volume_column: &str,
        ) -> Result<Vec<DailyVolumeRecord>> {
            self.queried.borrow_mut().push(table.name().to_string());
            if let Some(cancel) = &self.cancel_on_query {
                cancel.cancel();
                return Err(Error::table(table.name(), "interrupted"));
            }
            match self.tables.get(table.name()) {
                Some(Ok(days)) => Ok(days
                    .iter()
                    .map(|(d, v)| {
                        DailyVolumeRecord::new(TradingDate::parse(d).unwrap(), table.name(), *v)
                    })
                    .collect()),
                Some(Err(msg)) => Err(Error::table(table.name(), *msg)),
                None => Err(Error::table(table.name(), "table does not exist")),
            }
        }
    }

    #[test]
    fn test_front_and_back_month() {
        let source = MemorySource::default()
            .table("ES_H24_TICK", vec![("2024/01/02", 500.0), ("2024/01/03", 600.0)])
            .table("ES_M24_TICK", vec![("2024/01/02", 800.0)]);

        let build = RollMapBuilder::new(&source).build(&source.refs()).unwrap();

        let entries: Vec<(&str, &str)> =
            build.roll_map.iter().map(|(d, c)| (d.as_str(), c)).collect();
        assert_eq!(
            entries,
            vec![("2024/01/02", "ES_M24_TICK"), ("2024/01/03", "ES_H24_TICK")]
        );
        assert_eq!(build.tables_used, vec!["ES_H24_TICK", "ES_M24_TICK"]);
        assert!(build.skipped.is_empty());
    }

    #[test]
    fn test_failing_table_is_skipped() {
        let source = MemorySource::default()
            .table("ES_H24_TICK", vec![("2024/01/02", 500.0)])
            .failing("ES_M24_TICK", "disk I/O error");

        let build = RollMapBuilder::new(&source).build(&source.refs()).unwrap();

        assert_eq!(build.roll_map.len(), 1);
        assert_eq!(build.roll_map.get("2024/01/02"), Some("ES_H24_TICK"));
        assert_eq!(build.skipped.len(), 1);
        assert_eq!(build.skipped[0].table, "ES_M24_TICK");
        assert!(build.skipped[0].reason.contains("disk I/O error"));
    }

    #[test]
    fn test_missing_volume_column_is_skipped() {
        let source = MemorySource::default()
            .table("ES_H24_TICK", vec![("2024/01/02", 500.0)])
            .without_volume("ES_M24_TICK");

        let build = RollMapBuilder::new(&source).build(&source.refs()).unwrap();

        // The skipped table's huge volume never reaches the map.
        assert_eq!(build.roll_map.get("2024/01/02"), Some("ES_H24_TICK"));
        assert!(build.skipped[0].reason.contains("missing column Volume"));
    }

    #[test]
    fn test_column_match_ignores_case() {
        let mut source = MemorySource::default().table("ES_H24_TICK", vec![("2024/01/02", 5.0)]);
        source
            .columns
            .insert("ES_H24_TICK".to_string(), vec!["date", "VOLUME"]);

        let build = RollMapBuilder::new(&source).build(&source.refs()).unwrap();
        assert_eq!(build.roll_map.len(), 1);
    }

    #[test]
    fn test_all_tables_failing_is_empty_error() {
        let source = MemorySource::default()
            .failing("ES_H24_TICK", "no such column: Volume")
            .failing("ES_M24_TICK", "database disk image is malformed");

        let err = RollMapBuilder::new(&source).build(&source.refs()).unwrap_err();
        assert!(matches!(err, Error::RollMapEmpty(_)));
    }

    #[test]
    fn test_no_tables_is_empty_error() {
        let source = MemorySource::default();
        let err = RollMapBuilder::new(&source).build(&[]).unwrap_err();
        assert!(matches!(err, Error::RollMapEmpty(_)));
    }

    #[test]
    fn test_zero_volume_only_is_empty_error() {
        let source = MemorySource::default().table("ES_H24_TICK", vec![("2024/01/02", 0.0)]);
        let err = RollMapBuilder::new(&source).build(&source.refs()).unwrap_err();
        assert!(matches!(err, Error::RollMapEmpty(_)));
    }

    #[test]
    fn test_table_order_does_not_matter() {
        let source = MemorySource::default()
            .table("ES_H24_TICK", vec![("2024/03/14", 900.0), ("2024/03/15", 100.0)])
            .table("ES_M24_TICK", vec![("2024/03/14", 900.0), ("2024/03/15", 1200.0)]);

        let mut refs = source.refs();
        let forward = RollMapBuilder::new(&source).build(&refs).unwrap();
        refs.reverse();
        let backward = RollMapBuilder::new(&source).build(&refs).unwrap();

        assert_eq!(forward.roll_map, backward.roll_map);
        assert_eq!(forward.roll_map.get("2024/03/14"), Some("ES_H24_TICK"));
        assert_eq!(forward.roll_map.get("2024/03/15"), Some("ES_M24_TICK"));
    }

    #[test]
    fn test_cancel_during_build_stops_before_next_table() {
        let cancel = CancelToken::new();
        let mut source = MemorySource::default()
            .table("ES_H24_TICK", vec![("2024/01/02", 500.0)])
            .table("ES_M24_TICK", vec![("2024/01/02", 800.0)]);
        source.cancel_on_query = Some(cancel.clone());

        let err = RollMapBuilder::new(&source)
            .with_cancel(cancel)
            .build(&source.refs())
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Cancelled {
                stage: Stage::RollMap,
                date: None
            }
        ));
        assert_eq!(*source.queried.borrow(), vec!["ES_H24_TICK"]);
    }

    #[test]
    fn test_cancelled_before_build_queries_nothing() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let source = MemorySource::default().table("ES_H24_TICK", vec![("2024/01/02", 500.0)]);

        let err = RollMapBuilder::new(&source)
            .with_cancel(cancel)
            .build(&source.refs())
            .unwrap_err();

        assert_eq!(err.stage(), Stage::RollMap);
        assert!(source.queried.borrow().is_empty());
    }
}
