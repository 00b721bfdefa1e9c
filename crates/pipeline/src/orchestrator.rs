//! Pipeline orchestration: catalog, roll map, dispatch.

use std::time::Instant;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use roll_core::{Config, Error, Result, Stage};
use roll_dispatch::{CancelToken, CommandRunner, DayDispatcher, DispatchTarget};
use roll_storage::{ContractPattern, RollMapBuilder, SqliteStore, TableCatalog};

use crate::report::{write_json, RunReport, RunStatus};

/// A run stopped by a fatal error, with everything recorded up to that point.
#[derive(Error, Debug)]
#[error("{} stage failed: {error}", .error.stage())]
pub struct PipelineFailure {
    pub error: Error,
    pub report: RunReport,
}

/// Runs catalog → roll map → dispatch in strict sequence.
pub struct Pipeline<R: CommandRunner> {
    config: Config,
    runner: R,
    cancel: CancelToken,
    dry_run: bool,
}

impl<R: CommandRunner> Pipeline<R> {
    pub fn new(config: Config, runner: R, cancel: CancelToken) -> Self {
        Self {
            config,
            runner,
            cancel,
            dry_run: false,
        }
    }

    /// Stop after building the roll map.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the whole pipeline once.
    pub fn run(&self) -> std::result::Result<RunReport, PipelineFailure> {
        let clock = Instant::now();
        let mut report = RunReport::new(Utc::now());
        info!("Starting the continuous contract pipeline");

        let result = self.execute(&mut report);

        let status = match (&result, self.dry_run) {
            (Ok(()), true) => RunStatus::DryRun,
            (Ok(()), false) => RunStatus::Succeeded,
            (Err(_), _) => RunStatus::Failed,
        };
        if let Err(error) = &result {
            report.record_failure(error);
        }
        report.finish(status, Utc::now(), clock.elapsed().as_secs_f64());
        report.log_summary();

        if let Some(path) = &self.config.output.report_path {
            if let Err(e) = report.write_json(path) {
                warn!(path = %path.display(), error = %e, "Could not write run report");
            }
        }

        match result {
            Ok(()) => Ok(report),
            Err(error) => Err(PipelineFailure { error, report }),
        }
    }

    fn execute(&self, report: &mut RunReport) -> Result<()> {
        let storage = &self.config.storage;

        self.checkpoint(Stage::Catalog)?;
        let store = SqliteStore::open(&storage.db_path)?;
        let tables = TableCatalog::new(ContractPattern::from_config(storage)).discover(&store)?;
        report.tables_found = tables.len();

        self.checkpoint(Stage::RollMap)?;
        let build = {
            let _interrupt = store.interrupt_on_cancel(&self.cancel);
            RollMapBuilder::from_config(&store, storage)
                .with_cancel(self.cancel.clone())
                .build(&tables)?
        };
        report.record_build(&build);
        info!("--- Pass 1 complete ---");

        if let Some(path) = &self.config.output.roll_map_path {
            write_json(path, &build.roll_map)?;
            info!(path = %path.display(), "Wrote roll map");
        }

        if self.dry_run {
            info!(days = build.roll_map.len(), "Dry run: skipping Pass 2");
            return Ok(());
        }

        self.checkpoint(Stage::Dispatch)?;
        let target = DispatchTarget {
            db_path: storage.db_path.clone(),
            executable: self.config.cleaner.executable.clone(),
            output_dir: self.config.output.dir.clone(),
        };
        let dispatcher = DayDispatcher::new(&self.runner, target, self.cancel.clone());

        match dispatcher.run(&build.roll_map) {
            Ok(summary) => {
                report.days_processed = summary.processed;
                Ok(())
            }
            Err(halt) => {
                report.days_processed = halt.processed;
                report.halted_early = halt.processed < build.roll_map.len();
                Err(halt.error)
            }
        }
    }

    fn checkpoint(&self, stage: Stage) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled { stage, date: None });
        }
        Ok(())
    }
}
