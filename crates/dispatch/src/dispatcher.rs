//! Per-day cleaner dispatch.
//!
//! Walks the roll map oldest date first and runs the cleaner once per date
//! with `(db_path, contract, date, output_dir)`. The first failure stops the
//! loop: later days may depend on state the cleaner carries over from earlier
//! days, so nothing after a failed date is attempted. Output of dates already
//! processed is left in place.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use roll_core::{CancelToken, Error, ProcessingOutcome, RollMap, Stage, TradingDate};

use crate::runner::{CommandRunner, ExternalCommand, RunError};

/// Where the cleaner reads from and writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchTarget {
    /// Tick database path handed to the cleaner.
    pub db_path: PathBuf,
    /// Cleaner executable.
    pub executable: PathBuf,
    /// Root output directory handed to the cleaner.
    pub output_dir: PathBuf,
}

/// Result of a dispatch that processed every date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSummary {
    pub processed: usize,
    pub elapsed: Duration,
}

/// A dispatch stopped by a fatal error.
#[derive(Debug)]
pub struct DispatchHalt {
    /// Dates completed before the failure.
    pub processed: usize,
    pub error: Error,
}

/// Runs the cleaner for every date of a roll map.
pub struct DayDispatcher<R: CommandRunner> {
    runner: R,
    target: DispatchTarget,
    cancel: CancelToken,
}

impl<R: CommandRunner> DayDispatcher<R> {
    pub fn new(runner: R, target: DispatchTarget, cancel: CancelToken) -> Self {
        Self {
            runner,
            target,
            cancel,
        }
    }

    pub fn target(&self) -> &DispatchTarget {
        &self.target
    }

    /// The command run for one date.
    pub fn command_for(&self, date: &TradingDate, contract: &str) -> ExternalCommand {
        ExternalCommand::new(&self.target.executable)
            .arg(&self.target.db_path)
            .arg(contract)
            .arg(date.as_str())
            .arg(&self.target.output_dir)
    }

    /// Process every date in ascending order, stopping at the first failure.
    pub fn run(&self, roll_map: &RollMap) -> Result<DispatchSummary, DispatchHalt> {
        info!("--- Pass 2: processing days with the cleaner ---");
        let start = Instant::now();
        let halt = |processed, error| DispatchHalt { processed, error };

        self.check_executable().map_err(|e| halt(0, e))?;
        self.prepare_output_dir().map_err(|e| halt(0, e))?;

        let total = roll_map.len();
        let mut processed = 0;

        for (date, contract) in roll_map.iter() {
            if self.cancel.is_cancelled() {
                return Err(halt(
                    processed,
                    Error::Cancelled {
                        stage: Stage::Dispatch,
                        date: Some(date.to_string()),
                    },
                ));
            }

            info!("[{}/{}] Processing {} from {}", processed + 1, total, date, contract);
            let outcome = self.process_day(date, contract).map_err(|e| halt(processed, e))?;
            debug!(
                date = %date,
                elapsed_ms = outcome.elapsed.as_millis() as u64,
                "Day processed"
            );
            processed += 1;
        }

        info!(
            processed,
            elapsed_s = start.elapsed().as_secs_f64(),
            "--- Pass 2 complete ---"
        );

        Ok(DispatchSummary {
            processed,
            elapsed: start.elapsed(),
        })
    }

    /// Run the cleaner for one date and classify the result.
    fn process_day(&self, date: &TradingDate, contract: &str) -> Result<ProcessingOutcome, Error> {
        let command = self.command_for(date, contract);

        let output = self.runner.run(&command).map_err(|e| {
            error!(date = %date, contract, error = %e, "Cleaner could not be run");
            match e {
                RunError::NotFound(path) => Error::ExternalProcessNotFound {
                    path,
                    date: Some(date.to_string()),
                },
                RunError::TimedOut(timeout) => Error::ExternalProcessTimedOut {
                    date: date.to_string(),
                    contract: contract.to_string(),
                    timeout,
                },
                RunError::Cancelled => Error::Cancelled {
                    stage: Stage::Dispatch,
                    date: Some(date.to_string()),
                },
                other => Error::UnexpectedDispatch {
                    date: date.to_string(),
                    contract: contract.to_string(),
                    reason: other.to_string(),
                },
            }
        })?;

        let outcome = ProcessingOutcome {
            date: date.to_string(),
            contract: contract.to_string(),
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            elapsed: output.elapsed,
        };

        if !outcome.succeeded() {
            error!(
                date = %date,
                contract,
                exit_code = ?outcome.exit_code,
                "Cleaner failed while processing {} from {}",
                date,
                contract
            );
            error!("--- cleaner stdout ---\n{}", outcome.stdout.trim_end());
            error!("--- cleaner stderr ---\n{}", outcome.stderr.trim_end());
            return Err(Error::ExternalProcessFailed {
                date: outcome.date,
                contract: outcome.contract,
                exit_code: outcome.exit_code,
                stdout: outcome.stdout,
                stderr: outcome.stderr,
            });
        }

        if !outcome.stdout.trim().is_empty() {
            debug!("{}", outcome.stdout.trim_end());
        }
        if !outcome.stderr.trim().is_empty() {
            debug!(stream = "stderr", "{}", outcome.stderr.trim_end());
        }

        Ok(outcome)
    }

    /// An explicit path must exist; a bare name is resolved on `PATH` at spawn.
    fn check_executable(&self) -> Result<(), Error> {
        let exe = &self.target.executable;
        if is_explicit_path(exe) && !exe.is_file() {
            error!(path = %exe.display(), "Cleaner executable not found");
            return Err(Error::ExternalProcessNotFound {
                path: exe.clone(),
                date: None,
            });
        }
        Ok(())
    }

    fn prepare_output_dir(&self) -> Result<(), Error> {
        let dir = &self.target.output_dir;
        fs::create_dir_all(dir).map_err(|e| Error::OutputDir {
            path: dir.clone(),
            reason: e.to_string(),
        })
    }
}

fn is_explicit_path(path: &Path) -> bool {
    path.is_absolute() || path.components().count() > 1
}
