//! roll-pipeline: build the continuous-contract roll map and drive the day
//! cleaner over it.
//!
//! Usage:
//!   roll-pipeline --config roll.toml
//!   roll-pipeline --db ticks.db --cleaner ./build/data_cleaner --output-dir ./parquet
//!   roll-pipeline --db ticks.db --dry-run --roll-map-out roll_map.json

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use roll_core::Config;
use roll_dispatch::{CancelToken, ProcessRunner};
use roll_pipeline::Pipeline;

#[derive(Parser, Debug)]
#[command(name = "roll-pipeline")]
#[command(about = "Build a continuous-contract roll map and run the day cleaner for every date")]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// SQLite tick database
    #[arg(long, env = "ROLL_DB")]
    db: Option<PathBuf>,

    /// Day cleaner executable
    #[arg(long, env = "ROLL_CLEANER")]
    cleaner: Option<PathBuf>,

    /// Root output directory handed to the cleaner
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Per-day cleaner timeout in seconds
    #[arg(long, conflicts_with = "no_timeout")]
    timeout_secs: Option<u64>,

    /// Wait for the cleaner indefinitely
    #[arg(long)]
    no_timeout: bool,

    /// Contract table prefix (case-insensitive)
    #[arg(long)]
    table_prefix: Option<String>,

    /// Contract table suffix (case-insensitive)
    #[arg(long)]
    table_suffix: Option<String>,

    /// Write the roll map as JSON
    #[arg(long)]
    roll_map_out: Option<PathBuf>,

    /// Write the run report as JSON
    #[arg(long)]
    report_out: Option<PathBuf>,

    /// Build the roll map only, do not run the cleaner
    #[arg(long)]
    dry_run: bool,

    /// Debug logging for the pipeline crates
    #[arg(long, short)]
    verbose: bool,

    /// Print a default configuration file and exit
    #[arg(long)]
    generate_config: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_tracing(args.verbose)?;

    if args.generate_config {
        println!("{}", Config::default().to_toml_string()?);
        return Ok(ExitCode::SUCCESS);
    }

    let config = load_config(&args)?;

    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping the running cleaner");
            on_interrupt.cancel();
        }
    });

    let dry_run = args.dry_run;
    let outcome = tokio::task::spawn_blocking(move || {
        let runner = ProcessRunner::new(cancel.clone()).with_timeout(config.cleaner.timeout());
        Pipeline::new(config, runner, cancel).dry_run(dry_run).run()
    })
    .await
    .context("pipeline task panicked")?;

    if let Err(failure) = outcome {
        error!(
            stage = %failure.error.stage(),
            key = failure.error.key().unwrap_or("-"),
            "Pipeline halted: {}",
            failure.error
        );
        return Ok(ExitCode::FAILURE);
    }

    Ok(ExitCode::SUCCESS)
}

fn init_tracing(verbose: bool) -> Result<()> {
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if verbose {
        for directive in ["roll_pipeline=debug", "roll_storage=debug", "roll_dispatch=debug"] {
            filter = filter.add_directive(directive.parse()?);
        }
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

/// File config (or defaults) with command-line overrides applied.
fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::default(),
    };

    if let Some(db) = &args.db {
        config.storage.db_path = db.clone();
    }
    if let Some(prefix) = &args.table_prefix {
        config.storage.table_prefix = prefix.clone();
    }
    if let Some(suffix) = &args.table_suffix {
        config.storage.table_suffix = suffix.clone();
    }
    if let Some(cleaner) = &args.cleaner {
        config.cleaner.executable = cleaner.clone();
    }
    if let Some(secs) = args.timeout_secs {
        config.cleaner.timeout_secs = Some(secs);
    }
    if args.no_timeout {
        config.cleaner.timeout_secs = None;
    }
    if let Some(dir) = &args.output_dir {
        config.output.dir = dir.clone();
    }
    if let Some(path) = &args.roll_map_out {
        config.output.roll_map_path = Some(path.clone());
    }
    if let Some(path) = &args.report_out {
        config.output.report_path = Some(path.clone());
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}
