//! External cleaner dispatch for the roll pipeline.
//!
//! This crate provides:
//! - A command-runner abstraction with captured output
//! - A process runner with per-invocation timeout and cancellation
//! - The fail-fast, chronological per-day dispatcher

pub mod dispatcher;
pub mod runner;

pub use roll_core::CancelToken;
pub use dispatcher::{DayDispatcher, DispatchHalt, DispatchSummary, DispatchTarget};
pub use runner::{CommandRunner, ExternalCommand, ProcessOutput, ProcessRunner, RunError};
