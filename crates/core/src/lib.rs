//! Core types and configuration for the continuous-contract roll pipeline.
//!
//! This crate provides shared types used across all other crates:
//! - Trading dates, daily volume records and the roll map
//! - Cleaner invocation outcomes
//! - Configuration structures
//! - Common error types
//! - The operator cancellation token

pub mod cancel;
pub mod config;
pub mod error;
pub mod types;

pub use cancel::CancelToken;
pub use config::Config;
pub use error::{Error, Result, Stage};
pub use types::*;
