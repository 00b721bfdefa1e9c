//! Tick store access for the roll pipeline.
//!
//! This crate handles:
//! - Opening the SQLite tick database read-only
//! - Contract table discovery by naming convention
//! - Per-table daily volume aggregation
//! - Roll map construction (dominant contract per date)

pub mod builder;
pub mod catalog;
pub mod source;
pub mod sqlite;

pub use builder::{RollMapBuild, RollMapBuilder, SkippedTable};
pub use catalog::{ContractPattern, TableCatalog};
pub use source::VolumeSource;
pub use sqlite::{InterruptOnCancel, SqliteStore};
