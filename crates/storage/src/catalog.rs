//! Contract table discovery.

use tracing::{info, warn};

use roll_core::config::StorageConfig;
use roll_core::{ContractTableRef, Result};

use crate::source::VolumeSource;

/// Naming convention of contract tables: case-insensitive prefix and suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractPattern {
    prefix: String,
    suffix: String,
}

impl ContractPattern {
    pub fn new(prefix: &str, suffix: &str) -> Self {
        Self {
            prefix: prefix.to_ascii_uppercase(),
            suffix: suffix.to_ascii_uppercase(),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(&config.table_prefix, &config.table_suffix)
    }

    /// Whether a table name follows the convention.
    pub fn matches(&self, table: &str) -> bool {
        let upper = table.to_ascii_uppercase();
        upper.starts_with(&self.prefix) && upper.ends_with(&self.suffix)
    }
}

impl Default for ContractPattern {
    fn default() -> Self {
        Self::new("ES", "_TICK")
    }
}

/// Enumerates the contract tables of a store.
pub struct TableCatalog {
    pattern: ContractPattern,
}

impl TableCatalog {
    pub fn new(pattern: ContractPattern) -> Self {
        Self { pattern }
    }

    /// List tables matching the pattern, sorted by name.
    ///
    /// An empty list means there is nothing to process; it is not an error.
    pub fn discover<S: VolumeSource + ?Sized>(&self, source: &S) -> Result<Vec<ContractTableRef>> {
        info!("Scanning database for contract tables");
        let all = source.table_names()?;
        info!(count = all.len(), tables = ?all, "Found tables");

        let mut contracts: Vec<ContractTableRef> = all
            .iter()
            .filter(|name| self.pattern.matches(name))
            .map(ContractTableRef::new)
            .collect();
        contracts.sort();

        if contracts.is_empty() {
            warn!(
                prefix = %self.pattern.prefix,
                suffix = %self.pattern.suffix,
                "No contract tables matched"
            );
        } else {
            info!(
                count = contracts.len(),
                "Found {} contract tables: {}",
                contracts.len(),
                contracts
                    .iter()
                    .map(ContractTableRef::name)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        Ok(contracts)
    }
}
