//! Read-only access to contract tables.

use roll_core::{ContractTableRef, DailyVolumeRecord, Result};

/// A store of per-contract tick tables that can aggregate volume by date.
///
/// Errors from [`VolumeSource::table_names`] are catalog errors. Errors from
/// the per-table methods are table-scoped (`Error::TableAggregation`) so
/// callers can skip the table and continue.
pub trait VolumeSource {
    /// All user tables in the store.
    fn table_names(&self) -> Result<Vec<String>>;

    /// Column names of a table.
    fn columns(&self, table: &ContractTableRef) -> Result<Vec<String>>;

    /// Summed volume per distinct date, computed by the store.
    fn daily_volumes(
        &self,
        table: &ContractTableRef,
        date_column: &str,
        volume_column: &str,
    ) -> Result<Vec<DailyVolumeRecord>>;
}
