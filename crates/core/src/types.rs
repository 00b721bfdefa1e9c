//! Core data types for the roll pipeline.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::NaiveDate;
use ordered_float::OrderedFloat;
use serde::ser::{Serialize, SerializeMap, Serializer};

/// Summed traded volume with total ordering.
pub type Volume = OrderedFloat<f64>;

/// Date format of the `Date` column and of the cleaner's date argument.
pub const DATE_FORMAT: &str = "%Y/%m/%d";

/// A trading day as stored in a contract table.
///
/// Identity is the stored string, byte for byte: it is the `GROUP BY` key,
/// what the cleaner receives, and what the cleaner matches rows on. Ordering
/// is by calendar day first, so `2024/1/10` sorts after `2024/01/09` even
/// though the strings compare the other way. Two spellings of one day stay
/// distinct keys and sort next to each other.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TradingDate {
    day: NaiveDate,
    raw: String,
}

impl TradingDate {
    /// Parse a `YYYY/MM/DD` date string. Surrounding whitespace is tolerated
    /// for the calendar day but kept in the stored spelling.
    pub fn parse(raw: &str) -> Result<Self, chrono::ParseError> {
        let day = NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)?;
        Ok(Self {
            day,
            raw: raw.to_string(),
        })
    }

    /// Calendar day.
    pub fn day(&self) -> NaiveDate {
        self.day
    }

    /// Date string as stored.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for TradingDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for TradingDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

/// A table holding one contract's tick series.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContractTableRef {
    name: String,
}

impl ContractTableRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ContractTableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Summed volume of one contract on one date.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyVolumeRecord {
    /// Trading date.
    pub date: TradingDate,
    /// Contract table name.
    pub contract: String,
    /// Sum of all row volumes for the contract on this date.
    pub volume: Volume,
}

impl DailyVolumeRecord {
    pub fn new(date: TradingDate, contract: impl Into<String>, volume: f64) -> Self {
        Self {
            date,
            contract: contract.into(),
            volume: OrderedFloat(volume),
        }
    }

    /// Whether this record can make its contract dominant on its date.
    #[inline]
    pub fn has_volume(&self) -> bool {
        self.volume.0.is_finite() && self.volume.0 > 0.0
    }
}

/// Dominant contract per trading date.
///
/// Built once from daily volume records and read-only afterwards. Iteration
/// is in ascending calendar order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollMap {
    days: BTreeMap<TradingDate, String>,
}

impl RollMap {
    /// Pick the contract with the highest volume for every date.
    ///
    /// Records without positive volume are ignored. Equal volumes resolve to
    /// the lexicographically smallest contract name.
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = DailyVolumeRecord>,
    {
        let mut best: BTreeMap<TradingDate, (Volume, String)> = BTreeMap::new();

        for record in records {
            if !record.has_volume() {
                continue;
            }
            match best.entry(record.date) {
                Entry::Vacant(slot) => {
                    slot.insert((record.volume, record.contract));
                }
                Entry::Occupied(mut slot) => {
                    let (volume, contract) = slot.get();
                    let wins = record.volume > *volume
                        || (record.volume == *volume && record.contract < *contract);
                    if wins {
                        slot.insert((record.volume, record.contract));
                    }
                }
            }
        }

        Self {
            days: best
                .into_iter()
                .map(|(date, (_, contract))| (date, contract))
                .collect(),
        }
    }

    /// Number of trading dates.
    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    /// Dominant contract for a date string.
    pub fn get(&self, date: &str) -> Option<&str> {
        let date = TradingDate::parse(date).ok()?;
        self.days.get(&date).map(String::as_str)
    }

    /// Dates and their dominant contract, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = (&TradingDate, &str)> {
        self.days.iter().map(|(date, contract)| (date, contract.as_str()))
    }

    /// First and last trading date.
    pub fn span(&self) -> Option<(&TradingDate, &TradingDate)> {
        let first = self.days.keys().next()?;
        let last = self.days.keys().next_back()?;
        Some((first, last))
    }

    /// Number of dates each contract is dominant on.
    pub fn days_per_contract(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for contract in self.days.values() {
            *counts.entry(contract.as_str()).or_insert(0) += 1;
        }
        counts
    }
}

impl Serialize for RollMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.days.len()))?;
        for (date, contract) in &self.days {
            map.serialize_entry(date.as_str(), contract)?;
        }
        map.end()
    }
}

/// Result of one cleaner invocation.
#[derive(Debug, Clone)]
pub struct ProcessingOutcome {
    /// Date processed.
    pub date: String,
    /// Contract used for the date.
    pub contract: String,
    /// Exit code, `None` if terminated by a signal.
    pub exit_code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Wall-clock time of the invocation.
    pub elapsed: Duration,
}

impl ProcessingOutcome {
    #[inline]
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}
