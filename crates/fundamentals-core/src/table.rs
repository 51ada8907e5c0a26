//! The long table: the source of truth, one [`Record`] per [`RecordKey`].

use chrono::NaiveDate;
use polars::prelude::{Column, DataFrame};
use std::collections::BTreeMap;
use std::collections::btree_map;
use tracing::{debug, warn};

use crate::dedup::{UnitConflict, deduplicate};
use crate::error::{FundamentalsError, Result};
use crate::keys::{KeyBuilder, Rejected};
use crate::types::{RawRecord, Record, RecordKey, Ticker};

/// Column headers of the persisted long table, in order.
pub const LONG_COLUMNS: [&str; 10] = [
    "Ticker",
    "CIK",
    "Metric",
    "SourceTag",
    "Value",
    "Fiscal Year",
    "Period",
    "Filing Date",
    "Form",
    "Unit",
];

/// Long-format table keyed by [`RecordKey`].
///
/// Records are kept in key order (ticker, fiscal year, period, metric), so
/// at most one record exists per key by construction.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LongTable {
    records: BTreeMap<RecordKey, Record>,
}

/// Outcome of loading stored rows into a [`LongTable`].
#[derive(Clone, Debug, Default)]
pub struct LoadedTable {
    /// The normalized, deduplicated table.
    pub table: LongTable,
    /// Stored rows that could not be normalized.
    pub rejected: Vec<Rejected>,
    /// Stored rows dropped because a later filing shared their key.
    pub duplicates_removed: usize,
    /// Unit conflicts found among stored rows.
    pub unit_conflicts: Vec<UnitConflict>,
}

impl LoadedTable {
    /// Returns true if loading changed the stored contents.
    #[must_use]
    pub fn was_cleaned(&self) -> bool {
        self.duplicates_removed > 0 || !self.rejected.is_empty()
    }
}

impl LongTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from records, deduplicating by key.
    ///
    /// Later filings win; ties go to the record later in input order.
    #[must_use]
    pub fn from_records(records: Vec<Record>) -> Self {
        let deduped = deduplicate(&records);
        Self {
            records: deduped
                .records
                .into_iter()
                .map(|r| (r.key(), r))
                .collect(),
        }
    }

    /// Normalizes and deduplicates rows handed over by a storage collaborator.
    #[must_use]
    pub fn load(rows: Vec<RawRecord>, keys: &KeyBuilder<'_>) -> LoadedTable {
        let total = rows.len();
        let (records, rejected) = keys.build_all(rows);
        let deduped = deduplicate(&records);

        if deduped.dropped > 0 {
            warn!(
                duplicates = deduped.dropped,
                "Removed duplicate keys from stored table (kept latest filings)"
            );
        }

        let table = Self {
            records: deduped
                .records
                .into_iter()
                .map(|r| (r.key(), r))
                .collect(),
        };
        debug!(rows = total, records = table.len(), "Loaded long table");

        LoadedTable {
            table,
            rejected,
            duplicates_removed: deduped.dropped,
            unit_conflicts: deduped.unit_conflicts,
        }
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the table has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Looks up the record stored under a key.
    #[must_use]
    pub fn get(&self, key: &RecordKey) -> Option<&Record> {
        self.records.get(key)
    }

    /// Returns true if a record is stored under the key.
    #[must_use]
    pub fn contains_key(&self, key: &RecordKey) -> bool {
        self.records.contains_key(key)
    }

    /// Stores a record, returning the one it replaced.
    pub fn upsert(&mut self, record: Record) -> Option<Record> {
        self.records.insert(record.key(), record)
    }

    /// Returns an iterator over records in key order.
    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    /// Returns an iterator over keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &RecordKey> {
        self.records.keys()
    }

    /// Returns the latest filing date stored for a ticker.
    #[must_use]
    pub fn latest_filing(&self, ticker: &Ticker) -> Option<NaiveDate> {
        self.records
            .values()
            .filter(|r| &r.ticker == ticker)
            .map(|r| r.filing_date)
            .max()
    }

    /// Consumes the table and returns its records in key order.
    #[must_use]
    pub fn into_records(self) -> Vec<Record> {
        self.records.into_values().collect()
    }

    /// Returns the table as a DataFrame with the persisted column layout.
    ///
    /// # Errors
    /// Returns [`FundamentalsError::Frame`] if the DataFrame cannot be built.
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let records: Vec<&Record> = self.records.values().collect();
        let strings = |f: fn(&Record) -> String| records.iter().map(|r| f(r)).collect::<Vec<_>>();

        DataFrame::new(vec![
            Column::new("Ticker".into(), strings(|r| r.ticker.to_string())),
            Column::new("CIK".into(), strings(|r| r.cik.clone())),
            Column::new("Metric".into(), strings(|r| r.metric.clone())),
            Column::new("SourceTag".into(), strings(|r| r.source_tag.clone())),
            Column::new(
                "Value".into(),
                records.iter().map(|r| r.value).collect::<Vec<f64>>(),
            ),
            Column::new(
                "Fiscal Year".into(),
                records.iter().map(|r| r.fiscal_year).collect::<Vec<i32>>(),
            ),
            Column::new("Period".into(), strings(|r| r.period.to_string())),
            Column::new("Filing Date".into(), strings(|r| r.filing_date.to_string())),
            Column::new("Form".into(), strings(|r| r.form_type.clone())),
            Column::new("Unit".into(), strings(|r| r.unit.clone())),
        ])
        .map_err(|e| FundamentalsError::Frame(e.to_string()))
    }
}

impl<'a> IntoIterator for &'a LongTable {
    type Item = &'a Record;
    type IntoIter = btree_map::Values<'a, RecordKey, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.values()
    }
}

impl FromIterator<Record> for LongTable {
    fn from_iter<I: IntoIterator<Item = Record>>(iter: I) -> Self {
        Self::from_records(iter.into_iter().collect())
    }
}
