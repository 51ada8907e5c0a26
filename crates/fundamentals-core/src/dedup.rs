//! Deduplication: at most one record per [`RecordKey`].

use serde::Serialize;
use std::collections::HashMap;
use tracing::warn;

use crate::types::{Record, RecordKey};

/// How a unit conflict between two records sharing a key was resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum UnitResolution {
    /// The newer record (and its unit) replaced the older one.
    TookNewer,
    /// The stored record was kept because the other was not newer.
    KeptStored,
}

/// Two records sharing a [`RecordKey`] that report different units.
///
/// Conflicts are resolved like any other value disagreement (newer filing
/// wins) and surfaced as warnings; values are never averaged or dropped.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UnitConflict {
    /// The shared key.
    pub key: RecordKey,
    /// Unit of the record that was in place first.
    pub stored_unit: String,
    /// Unit of the competing record.
    pub candidate_unit: String,
    /// Which record survived.
    pub resolution: UnitResolution,
}

impl UnitConflict {
    pub(crate) fn log(&self) {
        warn!(
            key = %self.key,
            stored_unit = %self.stored_unit,
            candidate_unit = %self.candidate_unit,
            resolution = ?self.resolution,
            "Conflicting units for the same key"
        );
    }
}

/// Result of deduplicating a record set.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Deduplicated {
    /// One record per key, in first-seen key order.
    pub records: Vec<Record>,
    /// Number of input records that were superseded.
    pub dropped: usize,
    /// Unit conflicts found while collapsing keys.
    pub unit_conflicts: Vec<UnitConflict>,
}

impl Deduplicated {
    /// Consumes the result and returns the surviving records.
    #[must_use]
    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

/// Returns true if `challenger`, seen after `incumbent`, replaces it.
fn supersedes(challenger: &Record, incumbent: &Record) -> bool {
    challenger.filing_date >= incumbent.filing_date
}

/// Collapses records to one per [`RecordKey`].
///
/// Among records sharing a key the one with the latest filing date is kept;
/// if filing dates tie, the one encountered last in input order wins. The
/// input is not modified, and deduplicating an already deduplicated set
/// returns it unchanged.
#[must_use]
pub fn deduplicate(records: &[Record]) -> Deduplicated {
    let mut slots: HashMap<RecordKey, usize> = HashMap::with_capacity(records.len());
    let mut kept: Vec<Record> = Vec::with_capacity(records.len());
    let mut unit_conflicts = Vec::new();
    let mut dropped = 0usize;

    for record in records {
        let key = record.key();
        match slots.get(&key) {
            None => {
                slots.insert(key, kept.len());
                kept.push(record.clone());
            }
            Some(&slot) => {
                dropped += 1;
                let incumbent = &kept[slot];
                let wins = supersedes(record, incumbent);

                if record.unit != incumbent.unit {
                    let conflict = UnitConflict {
                        key,
                        stored_unit: incumbent.unit.clone(),
                        candidate_unit: record.unit.clone(),
                        resolution: if wins {
                            UnitResolution::TookNewer
                        } else {
                            UnitResolution::KeptStored
                        },
                    };
                    conflict.log();
                    unit_conflicts.push(conflict);
                }

                if wins {
                    kept[slot] = record.clone();
                }
            }
        }
    }

    Deduplicated {
        records: kept,
        dropped,
        unit_conflicts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Period, Ticker};
    use chrono::NaiveDate;

    fn record(metric: &str, value: f64, filed: (i32, u32, u32)) -> Record {
        Record {
            ticker: Ticker::new("AXON"),
            cik: "0001069183".to_string(),
            metric: metric.to_string(),
            source_tag: "Revenues".to_string(),
            value,
            fiscal_year: 2024,
            period: Period::FiscalYear,
            filing_date: NaiveDate::from_ymd_opt(filed.0, filed.1, filed.2).unwrap(),
            form_type: "10-K".to_string(),
            unit: "USD".to_string(),
        }
    }

    #[test]
    fn test_latest_filing_wins() {
        let records = vec![
            record("Revenue", 105.0, (2024, 6, 1)),
            record("Revenue", 100.0, (2024, 3, 1)),
        ];
        let result = deduplicate(&records);

        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].value, 105.0);
        assert_eq!(result.dropped, 1);
    }

    #[test]
    fn test_tie_keeps_last_in_input_order() {
        let records = vec![
            record("Revenue", 100.0, (2024, 3, 1)),
            record("Revenue", 101.0, (2024, 3, 1)),
            record("Revenue", 102.0, (2024, 3, 1)),
        ];
        let result = deduplicate(&records);

        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].value, 102.0);
    }

    #[test]
    fn test_distinct_keys_are_kept_in_order() {
        let records = vec![
            record("Revenue", 100.0, (2024, 3, 1)),
            record("Net Income", 10.0, (2024, 3, 1)),
        ];
        let result = deduplicate(&records);

        assert_eq!(result.records, records);
        assert_eq!(result.dropped, 0);
    }

    #[test]
    fn test_idempotent() {
        let records = vec![
            record("Revenue", 100.0, (2024, 3, 1)),
            record("Net Income", 10.0, (2024, 3, 1)),
            record("Revenue", 105.0, (2024, 6, 1)),
        ];
        let once = deduplicate(&records);
        let twice = deduplicate(&once.records);

        assert_eq!(once.records, twice.records);
        assert_eq!(twice.dropped, 0);
        // Input is untouched.
        assert_eq!(records.len(), 3);
    }

    #[test]
    fn test_unit_conflict_prefers_newer_filing() {
        let mut older = record("Revenue", 100.0, (2024, 3, 1));
        older.unit = "EUR".to_string();
        let newer = record("Revenue", 110.0, (2024, 6, 1));

        let result = deduplicate(&[older, newer]);
        assert_eq!(result.records[0].unit, "USD");
        assert_eq!(result.unit_conflicts.len(), 1);
        assert_eq!(
            result.unit_conflicts[0].resolution,
            UnitResolution::TookNewer
        );
        assert_eq!(result.unit_conflicts[0].stored_unit, "EUR");
    }

    #[test]
    fn test_unit_conflict_keeps_newer_when_older_arrives_last() {
        let newer = record("Revenue", 110.0, (2024, 6, 1));
        let mut older = record("Revenue", 100.0, (2024, 3, 1));
        older.unit = "EUR".to_string();

        let result = deduplicate(&[newer, older]);
        assert_eq!(result.records[0].unit, "USD");
        assert_eq!(
            result.unit_conflicts[0].resolution,
            UnitResolution::KeptStored
        );
    }
}
