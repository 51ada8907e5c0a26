//! Upsert merging of candidate records into the stored long table.

use serde::Serialize;
use tracing::{debug, info};

use crate::dedup::{UnitConflict, UnitResolution, deduplicate};
use crate::error::{FundamentalsError, Result};
use crate::table::LongTable;
use crate::types::{Record, RecordKey};

/// How a candidate key was reconciled against the base table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    /// Key absent from the base table.
    Insert,
    /// Key present with an older filing date; the candidate replaced it.
    Update,
    /// Key present and the stored filing date is the same as or newer than
    /// the candidate's; left untouched.
    Skip,
}

/// The reconciliation of one candidate key.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct KeyOutcome {
    /// The candidate key.
    pub key: RecordKey,
    /// What happened to it.
    pub classification: Classification,
    /// The candidate record.
    pub candidate: Record,
    /// The base record under the same key, if there was one.
    pub previous: Option<Record>,
}

/// Result of merging a candidate batch into a base table.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MergeOutcome {
    /// The merged table `B'`.
    pub table: LongTable,
    /// One outcome per distinct candidate key, in candidate order.
    pub outcomes: Vec<KeyOutcome>,
    /// Unit disagreements between candidates or against the base.
    pub unit_conflicts: Vec<UnitConflict>,
    /// Candidates dropped because a later candidate shared their key.
    pub duplicate_candidates: usize,
}

impl MergeOutcome {
    /// Number of keys classified as `classification`.
    #[must_use]
    pub fn count(&self, classification: Classification) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.classification == classification)
            .count()
    }

    /// Returns true if the merge inserted or updated anything.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.outcomes
            .iter()
            .any(|o| o.classification != Classification::Skip)
    }
}

/// Classifies one candidate against the base table.
fn classify(base: &LongTable, candidate: &Record) -> (Classification, Option<Record>) {
    match base.get(&candidate.key()) {
        None => (Classification::Insert, None),
        Some(stored) if candidate.filing_date > stored.filing_date => {
            (Classification::Update, Some(stored.clone()))
        }
        Some(stored) => (Classification::Skip, Some(stored.clone())),
    }
}

/// Merges a candidate batch into a base table.
///
/// Candidates are deduplicated first (latest filing wins, ties go to the
/// later candidate). Every remaining key is then classified:
///
/// - **insert** when absent from `base`
/// - **update** when present with a strictly older filing date
/// - **skip** otherwise
///
/// The returned table is `base` with inserted and updated keys replaced by
/// the candidates. `base` itself is never modified, so a failure leaves no
/// partially merged state behind. Merging the same batch into the result a
/// second time classifies every key as skip and returns an identical table.
///
/// # Errors
/// Returns [`FundamentalsError::Invariant`] if the merged table does not
/// account for exactly the base keys plus the inserted ones.
pub fn merge(base: &LongTable, candidates: &[Record]) -> Result<MergeOutcome> {
    if candidates.is_empty() {
        debug!("Empty candidate batch; base table unchanged");
        return Ok(MergeOutcome {
            table: base.clone(),
            ..MergeOutcome::default()
        });
    }

    let deduped = deduplicate(candidates);
    let mut unit_conflicts = deduped.unit_conflicts;

    let mut outcomes = Vec::with_capacity(deduped.records.len());
    for candidate in deduped.records {
        let (classification, previous) = classify(base, &candidate);

        if let Some(stored) = previous.as_ref().filter(|s| s.unit != candidate.unit) {
            let conflict = UnitConflict {
                key: candidate.key(),
                stored_unit: stored.unit.clone(),
                candidate_unit: candidate.unit.clone(),
                resolution: if classification == Classification::Update {
                    UnitResolution::TookNewer
                } else {
                    UnitResolution::KeptStored
                },
            };
            conflict.log();
            unit_conflicts.push(conflict);
        }

        outcomes.push(KeyOutcome {
            key: candidate.key(),
            classification,
            candidate,
            previous,
        });
    }

    // Nothing below runs until every candidate is classified.
    let mut table = base.clone();
    let mut inserted = 0usize;
    for outcome in &outcomes {
        match outcome.classification {
            Classification::Insert => {
                inserted += 1;
                table.upsert(outcome.candidate.clone());
            }
            Classification::Update => {
                table.upsert(outcome.candidate.clone());
            }
            Classification::Skip => {}
        }
    }

    if table.len() != base.len() + inserted {
        return Err(FundamentalsError::Invariant(format!(
            "merged table has {} keys, expected {} base + {} inserted",
            table.len(),
            base.len(),
            inserted
        )));
    }

    let outcome = MergeOutcome {
        table,
        outcomes,
        unit_conflicts,
        duplicate_candidates: deduped.dropped,
    };
    info!(
        inserted = outcome.count(Classification::Insert),
        updated = outcome.count(Classification::Update),
        skipped = outcome.count(Classification::Skip),
        "Merged candidate batch"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Period, Ticker};
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn record(ticker: &str, metric: &str, value: f64, filed: (i32, u32, u32)) -> Record {
        Record {
            ticker: Ticker::new(ticker),
            cik: String::new(),
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

    fn base() -> LongTable {
        LongTable::from_records(vec![record("AXON", "Revenue", 100.0, (2024, 3, 1))])
    }

    #[test]
    fn test_insert_into_empty_base() {
        let candidate = record("AXON", "Revenue", 100.0, (2024, 3, 1));
        let outcome = merge(&LongTable::new(), std::slice::from_ref(&candidate)).unwrap();

        assert_eq!(outcome.count(Classification::Insert), 1);
        assert_eq!(outcome.table.len(), 1);
        assert_eq!(outcome.table.get(&candidate.key()), Some(&candidate));
    }

    #[test]
    fn test_newer_filing_updates() {
        let candidate = record("AXON", "Revenue", 105.0, (2024, 6, 1));
        let outcome = merge(&base(), std::slice::from_ref(&candidate)).unwrap();

        assert_eq!(outcome.outcomes[0].classification, Classification::Update);
        assert_eq!(
            outcome.outcomes[0].previous.as_ref().map(|r| r.value),
            Some(100.0)
        );
        let stored = outcome.table.get(&candidate.key()).unwrap();
        assert_eq!(stored.value, 105.0);
        assert_eq!(stored.filing_date, NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
    }

    #[test]
    fn test_older_or_same_filing_skips() {
        let older = record("AXON", "Revenue", 99.0, (2024, 1, 1));
        let same = record("AXON", "Revenue", 101.0, (2024, 3, 1));

        for candidate in [older, same] {
            let outcome = merge(&base(), &[candidate]).unwrap();
            assert_eq!(outcome.outcomes[0].classification, Classification::Skip);
            assert_eq!(outcome.table, base());
            assert!(!outcome.changed());
        }
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let outcome = merge(&base(), &[]).unwrap();
        assert_eq!(outcome.table, base());
        assert!(outcome.outcomes.is_empty());
    }

    #[test]
    fn test_idempotent() {
        let batch = vec![
            record("AXON", "Revenue", 105.0, (2024, 6, 1)),
            record("AXON", "Net Income", 12.0, (2024, 6, 1)),
            record("BA", "Revenue", 70.0, (2024, 2, 1)),
        ];
        let first = merge(&base(), &batch).unwrap();
        let second = merge(&first.table, &batch).unwrap();

        assert_eq!(first.table, second.table);
        assert_eq!(second.count(Classification::Skip), batch.len());
        assert!(!second.changed());
    }

    #[test]
    fn test_filing_dates_never_regress() {
        let batch = vec![
            record("AXON", "Revenue", 90.0, (2023, 1, 1)),
            record("AXON", "Revenue", 95.0, (2023, 6, 1)),
        ];
        let before = base();
        let after = merge(&before, &batch).unwrap().table;

        for stored in before.iter() {
            let merged = after.get(&stored.key()).unwrap();
            assert!(merged.filing_date >= stored.filing_date);
        }
    }

    #[test]
    fn test_each_candidate_key_classified_once() {
        let batch = vec![
            record("AXON", "Revenue", 103.0, (2024, 5, 1)),
            record("AXON", "Revenue", 105.0, (2024, 6, 1)),
            record("GE", "Revenue", 1.0, (2024, 6, 1)),
        ];
        let outcome = merge(&base(), &batch).unwrap();

        assert_eq!(outcome.outcomes.len(), 2);
        assert_eq!(outcome.duplicate_candidates, 1);
        assert_eq!(outcome.count(Classification::Update), 1);
        assert_eq!(outcome.count(Classification::Insert), 1);
        assert_eq!(
            outcome
                .table
                .get(&batch[1].key())
                .map(|r| r.value),
            Some(105.0)
        );
    }

    #[test]
    fn test_unit_conflict_against_base() {
        let mut candidate = record("AXON", "Revenue", 105.0, (2024, 6, 1));
        candidate.unit = "EUR".to_string();
        let outcome = merge(&base(), &[candidate]).unwrap();

        assert_eq!(outcome.unit_conflicts.len(), 1);
        assert_eq!(
            outcome.unit_conflicts[0].resolution,
            UnitResolution::TookNewer
        );
        assert_eq!(outcome.table.iter().next().unwrap().unit, "EUR");
    }

    #[test]
    fn test_unit_conflict_on_skip_keeps_stored() {
        let mut stale = record("AXON", "Revenue", 99.0, (2024, 1, 1));
        stale.unit = "EUR".to_string();
        let same_unit = record("AXON", "Revenue", 98.0, (2024, 1, 1));

        let outcome = merge(&base(), &[stale]).unwrap();
        assert_eq!(outcome.unit_conflicts.len(), 1);
        assert_eq!(
            outcome.unit_conflicts[0].resolution,
            UnitResolution::KeptStored
        );
        assert_eq!(outcome.table, base());

        let outcome = merge(&base(), &[same_unit]).unwrap();
        assert!(outcome.unit_conflicts.is_empty());
    }
}
