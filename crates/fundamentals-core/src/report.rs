//! Change reporting over a merge result.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::info;

use crate::dedup::UnitConflict;
use crate::merge::{Classification, MergeOutcome};
use crate::types::{Period, Record, Ticker};

/// Insert/update/skip tallies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ChangeCounts {
    /// Keys inserted.
    pub inserted: usize,
    /// Keys updated.
    pub updated: usize,
    /// Keys skipped.
    pub skipped: usize,
}

impl ChangeCounts {
    fn add(&mut self, classification: Classification) {
        match classification {
            Classification::Insert => self.inserted += 1,
            Classification::Update => self.updated += 1,
            Classification::Skip => self.skipped += 1,
        }
    }

    /// Inserted plus updated.
    #[must_use]
    pub const fn changed(&self) -> usize {
        self.inserted + self.updated
    }

    /// All classified keys.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.inserted + self.updated + self.skipped
    }
}

impl fmt::Display for ChangeCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} inserted, {} updated, {} skipped",
            self.inserted, self.updated, self.skipped
        )
    }
}

/// An inserted or updated record kept for audit.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChangedRecord {
    /// Insert or update.
    pub classification: Classification,
    /// The record now stored.
    pub record: Record,
    /// Value it replaced, for updates.
    pub previous_value: Option<f64>,
    /// Filing date it replaced, for updates.
    pub previous_filing_date: Option<NaiveDate>,
}

/// A filing that contributed at least one inserted or updated record.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct FilingRef {
    /// Entity identifier.
    pub ticker: Ticker,
    /// Fiscal year.
    pub fiscal_year: i32,
    /// Reporting period.
    pub period: Period,
    /// Filing date.
    pub filing_date: NaiveDate,
    /// Disclosure form identifier.
    pub form_type: String,
}

/// Summary of one merge, for display or logging.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ChangeReport {
    /// Overall tallies.
    pub totals: ChangeCounts,
    /// Tallies per ticker.
    pub by_ticker: BTreeMap<Ticker, ChangeCounts>,
    /// Tallies per metric.
    pub by_metric: BTreeMap<String, ChangeCounts>,
    /// Tallies per fiscal year.
    pub by_fiscal_year: BTreeMap<i32, ChangeCounts>,
    /// Inserted and updated records, in key order.
    pub changes: Vec<ChangedRecord>,
    /// Distinct filings behind the changes.
    pub filings: Vec<FilingRef>,
    /// Unit conflicts met during the merge.
    pub unit_conflicts: Vec<UnitConflict>,
}

impl ChangeReport {
    /// Summarizes a merge outcome. Read-only over `outcome`.
    #[must_use]
    pub fn from_merge(outcome: &MergeOutcome) -> Self {
        let mut report = Self {
            unit_conflicts: outcome.unit_conflicts.clone(),
            ..Self::default()
        };
        let mut filings = BTreeSet::new();

        for key_outcome in &outcome.outcomes {
            let classification = key_outcome.classification;
            let candidate = &key_outcome.candidate;

            report.totals.add(classification);
            report
                .by_ticker
                .entry(candidate.ticker.clone())
                .or_default()
                .add(classification);
            report
                .by_metric
                .entry(candidate.metric.clone())
                .or_default()
                .add(classification);
            report
                .by_fiscal_year
                .entry(candidate.fiscal_year)
                .or_default()
                .add(classification);

            if classification == Classification::Skip {
                continue;
            }

            filings.insert(FilingRef {
                ticker: candidate.ticker.clone(),
                fiscal_year: candidate.fiscal_year,
                period: candidate.period,
                filing_date: candidate.filing_date,
                form_type: candidate.form_type.clone(),
            });
            report.changes.push(ChangedRecord {
                classification,
                record: candidate.clone(),
                previous_value: key_outcome.previous.as_ref().map(|r| r.value),
                previous_filing_date: key_outcome.previous.as_ref().map(|r| r.filing_date),
            });
        }

        report.changes.sort_by(|a, b| a.record.key().cmp(&b.record.key()));
        report.filings = filings.into_iter().collect();
        report
    }

    /// Returns true if nothing was inserted or updated.
    #[must_use]
    pub const fn is_unchanged(&self) -> bool {
        self.totals.changed() == 0
    }

    /// Writes the report to the log at info level.
    pub fn log(&self) {
        info!(
            inserted = self.totals.inserted,
            updated = self.totals.updated,
            skipped = self.totals.skipped,
            filings = self.filings.len(),
            unit_conflicts = self.unit_conflicts.len(),
            "Change report"
        );
        for (ticker, counts) in &self.by_ticker {
            if counts.changed() > 0 {
                info!(%ticker, %counts, "Changes by ticker");
            }
        }
        for (fiscal_year, counts) in &self.by_fiscal_year {
            if counts.changed() > 0 {
                info!(fiscal_year, %counts, "Changes by fiscal year");
            }
        }
        for filing in &self.filings {
            info!(
                ticker = %filing.ticker,
                fiscal_year = filing.fiscal_year,
                period = %filing.period,
                filing_date = %filing.filing_date,
                form = %filing.form_type,
                "New filing"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::merge;
    use crate::table::LongTable;
    use pretty_assertions::assert_eq;

    fn record(ticker: &str, metric: &str, fiscal_year: i32, value: f64, filed: u32) -> Record {
        Record {
            ticker: Ticker::new(ticker),
            cik: String::new(),
            metric: metric.to_string(),
            source_tag: String::new(),
            value,
            fiscal_year,
            period: Period::FiscalYear,
            filing_date: NaiveDate::from_ymd_opt(2024, filed, 1).unwrap(),
            form_type: "10-K".to_string(),
            unit: "USD".to_string(),
        }
    }

    fn report() -> ChangeReport {
        let base = LongTable::from_records(vec![
            record("AXON", "Revenue", 2024, 100.0, 3),
            record("AXON", "Net Income", 2024, 10.0, 3),
        ]);
        let outcome = merge(
            &base,
            &[
                record("AXON", "Revenue", 2024, 105.0, 6),
                record("AXON", "Net Income", 2024, 10.0, 3),
                record("BA", "Revenue", 2023, 70.0, 2),
            ],
        )
        .unwrap();
        ChangeReport::from_merge(&outcome)
    }

    #[test]
    fn test_totals() {
        let report = report();
        assert_eq!(
            report.totals,
            ChangeCounts {
                inserted: 1,
                updated: 1,
                skipped: 1
            }
        );
        assert!(!report.is_unchanged());
    }

    #[test]
    fn test_grouped_breakdowns() {
        let report = report();

        assert_eq!(report.by_ticker[&Ticker::new("AXON")].updated, 1);
        assert_eq!(report.by_ticker[&Ticker::new("AXON")].skipped, 1);
        assert_eq!(report.by_ticker[&Ticker::new("BA")].inserted, 1);
        assert_eq!(report.by_metric["Revenue"].changed(), 2);
        assert_eq!(report.by_fiscal_year[&2023].inserted, 1);
        assert_eq!(report.by_fiscal_year[&2024].total(), 2);
    }

    #[test]
    fn test_changes_and_filings() {
        let report = report();

        assert_eq!(report.changes.len(), 2);
        let update = report
            .changes
            .iter()
            .find(|c| c.classification == Classification::Update)
            .unwrap();
        assert_eq!(update.record.value, 105.0);
        assert_eq!(update.previous_value, Some(100.0));

        assert_eq!(report.filings.len(), 2);
        assert_eq!(report.filings[0].ticker.as_str(), "AXON");
    }

    #[test]
    fn test_empty_merge_is_unchanged() {
        let outcome = merge(&LongTable::new(), &[]).unwrap();
        let report = ChangeReport::from_merge(&outcome);
        assert!(report.is_unchanged());
        assert_eq!(report.totals.total(), 0);
    }

    #[test]
    fn test_serializes_to_json() {
        let json = serde_json::to_value(report()).unwrap();
        assert_eq!(json["totals"]["inserted"], 1);
        assert_eq!(json["changes"][0]["classification"], "update");
    }
}
