//! The full reconciliation pipeline for one candidate batch.

use tracing::{debug, info, instrument};

use crate::config::ReconcileConfig;
use crate::error::{FundamentalsError, Result};
use crate::keys::{KeyBuilder, Rejected};
use crate::merge::{MergeOutcome, merge};
use crate::report::ChangeReport;
use crate::table::LongTable;
use crate::types::RawRecord;
use crate::wide::{WideTable, project};
use crate::window::FetchWindow;

/// Everything one reconciliation run produces.
#[derive(Clone, Debug)]
pub struct Reconciliation {
    /// The merged long table.
    pub table: LongTable,
    /// The wide projection of [`Reconciliation::table`].
    pub wide: WideTable,
    /// What changed.
    pub report: ChangeReport,
    /// Candidates that could not be normalized.
    pub rejected: Vec<Rejected>,
    /// Candidates dropped by the fetch window.
    pub filtered_by_window: usize,
}

impl Reconciliation {
    /// Returns true if the long table differs from the base.
    #[must_use]
    pub const fn changed(&self) -> bool {
        !self.report.is_unchanged()
    }
}

/// Checks that the merged table keeps every base key and never moves a
/// filing date backwards.
fn verify(base: &LongTable, outcome: &MergeOutcome) -> Result<()> {
    for stored in base {
        let key = stored.key();
        let merged = outcome.table.get(&key).ok_or_else(|| {
            FundamentalsError::Invariant(format!("key {key} lost during merge"))
        })?;
        if merged.filing_date < stored.filing_date {
            return Err(FundamentalsError::Invariant(format!(
                "filing date of {key} regressed from {} to {}",
                stored.filing_date, merged.filing_date
            )));
        }
    }
    Ok(())
}

/// Reconciles a raw candidate batch against the stored long table.
///
/// Runs key building, the fetch-window filter, deduplication and the upsert
/// merge, then projects the wide table and summarizes the changes. `base`
/// is left untouched; the new table is only returned once every step has
/// succeeded.
///
/// # Errors
/// Returns [`FundamentalsError::Invariant`] if the merge breaks the
/// key-uniqueness or monotonic filing-date guarantees. Malformed candidates
/// are not errors; they are returned in [`Reconciliation::rejected`].
#[instrument(skip_all, fields(base = base.len(), candidates = candidates.len()))]
pub fn reconcile(
    config: &ReconcileConfig,
    base: &LongTable,
    candidates: Vec<RawRecord>,
) -> Result<Reconciliation> {
    let keys = KeyBuilder::with_roster(&config.roster);
    let (records, rejected) = keys.build_all(candidates);

    let window = FetchWindow::from_table(base).with_fiscal_years(config.fiscal_years);
    let (records, filtered_by_window) = window.filter(records);
    debug!(
        accepted = records.len(),
        rejected = rejected.len(),
        filtered_by_window,
        "Prepared candidate batch"
    );

    let outcome = merge(base, &records)?;
    verify(base, &outcome)?;

    let wide = project(&outcome.table, &config.catalog);
    let report = ChangeReport::from_merge(&outcome);
    info!(
        records = outcome.table.len(),
        wide_rows = wide.len(),
        changes = %report.totals,
        "Reconciled candidate batch"
    );

    Ok(Reconciliation {
        table: outcome.table,
        wide,
        report,
        rejected,
        filtered_by_window,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FiscalYearWindow;
    use crate::types::RawFiscalYear;

    fn raw(ticker: &str, fy: RawFiscalYear, value: f64, filed: &str) -> RawRecord {
        RawRecord {
            ticker: ticker.to_string(),
            cik: String::new(),
            metric: "Revenue".to_string(),
            source_tag: "Revenues".to_string(),
            value: Some(value),
            fiscal_year: Some(fy),
            period: Some("FY".to_string()),
            filing_date: Some(filed.to_string()),
            form_type: "10-K".to_string(),
            unit: "USD".to_string(),
        }
    }

    #[test]
    fn test_first_run_inserts() {
        let config = ReconcileConfig::default();
        let result = reconcile(
            &config,
            &LongTable::new(),
            vec![raw("AXON", RawFiscalYear::Integer(2024), 100.0, "2024-03-01")],
        )
        .unwrap();

        assert_eq!(result.report.totals.inserted, 1);
        assert_eq!(result.table.len(), 1);
        assert_eq!(result.wide.len(), 1);
        // CIK filled in from the default roster.
        assert_eq!(result.table.iter().next().unwrap().cik, "0001069183");
    }

    #[test]
    fn test_window_filters_stale_candidates() {
        let config = ReconcileConfig::default();
        let first = reconcile(
            &config,
            &LongTable::new(),
            vec![raw("AXON", RawFiscalYear::Integer(2024), 100.0, "2024-03-01")],
        )
        .unwrap();

        let second = reconcile(
            &config,
            &first.table,
            vec![
                raw("AXON", RawFiscalYear::Float(2024.0), 100.0, "2024-03-01"),
                raw("AXON", RawFiscalYear::Text("2025".into()), 110.0, "2025-03-01"),
            ],
        )
        .unwrap();

        assert_eq!(second.filtered_by_window, 1);
        assert_eq!(second.report.totals.inserted, 1);
        assert_eq!(second.table.len(), 2);
    }

    #[test]
    fn test_malformed_candidates_are_reported_not_fatal() {
        let result = reconcile(
            &ReconcileConfig::default(),
            &LongTable::new(),
            vec![
                raw("AXON", RawFiscalYear::Float(2024.5), 1.0, "2024-03-01"),
                raw("", RawFiscalYear::Integer(2024), 1.0, "2024-03-01"),
                raw("BA", RawFiscalYear::Integer(2024), 1.0, "2024-03-01"),
            ],
        )
        .unwrap();

        assert_eq!(result.rejected.len(), 2);
        assert_eq!(result.table.len(), 1);
    }

    #[test]
    fn test_fiscal_year_cutoff() {
        let config = ReconcileConfig::default().with_fiscal_years(FiscalYearWindow {
            min: Some(2020),
            max: None,
        });
        let result = reconcile(
            &config,
            &LongTable::new(),
            vec![
                raw("AXON", RawFiscalYear::Integer(2019), 1.0, "2019-03-01"),
                raw("AXON", RawFiscalYear::Integer(2020), 1.0, "2020-03-01"),
            ],
        )
        .unwrap();

        assert_eq!(result.filtered_by_window, 1);
        assert_eq!(result.table.len(), 1);
    }

    #[test]
    fn test_empty_batch_keeps_base() {
        let config = ReconcileConfig::default();
        let base = reconcile(
            &config,
            &LongTable::new(),
            vec![raw("AXON", RawFiscalYear::Integer(2024), 100.0, "2024-03-01")],
        )
        .unwrap()
        .table;

        let result = reconcile(&config, &base, Vec::new()).unwrap();
        assert_eq!(result.table, base);
        assert!(!result.changed());
        assert_eq!(result.wide.len(), 1);
    }
}
