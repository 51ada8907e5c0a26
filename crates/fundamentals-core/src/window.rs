//! Fetch-window planning: per-ticker filing-date cursors.
//!
//! The window is advisory. It cuts down what has to be fetched and
//! considered, but the [`merge`](crate::merge) step remains the authority on
//! duplicates.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

use crate::config::{Entity, FiscalYearWindow, Roster};
use crate::table::LongTable;
use crate::types::{Record, Ticker};

/// Fetch bounds for one entity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EntityWindow {
    /// The entity to fetch.
    pub ticker: Ticker,
    /// Known CIK, if any.
    pub cik: Option<String>,
    /// Latest filing date already stored; only later filings are new.
    pub since: Option<NaiveDate>,
    /// Fiscal-year cutoff.
    pub fiscal_years: FiscalYearWindow,
}

impl EntityWindow {
    /// Returns true if a filing with this date and fiscal year is worth
    /// fetching.
    #[must_use]
    pub fn admits(&self, filing_date: NaiveDate, fiscal_year: Option<i32>) -> bool {
        let after_cursor = self.since.is_none_or(|since| filing_date > since);
        let in_window = fiscal_year.is_none_or(|fy| self.fiscal_years.contains(fy));
        after_cursor && in_window
    }
}

/// Per-ticker cursors derived from the stored long table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FetchWindow {
    cursors: BTreeMap<Ticker, NaiveDate>,
    fiscal_years: FiscalYearWindow,
}

impl FetchWindow {
    /// Computes the maximum filing date per ticker in the table.
    #[must_use]
    pub fn from_table(table: &LongTable) -> Self {
        let mut cursors: BTreeMap<Ticker, NaiveDate> = BTreeMap::new();
        for record in table {
            cursors
                .entry(record.ticker.clone())
                .and_modify(|d| *d = (*d).max(record.filing_date))
                .or_insert(record.filing_date);
        }
        debug!(tickers = cursors.len(), "Computed filing-date cursors");
        Self {
            cursors,
            fiscal_years: FiscalYearWindow::UNBOUNDED,
        }
    }

    /// Sets the fiscal-year cutoff applied alongside the cursors.
    #[must_use]
    pub const fn with_fiscal_years(mut self, fiscal_years: FiscalYearWindow) -> Self {
        self.fiscal_years = fiscal_years;
        self
    }

    /// Returns the cursor of a ticker, if it has stored filings.
    #[must_use]
    pub fn cursor(&self, ticker: &Ticker) -> Option<NaiveDate> {
        self.cursors.get(ticker).copied()
    }

    /// Returns all cursors in ticker order.
    #[must_use]
    pub const fn cursors(&self) -> &BTreeMap<Ticker, NaiveDate> {
        &self.cursors
    }

    /// Returns true if the candidate is newer than its ticker's cursor and
    /// inside the fiscal-year cutoff.
    ///
    /// Unseen tickers pass the cursor test unconditionally. Both bounds must
    /// pass independently.
    #[must_use]
    pub fn accepts(&self, record: &Record) -> bool {
        let after_cursor = self
            .cursor(&record.ticker)
            .is_none_or(|cursor| record.filing_date > cursor);
        after_cursor && self.fiscal_years.contains(record.fiscal_year)
    }

    /// Keeps the accepted candidates, preserving order.
    ///
    /// Returns the kept records and the number filtered out.
    #[must_use]
    pub fn filter(&self, candidates: Vec<Record>) -> (Vec<Record>, usize) {
        let before = candidates.len();
        let kept: Vec<Record> = candidates.into_iter().filter(|r| self.accepts(r)).collect();
        let filtered = before - kept.len();
        debug!(before, after = kept.len(), filtered, "Applied fetch window");
        (kept, filtered)
    }

    /// Plans one fetch window per roster entity, in roster order.
    #[must_use]
    pub fn plan(&self, roster: &Roster) -> Vec<EntityWindow> {
        roster
            .entities()
            .iter()
            .map(|Entity { ticker, cik }| EntityWindow {
                ticker: ticker.clone(),
                cik: cik.clone(),
                since: self.cursor(ticker),
                fiscal_years: self.fiscal_years,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Period;

    fn record(ticker: &str, fiscal_year: i32, filed: (i32, u32, u32)) -> Record {
        Record {
            ticker: Ticker::new(ticker),
            cik: String::new(),
            metric: "Revenue".to_string(),
            source_tag: "Revenues".to_string(),
            value: 1.0,
            fiscal_year,
            period: Period::FiscalYear,
            filing_date: NaiveDate::from_ymd_opt(filed.0, filed.1, filed.2).unwrap(),
            form_type: "10-K".to_string(),
            unit: "USD".to_string(),
        }
    }

    fn table() -> LongTable {
        LongTable::from_records(vec![
            record("AXON", 2023, (2023, 3, 1)),
            record("AXON", 2024, (2024, 3, 1)),
            record("BA", 2024, (2024, 2, 1)),
        ])
    }

    #[test]
    fn test_cursor_is_max_filing_date() {
        let window = FetchWindow::from_table(&table());
        assert_eq!(
            window.cursor(&Ticker::new("AXON")),
            NaiveDate::from_ymd_opt(2024, 3, 1)
        );
        assert_eq!(window.cursors().len(), 2);
    }

    #[test]
    fn test_accepts_strictly_newer_only() {
        let window = FetchWindow::from_table(&table());

        assert!(window.accepts(&record("AXON", 2024, (2024, 3, 2))));
        assert!(!window.accepts(&record("AXON", 2024, (2024, 3, 1))));
        assert!(!window.accepts(&record("AXON", 2022, (2022, 3, 1))));
        // Unseen ticker accepts everything.
        assert!(window.accepts(&record("GE", 1999, (1999, 1, 1))));
    }

    #[test]
    fn test_fiscal_year_cutoff_is_independent() {
        let window = FetchWindow::from_table(&table()).with_fiscal_years(FiscalYearWindow {
            min: None,
            max: Some(2024),
        });

        // Passes the cursor, fails the cutoff.
        assert!(!window.accepts(&record("AXON", 2025, (2025, 3, 1))));
        // Passes the cutoff, fails the cursor.
        assert!(!window.accepts(&record("AXON", 2024, (2024, 1, 1))));
        assert!(window.accepts(&record("AXON", 2024, (2024, 6, 1))));
        assert!(!window.accepts(&record("GE", 2025, (2025, 1, 1))));
    }

    #[test]
    fn test_filter_counts() {
        let window = FetchWindow::from_table(&table());
        let (kept, filtered) = window.filter(vec![
            record("AXON", 2024, (2024, 1, 1)),
            record("AXON", 2025, (2025, 3, 1)),
            record("BA", 2025, (2025, 2, 1)),
        ]);
        assert_eq!(kept.len(), 2);
        assert_eq!(filtered, 1);
    }

    #[test]
    fn test_plan_follows_roster() {
        let roster = Roster::new(vec![
            Entity::new("BA", "0000012927"),
            Entity::new("GE", "0000040545"),
        ]);
        let plan = FetchWindow::from_table(&table()).plan(&roster);

        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].ticker.as_str(), "BA");
        assert_eq!(plan[0].since, NaiveDate::from_ymd_opt(2024, 2, 1));
        assert_eq!(plan[1].since, None);

        let d = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        assert!(!plan[0].admits(d, Some(2024)));
        assert!(plan[1].admits(d, None));
    }
}
