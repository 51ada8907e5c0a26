//! Wide projection: one row per [`GroupKey`], one column per metric.

use polars::prelude::{Column, DataFrame};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::config::MetricCatalog;
use crate::error::{FundamentalsError, Result};
use crate::table::LongTable;
use crate::types::{GroupKey, Period, Ticker};

/// Leading columns of the wide table, before the metric columns.
pub const WIDE_KEY_COLUMNS: [&str; 3] = ["Ticker", "Fiscal Year", "Period"];

/// One row of the wide table.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct WideRow {
    /// Entity identifier.
    pub ticker: Ticker,
    /// Fiscal year.
    pub fiscal_year: i32,
    /// Reporting period.
    pub period: Period,
    /// One slot per [`WideTable::metrics`] entry; `None` means not reported.
    pub values: Vec<Option<f64>>,
}

impl WideRow {
    /// Returns the group key of this row.
    #[must_use]
    pub fn group_key(&self) -> GroupKey {
        GroupKey {
            ticker: self.ticker.clone(),
            fiscal_year: self.fiscal_year,
            period: self.period,
        }
    }
}

/// Wide-format view of a [`LongTable`].
///
/// Derived and disposable: it is regenerated from the long table on every
/// run and never read back.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct WideTable {
    /// Metric columns in canonical order.
    pub metrics: Vec<String>,
    /// Rows sorted by ticker, fiscal year and period.
    pub rows: Vec<WideRow>,
}

impl WideTable {
    /// Returns the number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the full column header: key columns, then metrics.
    #[must_use]
    pub fn header(&self) -> Vec<String> {
        WIDE_KEY_COLUMNS
            .iter()
            .map(|c| (*c).to_string())
            .chain(self.metrics.iter().cloned())
            .collect()
    }

    /// Looks up one cell.
    #[must_use]
    pub fn value(&self, group: &GroupKey, metric: &str) -> Option<f64> {
        let column = self.metrics.iter().position(|m| m == metric)?;
        self.rows
            .iter()
            .find(|row| row.group_key() == *group)
            .and_then(|row| row.values.get(column).copied().flatten())
    }

    /// Returns the table as a DataFrame, empty cells as nulls.
    ///
    /// # Errors
    /// Returns [`FundamentalsError::Frame`] if the DataFrame cannot be built.
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let mut columns = Vec::with_capacity(WIDE_KEY_COLUMNS.len() + self.metrics.len());
        columns.push(Column::new(
            "Ticker".into(),
            self.rows
                .iter()
                .map(|r| r.ticker.to_string())
                .collect::<Vec<_>>(),
        ));
        columns.push(Column::new(
            "Fiscal Year".into(),
            self.rows.iter().map(|r| r.fiscal_year).collect::<Vec<i32>>(),
        ));
        columns.push(Column::new(
            "Period".into(),
            self.rows
                .iter()
                .map(|r| r.period.to_string())
                .collect::<Vec<_>>(),
        ));
        for (i, metric) in self.metrics.iter().enumerate() {
            columns.push(Column::new(
                metric.as_str().into(),
                self.rows
                    .iter()
                    .map(|r| r.values.get(i).copied().flatten())
                    .collect::<Vec<Option<f64>>>(),
            ));
        }

        DataFrame::new(columns).map_err(|e| FundamentalsError::Frame(e.to_string()))
    }
}

/// Pivots a long table into its wide form.
///
/// Columns are limited to the metrics present in `table`, in catalog order
/// (uncataloged metrics last, alphabetically). Rows follow [`GroupKey`]
/// order. The result depends only on the table contents, so projecting an
/// unchanged table always yields an identical wide table.
#[must_use]
pub fn project(table: &LongTable, catalog: &MetricCatalog) -> WideTable {
    let present: BTreeSet<&str> = table.iter().map(|r| r.metric.as_str()).collect();
    let mut metrics: Vec<String> = present.into_iter().map(str::to_string).collect();
    catalog.sort_metrics(&mut metrics);

    let columns: BTreeMap<&str, usize> = metrics
        .iter()
        .enumerate()
        .map(|(i, m)| (m.as_str(), i))
        .collect();

    let mut groups: BTreeMap<GroupKey, Vec<Option<f64>>> = BTreeMap::new();
    for record in table {
        let slots = groups
            .entry(record.group_key())
            .or_insert_with(|| vec![None; metrics.len()]);
        if let Some(&column) = columns.get(record.metric.as_str()) {
            slots[column] = Some(record.value);
        }
    }

    let rows: Vec<WideRow> = groups
        .into_iter()
        .map(|(group, values)| WideRow {
            ticker: group.ticker,
            fiscal_year: group.fiscal_year,
            period: group.period,
            values,
        })
        .collect();

    debug!(rows = rows.len(), metrics = metrics.len(), "Projected wide table");
    WideTable { metrics, rows }
}
