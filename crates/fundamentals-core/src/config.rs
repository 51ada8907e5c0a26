//! Explicit configuration values for the reconciliation engine.
//!
//! Nothing here is global: a [`ReconcileConfig`] is built once by the caller
//! and passed to the [`KeyBuilder`](crate::KeyBuilder), the
//! [`FetchWindow`](crate::FetchWindow) planner and the wide projection.

use serde::{Deserialize, Serialize};

use crate::error::{FundamentalsError, Result};
use crate::types::Ticker;

/// Definition of one metric in the catalog.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricDef {
    /// Canonical metric name, used as the wide-table column header.
    pub name: String,
    /// Taxonomy tags this metric is derived from, in preference order.
    pub tags: Vec<String>,
    /// Units to prefer when a tag reports several unit series.
    #[serde(default)]
    pub preferred_units: Vec<String>,
}

impl MetricDef {
    /// Creates a metric derived from a single tag.
    #[must_use]
    pub fn new(name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: vec![tag.into()],
            preferred_units: Vec::new(),
        }
    }

    /// Sets the preferred units for this metric.
    #[must_use]
    pub fn with_preferred_units(mut self, units: &[&str]) -> Self {
        self.preferred_units = units.iter().map(|u| (*u).to_string()).collect();
        self
    }
}

/// Ordered catalog of metrics.
///
/// Catalog order is the canonical column order of the wide table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<MetricDef>", into = "Vec<MetricDef>")]
pub struct MetricCatalog {
    metrics: Vec<MetricDef>,
}

impl MetricCatalog {
    /// Creates a catalog from metric definitions.
    ///
    /// A metric name or tag that appears more than once keeps its first
    /// position; later repeats are dropped.
    #[must_use]
    pub fn new(metrics: Vec<MetricDef>) -> Self {
        let mut kept: Vec<MetricDef> = Vec::with_capacity(metrics.len());
        for def in metrics {
            let tag_taken = def
                .tags
                .iter()
                .any(|tag| kept.iter().any(|k| k.tags.contains(tag)));
            if tag_taken || kept.iter().any(|k| k.name == def.name) {
                continue;
            }
            kept.push(def);
        }
        Self { metrics: kept }
    }

    /// Returns the metric definitions in canonical order.
    #[must_use]
    pub fn metrics(&self) -> &[MetricDef] {
        &self.metrics
    }

    /// Returns the number of metrics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// Returns true if the catalog has no metrics.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Returns the canonical position of a metric, if it is cataloged.
    #[must_use]
    pub fn position(&self, metric: &str) -> Option<usize> {
        self.metrics.iter().position(|m| m.name == metric)
    }

    /// Returns the metric derived from a taxonomy tag.
    #[must_use]
    pub fn metric_for_tag(&self, tag: &str) -> Option<&MetricDef> {
        self.metrics.iter().find(|m| m.tags.iter().any(|t| t == tag))
    }

    /// Picks the unit series to read for a tag.
    ///
    /// Preferred units of the tag's metric win, then `USD`, then the first
    /// available unit in sorted order.
    #[must_use]
    pub fn pick_unit<'a, I>(&self, tag: &str, available: I) -> Option<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut available: Vec<&str> = available.into_iter().collect();
        available.sort_unstable();

        if let Some(def) = self.metric_for_tag(tag) {
            for preferred in &def.preferred_units {
                if available.contains(&preferred.as_str()) {
                    return Some(preferred.clone());
                }
            }
        }

        if available.contains(&"USD") {
            return Some("USD".to_string());
        }

        available.first().map(|u| (*u).to_string())
    }

    /// Sorts metric names into canonical order.
    ///
    /// Cataloged metrics come first in catalog order; uncataloged ones follow
    /// alphabetically.
    pub fn sort_metrics(&self, metrics: &mut [String]) {
        metrics.sort_by(|a, b| {
            let pa = self.position(a).unwrap_or(usize::MAX);
            let pb = self.position(b).unwrap_or(usize::MAX);
            pa.cmp(&pb).then_with(|| a.cmp(b))
        });
    }
}

impl From<Vec<MetricDef>> for MetricCatalog {
    fn from(metrics: Vec<MetricDef>) -> Self {
        Self::new(metrics)
    }
}

impl From<MetricCatalog> for Vec<MetricDef> {
    fn from(catalog: MetricCatalog) -> Self {
        catalog.metrics
    }
}

impl Default for MetricCatalog {
    /// US-GAAP catalog covering income statement, balance sheet, cash flow and
    /// per-share items.
    fn default() -> Self {
        Self::new(vec![
            // Income Statement
            MetricDef::new("Revenue", "Revenues"),
            MetricDef::new("Cost of Revenue", "CostOfRevenue"),
            MetricDef::new("Gross Profit", "GrossProfit"),
            MetricDef::new("Operating Expenses", "OperatingExpenses"),
            MetricDef::new("Operating Income", "OperatingIncomeLoss"),
            MetricDef::new("Nonoperating Income", "NonoperatingIncomeExpense"),
            MetricDef::new(
                "Income Before Taxes",
                "IncomeLossFromContinuingOperationsBeforeIncomeTaxes",
            ),
            MetricDef::new("Net Income", "NetIncomeLoss"),
            MetricDef::new("EBIT", "EBIT"),
            MetricDef::new("EBITDA", "EBITDA"),
            MetricDef::new(
                "Income from Continuing Ops",
                "IncomeLossFromContinuingOperations",
            ),
            // Balance Sheet
            MetricDef::new("Total Assets", "Assets"),
            MetricDef::new("Total Liabilities", "Liabilities"),
            MetricDef::new("Shareholder Equity", "StockholdersEquity"),
            MetricDef::new("Liabilities & Equity", "LiabilitiesAndStockholdersEquity"),
            MetricDef::new(
                "Cash & Cash Equivalents",
                "CashAndCashEquivalentsAtCarryingValue",
            ),
            MetricDef::new("Accounts Receivable", "AccountsReceivableNetCurrent"),
            MetricDef::new("Inventory", "InventoryNet"),
            MetricDef::new("Accounts Payable", "AccountsPayableCurrent"),
            MetricDef::new("Long Term Debt", "LongTermDebt"),
            MetricDef::new("Short Term Borrowings", "ShortTermBorrowings"),
            // Cash Flow
            MetricDef::new(
                "Cash From Operations",
                "NetCashProvidedByUsedInOperatingActivities",
            ),
            MetricDef::new(
                "Cash From Investing",
                "NetCashProvidedByUsedInInvestingActivities",
            ),
            MetricDef::new(
                "Cash From Financing",
                "NetCashProvidedByUsedInFinancingActivities",
            ),
            MetricDef::new(
                "Long Term Debt Changes",
                "PaymentsForProceedsFromLongTermDebt",
            ),
            MetricDef::new("Dividends Paid", "PaymentsOfDividends"),
            MetricDef::new("Share Buybacks", "RepurchaseOfCommonStock"),
            // Per Share
            MetricDef::new("EPS Basic", "EarningsPerShareBasic").with_preferred_units(&["USD/shares"]),
            MetricDef::new("EPS Diluted", "EarningsPerShareDiluted")
                .with_preferred_units(&["USD/shares"]),
            MetricDef::new("Shares Outstanding", "CommonStockSharesOutstanding")
                .with_preferred_units(&["shares", "pure"]),
            // Operating Metrics
            MetricDef::new("R&D Expense", "ResearchAndDevelopmentExpense"),
            MetricDef::new("SG&A Expense", "SellingGeneralAndAdministrativeExpense"),
        ])
    }
}

/// An entity tracked by the dataset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Entity ticker.
    pub ticker: Ticker,
    /// Regulator-assigned identifier, if known.
    #[serde(default)]
    pub cik: Option<String>,
}

impl Entity {
    /// Creates an entity with a known CIK.
    #[must_use]
    pub fn new(ticker: impl AsRef<str>, cik: impl Into<String>) -> Self {
        Self {
            ticker: Ticker::new(ticker),
            cik: Some(cik.into()),
        }
    }
}

/// Ordered roster of entities to keep up to date.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Roster {
    entities: Vec<Entity>,
}

impl Roster {
    /// Creates a roster from entities.
    #[must_use]
    pub const fn new(entities: Vec<Entity>) -> Self {
        Self { entities }
    }

    /// Returns the entities in roster order.
    #[must_use]
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Looks up an entity by ticker.
    #[must_use]
    pub fn get(&self, ticker: &Ticker) -> Option<&Entity> {
        self.entities.iter().find(|e| &e.ticker == ticker)
    }

    /// Returns the known CIK of a ticker.
    #[must_use]
    pub fn cik(&self, ticker: &Ticker) -> Option<&str> {
        self.get(ticker).and_then(|e| e.cik.as_deref())
    }
}

impl Default for Roster {
    fn default() -> Self {
        Self::new(vec![
            Entity::new("AXON", "0001069183"),
            Entity::new("GE", "0000040545"),
            Entity::new("GD", "0000040533"),
            Entity::new("HWM", "0000004281"),
            Entity::new("LHX", "0000202058"),
            Entity::new("LMT", "0000936468"),
            Entity::new("NOC", "0001133421"),
            Entity::new("RTX", "0000101829"),
            Entity::new("BA", "0000012927"),
            Entity::new("TDG", "0001260221"),
        ])
    }
}

/// Inclusive fiscal-year bounds for the historical cutoff window.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalYearWindow {
    /// Earliest fiscal year to keep.
    #[serde(default)]
    pub min: Option<i32>,
    /// Latest fiscal year to keep.
    #[serde(default)]
    pub max: Option<i32>,
}

impl FiscalYearWindow {
    /// A window without bounds.
    pub const UNBOUNDED: Self = Self {
        min: None,
        max: None,
    };

    /// Returns true if the fiscal year lies within the window.
    #[must_use]
    pub fn contains(&self, fiscal_year: i32) -> bool {
        self.min.is_none_or(|min| fiscal_year >= min) && self.max.is_none_or(|max| fiscal_year <= max)
    }

    /// Returns true if neither bound is set.
    #[must_use]
    pub const fn is_unbounded(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }
}

/// Configuration for one reconciliation run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Metric catalog (canonical metric order and tag mapping).
    #[serde(default)]
    pub catalog: MetricCatalog,
    /// Entities to keep up to date.
    #[serde(default)]
    pub roster: Roster,
    /// Optional fiscal-year cutoff applied to candidates.
    #[serde(default)]
    pub fiscal_years: FiscalYearWindow,
}

impl ReconcileConfig {
    /// Parses a configuration from JSON.
    ///
    /// # Errors
    /// Returns [`FundamentalsError::Parse`] if the document is not a valid configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| FundamentalsError::Parse(format!("Invalid configuration: {e}")))
    }

    /// Sets the fiscal-year window.
    #[must_use]
    pub const fn with_fiscal_years(mut self, fiscal_years: FiscalYearWindow) -> Self {
        self.fiscal_years = fiscal_years;
        self
    }
}
