//! Core data types for filings-derived fundamentals.
//!
//! This module defines the fundamental data structures:
//!
//! - [`Ticker`] - Normalized entity identifier
//! - [`Period`] - Reporting period (`FY`, `Q1`..`Q4`)
//! - [`RawRecord`] - Unnormalized candidate handed over by a collaborator
//! - [`Record`] - One normalized fact
//! - [`RecordKey`] / [`GroupKey`] - Uniqueness keys of the long and wide tables

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::MalformedKey;

/// An entity ticker.
///
/// Tickers are trimmed and uppercased on creation.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String")]
pub struct Ticker(String);

impl Ticker {
    /// Creates a new ticker, trimming whitespace and converting to uppercase.
    #[must_use]
    pub fn new(s: impl AsRef<str>) -> Self {
        Self(s.as_ref().trim().to_uppercase())
    }

    /// Returns the ticker as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the ticker is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Ticker {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Ticker {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Reporting period of a fact.
///
/// Variants are ordered the way their tokens sort, so tables ordered by
/// period match a lexicographic ordering of the persisted column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Period {
    /// Full fiscal year.
    #[serde(rename = "FY")]
    FiscalYear,
    /// First fiscal quarter.
    Q1,
    /// Second fiscal quarter.
    Q2,
    /// Third fiscal quarter.
    Q3,
    /// Fourth fiscal quarter.
    Q4,
}

impl Period {
    /// All periods in canonical order.
    pub const ALL: [Self; 5] = [Self::FiscalYear, Self::Q1, Self::Q2, Self::Q3, Self::Q4];

    /// Returns the persisted token for this period.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FiscalYear => "FY",
            Self::Q1 => "Q1",
            Self::Q2 => "Q2",
            Self::Q3 => "Q3",
            Self::Q4 => "Q4",
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = MalformedKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "FY" => Ok(Self::FiscalYear),
            "Q1" => Ok(Self::Q1),
            "Q2" => Ok(Self::Q2),
            "Q3" => Ok(Self::Q3),
            "Q4" => Ok(Self::Q4),
            _ => Err(MalformedKey::UnknownPeriod(s.to_string())),
        }
    }
}

/// Fiscal year as delivered by a collaborator, before normalization.
#[derive(Clone, Debug, PartialEq)]
pub enum RawFiscalYear {
    /// Integral representation (`2025`).
    Integer(i64),
    /// Floating-point representation (`2025.0`).
    Float(f64),
    /// Textual representation, e.g. a CSV cell (`"2025"`, `"2025.0"`).
    Text(String),
}

impl From<i32> for RawFiscalYear {
    fn from(year: i32) -> Self {
        Self::Integer(i64::from(year))
    }
}

impl From<f64> for RawFiscalYear {
    fn from(year: f64) -> Self {
        Self::Float(year)
    }
}

impl From<&str> for RawFiscalYear {
    fn from(year: &str) -> Self {
        Self::Text(year.to_string())
    }
}

/// An unnormalized candidate record.
///
/// This is what fetch and storage collaborators hand to the engine. Every
/// field is taken as delivered; the [`KeyBuilder`](crate::KeyBuilder) turns it
/// into a [`Record`] or rejects it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawRecord {
    /// Entity identifier, possibly with stray whitespace or lowercase.
    pub ticker: String,
    /// Regulator-assigned identifier.
    pub cik: String,
    /// Canonical metric name.
    pub metric: String,
    /// Taxonomy tag the metric was derived from.
    pub source_tag: String,
    /// Measured value.
    pub value: Option<f64>,
    /// Fiscal year in whatever representation the source used.
    pub fiscal_year: Option<RawFiscalYear>,
    /// Period token.
    pub period: Option<String>,
    /// Filing date as `YYYY-MM-DD`.
    pub filing_date: Option<String>,
    /// Disclosure form identifier.
    pub form_type: String,
    /// Unit of measure.
    pub unit: String,
}

/// One normalized fact of the long table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Entity identifier.
    pub ticker: Ticker,
    /// Regulator-assigned identifier, zero-padded to ten digits when numeric.
    pub cik: String,
    /// Canonical metric name.
    pub metric: String,
    /// Taxonomy tag the metric was derived from.
    pub source_tag: String,
    /// Measured value.
    pub value: f64,
    /// Fiscal year.
    pub fiscal_year: i32,
    /// Reporting period.
    pub period: Period,
    /// Date the disclosure was filed.
    pub filing_date: NaiveDate,
    /// Disclosure form identifier.
    pub form_type: String,
    /// Unit of measure.
    pub unit: String,
}

impl Record {
    /// Returns the long-table key of this record.
    #[must_use]
    pub fn key(&self) -> RecordKey {
        RecordKey {
            ticker: self.ticker.clone(),
            fiscal_year: self.fiscal_year,
            period: self.period,
            metric: self.metric.clone(),
        }
    }

    /// Returns the wide-table key of this record.
    #[must_use]
    pub fn group_key(&self) -> GroupKey {
        GroupKey {
            ticker: self.ticker.clone(),
            fiscal_year: self.fiscal_year,
            period: self.period,
        }
    }
}

/// Uniqueness key of the long table: `(Ticker, FiscalYear, Period, Metric)`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    /// Entity identifier.
    pub ticker: Ticker,
    /// Fiscal year.
    pub fiscal_year: i32,
    /// Reporting period.
    pub period: Period,
    /// Canonical metric name.
    pub metric: String,
}

impl From<&Record> for RawRecord {
    fn from(record: &Record) -> Self {
        Self {
            ticker: record.ticker.to_string(),
            cik: record.cik.clone(),
            metric: record.metric.clone(),
            source_tag: record.source_tag.clone(),
            value: Some(record.value),
            fiscal_year: Some(RawFiscalYear::from(record.fiscal_year)),
            period: Some(record.period.to_string()),
            filing_date: Some(record.filing_date.to_string()),
            form_type: record.form_type.clone(),
            unit: record.unit.clone(),
        }
    }
}

impl RecordKey {
    /// Returns the wide-table group this key belongs to.
    #[must_use]
    pub fn group(&self) -> GroupKey {
        GroupKey {
            ticker: self.ticker.clone(),
            fiscal_year: self.fiscal_year,
            period: self.period,
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} FY{} {} {}",
            self.ticker, self.fiscal_year, self.period, self.metric
        )
    }
}

/// Uniqueness key of the wide table: `(Ticker, FiscalYear, Period)`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupKey {
    /// Entity identifier.
    pub ticker: Ticker,
    /// Fiscal year.
    pub fiscal_year: i32,
    /// Reporting period.
    pub period: Period,
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} FY{} {}", self.ticker, self.fiscal_year, self.period)
    }
}
