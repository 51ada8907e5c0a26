//! Key building: normalization of raw field values into canonical keys.

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::config::Roster;
use crate::error::MalformedKey;
use crate::types::{GroupKey, Period, RawFiscalYear, RawRecord, Record, RecordKey, Ticker};

/// A raw record that could not be normalized, with the reason.
#[derive(Clone, Debug, PartialEq)]
pub struct Rejected {
    /// The record as delivered.
    pub raw: RawRecord,
    /// Why it was rejected.
    pub reason: MalformedKey,
}

/// Normalizes raw records into keyed [`Record`]s.
///
/// Two logically identical facts produce the same key regardless of how the
/// fiscal year was represented (`2025`, `2025.0`, `"2025.0"`) or of stray
/// whitespace and casing in the ticker and period.
#[derive(Clone, Copy, Debug, Default)]
pub struct KeyBuilder<'a> {
    roster: Option<&'a Roster>,
}

impl<'a> KeyBuilder<'a> {
    /// Creates a key builder without a roster.
    #[must_use]
    pub const fn new() -> Self {
        Self { roster: None }
    }

    /// Creates a key builder that fills missing CIKs from a roster.
    #[must_use]
    pub const fn with_roster(roster: &'a Roster) -> Self {
        Self {
            roster: Some(roster),
        }
    }

    /// Builds the canonical long-table key of a raw record.
    ///
    /// # Errors
    /// Returns a [`MalformedKey`] if the ticker or metric is empty, the fiscal
    /// year is missing or not integral, or the period token is unknown.
    pub fn key(&self, raw: &RawRecord) -> Result<RecordKey, MalformedKey> {
        let ticker = Ticker::new(&raw.ticker);
        if ticker.is_empty() {
            return Err(MalformedKey::EmptyTicker);
        }

        let metric = raw.metric.trim();
        if metric.is_empty() {
            return Err(MalformedKey::EmptyMetric);
        }

        let fiscal_year = normalize_fiscal_year(raw.fiscal_year.as_ref())?;
        let period = raw
            .period
            .as_deref()
            .ok_or_else(|| MalformedKey::UnknownPeriod(String::new()))?
            .parse::<Period>()?;

        Ok(RecordKey {
            ticker,
            fiscal_year,
            period,
            metric: metric.to_string(),
        })
    }

    /// Builds the canonical wide-table key of a raw record.
    ///
    /// # Errors
    /// Same as [`KeyBuilder::key`].
    pub fn group_key(&self, raw: &RawRecord) -> Result<GroupKey, MalformedKey> {
        self.key(raw).map(|key| key.group())
    }

    /// Normalizes a raw record into a [`Record`].
    ///
    /// # Errors
    /// Returns a [`MalformedKey`] if any key-bearing field cannot be
    /// normalized, the filing date is not a calendar date, or the value is
    /// missing.
    pub fn build(&self, raw: &RawRecord) -> Result<Record, MalformedKey> {
        let key = self.key(raw)?;

        let filing_date = raw
            .filing_date
            .as_deref()
            .map(str::trim)
            .and_then(parse_filing_date)
            .ok_or_else(|| {
                MalformedKey::InvalidFilingDate(raw.filing_date.clone().unwrap_or_default())
            })?;

        let value = raw
            .value
            .filter(|v| v.is_finite())
            .ok_or(MalformedKey::InvalidValue)?;

        let cik = match normalize_cik(&raw.cik) {
            Some(cik) => cik,
            None => self
                .roster
                .and_then(|r| r.cik(&key.ticker))
                .and_then(normalize_cik)
                .unwrap_or_default(),
        };

        Ok(Record {
            ticker: key.ticker,
            cik,
            metric: key.metric,
            source_tag: raw.source_tag.trim().to_string(),
            value,
            fiscal_year: key.fiscal_year,
            period: key.period,
            filing_date,
            form_type: raw.form_type.trim().to_string(),
            unit: raw.unit.trim().to_string(),
        })
    }

    /// Normalizes a batch, separating valid records from rejected ones.
    ///
    /// Input order is preserved in both outputs.
    pub fn build_all<I>(&self, raws: I) -> (Vec<Record>, Vec<Rejected>)
    where
        I: IntoIterator<Item = RawRecord>,
    {
        let mut records = Vec::new();
        let mut rejected = Vec::new();

        for raw in raws {
            match self.build(&raw) {
                Ok(record) => records.push(record),
                Err(reason) => {
                    debug!(ticker = %raw.ticker, metric = %raw.metric, %reason, "Rejected record");
                    rejected.push(Rejected { raw, reason });
                }
            }
        }

        if !rejected.is_empty() {
            warn!(
                rejected = rejected.len(),
                accepted = records.len(),
                "Excluded malformed records from batch"
            );
        }

        (records, rejected)
    }
}

/// Coerces a raw fiscal year to an integer.
///
/// Integral floats (`2025.0`) are truncated; anything with a fractional part
/// is rejected.
fn normalize_fiscal_year(raw: Option<&RawFiscalYear>) -> Result<i32, MalformedKey> {
    match raw {
        None => Err(MalformedKey::MissingFiscalYear),
        Some(RawFiscalYear::Integer(year)) => {
            i32::try_from(*year).map_err(|_| MalformedKey::NonIntegralFiscalYear(year.to_string()))
        }
        Some(RawFiscalYear::Float(year)) => float_year(*year, &year.to_string()),
        Some(RawFiscalYear::Text(text)) => {
            let text = text.trim();
            if text.is_empty() {
                return Err(MalformedKey::MissingFiscalYear);
            }
            if let Ok(year) = text.parse::<i64>() {
                return normalize_fiscal_year(Some(&RawFiscalYear::Integer(year)));
            }
            match text.parse::<f64>() {
                Ok(year) => float_year(year, text),
                Err(_) => Err(MalformedKey::NonIntegralFiscalYear(text.to_string())),
            }
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn float_year(year: f64, repr: &str) -> Result<i32, MalformedKey> {
    if !year.is_finite()
        || year.fract() != 0.0
        || year < f64::from(i32::MIN)
        || year > f64::from(i32::MAX)
    {
        return Err(MalformedKey::NonIntegralFiscalYear(repr.to_string()));
    }
    Ok(year.trunc() as i32)
}

/// Parses a `YYYY-MM-DD` date, tolerating a trailing time component.
fn parse_filing_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| s.get(..10).and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()))
}

/// Zero-pads numeric CIKs to ten digits; returns `None` for an empty CIK.
fn normalize_cik(cik: &str) -> Option<String> {
    let cik = cik.trim();
    if cik.is_empty() {
        return None;
    }
    if cik.chars().all(|c| c.is_ascii_digit()) {
        Some(format!("{:0>10}", cik))
    } else {
        Some(cik.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Entity;

    fn raw(fiscal_year: RawFiscalYear) -> RawRecord {
        RawRecord {
            ticker: " axon ".to_string(),
            cik: "1069183".to_string(),
            metric: "Revenue".to_string(),
            source_tag: "Revenues".to_string(),
            value: Some(100.0),
            fiscal_year: Some(fiscal_year),
            period: Some("fy".to_string()),
            filing_date: Some("2024-03-01".to_string()),
            form_type: "10-K".to_string(),
            unit: "USD".to_string(),
        }
    }

    #[test]
    fn test_fiscal_year_representations_share_a_key() {
        let builder = KeyBuilder::new();
        let from_int = builder.key(&raw(RawFiscalYear::Integer(2025))).unwrap();
        let from_float = builder.key(&raw(RawFiscalYear::Float(2025.0))).unwrap();
        let from_text = builder.key(&raw(RawFiscalYear::Text("2025.0".into()))).unwrap();
        let from_plain_text = builder.key(&raw(RawFiscalYear::Text(" 2025 ".into()))).unwrap();

        assert_eq!(from_int, from_float);
        assert_eq!(from_int, from_text);
        assert_eq!(from_int, from_plain_text);
        assert_eq!(from_int.fiscal_year, 2025);
        assert_eq!(from_int.ticker.as_str(), "AXON");
        assert_eq!(from_int.period, Period::FiscalYear);
    }

    #[test]
    fn test_non_integral_fiscal_year_is_rejected() {
        let builder = KeyBuilder::new();
        assert_eq!(
            builder.key(&raw(RawFiscalYear::Float(2025.5))),
            Err(MalformedKey::NonIntegralFiscalYear("2025.5".into()))
        );
        assert_eq!(
            builder.key(&raw(RawFiscalYear::Text("twenty".into()))),
            Err(MalformedKey::NonIntegralFiscalYear("twenty".into()))
        );
        assert_eq!(
            builder.key(&raw(RawFiscalYear::Text("  ".into()))),
            Err(MalformedKey::MissingFiscalYear)
        );
        assert!(matches!(
            builder.key(&raw(RawFiscalYear::Float(f64::NAN))),
            Err(MalformedKey::NonIntegralFiscalYear(_))
        ));
    }

    #[test]
    fn test_key_field_validation() {
        let builder = KeyBuilder::new();

        let mut no_ticker = raw(RawFiscalYear::Integer(2024));
        no_ticker.ticker = "   ".into();
        assert_eq!(builder.key(&no_ticker), Err(MalformedKey::EmptyTicker));

        let mut bad_period = raw(RawFiscalYear::Integer(2024));
        bad_period.period = Some("H1".into());
        assert_eq!(
            builder.key(&bad_period),
            Err(MalformedKey::UnknownPeriod("H1".into()))
        );

        let mut no_period = raw(RawFiscalYear::Integer(2024));
        no_period.period = None;
        assert!(matches!(
            builder.key(&no_period),
            Err(MalformedKey::UnknownPeriod(_))
        ));

        let mut no_metric = raw(RawFiscalYear::Integer(2024));
        no_metric.metric = String::new();
        assert_eq!(builder.key(&no_metric), Err(MalformedKey::EmptyMetric));
    }

    #[test]
    fn test_build_record() {
        let record = KeyBuilder::new()
            .build(&raw(RawFiscalYear::Float(2024.0)))
            .unwrap();

        assert_eq!(record.ticker.as_str(), "AXON");
        assert_eq!(record.cik, "0001069183");
        assert_eq!(record.fiscal_year, 2024);
        assert_eq!(
            record.filing_date,
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
        );
        assert_eq!(record.value, 100.0);
    }

    #[test]
    fn test_build_rejects_bad_date_and_value() {
        let builder = KeyBuilder::new();

        let mut bad_date = raw(RawFiscalYear::Integer(2024));
        bad_date.filing_date = Some("03/01/2024".into());
        assert_eq!(
            builder.build(&bad_date),
            Err(MalformedKey::InvalidFilingDate("03/01/2024".into()))
        );

        let mut timestamp = raw(RawFiscalYear::Integer(2024));
        timestamp.filing_date = Some("2024-03-01 00:00:00".into());
        assert!(builder.build(&timestamp).is_ok());

        let mut no_value = raw(RawFiscalYear::Integer(2024));
        no_value.value = None;
        assert_eq!(builder.build(&no_value), Err(MalformedKey::InvalidValue));
    }

    #[test]
    fn test_missing_cik_filled_from_roster() {
        let roster = Roster::new(vec![Entity::new("AXON", "0001069183")]);
        let mut no_cik = raw(RawFiscalYear::Integer(2024));
        no_cik.cik = String::new();

        let record = KeyBuilder::with_roster(&roster).build(&no_cik).unwrap();
        assert_eq!(record.cik, "0001069183");

        let record = KeyBuilder::new().build(&no_cik).unwrap();
        assert_eq!(record.cik, "");
    }

    #[test]
    fn test_build_all_preserves_order() {
        let mut bad = raw(RawFiscalYear::Float(2024.5));
        bad.metric = "Net Income".into();
        let good = raw(RawFiscalYear::Integer(2024));

        let (records, rejected) = KeyBuilder::new().build_all(vec![bad, good]);
        assert_eq!(records.len(), 1);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].raw.metric, "Net Income");
    }
}
