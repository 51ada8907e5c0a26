//! Error types for fundamentals operations.
//!
//! [`FundamentalsError`] covers everything that can fail while fetching,
//! reconciling or persisting a dataset. Record-level normalization failures are
//! described by [`MalformedKey`]; they are collected per record and never abort
//! a run on their own.

use thiserror::Error;

/// Errors that can occur during fundamentals operations.
#[derive(Error, Debug)]
pub enum FundamentalsError {
    /// Network-related errors (connection failures, timeouts, etc.).
    #[error("Network error: {0}")]
    Network(String),

    /// Rate limit exceeded by a provider.
    #[error("Rate limited by {provider}: retry after {retry_after:?}")]
    RateLimited {
        /// The provider that rate limited the request.
        provider: String,
        /// Suggested time to wait before retrying.
        retry_after: Option<std::time::Duration>,
    },

    /// The requested ticker could not be resolved by a provider.
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    /// Error parsing data from a provider or a stored table.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Error reading or writing a stored table.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Error building a DataFrame view of a table.
    #[error("DataFrame error: {0}")]
    Frame(String),

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A record's key-bearing fields could not be normalized.
    #[error("Malformed key: {0}")]
    MalformedKey(#[from] MalformedKey),

    /// A structural invariant of the reconciliation engine was violated.
    ///
    /// This indicates a defect in the engine itself, not bad input.
    #[error("Invariant violated: {0}")]
    Invariant(String),

    /// Any other error.
    #[error("{0}")]
    Other(String),
}

/// Reasons a raw record cannot be turned into a keyed [`Record`](crate::Record).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedKey {
    /// The ticker is empty after trimming.
    #[error("empty ticker")]
    EmptyTicker,

    /// The metric name is empty after trimming.
    #[error("empty metric name")]
    EmptyMetric,

    /// No fiscal year was supplied.
    #[error("missing fiscal year")]
    MissingFiscalYear,

    /// The fiscal year is not an integral number (e.g. `2025.5`).
    #[error("fiscal year {0:?} is not integral")]
    NonIntegralFiscalYear(String),

    /// The period token is not one of `FY`, `Q1`, `Q2`, `Q3`, `Q4`.
    #[error("unrecognized period {0:?}")]
    UnknownPeriod(String),

    /// The filing date is missing or not a `YYYY-MM-DD` calendar date.
    #[error("invalid filing date {0:?}")]
    InvalidFilingDate(String),

    /// The value is missing or not a finite number.
    #[error("missing or non-finite value")]
    InvalidValue,
}

/// Result type alias using [`FundamentalsError`].
pub type Result<T> = std::result::Result<T, FundamentalsError>;
