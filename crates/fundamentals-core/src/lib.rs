#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/fundamentals/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Pipeline stages, leaf first:
//!
//! - [`KeyBuilder`] - normalizes raw records into canonical keys
//! - [`deduplicate`] - one record per key, latest filing wins
//! - [`FetchWindow`] - per-ticker filing-date cursors
//! - [`merge`](merge::merge) - insert/update/skip classification
//! - [`project`] - long-to-wide pivot
//! - [`ChangeReport`] - summary of what changed
//!
//! [`reconcile`](reconcile::reconcile) runs them all in order.

/// Configuration values: metric catalog, roster and fiscal-year window.
pub mod config;
/// Deduplication by record key.
pub mod dedup;
/// Error types.
pub mod error;
/// Raw-record normalization and key building.
pub mod keys;
/// Upsert merging.
pub mod merge;
/// Provider trait for fetching candidate filings.
pub mod provider;
/// The end-to-end reconciliation pipeline.
pub mod reconcile;
/// Change reporting.
pub mod report;
/// Storage trait for the long and wide tables.
pub mod store;
/// The long table.
pub mod table;
/// Record, key and period types.
pub mod types;
/// The wide projection.
pub mod wide;
/// Fetch-window planning.
pub mod window;

// Re-export commonly used items at crate root
pub use config::{Entity, FiscalYearWindow, MetricCatalog, MetricDef, ReconcileConfig, Roster};
pub use dedup::{Deduplicated, UnitConflict, UnitResolution, deduplicate};
pub use error::{FundamentalsError, MalformedKey, Result};
pub use keys::{KeyBuilder, Rejected};
pub use merge::{Classification, KeyOutcome, MergeOutcome};
pub use provider::FilingsProvider;
pub use reconcile::{Reconciliation, reconcile};
pub use report::{ChangeCounts, ChangeReport, ChangedRecord, FilingRef};
pub use store::TableStore;
pub use table::{LONG_COLUMNS, LoadedTable, LongTable};
pub use types::{GroupKey, Period, RawFiscalYear, RawRecord, Record, RecordKey, Ticker};
pub use wide::{WIDE_KEY_COLUMNS, WideRow, WideTable, project};
pub use window::{EntityWindow, FetchWindow};
