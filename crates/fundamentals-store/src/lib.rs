#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/fundamentals/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Storage implementations for the fundamentals tables.
//!
//! This crate provides implementations of the [`TableStore`] trait from `fundamentals-core`:
//!
//! - [`CsvStore`] - Long and wide CSV files (default layout)
//! - [`SqliteStore`] - SQLite database (requires `sqlite` feature)
//! - [`InMemoryStore`] - In-memory tables for testing
//! - [`SupabaseStore`] - Wraps another store and upserts the wide table into
//!   Supabase (requires `supabase` feature)

/// CSV file storage.
pub mod file;
/// In-memory storage.
pub mod memory;

/// SQLite storage.
#[cfg(feature = "sqlite")]
pub mod sqlite;

/// Supabase publishing.
#[cfg(feature = "supabase")]
pub mod supabase;

// Re-export the trait for convenience
pub use fundamentals_core::TableStore;

// Re-export implementations
pub use file::CsvStore;
pub use memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

#[cfg(feature = "supabase")]
pub use supabase::SupabaseStore;
