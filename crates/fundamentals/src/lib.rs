#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/fundamentals/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Incremental fundamentals datasets.
//!
//! This crate re-exports the reconciliation engine, the storage backends and
//! the EDGAR provider, and provides the [`Updater`] that runs one incremental
//! update end to end.
//!
//! # Features
//!
//! - `edgar` - SEC EDGAR company-facts provider
//! - `store-sqlite` - SQLite table store

/// Run settings resolved from the environment.
pub mod settings;
/// The incremental updater.
pub mod updater;

// Core types, engine and traits
pub use fundamentals_core::*;

// Stores
#[cfg(feature = "store-sqlite")]
pub use fundamentals_store::SqliteStore;
pub use fundamentals_store::{CsvStore, InMemoryStore};
#[cfg(feature = "store-supabase")]
pub use fundamentals_store::SupabaseStore;

// Providers
#[cfg(feature = "edgar")]
pub use fundamentals_edgar::{EdgarProvider, RetryPolicy};

pub use settings::{Settings, StoreKind};
pub use updater::{FailedEntity, UpdateSummary, Updater, rebuild_wide};
