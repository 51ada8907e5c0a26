//! Provider trait for fetching candidate filings.

use async_trait::async_trait;
use std::fmt::Debug;

use crate::{config::MetricCatalog, error::Result, types::RawRecord, window::EntityWindow};

/// Source of raw candidate records.
///
/// Implementations handle transport, retries and response parsing, and hand
/// the engine unnormalized [`RawRecord`]s. They may use the window to skip
/// facts that cannot be new, but the engine never relies on it.
#[async_trait]
pub trait FilingsProvider: Send + Sync + Debug {
    /// Returns the name of this provider (e.g., "SEC EDGAR").
    fn name(&self) -> &str;

    /// Fetches the candidate records of one entity.
    ///
    /// Only metrics in `catalog` are returned. Facts filed on or before
    /// `window.since` may be omitted.
    async fn fetch_entity(
        &self,
        window: &EntityWindow,
        catalog: &MetricCatalog,
    ) -> Result<Vec<RawRecord>>;
}
