//! Storage trait for the long and wide tables.

use async_trait::async_trait;

use crate::{error::Result, table::LongTable, types::RawRecord, wide::WideTable};

/// Persistent home of the long and wide tables.
///
/// The long table is handed back as raw rows so that the engine can
/// normalize and deduplicate whatever is on disk. The wide table is
/// write-only; it is always regenerated from the long table.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Returns a short label for logs (e.g., the file path).
    fn describe(&self) -> String;

    /// Loads the stored long table. A store with nothing saved yet returns
    /// an empty vector.
    async fn load_long(&self) -> Result<Vec<RawRecord>>;

    /// Replaces the stored long table.
    async fn save_long(&self, table: &LongTable) -> Result<()>;

    /// Replaces the stored wide table.
    async fn save_wide(&self, table: &WideTable) -> Result<()>;
}
