//! In-memory storage implementation.

use async_trait::async_trait;
use fundamentals_core::{LongTable, RawRecord, Result, TableStore, WideTable};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

/// In-memory table store for testing and dry runs.
///
/// The long table is kept as raw rows, so a store can be seeded with
/// duplicates or malformed rows to exercise the load path. Saves are counted
/// so callers can check what was persisted.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    long: RwLock<Vec<RawRecord>>,
    wide: RwLock<Option<WideTable>>,
    long_saves: AtomicUsize,
    wide_saves: AtomicUsize,
}

impl InMemoryStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store whose long table holds the given rows.
    #[must_use]
    pub fn with_long(rows: Vec<RawRecord>) -> Self {
        Self {
            long: RwLock::new(rows),
            ..Self::default()
        }
    }

    /// Returns a copy of the stored long rows.
    pub async fn long_rows(&self) -> Vec<RawRecord> {
        self.long.read().await.clone()
    }

    /// Returns a copy of the stored wide table, if one was saved.
    pub async fn wide(&self) -> Option<WideTable> {
        self.wide.read().await.clone()
    }

    /// Number of times the long table was saved.
    #[must_use]
    pub fn long_saves(&self) -> usize {
        self.long_saves.load(Ordering::SeqCst)
    }

    /// Number of times the wide table was saved.
    #[must_use]
    pub fn wide_saves(&self) -> usize {
        self.wide_saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TableStore for InMemoryStore {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    #[instrument(skip(self))]
    async fn load_long(&self) -> Result<Vec<RawRecord>> {
        let rows = self.long.read().await.clone();
        debug!(rows = rows.len(), "Loaded long rows from memory");
        Ok(rows)
    }

    #[instrument(skip(self, table), fields(records = table.len()))]
    async fn save_long(&self, table: &LongTable) -> Result<()> {
        let rows: Vec<RawRecord> = table.iter().map(RawRecord::from).collect();
        *self.long.write().await = rows;
        self.long_saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    #[instrument(skip(self, table), fields(rows = table.len()))]
    async fn save_wide(&self, table: &WideTable) -> Result<()> {
        *self.wide.write().await = Some(table.clone());
        self.wide_saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use fundamentals_core::{KeyBuilder, MetricCatalog, Period, Record, Ticker, project};

    fn table() -> LongTable {
        LongTable::from_records(vec![Record {
            ticker: Ticker::new("AXON"),
            cik: "0001069183".to_string(),
            metric: "Revenue".to_string(),
            source_tag: "Revenues".to_string(),
            value: 100.0,
            fiscal_year: 2024,
            period: Period::FiscalYear,
            filing_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            form_type: "10-K".to_string(),
            unit: "USD".to_string(),
        }])
    }

    #[tokio::test]
    async fn test_round_trip_and_counters() {
        let store = InMemoryStore::new();
        assert!(store.load_long().await.unwrap().is_empty());
        assert!(store.wide().await.is_none());

        store.save_long(&table()).await.unwrap();
        store
            .save_wide(&project(&table(), &MetricCatalog::default()))
            .await
            .unwrap();

        let loaded = LongTable::load(store.load_long().await.unwrap(), &KeyBuilder::new());
        assert_eq!(loaded.table, table());
        assert_eq!(store.wide().await.map(|w| w.len()), Some(1));
        assert_eq!(store.long_saves(), 1);
        assert_eq!(store.wide_saves(), 1);
    }

    #[tokio::test]
    async fn test_seeded_rows() {
        let rows: Vec<RawRecord> = table().iter().map(RawRecord::from).collect();
        let store = InMemoryStore::with_long(rows.clone());
        assert_eq!(store.long_rows().await, rows);
    }
}
