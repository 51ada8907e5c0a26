//! SQLite storage for the long and wide tables.

use async_trait::async_trait;
use fundamentals_core::{
    FundamentalsError, LongTable, Period, RawFiscalYear, RawRecord, Result, TableStore, Ticker,
    WideRow, WideTable,
};
use rusqlite::{Connection, params};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, instrument};

fn db_error(e: impl std::fmt::Display) -> FundamentalsError {
    FundamentalsError::Storage(e.to_string())
}

/// SQLite-backed table store.
///
/// The long table lives in `long_facts`, keyed by
/// `(ticker, fiscal_year, period, metric)`, so the database enforces the
/// one-record-per-key rule as well. The wide table lives in `wide_rows` with
/// each row's metric values as a JSON object, and `wide_columns` records the
/// column order. Every save replaces a table inside one transaction.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (or create) a store at the given path.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or schema creation fails.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(db_error)?;
        let store = Self {
            conn: Mutex::new(conn),
            path: Some(path.as_ref().to_path_buf()),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Create an in-memory store.
    ///
    /// Useful for testing; data is lost when the store is dropped.
    ///
    /// # Errors
    /// Returns an error if schema creation fails.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_error)?;
        let store = Self {
            conn: Mutex::new(conn),
            path: None,
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock().map_err(db_error)?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS long_facts (
                ticker TEXT NOT NULL,
                cik TEXT NOT NULL,
                metric TEXT NOT NULL,
                source_tag TEXT NOT NULL,
                value REAL NOT NULL,
                fiscal_year INTEGER NOT NULL,
                period TEXT NOT NULL,
                filing_date TEXT NOT NULL,
                form TEXT NOT NULL,
                unit TEXT NOT NULL,
                PRIMARY KEY (ticker, fiscal_year, period, metric)
            );
            CREATE INDEX IF NOT EXISTS idx_long_facts_ticker_filed
                ON long_facts(ticker, filing_date);
            CREATE TABLE IF NOT EXISTS wide_columns (
                position INTEGER PRIMARY KEY,
                metric TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS wide_rows (
                ticker TEXT NOT NULL,
                fiscal_year INTEGER NOT NULL,
                period TEXT NOT NULL,
                values_json TEXT NOT NULL,
                PRIMARY KEY (ticker, fiscal_year, period)
            );",
        )
        .map_err(db_error)?;

        debug!("SQLite store schema initialized");
        Ok(())
    }

    /// Reads the stored wide table back.
    ///
    /// # Errors
    /// Returns an error if the query fails or a stored row cannot be decoded.
    pub fn load_wide(&self) -> Result<WideTable> {
        let conn = self.conn.lock().map_err(db_error)?;

        let mut stmt = conn
            .prepare("SELECT metric FROM wide_columns ORDER BY position")
            .map_err(db_error)?;
        let metrics = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(db_error)?
            .collect::<rusqlite::Result<Vec<String>>>()
            .map_err(db_error)?;

        let mut stmt = conn
            .prepare("SELECT ticker, fiscal_year, period, values_json FROM wide_rows")
            .map_err(db_error)?;
        let stored = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i32>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(db_error)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_error)?;

        let mut rows = Vec::with_capacity(stored.len());
        for (ticker, fiscal_year, period, json) in stored {
            let values: BTreeMap<String, f64> = serde_json::from_str(&json)
                .map_err(|e| FundamentalsError::Parse(format!("Invalid wide row: {e}")))?;
            rows.push(WideRow {
                ticker: Ticker::new(ticker),
                fiscal_year,
                period: period.parse::<Period>()?,
                values: metrics.iter().map(|m| values.get(m).copied()).collect(),
            });
        }
        rows.sort_by_key(WideRow::group_key);

        Ok(WideTable { metrics, rows })
    }
}

#[async_trait]
impl TableStore for SqliteStore {
    fn describe(&self) -> String {
        match &self.path {
            Some(path) => format!("sqlite ({})", path.display()),
            None => "sqlite (in memory)".to_string(),
        }
    }

    #[instrument(skip(self))]
    async fn load_long(&self) -> Result<Vec<RawRecord>> {
        let conn = self.conn.lock().map_err(db_error)?;

        let mut stmt = conn
            .prepare(
                "SELECT ticker, cik, metric, source_tag, value, fiscal_year, period,
                        filing_date, form, unit
                 FROM long_facts
                 ORDER BY ticker, fiscal_year, period, metric",
            )
            .map_err(db_error)?;

        let rows = stmt
            .query_map([], |row| {
                Ok(RawRecord {
                    ticker: row.get(0)?,
                    cik: row.get(1)?,
                    metric: row.get(2)?,
                    source_tag: row.get(3)?,
                    value: row.get::<_, Option<f64>>(4)?,
                    fiscal_year: row.get::<_, Option<i64>>(5)?.map(RawFiscalYear::Integer),
                    period: row.get(6)?,
                    filing_date: row.get(7)?,
                    form_type: row.get(8)?,
                    unit: row.get(9)?,
                })
            })
            .map_err(db_error)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_error)?;

        debug!(rows = rows.len(), "Loaded long facts");
        Ok(rows)
    }

    #[instrument(skip(self, table), fields(records = table.len()))]
    async fn save_long(&self, table: &LongTable) -> Result<()> {
        let conn = self.conn.lock().map_err(db_error)?;
        let tx = conn.unchecked_transaction().map_err(db_error)?;

        tx.execute("DELETE FROM long_facts", []).map_err(db_error)?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO long_facts
                     (ticker, cik, metric, source_tag, value, fiscal_year, period,
                      filing_date, form, unit)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                )
                .map_err(db_error)?;

            for record in table {
                stmt.execute(params![
                    record.ticker.as_str(),
                    record.cik,
                    record.metric,
                    record.source_tag,
                    record.value,
                    record.fiscal_year,
                    record.period.as_str(),
                    record.filing_date.to_string(),
                    record.form_type,
                    record.unit,
                ])
                .map_err(db_error)?;
            }
        }

        tx.commit().map_err(db_error)?;
        debug!("Saved long facts");
        Ok(())
    }

    #[instrument(skip(self, table), fields(rows = table.len()))]
    async fn save_wide(&self, table: &WideTable) -> Result<()> {
        let conn = self.conn.lock().map_err(db_error)?;
        let tx = conn.unchecked_transaction().map_err(db_error)?;

        tx.execute("DELETE FROM wide_columns", []).map_err(db_error)?;
        tx.execute("DELETE FROM wide_rows", []).map_err(db_error)?;
        {
            let mut stmt = tx
                .prepare("INSERT INTO wide_columns (position, metric) VALUES (?1, ?2)")
                .map_err(db_error)?;
            for (position, metric) in table.metrics.iter().enumerate() {
                stmt.execute(params![position as i64, metric])
                    .map_err(db_error)?;
            }

            let mut stmt = tx
                .prepare(
                    "INSERT INTO wide_rows (ticker, fiscal_year, period, values_json)
                     VALUES (?1, ?2, ?3, ?4)",
                )
                .map_err(db_error)?;
            for row in &table.rows {
                let values: BTreeMap<&str, f64> = table
                    .metrics
                    .iter()
                    .zip(&row.values)
                    .filter_map(|(metric, value)| value.map(|v| (metric.as_str(), v)))
                    .collect();
                let json = serde_json::to_string(&values)
                    .map_err(|e| FundamentalsError::Other(e.to_string()))?;
                stmt.execute(params![
                    row.ticker.as_str(),
                    row.fiscal_year,
                    row.period.as_str(),
                    json
                ])
                .map_err(db_error)?;
            }
        }

        tx.commit().map_err(db_error)?;
        debug!("Saved wide rows");
        Ok(())
    }
}
