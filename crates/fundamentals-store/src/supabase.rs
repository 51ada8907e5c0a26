//! Publishing the wide table to a Supabase (PostgREST) table.

use async_trait::async_trait;
use fundamentals_core::{FundamentalsError, LongTable, RawRecord, Result, TableStore, WideTable};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Default destination table.
pub const DEFAULT_TABLE: &str = "fundamentals_wide";
/// Rows sent per upsert request.
pub const DEFAULT_BATCH_SIZE: usize = 500;
/// Columns forming the destination table's primary key.
pub const CONFLICT_COLUMNS: &str = "ticker,fiscal_year,period";

/// Store that keeps both tables in an inner store and additionally upserts
/// every saved wide table into a Supabase table.
///
/// Rows are keyed by `(ticker, fiscal_year, period)` and merged on conflict,
/// so republishing an unchanged table is harmless. Metric columns keep their
/// wide-table names; empty and non-finite cells are sent as `null`.
pub struct SupabaseStore {
    inner: Arc<dyn TableStore>,
    client: reqwest::Client,
    url: String,
    key: String,
    table: String,
    batch_size: usize,
}

impl fmt::Debug for SupabaseStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupabaseStore")
            .field("inner", &self.inner.describe())
            .field("url", &self.url)
            .field("table", &self.table)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl SupabaseStore {
    /// Wraps `inner`, publishing to the project at `url` with the given API key.
    ///
    /// # Errors
    /// Returns [`FundamentalsError::InvalidParameter`] if the URL or key is
    /// empty and [`FundamentalsError::Network`] if the HTTP client cannot be
    /// built.
    pub fn new(inner: Arc<dyn TableStore>, url: &str, key: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| FundamentalsError::Network(format!("Failed to build HTTP client: {e}")))?;
        Self::with_client(inner, client, url, key)
    }

    /// Same as [`SupabaseStore::new`] with a caller-supplied HTTP client.
    ///
    /// # Errors
    /// Returns [`FundamentalsError::InvalidParameter`] if the URL or key is empty.
    pub fn with_client(
        inner: Arc<dyn TableStore>,
        client: reqwest::Client,
        url: &str,
        key: &str,
    ) -> Result<Self> {
        let url = url.trim().trim_end_matches('/');
        let key = key.trim();
        if url.is_empty() || key.is_empty() {
            return Err(FundamentalsError::InvalidParameter(
                "Supabase URL and key must both be set".to_string(),
            ));
        }
        Ok(Self {
            inner,
            client,
            url: url.to_string(),
            key: key.to_string(),
            table: DEFAULT_TABLE.to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    /// Publishes to `table` instead of [`DEFAULT_TABLE`].
    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Sends at most `batch_size` rows per request.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/rest/v1/{}?on_conflict={CONFLICT_COLUMNS}",
            self.url, self.table
        )
    }

    /// Upserts every row of `table` and returns the number of rows sent.
    ///
    /// Rows without a ticker are dropped with a warning. Batches are sent in
    /// order and the first failing batch aborts the publish.
    ///
    /// # Errors
    /// Returns [`FundamentalsError::Network`] if a request fails or is
    /// answered with a non-success status.
    #[instrument(skip(self, table), fields(destination = %self.table, rows = table.len()))]
    pub async fn publish(&self, table: &WideTable) -> Result<usize> {
        let rows = upsert_rows(table);
        let dropped = table.len() - rows.len();
        if dropped > 0 {
            warn!(dropped, "Dropped wide rows with an empty key");
        }

        let endpoint = self.endpoint();
        let batches = rows.len().div_ceil(self.batch_size);
        for (i, chunk) in rows.chunks(self.batch_size).enumerate() {
            let response = self
                .client
                .post(&endpoint)
                .header("apikey", &self.key)
                .bearer_auth(&self.key)
                .header("Prefer", "resolution=merge-duplicates")
                .json(chunk)
                .send()
                .await
                .map_err(|e| FundamentalsError::Network(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(FundamentalsError::Network(format!(
                    "Upsert batch {}/{batches} into {} failed with HTTP {status}: {body}",
                    i + 1,
                    self.table
                )));
            }
            debug!(batch = i + 1, batches, rows = chunk.len(), "Upserted batch");
        }

        info!(rows = rows.len(), batches, "Published wide table");
        Ok(rows.len())
    }
}

/// Converts wide rows into upsert payload objects.
fn upsert_rows(table: &WideTable) -> Vec<Map<String, Value>> {
    table
        .rows
        .iter()
        .filter(|row| !row.ticker.as_str().trim().is_empty())
        .map(|row| {
            let mut object = Map::with_capacity(3 + table.metrics.len());
            object.insert(
                "ticker".to_string(),
                Value::from(row.ticker.as_str().trim()),
            );
            object.insert("fiscal_year".to_string(), Value::from(row.fiscal_year));
            object.insert("period".to_string(), Value::from(row.period.to_string()));
            for (i, metric) in table.metrics.iter().enumerate() {
                let value = row
                    .values
                    .get(i)
                    .copied()
                    .flatten()
                    .filter(|v| v.is_finite())
                    .map_or(Value::Null, Value::from);
                object.insert(metric.clone(), value);
            }
            object
        })
        .collect()
}

#[async_trait]
impl TableStore for SupabaseStore {
    fn describe(&self) -> String {
        format!("{} + supabase {}/{}", self.inner.describe(), self.url, self.table)
    }

    async fn load_long(&self) -> Result<Vec<RawRecord>> {
        self.inner.load_long().await
    }

    async fn save_long(&self, table: &LongTable) -> Result<()> {
        self.inner.save_long(table).await
    }

    async fn save_wide(&self, table: &WideTable) -> Result<()> {
        self.inner.save_wide(table).await?;
        self.publish(table).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryStore;
    use fundamentals_core::{Period, Ticker, WideRow};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn row(ticker: &str, period: Period, values: Vec<Option<f64>>) -> WideRow {
        WideRow {
            ticker: Ticker::new(ticker),
            fiscal_year: 2024,
            period,
            values,
        }
    }

    fn wide() -> WideTable {
        WideTable {
            metrics: vec!["Revenue".to_string(), "Net Income".to_string()],
            rows: vec![
                row("AXON", Period::FiscalYear, vec![Some(2080.0), Some(377.0)]),
                row("AXON", Period::Q1, vec![Some(460.0), Some(f64::NAN)]),
                row("BA", Period::FiscalYear, vec![Some(f64::INFINITY), None]),
            ],
        }
    }

    async fn mount_upsert(server: &MockServer, status: u16) {
        Mock::given(method("POST"))
            .and(path("/rest/v1/fundamentals_wide"))
            .and(query_param("on_conflict", "ticker,fiscal_year,period"))
            .and(header("Prefer", "resolution=merge-duplicates"))
            .and(header("apikey", "service-key"))
            .and(header("Authorization", "Bearer service-key"))
            .respond_with(ResponseTemplate::new(status))
            .mount(server)
            .await;
    }

    async fn sent_batches(server: &MockServer) -> Vec<Value> {
        server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .map(|request| serde_json::from_slice(&request.body).unwrap())
            .collect()
    }

    #[test]
    fn test_upsert_rows_use_snake_case_keys_and_nulls() {
        let rows = upsert_rows(&wide());

        assert_eq!(
            Value::Object(rows[1].clone()),
            json!({
                "ticker": "AXON",
                "fiscal_year": 2024,
                "period": "Q1",
                "Revenue": 460.0,
                "Net Income": null,
            })
        );
        assert_eq!(rows[2]["Revenue"], Value::Null);
        assert_eq!(rows[2]["Net Income"], Value::Null);
    }

    #[test]
    fn test_rows_without_ticker_are_dropped() {
        let mut table = wide();
        table.rows.push(row(" ", Period::FiscalYear, vec![Some(1.0), None]));

        assert_eq!(upsert_rows(&table).len(), 3);
    }

    #[test]
    fn test_requires_url_and_key() {
        let inner: Arc<dyn TableStore> = Arc::new(InMemoryStore::new());
        assert!(SupabaseStore::new(inner.clone(), "", "service-key").is_err());
        assert!(SupabaseStore::new(inner, "https://example.supabase.co", " ").is_err());
    }

    #[tokio::test]
    async fn test_save_wide_upserts_in_batches() {
        let server = MockServer::start().await;
        mount_upsert(&server, 201).await;

        let inner = Arc::new(InMemoryStore::new());
        let store = SupabaseStore::new(inner.clone(), &format!("{}/", server.uri()), "service-key")
            .unwrap()
            .with_batch_size(2);
        store.save_wide(&wide()).await.unwrap();

        let batches = sent_batches(&server).await;
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].as_array().unwrap().len(), 2);
        assert_eq!(batches[1].as_array().unwrap().len(), 1);
        assert_eq!(batches[1][0]["ticker"], "BA");
        assert_eq!(inner.wide().await.map(|w| w.len()), Some(3));
    }

    #[tokio::test]
    async fn test_rejected_batch_is_an_error() {
        let server = MockServer::start().await;
        mount_upsert(&server, 409).await;

        let store =
            SupabaseStore::new(Arc::new(InMemoryStore::new()), &server.uri(), "service-key")
                .unwrap();
        let err = store.publish(&wide()).await.unwrap_err();

        assert!(matches!(err, FundamentalsError::Network(_)));
        assert!(err.to_string().contains("409"));
    }

    #[tokio::test]
    async fn test_long_table_goes_to_inner_store() {
        let server = MockServer::start().await;
        let inner = Arc::new(InMemoryStore::new());
        let store = SupabaseStore::new(inner.clone(), &server.uri(), "service-key").unwrap();

        store.save_long(&LongTable::new()).await.unwrap();

        assert_eq!(inner.long_saves(), 1);
        assert!(store.load_long().await.unwrap().is_empty());
        assert!(sent_batches(&server).await.is_empty());
    }
}
