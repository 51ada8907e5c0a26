//! Run settings resolved from the environment.

use fundamentals_core::{FundamentalsError, ReconcileConfig, Result, TableStore};
use fundamentals_store::CsvStore;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::updater::DEFAULT_CONCURRENCY;

/// Default long-table path.
pub const DEFAULT_LONG_CSV: &str = "fundamentals_long.csv";
/// Default wide-table path.
pub const DEFAULT_WIDE_CSV: &str = "fundamentals_wide.csv";
/// Default SQLite database path.
pub const DEFAULT_SQLITE: &str = "fundamentals.db";

/// Which storage backend to use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StoreKind {
    /// CSV files.
    #[default]
    Csv,
    /// SQLite database.
    Sqlite,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Csv => "csv",
            Self::Sqlite => "sqlite",
        })
    }
}

impl FromStr for StoreKind {
    type Err = FundamentalsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(FundamentalsError::InvalidParameter(format!(
                "Unknown store kind: {other} (expected csv or sqlite)"
            ))),
        }
    }
}

/// Settings for one run.
#[derive(Clone, PartialEq, Eq)]
pub struct Settings {
    /// Identifying user agent for SEC requests.
    pub user_agent: Option<String>,
    /// Storage backend.
    pub store: StoreKind,
    /// Long CSV path.
    pub long_path: PathBuf,
    /// Wide CSV path.
    pub wide_path: PathBuf,
    /// SQLite database path.
    pub sqlite_path: PathBuf,
    /// Optional JSON configuration file (catalog, roster, fiscal years).
    pub config_path: Option<PathBuf>,
    /// Entities fetched concurrently.
    pub concurrency: usize,
    /// Supabase project URL; when set, every saved wide table is also
    /// upserted into its `fundamentals_wide` table.
    pub supabase_url: Option<String>,
    /// Supabase API key used for publishing.
    pub supabase_key: Option<String>,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("user_agent", &self.user_agent)
            .field("store", &self.store)
            .field("long_path", &self.long_path)
            .field("wide_path", &self.wide_path)
            .field("sqlite_path", &self.sqlite_path)
            .field("config_path", &self.config_path)
            .field("concurrency", &self.concurrency)
            .field("supabase_url", &self.supabase_url)
            .field("supabase_key", &self.supabase_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            user_agent: None,
            store: StoreKind::Csv,
            long_path: PathBuf::from(DEFAULT_LONG_CSV),
            wide_path: PathBuf::from(DEFAULT_WIDE_CSV),
            sqlite_path: PathBuf::from(DEFAULT_SQLITE),
            config_path: None,
            concurrency: DEFAULT_CONCURRENCY,
            supabase_url: None,
            supabase_key: None,
        }
    }
}

impl Settings {
    /// Load settings from environment variables, reading a `.env` file first
    /// if one exists.
    ///
    /// | Variable | Setting |
    /// |---|---|
    /// | `FUNDAMENTALS_USER_AGENT`, else `SEC_API_USER_AGENT` | user agent |
    /// | `FUNDAMENTALS_STORE` | `csv` or `sqlite` |
    /// | `FUNDAMENTALS_LONG_CSV` | long CSV path |
    /// | `FUNDAMENTALS_WIDE_CSV` | wide CSV path |
    /// | `FUNDAMENTALS_SQLITE` | SQLite path |
    /// | `FUNDAMENTALS_CONFIG` | JSON configuration file |
    /// | `FUNDAMENTALS_CONCURRENCY` | concurrent fetches |
    /// | `SUPABASE_URL` | Supabase project to publish the wide table to |
    /// | `SUPABASE_SERVICE_ROLE_KEY`, else `SUPABASE_ANON_KEY` | Supabase API key |
    ///
    /// # Errors
    /// Returns [`FundamentalsError::InvalidParameter`] for an unknown store
    /// kind or a non-numeric concurrency.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve settings through an arbitrary variable lookup.
    ///
    /// # Errors
    /// See [`Settings::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let store = var("FUNDAMENTALS_STORE")
            .map(|v| v.parse())
            .transpose()?
            .unwrap_or(defaults.store);
        let concurrency = var("FUNDAMENTALS_CONCURRENCY")
            .map(|v| {
                v.trim().parse::<usize>().map_err(|_| {
                    FundamentalsError::InvalidParameter(format!("Invalid concurrency: {v}"))
                })
            })
            .transpose()?
            .unwrap_or(defaults.concurrency);

        let settings = Self {
            user_agent: var("FUNDAMENTALS_USER_AGENT").or_else(|| var("SEC_API_USER_AGENT")),
            store,
            long_path: var("FUNDAMENTALS_LONG_CSV")
                .map(PathBuf::from)
                .unwrap_or(defaults.long_path),
            wide_path: var("FUNDAMENTALS_WIDE_CSV")
                .map(PathBuf::from)
                .unwrap_or(defaults.wide_path),
            sqlite_path: var("FUNDAMENTALS_SQLITE")
                .map(PathBuf::from)
                .unwrap_or(defaults.sqlite_path),
            config_path: var("FUNDAMENTALS_CONFIG").map(PathBuf::from),
            concurrency: concurrency.max(1),
            supabase_url: var("SUPABASE_URL"),
            supabase_key: var("SUPABASE_SERVICE_ROLE_KEY").or_else(|| var("SUPABASE_ANON_KEY")),
        };
        debug!(?settings, "Resolved settings");
        Ok(settings)
    }

    /// Loads the reconciliation configuration, falling back to the built-in
    /// catalog and roster when no file is configured.
    ///
    /// # Errors
    /// Returns [`FundamentalsError::Storage`] if the file cannot be read and
    /// [`FundamentalsError::Parse`] if it is not a valid configuration.
    pub fn reconcile_config(&self) -> Result<ReconcileConfig> {
        match &self.config_path {
            None => Ok(ReconcileConfig::default()),
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    FundamentalsError::Storage(format!("{}: {e}", path.display()))
                })?;
                ReconcileConfig::from_json(&text)
            }
        }
    }

    /// Opens the configured store, wrapped in a Supabase publisher when a
    /// Supabase URL is set.
    ///
    /// # Errors
    /// Returns an error if the SQLite database cannot be opened, if SQLite
    /// was requested without the `store-sqlite` feature, or if a Supabase URL
    /// is set without a key or without the `store-supabase` feature.
    pub fn open_store(&self) -> Result<Arc<dyn TableStore>> {
        let store = self.open_base_store()?;
        match &self.supabase_url {
            None => Ok(store),
            Some(url) => self.publishing(store, url),
        }
    }

    #[cfg(feature = "store-supabase")]
    fn publishing(&self, store: Arc<dyn TableStore>, url: &str) -> Result<Arc<dyn TableStore>> {
        let Some(key) = self.supabase_key.as_deref() else {
            return Err(FundamentalsError::InvalidParameter(
                "SUPABASE_URL is set but SUPABASE_SERVICE_ROLE_KEY is not".to_string(),
            ));
        };
        Ok(Arc::new(fundamentals_store::SupabaseStore::new(
            store, url, key,
        )?))
    }

    #[cfg(not(feature = "store-supabase"))]
    fn publishing(&self, _store: Arc<dyn TableStore>, _url: &str) -> Result<Arc<dyn TableStore>> {
        Err(FundamentalsError::InvalidParameter(
            "Supabase support is not compiled in".to_string(),
        ))
    }

    fn open_base_store(&self) -> Result<Arc<dyn TableStore>> {
        match self.store {
            StoreKind::Csv => Ok(Arc::new(CsvStore::new(&self.long_path, &self.wide_path))),
            #[cfg(feature = "store-sqlite")]
            StoreKind::Sqlite => Ok(Arc::new(fundamentals_store::SqliteStore::new(
                &self.sqlite_path,
            )?)),
            #[cfg(not(feature = "store-sqlite"))]
            StoreKind::Sqlite => Err(FundamentalsError::InvalidParameter(
                "SQLite support is not compiled in".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_user_agent_fallback() {
        let settings =
            Settings::from_lookup(lookup(&[("SEC_API_USER_AGENT", "me@example.com")])).unwrap();
        assert_eq!(settings.user_agent.as_deref(), Some("me@example.com"));

        let settings = Settings::from_lookup(lookup(&[
            ("SEC_API_USER_AGENT", "me@example.com"),
            ("FUNDAMENTALS_USER_AGENT", "App/1.0 (app@example.com)"),
        ]))
        .unwrap();
        assert_eq!(
            settings.user_agent.as_deref(),
            Some("App/1.0 (app@example.com)")
        );
    }

    #[test]
    fn test_overrides() {
        let settings = Settings::from_lookup(lookup(&[
            ("FUNDAMENTALS_STORE", "SQLite"),
            ("FUNDAMENTALS_LONG_CSV", "data/long.csv"),
            ("FUNDAMENTALS_CONCURRENCY", "0"),
        ]))
        .unwrap();

        assert_eq!(settings.store, StoreKind::Sqlite);
        assert_eq!(settings.long_path, PathBuf::from("data/long.csv"));
        assert_eq!(settings.concurrency, 1);
    }

    #[test]
    fn test_invalid_values() {
        assert!(Settings::from_lookup(lookup(&[("FUNDAMENTALS_STORE", "parquet")])).is_err());
        assert!(Settings::from_lookup(lookup(&[("FUNDAMENTALS_CONCURRENCY", "many")])).is_err());
    }

    #[test]
    fn test_reconcile_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"fiscal_years": {"min": 2015}}"#).unwrap();

        let settings = Settings {
            config_path: Some(path),
            ..Settings::default()
        };
        let config = settings.reconcile_config().unwrap();
        assert_eq!(config.fiscal_years.min, Some(2015));
        assert_eq!(config.roster.entities().len(), 10);
    }

    #[test]
    fn test_supabase_key_fallback_and_redaction() {
        let settings = Settings::from_lookup(lookup(&[
            ("SUPABASE_URL", "https://project.supabase.co"),
            ("SUPABASE_ANON_KEY", "anon-key"),
        ]))
        .unwrap();
        assert_eq!(settings.supabase_key.as_deref(), Some("anon-key"));
        assert!(!format!("{settings:?}").contains("anon-key"));

        let settings = Settings::from_lookup(lookup(&[
            ("SUPABASE_ANON_KEY", "anon-key"),
            ("SUPABASE_SERVICE_ROLE_KEY", "service-key"),
        ]))
        .unwrap();
        assert_eq!(settings.supabase_key.as_deref(), Some("service-key"));
    }

    #[test]
    fn test_supabase_url_without_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            long_path: dir.path().join("long.csv"),
            wide_path: dir.path().join("wide.csv"),
            supabase_url: Some("https://project.supabase.co".to_string()),
            ..Settings::default()
        };
        assert!(matches!(
            settings.open_store(),
            Err(FundamentalsError::InvalidParameter(_))
        ));
    }

    #[tokio::test]
    async fn test_open_store_publishes_wide_table() {
        use fundamentals_core::{Period, Ticker, WideRow, WideTable};
        use wiremock::matchers::{method, path, query_param};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rest/v1/fundamentals_wide"))
            .and(query_param("on_conflict", "ticker,fiscal_year,period"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            long_path: dir.path().join("long.csv"),
            wide_path: dir.path().join("wide.csv"),
            supabase_url: Some(server.uri()),
            supabase_key: Some("service-key".to_string()),
            ..Settings::default()
        };
        let store = settings.open_store().unwrap();
        assert!(store.describe().contains("supabase"));

        let wide = WideTable {
            metrics: vec!["Revenue".to_string()],
            rows: vec![WideRow {
                ticker: Ticker::new("AXON"),
                fiscal_year: 2024,
                period: Period::FiscalYear,
                values: vec![Some(2080.0)],
            }],
        };
        store.save_wide(&wide).await.unwrap();

        assert!(dir.path().join("wide.csv").exists());
        server.verify().await;
    }
}
