//! End-to-end incremental update: load, fetch, reconcile, persist.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use fundamentals_core::{
    ChangeReport, EntityWindow, FetchWindow, FilingsProvider, KeyBuilder, LoadedTable, LongTable,
    RawRecord, ReconcileConfig, Result, Roster, TableStore, Ticker, WideTable, project, reconcile,
};

/// Default number of entities fetched concurrently.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// An entity whose fetch failed during an update.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FailedEntity {
    /// Entity ticker.
    pub ticker: Ticker,
    /// Rendered error.
    pub error: String,
}

/// Outcome of one [`Updater::update`] run.
#[derive(Clone, Debug, Serialize)]
pub struct UpdateSummary {
    /// Provider the candidates came from.
    pub provider: String,
    /// Store the tables were loaded from and saved to.
    pub store: String,
    /// Records in the stored long table before the run.
    pub base_records: usize,
    /// Raw candidates fetched across all entities.
    pub fetched: usize,
    /// Candidates that could not be normalized.
    pub rejected: usize,
    /// Stored rows that could not be normalized and were dropped.
    pub stored_rejected: usize,
    /// Duplicate stored rows removed while loading.
    pub duplicates_cleaned: usize,
    /// Candidates dropped by the fetch window.
    pub filtered_by_window: usize,
    /// Records in the long table after the run.
    pub records: usize,
    /// Rows in the regenerated wide table.
    pub wide_rows: usize,
    /// Entities whose fetch failed.
    pub failed_entities: Vec<FailedEntity>,
    /// Whether the long table was written.
    pub long_saved: bool,
    /// Whether the wide table was written.
    pub wide_saved: bool,
    /// Whether persistence was skipped.
    pub dry_run: bool,
    /// What changed.
    pub report: ChangeReport,
}

/// Loads and cleans the stored long table, logging what was dropped.
async fn load_base(store: &dyn TableStore, roster: &Roster) -> Result<LoadedTable> {
    let rows = store.load_long().await?;
    let loaded = LongTable::load(rows, &KeyBuilder::with_roster(roster));

    for rejected in &loaded.rejected {
        warn!(
            ticker = %rejected.raw.ticker,
            metric = %rejected.raw.metric,
            reason = %rejected.reason,
            "Dropped malformed stored row"
        );
    }
    if loaded.duplicates_removed > 0 {
        warn!(
            duplicates = loaded.duplicates_removed,
            "Stored long table contained duplicate keys"
        );
    }
    Ok(loaded)
}

/// Regenerates the wide table from the long table in `store` without
/// fetching anything. Nothing is written when the long table is empty or
/// `dry_run` is set.
///
/// # Errors
/// Returns an error if the store cannot be read or written.
#[instrument(skip(store, config), fields(store = %store.describe()))]
pub async fn rebuild_wide(
    store: &dyn TableStore,
    config: &ReconcileConfig,
    dry_run: bool,
) -> Result<WideTable> {
    let loaded = load_base(store, &config.roster).await?;
    let wide = project(&loaded.table, &config.catalog);

    if loaded.table.is_empty() {
        info!("Long table is empty; nothing to rebuild");
    } else if dry_run {
        info!(rows = wide.len(), "Dry run; wide table not written");
    } else {
        store.save_wide(&wide).await?;
        info!(rows = wide.len(), "Rebuilt wide table");
    }
    Ok(wide)
}

/// Runs incremental updates of a fundamentals dataset.
///
/// An updater pairs one [`FilingsProvider`] with one [`TableStore`]. Each
/// [`update`](Updater::update) loads the stored long table, asks the provider
/// for filings newer than each entity's latest stored filing, reconciles the
/// candidates and writes the result back.
///
/// # Example
///
/// ```rust,ignore
/// use fundamentals::{EdgarProvider, InMemoryStore, Updater};
/// use std::sync::Arc;
///
/// let provider = EdgarProvider::new("MyApp/1.0 (contact@example.com)")?;
/// let updater = Updater::new(Arc::new(provider), Arc::new(InMemoryStore::new()))
///     .with_concurrency(2);
/// let summary = updater.update().await?;
/// println!("{}", summary.report.totals);
/// ```
pub struct Updater {
    provider: Arc<dyn FilingsProvider>,
    store: Arc<dyn TableStore>,
    config: ReconcileConfig,
    concurrency: usize,
    dry_run: bool,
}

impl std::fmt::Debug for Updater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Updater")
            .field("provider", &self.provider.name())
            .field("store", &self.store.describe())
            .field("entities", &self.config.roster.entities().len())
            .field("metrics", &self.config.catalog.len())
            .field("fiscal_years", &self.config.fiscal_years)
            .field("concurrency", &self.concurrency)
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

impl Updater {
    /// Create an updater with the default configuration.
    #[must_use]
    pub fn new(provider: Arc<dyn FilingsProvider>, store: Arc<dyn TableStore>) -> Self {
        Self {
            provider,
            store,
            config: ReconcileConfig::default(),
            concurrency: DEFAULT_CONCURRENCY,
            dry_run: false,
        }
    }

    /// Set the catalog, roster and fiscal-year window.
    #[must_use]
    pub fn with_config(mut self, config: ReconcileConfig) -> Self {
        self.config = config;
        self
    }

    /// Set how many entities are fetched concurrently (at least one).
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Skip all writes to the store.
    #[must_use]
    pub const fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Returns the active configuration.
    #[must_use]
    pub const fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Fetches every window, keeping roster order. Failed entities are
    /// collected instead of aborting the run.
    async fn fetch_all(&self, windows: Vec<EntityWindow>) -> (Vec<RawRecord>, Vec<FailedEntity>) {
        let results: Vec<_> = stream::iter(windows)
            .map(|window| {
                let provider = Arc::clone(&self.provider);
                let catalog = &self.config.catalog;
                async move {
                    let result = provider.fetch_entity(&window, catalog).await;
                    (window.ticker, result)
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut candidates = Vec::new();
        let mut failed = Vec::new();
        for (ticker, result) in results {
            match result {
                Ok(records) => {
                    debug!(%ticker, records = records.len(), "Fetched entity");
                    candidates.extend(records);
                }
                Err(e) => {
                    warn!(%ticker, error = %e, "Entity fetch failed");
                    failed.push(FailedEntity {
                        ticker,
                        error: e.to_string(),
                    });
                }
            }
        }
        (candidates, failed)
    }

    /// Runs one incremental update.
    ///
    /// The long table is written only when it changed or when loading it
    /// removed duplicates or malformed rows. The wide table is regenerated
    /// whenever the long table is non-empty or was written, so the two never
    /// disagree. Nothing is written in a dry run.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read or written, or if the
    /// reconciliation detects an engine invariant violation. Failed entity
    /// fetches are reported in [`UpdateSummary::failed_entities`] instead.
    #[instrument(skip(self), fields(provider = self.provider.name(), dry_run = self.dry_run))]
    pub async fn update(&self) -> Result<UpdateSummary> {
        let loaded = load_base(self.store.as_ref(), &self.config.roster).await?;
        let base = &loaded.table;
        info!(records = base.len(), store = %self.store.describe(), "Loaded long table");

        let windows = FetchWindow::from_table(base)
            .with_fiscal_years(self.config.fiscal_years)
            .plan(&self.config.roster);
        let (candidates, failed_entities) = self.fetch_all(windows).await;
        let fetched = candidates.len();
        info!(
            fetched,
            failed = failed_entities.len(),
            "Fetched candidate filings"
        );

        let reconciliation = reconcile(&self.config, base, candidates)?;
        for rejected in &reconciliation.rejected {
            warn!(
                ticker = %rejected.raw.ticker,
                metric = %rejected.raw.metric,
                reason = %rejected.reason,
                "Rejected candidate"
            );
        }

        let write_long = reconciliation.changed() || loaded.was_cleaned();
        let write_wide = write_long || !reconciliation.table.is_empty();
        let long_saved = write_long && !self.dry_run;
        let wide_saved = write_wide && !self.dry_run;

        if long_saved {
            self.store.save_long(&reconciliation.table).await?;
            info!(records = reconciliation.table.len(), "Saved long table");
        } else if !write_long {
            info!("No new filings; long table unchanged");
        }
        if wide_saved {
            self.store.save_wide(&reconciliation.wide).await?;
            info!(rows = reconciliation.wide.len(), "Saved wide table");
        }
        if self.dry_run {
            info!(write_long, write_wide, "Dry run; nothing written");
        }

        reconciliation.report.log();

        Ok(UpdateSummary {
            provider: self.provider.name().to_string(),
            store: self.store.describe(),
            base_records: base.len(),
            fetched,
            rejected: reconciliation.rejected.len(),
            stored_rejected: loaded.rejected.len(),
            duplicates_cleaned: loaded.duplicates_removed,
            filtered_by_window: reconciliation.filtered_by_window,
            records: reconciliation.table.len(),
            wide_rows: reconciliation.wide.len(),
            failed_entities,
            long_saved,
            wide_saved,
            dry_run: self.dry_run,
            report: reconciliation.report,
        })
    }

    /// Regenerates the wide table from the stored long table without
    /// fetching anything. See [`rebuild_wide`].
    ///
    /// # Errors
    /// Returns an error if the store cannot be read or written.
    pub async fn rebuild_wide(&self) -> Result<WideTable> {
        rebuild_wide(self.store.as_ref(), &self.config, self.dry_run).await
    }
}
