//! `fundamentals` command-line interface.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use fundamentals::{EdgarProvider, FiscalYearWindow, Settings, StoreKind, Updater, rebuild_wide};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Debug, Parser)]
#[command(name = "fundamentals", version)]
#[command(about = "Keep long and wide SEC fundamentals tables up to date")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Storage backend (csv or sqlite).
    #[arg(long, global = true)]
    store: Option<StoreKind>,

    /// Long-format CSV path.
    #[arg(long, global = true, value_name = "PATH")]
    long: Option<PathBuf>,

    /// Wide-format CSV path.
    #[arg(long, global = true, value_name = "PATH")]
    wide: Option<PathBuf>,

    /// SQLite database path.
    #[arg(long, global = true, value_name = "PATH")]
    sqlite: Option<PathBuf>,

    /// JSON file with the metric catalog, roster and fiscal-year window.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Identifying user agent for SEC requests, e.g. "MyApp/1.0 (me@example.com)".
    #[arg(long, global = true)]
    user_agent: Option<String>,

    /// Earliest fiscal year to keep.
    #[arg(long, global = true)]
    min_fiscal_year: Option<i32>,

    /// Latest fiscal year to keep.
    #[arg(long, global = true)]
    max_fiscal_year: Option<i32>,

    /// Entities fetched concurrently.
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch new filings and update both tables.
    Update {
        /// Reconcile and report without writing anything.
        #[arg(long)]
        dry_run: bool,

        /// Print the update summary as JSON on stdout.
        #[arg(long)]
        json: bool,
    },
    /// Regenerate the wide table from the stored long table.
    RebuildWide {
        /// Project without writing anything.
        #[arg(long)]
        dry_run: bool,
    },
}

impl Cli {
    /// Layers command-line flags over the environment settings.
    fn settings(&self) -> Result<Settings> {
        let mut settings = Settings::from_env()?;
        if let Some(store) = self.store {
            settings.store = store;
        }
        if let Some(path) = &self.long {
            settings.long_path.clone_from(path);
        }
        if let Some(path) = &self.wide {
            settings.wide_path.clone_from(path);
        }
        if let Some(path) = &self.sqlite {
            settings.sqlite_path.clone_from(path);
        }
        if let Some(path) = &self.config {
            settings.config_path = Some(path.clone());
        }
        if let Some(user_agent) = &self.user_agent {
            settings.user_agent = Some(user_agent.clone());
        }
        if let Some(concurrency) = self.concurrency {
            settings.concurrency = concurrency.max(1);
        }
        Ok(settings)
    }

    fn fiscal_years(&self, configured: FiscalYearWindow) -> FiscalYearWindow {
        FiscalYearWindow {
            min: self.min_fiscal_year.or(configured.min),
            max: self.max_fiscal_year.or(configured.max),
        }
    }
}

fn init_logging(verbose: bool) -> Result<()> {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install tracing subscriber")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let settings = cli.settings()?;
    let config = settings.reconcile_config()?;
    let config = {
        let fiscal_years = cli.fiscal_years(config.fiscal_years);
        config.with_fiscal_years(fiscal_years)
    };
    if let (Some(min), Some(max)) = (config.fiscal_years.min, config.fiscal_years.max) {
        if min > max {
            bail!("minimum fiscal year {min} is after maximum fiscal year {max}");
        }
    }
    let store = settings.open_store()?;

    match cli.command {
        Command::Update { dry_run, json } => {
            let Some(user_agent) = settings.user_agent.as_deref() else {
                bail!(
                    "an SEC user agent is required: pass --user-agent or set FUNDAMENTALS_USER_AGENT"
                );
            };
            let provider = EdgarProvider::new(user_agent)?;
            let updater = Updater::new(Arc::new(provider), store)
                .with_config(config)
                .with_concurrency(settings.concurrency)
                .dry_run(dry_run);

            let summary = updater.update().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                info!(
                    changes = %summary.report.totals,
                    records = summary.records,
                    wide_rows = summary.wide_rows,
                    failed = summary.failed_entities.len(),
                    "Update complete"
                );
            }
        }
        Command::RebuildWide { dry_run } => {
            let wide = rebuild_wide(store.as_ref(), &config, dry_run).await?;
            info!(
                rows = wide.len(),
                columns = wide.metrics.len(),
                "Rebuild complete"
            );
        }
    }

    Ok(())
}
