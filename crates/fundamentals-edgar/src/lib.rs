#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/fundamentals/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! SEC EDGAR filings provider.
//!
//! - CIK (Central Index Key) lookup from ticker symbols
//! - Company facts from the EDGAR XBRL API
//! - Extraction of cataloged US-GAAP facts into raw candidate records
//!
//! # Example
//!
//! ```no_run
//! use fundamentals_core::{FetchWindow, FilingsProvider, LongTable, MetricCatalog, Roster};
//! use fundamentals_edgar::EdgarProvider;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = EdgarProvider::new("MyApp/1.0 (contact@example.com)")?;
//!     let catalog = MetricCatalog::default();
//!
//!     for window in FetchWindow::from_table(&LongTable::new()).plan(&Roster::default()) {
//!         let records = provider.fetch_entity(&window, &catalog).await?;
//!         println!("{}: {} facts", window.ticker, records.len());
//!     }
//!
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use chrono::NaiveDate;
use fundamentals_core::{
    EntityWindow, FilingsProvider, FundamentalsError, MetricCatalog, RawFiscalYear, RawRecord,
    Result,
};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tokio::time::{Instant, sleep};
use tracing::{debug, instrument, warn};

/// SEC EDGAR API base URL
const EDGAR_BASE_URL: &str = "https://data.sec.gov";

/// SEC company tickers URL
const COMPANY_TICKERS_URL: &str = "https://www.sec.gov/files/company_tickers.json";

/// Default rate limit: 10 requests per second (SEC requirement)
const DEFAULT_RATE_LIMIT: Duration = Duration::from_millis(100);

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Taxonomy the catalog tags live in.
const US_GAAP: &str = "us-gaap";

/// Rate limiter to ensure we don't exceed SEC's rate limits
#[derive(Debug)]
struct RateLimiter {
    last_request: Instant,
    min_interval: Duration,
}

impl RateLimiter {
    fn new(min_interval: Duration) -> Self {
        Self {
            last_request: Instant::now() - min_interval,
            min_interval,
        }
    }

    async fn wait(&mut self) {
        let elapsed = self.last_request.elapsed();
        if elapsed < self.min_interval {
            sleep(self.min_interval - elapsed).await;
        }
        self.last_request = Instant::now();
    }
}

/// Retry behavior for EDGAR requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per request, including the first.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(3),
        }
    }
}

/// SEC EDGAR filings provider.
///
/// Implements rate limiting per SEC requirements (max 10 requests/second)
/// and retries transient failures according to its [`RetryPolicy`].
#[derive(Debug)]
pub struct EdgarProvider {
    client: reqwest::Client,
    rate_limiter: Arc<Mutex<RateLimiter>>,
    retry: RetryPolicy,
    tickers: OnceCell<HashMap<String, String>>,
}

impl EdgarProvider {
    /// Create a new EDGAR provider with the specified user agent.
    ///
    /// The SEC requires identifying user agent headers. Format should be:
    /// "AppName/Version (contact@email.com)"
    ///
    /// # Errors
    /// Returns [`FundamentalsError::InvalidParameter`] for an empty user
    /// agent and [`FundamentalsError::Network`] if the HTTP client cannot be
    /// built.
    pub fn new(user_agent: &str) -> Result<Self> {
        if user_agent.trim().is_empty() {
            return Err(FundamentalsError::InvalidParameter(
                "SEC requests need an identifying user agent".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| FundamentalsError::Network(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self::with_client(client))
    }

    /// Create a new EDGAR provider with a custom HTTP client.
    ///
    /// The client must already carry an identifying user agent.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            rate_limiter: Arc::new(Mutex::new(RateLimiter::new(DEFAULT_RATE_LIMIT))),
            retry: RetryPolicy::default(),
            tickers: OnceCell::new(),
        }
    }

    /// Sets the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sends a rate-limited GET, retrying network errors and non-success
    /// statuses. A 404 is returned immediately as
    /// [`FundamentalsError::SymbolNotFound`].
    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let attempts = self.retry.max_attempts.max(1);
        let mut last_error = FundamentalsError::Network(format!("No attempt made for {url}"));

        for attempt in 1..=attempts {
            self.rate_limiter.lock().await.wait().await;

            debug!(url, attempt, "Requesting");
            match self.client.get(url).send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) if response.status() == reqwest::StatusCode::NOT_FOUND => {
                    return Err(FundamentalsError::SymbolNotFound(url.to_string()));
                }
                Ok(response) if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS => {
                    let retry_after = response
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.trim().parse::<u64>().ok())
                        .map(Duration::from_secs);
                    warn!(url, attempt, ?retry_after, "Rate limited by SEC");
                    last_error = FundamentalsError::RateLimited {
                        provider: self.name().to_string(),
                        retry_after,
                    };
                }
                Ok(response) => {
                    warn!(url, attempt, status = %response.status(), "Request failed");
                    last_error = FundamentalsError::Network(format!(
                        "{url} returned HTTP {}",
                        response.status()
                    ));
                }
                Err(e) => {
                    warn!(url, attempt, error = %e, "Request error");
                    last_error = FundamentalsError::Network(e.to_string());
                }
            }

            if attempt < attempts {
                sleep(self.retry.backoff).await;
            }
        }

        Err(last_error)
    }

    /// Downloads and indexes the SEC ticker-to-CIK map, once per provider.
    async fn ticker_map(&self) -> Result<&HashMap<String, String>> {
        self.tickers
            .get_or_try_init(|| async {
                debug!("Fetching company tickers from SEC");
                let data: HashMap<String, CompanyTickerInfo> = self
                    .get(COMPANY_TICKERS_URL)
                    .await?
                    .json()
                    .await
                    .map_err(|e| {
                        FundamentalsError::Parse(format!("Failed to parse company tickers: {e}"))
                    })?;

                Ok::<_, FundamentalsError>(
                    data.into_values()
                        .map(|c| (c.ticker.to_uppercase(), pad_cik(&c.cik_str.to_string())))
                        .collect(),
                )
            })
            .await
    }

    /// Look up a company's CIK number from its ticker symbol.
    ///
    /// Returns the CIK as a zero-padded 10-digit string.
    ///
    /// # Errors
    /// Returns [`FundamentalsError::SymbolNotFound`] if the SEC does not list
    /// the ticker.
    #[instrument(skip(self))]
    pub async fn get_cik(&self, ticker: &str) -> Result<String> {
        let ticker = ticker.trim().to_uppercase();
        if ticker.is_empty() {
            return Err(FundamentalsError::InvalidParameter("Empty ticker".to_string()));
        }

        let cik = self
            .ticker_map()
            .await?
            .get(&ticker)
            .cloned()
            .ok_or_else(|| FundamentalsError::SymbolNotFound(ticker.clone()))?;
        debug!(%ticker, %cik, "Resolved CIK");
        Ok(cik)
    }

    /// Fetch the company-facts document of a CIK.
    ///
    /// # Errors
    /// Returns a network, rate-limit or parse error if the document cannot
    /// be retrieved after all retries.
    #[instrument(skip(self))]
    pub async fn fetch_company_facts(&self, cik: &str) -> Result<CompanyFacts> {
        let url = format!(
            "{}/api/xbrl/companyfacts/CIK{}.json",
            EDGAR_BASE_URL,
            pad_cik(cik)
        );

        self.get(&url)
            .await?
            .json()
            .await
            .map_err(|e| FundamentalsError::Parse(format!("Failed to parse company facts: {e}")))
    }
}

#[async_trait]
impl FilingsProvider for EdgarProvider {
    fn name(&self) -> &str {
        "SEC EDGAR"
    }

    #[instrument(skip(self, window, catalog), fields(ticker = %window.ticker))]
    async fn fetch_entity(
        &self,
        window: &EntityWindow,
        catalog: &MetricCatalog,
    ) -> Result<Vec<RawRecord>> {
        let cik = match &window.cik {
            Some(cik) => pad_cik(cik),
            None => self.get_cik(window.ticker.as_str()).await?,
        };

        let facts = self.fetch_company_facts(&cik).await?;
        let records = extract_records(&facts, window, &cik, catalog);
        debug!(
            entity = %facts.entity_name,
            records = records.len(),
            since = ?window.since,
            "Extracted candidate facts"
        );
        Ok(records)
    }
}

/// Zero-pads a numeric CIK to ten digits.
fn pad_cik(cik: &str) -> String {
    format!("{:0>10}", cik.trim())
}

fn parse_date(date: Option<&str>) -> Option<NaiveDate> {
    date.and_then(|d| NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").ok())
}

/// Picks one fact per `(fy, fp, filed)` group of a unit series.
///
/// A filing reports its own period next to prior-period comparatives under
/// the same fiscal year, period and filing date. The fact with the latest
/// `end` is the one describing the filing's own period; among equal `end`
/// dates the later fact in the series wins. Returns the indices of the
/// chosen facts.
fn current_period_facts(values: &[FactValue]) -> HashSet<usize> {
    let mut chosen: HashMap<(Option<i64>, Option<&str>, Option<&str>), usize> = HashMap::new();
    for (index, fact) in values.iter().enumerate() {
        let group = (fact.fy, fact.fp.as_deref(), fact.filed.as_deref());
        chosen
            .entry(group)
            .and_modify(|current| {
                if parse_date(fact.end.as_deref()) >= parse_date(values[*current].end.as_deref()) {
                    *current = index;
                }
            })
            .or_insert(index);
    }
    chosen.into_values().collect()
}

/// Turns a company-facts document into raw candidate records.
///
/// For every cataloged tag present in the `us-gaap` taxonomy one unit
/// series is chosen with [`MetricCatalog::pick_unit`], and each of its facts
/// becomes a record filed on the fact's `filed` date. Prior-period
/// comparatives repeated inside a filing are dropped in favour of the fact
/// with the latest `end` date. Facts the window rules out (filed on or
/// before its cursor, or outside its fiscal-year bounds) are dropped. Facts whose filing date cannot be read are passed through for
/// the engine to reject.
#[must_use]
pub fn extract_records(
    facts: &CompanyFacts,
    window: &EntityWindow,
    cik: &str,
    catalog: &MetricCatalog,
) -> Vec<RawRecord> {
    let Some(taxonomy) = facts.facts.get(US_GAAP) else {
        debug!(ticker = %window.ticker, "No us-gaap facts");
        return Vec::new();
    };

    let mut records = Vec::new();
    for metric in catalog.metrics() {
        for tag in &metric.tags {
            let Some(units) = taxonomy.get(tag).and_then(|t| t.units.as_ref()) else {
                continue;
            };
            let Some(unit) = catalog.pick_unit(tag, units.keys().map(String::as_str)) else {
                continue;
            };
            let Some(values) = units.get(&unit) else {
                continue;
            };

            let winners = current_period_facts(values);
            for (index, fact) in values.iter().enumerate() {
                if !winners.contains(&index) {
                    continue;
                }
                let filed = parse_date(fact.filed.as_deref());
                let fiscal_year = fact.fy.and_then(|fy| i32::try_from(fy).ok());
                if filed.is_some_and(|filed| !window.admits(filed, fiscal_year)) {
                    continue;
                }

                records.push(RawRecord {
                    ticker: window.ticker.to_string(),
                    cik: cik.to_string(),
                    metric: metric.name.clone(),
                    source_tag: tag.clone(),
                    value: fact.val,
                    fiscal_year: fact.fy.map(RawFiscalYear::Integer),
                    period: fact.fp.clone(),
                    filing_date: fact.filed.clone(),
                    form_type: fact.form.clone().unwrap_or_default(),
                    unit: unit.clone(),
                });
            }
        }
    }

    records
}

// =============================================================================
// SEC API Response Types
// =============================================================================

/// Company ticker info from SEC.
#[derive(Debug, Deserialize)]
struct CompanyTickerInfo {
    /// CIK number
    cik_str: u64,
    /// Ticker symbol
    ticker: String,
}

/// Company facts document from the EDGAR XBRL API.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyFacts {
    /// Company name.
    #[serde(default)]
    pub entity_name: String,
    /// Facts by taxonomy (`us-gaap`, `dei`, ...) and then by tag.
    #[serde(default)]
    pub facts: HashMap<String, HashMap<String, TagFacts>>,
}

/// All reported values of one taxonomy tag.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TagFacts {
    /// Label.
    #[serde(default)]
    pub label: Option<String>,
    /// Values by unit (`USD`, `shares`, ...).
    #[serde(default)]
    pub units: Option<HashMap<String, Vec<FactValue>>>,
}

/// A single fact value with filing metadata.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FactValue {
    /// End date of the measured period.
    #[serde(default)]
    pub end: Option<String>,
    /// Value.
    #[serde(default)]
    pub val: Option<f64>,
    /// Accession number.
    #[serde(default)]
    pub accn: Option<String>,
    /// Fiscal year of the filing.
    #[serde(default)]
    pub fy: Option<i64>,
    /// Fiscal period of the filing (`FY`, `Q1` ...).
    #[serde(default)]
    pub fp: Option<String>,
    /// Form type.
    #[serde(default)]
    pub form: Option<String>,
    /// Filing date.
    #[serde(default)]
    pub filed: Option<String>,
}

// =============================================================================
// Tests
// =============================================================================
