//! CSV file storage for the long and wide tables.

use async_trait::async_trait;
use csv::ByteRecord;
use fundamentals_core::{
    FundamentalsError, LONG_COLUMNS, LongTable, RawFiscalYear, RawRecord, Result, TableStore,
    WideTable,
};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, warn};

/// One persisted long-table row, in the published column layout.
///
/// `Fiscal Year` is read as text so that `2025.0` written by other tools
/// normalizes like `2025`. Files using the older `GAAPTag` header are read
/// as well.
#[derive(Debug, Serialize, Deserialize)]
struct LongRow {
    #[serde(rename = "Ticker")]
    ticker: String,
    #[serde(rename = "CIK", default)]
    cik: String,
    #[serde(rename = "Metric")]
    metric: String,
    #[serde(rename = "SourceTag", alias = "GAAPTag", default)]
    source_tag: String,
    #[serde(rename = "Value")]
    value: Option<f64>,
    #[serde(rename = "Fiscal Year")]
    fiscal_year: Option<String>,
    #[serde(rename = "Period")]
    period: Option<String>,
    #[serde(rename = "Filing Date")]
    filing_date: Option<String>,
    #[serde(rename = "Form", default)]
    form: String,
    #[serde(rename = "Unit", default)]
    unit: String,
}

impl From<LongRow> for RawRecord {
    fn from(row: LongRow) -> Self {
        Self {
            ticker: row.ticker,
            cik: row.cik,
            metric: row.metric,
            source_tag: row.source_tag,
            value: row.value,
            fiscal_year: row.fiscal_year.map(RawFiscalYear::Text),
            period: row.period,
            filing_date: row.filing_date,
            form_type: row.form,
            unit: row.unit,
        }
    }
}

/// Long and wide tables stored as CSV files.
///
/// Every save writes a sibling temporary file and renames it into place, so
/// a failed save never leaves a half-written table behind.
#[derive(Debug, Clone)]
pub struct CsvStore {
    long_path: PathBuf,
    wide_path: PathBuf,
}

impl CsvStore {
    /// Create a store over the given long and wide CSV paths.
    pub fn new(long_path: impl Into<PathBuf>, wide_path: impl Into<PathBuf>) -> Self {
        Self {
            long_path: long_path.into(),
            wide_path: wide_path.into(),
        }
    }

    /// Path of the long CSV.
    #[must_use]
    pub fn long_path(&self) -> &Path {
        &self.long_path
    }

    /// Path of the wide CSV.
    #[must_use]
    pub fn wide_path(&self) -> &Path {
        &self.wide_path
    }
}

fn storage_error(path: &Path, e: impl std::fmt::Display) -> FundamentalsError {
    FundamentalsError::Storage(format!("{}: {e}", path.display()))
}

/// Recovers what it can from a row that does not fit the long layout.
///
/// The value is left empty so the row is rejected during normalization and
/// reported with the other malformed rows instead of failing the load.
fn malformed_row(headers: &ByteRecord, row: &ByteRecord) -> RawRecord {
    let field = |names: &[&str]| {
        headers
            .iter()
            .position(|h| names.iter().any(|name| h == name.as_bytes()))
            .and_then(|i| row.get(i))
            .map(|f| String::from_utf8_lossy(f).trim().to_string())
            .unwrap_or_default()
    };
    RawRecord {
        ticker: field(&["Ticker"]),
        cik: field(&["CIK"]),
        metric: field(&["Metric"]),
        source_tag: field(&["SourceTag", "GAAPTag"]),
        value: None,
        fiscal_year: Some(RawFiscalYear::Text(field(&["Fiscal Year"]))),
        period: Some(field(&["Period"])),
        filing_date: Some(field(&["Filing Date"])),
        form_type: field(&["Form"]),
        unit: field(&["Unit"]),
    }
}

/// Reads the long CSV; a missing file is an empty table.
///
/// Rows are decoded one at a time. A row with the wrong number of fields or
/// an undecodable cell is logged and handed on as a record that will be
/// rejected, so one bad row never costs the rest of the table.
fn read_long(path: &Path) -> Result<Vec<RawRecord>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No long table on disk yet");
            return Ok(Vec::new());
        }
        Err(e) => return Err(storage_error(path, e)),
    };

    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(file);
    let headers = reader
        .byte_headers()
        .map_err(|e| FundamentalsError::Parse(format!("{}: {e}", path.display())))?
        .clone();

    let mut rows = Vec::new();
    for row in reader.byte_records() {
        let row = row.map_err(|e| storage_error(path, e))?;
        let line = row.position().map(csv::Position::line);

        let decoded = if row.len() == headers.len() {
            row.deserialize::<LongRow>(Some(&headers))
                .map_err(|e| e.to_string())
        } else {
            Err(format!(
                "expected {} fields, found {}",
                headers.len(),
                row.len()
            ))
        };

        match decoded {
            Ok(long_row) => rows.push(RawRecord::from(long_row)),
            Err(reason) => {
                warn!(path = %path.display(), ?line, %reason, "Malformed long CSV row");
                rows.push(malformed_row(&headers, &row));
            }
        }
    }
    Ok(rows)
}

/// Writes through a temporary sibling file, then renames it over `path`.
fn write_atomically<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut csv::Writer<BufWriter<File>>) -> Result<()>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| storage_error(parent, e))?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let result = File::create(&tmp_path)
        .map_err(|e| storage_error(&tmp_path, e))
        .and_then(|file| {
            let mut writer = csv::Writer::from_writer(BufWriter::new(file));
            write(&mut writer)?;
            let mut inner = writer
                .into_inner()
                .map_err(|e| storage_error(&tmp_path, e.error()))?;
            inner.flush().map_err(|e| storage_error(&tmp_path, e))?;
            inner
                .get_ref()
                .sync_all()
                .map_err(|e| storage_error(&tmp_path, e))
        })
        .and_then(|()| fs::rename(&tmp_path, path).map_err(|e| storage_error(path, e)));

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

fn write_long(path: &Path, table: &LongTable) -> Result<()> {
    write_atomically(path, |writer| {
        writer
            .write_record(LONG_COLUMNS)
            .map_err(|e| storage_error(path, e))?;
        for record in table {
            let value = record.value.to_string();
            let fiscal_year = record.fiscal_year.to_string();
            let filing_date = record.filing_date.to_string();
            writer
                .write_record([
                    record.ticker.as_str(),
                    record.cik.as_str(),
                    record.metric.as_str(),
                    record.source_tag.as_str(),
                    value.as_str(),
                    fiscal_year.as_str(),
                    record.period.as_str(),
                    filing_date.as_str(),
                    record.form_type.as_str(),
                    record.unit.as_str(),
                ])
                .map_err(|e| storage_error(path, e))?;
        }
        Ok(())
    })
}

fn write_wide(path: &Path, table: &WideTable) -> Result<()> {
    write_atomically(path, |writer| {
        writer
            .write_record(table.header())
            .map_err(|e| storage_error(path, e))?;
        for row in &table.rows {
            let mut fields = Vec::with_capacity(3 + row.values.len());
            fields.push(row.ticker.to_string());
            fields.push(row.fiscal_year.to_string());
            fields.push(row.period.to_string());
            fields.extend(
                row.values
                    .iter()
                    .map(|v| v.map(|v| v.to_string()).unwrap_or_default()),
            );
            writer
                .write_record(&fields)
                .map_err(|e| storage_error(path, e))?;
        }
        Ok(())
    })
}

/// Runs blocking file work off the async executor.
async fn blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| FundamentalsError::Storage(format!("File task failed: {e}")))?
}

#[async_trait]
impl TableStore for CsvStore {
    fn describe(&self) -> String {
        format!(
            "csv ({}, {})",
            self.long_path.display(),
            self.wide_path.display()
        )
    }

    #[instrument(skip(self), fields(path = %self.long_path.display()))]
    async fn load_long(&self) -> Result<Vec<RawRecord>> {
        let path = self.long_path.clone();
        let rows = blocking(move || read_long(&path)).await?;
        debug!(rows = rows.len(), "Loaded long CSV");
        Ok(rows)
    }

    #[instrument(skip(self, table), fields(path = %self.long_path.display(), records = table.len()))]
    async fn save_long(&self, table: &LongTable) -> Result<()> {
        let path = self.long_path.clone();
        let table = table.clone();
        blocking(move || write_long(&path, &table)).await?;
        debug!("Saved long CSV");
        Ok(())
    }

    #[instrument(skip(self, table), fields(path = %self.wide_path.display(), rows = table.len()))]
    async fn save_wide(&self, table: &WideTable) -> Result<()> {
        let path = self.wide_path.clone();
        let table = table.clone();
        blocking(move || write_wide(&path, &table)).await?;
        debug!("Saved wide CSV");
        Ok(())
    }
}
