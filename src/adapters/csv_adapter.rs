//! CSV file data adapter.
//!
//! One `<SYMBOL>.csv` per symbol. Columns are matched by header name:
//! `datetime`, `open`, `high`, `low`, `close`, `volume` are required,
//! `adj_close` is optional, and every other column is a feature. Rows are
//! returned in file order; ordering problems are for the guard to report.
//!
//! Timestamps with an offset are taken as written. Naive and date-only
//! timestamps are local times in the adapter's market zone.

use crate::domain::bar::Bar;
use crate::domain::error::ForecastError;
use crate::ports::data_port::DataPort;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

const EXTENSION: &str = ".csv";

pub struct CsvAdapter {
    base_path: PathBuf,
    timezone: Tz,
}

struct Columns {
    datetime: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    adj_close: Option<usize>,
    volume: usize,
    features: Vec<(usize, String)>,
}

impl Columns {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self, ForecastError> {
        let find = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
        };
        let require = |name: &str| {
            find(name).ok_or_else(|| ForecastError::Data {
                reason: format!("missing {name} column"),
            })
        };
        let datetime = require("datetime")?;
        let open = require("open")?;
        let high = require("high")?;
        let low = require("low")?;
        let close = require("close")?;
        let volume = require("volume")?;
        let adj_close = find("adj_close");

        let reserved = [
            Some(datetime),
            Some(open),
            Some(high),
            Some(low),
            Some(close),
            Some(volume),
            adj_close,
        ];
        let features = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| !reserved.contains(&Some(*i)))
            .map(|(i, h)| (i, h.trim().to_string()))
            .collect();

        Ok(Columns {
            datetime,
            open,
            high,
            low,
            close,
            adj_close,
            volume,
            features,
        })
    }
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self {
            base_path,
            timezone: Tz::UTC,
        }
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    fn csv_path(&self, symbol: &str) -> PathBuf {
        self.base_path.join(format!("{symbol}{EXTENSION}"))
    }
}

pub fn parse_timestamp(raw: &str, timezone: Tz) -> Result<DateTime<Utc>, ForecastError> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| ForecastError::Data {
            reason: format!("invalid datetime {raw:?}"),
        })?;
    // Ambiguous fall-back times resolve to the first occurrence.
    timezone
        .from_local_datetime(&naive)
        .earliest()
        .map(|ts| ts.with_timezone(&Utc))
        .ok_or_else(|| ForecastError::Data {
            reason: format!("datetime {raw:?} does not exist in {timezone}"),
        })
}

fn parse_value(record: &csv::StringRecord, index: usize, name: &str) -> Result<f64, ForecastError> {
    let raw = record.get(index).ok_or_else(|| ForecastError::Data {
        reason: format!("missing {name} value"),
    })?;
    raw.trim().parse().map_err(|e| ForecastError::Data {
        reason: format!("invalid {name} value {raw:?}: {e}"),
    })
}

/// Blank and NaN cells are absent rather than errors.
fn optional_value(record: &csv::StringRecord, index: usize) -> Option<f64> {
    record
        .get(index)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|v| !v.is_nan())
}

impl DataPort for CsvAdapter {
    fn fetch_bars(&self, symbol: &str) -> Result<Vec<Bar>, ForecastError> {
        let path = self.csv_path(symbol);
        let content = fs::read_to_string(&path).map_err(|e| ForecastError::Data {
            reason: format!("failed to read {}: {}", path.display(), e),
        })?;

        let mut rdr = csv::Reader::from_reader(content.as_bytes());
        let headers = rdr.headers().map_err(|e| ForecastError::Data {
            reason: format!("CSV header error in {}: {}", path.display(), e),
        })?;
        let columns = Columns::from_headers(headers)?;
        let mut bars = Vec::new();

        for result in rdr.records() {
            let record = result.map_err(|e| ForecastError::Data {
                reason: format!("CSV parse error in {}: {}", path.display(), e),
            })?;

            let raw_ts = record.get(columns.datetime).unwrap_or_default();
            let mut features = BTreeMap::new();
            for (index, name) in &columns.features {
                if let Some(value) = optional_value(&record, *index) {
                    features.insert(name.clone(), value);
                }
            }

            bars.push(Bar {
                timestamp: parse_timestamp(raw_ts, self.timezone)?,
                open: parse_value(&record, columns.open, "open")?,
                high: parse_value(&record, columns.high, "high")?,
                low: parse_value(&record, columns.low, "low")?,
                close: parse_value(&record, columns.close, "close")?,
                adj_close: columns.adj_close.and_then(|i| optional_value(&record, i)),
                volume: parse_value(&record, columns.volume, "volume")?,
                features,
            });
        }

        Ok(bars)
    }

    fn list_symbols(&self) -> Result<Vec<String>, ForecastError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| ForecastError::Data {
            reason: format!(
                "failed to read directory {}: {}",
                self.base_path.display(),
                e
            ),
        })?;

        let mut symbols = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ForecastError::Data {
                reason: format!("directory entry error: {}", e),
            })?;

            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            if let Some(symbol) = name_str.strip_suffix(EXTENSION) {
                symbols.push(symbol.to_string());
            }
        }

        symbols.sort();
        Ok(symbols)
    }
}
