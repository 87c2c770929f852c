//! CSV bar file reader.
//!
//! Expected header: `timestamp,open,high,low,close,volume`, with optional
//! `instrument` and `timeframe` columns. Files without those columns take the
//! adapter's defaults. Rows are returned in file order; ordering and OHLC
//! sanity are enforced later by the market window.

use crate::domain::error::EngineError;
use crate::domain::ohlcv::{Bar, Timeframe};
use chrono::{NaiveDate, NaiveDateTime};
use std::fs;
use std::path::Path;

const TIMESTAMP_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

pub struct CsvAdapter {
    instrument: String,
    timeframe: Timeframe,
}

struct Columns {
    timestamp: usize,
    instrument: Option<usize>,
    timeframe: Option<usize>,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    volume: usize,
}

fn source_error(reason: impl Into<String>) -> EngineError {
    EngineError::BarSource {
        reason: reason.into(),
    }
}

impl Columns {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self, EngineError> {
        let find = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
        };
        let require = |name: &str| {
            find(name).ok_or_else(|| source_error(format!("missing {} column", name)))
        };
        Ok(Columns {
            timestamp: require("timestamp")?,
            instrument: find("instrument"),
            timeframe: find("timeframe"),
            open: require("open")?,
            high: require("high")?,
            low: require("low")?,
            close: require("close")?,
            volume: require("volume")?,
        })
    }
}

pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

impl CsvAdapter {
    pub fn new(instrument: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            instrument: instrument.into(),
            timeframe,
        }
    }

    pub fn read_file<P: AsRef<Path>>(&self, path: P) -> Result<Vec<Bar>, EngineError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| source_error(format!("failed to read {}: {}", path.display(), e)))?;
        self.read_str(&content)
    }

    pub fn read_str(&self, content: &str) -> Result<Vec<Bar>, EngineError> {
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());
        let headers = rdr
            .headers()
            .map_err(|e| source_error(format!("CSV header error: {}", e)))?
            .clone();
        let cols = Columns::from_headers(&headers)?;

        let mut bars = Vec::new();
        for (i, result) in rdr.records().enumerate() {
            let line = i + 2;
            let record =
                result.map_err(|e| source_error(format!("CSV parse error at line {}: {}", line, e)))?;

            let field = |idx: usize, name: &str| {
                record
                    .get(idx)
                    .ok_or_else(|| source_error(format!("missing {} at line {}", name, line)))
            };
            let number = |idx: usize, name: &str| -> Result<f64, EngineError> {
                field(idx, name)?
                    .parse()
                    .map_err(|e| source_error(format!("invalid {} at line {}: {}", name, line, e)))
            };

            let raw_ts = field(cols.timestamp, "timestamp")?;
            let timestamp = parse_timestamp(raw_ts).ok_or_else(|| {
                source_error(format!("invalid timestamp '{}' at line {}", raw_ts, line))
            })?;
            let instrument = match cols.instrument.and_then(|c| record.get(c)) {
                Some(s) if !s.is_empty() => s.to_uppercase(),
                _ => self.instrument.clone(),
            };
            let timeframe: Timeframe = match cols.timeframe.and_then(|c| record.get(c)) {
                Some(s) if !s.is_empty() => s.parse().map_err(|e: String| {
                    source_error(format!("{} at line {}", e, line))
                })?,
                _ => self.timeframe,
            };

            bars.push(Bar {
                instrument,
                timeframe,
                timestamp,
                open: number(cols.open, "open")?,
                high: number(cols.high, "high")?,
                low: number(cols.low, "low")?,
                close: number(cols.close, "close")?,
                volume: number(cols.volume, "volume")?,
            });
        }

        Ok(bars)
    }
}
