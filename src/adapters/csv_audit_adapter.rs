//! CSV audit trail: one row per decision cycle in `cycles.csv` and one row
//! per closed position in `trades.csv`.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::domain::cycle::{CycleOutcome, CycleRecord};
use crate::domain::error::EngineError;
use crate::domain::position::ClosedPosition;
use crate::ports::audit_port::AuditPort;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const CYCLE_HEADER: [&str; 11] = [
    "timestamp",
    "instrument",
    "timeframe",
    "stage",
    "outcome",
    "direction",
    "strength",
    "prediction_bias",
    "prediction_confidence",
    "prediction_error",
    "actions",
];

const TRADE_HEADER: [&str; 10] = [
    "id",
    "instrument",
    "direction",
    "volume",
    "entry_price",
    "exit_price",
    "opened_at",
    "closed_at",
    "reason",
    "realized_pnl",
];

fn audit_error(reason: impl Into<String>) -> EngineError {
    EngineError::Audit {
        reason: reason.into(),
    }
}

pub struct CsvAuditAdapter {
    dir: PathBuf,
    cycles: Mutex<csv::Writer<File>>,
    trades: Mutex<csv::Writer<File>>,
}

impl CsvAuditAdapter {
    /// Opens (or creates) the audit files under `dir`. Existing files are
    /// appended to; headers are only written to empty files.
    pub fn create<P: AsRef<Path>>(dir: P) -> Result<Self, EngineError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let cycles = Self::open_writer(&dir.join("cycles.csv"), &CYCLE_HEADER)?;
        let trades = Self::open_writer(&dir.join("trades.csv"), &TRADE_HEADER)?;
        Ok(Self {
            dir,
            cycles: Mutex::new(cycles),
            trades: Mutex::new(trades),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn open_writer(path: &Path, header: &[&str]) -> Result<csv::Writer<File>, EngineError> {
        let has_data = fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if !has_data {
            writer
                .write_record(header)
                .map_err(|e| audit_error(format!("{}: {}", path.display(), e)))?;
        }
        Ok(writer)
    }

    fn write(writer: &Mutex<csv::Writer<File>>, row: &[String]) -> Result<(), EngineError> {
        let mut w = writer.lock().unwrap_or_else(|e| e.into_inner());
        w.write_record(row).map_err(|e| audit_error(e.to_string()))
    }
}

fn opt(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn cycle_row(record: &CycleRecord) -> Vec<String> {
    let outcome = match &record.outcome {
        CycleOutcome::Completed => "completed".to_string(),
        CycleOutcome::Skipped { reason, .. } => format!("skipped: {}", reason),
    };
    let actions: Vec<String> = record.actions.iter().map(|a| a.to_string()).collect();
    vec![
        record.timestamp.format(TIMESTAMP_FORMAT).to_string(),
        record.key.instrument.clone(),
        record.key.timeframe.to_string(),
        record.stage.to_string(),
        outcome,
        record
            .signal
            .as_ref()
            .map(|s| s.direction.to_string())
            .unwrap_or_default(),
        opt(record.signal.as_ref().map(|s| s.strength)),
        opt(record.prediction.map(|p| p.bias())),
        opt(record.prediction.map(|p| p.confidence())),
        record.prediction_error.clone().unwrap_or_default(),
        actions.join("; "),
    ]
}

fn trade_row(closed: &ClosedPosition) -> Vec<String> {
    let p = &closed.position;
    vec![
        p.id.to_string(),
        p.instrument.clone(),
        p.direction.to_string(),
        p.volume.to_string(),
        p.entry_price.to_string(),
        closed.exit_price.to_string(),
        p.opened_at.format(TIMESTAMP_FORMAT).to_string(),
        closed.closed_at.format(TIMESTAMP_FORMAT).to_string(),
        closed.reason.to_string(),
        format!("{:.2}", closed.realized_pnl),
    ]
}

impl AuditPort for CsvAuditAdapter {
    fn record_cycle(&self, record: &CycleRecord) -> Result<(), EngineError> {
        Self::write(&self.cycles, &cycle_row(record))
    }

    fn record_closed(&self, closed: &ClosedPosition) -> Result<(), EngineError> {
        Self::write(&self.trades, &trade_row(closed))
    }

    fn flush(&self) -> Result<(), EngineError> {
        for writer in [&self.cycles, &self.trades] {
            writer.lock().unwrap_or_else(|e| e.into_inner()).flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cycle::CycleAction;
    use crate::domain::ohlcv::{SeriesKey, Timeframe};
    use crate::domain::position::{ExitReason, Position, PositionStatus};
    use crate::domain::signal::{Direction, Signal};
    use chrono::{NaiveDate, NaiveDateTime};
    use tempfile::TempDir;

    fn at(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn closed() -> ClosedPosition {
        ClosedPosition {
            position: Position {
                id: 3,
                instrument: "EURUSD".into(),
                direction: Direction::Short,
                entry_price: 1.2,
                volume: 0.5,
                stop_loss: 1.21,
                take_profit: 1.18,
                contract_size: 1.0,
                opened_at: at(9),
                status: PositionStatus::Closed,
                risk: 0.005,
                broker_ref: None,
                entry_commission: 0.0,
            },
            exit_price: 1.18,
            closed_at: at(12),
            realized_pnl: 0.01,
            reason: ExitReason::TakeProfit,
        }
    }

    #[test]
    fn writes_headers_and_rows() {
        let dir = TempDir::new().unwrap();
        let audit = CsvAuditAdapter::create(dir.path()).unwrap();

        let mut record = CycleRecord::new(SeriesKey::new("EURUSD", Timeframe::H1), at(10));
        record.signal = Some(Signal::from_strength(0.6, 0.1, Vec::new()));
        record.actions.push(CycleAction::Reverted { id: 2 });
        audit.record_cycle(&record).unwrap();
        audit.record_closed(&closed()).unwrap();
        audit.flush().unwrap();

        let cycles = fs::read_to_string(dir.path().join("cycles.csv")).unwrap();
        let lines: Vec<&str> = cycles.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("timestamp,instrument,timeframe"));
        assert!(lines[1].contains("EURUSD"));
        assert!(lines[1].contains("reverted #2"));

        let trades = fs::read_to_string(dir.path().join("trades.csv")).unwrap();
        assert!(trades.lines().nth(1).unwrap().starts_with("3,EURUSD,short"));
        assert!(trades.contains("take_profit"));
    }

    #[test]
    fn reopening_appends_without_second_header() {
        let dir = TempDir::new().unwrap();
        {
            let audit = CsvAuditAdapter::create(dir.path()).unwrap();
            audit.record_closed(&closed()).unwrap();
            audit.flush().unwrap();
        }
        let audit = CsvAuditAdapter::create(dir.path()).unwrap();
        audit.record_closed(&closed()).unwrap();
        audit.flush().unwrap();

        let trades = fs::read_to_string(dir.path().join("trades.csv")).unwrap();
        assert_eq!(trades.lines().count(), 3);
        assert_eq!(trades.matches("realized_pnl").count(), 1);
    }
}
