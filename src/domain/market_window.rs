//! Rolling per-series bar buffer.
//!
//! Each (instrument, timeframe) stream keeps its last N bars in a ring buffer.
//! Timestamps are strictly increasing inside a window; a rejected push leaves
//! the window exactly as it was.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::NaiveDateTime;

use super::error::DataError;
use super::ohlcv::{Bar, SeriesKey};

#[derive(Debug, Clone)]
pub struct MarketWindow {
    key: SeriesKey,
    capacity: usize,
    bars: VecDeque<Bar>,
}

impl MarketWindow {
    /// A capacity of zero is treated as one.
    pub fn new(key: SeriesKey, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            key,
            capacity,
            bars: VecDeque::with_capacity(capacity),
        }
    }

    pub fn key(&self) -> &SeriesKey {
        &self.key
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn latest_timestamp(&self) -> Option<NaiveDateTime> {
        self.bars.back().map(|b| b.timestamp)
    }

    /// Append a bar, evicting the oldest one when full.
    pub fn push(&mut self, bar: Bar) -> Result<(), DataError> {
        if bar.instrument != self.key.instrument || bar.timeframe != self.key.timeframe {
            return Err(DataError::KeyMismatch {
                expected: self.key.to_string(),
                got: bar.key().to_string(),
            });
        }
        bar.validate()?;
        if let Some(latest) = self.latest_timestamp() {
            if bar.timestamp <= latest {
                return Err(DataError::OutOfOrder {
                    key: self.key.to_string(),
                    timestamp: bar.timestamp,
                    latest,
                });
            }
        }

        if self.bars.len() == self.capacity {
            self.bars.pop_front();
        }
        self.bars.push_back(bar);
        Ok(())
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        WindowSnapshot {
            key: self.key.clone(),
            bars: self.bars.iter().cloned().collect(),
        }
    }
}

/// Read-only copy of a window's contents at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSnapshot {
    key: SeriesKey,
    bars: Arc<[Bar]>,
}

impl WindowSnapshot {
    pub fn new(key: SeriesKey, bars: Vec<Bar>) -> Self {
        Self {
            key,
            bars: bars.into(),
        }
    }

    pub fn key(&self) -> &SeriesKey {
        &self.key
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn latest(&self) -> Option<&Bar> {
        self.bars.last()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ohlcv::Timeframe;
    use chrono::{Duration, NaiveDate};

    fn base() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn make_bar(hour: i64, close: f64) -> Bar {
        Bar {
            instrument: "EURUSD".into(),
            timeframe: Timeframe::H1,
            timestamp: base() + Duration::hours(hour),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 100.0,
        }
    }

    fn window(capacity: usize) -> MarketWindow {
        MarketWindow::new(SeriesKey::new("EURUSD", Timeframe::H1), capacity)
    }

    #[test]
    fn three_bar_window_keeps_order_then_evicts_oldest() {
        let mut w = window(3);
        w.push(make_bar(0, 10.0)).unwrap();
        w.push(make_bar(1, 11.0)).unwrap();
        w.push(make_bar(2, 9.0)).unwrap();

        let snap = w.snapshot();
        assert_eq!(snap.closes(), vec![10.0, 11.0, 9.0]);

        w.push(make_bar(3, 12.0)).unwrap();
        assert_eq!(w.len(), 3);
        assert_eq!(w.snapshot().closes(), vec![11.0, 9.0, 12.0]);
    }

    #[test]
    fn snapshot_is_unaffected_by_later_pushes() {
        let mut w = window(2);
        w.push(make_bar(0, 10.0)).unwrap();
        let snap = w.snapshot();
        w.push(make_bar(1, 11.0)).unwrap();
        w.push(make_bar(2, 12.0)).unwrap();
        assert_eq!(snap.closes(), vec![10.0]);
    }

    #[test]
    fn duplicate_timestamp_is_out_of_order() {
        let mut w = window(3);
        w.push(make_bar(5, 10.0)).unwrap();
        let err = w.push(make_bar(5, 11.0)).unwrap_err();
        assert!(matches!(err, DataError::OutOfOrder { .. }));
        assert_eq!(w.snapshot().closes(), vec![10.0]);
    }

    #[test]
    fn older_timestamp_is_out_of_order() {
        let mut w = window(3);
        w.push(make_bar(5, 10.0)).unwrap();
        assert!(matches!(
            w.push(make_bar(4, 11.0)),
            Err(DataError::OutOfOrder { .. })
        ));
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn malformed_bar_leaves_window_untouched() {
        let mut w = window(3);
        w.push(make_bar(0, 10.0)).unwrap();
        let mut bad = make_bar(1, 11.0);
        bad.low = 20.0;
        assert!(matches!(w.push(bad), Err(DataError::Malformed { .. })));
        assert_eq!(w.snapshot().closes(), vec![10.0]);
    }

    #[test]
    fn wrong_key_is_rejected() {
        let mut w = window(3);
        let mut bar = make_bar(0, 10.0);
        bar.instrument = "GBPUSD".into();
        assert!(matches!(w.push(bar), Err(DataError::KeyMismatch { .. })));
    }

    #[test]
    fn zero_capacity_behaves_as_one() {
        let mut w = window(0);
        assert_eq!(w.capacity(), 1);
        w.push(make_bar(0, 10.0)).unwrap();
        w.push(make_bar(1, 11.0)).unwrap();
        assert_eq!(w.snapshot().closes(), vec![11.0]);
    }
}
