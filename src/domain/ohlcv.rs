//! OHLCV bar representation and series identity.

use chrono::NaiveDateTime;
use std::fmt;
use std::str::FromStr;

use super::error::DataError;
use super::signal::Direction;

/// Bar interval. Mirrors the timeframes a typical retail broker terminal exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
}

impl Timeframe {
    pub fn seconds(&self) -> i64 {
        match self {
            Timeframe::M1 => 60,
            Timeframe::M5 => 300,
            Timeframe::M15 => 900,
            Timeframe::M30 => 1_800,
            Timeframe::H1 => 3_600,
            Timeframe::H4 => 14_400,
            Timeframe::D1 => 86_400,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Timeframe::M1 => "M1",
            Timeframe::M5 => "M5",
            Timeframe::M15 => "M15",
            Timeframe::M30 => "M30",
            Timeframe::H1 => "H1",
            Timeframe::H4 => "H4",
            Timeframe::D1 => "D1",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "M1" => Ok(Timeframe::M1),
            "M5" => Ok(Timeframe::M5),
            "M15" => Ok(Timeframe::M15),
            "M30" => Ok(Timeframe::M30),
            "H1" => Ok(Timeframe::H1),
            "H4" => Ok(Timeframe::H4),
            "D1" => Ok(Timeframe::D1),
            other => Err(format!("unknown timeframe '{}'", other)),
        }
    }
}

/// One decision stream: an instrument on a timeframe.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeriesKey {
    pub instrument: String,
    pub timeframe: Timeframe,
}

impl SeriesKey {
    pub fn new(instrument: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            instrument: instrument.into(),
            timeframe,
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.instrument, self.timeframe)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub instrument: String,
    pub timeframe: Timeframe,
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn key(&self) -> SeriesKey {
        SeriesKey::new(self.instrument.clone(), self.timeframe)
    }

    /// (high + low + close) / 3
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    /// max(high - low, |high - prev_close|, |low - prev_close|)
    pub fn true_range(&self, prev_close: f64) -> f64 {
        let hl = self.high - self.low;
        let hc = (self.high - prev_close).abs();
        let lc = (self.low - prev_close).abs();
        hl.max(hc).max(lc)
    }

    /// Reject bars no indicator can sensibly consume.
    pub fn validate(&self) -> Result<(), DataError> {
        let malformed = |reason: &str| DataError::Malformed {
            key: self.key().to_string(),
            timestamp: self.timestamp,
            reason: reason.to_string(),
        };

        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            return Err(malformed("prices must be finite and positive"));
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(malformed("volume must be finite and non-negative"));
        }
        if self.high < self.low {
            return Err(malformed("high below low"));
        }
        if self.open > self.high || self.open < self.low {
            return Err(malformed("open outside high/low range"));
        }
        if self.close > self.high || self.close < self.low {
            return Err(malformed("close outside high/low range"));
        }
        Ok(())
    }
}

/// Top of book for one instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub instrument: String,
    pub bid: f64,
    pub ask: f64,
}

impl Quote {
    pub fn new(instrument: impl Into<String>, bid: f64, ask: f64) -> Self {
        Self {
            instrument: instrument.into(),
            bid,
            ask,
        }
    }

    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }

    /// Longs buy at the ask, shorts sell at the bid.
    pub fn entry_price(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Short => self.bid,
            _ => self.ask,
        }
    }

    /// Longs exit at the bid, shorts cover at the ask.
    pub fn exit_price(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Short => self.ask,
            _ => self.bid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_bar() -> Bar {
        Bar {
            instrument: "EURUSD".into(),
            timeframe: Timeframe::H1,
            timestamp: NaiveDate::from_ymd_opt(2024, 1, 15)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap(),
            open: 100.0,
            high: 110.0,
            low: 90.0,
            close: 105.0,
            volume: 50_000.0,
        }
    }

    #[test]
    fn typical_price() {
        let bar = sample_bar();
        let expected = (110.0 + 90.0 + 105.0) / 3.0;
        assert!((bar.typical_price() - expected).abs() < f64::EPSILON);
    }

    #[test]
    fn true_range_hl_dominates() {
        let bar = sample_bar();
        assert!((bar.true_range(100.0) - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn true_range_gap_up() {
        let bar = sample_bar();
        // high-low=20, |110-70|=40, |90-70|=20 → 40
        assert!((bar.true_range(70.0) - 40.0).abs() < f64::EPSILON);
    }

    #[test]
    fn true_range_gap_down() {
        let bar = sample_bar();
        assert!((bar.true_range(130.0) - 40.0).abs() < f64::EPSILON);
    }

    #[test]
    fn valid_bar_passes() {
        assert!(sample_bar().validate().is_ok());
    }

    #[test]
    fn high_below_low_is_malformed() {
        let mut bar = sample_bar();
        bar.high = 80.0;
        assert!(matches!(bar.validate(), Err(DataError::Malformed { .. })));
    }

    #[test]
    fn nan_close_is_malformed() {
        let mut bar = sample_bar();
        bar.close = f64::NAN;
        assert!(matches!(bar.validate(), Err(DataError::Malformed { .. })));
    }

    #[test]
    fn negative_volume_is_malformed() {
        let mut bar = sample_bar();
        bar.volume = -1.0;
        assert!(bar.validate().is_err());
    }

    #[test]
    fn close_outside_range_is_malformed() {
        let mut bar = sample_bar();
        bar.close = 111.0;
        assert!(bar.validate().is_err());
    }

    #[test]
    fn timeframe_round_trips_through_display() {
        for tf in [
            Timeframe::M1,
            Timeframe::M5,
            Timeframe::M15,
            Timeframe::M30,
            Timeframe::H1,
            Timeframe::H4,
            Timeframe::D1,
        ] {
            assert_eq!(tf.to_string().parse::<Timeframe>().unwrap(), tf);
        }
        assert_eq!("h4".parse::<Timeframe>().unwrap(), Timeframe::H4);
        assert!("W1".parse::<Timeframe>().is_err());
    }

    #[test]
    fn quote_sides() {
        let q = Quote::new("EURUSD", 1.1000, 1.1002);
        assert_eq!(q.entry_price(Direction::Long), 1.1002);
        assert_eq!(q.entry_price(Direction::Short), 1.1000);
        assert_eq!(q.exit_price(Direction::Long), 1.1000);
        assert_eq!(q.exit_price(Direction::Short), 1.1002);
        assert!((q.spread() - 0.0002).abs() < 1e-12);
    }

    #[test]
    fn series_key_display() {
        assert_eq!(SeriesKey::new("GBPUSD", Timeframe::M15).to_string(), "GBPUSD/M15");
        assert_eq!(sample_bar().key().to_string(), "EURUSD/H1");
    }
}
