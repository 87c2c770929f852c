//! Technical indicator implementations.
//!
//! Every calculator is a pure function of a bar slice and reports `None`
//! while the slice is shorter than the indicator's warmup. This module holds
//! the shared value types:
//! - `IndicatorType`: indicator identity + parameters
//! - `IndicatorValue`: the different output shapes
//! - `IndicatorRole`: which slot of the bank an output fills
//! - `IndicatorSnapshot`: the bank's output for one window

pub mod adx;
pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod macd;
pub mod rsi;
pub mod sma;
pub mod stochastic;
pub mod support_resistance;
pub mod vwap;

use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IndicatorValue {
    Simple(f64),
    Macd {
        line: f64,
        signal: f64,
        histogram: f64,
    },
    Stochastic {
        k: f64,
        d: f64,
    },
    Bollinger {
        upper: f64,
        middle: f64,
        lower: f64,
    },
    Adx {
        adx: f64,
        plus_di: f64,
        minus_di: f64,
    },
    Levels {
        support: Option<f64>,
        resistance: Option<f64>,
    },
}

impl IndicatorValue {
    pub fn as_simple(&self) -> Option<f64> {
        match self {
            IndicatorValue::Simple(v) => Some(*v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndicatorType {
    Sma(usize),
    Ema(usize),
    Rsi(usize),
    Atr(usize),
    Adx(usize),
    Vwap(usize),
    Macd {
        fast: usize,
        slow: usize,
        signal: usize,
    },
    Stochastic {
        k_period: usize,
        d_period: usize,
    },
    Bollinger {
        period: usize,
        stddev_mult_x100: u32,
    },
    SupportResistance {
        window: usize,
        touches: usize,
    },
}

impl fmt::Display for IndicatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndicatorType::Sma(period) => write!(f, "SMA({})", period),
            IndicatorType::Ema(period) => write!(f, "EMA({})", period),
            IndicatorType::Rsi(period) => write!(f, "RSI({})", period),
            IndicatorType::Atr(period) => write!(f, "ATR({})", period),
            IndicatorType::Adx(period) => write!(f, "ADX({})", period),
            IndicatorType::Vwap(period) => write!(f, "VWAP({})", period),
            IndicatorType::Macd { fast, slow, signal } => {
                write!(f, "MACD({},{},{})", fast, slow, signal)
            }
            IndicatorType::Stochastic { k_period, d_period } => {
                write!(f, "STOCHASTIC({},{})", k_period, d_period)
            }
            IndicatorType::Bollinger {
                period,
                stddev_mult_x100,
            } => {
                let mult = *stddev_mult_x100 as f64 / 100.0;
                write!(f, "BOLLINGER({},{})", period, mult)
            }
            IndicatorType::SupportResistance { window, touches } => {
                write!(f, "SR({},{})", window, touches)
            }
        }
    }
}

/// Slot an indicator output fills in the bank. Signal rules look values up by
/// role so they do not depend on the configured periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IndicatorRole {
    SmaFast,
    SmaSlow,
    Ema,
    Rsi,
    Macd,
    Bollinger,
    Atr,
    Adx,
    Stochastic,
    Vwap,
    SupportResistance,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorReading {
    pub indicator: IndicatorType,
    /// `None` while the window is shorter than the indicator's warmup.
    pub value: Option<IndicatorValue>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct IndicatorSnapshot {
    pub timestamp: Option<NaiveDateTime>,
    pub last_close: Option<f64>,
    readings: BTreeMap<IndicatorRole, IndicatorReading>,
}

impl IndicatorSnapshot {
    pub fn new(timestamp: Option<NaiveDateTime>, last_close: Option<f64>) -> Self {
        Self {
            timestamp,
            last_close,
            readings: BTreeMap::new(),
        }
    }

    pub fn insert(
        &mut self,
        role: IndicatorRole,
        indicator: IndicatorType,
        value: Option<IndicatorValue>,
    ) {
        self.readings
            .insert(role, IndicatorReading { indicator, value });
    }

    pub fn reading(&self, role: IndicatorRole) -> Option<&IndicatorReading> {
        self.readings.get(&role)
    }

    /// The value for `role`, or `None` when it is unconfigured or unavailable.
    pub fn get(&self, role: IndicatorRole) -> Option<IndicatorValue> {
        self.readings.get(&role).and_then(|r| r.value)
    }

    pub fn simple(&self, role: IndicatorRole) -> Option<f64> {
        self.get(role).and_then(|v| v.as_simple())
    }

    pub fn is_available(&self, role: IndicatorRole) -> bool {
        self.get(role).is_some()
    }

    pub fn readings(&self) -> impl Iterator<Item = (&IndicatorRole, &IndicatorReading)> {
        self.readings.iter()
    }

    pub fn unavailable(&self) -> Vec<IndicatorType> {
        self.readings
            .values()
            .filter(|r| r.value.is_none())
            .map(|r| r.indicator)
            .collect()
    }
}

/// Closing prices of a bar slice.
pub(crate) fn closes(bars: &[crate::domain::ohlcv::Bar]) -> Vec<f64> {
    bars.iter().map(|b| b.close).collect()
}

#[cfg(test)]
pub(crate) mod test_bars {
    use crate::domain::ohlcv::{Bar, Timeframe};
    use chrono::{Duration, NaiveDate};

    pub fn bar(i: usize, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Bar {
        Bar {
            instrument: "TEST".into(),
            timeframe: Timeframe::H1,
            timestamp: NaiveDate::from_ymd_opt(2024, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
                + Duration::hours(i as i64),
            open,
            high,
            low,
            close,
            volume,
        }
    }

    pub fn make_bars(prices: &[f64]) -> Vec<Bar> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &close)| bar(i, close, close, close, close, 1000.0))
            .collect()
    }
}
