//! MACD (Moving Average Convergence Divergence) indicator.
//!
//! MACD Line = EMA(fast) - EMA(slow)
//! Signal Line = EMA(signal) of MACD Line
//! Histogram = MACD Line - Signal Line
//!
//! Default parameters: fast=12, slow=26, signal=9
//! Warmup: max(fast, slow) + signal - 1 bars.

use crate::domain::indicator::ema::ema_series;
use crate::domain::indicator::{IndicatorValue, closes};
use crate::domain::ohlcv::Bar;

pub const DEFAULT_FAST: usize = 12;
pub const DEFAULT_SLOW: usize = 26;
pub const DEFAULT_SIGNAL: usize = 9;

pub fn calculate_macd(
    bars: &[Bar],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> Option<IndicatorValue> {
    if bars.is_empty() || fast == 0 || slow == 0 || signal_period == 0 {
        return None;
    }

    let prices = closes(bars);
    let ema_fast = ema_series(&prices, fast);
    let ema_slow = ema_series(&prices, slow);

    let macd_line: Vec<f64> = ema_fast
        .iter()
        .zip(ema_slow.iter())
        .filter_map(|(f, s)| match (f, s) {
            (Some(f), Some(s)) => Some(f - s),
            _ => None,
        })
        .collect();

    let signal_line = ema_series(&macd_line, signal_period);
    let line = *macd_line.last()?;
    let signal = signal_line.last().copied().flatten()?;

    Some(IndicatorValue::Macd {
        line,
        signal,
        histogram: line - signal,
    })
}
