//! Simple Moving Average.
//!
//! SMA(n) = mean of the last n closes.
//! Warmup: n bars.

use crate::domain::ohlcv::Bar;

pub fn calculate_sma(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period {
        return None;
    }
    let window = &bars[bars.len() - period..];
    Some(window.iter().map(|b| b.close).sum::<f64>() / period as f64)
}
