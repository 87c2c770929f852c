//! Rolling volume-weighted average price over the last n bars, using the
//! typical price. Unavailable when the window traded no volume.

use crate::domain::ohlcv::Bar;

pub fn calculate_vwap(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period {
        return None;
    }
    let window = &bars[bars.len() - period..];
    let volume: f64 = window.iter().map(|b| b.volume).sum();
    if volume <= 0.0 {
        return None;
    }
    let notional: f64 = window.iter().map(|b| b.typical_price() * b.volume).sum();
    Some(notional / volume)
}
