//! Bollinger Bands indicator.
//!
//! - Middle: SMA over n periods
//! - Upper: Middle + (multiplier × StdDev)
//! - Lower: Middle - (multiplier × StdDev)
//!
//! StdDev is the population standard deviation (divides by N, not N-1).
//! Warmup: n bars.

use crate::domain::indicator::IndicatorValue;
use crate::domain::ohlcv::Bar;

pub fn calculate_bollinger(
    bars: &[Bar],
    period: usize,
    stddev_mult_x100: u32,
) -> Option<IndicatorValue> {
    if period == 0 || bars.len() < period {
        return None;
    }
    let mult = stddev_mult_x100 as f64 / 100.0;
    let window = &bars[bars.len() - period..];

    let middle: f64 = window.iter().map(|b| b.close).sum::<f64>() / period as f64;
    let variance: f64 = window
        .iter()
        .map(|b| {
            let diff = b.close - middle;
            diff * diff
        })
        .sum::<f64>()
        / period as f64;
    let stddev = variance.sqrt();

    Some(IndicatorValue::Bollinger {
        upper: middle + mult * stddev,
        middle,
        lower: middle - mult * stddev,
    })
}
