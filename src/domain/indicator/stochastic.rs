//! Stochastic oscillator.
//!
//! %K = 100 * (close - lowest_low(k)) / (highest_high(k) - lowest_low(k))
//! %D = SMA(d) of %K. A zero high/low range yields %K = 50.
//! Warmup: k + d - 1 bars.

use crate::domain::indicator::IndicatorValue;
use crate::domain::ohlcv::Bar;

fn percent_k(window: &[Bar]) -> f64 {
    let highest = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let lowest = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
    let range = highest - lowest;
    match window.last() {
        Some(last) if range > 0.0 => 100.0 * (last.close - lowest) / range,
        _ => 50.0,
    }
}

pub fn calculate_stochastic(
    bars: &[Bar],
    k_period: usize,
    d_period: usize,
) -> Option<IndicatorValue> {
    if k_period == 0 || d_period == 0 || bars.len() < k_period + d_period - 1 {
        return None;
    }

    let n = bars.len();
    let ks: Vec<f64> = (n - d_period..n)
        .map(|end| percent_k(&bars[end + 1 - k_period..=end]))
        .collect();

    let k = *ks.last()?;
    let d = ks.iter().sum::<f64>() / d_period as f64;
    Some(IndicatorValue::Stochastic { k, d })
}
