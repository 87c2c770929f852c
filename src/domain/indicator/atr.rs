//! Average True Range (Wilder).
//!
//! TR[0] = high - low, TR[i] = true_range(prev_close).
//! Seed: mean of the first n TRs, then ATR = (prev * (n-1) + TR) / n.
//! Warmup: n bars.

use crate::domain::ohlcv::Bar;

pub fn calculate_atr(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period {
        return None;
    }

    let tr_values: Vec<f64> = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| {
            if i == 0 {
                bar.high - bar.low
            } else {
                bar.true_range(bars[i - 1].close)
            }
        })
        .collect();

    let mut atr = tr_values[..period].iter().sum::<f64>() / period as f64;
    for tr in &tr_values[period..] {
        atr = (atr * (period - 1) as f64 + tr) / period as f64;
    }
    Some(atr)
}
