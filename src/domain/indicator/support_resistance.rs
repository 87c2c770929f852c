//! Support/resistance level detection.
//!
//! A bar's high (low) is a candidate level when it is the extreme of the
//! centred `window` around it. A candidate is kept when at least `touches`
//! bars within `window` on either side come within `tolerance` (fraction of
//! the level) of it. Levels are then split around the latest close; the
//! nearest one below is the support and the nearest one above is the
//! resistance.
//!
//! Warmup: 2 * window + 1 bars.

use crate::domain::indicator::IndicatorValue;
use crate::domain::ohlcv::Bar;

pub const DEFAULT_TOLERANCE: f64 = 0.002;

fn count_touches(values: &[f64], center: usize, window: usize, level: f64, tolerance: f64) -> usize {
    let start = center.saturating_sub(window);
    let end = (center + window).min(values.len());
    values[start..end]
        .iter()
        .filter(|v| (*v - level).abs() <= level * tolerance)
        .count()
}

/// All detected levels, sorted ascending and deduplicated.
pub fn detect_levels(bars: &[Bar], window: usize, touches: usize, tolerance: f64) -> Vec<f64> {
    if window == 0 || bars.len() < 2 * window + 1 {
        return Vec::new();
    }

    let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
    let half = window / 2;
    let mut levels = Vec::new();

    for i in window..bars.len() - window {
        let lo = i - half;
        let hi = (lo + window).min(bars.len());

        let local_high = highs[lo..hi].iter().copied().fold(f64::MIN, f64::max);
        if highs[i] == local_high
            && count_touches(&highs, i, window, highs[i], tolerance) >= touches
        {
            levels.push(highs[i]);
        }

        let local_low = lows[lo..hi].iter().copied().fold(f64::MAX, f64::min);
        if lows[i] == local_low && count_touches(&lows, i, window, lows[i], tolerance) >= touches
        {
            levels.push(lows[i]);
        }
    }

    levels.sort_by(f64::total_cmp);
    levels.dedup();
    levels
}

pub fn calculate_support_resistance(
    bars: &[Bar],
    window: usize,
    touches: usize,
    tolerance: f64,
) -> Option<IndicatorValue> {
    if window == 0 || bars.len() < 2 * window + 1 {
        return None;
    }
    let price = bars.last()?.close;
    let levels = detect_levels(bars, window, touches, tolerance);

    let support = levels.iter().copied().filter(|l| *l < price).last();
    let resistance = levels.iter().copied().find(|l| *l > price);
    Some(IndicatorValue::Levels {
        support,
        resistance,
    })
}
