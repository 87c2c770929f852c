//! Average Directional Index (Wilder).
//!
//! +DM = high - prev_high when it exceeds prev_low - low (and is positive), else 0.
//! -DM = prev_low - low when it exceeds high - prev_high (and is positive), else 0.
//! TR, +DM and -DM are Wilder-smoothed over n; +DI/-DI = 100 * DM / TR.
//! DX = 100 * |+DI - -DI| / (+DI + -DI); ADX is the Wilder average of DX.
//!
//! Warmup: 2n bars (n changes to seed the DIs, n DX values to seed ADX).

use crate::domain::indicator::IndicatorValue;
use crate::domain::ohlcv::Bar;

pub fn calculate_adx(bars: &[Bar], period: usize) -> Option<IndicatorValue> {
    if period == 0 || bars.len() < 2 * period {
        return None;
    }

    let mut tr = Vec::with_capacity(bars.len() - 1);
    let mut plus_dm = Vec::with_capacity(bars.len() - 1);
    let mut minus_dm = Vec::with_capacity(bars.len() - 1);
    for pair in bars.windows(2) {
        let (prev, cur) = (&pair[0], &pair[1]);
        let up = cur.high - prev.high;
        let down = prev.low - cur.low;
        plus_dm.push(if up > down && up > 0.0 { up } else { 0.0 });
        minus_dm.push(if down > up && down > 0.0 { down } else { 0.0 });
        tr.push(cur.true_range(prev.close));
    }

    let mut s_tr: f64 = tr[..period].iter().sum();
    let mut s_plus: f64 = plus_dm[..period].iter().sum();
    let mut s_minus: f64 = minus_dm[..period].iter().sum();

    let directional = |s_tr: f64, s_plus: f64, s_minus: f64| -> (f64, f64, f64) {
        if s_tr == 0.0 {
            return (0.0, 0.0, 0.0);
        }
        let plus_di = 100.0 * s_plus / s_tr;
        let minus_di = 100.0 * s_minus / s_tr;
        let sum = plus_di + minus_di;
        let dx = if sum == 0.0 {
            0.0
        } else {
            100.0 * (plus_di - minus_di).abs() / sum
        };
        (plus_di, minus_di, dx)
    };

    let (mut plus_di, mut minus_di, first_dx) = directional(s_tr, s_plus, s_minus);
    let mut dx_values = vec![first_dx];

    for i in period..tr.len() {
        let p = period as f64;
        s_tr = s_tr - s_tr / p + tr[i];
        s_plus = s_plus - s_plus / p + plus_dm[i];
        s_minus = s_minus - s_minus / p + minus_dm[i];
        let (pdi, mdi, dx) = directional(s_tr, s_plus, s_minus);
        plus_di = pdi;
        minus_di = mdi;
        dx_values.push(dx);
    }

    if dx_values.len() < period {
        return None;
    }
    let mut adx = dx_values[..period].iter().sum::<f64>() / period as f64;
    for dx in &dx_values[period..] {
        adx = (adx * (period - 1) as f64 + dx) / period as f64;
    }

    Some(IndicatorValue::Adx {
        adx,
        plus_di,
        minus_di,
    })
}
