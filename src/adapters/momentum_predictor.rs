//! Deterministic trend-following prediction provider.
//!
//! Fits a least-squares line through the last `lookback` closes. The bias is
//! `tanh(sensitivity * slope * lookback / last_close)`, i.e. the fitted move
//! over the lookback as a fraction of price, squashed into [-1, 1]. The
//! confidence is the fit's R².

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::debug;

use crate::domain::error::PredictionUnavailable;
use crate::domain::indicator::IndicatorSnapshot;
use crate::domain::market_window::WindowSnapshot;
use crate::domain::prediction::{PredictionScore, TradeOutcome};
use crate::ports::prediction_port::PredictionProvider;

#[derive(Debug, Clone, PartialEq)]
pub struct MomentumConfig {
    pub lookback: usize,
    pub sensitivity: f64,
}

impl Default for MomentumConfig {
    fn default() -> Self {
        MomentumConfig {
            lookback: 30,
            sensitivity: 20.0,
        }
    }
}

pub struct MomentumPredictor {
    config: MomentumConfig,
    wins: AtomicU64,
    losses: AtomicU64,
}

/// Slope and R² of the least-squares line through `ys` at x = 0, 1, 2, ...
fn linear_fit(ys: &[f64]) -> (f64, f64) {
    let n = ys.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = ys.iter().sum::<f64>() / n;

    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (i, y) in ys.iter().enumerate() {
        let dx = i as f64 - mean_x;
        let dy = y - mean_y;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx == 0.0 {
        return (0.0, 0.0);
    }
    let slope = sxy / sxx;
    let r2 = if syy == 0.0 {
        0.0
    } else {
        (sxy * sxy) / (sxx * syy)
    };
    (slope, r2)
}

impl MomentumPredictor {
    pub fn new(config: MomentumConfig) -> Self {
        Self {
            config: MomentumConfig {
                lookback: config.lookback.max(2),
                ..config
            },
            wins: AtomicU64::new(0),
            losses: AtomicU64::new(0),
        }
    }

    /// (wins, losses) reported back through [`PredictionProvider::observe`].
    pub fn record(&self) -> (u64, u64) {
        (
            self.wins.load(Ordering::Relaxed),
            self.losses.load(Ordering::Relaxed),
        )
    }

    pub fn score(&self, closes: &[f64]) -> Result<PredictionScore, PredictionUnavailable> {
        let lookback = self.config.lookback;
        if closes.len() < lookback {
            return Err(PredictionUnavailable::WarmingUp {
                bars: closes.len(),
                required: lookback,
            });
        }
        let recent = &closes[closes.len() - lookback..];
        let last = recent[lookback - 1];
        if !(last.is_finite() && last > 0.0) {
            return Err(PredictionUnavailable::Failed {
                reason: format!("unusable close {}", last),
            });
        }
        let (slope, r2) = linear_fit(recent);
        let bias = (self.config.sensitivity * slope * lookback as f64 / last).tanh();
        Ok(PredictionScore::new(bias, r2))
    }
}

#[async_trait]
impl PredictionProvider for MomentumPredictor {
    fn name(&self) -> &str {
        "momentum"
    }

    async fn predict(
        &self,
        window: &WindowSnapshot,
        indicators: &IndicatorSnapshot,
    ) -> Result<PredictionScore, PredictionUnavailable> {
        let latest = window.latest().map(|b| b.timestamp);
        if indicators.timestamp != latest {
            return Err(PredictionUnavailable::Stale {
                reason: format!(
                    "indicators at {:?}, window at {:?}",
                    indicators.timestamp, latest
                ),
            });
        }
        self.score(&window.closes())
    }

    fn observe(&self, outcome: &TradeOutcome) {
        let counter = if outcome.is_win() {
            &self.wins
        } else {
            &self.losses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        let (wins, losses) = self.record();
        debug!(
            instrument = %outcome.instrument,
            pnl = outcome.realized_pnl,
            wins,
            losses,
            "trade outcome observed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ohlcv::{Bar, SeriesKey, Timeframe};
    use crate::domain::signal::Direction;
    use approx::assert_relative_eq;
    use chrono::{Duration, NaiveDate, NaiveDateTime};

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn window(closes: &[f64]) -> WindowSnapshot {
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar {
                instrument: "EURUSD".into(),
                timeframe: Timeframe::H1,
                timestamp: t0() + Duration::hours(i as i64),
                open: c,
                high: c,
                low: c,
                close: c,
                volume: 1.0,
            })
            .collect();
        WindowSnapshot::new(SeriesKey::new("EURUSD", Timeframe::H1), bars)
    }

    fn predictor(lookback: usize) -> MomentumPredictor {
        MomentumPredictor::new(MomentumConfig {
            lookback,
            sensitivity: 20.0,
        })
    }

    #[test]
    fn perfect_line_has_full_confidence() {
        let (slope, r2) = linear_fit(&[1.0, 2.0, 3.0, 4.0]);
        assert_relative_eq!(slope, 1.0);
        assert_relative_eq!(r2, 1.0);
    }

    #[test]
    fn flat_series_is_neutral() {
        let s = predictor(5).score(&[10.0; 5]).unwrap();
        assert_eq!(s.bias(), 0.0);
        assert_eq!(s.confidence(), 0.0);
    }

    #[test]
    fn rising_series_is_bullish() {
        let closes: Vec<f64> = (0..10).map(|i| 100.0 + i as f64).collect();
        let s = predictor(10).score(&closes).unwrap();
        assert!(s.bias() > 0.5);
        assert_relative_eq!(s.confidence(), 1.0);
    }

    #[test]
    fn falling_series_is_bearish() {
        let closes: Vec<f64> = (0..10).map(|i| 100.0 - i as f64).collect();
        assert!(predictor(10).score(&closes).unwrap().bias() < -0.5);
    }

    #[test]
    fn warms_up() {
        let err = predictor(10).score(&[1.0; 4]).unwrap_err();
        assert_eq!(
            err,
            PredictionUnavailable::WarmingUp {
                bars: 4,
                required: 10
            }
        );
    }

    #[tokio::test]
    async fn stale_indicators_are_refused() {
        let w = window(&[1.0, 2.0, 3.0]);
        let stale = IndicatorSnapshot::new(Some(t0()), Some(1.0));
        let err = predictor(2).predict(&w, &stale).await.unwrap_err();
        assert!(matches!(err, PredictionUnavailable::Stale { .. }));

        let fresh = IndicatorSnapshot::new(Some(t0() + Duration::hours(2)), Some(3.0));
        assert!(predictor(2).predict(&w, &fresh).await.is_ok());
    }

    #[test]
    fn observe_counts_outcomes() {
        let p = predictor(5);
        let mut outcome = TradeOutcome {
            instrument: "EURUSD".into(),
            direction: Direction::Long,
            entry_price: 1.0,
            exit_price: 1.1,
            opened_at: t0(),
            closed_at: t0() + Duration::hours(1),
            realized_pnl: 10.0,
        };
        p.observe(&outcome);
        outcome.realized_pnl = -5.0;
        p.observe(&outcome);
        p.observe(&outcome);
        assert_eq!(p.record(), (1, 2));
    }
}
