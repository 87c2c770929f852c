//! Indicator bank: turns a window snapshot into an [`IndicatorSnapshot`].
//!
//! `compute` is a pure function of the bars it is given. Indicators whose
//! warmup exceeds the window are recorded as unavailable.

use crate::domain::indicator::adx::calculate_adx;
use crate::domain::indicator::atr::calculate_atr;
use crate::domain::indicator::bollinger::calculate_bollinger;
use crate::domain::indicator::ema::calculate_ema;
use crate::domain::indicator::macd::{DEFAULT_FAST, DEFAULT_SIGNAL, DEFAULT_SLOW, calculate_macd};
use crate::domain::indicator::rsi::calculate_rsi;
use crate::domain::indicator::sma::calculate_sma;
use crate::domain::indicator::stochastic::calculate_stochastic;
use crate::domain::indicator::support_resistance::{
    DEFAULT_TOLERANCE, calculate_support_resistance,
};
use crate::domain::indicator::vwap::calculate_vwap;
use crate::domain::indicator::{IndicatorRole, IndicatorSnapshot, IndicatorType, IndicatorValue};
use crate::domain::market_window::WindowSnapshot;

#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorConfig {
    pub sma_fast: usize,
    pub sma_slow: usize,
    pub ema_period: usize,
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bollinger_period: usize,
    pub bollinger_stddev: f64,
    pub atr_period: usize,
    pub adx_period: usize,
    pub stoch_k: usize,
    pub stoch_d: usize,
    pub vwap_period: usize,
    pub sr_window: usize,
    pub sr_touches: usize,
    pub sr_tolerance: f64,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        IndicatorConfig {
            sma_fast: 20,
            sma_slow: 50,
            ema_period: 20,
            rsi_period: 14,
            macd_fast: DEFAULT_FAST,
            macd_slow: DEFAULT_SLOW,
            macd_signal: DEFAULT_SIGNAL,
            bollinger_period: 20,
            bollinger_stddev: 2.0,
            atr_period: 14,
            adx_period: 14,
            stoch_k: 14,
            stoch_d: 3,
            vwap_period: 14,
            sr_window: 20,
            sr_touches: 2,
            sr_tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl IndicatorConfig {
    fn bollinger_mult_x100(&self) -> u32 {
        (self.bollinger_stddev * 100.0).round().max(0.0) as u32
    }

    /// Identity of the indicator filling each role.
    pub fn indicator_for(&self, role: IndicatorRole) -> IndicatorType {
        match role {
            IndicatorRole::SmaFast => IndicatorType::Sma(self.sma_fast),
            IndicatorRole::SmaSlow => IndicatorType::Sma(self.sma_slow),
            IndicatorRole::Ema => IndicatorType::Ema(self.ema_period),
            IndicatorRole::Rsi => IndicatorType::Rsi(self.rsi_period),
            IndicatorRole::Macd => IndicatorType::Macd {
                fast: self.macd_fast,
                slow: self.macd_slow,
                signal: self.macd_signal,
            },
            IndicatorRole::Bollinger => IndicatorType::Bollinger {
                period: self.bollinger_period,
                stddev_mult_x100: self.bollinger_mult_x100(),
            },
            IndicatorRole::Atr => IndicatorType::Atr(self.atr_period),
            IndicatorRole::Adx => IndicatorType::Adx(self.adx_period),
            IndicatorRole::Stochastic => IndicatorType::Stochastic {
                k_period: self.stoch_k,
                d_period: self.stoch_d,
            },
            IndicatorRole::Vwap => IndicatorType::Vwap(self.vwap_period),
            IndicatorRole::SupportResistance => IndicatorType::SupportResistance {
                window: self.sr_window,
                touches: self.sr_touches,
            },
        }
    }

    /// Bars needed before every configured indicator is available.
    pub fn required_bars(&self) -> usize {
        [
            self.sma_fast,
            self.sma_slow,
            self.ema_period,
            self.rsi_period + 1,
            self.macd_fast.max(self.macd_slow) + self.macd_signal - 1,
            self.bollinger_period,
            self.atr_period,
            2 * self.adx_period,
            self.stoch_k + self.stoch_d - 1,
            self.vwap_period,
            2 * self.sr_window + 1,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }
}

pub const ALL_ROLES: [IndicatorRole; 11] = [
    IndicatorRole::SmaFast,
    IndicatorRole::SmaSlow,
    IndicatorRole::Ema,
    IndicatorRole::Rsi,
    IndicatorRole::Macd,
    IndicatorRole::Bollinger,
    IndicatorRole::Atr,
    IndicatorRole::Adx,
    IndicatorRole::Stochastic,
    IndicatorRole::Vwap,
    IndicatorRole::SupportResistance,
];

#[derive(Debug, Clone, Default)]
pub struct IndicatorBank {
    config: IndicatorConfig,
}

impl IndicatorBank {
    pub fn new(config: IndicatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &IndicatorConfig {
        &self.config
    }

    pub fn compute(&self, window: &WindowSnapshot) -> IndicatorSnapshot {
        let bars = window.bars();
        let c = &self.config;
        let latest = window.latest();
        let mut snapshot =
            IndicatorSnapshot::new(latest.map(|b| b.timestamp), latest.map(|b| b.close));

        for role in ALL_ROLES {
            let value = match role {
                IndicatorRole::SmaFast => calculate_sma(bars, c.sma_fast).map(IndicatorValue::Simple),
                IndicatorRole::SmaSlow => calculate_sma(bars, c.sma_slow).map(IndicatorValue::Simple),
                IndicatorRole::Ema => calculate_ema(bars, c.ema_period).map(IndicatorValue::Simple),
                IndicatorRole::Rsi => calculate_rsi(bars, c.rsi_period).map(IndicatorValue::Simple),
                IndicatorRole::Macd => calculate_macd(bars, c.macd_fast, c.macd_slow, c.macd_signal),
                IndicatorRole::Bollinger => {
                    calculate_bollinger(bars, c.bollinger_period, c.bollinger_mult_x100())
                }
                IndicatorRole::Atr => calculate_atr(bars, c.atr_period).map(IndicatorValue::Simple),
                IndicatorRole::Adx => calculate_adx(bars, c.adx_period),
                IndicatorRole::Stochastic => calculate_stochastic(bars, c.stoch_k, c.stoch_d),
                IndicatorRole::Vwap => calculate_vwap(bars, c.vwap_period).map(IndicatorValue::Simple),
                IndicatorRole::SupportResistance => {
                    calculate_support_resistance(bars, c.sr_window, c.sr_touches, c.sr_tolerance)
                }
            };
            snapshot.insert(role, c.indicator_for(role), value);
        }

        snapshot
    }
}
