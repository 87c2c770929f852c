//! Risk manager: gates signals, sizes positions and manages exits.
//!
//! Evaluation order for a directional signal:
//! 1. per-instrument and global position capacity
//! 2. aggregate risk ceiling
//! 3. instrument allow-list
//! 4. minimum signal strength
//!
//! The first failing check rejects. Sizing failures are reported after the
//! policy checks.

use std::collections::{BTreeSet, HashMap};

use super::indicator::{IndicatorRole, IndicatorSnapshot, IndicatorValue};
use super::ledger::Ledger;
use super::ohlcv::Quote;
use super::position::{ExitReason, OpenParams, PositionId, PositionStatus};
use super::signal::{Direction, Signal};

/// Volume constraints for an instrument, as reported by the broker or set in
/// configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentLimits {
    pub min_volume: f64,
    pub max_volume: f64,
    pub volume_step: f64,
    pub contract_size: f64,
}

impl Default for InstrumentLimits {
    fn default() -> Self {
        InstrumentLimits {
            min_volume: 0.01,
            max_volume: 100.0,
            volume_step: 0.01,
            contract_size: 1.0,
        }
    }
}

impl InstrumentLimits {
    /// The tighter of two sets of limits. The broker's contract size wins.
    pub fn intersect(&self, broker: &InstrumentLimits) -> InstrumentLimits {
        InstrumentLimits {
            min_volume: self.min_volume.max(broker.min_volume),
            max_volume: self.max_volume.min(broker.max_volume),
            volume_step: self.volume_step.max(broker.volume_step),
            contract_size: broker.contract_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentSpec {
    pub limits: InstrumentLimits,
    /// Fixed volume used when `risk_per_trade` is zero.
    pub default_volume: f64,
}

impl Default for InstrumentSpec {
    fn default() -> Self {
        InstrumentSpec {
            limits: InstrumentLimits::default(),
            default_volume: 0.01,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiskConfig {
    pub max_positions: usize,
    pub max_positions_per_instrument: usize,
    /// Fraction of balance, e.g. 0.02 = 2%.
    pub max_aggregate_risk: f64,
    /// Fraction of balance risked per trade. Zero selects `default_volume`.
    pub risk_per_trade: f64,
    pub risk_reward_ratio: f64,
    pub stop_atr_multiple: f64,
    /// Stop distance as a fraction of entry when ATR is unavailable.
    pub fallback_stop_pct: f64,
    pub min_signal_strength: f64,
    /// Zero disables trailing.
    pub trailing_atr_multiple: f64,
    pub use_support_resistance_stops: bool,
    pub allowed: BTreeSet<String>,
    pub instruments: HashMap<String, InstrumentSpec>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        RiskConfig {
            max_positions: 5,
            max_positions_per_instrument: 1,
            max_aggregate_risk: 0.06,
            risk_per_trade: 0.01,
            risk_reward_ratio: 2.0,
            stop_atr_multiple: 2.0,
            fallback_stop_pct: 0.01,
            min_signal_strength: 0.3,
            trailing_atr_multiple: 0.0,
            use_support_resistance_stops: true,
            allowed: BTreeSet::new(),
            instruments: HashMap::new(),
        }
    }
}

impl RiskConfig {
    pub fn spec_for(&self, instrument: &str) -> InstrumentSpec {
        self.instruments.get(instrument).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RejectReason {
    #[error("instrument {instrument} already has {open} of {max} positions")]
    InstrumentCapacity {
        instrument: String,
        open: usize,
        max: usize,
    },

    #[error("portfolio already has {open} of {max} positions")]
    GlobalCapacity { open: usize, max: usize },

    #[error("risk ceiling exceeded: allocated {allocated:.2} + requested {requested:.2} > {ceiling:.2}")]
    RiskCeilingExceeded {
        allocated: f64,
        requested: f64,
        ceiling: f64,
    },

    #[error("instrument {0} is not on the allow-list")]
    SymbolNotAllowed(String),

    #[error("signal strength {strength:.3} below minimum {min:.3}")]
    WeakSignal { strength: f64, min: f64 },

    #[error("volume {volume} below instrument minimum {min}")]
    InvalidVolume { volume: f64, min: f64 },

    #[error("stop distance {0} is not positive")]
    ZeroStopDistance(f64),

    #[error("quote for {0} is not usable")]
    InvalidQuote(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    OpenPosition(OpenParams),
    ClosePosition { id: PositionId, reason: ExitReason },
    Reject(RejectReason),
    NoAction,
}

/// Market facts the risk manager needs for one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct RiskContext<'a> {
    pub instrument: &'a str,
    pub quote: &'a Quote,
    pub balance: f64,
    pub broker_limits: Option<&'a InstrumentLimits>,
    pub indicators: &'a IndicatorSnapshot,
}

/// A stop the risk manager wants tightened.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopAdjustment {
    pub id: PositionId,
    pub new_stop: f64,
}

/// Floor `volume` to a multiple of `step`, tolerating float noise.
pub fn floor_to_step(volume: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return volume;
    }
    let steps = (volume / step + 1e-9).floor();
    ((steps * step) * 1e8).round() / 1e8
}

#[derive(Debug, Clone, PartialEq)]
struct Sizing {
    params: OpenParams,
    risk: f64,
}

#[derive(Debug, Clone, Default)]
pub struct RiskManager {
    config: RiskConfig,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn evaluate(&self, signal: &Signal, ctx: &RiskContext<'_>, ledger: &Ledger) -> Decision {
        let direction = signal.direction;
        if direction == Direction::Flat {
            return Decision::NoAction;
        }

        if let Some(opposing) = ledger.active_for(ctx.instrument).find(|p| {
            p.status == PositionStatus::Open && p.direction == direction.opposite()
        }) {
            return Decision::ClosePosition {
                id: opposing.id,
                reason: ExitReason::OpposingSignal,
            };
        }

        if ledger
            .active_for(ctx.instrument)
            .any(|p| p.status == PositionStatus::Pending)
        {
            return Decision::NoAction;
        }

        let on_instrument = ledger.active_for(ctx.instrument).count();
        if on_instrument >= self.config.max_positions_per_instrument {
            return Decision::Reject(RejectReason::InstrumentCapacity {
                instrument: ctx.instrument.to_string(),
                open: on_instrument,
                max: self.config.max_positions_per_instrument,
            });
        }
        let total = ledger.active_count();
        if total >= self.config.max_positions {
            return Decision::Reject(RejectReason::GlobalCapacity {
                open: total,
                max: self.config.max_positions,
            });
        }

        let sizing = self.size(direction, ctx);
        if let Ok(sizing) = &sizing {
            let ceiling = self.config.max_aggregate_risk * ctx.balance;
            let allocated = ledger.allocated_risk();
            if allocated + sizing.risk > ceiling {
                return Decision::Reject(RejectReason::RiskCeilingExceeded {
                    allocated,
                    requested: sizing.risk,
                    ceiling,
                });
            }
        }

        if !self.config.allowed.contains(ctx.instrument) {
            return Decision::Reject(RejectReason::SymbolNotAllowed(ctx.instrument.to_string()));
        }

        if signal.confidence() < self.config.min_signal_strength {
            return Decision::Reject(RejectReason::WeakSignal {
                strength: signal.confidence(),
                min: self.config.min_signal_strength,
            });
        }

        match sizing {
            Ok(sizing) => Decision::OpenPosition(sizing.params),
            Err(reason) => Decision::Reject(reason),
        }
    }

    /// Stop distance from ATR, the fallback percentage, or a closer
    /// support/resistance level.
    pub fn stop_distance(
        &self,
        direction: Direction,
        entry: f64,
        indicators: &IndicatorSnapshot,
    ) -> f64 {
        let mut distance = match indicators.simple(IndicatorRole::Atr) {
            Some(atr) if atr > 0.0 => atr * self.config.stop_atr_multiple,
            _ => entry * self.config.fallback_stop_pct,
        };

        if self.config.use_support_resistance_stops {
            if let Some(IndicatorValue::Levels {
                support,
                resistance,
            }) = indicators.get(IndicatorRole::SupportResistance)
            {
                let level_distance = match direction {
                    Direction::Long => support.map(|s| entry - s),
                    Direction::Short => resistance.map(|r| r - entry),
                    Direction::Flat => None,
                };
                if let Some(d) = level_distance.filter(|d| *d > 0.0 && *d < distance) {
                    distance = d;
                }
            }
        }
        distance
    }

    fn size(&self, direction: Direction, ctx: &RiskContext<'_>) -> Result<Sizing, RejectReason> {
        let entry = ctx.quote.entry_price(direction);
        if !entry.is_finite() || entry <= 0.0 {
            return Err(RejectReason::InvalidQuote(ctx.instrument.to_string()));
        }

        let distance = self.stop_distance(direction, entry, ctx.indicators);
        if !distance.is_finite() || distance <= 0.0 {
            return Err(RejectReason::ZeroStopDistance(distance));
        }

        let spec = self.config.spec_for(ctx.instrument);
        let limits = match ctx.broker_limits {
            Some(broker) => spec.limits.intersect(broker),
            None => spec.limits.clone(),
        };

        let raw = if self.config.risk_per_trade > 0.0 {
            (ctx.balance * self.config.risk_per_trade) / (distance * limits.contract_size)
        } else {
            spec.default_volume
        };
        let volume = floor_to_step(raw.min(limits.max_volume), limits.volume_step);
        if volume.is_nan() || volume < limits.min_volume || volume <= 0.0 {
            return Err(RejectReason::InvalidVolume {
                volume,
                min: limits.min_volume,
            });
        }

        let sign = direction.sign();
        let params = OpenParams {
            instrument: ctx.instrument.to_string(),
            direction,
            entry_price: entry,
            volume,
            stop_loss: entry - distance * sign,
            take_profit: entry + distance * self.config.risk_reward_ratio * sign,
            contract_size: limits.contract_size,
        };
        Ok(Sizing {
            risk: params.risk(),
            params,
        })
    }

    /// Positions on `instrument` whose stop or target has been reached. Longs
    /// are checked against the bid, shorts against the ask. Stops win when
    /// both trigger.
    pub fn check_exits(&self, ledger: &Ledger, quote: &Quote) -> Vec<Decision> {
        ledger
            .open_positions()
            .filter(|p| p.instrument == quote.instrument)
            .filter_map(|p| {
                let price = quote.exit_price(p.direction);
                let reason = if p.should_stop_loss(price) {
                    ExitReason::StopLoss
                } else if p.should_take_profit(price) {
                    ExitReason::TakeProfit
                } else {
                    return None;
                };
                Some(Decision::ClosePosition { id: p.id, reason })
            })
            .collect()
    }

    /// Trailing stops for open positions on the quote's instrument. Only
    /// proposals that tighten the current stop are returned.
    pub fn trail_stops(&self, ledger: &Ledger, atr: Option<f64>, quote: &Quote) -> Vec<StopAdjustment> {
        let multiple = self.config.trailing_atr_multiple;
        let Some(atr) = atr.filter(|a| *a > 0.0 && multiple > 0.0) else {
            return Vec::new();
        };

        ledger
            .open_positions()
            .filter(|p| p.instrument == quote.instrument)
            .filter_map(|p| {
                let price = quote.exit_price(p.direction);
                let new_stop = price - atr * multiple * p.direction.sign();
                p.tightens(new_stop).then_some(StopAdjustment {
                    id: p.id,
                    new_stop,
                })
            })
            .collect()
    }
}
