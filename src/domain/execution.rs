//! Fill cost model: slippage and per-lot commission.
//!
//! Slippage always moves the fill against the trader: buys fill higher,
//! sells fill lower.

use super::signal::Direction;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExecutionCosts {
    /// Flat commission charged per lot on each side of the trade.
    pub commission_per_lot: f64,
    /// Percentage slippage, e.g. 0.01 = 0.01%.
    pub slippage_pct: f64,
}

impl ExecutionCosts {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn commission(&self, volume: f64) -> f64 {
        self.commission_per_lot * volume
    }

    /// Long entry buys, short entry sells.
    pub fn entry_price(&self, direction: Direction, market_price: f64) -> f64 {
        match direction {
            Direction::Long => apply_slippage_buy(market_price, self.slippage_pct),
            Direction::Short => apply_slippage_sell(market_price, self.slippage_pct),
            Direction::Flat => market_price,
        }
    }

    /// Long exit sells, short exit buys to cover.
    pub fn exit_price(&self, direction: Direction, market_price: f64) -> f64 {
        match direction {
            Direction::Long => apply_slippage_sell(market_price, self.slippage_pct),
            Direction::Short => apply_slippage_buy(market_price, self.slippage_pct),
            Direction::Flat => market_price,
        }
    }
}

/// execution_price = market_price * (1 + slippage_pct / 100)
pub fn apply_slippage_buy(market_price: f64, slippage_pct: f64) -> f64 {
    market_price * (1.0 + slippage_pct / 100.0)
}

/// execution_price = market_price * (1 - slippage_pct / 100)
pub fn apply_slippage_sell(market_price: f64, slippage_pct: f64) -> f64 {
    market_price * (1.0 - slippage_pct / 100.0)
}
