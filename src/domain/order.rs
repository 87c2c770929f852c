//! Order intents sent to the broker and what comes back.

use std::fmt;

use super::position::PositionId;
use super::signal::Direction;

#[derive(Debug, Clone, PartialEq)]
pub enum OrderAction {
    Open,
    Close { position_id: PositionId },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderIntent {
    pub action: OrderAction,
    pub instrument: String,
    /// Direction of the position being opened or closed.
    pub direction: Direction,
    pub volume: f64,
    /// Price the engine expects to trade at.
    pub price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

impl OrderIntent {
    /// True if the order buys: long entries and short exits.
    pub fn is_buy(&self) -> bool {
        match self.action {
            OrderAction::Open => self.direction == Direction::Long,
            OrderAction::Close { .. } => self.direction == Direction::Short,
        }
    }
}

impl fmt::Display for OrderIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = if self.is_buy() { "BUY" } else { "SELL" };
        match &self.action {
            OrderAction::Open => write!(
                f,
                "{} {} {} @ {} (open)",
                side, self.volume, self.instrument, self.price
            ),
            OrderAction::Close { position_id } => write!(
                f,
                "{} {} {} @ {} (close #{})",
                side, self.volume, self.instrument, self.price, position_id
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub broker_ref: String,
    pub price: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrderStatus {
    Filled(Fill),
    Pending,
    Rejected(RejectCode),
    /// The broker has no record of the order.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectCode {
    InsufficientMargin,
    InvalidVolumeStep,
    SymbolUnavailable,
    Other(String),
}

impl fmt::Display for RejectCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectCode::InsufficientMargin => f.write_str("insufficient margin"),
            RejectCode::InvalidVolumeStep => f.write_str("invalid volume step"),
            RejectCode::SymbolUnavailable => f.write_str("symbol unavailable"),
            RejectCode::Other(msg) => write!(f, "{}", msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent(action: OrderAction, direction: Direction) -> OrderIntent {
        OrderIntent {
            action,
            instrument: "EURUSD".into(),
            direction,
            volume: 0.5,
            price: 1.1,
            stop_loss: None,
            take_profit: None,
        }
    }

    #[test]
    fn buy_side() {
        assert!(intent(OrderAction::Open, Direction::Long).is_buy());
        assert!(!intent(OrderAction::Open, Direction::Short).is_buy());
        assert!(intent(OrderAction::Close { position_id: 1 }, Direction::Short).is_buy());
        assert!(!intent(OrderAction::Close { position_id: 1 }, Direction::Long).is_buy());
    }

    #[test]
    fn display() {
        assert_eq!(
            intent(OrderAction::Close { position_id: 7 }, Direction::Long).to_string(),
            "SELL 0.5 EURUSD @ 1.1 (close #7)"
        );
    }
}
