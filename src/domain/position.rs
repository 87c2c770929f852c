//! Position records owned by the ledger.

use chrono::NaiveDateTime;
use std::fmt;

use super::signal::Direction;

pub type PositionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionStatus {
    /// Submitted but the broker has not confirmed the fill.
    Pending,
    Open,
    Closed,
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionStatus::Pending => "pending",
            PositionStatus::Open => "open",
            PositionStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    OpposingSignal,
    Manual,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::OpposingSignal => "opposing_signal",
            ExitReason::Manual => "manual",
        };
        f.write_str(s)
    }
}

/// Everything needed to open a position, as approved by the risk manager.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenParams {
    pub instrument: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub volume: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub contract_size: f64,
}

impl OpenParams {
    pub fn stop_distance(&self) -> f64 {
        (self.entry_price - self.stop_loss).abs()
    }

    /// Money lost if the stop is hit.
    pub fn risk(&self) -> f64 {
        position_risk(
            self.direction,
            self.entry_price,
            self.stop_loss,
            self.volume,
            self.contract_size,
        )
    }
}

/// Loss at the stop. Zero once the stop has moved past the entry.
pub fn position_risk(
    direction: Direction,
    entry_price: f64,
    stop_loss: f64,
    volume: f64,
    contract_size: f64,
) -> f64 {
    let per_unit = (entry_price - stop_loss) * direction.sign();
    per_unit.max(0.0) * volume * contract_size
}

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub id: PositionId,
    pub instrument: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub volume: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub contract_size: f64,
    pub opened_at: NaiveDateTime,
    pub status: PositionStatus,
    /// Allocated risk, kept in sync with `stop_loss`.
    pub risk: f64,
    pub broker_ref: Option<String>,
    pub entry_commission: f64,
}

impl Position {
    pub fn is_active(&self) -> bool {
        self.status != PositionStatus::Closed
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.direction.sign() * self.volume * self.contract_size
    }

    /// Signed volume: positive for longs, negative for shorts.
    pub fn net_volume(&self) -> f64 {
        self.volume * self.direction.sign()
    }

    pub fn should_stop_loss(&self, price: f64) -> bool {
        if self.stop_loss == 0.0 {
            return false;
        }
        match self.direction {
            Direction::Long => price <= self.stop_loss,
            Direction::Short => price >= self.stop_loss,
            Direction::Flat => false,
        }
    }

    pub fn should_take_profit(&self, price: f64) -> bool {
        if self.take_profit == 0.0 {
            return false;
        }
        match self.direction {
            Direction::Long => price >= self.take_profit,
            Direction::Short => price <= self.take_profit,
            Direction::Flat => false,
        }
    }

    /// True if `stop` is strictly tighter than the current stop.
    pub fn tightens(&self, stop: f64) -> bool {
        match self.direction {
            Direction::Long => stop > self.stop_loss,
            Direction::Short => stop < self.stop_loss,
            Direction::Flat => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClosedPosition {
    pub position: Position,
    pub exit_price: f64,
    pub closed_at: NaiveDateTime,
    /// Net of commissions on both sides.
    pub realized_pnl: f64,
    pub reason: ExitReason,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn opened_at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    fn sample_long_position() -> Position {
        Position {
            id: 1,
            instrument: "EURUSD".into(),
            direction: Direction::Long,
            entry_price: 1.1000,
            volume: 1.0,
            stop_loss: 1.0950,
            take_profit: 1.1100,
            contract_size: 100_000.0,
            opened_at: opened_at(),
            status: PositionStatus::Open,
            risk: 500.0,
            broker_ref: None,
            entry_commission: 0.0,
        }
    }

    fn sample_short_position() -> Position {
        Position {
            direction: Direction::Short,
            stop_loss: 1.1050,
            take_profit: 1.0900,
            ..sample_long_position()
        }
    }

    #[test]
    fn unrealized_pnl_long() {
        let pos = sample_long_position();
        assert_relative_eq!(pos.unrealized_pnl(1.1010), 100.0, epsilon = 1e-6);
    }

    #[test]
    fn unrealized_pnl_short() {
        let pos = sample_short_position();
        assert_relative_eq!(pos.unrealized_pnl(1.1010), -100.0, epsilon = 1e-6);
    }

    #[test]
    fn stop_and_target_long() {
        let pos = sample_long_position();
        assert!(pos.should_stop_loss(1.0950));
        assert!(!pos.should_stop_loss(1.0960));
        assert!(pos.should_take_profit(1.1100));
        assert!(!pos.should_take_profit(1.1099));
    }

    #[test]
    fn stop_and_target_short() {
        let pos = sample_short_position();
        assert!(pos.should_stop_loss(1.1060));
        assert!(!pos.should_stop_loss(1.1040));
        assert!(pos.should_take_profit(1.0890));
    }

    #[test]
    fn zero_stop_never_triggers() {
        let mut pos = sample_long_position();
        pos.stop_loss = 0.0;
        pos.take_profit = 0.0;
        assert!(!pos.should_stop_loss(0.5));
        assert!(!pos.should_take_profit(5.0));
    }

    #[test]
    fn tightening_direction() {
        let long = sample_long_position();
        assert!(long.tightens(1.0960));
        assert!(!long.tightens(1.0940));
        let short = sample_short_position();
        assert!(short.tightens(1.1040));
        assert!(!short.tightens(1.1060));
    }

    #[test]
    fn risk_is_zero_once_stop_passes_entry() {
        assert_relative_eq!(
            position_risk(Direction::Long, 1.1, 1.095, 1.0, 100_000.0),
            500.0,
            epsilon = 1e-6
        );
        assert_eq!(position_risk(Direction::Long, 1.1, 1.11, 1.0, 100_000.0), 0.0);
        assert_relative_eq!(
            position_risk(Direction::Short, 1.1, 1.105, 2.0, 100_000.0),
            1000.0,
            epsilon = 1e-6
        );
    }

    #[test]
    fn status_names() {
        assert_eq!(PositionStatus::Pending.to_string(), "pending");
        assert_eq!(ExitReason::OpposingSignal.to_string(), "opposing_signal");
    }
}
