//! Position ledger.
//!
//! The ledger is the only owner of positions. Status moves Pending -> Open ->
//! Closed and never backwards. Every operation validates before mutating, so a
//! failed call leaves the ledger unchanged. The running total of allocated
//! risk is updated on every open, close, revert and stop adjustment.
//!
//! Only active positions are held. Ids are never reused, so an issued id that
//! is no longer active has left the ledger; closed positions are handed to the
//! caller and only a short tail of them is kept.

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::NaiveDateTime;

use super::error::LedgerError;
use super::execution::ExecutionCosts;
use super::portfolio::PortfolioState;
use super::position::{
    ClosedPosition, ExitReason, OpenParams, Position, PositionId, PositionStatus, position_risk,
};
use super::prediction::TradeOutcome;

/// Closed positions kept for inspection.
pub const CLOSED_TAIL: usize = 256;

#[derive(Debug, Clone, Default)]
pub struct Ledger {
    positions: BTreeMap<PositionId, Position>,
    closed: VecDeque<ClosedPosition>,
    closed_count: usize,
    next_id: PositionId,
    costs: ExecutionCosts,
    allocated_risk: f64,
    realized_pnl: f64,
}

impl Ledger {
    pub fn new(costs: ExecutionCosts) -> Self {
        Self {
            positions: BTreeMap::new(),
            closed: VecDeque::new(),
            closed_count: 0,
            next_id: 1,
            costs,
            allocated_risk: 0.0,
            realized_pnl: 0.0,
        }
    }

    pub fn costs(&self) -> &ExecutionCosts {
        &self.costs
    }

    /// Error for an id that is not active.
    fn missing(&self, id: PositionId) -> LedgerError {
        if id > 0 && id < self.next_id {
            LedgerError::AlreadyClosed(id)
        } else {
            LedgerError::NotFound(id)
        }
    }

    /// Stored risk is the approved risk of `params`. Stop and target move
    /// with the actual entry so the approved stop distance is kept whatever
    /// the fill price or slippage.
    fn insert(
        &mut self,
        params: &OpenParams,
        at: NaiveDateTime,
        status: PositionStatus,
        broker_ref: Option<String>,
    ) -> Position {
        let id = self.next_id.max(1);
        self.next_id = id + 1;

        let entry_price = match status {
            PositionStatus::Pending => params.entry_price,
            _ => self.costs.entry_price(params.direction, params.entry_price),
        };
        let shift = entry_price - params.entry_price;
        let risk = params.risk();
        let position = Position {
            id,
            instrument: params.instrument.clone(),
            direction: params.direction,
            entry_price,
            volume: params.volume,
            stop_loss: params.stop_loss + shift,
            take_profit: params.take_profit + shift,
            contract_size: params.contract_size,
            opened_at: at,
            status,
            risk,
            broker_ref,
            entry_commission: self.costs.commission(params.volume),
        };
        self.allocated_risk += risk;
        self.positions.insert(id, position.clone());
        position
    }

    /// Record a position whose fill was confirmed synchronously.
    pub fn open(&mut self, params: &OpenParams, at: NaiveDateTime) -> Position {
        self.insert(params, at, PositionStatus::Open, None)
    }

    /// As [`Ledger::open`], keeping the broker's order reference.
    pub fn open_filled(
        &mut self,
        params: &OpenParams,
        at: NaiveDateTime,
        broker_ref: impl Into<String>,
    ) -> Position {
        self.insert(params, at, PositionStatus::Open, Some(broker_ref.into()))
    }

    /// Record a submitted order whose fill is not yet confirmed. Its risk is
    /// allocated immediately.
    pub fn open_pending(
        &mut self,
        params: &OpenParams,
        at: NaiveDateTime,
        broker_ref: impl Into<String>,
    ) -> Position {
        self.insert(params, at, PositionStatus::Pending, Some(broker_ref.into()))
    }

    /// Pending -> Open at the confirmed fill price. Stop and target move
    /// with the entry; the allocated risk does not change.
    pub fn confirm(&mut self, id: PositionId, fill_price: f64) -> Result<Position, LedgerError> {
        let costs = self.costs.clone();
        let missing = self.missing(id);
        let position = self.positions.get_mut(&id).ok_or(missing)?;
        if position.status != PositionStatus::Pending {
            return Err(LedgerError::InvalidTransition {
                id,
                from: position.status.as_str(),
                to: PositionStatus::Open.as_str(),
            });
        }

        let entry = costs.entry_price(position.direction, fill_price);
        let shift = entry - position.entry_price;
        position.entry_price = entry;
        position.stop_loss += shift;
        position.take_profit += shift;
        position.status = PositionStatus::Open;
        Ok(position.clone())
    }

    /// Drop a pending position the broker never filled and release its risk.
    pub fn revert(&mut self, id: PositionId) -> Result<Position, LedgerError> {
        let status = self
            .positions
            .get(&id)
            .map(|p| p.status)
            .ok_or_else(|| self.missing(id))?;
        if status != PositionStatus::Pending {
            return Err(LedgerError::InvalidTransition {
                id,
                from: status.as_str(),
                to: "reverted",
            });
        }
        let position = self.positions.remove(&id).ok_or_else(|| self.missing(id))?;
        self.allocated_risk = (self.allocated_risk - position.risk).max(0.0);
        Ok(position)
    }

    /// Open -> Closed. Realized P/L is net of commission on both sides.
    pub fn close(
        &mut self,
        id: PositionId,
        exit_price: f64,
        at: NaiveDateTime,
        reason: ExitReason,
    ) -> Result<ClosedPosition, LedgerError> {
        let status = self
            .positions
            .get(&id)
            .map(|p| p.status)
            .ok_or_else(|| self.missing(id))?;
        match status {
            PositionStatus::Open => {}
            PositionStatus::Closed => return Err(LedgerError::AlreadyClosed(id)),
            PositionStatus::Pending => {
                return Err(LedgerError::InvalidTransition {
                    id,
                    from: PositionStatus::Pending.as_str(),
                    to: PositionStatus::Closed.as_str(),
                });
            }
        }

        let Some(mut position) = self.positions.remove(&id) else {
            return Err(LedgerError::NotFound(id));
        };
        let fill = self.costs.exit_price(position.direction, exit_price);
        let gross = position.unrealized_pnl(fill);
        let realized = gross - position.entry_commission - self.costs.commission(position.volume);

        self.allocated_risk = (self.allocated_risk - position.risk).max(0.0);
        position.risk = 0.0;
        position.status = PositionStatus::Closed;
        self.realized_pnl += realized;

        let closed = ClosedPosition {
            position,
            exit_price: fill,
            closed_at: at,
            realized_pnl: realized,
            reason,
        };
        if self.closed.len() == CLOSED_TAIL {
            self.closed.pop_front();
        }
        self.closed.push_back(closed.clone());
        self.closed_count += 1;
        Ok(closed)
    }

    /// Move the stop. Only tightening is applied; returns whether it moved.
    pub fn adjust_stop(&mut self, id: PositionId, new_stop: f64) -> Result<bool, LedgerError> {
        let missing = self.missing(id);
        let position = self.positions.get_mut(&id).ok_or(missing)?;
        if position.status == PositionStatus::Closed {
            return Err(LedgerError::AlreadyClosed(id));
        }
        if !new_stop.is_finite() || !position.tightens(new_stop) {
            return Ok(false);
        }

        let old_risk = position.risk;
        position.stop_loss = new_stop;
        position.risk = position_risk(
            position.direction,
            position.entry_price,
            new_stop,
            position.volume,
            position.contract_size,
        );
        self.allocated_risk = (self.allocated_risk + position.risk - old_risk).max(0.0);
        Ok(true)
    }

    /// An active position. Closed and reverted positions are gone.
    pub fn position(&self, id: PositionId) -> Option<&Position> {
        self.positions.get(&id)
    }

    /// Open and pending positions, oldest first.
    pub fn active(&self) -> impl Iterator<Item = &Position> {
        self.positions.values().filter(|p| p.is_active())
    }

    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.positions
            .values()
            .filter(|p| p.status == PositionStatus::Open)
    }

    pub fn pending_positions(&self) -> impl Iterator<Item = &Position> {
        self.positions
            .values()
            .filter(|p| p.status == PositionStatus::Pending)
    }

    pub fn active_for<'a>(&'a self, instrument: &'a str) -> impl Iterator<Item = &'a Position> {
        self.active().filter(move |p| p.instrument == instrument)
    }

    pub fn active_count(&self) -> usize {
        self.active().count()
    }

    pub fn allocated_risk(&self) -> f64 {
        self.allocated_risk
    }

    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    /// The most recent closed positions, oldest first, at most [`CLOSED_TAIL`].
    pub fn closed(&self) -> impl Iterator<Item = &ClosedPosition> {
        self.closed.iter()
    }

    /// Positions closed over the ledger's lifetime.
    pub fn closed_count(&self) -> usize {
        self.closed_count
    }

    /// Portfolio view using the given price per instrument. Instruments with
    /// no price contribute no unrealized P/L.
    pub fn mark_to_market(&self, prices: &HashMap<String, f64>) -> PortfolioState {
        let mut state = PortfolioState {
            allocated_risk: self.allocated_risk,
            realized_pnl: self.realized_pnl,
            ..PortfolioState::default()
        };
        for position in self.active() {
            *state
                .exposure
                .entry(position.instrument.clone())
                .or_insert(0.0) += position.net_volume();
            match position.status {
                PositionStatus::Pending => state.pending_count += 1,
                _ => {
                    state.open_count += 1;
                    if let Some(price) = prices.get(&position.instrument) {
                        state.unrealized_pnl += position.unrealized_pnl(*price);
                    }
                }
            }
        }
        state
    }
}

impl From<&ClosedPosition> for TradeOutcome {
    fn from(closed: &ClosedPosition) -> Self {
        TradeOutcome {
            instrument: closed.position.instrument.clone(),
            direction: closed.position.direction,
            entry_price: closed.position.entry_price,
            exit_price: closed.exit_price,
            opened_at: closed.position.opened_at,
            closed_at: closed.closed_at,
            realized_pnl: closed.realized_pnl,
        }
    }
}
