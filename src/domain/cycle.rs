//! Decision cycle bookkeeping: stages, actions taken and the audit record.

use std::fmt;

use chrono::NaiveDateTime;

use super::ohlcv::SeriesKey;
use super::position::{ExitReason, PositionId};
use super::prediction::PredictionScore;
use super::risk::RejectReason;
use super::signal::{Direction, Signal};

/// Idle -> Updated -> Scored -> RiskChecked -> Dispatched -> Idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CycleStage {
    Idle,
    Updated,
    Scored,
    RiskChecked,
    Dispatched,
}

impl CycleStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleStage::Idle => "idle",
            CycleStage::Updated => "updated",
            CycleStage::Scored => "scored",
            CycleStage::RiskChecked => "risk_checked",
            CycleStage::Dispatched => "dispatched",
        }
    }
}

impl fmt::Display for CycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something the cycle did to the ledger or the broker.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleAction {
    Opened {
        id: PositionId,
        direction: Direction,
        volume: f64,
        price: f64,
    },
    Pending {
        id: PositionId,
        broker_ref: String,
    },
    Confirmed {
        id: PositionId,
        price: f64,
    },
    Reverted {
        id: PositionId,
    },
    Closed {
        id: PositionId,
        reason: ExitReason,
        price: f64,
        pnl: f64,
    },
    StopMoved {
        id: PositionId,
        stop: f64,
    },
    Rejected(RejectReason),
    SubmitFailed {
        reason: String,
    },
}

impl fmt::Display for CycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleAction::Opened {
                id,
                direction,
                volume,
                price,
            } => write!(f, "opened #{} {} {} @ {}", id, direction, volume, price),
            CycleAction::Pending { id, broker_ref } => {
                write!(f, "pending #{} ref {}", id, broker_ref)
            }
            CycleAction::Confirmed { id, price } => write!(f, "confirmed #{} @ {}", id, price),
            CycleAction::Reverted { id } => write!(f, "reverted #{}", id),
            CycleAction::Closed {
                id,
                reason,
                price,
                pnl,
            } => write!(f, "closed #{} {} @ {} pnl {:.2}", id, reason, price, pnl),
            CycleAction::StopMoved { id, stop } => write!(f, "stop #{} -> {}", id, stop),
            CycleAction::Rejected(reason) => write!(f, "rejected: {}", reason),
            CycleAction::SubmitFailed { reason } => write!(f, "submit failed: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Completed,
    /// The cycle stopped early and changed nothing after `stage`.
    Skipped { stage: CycleStage, reason: String },
}

impl CycleOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, CycleOutcome::Skipped { .. })
    }
}

/// One row of the audit trail per processed bar.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleRecord {
    pub key: SeriesKey,
    pub timestamp: NaiveDateTime,
    pub stage: CycleStage,
    pub signal: Option<Signal>,
    pub prediction: Option<PredictionScore>,
    pub prediction_error: Option<String>,
    pub actions: Vec<CycleAction>,
    pub outcome: CycleOutcome,
}

impl CycleRecord {
    pub fn new(key: SeriesKey, timestamp: NaiveDateTime) -> Self {
        Self {
            key,
            timestamp,
            stage: CycleStage::Idle,
            signal: None,
            prediction: None,
            prediction_error: None,
            actions: Vec::new(),
            outcome: CycleOutcome::Completed,
        }
    }

    pub fn skip(&mut self, reason: impl Into<String>) {
        self.outcome = CycleOutcome::Skipped {
            stage: self.stage,
            reason: reason.into(),
        };
    }

    pub fn opened(&self) -> impl Iterator<Item = PositionId> + '_ {
        self.actions.iter().filter_map(|a| match a {
            CycleAction::Opened { id, .. } | CycleAction::Pending { id, .. } => Some(*id),
            _ => None,
        })
    }

    pub fn closed(&self) -> impl Iterator<Item = PositionId> + '_ {
        self.actions.iter().filter_map(|a| match a {
            CycleAction::Closed { id, .. } => Some(*id),
            _ => None,
        })
    }
}
