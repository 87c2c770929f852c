//! Audit sink that emits records as `tracing` events on the `audit` target.
//! Used when no audit directory is configured.

use tracing::info;

use crate::domain::cycle::{CycleOutcome, CycleRecord};
use crate::domain::error::EngineError;
use crate::domain::position::ClosedPosition;
use crate::ports::audit_port::AuditPort;

#[derive(Debug, Default)]
pub struct TracingAuditAdapter;

impl AuditPort for TracingAuditAdapter {
    fn record_cycle(&self, record: &CycleRecord) -> Result<(), EngineError> {
        let actions: Vec<String> = record.actions.iter().map(|a| a.to_string()).collect();
        let direction = record
            .signal
            .as_ref()
            .map(|s| s.direction.to_string())
            .unwrap_or_default();
        let skipped = match &record.outcome {
            CycleOutcome::Completed => None,
            CycleOutcome::Skipped { reason, .. } => Some(reason.as_str()),
        };
        info!(
            target: "audit",
            key = %record.key,
            timestamp = %record.timestamp,
            stage = %record.stage,
            direction = %direction,
            strength = record.signal.as_ref().map(|s| s.strength),
            prediction_bias = record.prediction.map(|p| p.bias()),
            prediction_error = record.prediction_error.as_deref(),
            skipped,
            actions = %actions.join("; "),
            "cycle"
        );
        Ok(())
    }

    fn record_closed(&self, closed: &ClosedPosition) -> Result<(), EngineError> {
        let p = &closed.position;
        info!(
            target: "audit",
            id = p.id,
            instrument = %p.instrument,
            direction = %p.direction,
            volume = p.volume,
            entry = p.entry_price,
            exit = closed.exit_price,
            reason = %closed.reason,
            pnl = closed.realized_pnl,
            "trade closed"
        );
        Ok(())
    }
}
