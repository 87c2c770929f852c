//! Audit sink port. Emit-only: the engine never reads records back.

use crate::domain::cycle::CycleRecord;
use crate::domain::error::EngineError;
use crate::domain::position::ClosedPosition;

pub trait AuditPort: Send + Sync {
    fn record_cycle(&self, record: &CycleRecord) -> Result<(), EngineError>;

    fn record_closed(&self, closed: &ClosedPosition) -> Result<(), EngineError>;

    fn flush(&self) -> Result<(), EngineError> {
        Ok(())
    }
}
