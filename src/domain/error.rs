//! Domain error types.

use chrono::NaiveDateTime;

use super::order::RejectCode;

/// Rejection of an incoming bar. The window is left untouched.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DataError {
    #[error("out-of-order bar for {key}: {timestamp} is not after {latest}")]
    OutOfOrder {
        key: String,
        timestamp: NaiveDateTime,
        latest: NaiveDateTime,
    },

    #[error("malformed bar for {key} at {timestamp}: {reason}")]
    Malformed {
        key: String,
        timestamp: NaiveDateTime,
        reason: String,
    },

    #[error("bar for {got} pushed into window {expected}")]
    KeyMismatch { expected: String, got: String },
}

/// The prediction provider could not produce a score this cycle.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PredictionUnavailable {
    #[error("model warming up: have {bars} bars, need {required}")]
    WarmingUp { bars: usize, required: usize },

    #[error("stale inputs: {reason}")]
    Stale { reason: String },

    #[error("prediction timed out after {millis}ms")]
    TimedOut { millis: u64 },

    #[error("provider failure: {reason}")]
    Failed { reason: String },
}

/// Broker failure on submit or query.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutionError {
    #[error("order rejected: {0}")]
    Rejected(RejectCode),

    #[error("transient broker failure: {0}")]
    Transient(String),

    /// The order may or may not have reached the market.
    #[error("ambiguous order state for {broker_ref}")]
    Ambiguous { broker_ref: String },
}

/// Ledger state transition failures. None of these are fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("position {0} not found")]
    NotFound(u64),

    #[error("position {0} already closed")]
    AlreadyClosed(u64),

    #[error("position {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: u64,
        from: &'static str,
        to: &'static str,
    },
}

/// Top-level error type for tradepilot. Only the variants listed in
/// [`EngineError::is_fatal`] stop the process.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("data feed closed: {reason}")]
    FeedClosed { reason: String },

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("bar file error: {reason}")]
    BarSource { reason: String },

    #[error("audit sink error: {reason}")]
    Audit { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::ConfigParse { .. }
                | EngineError::ConfigMissing { .. }
                | EngineError::ConfigInvalid { .. }
                | EngineError::FeedClosed { .. }
        )
    }
}

impl From<&EngineError> for std::process::ExitCode {
    fn from(err: &EngineError) -> Self {
        let code: u8 = match err {
            EngineError::Io(_) | EngineError::Audit { .. } => 1,
            EngineError::ConfigParse { .. }
            | EngineError::ConfigMissing { .. }
            | EngineError::ConfigInvalid { .. } => 2,
            EngineError::FeedClosed { .. } => 3,
            EngineError::Ledger(_) => 4,
            EngineError::Data(_) | EngineError::BarSource { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}
