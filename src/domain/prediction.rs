//! Prediction model output and the feedback sent back to it.

use chrono::NaiveDateTime;

use super::signal::Direction;

/// Directional opinion of the prediction model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictionScore {
    bias: f64,
    confidence: f64,
}

impl PredictionScore {
    /// Clamps `bias` to [-1, 1] and `confidence` to [0, 1]. NaN inputs become 0.
    pub fn new(bias: f64, confidence: f64) -> Self {
        let bias = if bias.is_nan() { 0.0 } else { bias.clamp(-1.0, 1.0) };
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self { bias, confidence }
    }

    pub fn bias(&self) -> f64 {
        self.bias
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// +1, 0 or -1 depending on which side of the dead zone the bias falls.
    pub fn vote(&self, dead_zone: f64) -> f64 {
        if self.bias > dead_zone {
            1.0
        } else if self.bias < -dead_zone {
            -1.0
        } else {
            0.0
        }
    }
}

/// Realized result of a closed position, sent to the prediction provider.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeOutcome {
    pub instrument: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub exit_price: f64,
    pub opened_at: NaiveDateTime,
    pub closed_at: NaiveDateTime,
    pub realized_pnl: f64,
}

impl TradeOutcome {
    pub fn is_win(&self) -> bool {
        self.realized_pnl > 0.0
    }
}
