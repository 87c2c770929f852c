//! Prediction model port.
//!
//! The model is a black box: the engine asks for a score once per cycle and
//! reports realized outcomes back, but never inspects the model's state.

use async_trait::async_trait;

use crate::domain::error::PredictionUnavailable;
use crate::domain::indicator::IndicatorSnapshot;
use crate::domain::market_window::WindowSnapshot;
use crate::domain::prediction::{PredictionScore, TradeOutcome};

#[async_trait]
pub trait PredictionProvider: Send + Sync {
    /// Provider name for logs and audit rows.
    fn name(&self) -> &str;

    async fn predict(
        &self,
        window: &WindowSnapshot,
        indicators: &IndicatorSnapshot,
    ) -> Result<PredictionScore, PredictionUnavailable>;

    /// Notification of a closed position. Fire and forget.
    fn observe(&self, _outcome: &TradeOutcome) {}
}
