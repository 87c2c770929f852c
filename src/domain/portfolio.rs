//! Aggregate view over the ledger at one point in time.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PortfolioState {
    /// Signed volume per instrument over open and pending positions.
    pub exposure: BTreeMap<String, f64>,
    pub allocated_risk: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub open_count: usize,
    pub pending_count: usize,
}

impl PortfolioState {
    pub fn net_exposure(&self, instrument: &str) -> f64 {
        self.exposure.get(instrument).copied().unwrap_or(0.0)
    }

    /// Open plus pending positions.
    pub fn active_count(&self) -> usize {
        self.open_count + self.pending_count
    }

    pub fn equity(&self, balance: f64) -> f64 {
        balance + self.unrealized_pnl
    }
}
