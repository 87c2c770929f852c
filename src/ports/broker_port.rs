//! Brokerage port: account, quotes and order routing.

use async_trait::async_trait;

use crate::domain::error::ExecutionError;
use crate::domain::ohlcv::{Bar, Quote};
use crate::domain::order::{Fill, OrderIntent, OrderStatus};
use crate::domain::risk::InstrumentLimits;

#[async_trait]
pub trait BrokerPort: Send + Sync {
    async fn account_balance(&self) -> Result<f64, ExecutionError>;

    /// `None` when the broker does not publish limits for the instrument.
    async fn instrument_limits(&self, instrument: &str) -> Option<InstrumentLimits>;

    async fn quote(&self, instrument: &str) -> Result<Quote, ExecutionError>;

    async fn submit(&self, order: &OrderIntent) -> Result<Fill, ExecutionError>;

    async fn order_status(&self, broker_ref: &str) -> Result<OrderStatus, ExecutionError>;

    /// Latest accepted bar. Brokers that price from the feed (paper trading)
    /// update their quotes here; live brokers ignore it.
    fn on_bar(&self, _bar: &Bar) {}
}
