//! Simulated broker for replays and dry runs.
//!
//! Quotes follow the bar feed: every accepted bar sets bid/ask to the close
//! minus/plus half the configured spread. Market orders fill immediately at
//! the quoted side. Realized P/L is booked FIFO per (instrument, direction)
//! and credited to the paper balance.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::debug;

use crate::domain::error::ExecutionError;
use crate::domain::ohlcv::{Bar, Quote};
use crate::domain::order::{Fill, OrderAction, OrderIntent, OrderStatus, RejectCode};
use crate::domain::risk::InstrumentLimits;
use crate::domain::signal::Direction;
use crate::ports::broker_port::BrokerPort;

const VOLUME_EPSILON: f64 = 1e-9;

/// Fills remembered for [`BrokerPort::order_status`]; older refs report `Unknown`.
pub const ORDER_HISTORY: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct PaperBrokerConfig {
    pub balance: f64,
    /// Absolute bid/ask spread in price units.
    pub spread: f64,
    pub limits: HashMap<String, InstrumentLimits>,
}

impl Default for PaperBrokerConfig {
    fn default() -> Self {
        PaperBrokerConfig {
            balance: 10_000.0,
            spread: 0.0,
            limits: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct Lot {
    price: f64,
    volume: f64,
}

#[derive(Debug, Default)]
struct Book {
    balance: f64,
    quotes: HashMap<String, Quote>,
    lots: HashMap<(String, Direction), VecDeque<Lot>>,
    orders: HashMap<String, Fill>,
    order_refs: VecDeque<String>,
}

impl Book {
    fn remember(&mut self, fill: Fill) {
        if self.order_refs.len() == ORDER_HISTORY {
            if let Some(oldest) = self.order_refs.pop_front() {
                self.orders.remove(&oldest);
            }
        }
        self.order_refs.push_back(fill.broker_ref.clone());
        self.orders.insert(fill.broker_ref.clone(), fill);
    }
}

pub struct PaperBroker {
    config: PaperBrokerConfig,
    book: Mutex<Book>,
    next_ref: AtomicU64,
}

impl PaperBroker {
    pub fn new(config: PaperBrokerConfig) -> Self {
        let book = Book {
            balance: config.balance,
            ..Book::default()
        };
        Self {
            config,
            book: Mutex::new(book),
            next_ref: AtomicU64::new(1),
        }
    }

    pub fn balance(&self) -> f64 {
        self.lock().balance
    }

    /// Sets the quote directly. Replays normally rely on [`BrokerPort::on_bar`].
    pub fn set_quote(&self, quote: Quote) {
        self.lock().quotes.insert(quote.instrument.clone(), quote);
    }

    /// Mid price of every quoted instrument.
    pub fn marks(&self) -> HashMap<String, f64> {
        self.lock()
            .quotes
            .iter()
            .map(|(name, q)| (name.clone(), (q.bid + q.ask) / 2.0))
            .collect()
    }

    /// Volume currently held for an instrument and side.
    pub fn exposure(&self, instrument: &str, direction: Direction) -> f64 {
        self.lock()
            .lots
            .get(&(instrument.to_string(), direction))
            .map(|lots| lots.iter().map(|l| l.volume).sum())
            .unwrap_or(0.0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Book> {
        self.book.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn contract_size(&self, instrument: &str) -> f64 {
        self.config
            .limits
            .get(instrument)
            .map(|l| l.contract_size)
            .unwrap_or(1.0)
    }

    fn check_volume(&self, order: &OrderIntent) -> Result<(), ExecutionError> {
        if order.volume.is_nan() || order.volume <= 0.0 {
            return Err(ExecutionError::Rejected(RejectCode::InvalidVolumeStep));
        }
        let Some(limits) = self.config.limits.get(&order.instrument) else {
            return Ok(());
        };
        if order.volume < limits.min_volume - VOLUME_EPSILON
            || order.volume > limits.max_volume + VOLUME_EPSILON
        {
            return Err(ExecutionError::Rejected(RejectCode::InvalidVolumeStep));
        }
        if limits.volume_step > 0.0 {
            let steps = order.volume / limits.volume_step;
            if (steps - steps.round()).abs() > 1e-6 {
                return Err(ExecutionError::Rejected(RejectCode::InvalidVolumeStep));
            }
        }
        Ok(())
    }
}

/// Removes `volume` from the front of `lots`; returns the P/L per contract.
fn consume_fifo(lots: &mut VecDeque<Lot>, mut volume: f64, exit: f64, direction: Direction) -> f64 {
    let mut pnl = 0.0;
    while volume > VOLUME_EPSILON {
        let Some(front) = lots.front_mut() else {
            break;
        };
        let take = front.volume.min(volume);
        pnl += (exit - front.price) * direction.sign() * take;
        front.volume -= take;
        volume -= take;
        if front.volume <= VOLUME_EPSILON {
            lots.pop_front();
        }
    }
    pnl
}

#[async_trait]
impl BrokerPort for PaperBroker {
    async fn account_balance(&self) -> Result<f64, ExecutionError> {
        Ok(self.lock().balance)
    }

    async fn instrument_limits(&self, instrument: &str) -> Option<InstrumentLimits> {
        self.config.limits.get(instrument).cloned()
    }

    async fn quote(&self, instrument: &str) -> Result<Quote, ExecutionError> {
        self.lock()
            .quotes
            .get(instrument)
            .cloned()
            .ok_or_else(|| ExecutionError::Transient(format!("no price for {} yet", instrument)))
    }

    async fn submit(&self, order: &OrderIntent) -> Result<Fill, ExecutionError> {
        self.check_volume(order)?;
        let contract_size = self.contract_size(&order.instrument);
        let mut book = self.lock();
        let quote = book
            .quotes
            .get(&order.instrument)
            .cloned()
            .ok_or(ExecutionError::Rejected(RejectCode::SymbolUnavailable))?;
        let key = (order.instrument.clone(), order.direction);

        let price = match order.action {
            OrderAction::Open => {
                if book.balance <= 0.0 {
                    return Err(ExecutionError::Rejected(RejectCode::InsufficientMargin));
                }
                let price = quote.entry_price(order.direction);
                book.lots.entry(key).or_default().push_back(Lot {
                    price,
                    volume: order.volume,
                });
                price
            }
            OrderAction::Close { .. } => {
                let price = quote.exit_price(order.direction);
                let lots = book.lots.entry(key).or_default();
                let pnl = consume_fifo(lots, order.volume, price, order.direction) * contract_size;
                book.balance += pnl;
                price
            }
        };

        let broker_ref = format!("paper-{}", self.next_ref.fetch_add(1, Ordering::Relaxed));
        let fill = Fill {
            broker_ref,
            price,
            volume: order.volume,
        };
        book.remember(fill.clone());
        debug!(order = %order, price, balance = book.balance, "paper fill");
        Ok(fill)
    }

    async fn order_status(&self, broker_ref: &str) -> Result<OrderStatus, ExecutionError> {
        Ok(match self.lock().orders.get(broker_ref) {
            Some(fill) => OrderStatus::Filled(fill.clone()),
            None => OrderStatus::Unknown,
        })
    }

    fn on_bar(&self, bar: &Bar) {
        let half = self.config.spread / 2.0;
        self.set_quote(Quote::new(
            bar.instrument.clone(),
            bar.close - half,
            bar.close + half,
        ));
    }
}
