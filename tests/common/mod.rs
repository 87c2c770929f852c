#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tradepilot::domain::cycle::CycleRecord;
use tradepilot::domain::engine::{DecisionEngine, EngineConfig};
use tradepilot::domain::error::{EngineError, ExecutionError, PredictionUnavailable};
use tradepilot::domain::indicator::IndicatorSnapshot;
use tradepilot::domain::market_window::WindowSnapshot;
pub use tradepilot::domain::ohlcv::{Bar, Quote, SeriesKey, Timeframe};
use tradepilot::domain::order::{Fill, OrderAction, OrderIntent, OrderStatus};
use tradepilot::domain::position::ClosedPosition;
use tradepilot::domain::prediction::{PredictionScore, TradeOutcome};
use tradepilot::domain::risk::InstrumentLimits;
use tradepilot::ports::audit_port::AuditPort;
use tradepilot::ports::broker_port::BrokerPort;
use tradepilot::ports::prediction_port::PredictionProvider;

pub fn t0() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, 4)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

pub fn make_bar(instrument: &str, hour: i64, close: f64) -> Bar {
    Bar {
        instrument: instrument.to_string(),
        timeframe: Timeframe::H1,
        timestamp: t0() + Duration::hours(hour),
        open: close,
        high: close + 0.5,
        low: close - 0.5,
        close,
        volume: 1_000.0,
    }
}

pub fn key(instrument: &str) -> SeriesKey {
    SeriesKey::new(instrument, Timeframe::H1)
}

/// Broker whose quotes follow the last bar with zero spread. Submissions fill
/// at the order price unless a scripted result is queued.
pub struct MockBroker {
    balance: Mutex<f64>,
    close_credit: Mutex<f64>,
    pub limits: Option<InstrumentLimits>,
    quotes: Mutex<HashMap<String, Quote>>,
    script: Mutex<VecDeque<Result<Fill, ExecutionError>>>,
    statuses: Mutex<HashMap<String, OrderStatus>>,
    pub submitted: Mutex<Vec<OrderIntent>>,
    pub fail_quotes: AtomicBool,
}

impl MockBroker {
    pub fn new() -> Self {
        Self {
            balance: Mutex::new(10_000.0),
            close_credit: Mutex::new(0.0),
            limits: None,
            quotes: Mutex::new(HashMap::new()),
            script: Mutex::new(VecDeque::new()),
            statuses: Mutex::new(HashMap::new()),
            submitted: Mutex::new(Vec::new()),
            fail_quotes: AtomicBool::new(false),
        }
    }

    pub fn balance(&self) -> f64 {
        *self.balance.lock().unwrap()
    }

    /// Amount added to the balance whenever a close order is submitted.
    pub fn credit_on_close(&self, amount: f64) {
        *self.close_credit.lock().unwrap() = amount;
    }

    pub fn push_result(&self, result: Result<Fill, ExecutionError>) {
        self.script.lock().unwrap().push_back(result);
    }

    pub fn set_status(&self, broker_ref: &str, status: OrderStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(broker_ref.to_string(), status);
    }

    pub fn set_quote(&self, quote: Quote) {
        self.quotes
            .lock()
            .unwrap()
            .insert(quote.instrument.clone(), quote);
    }

    pub fn submissions(&self) -> Vec<OrderIntent> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrokerPort for MockBroker {
    async fn account_balance(&self) -> Result<f64, ExecutionError> {
        Ok(self.balance())
    }

    async fn instrument_limits(&self, _instrument: &str) -> Option<InstrumentLimits> {
        self.limits.clone()
    }

    async fn quote(&self, instrument: &str) -> Result<Quote, ExecutionError> {
        if self.fail_quotes.load(Ordering::SeqCst) {
            return Err(ExecutionError::Transient("quote service down".into()));
        }
        self.quotes
            .lock()
            .unwrap()
            .get(instrument)
            .cloned()
            .ok_or_else(|| ExecutionError::Transient("no quote".into()))
    }

    async fn submit(&self, order: &OrderIntent) -> Result<Fill, ExecutionError> {
        let n = {
            let mut submitted = self.submitted.lock().unwrap();
            submitted.push(order.clone());
            submitted.len()
        };
        if let OrderAction::Close { .. } = order.action {
            let credit = *self.close_credit.lock().unwrap();
            *self.balance.lock().unwrap() += credit;
        }
        match self.script.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(Fill {
                broker_ref: format!("mock-{}", n),
                price: order.price,
                volume: order.volume,
            }),
        }
    }

    async fn order_status(&self, broker_ref: &str) -> Result<OrderStatus, ExecutionError> {
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(broker_ref)
            .cloned()
            .unwrap_or(OrderStatus::Unknown))
    }

    fn on_bar(&self, bar: &Bar) {
        self.set_quote(Quote::new(bar.instrument.clone(), bar.close, bar.close));
    }
}

/// Prediction provider returning whatever it was last told to.
pub struct StubPredictor {
    result: Mutex<Result<PredictionScore, PredictionUnavailable>>,
    delay: Option<std::time::Duration>,
    pub observed: Mutex<Vec<TradeOutcome>>,
}

impl StubPredictor {
    pub fn new(result: Result<PredictionScore, PredictionUnavailable>) -> Self {
        Self {
            result: Mutex::new(result),
            delay: None,
            observed: Mutex::new(Vec::new()),
        }
    }

    pub fn bullish() -> Self {
        Self::new(Ok(PredictionScore::new(0.8, 0.9)))
    }

    pub fn slow(delay: std::time::Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::bullish()
        }
    }

    pub fn set(&self, result: Result<PredictionScore, PredictionUnavailable>) {
        *self.result.lock().unwrap() = result;
    }

    pub fn outcomes(&self) -> Vec<TradeOutcome> {
        self.observed.lock().unwrap().clone()
    }
}

#[async_trait]
impl PredictionProvider for StubPredictor {
    fn name(&self) -> &str {
        "stub"
    }

    async fn predict(
        &self,
        _window: &WindowSnapshot,
        _indicators: &IndicatorSnapshot,
    ) -> Result<PredictionScore, PredictionUnavailable> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.result.lock().unwrap().clone()
    }

    fn observe(&self, outcome: &TradeOutcome) {
        self.observed.lock().unwrap().push(outcome.clone());
    }
}

#[derive(Default)]
pub struct MemoryAudit {
    pub cycles: Mutex<Vec<CycleRecord>>,
    pub closed: Mutex<Vec<ClosedPosition>>,
    pub flushed: AtomicBool,
}

impl MemoryAudit {
    pub fn cycle_count(&self) -> usize {
        self.cycles.lock().unwrap().len()
    }

    pub fn closed_positions(&self) -> Vec<ClosedPosition> {
        self.closed.lock().unwrap().clone()
    }
}

impl AuditPort for MemoryAudit {
    fn record_cycle(&self, record: &CycleRecord) -> Result<(), EngineError> {
        self.cycles.lock().unwrap().push(record.clone());
        Ok(())
    }

    fn record_closed(&self, closed: &ClosedPosition) -> Result<(), EngineError> {
        self.closed.lock().unwrap().push(closed.clone());
        Ok(())
    }

    fn flush(&self) -> Result<(), EngineError> {
        self.flushed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub fn allowed(instruments: &[&str]) -> BTreeSet<String> {
    instruments.iter().map(|s| s.to_string()).collect()
}

/// Defaults with EURUSD and GBPUSD allowed and a fast retry backoff.
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.risk.allowed = allowed(&["EURUSD", "GBPUSD"]);
    config.retry_backoff = std::time::Duration::from_millis(1);
    config
}

pub struct Harness {
    pub engine: DecisionEngine,
    pub broker: Arc<MockBroker>,
    pub predictor: Arc<StubPredictor>,
    pub audit: Arc<MemoryAudit>,
}

pub fn harness_with(config: EngineConfig, broker: MockBroker, predictor: StubPredictor) -> Harness {
    let broker = Arc::new(broker);
    let predictor = Arc::new(predictor);
    let audit = Arc::new(MemoryAudit::default());
    let engine = DecisionEngine::new(config, broker.clone(), predictor.clone(), audit.clone());
    Harness {
        engine,
        broker,
        predictor,
        audit,
    }
}

pub fn harness() -> Harness {
    harness_with(test_config(), MockBroker::new(), StubPredictor::bullish())
}
