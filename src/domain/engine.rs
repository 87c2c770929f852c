//! Decision loop.
//!
//! One cycle per bar: update the window, compute indicators, reconcile and
//! manage open positions, score, risk-check and dispatch. Streams for
//! different (instrument, timeframe) keys run as independent tasks; they
//! share the ledger, which is locked once per cycle for position management
//! and once for the risk check plus dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::cycle::{CycleAction, CycleRecord, CycleStage};
use super::error::{EngineError, ExecutionError, PredictionUnavailable};
use super::execution::ExecutionCosts;
use super::indicator::{IndicatorRole, IndicatorSnapshot};
use super::indicator_bank::{IndicatorBank, IndicatorConfig};
use super::ledger::Ledger;
use super::market_window::{MarketWindow, WindowSnapshot};
use super::ohlcv::{Bar, Quote, SeriesKey, Timeframe};
use super::order::{Fill, OrderAction, OrderIntent, OrderStatus};
use super::position::{ClosedPosition, ExitReason, OpenParams, PositionId};
use super::prediction::{PredictionScore, TradeOutcome};
use super::risk::{Decision, RiskConfig, RiskContext, RiskManager};
use super::signal::{Signal, SignalConfig, aggregate};
use crate::ports::audit_port::AuditPort;
use crate::ports::broker_port::BrokerPort;
use crate::ports::prediction_port::PredictionProvider;

const STREAM_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub window_capacity: usize,
    pub timeframe: Timeframe,
    pub prediction_timeout: Duration,
    /// Pending positions older than this are reverted.
    pub pending_timeout: chrono::Duration,
    pub max_submit_retries: u32,
    pub retry_backoff: Duration,
    pub indicators: IndicatorConfig,
    pub signal: SignalConfig,
    pub risk: RiskConfig,
    pub costs: ExecutionCosts,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            window_capacity: 200,
            timeframe: Timeframe::H1,
            prediction_timeout: Duration::from_millis(500),
            pending_timeout: chrono::Duration::seconds(300),
            max_submit_retries: 2,
            retry_backoff: Duration::from_millis(100),
            indicators: IndicatorConfig::default(),
            signal: SignalConfig::default(),
            risk: RiskConfig::default(),
            costs: ExecutionCosts::default(),
        }
    }
}

/// Input to [`DecisionEngine::run`].
#[derive(Debug, Clone)]
pub enum FeedEvent {
    Bar(Bar),
    /// The market data connection is gone. Fatal.
    Disconnected(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub cycles: usize,
    pub skipped: usize,
    pub opened: usize,
    pub closed: usize,
    pub rejected: usize,
}

impl RunSummary {
    pub fn record(&mut self, record: &CycleRecord) {
        self.cycles += 1;
        if record.outcome.is_skipped() {
            self.skipped += 1;
        }
        self.opened += record.opened().count();
        self.closed += record.closed().count();
        self.rejected += record
            .actions
            .iter()
            .filter(|a| matches!(a, CycleAction::Rejected(_)))
            .count();
    }

    pub fn merge(&mut self, other: &RunSummary) {
        self.cycles += other.cycles;
        self.skipped += other.skipped;
        self.opened += other.opened;
        self.closed += other.closed;
        self.rejected += other.rejected;
    }
}

struct Inner {
    config: EngineConfig,
    bank: IndicatorBank,
    risk: RiskManager,
    broker: Arc<dyn BrokerPort>,
    predictor: Arc<dyn PredictionProvider>,
    audit: Arc<dyn AuditPort>,
    ledger: Mutex<Ledger>,
}

/// Cheap to clone; clones share the ledger and collaborators.
#[derive(Clone)]
pub struct DecisionEngine {
    inner: Arc<Inner>,
}

impl DecisionEngine {
    pub fn new(
        config: EngineConfig,
        broker: Arc<dyn BrokerPort>,
        predictor: Arc<dyn PredictionProvider>,
        audit: Arc<dyn AuditPort>,
    ) -> Self {
        let ledger = Ledger::new(config.costs.clone());
        let inner = Inner {
            bank: IndicatorBank::new(config.indicators.clone()),
            risk: RiskManager::new(config.risk.clone()),
            config,
            broker,
            predictor,
            audit,
            ledger: Mutex::new(ledger),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn new_window(&self, key: SeriesKey) -> MarketWindow {
        MarketWindow::new(key, self.inner.config.window_capacity)
    }

    /// A copy of the ledger as it is right now.
    pub async fn ledger_snapshot(&self) -> Ledger {
        self.inner.ledger.lock().await.clone()
    }

    /// Run one decision cycle for `bar`. Never fails: problems are logged and
    /// recorded as a skipped cycle.
    pub async fn process_bar(&self, window: &mut MarketWindow, bar: Bar) -> CycleRecord {
        let mut record = CycleRecord::new(bar.key(), bar.timestamp);
        let mut closed = Vec::new();

        self.cycle(window, bar, &mut record, &mut closed).await;

        if let Err(e) = self.inner.audit.record_cycle(&record) {
            warn!(key = %record.key, error = %e, "audit record failed");
        }
        for c in &closed {
            self.inner.predictor.observe(&TradeOutcome::from(c));
        }
        record
    }

    async fn cycle(
        &self,
        window: &mut MarketWindow,
        bar: Bar,
        record: &mut CycleRecord,
        closed: &mut Vec<ClosedPosition>,
    ) {
        let key = record.key.clone();
        let at = bar.timestamp;

        if let Err(e) = window.push(bar.clone()) {
            warn!(key = %key, error = %e, "bar rejected, cycle skipped");
            record.skip(e.to_string());
            return;
        }
        self.inner.broker.on_bar(&bar);
        record.stage = CycleStage::Updated;

        let snapshot = window.snapshot();
        let indicators = self.inner.bank.compute(&snapshot);
        debug!(
            key = %key,
            bars = snapshot.len(),
            unavailable = indicators.unavailable().len(),
            "indicators computed"
        );

        let broker = &self.inner.broker;
        let quote = match broker.quote(&key.instrument).await {
            Ok(q) if q.bid > 0.0 && q.ask >= q.bid => q,
            Ok(q) => {
                warn!(key = %key, bid = q.bid, ask = q.ask, "unusable quote, cycle skipped");
                record.skip(format!("unusable quote {}/{}", q.bid, q.ask));
                return;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "quote unavailable, cycle skipped");
                record.skip(format!("quote unavailable: {}", e));
                return;
            }
        };
        let balance = match broker.account_balance().await {
            Ok(b) => b,
            Err(e) => {
                warn!(key = %key, error = %e, "balance unavailable, cycle skipped");
                record.skip(format!("balance unavailable: {}", e));
                return;
            }
        };
        let limits = broker.instrument_limits(&key.instrument).await;

        {
            let mut ledger = self.inner.ledger.lock().await;
            self.reconcile_pending(&mut ledger, &key, at, record).await;
            self.manage_exits(&mut ledger, &quote, at, record, closed)
                .await;
            self.trail_stops(&mut ledger, &indicators, &quote, record);
        }

        let prediction = self.predict(&snapshot, &indicators, record).await;
        let signal = aggregate(&indicators, prediction.as_ref(), &self.inner.config.signal);
        debug!(
            key = %key,
            direction = %signal.direction,
            strength = signal.strength,
            "signal aggregated"
        );
        record.prediction = prediction;
        record.signal = Some(signal.clone());
        record.stage = CycleStage::Scored;

        let mut ledger = self.inner.ledger.lock().await;
        let ctx = RiskContext {
            instrument: &key.instrument,
            quote: &quote,
            balance,
            broker_limits: limits.as_ref(),
            indicators: &indicators,
        };
        self.decide_and_dispatch(&mut ledger, &signal, &ctx, at, record, closed)
            .await;
    }

    async fn predict(
        &self,
        snapshot: &WindowSnapshot,
        indicators: &IndicatorSnapshot,
        record: &mut CycleRecord,
    ) -> Option<PredictionScore> {
        let timeout = self.inner.config.prediction_timeout;
        let result = tokio::time::timeout(timeout, self.inner.predictor.predict(snapshot, indicators))
            .await
            .unwrap_or(Err(PredictionUnavailable::TimedOut {
                millis: timeout.as_millis() as u64,
            }));
        match result {
            Ok(score) => Some(score),
            Err(e) => {
                info!(
                    key = %record.key,
                    provider = self.inner.predictor.name(),
                    reason = %e,
                    "prediction unavailable, using indicators only"
                );
                record.prediction_error = Some(e.to_string());
                None
            }
        }
    }

    async fn decide_and_dispatch(
        &self,
        ledger: &mut Ledger,
        signal: &Signal,
        ctx: &RiskContext<'_>,
        at: NaiveDateTime,
        record: &mut CycleRecord,
        closed: &mut Vec<ClosedPosition>,
    ) {
        let mut ctx = *ctx;
        loop {
            let decision = self.inner.risk.evaluate(signal, &ctx, ledger);
            record.stage = CycleStage::RiskChecked;
            match decision {
                Decision::NoAction => break,
                Decision::Reject(reason) => {
                    info!(key = %record.key, reason = %reason, "signal rejected");
                    record.actions.push(CycleAction::Rejected(reason));
                    break;
                }
                Decision::ClosePosition { id, reason } => {
                    let done = self
                        .close_position(ledger, id, reason, ctx.quote, at, record, closed)
                        .await;
                    if !done {
                        break;
                    }
                    // Follow-up opens are sized on the balance after the close.
                    match self.inner.broker.account_balance().await {
                        Ok(balance) => ctx.balance = balance,
                        Err(e) => {
                            warn!(key = %record.key, error = %e, "balance unavailable after close");
                            break;
                        }
                    }
                }
                Decision::OpenPosition(params) => {
                    self.open_position(ledger, params, at, record).await;
                    break;
                }
            }
        }
        record.stage = CycleStage::Dispatched;
    }

    async fn submit_with_retry(&self, order: &OrderIntent) -> Result<Fill, ExecutionError> {
        let retries = self.inner.config.max_submit_retries;
        let mut attempt = 0;
        loop {
            match self.inner.broker.submit(order).await {
                Err(ExecutionError::Transient(reason)) if attempt < retries => {
                    attempt += 1;
                    warn!(order = %order, attempt, reason = %reason, "transient submit failure, retrying");
                    tokio::time::sleep(self.inner.config.retry_backoff).await;
                }
                other => return other,
            }
        }
    }

    async fn open_position(
        &self,
        ledger: &mut Ledger,
        params: OpenParams,
        at: NaiveDateTime,
        record: &mut CycleRecord,
    ) {
        let order = OrderIntent {
            action: OrderAction::Open,
            instrument: params.instrument.clone(),
            direction: params.direction,
            volume: params.volume,
            price: params.entry_price,
            stop_loss: Some(params.stop_loss),
            take_profit: Some(params.take_profit),
        };

        match self.submit_with_retry(&order).await {
            Ok(fill) => {
                let filled = OpenParams {
                    entry_price: fill.price,
                    ..params
                };
                let position = ledger.open_filled(&filled, at, fill.broker_ref);
                info!(
                    id = position.id,
                    instrument = %position.instrument,
                    direction = %position.direction,
                    volume = position.volume,
                    price = position.entry_price,
                    risk = position.risk,
                    "position opened"
                );
                record.actions.push(CycleAction::Opened {
                    id: position.id,
                    direction: position.direction,
                    volume: position.volume,
                    price: position.entry_price,
                });
            }
            Err(ExecutionError::Ambiguous { broker_ref }) => {
                let position = ledger.open_pending(&params, at, broker_ref.clone());
                warn!(id = position.id, broker_ref = %broker_ref, "fill ambiguous, position pending");
                record.actions.push(CycleAction::Pending {
                    id: position.id,
                    broker_ref,
                });
            }
            Err(e) => {
                warn!(order = %order, error = %e, "open order failed");
                record.actions.push(CycleAction::SubmitFailed {
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Returns true if the position was closed.
    #[allow(clippy::too_many_arguments)]
    async fn close_position(
        &self,
        ledger: &mut Ledger,
        id: PositionId,
        reason: ExitReason,
        quote: &Quote,
        at: NaiveDateTime,
        record: &mut CycleRecord,
        closed: &mut Vec<ClosedPosition>,
    ) -> bool {
        let Some(position) = ledger.position(id).cloned() else {
            return false;
        };
        let order = OrderIntent {
            action: OrderAction::Close { position_id: id },
            instrument: position.instrument.clone(),
            direction: position.direction,
            volume: position.volume,
            price: quote.exit_price(position.direction),
            stop_loss: None,
            take_profit: None,
        };

        let fill = match self.submit_with_retry(&order).await {
            Ok(fill) => fill,
            Err(e) => {
                warn!(id, order = %order, error = %e, "close order failed, position stays open");
                record.actions.push(CycleAction::SubmitFailed {
                    reason: e.to_string(),
                });
                return false;
            }
        };

        match ledger.close(id, fill.price, at, reason) {
            Ok(c) => {
                info!(
                    id,
                    instrument = %position.instrument,
                    reason = %reason,
                    price = c.exit_price,
                    pnl = c.realized_pnl,
                    "position closed"
                );
                record.actions.push(CycleAction::Closed {
                    id,
                    reason,
                    price: c.exit_price,
                    pnl: c.realized_pnl,
                });
                if let Err(e) = self.inner.audit.record_closed(&c) {
                    warn!(id, error = %e, "audit of closed position failed");
                }
                closed.push(c);
                true
            }
            Err(e) => {
                warn!(id, error = %e, "ledger refused close");
                false
            }
        }
    }

    async fn reconcile_pending(
        &self,
        ledger: &mut Ledger,
        key: &SeriesKey,
        at: NaiveDateTime,
        record: &mut CycleRecord,
    ) {
        let pending: Vec<_> = ledger
            .pending_positions()
            .filter(|p| p.instrument == key.instrument)
            .map(|p| (p.id, p.broker_ref.clone().unwrap_or_default(), p.opened_at))
            .collect();

        for (id, broker_ref, opened_at) in pending {
            let status = match self.inner.broker.order_status(&broker_ref).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(id, broker_ref = %broker_ref, error = %e, "order status unavailable");
                    continue;
                }
            };
            let result = match status {
                OrderStatus::Filled(fill) => ledger.confirm(id, fill.price).map(|p| {
                    info!(id, price = p.entry_price, "pending position confirmed");
                    CycleAction::Confirmed {
                        id,
                        price: p.entry_price,
                    }
                }),
                OrderStatus::Rejected(_) | OrderStatus::Unknown => ledger.revert(id).map(|_| {
                    info!(id, broker_ref = %broker_ref, "pending position reverted");
                    CycleAction::Reverted { id }
                }),
                OrderStatus::Pending if at - opened_at > self.inner.config.pending_timeout => {
                    ledger.revert(id).map(|_| {
                        warn!(id, broker_ref = %broker_ref, "pending position timed out, reverted");
                        CycleAction::Reverted { id }
                    })
                }
                OrderStatus::Pending => continue,
            };
            match result {
                Ok(action) => record.actions.push(action),
                Err(e) => warn!(id, error = %e, "pending reconciliation failed"),
            }
        }
    }

    async fn manage_exits(
        &self,
        ledger: &mut Ledger,
        quote: &Quote,
        at: NaiveDateTime,
        record: &mut CycleRecord,
        closed: &mut Vec<ClosedPosition>,
    ) {
        for decision in self.inner.risk.check_exits(ledger, quote) {
            if let Decision::ClosePosition { id, reason } = decision {
                self.close_position(ledger, id, reason, quote, at, record, closed)
                    .await;
            }
        }
    }

    fn trail_stops(
        &self,
        ledger: &mut Ledger,
        indicators: &IndicatorSnapshot,
        quote: &Quote,
        record: &mut CycleRecord,
    ) {
        let atr = indicators.simple(IndicatorRole::Atr);
        for adj in self.inner.risk.trail_stops(ledger, atr, quote) {
            match ledger.adjust_stop(adj.id, adj.new_stop) {
                Ok(true) => {
                    debug!(id = adj.id, stop = adj.new_stop, "stop trailed");
                    record.actions.push(CycleAction::StopMoved {
                        id: adj.id,
                        stop: adj.new_stop,
                    });
                }
                Ok(false) => {}
                Err(e) => warn!(id = adj.id, error = %e, "stop adjustment failed"),
            }
        }
    }

    /// Drive the engine from a feed until it drains, a shutdown is signalled,
    /// or the feed reports a disconnect. Each key gets its own task; the
    /// shutdown flag is checked between cycles, never inside one.
    pub async fn run(
        &self,
        mut feed: mpsc::Receiver<FeedEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<RunSummary, EngineError> {
        let mut streams: HashMap<SeriesKey, mpsc::Sender<Bar>> = HashMap::new();
        let mut tasks: JoinSet<RunSummary> = JoinSet::new();
        let mut shutdown_live = true;
        let mut fatal = None;

        loop {
            tokio::select! {
                changed = shutdown.changed(), if shutdown_live => {
                    match changed {
                        Ok(()) if *shutdown.borrow() => {
                            info!("shutdown requested, draining streams");
                            break;
                        }
                        Ok(()) => {}
                        Err(_) => shutdown_live = false,
                    }
                }
                event = feed.recv() => {
                    match event {
                        None => {
                            info!(streams = streams.len(), "feed drained");
                            break;
                        }
                        Some(FeedEvent::Disconnected(reason)) => {
                            error!(reason = %reason, "data feed lost");
                            fatal = Some(EngineError::FeedClosed { reason });
                            break;
                        }
                        Some(FeedEvent::Bar(bar)) => {
                            let key = bar.key();
                            let tx = streams
                                .entry(key.clone())
                                .or_insert_with(|| self.spawn_stream(key.clone(), &mut tasks, shutdown.clone()));
                            if tx.send(bar).await.is_err() {
                                warn!(key = %key, "stream task gone, bar dropped");
                            }
                        }
                    }
                }
            }
        }

        drop(streams);
        let mut summary = RunSummary::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(s) => summary.merge(&s),
                Err(e) => error!(error = %e, "stream task failed"),
            }
        }
        if let Err(e) = self.inner.audit.flush() {
            warn!(error = %e, "audit flush failed");
        }

        info!(
            cycles = summary.cycles,
            skipped = summary.skipped,
            opened = summary.opened,
            closed = summary.closed,
            rejected = summary.rejected,
            "engine stopped"
        );
        match fatal {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    fn spawn_stream(
        &self,
        key: SeriesKey,
        tasks: &mut JoinSet<RunSummary>,
        shutdown: watch::Receiver<bool>,
    ) -> mpsc::Sender<Bar> {
        let (tx, mut rx) = mpsc::channel::<Bar>(STREAM_CHANNEL_CAPACITY);
        let engine = self.clone();
        debug!(key = %key, "stream started");
        tasks.spawn(async move {
            let mut window = engine.new_window(key.clone());
            let mut summary = RunSummary::default();
            while let Some(bar) = rx.recv().await {
                if *shutdown.borrow() {
                    info!(key = %key, "stream stopping on shutdown");
                    break;
                }
                let record = engine.process_bar(&mut window, bar).await;
                summary.record(&record);
            }
            summary
        });
        tx
    }
}
