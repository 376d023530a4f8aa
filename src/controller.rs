//! Control loop: owns the authoritative state, drains serialized fill
//! and intent messages, runs per-tick exit checks and the admission
//! pipeline, and drives journal + checkpoint persistence.
//!
//! Locking discipline: one mutex guards positions, trades, trailing
//! state and counters. Mutations hold it for the duration of the state
//! change; journal appends, checkpoint writes and gateway calls happen
//! with the lock released.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{parse_hhmm, AppConfig};
use crate::domain::{
    ist_offset, ExitReason, Fill, OrderIntent, OrderRequest, OrderStatus, PortfolioState,
    RiskDecision, TradeRecord,
};
use crate::error::{Result, WardenError};
use crate::expiry::ExpiryRiskAdapter;
use crate::gateway::{BrokerGateway, MarketData};
use crate::lifecycle::{FillMeta, TradeLifecycleManager};
use crate::persistence::{
    self, CheckpointData, CheckpointStore, Journal, JournalEvent,
};
use crate::quality::{SignalContext, SignalQualityManager};
use crate::risk::RiskEngine;
use crate::sizing::{PositionSizer, SizeRequest};
use crate::stops::{StopEngine, TrailingState};
use crate::telemetry::{TelemetryBus, TelemetryEvent};

const CHANNEL_CAPACITY: usize = 256;

/// Channels into a running controller
pub struct ControllerHandles {
    pub intent_tx: mpsc::Sender<OrderIntent>,
    pub fill_tx: mpsc::Sender<Fill>,
    pub shutdown_tx: watch::Sender<bool>,
}

struct PendingOrder {
    signal_id: Uuid,
}

/// Everything behind the one state mutex
struct ControllerState {
    lifecycle: TradeLifecycleManager,
    risk: RiskEngine,
    quality: SignalQualityManager,
    trailing: HashMap<String, TrailingState>,
    prices: HashMap<String, Decimal>,
    realized_pnl: Decimal,
    pending_orders: HashMap<Uuid, PendingOrder>,
    /// Exit reason armed when a closing order is in flight
    pending_exits: HashMap<String, (ExitReason, String)>,
}

impl ControllerState {
    fn portfolio(&self, capital: Decimal, max_exposure_pct: Decimal) -> PortfolioState {
        PortfolioState::derive(
            capital,
            self.realized_pnl,
            self.lifecycle.active_trades(),
            &self.prices,
            max_exposure_pct,
        )
    }
}

pub struct Controller {
    config: AppConfig,
    session_close: chrono::NaiveTime,
    state: Mutex<ControllerState>,
    sizer: PositionSizer,
    stops: StopEngine,
    expiry: ExpiryRiskAdapter,
    gateway: Arc<dyn BrokerGateway>,
    market: Arc<dyn MarketData>,
    telemetry: TelemetryBus,
    journal: Mutex<Journal>,
    checkpoint: CheckpointStore,
    fill_rx: mpsc::Receiver<Fill>,
    intent_rx: mpsc::Receiver<OrderIntent>,
    shutdown_rx: watch::Receiver<bool>,
}

enum LoopEvent {
    Tick,
    Fill(Option<Fill>),
    Intent(Option<OrderIntent>),
    CheckpointDue,
    ShutdownChanged,
}

impl Controller {
    /// Recover state from disk and wire up the loop's channels.
    pub async fn new(
        config: AppConfig,
        gateway: Arc<dyn BrokerGateway>,
        market: Arc<dyn MarketData>,
        telemetry: TelemetryBus,
    ) -> Result<(Self, ControllerHandles)> {
        if let Err(errors) = config.validate() {
            return Err(WardenError::InvalidConfig(errors.join("; ")));
        }
        let session_open = parse_hhmm(&config.session.open_time)
            .ok_or_else(|| WardenError::InvalidConfig("session.open_time".into()))?;
        let session_close = parse_hhmm(&config.session.close_time)
            .ok_or_else(|| WardenError::InvalidConfig("session.close_time".into()))?;

        let data_dir = std::path::Path::new(&config.persistence.data_dir);
        std::fs::create_dir_all(data_dir)?;

        let recovered = persistence::recover(
            data_dir,
            config.account.capital,
            config.sizing.risk_per_trade_pct,
            session_open,
            session_close,
        )?;
        let journal = Journal::open(data_dir).await?;
        let checkpoint = CheckpointStore::new(data_dir);

        let mut risk = RiskEngine::new(&config.risk);
        if let Some(date) = recovered.day_date {
            risk.restore_day_pnl(date, recovered.day_realized);
        }
        if let Some(reason) = &recovered.halt_reason {
            risk.halt(reason.clone(), Utc::now());
        }

        let mut quality =
            SignalQualityManager::new(config.quality.clone(), session_open, session_close);
        quality.restore_counters(recovered.day_date, recovered.counters);

        let state = ControllerState {
            lifecycle: recovered.lifecycle,
            risk,
            quality,
            trailing: recovered.trailing,
            prices: HashMap::new(),
            realized_pnl: recovered.realized_pnl,
            pending_orders: HashMap::new(),
            pending_exits: HashMap::new(),
        };

        let (intent_tx, intent_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (fill_tx, fill_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let controller = Self {
            sizer: PositionSizer::new(config.sizing.clone()),
            stops: StopEngine::new(config.stops.clone()),
            expiry: ExpiryRiskAdapter::new(config.expiry.clone(), session_close),
            session_close,
            state: Mutex::new(state),
            gateway,
            market,
            telemetry,
            journal: Mutex::new(journal),
            checkpoint,
            fill_rx,
            intent_rx,
            shutdown_rx,
            config,
        };
        Ok((
            controller,
            ControllerHandles {
                intent_tx,
                fill_tx,
                shutdown_tx,
            },
        ))
    }

    /// Drive the loop until shutdown. Faults inside a tick never
    /// propagate out; only the final checkpoint error does.
    pub async fn run(mut self) -> Result<()> {
        info!(
            tick_ms = self.config.controller.tick_interval_ms,
            checkpoint_secs = self.config.persistence.checkpoint_interval_secs,
            dry_run = self.config.dry_run.enabled,
            "control loop started"
        );
        let mut tick =
            tokio::time::interval(Duration::from_millis(self.config.controller.tick_interval_ms));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut checkpoint_tick = tokio::time::interval(Duration::from_secs(
            self.config.persistence.checkpoint_interval_secs,
        ));
        checkpoint_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            let event = tokio::select! {
                _ = tick.tick() => LoopEvent::Tick,
                fill = self.fill_rx.recv() => LoopEvent::Fill(fill),
                intent = self.intent_rx.recv() => LoopEvent::Intent(intent),
                _ = checkpoint_tick.tick() => LoopEvent::CheckpointDue,
                _ = self.shutdown_rx.changed() => LoopEvent::ShutdownChanged,
            };

            match event {
                LoopEvent::Tick => self.on_tick(Utc::now()).await,
                LoopEvent::Fill(Some(fill)) => self.on_fill(fill, Utc::now()).await,
                LoopEvent::Intent(Some(intent)) => self.on_intent(intent, Utc::now()).await,
                LoopEvent::Fill(None) | LoopEvent::Intent(None) => {
                    info!("input channel closed, shutting down");
                    break;
                }
                LoopEvent::CheckpointDue => {
                    if let Err(e) = self.write_checkpoint().await {
                        // In-memory state stays authoritative; retried next interval
                        warn!(error = %e, "checkpoint deferred");
                    }
                }
                LoopEvent::ShutdownChanged => {
                    if *self.shutdown_rx.borrow() {
                        info!("shutdown requested");
                        break;
                    }
                }
            }
        }

        self.write_checkpoint().await?;
        {
            let state = self.state.lock().await;
            info!(
                trades = state.quality.trades_today(),
                vetoes = state.quality.vetoes_today(),
                realized = %state.realized_pnl,
                "control loop stopped"
            );
        }
        Ok(())
    }

    // ==================== Tick ====================

    async fn on_tick(&mut self, now: DateTime<Utc>) {
        let open_symbols: Vec<String> = {
            let state = self.state.lock().await;
            state
                .lifecycle
                .active_trades()
                .values()
                .filter(|t| t.qty != Decimal::ZERO)
                .map(|t| t.symbol.clone())
                .collect()
        };
        if open_symbols.is_empty() {
            return;
        }

        // Market reads happen before taking the lock
        let mut quotes: Vec<(String, Decimal, Option<Decimal>)> = Vec::new();
        for symbol in open_symbols {
            match self.market.last_price(&symbol).await {
                Some(price) => {
                    let atr = self.market.atr(&symbol).await;
                    quotes.push((symbol, price, atr));
                }
                None => {
                    // Input-data fault: this symbol skips the tick
                    debug!(%symbol, "no price this tick");
                }
            }
        }

        let square_off = self.config.session.enforce_hours
            && now.with_timezone(&ist_offset()).time() >= self.session_close;
        let mut exits: Vec<OrderRequest> = Vec::new();
        let mut events: Vec<JournalEvent> = Vec::new();
        {
            let mut state = self.state.lock().await;
            for (symbol, price, atr) in quotes {
                state.prices.insert(symbol.clone(), price);
                state.lifecycle.mark_to_market(&symbol, price);

                if state.pending_exits.contains_key(&symbol) {
                    continue;
                }
                let trade = match state.lifecycle.trade(&symbol) {
                    Some(t) if t.qty != Decimal::ZERO => t.clone(),
                    _ => continue,
                };
                let mut trailing = state
                    .trailing
                    .get(&symbol)
                    .cloned()
                    .unwrap_or_else(|| self.stops.new_trailing(trade.entry_price));
                let risk_exit = square_off.then_some("session close square-off");
                let decision =
                    self.stops
                        .evaluate_tick(&trade, &mut trailing, price, atr, risk_exit);
                state.trailing.insert(symbol.clone(), trailing);

                if let Some(exit) = decision {
                    info!(
                        %symbol,
                        reason = exit.reason.as_str(),
                        detail = %exit.detail,
                        "exit triggered"
                    );
                    self.telemetry.publish(TelemetryEvent::ExitTriggered {
                        symbol: symbol.clone(),
                        exit_reason: exit.reason,
                        price,
                        timestamp: now,
                    });
                    let order = OrderRequest::new(
                        &symbol,
                        trade.side.opposite(),
                        trade.qty.abs(),
                        price,
                        &trade.strategy,
                    );
                    state
                        .pending_exits
                        .insert(symbol.clone(), (exit.reason, exit.detail));
                    state.pending_orders.insert(
                        order.order_id,
                        PendingOrder {
                            signal_id: trade.signal_id,
                        },
                    );
                    events.push(JournalEvent::OrderSubmitted {
                        order: order.clone(),
                    });
                    exits.push(order);
                }
            }
        }

        for event in events {
            self.append_journal(event, now).await;
        }
        for order in exits {
            self.submit(order, None, now).await;
        }
    }

    // ==================== Admission ====================

    async fn on_intent(&mut self, intent: OrderIntent, now: DateTime<Utc>) {
        if !intent.is_new_entry() {
            self.close_position(&intent, now).await;
            return;
        }
        if self.config.session.enforce_hours
            && now.with_timezone(&ist_offset()).time() >= self.session_close
        {
            debug!(symbol = %intent.symbol, "entry after session close skipped");
            return;
        }

        let expiry = self.expiry.evaluate(
            &intent.symbol,
            now,
            is_option_symbol(&intent.symbol),
            true,
        );
        if !expiry.allow_new_entry {
            info!(symbol = %intent.symbol, reason = %expiry.reason, "expiry block");
            self.telemetry.publish(TelemetryEvent::RiskBlocked {
                symbol: intent.symbol.clone(),
                decision: RiskDecision::block(expiry.reason),
                timestamp: now,
            });
            return;
        }

        // Input-data fault: no price means this intent is dropped
        let price = match self.market.last_price(&intent.symbol).await {
            Some(p) if p > Decimal::ZERO => p,
            _ => {
                warn!(symbol = %intent.symbol, "no price for intent, skipped");
                return;
            }
        };
        let atr = self.market.atr(&intent.symbol).await;

        let capital = self.config.account.capital;
        let (order, event, quality_score) = {
            let mut state = self.state.lock().await;
            if state.pending_exits.contains_key(&intent.symbol) {
                debug!(symbol = %intent.symbol, "exit in flight, entry skipped");
                return;
            }

            let score = state.quality.score_signal(&SignalContext {
                symbol: &intent.symbol,
                strategy: &intent.strategy,
                price,
                atr,
                risk_per_trade: capital * self.config.sizing.risk_per_trade_pct,
                now,
            });
            if score.vetoed {
                info!(symbol = %intent.symbol, reason = %score.reason, "signal vetoed");
                if let Some(veto) = score.veto_reason {
                    self.telemetry.publish(TelemetryEvent::SignalVetoed {
                        symbol: intent.symbol.clone(),
                        strategy: intent.strategy.clone(),
                        veto,
                        reason: score.reason,
                        timestamp: now,
                    });
                }
                return;
            }

            state.prices.insert(intent.symbol.clone(), price);
            let portfolio = state.portfolio(capital, self.config.account.max_exposure_pct);
            let lot_size = self.config.sizing.lot_size_for(&intent.symbol);
            let sized = self.sizer.size_order(&SizeRequest {
                portfolio: &portfolio,
                symbol: &intent.symbol,
                strategy: &intent.strategy,
                side: intent.side,
                price,
                lot_size,
                atr,
            });
            let scale = Decimal::from_f64(expiry.risk_scale).unwrap_or(Decimal::ONE);
            // Expiry scaling must not break the lot multiple
            let qty = ((sized * scale) / lot_size).floor() * lot_size;
            if qty <= Decimal::ZERO {
                debug!(symbol = %intent.symbol, "sized to zero, skipped");
                return;
            }

            let decision = state.risk.check_order(&intent, qty, price, &portfolio, now);
            let admitted = match decision {
                RiskDecision::Allow { .. } => qty,
                RiskDecision::Reduce { adjusted_qty, .. } => adjusted_qty,
                RiskDecision::Block { .. } => {
                    self.telemetry.publish(TelemetryEvent::RiskBlocked {
                        symbol: intent.symbol.clone(),
                        decision,
                        timestamp: now,
                    });
                    return;
                }
                RiskDecision::HaltSession { reason } => {
                    self.telemetry.publish(TelemetryEvent::SessionHalted {
                        reason: reason.clone(),
                        timestamp: now,
                    });
                    drop(state);
                    self.append_journal(JournalEvent::SessionHalted { reason }, now)
                        .await;
                    return;
                }
            };

            let order = OrderRequest::new(&intent.symbol, intent.side, admitted, price, &intent.strategy);
            state
                .quality
                .record_execution(&intent.symbol, &intent.strategy, now);
            state.pending_orders.insert(
                order.order_id,
                PendingOrder {
                    signal_id: intent.intent_id,
                },
            );
            let event = JournalEvent::OrderSubmitted {
                order: order.clone(),
            };
            (order, event, score.score)
        };

        self.append_journal(event, now).await;
        self.submit(order, Some(quality_score), now).await;
    }

    /// FLAT intent: close any open position at market
    async fn close_position(&mut self, intent: &OrderIntent, now: DateTime<Utc>) {
        let price = match self.market.last_price(&intent.symbol).await {
            Some(p) if p > Decimal::ZERO => p,
            _ => {
                warn!(symbol = %intent.symbol, "no price for close, skipped");
                return;
            }
        };
        let order = {
            let mut state = self.state.lock().await;
            if state.pending_exits.contains_key(&intent.symbol) {
                return;
            }
            let trade = match state.lifecycle.trade(&intent.symbol) {
                Some(t) if t.qty != Decimal::ZERO => t.clone(),
                _ => {
                    debug!(symbol = %intent.symbol, "nothing to close");
                    return;
                }
            };
            let order = OrderRequest::new(
                &intent.symbol,
                trade.side.opposite(),
                trade.qty.abs(),
                price,
                &trade.strategy,
            );
            state.pending_exits.insert(
                intent.symbol.clone(),
                (ExitReason::Manual, intent.reason.clone()),
            );
            state.pending_orders.insert(
                order.order_id,
                PendingOrder {
                    signal_id: trade.signal_id,
                },
            );
            order
        };
        self.append_journal(
            JournalEvent::OrderSubmitted {
                order: order.clone(),
            },
            now,
        )
        .await;
        self.submit(order, None, now).await;
    }

    // ==================== Fills ====================

    async fn on_fill(&mut self, fill: Fill, now: DateTime<Utc>) {
        let capital = self.config.account.capital;
        let atr = self.market.atr(&fill.symbol).await;
        let mut events: Vec<JournalEvent> = Vec::new();
        let mut closed: Vec<TradeRecord> = Vec::new();

        {
            let mut state = self.state.lock().await;
            let signal_id = state
                .pending_orders
                .get(&fill.order_id)
                .map(|p| p.signal_id)
                .unwrap_or_else(Uuid::nil);
            // Partial fills keep the mapping; every slice of the order
            // attributes to the same signal
            if fill.status.is_terminal() {
                state.pending_orders.remove(&fill.order_id);
            }

            match fill.status {
                OrderStatus::Rejected | OrderStatus::Cancelled => {
                    // Gateway fault: no fill, no position mutation
                    warn!(
                        symbol = %fill.symbol,
                        status = ?fill.status,
                        "order did not execute"
                    );
                    state.pending_exits.remove(&fill.symbol);
                    return;
                }
                OrderStatus::Submitted | OrderStatus::PartiallyFilled | OrderStatus::Filled => {}
            }
            if fill.filled_qty <= Decimal::ZERO {
                return;
            }

            let was_open = state
                .lifecycle
                .trade(&fill.symbol)
                .map(|t| t.qty != Decimal::ZERO)
                .unwrap_or(false);

            let meta = FillMeta {
                signal_id,
                capital,
                timestamp: fill.timestamp,
            };
            let outcome = match state.lifecycle.open_or_update(
                &fill.symbol,
                fill.side,
                fill.filled_qty,
                fill.fill_price,
                &fill.strategy,
                &meta,
            ) {
                Ok(o) => o,
                Err(e) => {
                    error!(symbol = %fill.symbol, error = %e, "fill rejected");
                    return;
                }
            };
            state.prices.insert(fill.symbol.clone(), fill.fill_price);
            events.push(JournalEvent::OrderFill {
                fill: fill.clone(),
                signal_id,
                capital,
            });

            let reversed_out = outcome.reversed.is_some();
            if let Some(reversed) = outcome.reversed {
                absorb_close(&mut state, &reversed, now);
                events.push(JournalEvent::TradeClosed {
                    record: reversed.clone(),
                    exit_price: fill.fill_price,
                });
                closed.push(reversed);
            }

            let trade = outcome.trade;
            if trade.qty == Decimal::ZERO {
                let (reason, detail) = state
                    .pending_exits
                    .remove(&fill.symbol)
                    .unwrap_or((ExitReason::Manual, "flattened by fill".to_string()));
                match state.lifecycle.finalize(
                    &fill.symbol,
                    fill.fill_price,
                    reason,
                    Some(detail),
                    now,
                ) {
                    Ok(record) => {
                        absorb_close(&mut state, &record, now);
                        events.push(JournalEvent::TradeClosed {
                            record: record.clone(),
                            exit_price: fill.fill_price,
                        });
                        closed.push(record);
                    }
                    Err(e) => error!(symbol = %fill.symbol, error = %e, "finalize failed"),
                }
            } else if !was_open || reversed_out {
                // Fresh position (first open or reversal residual): attach
                // levels and arm trailing
                let levels = self
                    .stops
                    .initial_levels(trade.entry_price, trade.side, atr);
                state.lifecycle.set_levels(
                    &fill.symbol,
                    Some(levels.stop),
                    Some(levels.target),
                );
                state
                    .trailing
                    .insert(fill.symbol.clone(), self.stops.new_trailing(trade.entry_price));
                debug!(
                    symbol = %fill.symbol,
                    method = levels.method.as_str(),
                    stop = %levels.stop,
                    target = %levels.target,
                    "levels attached"
                );
                events.push(JournalEvent::LevelsSet {
                    symbol: fill.symbol.clone(),
                    stop: Some(levels.stop),
                    target: Some(levels.target),
                });
            }
        }

        for event in events {
            self.append_journal(event, now).await;
        }
        self.telemetry.publish(TelemetryEvent::OrderFilled {
            symbol: fill.symbol.clone(),
            side: fill.side.as_str().to_string(),
            qty: fill.filled_qty,
            price: fill.fill_price,
            timestamp: now,
        });
        for record in closed {
            self.telemetry
                .publish(TelemetryEvent::TradeClosed { record });
        }

        // Checkpoint on every fill; a failure is retried on the interval
        if let Err(e) = self.write_checkpoint().await {
            warn!(error = %e, "post-fill checkpoint deferred");
        }
    }

    // ==================== Persistence and I/O helpers ====================

    async fn append_journal(&self, event: JournalEvent, now: DateTime<Utc>) {
        let mut journal = self.journal.lock().await;
        if let Err(e) = journal.append(event, now).await {
            // In-memory state stays authoritative
            error!(error = %e, "journal append failed");
        }
    }

    async fn submit(&self, order: OrderRequest, quality_score: Option<f64>, now: DateTime<Utc>) {
        self.telemetry.publish(TelemetryEvent::OrderSubmitted {
            symbol: order.symbol.clone(),
            side: order.side.as_str().to_string(),
            qty: order.qty,
            price: order.price,
            quality_score,
            timestamp: now,
        });
        let timeout = Duration::from_millis(self.config.controller.order_timeout_ms);
        let result = tokio::time::timeout(timeout, self.gateway.submit_order(&order)).await;
        let failure = match result {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            // A timed-out submission is a failure, never an implicit success
            Err(_) => Some(format!("timeout after {}ms", timeout.as_millis())),
        };
        if let Some(error) = failure {
            warn!(symbol = %order.symbol, %error, "order submission failed");
            let mut state = self.state.lock().await;
            state.pending_orders.remove(&order.order_id);
            state.pending_exits.remove(&order.symbol);
        }
    }

    async fn write_checkpoint(&self) -> Result<()> {
        let seq = self.journal.lock().await.last_seq();
        let data = {
            let state = self.state.lock().await;
            CheckpointData {
                seq,
                created_at: Utc::now(),
                capital: self.config.account.capital,
                realized_pnl: state.realized_pnl,
                trades: state.lifecycle.active_trades().values().cloned().collect(),
                trailing: state.trailing.clone(),
                day_date: state.risk.day_date(),
                day_realized: state.risk.day_pnl(),
                halt_reason: state.risk.halt_reason().map(String::from),
                counters: state.quality.counters_snapshot(),
            }
        };
        // Snapshot copied; lock released before disk I/O
        self.checkpoint.save(&data).await
    }

    /// Derived portfolio snapshot for external readers
    pub async fn portfolio_snapshot(&self) -> PortfolioState {
        let state = self.state.lock().await;
        state.portfolio(
            self.config.account.capital,
            self.config.account.max_exposure_pct,
        )
    }
}

/// Fold a finalized trade into the risk and quality trackers
fn absorb_close(state: &mut ControllerState, record: &TradeRecord, now: DateTime<Utc>) {
    use rust_decimal::prelude::ToPrimitive;
    state.realized_pnl += record.realized_pnl;
    state.risk.record_realized(record.realized_pnl, now);
    state.quality.update_trade_outcome(
        &record.symbol,
        &record.strategy,
        record.r_multiple.to_f64().unwrap_or(0.0),
        now,
    );
    state.trailing.remove(&record.symbol);
    info!(
        symbol = %record.symbol,
        pnl = %record.realized_pnl,
        r = %record.r_multiple,
        quality = ?record.quality,
        reason = record.exit_reason.as_str(),
        "trade closed"
    );
}

/// NSE-style option symbols end in a strike followed by CE/PE. The
/// digit check keeps equity tickers like RELIANCE out.
fn is_option_symbol(symbol: &str) -> bool {
    symbol
        .strip_suffix("CE")
        .or_else(|| symbol.strip_suffix("PE"))
        .and_then(|body| body.chars().last())
        .is_some_and(|c| c.is_ascii_digit())
}
