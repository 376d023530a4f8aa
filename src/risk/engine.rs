use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::RiskConfig;
use crate::domain::{OrderIntent, PortfolioState, RiskDecision};

use super::checks::{
    AdmissionCheck, CheckContext, DailyLossCheck, HaltCheck, PerTradeRiskCheck,
    PositionLimitCheck, SessionState, ThrottleCheck,
};

/// A session-halt transition, kept for diagnostics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HaltEvent {
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

const MAX_HALT_EVENTS: usize = 100;

#[derive(Debug, Clone, Default)]
struct DailyPnl {
    date: Option<NaiveDate>,
    realized: Decimal,
}

/// Final admission gate. Runs the fixed-precedence chain and owns the
/// sticky session halt: once set it survives every later check and every
/// daily rollover, until an explicit reset.
pub struct RiskEngine {
    checks: Vec<Box<dyn AdmissionCheck>>,
    session: SessionState,
    daily: DailyPnl,
    halt_events: Vec<HaltEvent>,
}

impl RiskEngine {
    pub fn new(config: &RiskConfig) -> Self {
        let checks: Vec<Box<dyn AdmissionCheck>> = vec![
            Box::new(HaltCheck),
            Box::new(DailyLossCheck {
                max_daily_loss_abs: config.max_daily_loss_abs,
                max_daily_loss_pct: config.max_daily_loss_pct,
            }),
            Box::new(PositionLimitCheck {
                max_positions_total: config.max_positions_total,
                max_positions_per_symbol: config.max_positions_per_symbol,
            }),
            Box::new(ThrottleCheck {
                min_seconds_between_entries: config.min_seconds_between_entries,
            }),
            Box::new(PerTradeRiskCheck {
                per_trade_risk_pct: config.per_trade_risk_pct,
            }),
        ];
        Self {
            checks,
            session: SessionState::default(),
            daily: DailyPnl::default(),
            halt_events: Vec::new(),
        }
    }

    /// Run the chain in order and return the first non-ALLOW decision.
    pub fn check_order(
        &mut self,
        intent: &OrderIntent,
        qty: Decimal,
        price: Decimal,
        portfolio: &PortfolioState,
        now: DateTime<Utc>,
    ) -> RiskDecision {
        self.ensure_daily_reset(now.date_naive());

        let ctx = CheckContext {
            intent,
            qty,
            price,
            portfolio,
            day_pnl: self.daily.realized,
            now,
        };

        let was_halted = self.session.is_halted();
        for check in &self.checks {
            if let Some(decision) = check.evaluate(&ctx, &mut self.session) {
                match &decision {
                    RiskDecision::HaltSession { reason } => {
                        if !was_halted {
                            error!(check = check.name(), %reason, "SESSION HALTED");
                            self.push_halt_event(reason.clone(), now);
                        }
                    }
                    RiskDecision::Block { reason } => {
                        info!(check = check.name(), symbol = %intent.symbol, %reason, "order blocked");
                    }
                    RiskDecision::Reduce { adjusted_qty, reason } => {
                        info!(
                            check = check.name(),
                            symbol = %intent.symbol,
                            %adjusted_qty,
                            %reason,
                            "order reduced"
                        );
                    }
                    RiskDecision::Allow { .. } => {}
                }
                return decision;
            }
        }

        RiskDecision::allow(format!("all {} checks passed", self.checks.len()))
    }

    /// Feed realized PnL into the daily tracker (fills/finalized trades)
    pub fn record_realized(&mut self, pnl: Decimal, now: DateTime<Utc>) {
        self.ensure_daily_reset(now.date_naive());
        self.daily.realized += pnl;
        if pnl < Decimal::ZERO {
            warn!(day_pnl = %self.daily.realized, "realized loss recorded");
        }
    }

    /// Restore the daily tracker after recovery
    pub fn restore_day_pnl(&mut self, date: NaiveDate, realized: Decimal) {
        self.daily = DailyPnl {
            date: Some(date),
            realized,
        };
    }

    pub fn day_pnl(&self) -> Decimal {
        self.daily.realized
    }

    pub fn day_date(&self) -> Option<NaiveDate> {
        self.daily.date
    }

    pub fn is_halted(&self) -> bool {
        self.session.is_halted()
    }

    pub fn halt_reason(&self) -> Option<&str> {
        self.session.halt_reason.as_deref()
    }

    /// Force a halt from outside the chain (operator action)
    pub fn halt(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        let reason = reason.into();
        if self.session.halt_reason.is_none() {
            error!(%reason, "SESSION HALTED");
            self.session.halt_reason = Some(reason.clone());
            self.push_halt_event(reason, now);
        }
    }

    /// Explicit operator reset; the only way a halt clears
    pub fn reset(&mut self) {
        info!("risk engine reset");
        self.session.halt_reason = None;
        self.session.last_entry.clear();
    }

    pub fn halt_events(&self) -> &[HaltEvent] {
        &self.halt_events
    }

    /// Daily counters roll over at UTC midnight; the halt flag does not.
    fn ensure_daily_reset(&mut self, today: NaiveDate) {
        if self.daily.date != Some(today) {
            self.daily = DailyPnl {
                date: Some(today),
                realized: Decimal::ZERO,
            };
        }
    }

    fn push_halt_event(&mut self, reason: String, now: DateTime<Utc>) {
        self.halt_events.push(HaltEvent {
            timestamp: now,
            reason,
        });
        if self.halt_events.len() > MAX_HALT_EVENTS {
            let drain = self.halt_events.len() - MAX_HALT_EVENTS;
            self.halt_events.drain(0..drain);
        }
    }
}
