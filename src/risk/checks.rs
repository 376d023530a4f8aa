use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::domain::{OrderIntent, PortfolioState, RiskDecision};

/// Read-only inputs shared by every check in the chain
pub struct CheckContext<'a> {
    pub intent: &'a OrderIntent,
    /// Quantity the sizer proposed (unsigned)
    pub qty: Decimal,
    pub price: Decimal,
    pub portfolio: &'a PortfolioState,
    /// Realized day PnL at check time
    pub day_pnl: Decimal,
    pub now: DateTime<Utc>,
}

/// Mutable session state the chain operates on: the sticky halt flag and
/// the per-symbol last-entry stamps.
#[derive(Debug, Default)]
pub struct SessionState {
    /// Set once, cleared only by an explicit reset
    pub halt_reason: Option<String>,
    pub last_entry: HashMap<String, DateTime<Utc>>,
}

impl SessionState {
    pub fn is_halted(&self) -> bool {
        self.halt_reason.is_some()
    }
}

/// One admission predicate. Returns `None` to pass the intent on to the
/// next check, or the decision that stops the chain.
pub trait AdmissionCheck: Send + Sync {
    fn name(&self) -> &'static str;
    fn evaluate(&self, ctx: &CheckContext<'_>, session: &mut SessionState)
        -> Option<RiskDecision>;
}

/// 1. A halted session admits nothing, regardless of intent content.
pub struct HaltCheck;

impl AdmissionCheck for HaltCheck {
    fn name(&self) -> &'static str {
        "halt"
    }

    fn evaluate(
        &self,
        _ctx: &CheckContext<'_>,
        session: &mut SessionState,
    ) -> Option<RiskDecision> {
        session
            .halt_reason
            .as_ref()
            .map(|reason| RiskDecision::halt(format!("session halted: {reason}")))
    }
}

/// 2. Daily loss breach transitions the session to HALTED (terminal).
pub struct DailyLossCheck {
    pub max_daily_loss_abs: Decimal,
    pub max_daily_loss_pct: Decimal,
}

impl AdmissionCheck for DailyLossCheck {
    fn name(&self) -> &'static str {
        "daily_loss"
    }

    fn evaluate(
        &self,
        ctx: &CheckContext<'_>,
        session: &mut SessionState,
    ) -> Option<RiskDecision> {
        let day_pnl = ctx.day_pnl;
        let capital = ctx.portfolio.capital;

        let abs_breach =
            self.max_daily_loss_abs > Decimal::ZERO && day_pnl <= -self.max_daily_loss_abs;
        let pct_breach = self.max_daily_loss_pct > Decimal::ZERO
            && capital > Decimal::ZERO
            && day_pnl / capital <= -self.max_daily_loss_pct;

        if abs_breach || pct_breach {
            let reason = format!(
                "daily loss breached: day_pnl={day_pnl} vs abs_limit={} pct_limit={} of capital={capital}",
                self.max_daily_loss_abs, self.max_daily_loss_pct
            );
            session.halt_reason = Some(reason.clone());
            return Some(RiskDecision::halt(reason));
        }
        None
    }
}

/// 3. Position-count limits, total and per symbol.
pub struct PositionLimitCheck {
    pub max_positions_total: u32,
    pub max_positions_per_symbol: u32,
}

impl AdmissionCheck for PositionLimitCheck {
    fn name(&self) -> &'static str {
        "position_limit"
    }

    fn evaluate(
        &self,
        ctx: &CheckContext<'_>,
        _session: &mut SessionState,
    ) -> Option<RiskDecision> {
        let total = ctx.portfolio.open_position_count();
        if self.max_positions_total > 0 && total >= self.max_positions_total as usize {
            return Some(RiskDecision::block(format!(
                "open positions {total} >= max_positions_total {}",
                self.max_positions_total
            )));
        }

        let per_symbol = ctx.portfolio.open_positions_for(&ctx.intent.symbol);
        if self.max_positions_per_symbol > 0
            && per_symbol >= self.max_positions_per_symbol as usize
        {
            return Some(RiskDecision::block(format!(
                "open positions for {} {per_symbol} >= max_positions_per_symbol {}",
                ctx.intent.symbol, self.max_positions_per_symbol
            )));
        }
        None
    }
}

/// 4. Per-symbol entry throttle. A passing intent records the new
/// last-entry stamp.
pub struct ThrottleCheck {
    pub min_seconds_between_entries: u64,
}

impl AdmissionCheck for ThrottleCheck {
    fn name(&self) -> &'static str {
        "throttle"
    }

    fn evaluate(
        &self,
        ctx: &CheckContext<'_>,
        session: &mut SessionState,
    ) -> Option<RiskDecision> {
        if self.min_seconds_between_entries == 0 {
            return None;
        }

        if let Some(last) = session.last_entry.get(&ctx.intent.symbol) {
            let elapsed = (ctx.now - *last).num_seconds();
            if elapsed >= 0 && (elapsed as u64) < self.min_seconds_between_entries {
                return Some(RiskDecision::block(format!(
                    "throttled: {elapsed}s since last entry on {} < {}s",
                    ctx.intent.symbol, self.min_seconds_between_entries
                )));
            }
        }
        session
            .last_entry
            .insert(ctx.intent.symbol.clone(), ctx.now);
        None
    }
}

/// 5. Per-trade notional budget: reduce to what fits, block below one unit.
pub struct PerTradeRiskCheck {
    pub per_trade_risk_pct: Decimal,
}

impl AdmissionCheck for PerTradeRiskCheck {
    fn name(&self) -> &'static str {
        "per_trade_risk"
    }

    fn evaluate(
        &self,
        ctx: &CheckContext<'_>,
        _session: &mut SessionState,
    ) -> Option<RiskDecision> {
        if self.per_trade_risk_pct <= Decimal::ZERO || ctx.price <= Decimal::ZERO {
            return None;
        }

        let risk_budget = ctx.portfolio.capital * self.per_trade_risk_pct;
        let notional = ctx.price * ctx.qty;
        if notional <= risk_budget {
            return None;
        }

        let adjusted = (risk_budget / ctx.price).floor();
        if adjusted < Decimal::ONE {
            return Some(RiskDecision::block(format!(
                "notional {notional} exceeds risk_budget {risk_budget} and floor({risk_budget}/{}) < 1",
                ctx.price
            )));
        }
        Some(RiskDecision::reduce(
            adjusted,
            format!(
                "notional {notional} exceeds risk_budget {risk_budget}; qty {} reduced to {adjusted}",
                ctx.qty
            ),
        ))
    }
}
