//! Signal Quality Manager
//!
//! Scores intents from rolling realized outcomes per (strategy, symbol)
//! and vetoes them against daily budgets, cooldowns and expected edge.
//! A non-vetoed signal still carries its score downstream as an
//! informational risk multiplier.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

use crate::config::QualityConfig;
use crate::domain::{SignalQualityScore, VetoReason};

/// Inputs for scoring one signal
pub struct SignalContext<'a> {
    pub symbol: &'a str,
    pub strategy: &'a str,
    pub price: Decimal,
    pub atr: Option<Decimal>,
    /// Money at risk if this trade is taken; basis for the edge estimate
    pub risk_per_trade: Decimal,
    pub now: DateTime<Utc>,
}

type Key = (String, String); // (strategy, symbol)

#[derive(Debug, Default)]
struct DailyCounters {
    date: Option<NaiveDate>,
    per_symbol: HashMap<String, u32>,
    per_strategy: HashMap<String, u32>,
    global: u32,
    vetoes: u32,
}

pub struct SignalQualityManager {
    config: QualityConfig,
    session_open: NaiveTime,
    session_close: NaiveTime,
    /// Most-recent realized R-multiples, bounded per key
    windows: HashMap<Key, VecDeque<f64>>,
    last_loss: HashMap<Key, DateTime<Utc>>,
    daily: DailyCounters,
}

impl SignalQualityManager {
    pub fn new(config: QualityConfig, session_open: NaiveTime, session_close: NaiveTime) -> Self {
        Self {
            config,
            session_open,
            session_close,
            windows: HashMap::new(),
            last_loss: HashMap::new(),
            daily: DailyCounters::default(),
        }
    }

    /// Score the signal and evaluate the veto chain in fixed order.
    pub fn score_signal(&mut self, ctx: &SignalContext<'_>) -> SignalQualityScore {
        self.ensure_daily_reset(ctx.now.date_naive());

        let key = (ctx.strategy.to_string(), ctx.symbol.to_string());
        let (winrate, avg_r, samples) = self.window_stats(&key);
        let score = self.composite_score(winrate, avg_r, ctx);

        // Veto chain: first match wins.
        let budget = self.config.max_trades_per_symbol_day;
        let taken = self
            .daily
            .per_symbol
            .get(ctx.symbol)
            .copied()
            .unwrap_or(0);
        if budget > 0 && taken >= budget {
            return self.veto(
                score,
                VetoReason::SymbolDailyBudget,
                format!("{} trades on {} today >= budget {budget}", taken, ctx.symbol),
            );
        }

        let budget = self.config.max_trades_per_strategy_day;
        let taken = self
            .daily
            .per_strategy
            .get(ctx.strategy)
            .copied()
            .unwrap_or(0);
        if budget > 0 && taken >= budget {
            return self.veto(
                score,
                VetoReason::StrategyDailyBudget,
                format!(
                    "{} trades for {} today >= budget {budget}",
                    taken, ctx.strategy
                ),
            );
        }

        let budget = self.config.max_trades_global_day;
        if budget > 0 && self.daily.global >= budget {
            return self.veto(
                score,
                VetoReason::GlobalDailyBudget,
                format!("{} trades today >= global budget {budget}", self.daily.global),
            );
        }

        if self.config.post_loss_cooldown_secs > 0 {
            if let Some(lost_at) = self.last_loss.get(&key) {
                let elapsed = (ctx.now - *lost_at).num_seconds();
                if elapsed >= 0 && (elapsed as u64) < self.config.post_loss_cooldown_secs {
                    return self.veto(
                        score,
                        VetoReason::PostLossCooldown,
                        format!(
                            "{elapsed}s since loss on {}/{} < cooldown {}s",
                            ctx.strategy, ctx.symbol, self.config.post_loss_cooldown_secs
                        ),
                    );
                }
            }
        }

        // Expected edge vs estimated transaction cost
        let expected_edge = avg_r * ctx.risk_per_trade.to_f64().unwrap_or(0.0);
        let est_cost = self.config.est_transaction_cost.to_f64().unwrap_or(0.0);
        let cost_hurdle = self.config.cost_multiplier * est_cost;
        if samples > 0 && expected_edge < cost_hurdle {
            return self.veto(
                score,
                VetoReason::InsufficientEdge,
                format!(
                    "expected edge {expected_edge:.2} < {:.1}x cost {est_cost:.2}",
                    self.config.cost_multiplier
                ),
            );
        }

        if score < self.config.min_score {
            return self.veto(
                score,
                VetoReason::ScoreBelowMinimum,
                format!("score {score:.3} < min_score {}", self.config.min_score),
            );
        }

        SignalQualityScore::passed(
            score,
            format!(
                "score {score:.3} (winrate {winrate:.2}, avg_r {avg_r:.2}, {samples} samples)"
            ),
        )
    }

    /// An admitted entry consumes daily budget
    pub fn record_execution(&mut self, symbol: &str, strategy: &str, now: DateTime<Utc>) {
        self.ensure_daily_reset(now.date_naive());
        *self.daily.per_symbol.entry(symbol.to_string()).or_insert(0) += 1;
        *self
            .daily
            .per_strategy
            .entry(strategy.to_string())
            .or_insert(0) += 1;
        self.daily.global += 1;
    }

    /// Feed a finalized trade's R-multiple into the rolling window
    pub fn update_trade_outcome(
        &mut self,
        symbol: &str,
        strategy: &str,
        r_multiple: f64,
        now: DateTime<Utc>,
    ) {
        let key = (strategy.to_string(), symbol.to_string());
        let window = self.windows.entry(key.clone()).or_default();
        window.push_back(r_multiple);
        while window.len() > self.config.window_size {
            window.pop_front();
        }
        if r_multiple < 0.0 {
            self.last_loss.insert(key, now);
        }
        debug!(symbol, strategy, r_multiple, "trade outcome recorded");
    }

    /// Copy of the daily counters for checkpointing
    pub fn counters_snapshot(&self) -> crate::persistence::DailyCounterSnapshot {
        crate::persistence::DailyCounterSnapshot {
            per_symbol: self.daily.per_symbol.clone(),
            per_strategy: self.daily.per_strategy.clone(),
            global: self.daily.global,
        }
    }

    /// Restore daily counters from a checkpoint taken on `date`
    pub fn restore_counters(
        &mut self,
        date: Option<NaiveDate>,
        counters: crate::persistence::DailyCounterSnapshot,
    ) {
        self.daily = DailyCounters {
            date,
            per_symbol: counters.per_symbol,
            per_strategy: counters.per_strategy,
            global: counters.global,
            vetoes: 0,
        };
    }

    pub fn vetoes_today(&self) -> u32 {
        self.daily.vetoes
    }

    pub fn trades_today(&self) -> u32 {
        self.daily.global
    }

    // ==================== Internals ====================

    fn veto(
        &mut self,
        score: f64,
        reason: VetoReason,
        detail: String,
    ) -> SignalQualityScore {
        self.daily.vetoes += 1;
        debug!(veto = %reason, %detail, "signal vetoed");
        SignalQualityScore::vetoed(score, reason, detail)
    }

    /// (winrate, avg R, sample count); neutral prior when empty
    fn window_stats(&self, key: &Key) -> (f64, f64, usize) {
        match self.windows.get(key) {
            Some(w) if !w.is_empty() => {
                let n = w.len();
                let wins = w.iter().filter(|r| **r > 0.0).count();
                let avg = w.iter().sum::<f64>() / n as f64;
                (wins as f64 / n as f64, avg, n)
            }
            _ => (0.5, 0.0, 0),
        }
    }

    fn composite_score(&self, winrate: f64, avg_r: f64, ctx: &SignalContext<'_>) -> f64 {
        // avg R in [-1, 1] mapped onto [0, 1]
        let normalized_avg_r = ((avg_r.clamp(-1.0, 1.0)) + 1.0) / 2.0;
        let mut score = winrate * 0.6 + normalized_avg_r * 0.4;

        // Volatility extremity penalty
        if let Some(atr) = ctx.atr {
            if ctx.price > Decimal::ZERO {
                let ratio = (atr / ctx.price).to_f64().unwrap_or(0.0);
                if ratio < self.config.atr_ratio_low || ratio > self.config.atr_ratio_high {
                    score *= self.config.volatility_penalty;
                }
            }
        }

        // Time-of-day penalty near open/close (IST)
        let ist = ctx
            .now
            .with_timezone(&crate::domain::ist_offset())
            .time();
        let edge = chrono::Duration::minutes(self.config.session_edge_minutes);
        if ist < self.session_open + edge || ist >= self.session_close - edge {
            score *= self.config.time_of_day_penalty;
        }

        score.clamp(0.0, 1.0)
    }

    fn ensure_daily_reset(&mut self, today: NaiveDate) {
        if self.daily.date != Some(today) {
            self.daily = DailyCounters {
                date: Some(today),
                ..Default::default()
            };
        }
    }
}
