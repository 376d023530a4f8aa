//! Stop / Target / Trailing Engine
//!
//! Initial ATR-derived levels capped by hard percentage bounds, a
//! monotonically tightening trailing stop in R units, and the fixed
//! per-tick exit evaluation order.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::StopConfig;
use crate::domain::{ActiveTrade, ExitReason, Side};

// ==================== Initial levels ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelMethod {
    Atr,
    PctFallback,
}

impl LevelMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            LevelMethod::Atr => "atr",
            LevelMethod::PctFallback => "pct_fallback",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InitialLevels {
    pub stop: Decimal,
    pub target: Decimal,
    pub method: LevelMethod,
}

// ==================== Trailing ====================

/// Per-trade trailing state. The locked R level only ever ratchets up,
/// so the derived trail price tightens monotonically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailingState {
    pub r_basis: Decimal,
    pub max_r: Decimal,
    pub locked_r: Option<Decimal>,
}

impl TrailingState {
    pub fn active(&self) -> bool {
        self.locked_r.is_some()
    }
}

// ==================== Exit evaluation ====================

#[derive(Debug, Clone, PartialEq)]
pub struct ExitDecision {
    pub reason: ExitReason,
    pub detail: String,
}

pub struct StopEngine {
    config: StopConfig,
}

impl StopEngine {
    pub fn new(config: StopConfig) -> Self {
        Self { config }
    }

    /// Compute the levels to attach at entry. The hard pct caps only ever
    /// tighten ATR-derived distances; an unusable ATR falls back to fixed
    /// percentage distances.
    pub fn initial_levels(
        &self,
        entry: Decimal,
        side: Side,
        atr: Option<Decimal>,
    ) -> InitialLevels {
        let sign = side.sign();
        let sl_cap = self.config.hard_sl_pct_cap * entry;
        let tp_cap = self.config.hard_tp_pct_cap * entry;

        let (sl_dist, tp_dist, method) = match atr {
            Some(atr) if atr > self.config.atr_floor => (
                (atr * self.config.sl_atr_multiple).min(sl_cap),
                (atr * self.config.tp_atr_multiple).min(tp_cap),
                LevelMethod::Atr,
            ),
            _ => (
                self.config.fallback_sl_pct * entry,
                self.config.fallback_tp_pct * entry,
                LevelMethod::PctFallback,
            ),
        };

        InitialLevels {
            stop: entry - sl_dist * sign,
            target: entry + tp_dist * sign,
            method,
        }
    }

    pub fn new_trailing(&self, entry_price: Decimal) -> TrailingState {
        let r_basis = match self.config.r_basis_override {
            Some(basis) if basis > Decimal::ZERO => basis,
            _ => (entry_price * dec!(0.005)).max(Decimal::ONE),
        };
        TrailingState {
            r_basis,
            max_r: Decimal::ZERO,
            locked_r: None,
        }
    }

    /// Feed the latest price into the trailing state. Returns the trail
    /// price once trailing is active.
    pub fn update_trailing(
        &self,
        trade: &ActiveTrade,
        trailing: &mut TrailingState,
        price: Decimal,
    ) -> Option<Decimal> {
        if trailing.r_basis <= Decimal::ZERO {
            return None;
        }
        let current_r = trade.favorable_excursion_per_unit(price) / trailing.r_basis;
        if current_r > trailing.max_r {
            trailing.max_r = current_r;
        }
        if trailing.max_r >= self.config.trail_start_r {
            let candidate = self
                .config
                .trail_lock_r
                .max(trailing.max_r - self.config.trail_step_r);
            // Ratchet only: a falling current_r never loosens the lock
            let locked = match trailing.locked_r {
                Some(prev) => prev.max(candidate),
                None => candidate,
            };
            trailing.locked_r = Some(locked);
        }
        self.trail_price(trade, trailing)
    }

    pub fn trail_price(&self, trade: &ActiveTrade, trailing: &TrailingState) -> Option<Decimal> {
        trailing
            .locked_r
            .map(|locked| trade.entry_price + locked * trailing.r_basis * trade.side.sign())
    }

    /// One tick's exit checks in fixed precedence: fixed per-trade stop,
    /// trailing stop, caller-supplied risk exit, then ATR stop/target.
    /// A zero-quantity trade is a no-op so a symbol cannot close twice in
    /// one tick.
    pub fn evaluate_tick(
        &self,
        trade: &ActiveTrade,
        trailing: &mut TrailingState,
        price: Decimal,
        atr: Option<Decimal>,
        risk_exit: Option<&str>,
    ) -> Option<ExitDecision> {
        if trade.qty == Decimal::ZERO {
            return None;
        }
        let sign = trade.side.sign();

        if let Some(stop) = trade.stop_price {
            if (price - stop) * sign <= Decimal::ZERO {
                return Some(ExitDecision {
                    reason: ExitReason::Stop,
                    detail: format!("price {price} crossed stop {stop}"),
                });
            }
        }

        if let Some(trail) = self.update_trailing(trade, trailing, price) {
            if (price - trail) * sign <= Decimal::ZERO {
                return Some(ExitDecision {
                    reason: ExitReason::TrailingStop,
                    detail: format!("price {price} crossed trail {trail}"),
                });
            }
        }

        if let Some(why) = risk_exit {
            return Some(ExitDecision {
                reason: ExitReason::RiskExit,
                detail: why.to_string(),
            });
        }

        if let Some(target) = trade.target_price {
            if (price - target) * sign >= Decimal::ZERO {
                return Some(ExitDecision {
                    reason: ExitReason::Target,
                    detail: format!("price {price} reached target {target}"),
                });
            }
        }
        // Dynamic ATR stop when no level was attached at entry
        if trade.stop_price.is_none() {
            if let Some(atr) = atr {
                if atr > self.config.atr_floor {
                    let levels = self.initial_levels(trade.entry_price, trade.side, Some(atr));
                    if (price - levels.stop) * sign <= Decimal::ZERO {
                        debug!(symbol = %trade.symbol, "dynamic atr stop");
                        return Some(ExitDecision {
                            reason: ExitReason::Stop,
                            detail: format!("price {price} crossed atr stop {}", levels.stop),
                        });
                    }
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn config() -> StopConfig {
        StopConfig {
            sl_atr_multiple: dec!(1.5),
            tp_atr_multiple: dec!(3.0),
            hard_sl_pct_cap: dec!(0.02),
            hard_tp_pct_cap: dec!(0.05),
            atr_floor: dec!(0.1),
            fallback_sl_pct: dec!(0.01),
            fallback_tp_pct: dec!(0.02),
            trail_start_r: dec!(1.0),
            trail_step_r: dec!(0.5),
            trail_lock_r: dec!(0.5),
            r_basis_override: Some(dec!(1.0)),
        }
    }

    fn long_trade(entry: Decimal) -> ActiveTrade {
        ActiveTrade::open(
            "NIFTY",
            Side::Long,
            dec!(10),
            entry,
            "ema",
            Uuid::new_v4(),
            dec!(1000),
            Utc::now(),
        )
    }

    #[test]
    fn test_atr_levels_capped_by_hard_pct() {
        let engine = StopEngine::new(config());
        // ATR 2: candidate stop dist 3 > cap 0.02*100=2; target dist 6 > 5
        let levels = engine.initial_levels(dec!(100), Side::Long, Some(dec!(2)));
        assert_eq!(levels.method, LevelMethod::Atr);
        assert_eq!(levels.stop, dec!(98));
        assert_eq!(levels.target, dec!(105));
    }

    #[test]
    fn test_missing_atr_falls_back_to_pct() {
        let engine = StopEngine::new(config());
        let levels = engine.initial_levels(dec!(200), Side::Short, None);
        assert_eq!(levels.method, LevelMethod::PctFallback);
        assert_eq!(levels.stop, dec!(202)); // short stop above entry
        assert_eq!(levels.target, dec!(196));

        // ATR at or below the floor also falls back
        let levels = engine.initial_levels(dec!(200), Side::Short, Some(dec!(0.1)));
        assert_eq!(levels.method, LevelMethod::PctFallback);
    }

    #[test]
    fn test_trailing_locks_and_never_loosens() {
        let engine = StopEngine::new(config());
        let trade = long_trade(dec!(100));
        let mut trailing = engine.new_trailing(trade.entry_price);
        assert_eq!(trailing.r_basis, dec!(1.0));

        // R=3 locks max(0.5, 3 - 0.5) = 2.5 -> trail 102.5
        let trail = engine.update_trailing(&trade, &mut trailing, dec!(103));
        assert_eq!(trail, Some(dec!(102.5)));

        // Pullback does not loosen
        let trail = engine.update_trailing(&trade, &mut trailing, dec!(102.7));
        assert_eq!(trail, Some(dec!(102.5)));

        // New high ratchets up, later pullback keeps the higher lock
        let trail = engine.update_trailing(&trade, &mut trailing, dec!(104));
        assert_eq!(trail, Some(dec!(103.5)));
        let trail = engine.update_trailing(&trade, &mut trailing, dec!(103.6));
        assert_eq!(trail, Some(dec!(103.5)));
    }

    #[test]
    fn test_no_trailing_before_start_r() {
        let engine = StopEngine::new(config());
        let trade = long_trade(dec!(100));
        let mut trailing = engine.new_trailing(trade.entry_price);
        assert_eq!(
            engine.update_trailing(&trade, &mut trailing, dec!(100.8)),
            None
        );
        assert!(!trailing.active());
    }

    #[test]
    fn test_tick_precedence_fixed_stop_first() {
        let engine = StopEngine::new(config());
        let mut trade = long_trade(dec!(100));
        trade.stop_price = Some(dec!(98));
        trade.target_price = Some(dec!(105));
        let mut trailing = engine.new_trailing(trade.entry_price);

        let exit = engine
            .evaluate_tick(&trade, &mut trailing, dec!(97.5), None, Some("halt"))
            .unwrap();
        assert_eq!(exit.reason, ExitReason::Stop);
    }

    #[test]
    fn test_trailing_beats_risk_exit_and_target() {
        let engine = StopEngine::new(config());
        let mut trade = long_trade(dec!(100));
        trade.target_price = Some(dec!(200));
        let mut trailing = engine.new_trailing(trade.entry_price);
        // Establish the lock at R=3
        engine.evaluate_tick(&trade, &mut trailing, dec!(103), None, None);

        let exit = engine
            .evaluate_tick(&trade, &mut trailing, dec!(102), None, Some("square off"))
            .unwrap();
        assert_eq!(exit.reason, ExitReason::TrailingStop);
    }

    #[test]
    fn test_target_hit() {
        // Trailing pushed out of reach so only the target can fire
        let mut cfg = config();
        cfg.trail_start_r = dec!(100);
        let engine = StopEngine::new(cfg);

        let mut trade = long_trade(dec!(100));
        trade.stop_price = Some(dec!(98));
        trade.target_price = Some(dec!(105));
        let mut trailing = engine.new_trailing(trade.entry_price);

        let exit = engine
            .evaluate_tick(&trade, &mut trailing, dec!(105.2), None, None)
            .unwrap();
        assert_eq!(exit.reason, ExitReason::Target);
    }

    #[test]
    fn test_zero_qty_is_noop() {
        let engine = StopEngine::new(config());
        let mut trade = long_trade(dec!(100));
        trade.stop_price = Some(dec!(98));
        trade.qty = Decimal::ZERO;
        let mut trailing = engine.new_trailing(trade.entry_price);
        assert_eq!(
            engine.evaluate_tick(&trade, &mut trailing, dec!(90), None, Some("halt")),
            None
        );
    }
}
