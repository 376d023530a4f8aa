//! Trade Lifecycle Manager
//!
//! Owns the canonical open-trade records, one per symbol. Fills flow
//! through `open_or_update`; ticks flow through `mark_to_market`; exits
//! end in `finalize`, which emits the immutable trade record.

use chrono::{DateTime, NaiveTime, Utc};
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{ActiveTrade, ExitReason, Side, TimeBucket, TradeRecord};
use crate::error::{Result, WardenError};

/// Minutes at each session edge classified as the open/close bucket
const BUCKET_EDGE_MINUTES: i64 = 60;

/// Context accompanying a fill into the lifecycle manager
#[derive(Debug, Clone)]
pub struct FillMeta {
    pub signal_id: Uuid,
    /// Account capital at fill time; basis for planned risk
    pub capital: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// What a single fill did to the symbol's trade
#[derive(Debug, Clone)]
pub struct FillOutcome {
    /// State of the symbol's trade after the fill (qty may be zero,
    /// awaiting `finalize`)
    pub trade: ActiveTrade,
    /// Set when the fill reversed the position: the old trade,
    /// force-finalized with reason `reverse`
    pub reversed: Option<TradeRecord>,
}

pub struct TradeLifecycleManager {
    trades: HashMap<String, ActiveTrade>,
    risk_per_trade_pct: Decimal,
    session_open: NaiveTime,
    session_close: NaiveTime,
}

impl TradeLifecycleManager {
    pub fn new(
        risk_per_trade_pct: Decimal,
        session_open: NaiveTime,
        session_close: NaiveTime,
    ) -> Self {
        Self {
            trades: HashMap::new(),
            risk_per_trade_pct,
            session_open,
            session_close,
        }
    }

    /// Restore the active set from a checkpoint snapshot
    pub fn restore(&mut self, trades: Vec<ActiveTrade>) {
        self.trades = trades.into_iter().map(|t| (t.symbol.clone(), t)).collect();
    }

    pub fn active_trades(&self) -> &HashMap<String, ActiveTrade> {
        &self.trades
    }

    pub fn trade(&self, symbol: &str) -> Option<&ActiveTrade> {
        self.trades.get(symbol)
    }

    pub fn open_count(&self) -> usize {
        self.trades.values().filter(|t| t.qty != Decimal::ZERO).count()
    }

    /// Apply a fill to the symbol's position.
    ///
    /// No trade yet: the fill opens one. Same-sign result: weighted-average
    /// entry on adds, realized-pnl attribution on reduces. Opposite-sign
    /// result: the existing trade is force-finalized at the fill price with
    /// reason `reverse` and a new trade opens with the residual quantity —
    /// a position's sign never changes in place.
    pub fn open_or_update(
        &mut self,
        symbol: &str,
        side: Side,
        fill_qty: Decimal,
        fill_price: Decimal,
        strategy: &str,
        meta: &FillMeta,
    ) -> Result<FillOutcome> {
        if side == Side::Flat {
            return Err(WardenError::InvalidState(format!(
                "fill for {symbol} carries FLAT side"
            )));
        }
        if fill_qty <= Decimal::ZERO || fill_price <= Decimal::ZERO {
            return Err(WardenError::InvalidState(format!(
                "fill for {symbol} has non-positive qty {fill_qty} or price {fill_price}"
            )));
        }

        let delta = fill_qty * side.sign();

        let Some(existing) = self.trades.get_mut(symbol) else {
            let trade = self.open_trade(symbol, side, delta, fill_price, strategy, meta);
            return Ok(FillOutcome {
                trade,
                reversed: None,
            });
        };

        let new_qty = existing.qty + delta;

        // Opposite sign: close-then-reopen, never a silent sign flip.
        if existing.qty != Decimal::ZERO
            && new_qty != Decimal::ZERO
            && new_qty.signum() != existing.qty.signum()
        {
            let closing_qty = existing.qty.abs();
            existing.realized_pnl +=
                (fill_price - existing.entry_price) * closing_qty * existing.side.sign();
            existing.qty = Decimal::ZERO;
            existing.reduces += 1;

            let record = self.force_finalize(
                symbol,
                fill_price,
                ExitReason::Reverse,
                Some(format!("reversal fill {} {}", side, fill_qty)),
                meta.timestamp,
            )?;

            let residual_side = Side::from_qty(new_qty);
            let trade =
                self.open_trade(symbol, residual_side, new_qty, fill_price, strategy, meta);
            info!(
                symbol,
                old_trade = %record.trade_id,
                new_trade = %trade.trade_id,
                residual = %new_qty,
                "position reversed"
            );
            return Ok(FillOutcome {
                trade,
                reversed: Some(record),
            });
        }

        if new_qty.abs() > existing.qty.abs() {
            // Add: weighted-average entry over the grown quantity
            existing.entry_price = (existing.entry_price * existing.qty.abs()
                + fill_price * fill_qty)
                / new_qty.abs();
            existing.adds += 1;
        } else {
            // Reduce (possibly to zero): realize pnl on the closed portion
            existing.realized_pnl +=
                (fill_price - existing.entry_price) * fill_qty * existing.side.sign();
            existing.reduces += 1;
        }
        existing.qty = new_qty;

        Ok(FillOutcome {
            trade: existing.clone(),
            reversed: None,
        })
    }

    fn open_trade(
        &mut self,
        symbol: &str,
        side: Side,
        qty: Decimal,
        price: Decimal,
        strategy: &str,
        meta: &FillMeta,
    ) -> ActiveTrade {
        let trade = ActiveTrade::open(
            symbol,
            side,
            qty,
            price,
            strategy,
            meta.signal_id,
            meta.capital * self.risk_per_trade_pct,
            meta.timestamp,
        );
        info!(
            symbol,
            side = %side,
            qty = %qty,
            price = %price,
            planned_risk = %trade.planned_risk,
            "opened trade"
        );
        self.trades.insert(symbol.to_string(), trade.clone());
        trade
    }

    /// Tick update: excursion tracking and bar count only. Realized PnL is
    /// never touched here.
    pub fn mark_to_market(&mut self, symbol: &str, last_price: Decimal) {
        if let Some(trade) = self.trades.get_mut(symbol) {
            if trade.qty == Decimal::ZERO {
                return;
            }
            let excursion = trade.unrealized_at(last_price);
            if excursion > trade.mfe {
                trade.mfe = excursion;
            }
            if -excursion > trade.mae {
                trade.mae = -excursion;
            }
            trade.bars_in_trade += 1;
        }
    }

    /// Record stop/target levels computed for the trade
    pub fn set_levels(&mut self, symbol: &str, stop: Option<Decimal>, target: Option<Decimal>) {
        if let Some(trade) = self.trades.get_mut(symbol) {
            trade.stop_price = stop;
            trade.target_price = target;
        }
    }

    /// Close the trade and emit its immutable record. Rejects when the
    /// symbol still holds quantity — a caller bug must never silently
    /// finalize a live position.
    pub fn finalize(
        &mut self,
        symbol: &str,
        exit_price: Decimal,
        exit_reason: ExitReason,
        exit_detail: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<TradeRecord> {
        let trade = self
            .trades
            .get(symbol)
            .ok_or_else(|| WardenError::NoActiveTrade(symbol.to_string()))?;

        if trade.qty != Decimal::ZERO {
            warn!(symbol, residual = %trade.qty, "finalize rejected with open quantity");
            return Err(WardenError::NonZeroResidual {
                symbol: symbol.to_string(),
                residual_qty: trade.qty,
            });
        }

        self.force_finalize(symbol, exit_price, exit_reason, exit_detail, now)
    }

    /// Finalize without the zero-quantity guard; reversal path only.
    fn force_finalize(
        &mut self,
        symbol: &str,
        exit_price: Decimal,
        exit_reason: ExitReason,
        exit_detail: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<TradeRecord> {
        let trade = self
            .trades
            .remove(symbol)
            .ok_or_else(|| WardenError::NoActiveTrade(symbol.to_string()))?;

        let r_multiple = if trade.planned_risk > Decimal::ZERO {
            trade.realized_pnl / trade.planned_risk
        } else {
            Decimal::ZERO
        };
        let quality = TradeRecord::classify(r_multiple, trade.mae, trade.planned_risk);
        let time_bucket = TimeBucket::classify(
            trade.entry_time,
            self.session_open,
            self.session_close,
            BUCKET_EDGE_MINUTES,
        );

        let record = TradeRecord {
            trade_id: trade.trade_id,
            signal_id: trade.signal_id,
            symbol: trade.symbol,
            strategy: trade.strategy,
            side: trade.side,
            entry_time: trade.entry_time,
            entry_price: trade.entry_price,
            exit_time: now,
            exit_price,
            exit_reason,
            exit_detail,
            initial_size: trade.initial_size,
            planned_risk: trade.planned_risk,
            realized_pnl: trade.realized_pnl,
            r_multiple,
            mfe: trade.mfe,
            mae: trade.mae,
            adds: trade.adds,
            reduces: trade.reduces,
            bars_in_trade: trade.bars_in_trade,
            quality,
            time_bucket,
        };

        info!(
            symbol,
            trade_id = %record.trade_id,
            pnl = %record.realized_pnl,
            r = %record.r_multiple,
            quality = ?record.quality,
            reason = %exit_reason,
            "finalized trade"
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn manager() -> TradeLifecycleManager {
        TradeLifecycleManager::new(
            dec!(0.01),
            NaiveTime::from_hms_opt(9, 15, 0).unwrap(),
            NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
        )
    }

    fn meta() -> FillMeta {
        FillMeta {
            signal_id: Uuid::new_v4(),
            capital: dec!(100000),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_open_then_full_close() {
        let mut m = manager();
        let meta = meta();

        let out = m
            .open_or_update("NIFTY", Side::Long, dec!(10), dec!(100), "ema", &meta)
            .unwrap();
        assert_eq!(out.trade.qty, dec!(10));
        assert_eq!(out.trade.planned_risk, dec!(1000));

        let out = m
            .open_or_update("NIFTY", Side::Short, dec!(10), dec!(105), "ema", &meta)
            .unwrap();
        assert_eq!(out.trade.qty, dec!(0));
        assert_eq!(out.trade.realized_pnl, dec!(50));
        assert!(out.reversed.is_none());

        let record = m
            .finalize("NIFTY", dec!(105), ExitReason::Target, None, Utc::now())
            .unwrap();
        assert_eq!(record.realized_pnl, dec!(50));
        assert!(m.trade("NIFTY").is_none());
    }

    #[test]
    fn test_no_double_counting_across_partial_closes() {
        let mut m = manager();
        let meta = meta();

        m.open_or_update("NIFTY", Side::Long, dec!(10), dec!(100), "ema", &meta)
            .unwrap();

        // Two partial closes and a final close; deltas must sum exactly.
        let a = m
            .open_or_update("NIFTY", Side::Short, dec!(4), dec!(102), "ema", &meta)
            .unwrap();
        let delta_a = a.trade.realized_pnl;
        let b = m
            .open_or_update("NIFTY", Side::Short, dec!(3), dec!(99), "ema", &meta)
            .unwrap();
        let delta_b = b.trade.realized_pnl - delta_a;
        let c = m
            .open_or_update("NIFTY", Side::Short, dec!(3), dec!(101), "ema", &meta)
            .unwrap();
        let delta_c = c.trade.realized_pnl - delta_a - delta_b;

        assert_eq!(delta_a, dec!(8)); // 4 * (102-100)
        assert_eq!(delta_b, dec!(-3)); // 3 * (99-100)
        assert_eq!(delta_c, dec!(3)); // 3 * (101-100)

        let record = m
            .finalize("NIFTY", dec!(101), ExitReason::Manual, None, Utc::now())
            .unwrap();
        assert_eq!(record.realized_pnl, delta_a + delta_b + delta_c);
    }

    #[test]
    fn test_weighted_average_entry_on_add() {
        let mut m = manager();
        let meta = meta();

        m.open_or_update("NIFTY", Side::Long, dec!(10), dec!(100), "ema", &meta)
            .unwrap();
        let out = m
            .open_or_update("NIFTY", Side::Long, dec!(10), dec!(110), "ema", &meta)
            .unwrap();

        assert_eq!(out.trade.qty, dec!(20));
        assert_eq!(out.trade.entry_price, dec!(105));
        assert_eq!(out.trade.adds, 1);
        assert_eq!(out.trade.realized_pnl, dec!(0));
    }

    #[test]
    fn test_reversal_force_finalizes_and_reopens() {
        let mut m = manager();
        let meta = meta();

        m.open_or_update("S", Side::Long, dec!(10), dec!(100), "ema", &meta)
            .unwrap();

        // SELL 15 against LONG +10 drives net to -5
        let out = m
            .open_or_update("S", Side::Short, dec!(15), dec!(98), "ema", &meta)
            .unwrap();

        let record = out.reversed.expect("old trade force-finalized");
        assert_eq!(record.exit_reason, ExitReason::Reverse);
        assert_eq!(record.realized_pnl, dec!(-20)); // 10 * (98-100)

        assert_eq!(out.trade.side, Side::Short);
        assert_eq!(out.trade.qty, dec!(-5));
        assert_eq!(out.trade.entry_price, dec!(98));
        assert_eq!(out.trade.realized_pnl, dec!(0));

        // Exactly one active trade for the symbol
        assert_eq!(m.active_trades().len(), 1);
    }

    #[test]
    fn test_finalize_rejects_open_quantity() {
        let mut m = manager();
        let meta = meta();

        m.open_or_update("NIFTY", Side::Long, dec!(10), dec!(100), "ema", &meta)
            .unwrap();

        let err = m
            .finalize("NIFTY", dec!(105), ExitReason::Manual, None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, WardenError::NonZeroResidual { .. }));
        assert!(m.trade("NIFTY").is_some());
    }

    #[test]
    fn test_mark_to_market_tracks_excursions_only() {
        let mut m = manager();
        let meta = meta();

        m.open_or_update("NIFTY", Side::Long, dec!(10), dec!(100), "ema", &meta)
            .unwrap();

        m.mark_to_market("NIFTY", dec!(103));
        m.mark_to_market("NIFTY", dec!(97));
        m.mark_to_market("NIFTY", dec!(101));

        let t = m.trade("NIFTY").unwrap();
        assert_eq!(t.mfe, dec!(30));
        assert_eq!(t.mae, dec!(30));
        assert_eq!(t.bars_in_trade, 3);
        assert_eq!(t.realized_pnl, dec!(0));
    }

    #[test]
    fn test_short_reduce_realizes_correct_sign() {
        let mut m = manager();
        let meta = meta();

        m.open_or_update("BANKNIFTY", Side::Short, dec!(10), dec!(200), "ema", &meta)
            .unwrap();
        // Buying back 5 at 190: short gains 5 * 10
        let out = m
            .open_or_update("BANKNIFTY", Side::Long, dec!(5), dec!(190), "ema", &meta)
            .unwrap();
        assert_eq!(out.trade.realized_pnl, dec!(50));
        assert_eq!(out.trade.qty, dec!(-5));
        assert_eq!(out.trade.reduces, 1);
    }
}
