use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{ActiveTrade, Side};

/// A non-zero position as seen by the portfolio view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub symbol: String,
    pub side: Side,
    /// Signed quantity
    pub qty: Decimal,
    pub entry_price: Decimal,
    pub last_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub notional: Decimal,
}

/// Derived portfolio view. Never mutated independently; always recomputed
/// from the active trade set and the latest prices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioState {
    pub capital: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    /// capital + realized + unrealized
    pub equity: Decimal,
    pub total_notional: Decimal,
    /// Remaining capacity under the exposure cap
    pub free_notional: Decimal,
    pub positions: Vec<PositionSnapshot>,
}

impl PortfolioState {
    /// Recompute the portfolio from the position set. A symbol missing a
    /// price is valued at its entry price (zero unrealized contribution).
    pub fn derive(
        capital: Decimal,
        realized_pnl: Decimal,
        trades: &HashMap<String, ActiveTrade>,
        prices: &HashMap<String, Decimal>,
        max_exposure_pct: Decimal,
    ) -> Self {
        let mut unrealized = Decimal::ZERO;
        let mut total_notional = Decimal::ZERO;
        let mut positions: Vec<PositionSnapshot> = Vec::with_capacity(trades.len());

        for trade in trades.values() {
            if trade.qty == Decimal::ZERO {
                continue;
            }
            let last_price = prices
                .get(&trade.symbol)
                .copied()
                .unwrap_or(trade.entry_price);
            let upnl = trade.unrealized_at(last_price);
            let notional = trade.notional_at(last_price);
            unrealized += upnl;
            total_notional += notional;
            positions.push(PositionSnapshot {
                symbol: trade.symbol.clone(),
                side: trade.side,
                qty: trade.qty,
                entry_price: trade.entry_price,
                last_price,
                unrealized_pnl: upnl,
                notional,
            });
        }
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        let equity = capital + realized_pnl + unrealized;
        let free_notional = (equity * max_exposure_pct - total_notional).max(Decimal::ZERO);

        Self {
            capital,
            realized_pnl,
            unrealized_pnl: unrealized,
            equity,
            total_notional,
            free_notional,
            positions,
        }
    }

    pub fn open_position_count(&self) -> usize {
        self.positions.len()
    }

    pub fn open_positions_for(&self, symbol: &str) -> usize {
        self.positions.iter().filter(|p| p.symbol == symbol).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn trade(symbol: &str, qty: Decimal, entry: Decimal) -> ActiveTrade {
        ActiveTrade {
            trade_id: Uuid::new_v4(),
            signal_id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            strategy: "ema".to_string(),
            side: Side::from_qty(qty),
            entry_time: Utc::now(),
            entry_price: entry,
            planned_risk: dec!(1000),
            qty,
            initial_size: qty.abs(),
            mfe: dec!(0),
            mae: dec!(0),
            adds: 0,
            reduces: 0,
            bars_in_trade: 0,
            realized_pnl: dec!(0),
            stop_price: None,
            target_price: None,
        }
    }

    #[test]
    fn test_derive_equity_and_free_notional() {
        let mut trades = HashMap::new();
        trades.insert("NIFTY".to_string(), trade("NIFTY", dec!(10), dec!(100)));
        let mut prices = HashMap::new();
        prices.insert("NIFTY".to_string(), dec!(105));

        let p = PortfolioState::derive(dec!(100000), dec!(200), &trades, &prices, dec!(1));

        assert_eq!(p.unrealized_pnl, dec!(50));
        assert_eq!(p.equity, dec!(100250));
        assert_eq!(p.total_notional, dec!(1050));
        assert_eq!(p.free_notional, dec!(99200));
        assert_eq!(p.open_position_count(), 1);
    }

    #[test]
    fn test_free_notional_floor_at_zero() {
        let mut trades = HashMap::new();
        trades.insert("BANKNIFTY".to_string(), trade("BANKNIFTY", dec!(100), dec!(500)));
        let prices = HashMap::new();

        // Tiny exposure cap: notional 50000 swamps 1% of equity
        let p = PortfolioState::derive(dec!(10000), dec!(0), &trades, &prices, dec!(0.01));
        assert_eq!(p.free_notional, dec!(0));
    }

    #[test]
    fn test_missing_price_values_at_entry() {
        let mut trades = HashMap::new();
        trades.insert("NIFTY".to_string(), trade("NIFTY", dec!(-5), dec!(200)));
        let p = PortfolioState::derive(dec!(50000), dec!(0), &trades, &HashMap::new(), dec!(1));
        assert_eq!(p.unrealized_pnl, dec!(0));
        assert_eq!(p.total_notional, dec!(1000));
    }
}
