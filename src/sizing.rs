//! Position Sizer
//!
//! Converts the per-trade risk budget into an order quantity, rounded to
//! lot multiples and clamped by exposure capacity, notional bounds and
//! the concurrent-trade limit. An offline-computed overlay can scale or
//! disable sizing per (symbol, strategy).

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::config::SizingConfig;
use crate::domain::{PortfolioState, Side};

/// Offline-computed multiplier state for one (symbol, strategy)
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OverlayStatus {
    /// Multiplier applies as computed
    Active(Decimal),
    /// Multiplier applies, capped at 1.5x
    Boost(Decimal),
    /// Sizing is forced to zero regardless of the primary result
    Disabled,
    /// Not enough history; neutral 1x
    InsufficientData,
}

impl OverlayStatus {
    fn multiplier(self) -> Decimal {
        match self {
            OverlayStatus::Active(m) => m,
            OverlayStatus::Boost(m) => m.min(dec!(1.5)),
            OverlayStatus::Disabled => Decimal::ZERO,
            OverlayStatus::InsufficientData => Decimal::ONE,
        }
    }
}

/// Per-(symbol, strategy) overlay table, loaded from offline analysis
#[derive(Debug, Default)]
pub struct SizingOverlay {
    entries: HashMap<(String, String), OverlayStatus>,
}

impl SizingOverlay {
    pub fn set(&mut self, symbol: &str, strategy: &str, status: OverlayStatus) {
        self.entries
            .insert((symbol.to_string(), strategy.to_string()), status);
    }

    pub fn lookup(&self, symbol: &str, strategy: &str) -> OverlayStatus {
        self.entries
            .get(&(symbol.to_string(), strategy.to_string()))
            .copied()
            .unwrap_or(OverlayStatus::InsufficientData)
    }
}

pub struct SizeRequest<'a> {
    pub portfolio: &'a PortfolioState,
    pub symbol: &'a str,
    pub strategy: &'a str,
    pub side: Side,
    pub price: Decimal,
    pub lot_size: Decimal,
    /// Per-unit volatility; scales the risk budget into quantity when present
    pub atr: Option<Decimal>,
}

pub struct PositionSizer {
    config: SizingConfig,
    overlay: SizingOverlay,
}

impl PositionSizer {
    pub fn new(config: SizingConfig) -> Self {
        Self {
            config,
            overlay: SizingOverlay::default(),
        }
    }

    pub fn with_overlay(config: SizingConfig, overlay: SizingOverlay) -> Self {
        Self { config, overlay }
    }

    pub fn overlay_mut(&mut self) -> &mut SizingOverlay {
        &mut self.overlay
    }

    /// Size one order. Returns an unsigned quantity in lot multiples;
    /// zero means the order should not be placed.
    pub fn size_order(&self, req: &SizeRequest<'_>) -> Decimal {
        if req.price <= Decimal::ZERO || req.lot_size <= Decimal::ZERO || req.side == Side::Flat {
            warn!(symbol = req.symbol, "unsizable request");
            return Decimal::ZERO;
        }

        let status = self.overlay.lookup(req.symbol, req.strategy);
        if status == OverlayStatus::Disabled {
            debug!(symbol = req.symbol, strategy = req.strategy, "overlay disabled");
            return Decimal::ZERO;
        }

        let limit = self.config.max_concurrent_trades;
        if limit > 0
            && req.portfolio.open_positions_for(req.symbol) == 0
            && req.portfolio.open_position_count() >= limit as usize
        {
            debug!(
                symbol = req.symbol,
                open = req.portfolio.open_position_count(),
                limit,
                "concurrent trade limit reached"
            );
            return Decimal::ZERO;
        }

        let target_risk = req.portfolio.capital * self.config.risk_per_trade_pct;

        // Per-unit risk: ATR-scaled when available, else full price so the
        // notional itself is bounded by the risk budget.
        let per_unit_risk = match req.atr {
            Some(atr) if atr > Decimal::ZERO => atr * self.config.atr_risk_multiple,
            _ => req.price,
        };
        if per_unit_risk <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let mut qty = round_to_lot(target_risk / per_unit_risk, req.lot_size);

        // Never exceed remaining exposure capacity
        let capacity = round_to_lot(req.portfolio.free_notional / req.price, req.lot_size);
        qty = qty.min(capacity);

        if self.config.max_order_notional > Decimal::ZERO {
            let cap = round_to_lot(self.config.max_order_notional / req.price, req.lot_size);
            qty = qty.min(cap);
        }

        // Secondary overlay multiplier, re-rounded to lots
        qty = round_to_lot(qty * status.multiplier(), req.lot_size);

        if qty < req.lot_size {
            return Decimal::ZERO;
        }
        if self.config.min_order_notional > Decimal::ZERO
            && qty * req.price < self.config.min_order_notional
        {
            debug!(
                symbol = req.symbol,
                notional = %(qty * req.price),
                "below minimum order notional"
            );
            return Decimal::ZERO;
        }

        qty
    }
}

fn round_to_lot(qty: Decimal, lot_size: Decimal) -> Decimal {
    if qty <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (qty / lot_size).floor() * lot_size
}
