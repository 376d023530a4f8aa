use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Directional side of an intent or position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Long,
    Short,
    Flat,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "LONG",
            Side::Short => "SHORT",
            Side::Flat => "FLAT",
        }
    }

    /// Sign of the side: +1 for long, -1 for short, 0 for flat
    pub fn sign(&self) -> Decimal {
        match self {
            Side::Long => Decimal::ONE,
            Side::Short => -Decimal::ONE,
            Side::Flat => Decimal::ZERO,
        }
    }

    /// Side implied by a signed quantity
    pub fn from_qty(qty: Decimal) -> Side {
        if qty > Decimal::ZERO {
            Side::Long
        } else if qty < Decimal::ZERO {
            Side::Short
        } else {
            Side::Flat
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
            Side::Flat => Side::Flat,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Raw directional intent produced by a strategy collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderIntent {
    pub intent_id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub strategy: String,
    /// Strategy confidence in [0, 1]
    pub confidence: f64,
    pub reason: String,
    /// Optional quantity hint; the sizer decides the final quantity
    pub qty_hint: Option<Decimal>,
    pub created_at: DateTime<Utc>,
}

impl OrderIntent {
    pub fn new(
        symbol: impl Into<String>,
        side: Side,
        strategy: impl Into<String>,
        confidence: f64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            intent_id: Uuid::new_v4(),
            symbol: symbol.into(),
            side,
            strategy: strategy.into(),
            confidence: confidence.clamp(0.0, 1.0),
            reason: reason.into(),
            qty_hint: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_qty_hint(mut self, qty: Decimal) -> Self {
        self.qty_hint = Some(qty);
        self
    }

    /// Entries move a position away from flat; FLAT intents are exits
    pub fn is_new_entry(&self) -> bool {
        self.side != Side::Flat
    }
}

/// Order submission handed to the broker gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub order_id: Uuid,
    pub symbol: String,
    pub side: Side,
    /// Unsigned quantity
    pub qty: Decimal,
    pub price: Decimal,
    pub strategy: String,
    pub created_at: DateTime<Utc>,
}

impl OrderRequest {
    pub fn new(
        symbol: impl Into<String>,
        side: Side,
        qty: Decimal,
        price: Decimal,
        strategy: impl Into<String>,
    ) -> Self {
        Self {
            order_id: Uuid::new_v4(),
            symbol: symbol.into(),
            side,
            qty,
            price,
            strategy: strategy.into(),
            created_at: Utc::now(),
        }
    }

    pub fn notional(&self) -> Decimal {
        self.qty.abs() * self.price
    }
}

/// Gateway-reported order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Submitted,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }
}

/// Fill event from the broker gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: Uuid,
    pub symbol: String,
    pub side: Side,
    /// Unsigned filled quantity
    pub filled_qty: Decimal,
    pub fill_price: Decimal,
    pub status: OrderStatus,
    pub strategy: String,
    pub timestamp: DateTime<Utc>,
}

impl Fill {
    /// Signed quantity delta this fill applies to the symbol's net position
    pub fn signed_qty(&self) -> Decimal {
        self.filled_qty.abs() * self.side.sign()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_side_from_qty() {
        assert_eq!(Side::from_qty(dec!(5)), Side::Long);
        assert_eq!(Side::from_qty(dec!(-2)), Side::Short);
        assert_eq!(Side::from_qty(dec!(0)), Side::Flat);
    }

    #[test]
    fn test_confidence_clamped() {
        let intent = OrderIntent::new("NIFTY", Side::Long, "ema", 1.7, "breakout");
        assert_eq!(intent.confidence, 1.0);
    }

    #[test]
    fn test_fill_signed_qty() {
        let fill = Fill {
            order_id: Uuid::new_v4(),
            symbol: "NIFTY".to_string(),
            side: Side::Short,
            filled_qty: dec!(10),
            fill_price: dec!(100),
            status: OrderStatus::Filled,
            strategy: "ema".to_string(),
            timestamp: Utc::now(),
        };
        assert_eq!(fill.signed_qty(), dec!(-10));
    }
}
