use chrono::{DateTime, FixedOffset, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Side;

/// Why a trade (or part of it) was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Stop,
    TrailingStop,
    Target,
    RiskExit,
    Reverse,
    Manual,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::Stop => "stop",
            ExitReason::TrailingStop => "trailing_stop",
            ExitReason::Target => "target",
            ExitReason::RiskExit => "risk_exit",
            ExitReason::Reverse => "reverse",
            ExitReason::Manual => "manual",
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Coarse post-hoc classification of a closed trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityTag {
    A,
    B,
    C,
}

/// Session phase the trade was entered in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeBucket {
    Open,
    Mid,
    Close,
}

/// IST offset (+05:30); the session clock for bucketing and expiry rules
pub(crate) fn ist_offset() -> FixedOffset {
    FixedOffset::east_opt(5 * 3600 + 30 * 60).expect("valid IST offset")
}

impl TimeBucket {
    /// Classify an entry timestamp against the IST session window.
    /// The first and last `edge_minutes` of the session are Open/Close.
    pub fn classify(
        entry: DateTime<Utc>,
        session_open: NaiveTime,
        session_close: NaiveTime,
        edge_minutes: i64,
    ) -> TimeBucket {
        let ist = entry.with_timezone(&ist_offset()).time();
        let edge = chrono::Duration::minutes(edge_minutes);

        if ist < session_open + edge {
            TimeBucket::Open
        } else if ist >= session_close - edge {
            TimeBucket::Close
        } else {
            TimeBucket::Mid
        }
    }
}

/// The durable unit of truth for an open position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveTrade {
    pub trade_id: Uuid,
    pub signal_id: Uuid,
    pub symbol: String,
    pub strategy: String,
    pub side: Side,
    pub entry_time: DateTime<Utc>,
    /// Weighted-average entry price across adds
    pub entry_price: Decimal,
    /// Money amount planned to be at risk when the trade was opened
    pub planned_risk: Decimal,
    /// Signed net quantity; positive long, negative short
    pub qty: Decimal,
    /// Absolute quantity at open
    pub initial_size: Decimal,
    /// Running max favorable excursion (quantity-weighted, in money)
    pub mfe: Decimal,
    /// Running max adverse excursion (quantity-weighted, in money, >= 0)
    pub mae: Decimal,
    pub adds: u32,
    pub reduces: u32,
    pub bars_in_trade: u64,
    /// Realized PnL accumulated by reducing fills
    pub realized_pnl: Decimal,
    pub stop_price: Option<Decimal>,
    pub target_price: Option<Decimal>,
}

impl ActiveTrade {
    /// Fresh trade with no excursion or realized history yet
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        symbol: &str,
        side: Side,
        qty: Decimal,
        entry_price: Decimal,
        strategy: &str,
        signal_id: Uuid,
        planned_risk: Decimal,
        entry_time: DateTime<Utc>,
    ) -> Self {
        Self {
            trade_id: Uuid::new_v4(),
            signal_id,
            symbol: symbol.to_string(),
            strategy: strategy.to_string(),
            side,
            entry_time,
            entry_price,
            planned_risk,
            qty,
            initial_size: qty.abs(),
            mfe: Decimal::ZERO,
            mae: Decimal::ZERO,
            adds: 0,
            reduces: 0,
            bars_in_trade: 0,
            realized_pnl: Decimal::ZERO,
            stop_price: None,
            target_price: None,
        }
    }

    /// Directional, quantity-weighted PnL of the open quantity at `price`
    pub fn unrealized_at(&self, price: Decimal) -> Decimal {
        (price - self.entry_price) * self.qty
    }

    /// Notional of the open quantity at `price`
    pub fn notional_at(&self, price: Decimal) -> Decimal {
        self.qty.abs() * price
    }

    /// Signed favorable excursion per unit at `price` (positive = in favor)
    pub fn favorable_excursion_per_unit(&self, price: Decimal) -> Decimal {
        (price - self.entry_price) * self.side.sign()
    }
}

/// Immutable record of a finalized trade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub trade_id: Uuid,
    pub signal_id: Uuid,
    pub symbol: String,
    pub strategy: String,
    pub side: Side,
    pub entry_time: DateTime<Utc>,
    pub entry_price: Decimal,
    pub exit_time: DateTime<Utc>,
    pub exit_price: Decimal,
    pub exit_reason: ExitReason,
    pub exit_detail: Option<String>,
    pub initial_size: Decimal,
    pub planned_risk: Decimal,
    pub realized_pnl: Decimal,
    /// realized_pnl / planned_risk
    pub r_multiple: Decimal,
    pub mfe: Decimal,
    pub mae: Decimal,
    pub adds: u32,
    pub reduces: u32,
    pub bars_in_trade: u64,
    pub quality: QualityTag,
    pub time_bucket: TimeBucket,
}

impl TradeRecord {
    /// Classify outcome quality from R-multiple and adverse excursion.
    /// A: reached 1R, or the drawdown never exceeded the planned risk on a
    /// winning trade. C: decisively negative (lost half the planned risk or
    /// worse). B: everything else.
    pub fn classify(r_multiple: Decimal, mae: Decimal, planned_risk: Decimal) -> QualityTag {
        let half = Decimal::new(5, 1); // 0.5
        if r_multiple >= Decimal::ONE
            || (r_multiple > Decimal::ZERO && planned_risk > Decimal::ZERO && mae <= planned_risk)
        {
            QualityTag::A
        } else if r_multiple <= -half {
            QualityTag::C
        } else {
            QualityTag::B
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn test_quality_classification() {
        assert_eq!(
            TradeRecord::classify(dec!(1.2), dec!(500), dec!(1000)),
            QualityTag::A
        );
        assert_eq!(
            TradeRecord::classify(dec!(0.4), dec!(800), dec!(1000)),
            QualityTag::A
        );
        assert_eq!(
            TradeRecord::classify(dec!(-0.8), dec!(900), dec!(1000)),
            QualityTag::C
        );
        assert_eq!(
            TradeRecord::classify(dec!(0.2), dec!(1500), dec!(1000)),
            QualityTag::B
        );
    }

    #[test]
    fn test_time_bucket_classification() {
        let open = NaiveTime::from_hms_opt(9, 15, 0).unwrap();
        let close = NaiveTime::from_hms_opt(15, 30, 0).unwrap();

        // 09:30 IST == 04:00 UTC
        let early = Utc.with_ymd_and_hms(2025, 6, 5, 4, 0, 0).unwrap();
        assert_eq!(
            TimeBucket::classify(early, open, close, 60),
            TimeBucket::Open
        );

        // 12:00 IST == 06:30 UTC
        let midday = Utc.with_ymd_and_hms(2025, 6, 5, 6, 30, 0).unwrap();
        assert_eq!(
            TimeBucket::classify(midday, open, close, 60),
            TimeBucket::Mid
        );

        // 15:00 IST == 09:30 UTC
        let late = Utc.with_ymd_and_hms(2025, 6, 5, 9, 30, 0).unwrap();
        assert_eq!(
            TimeBucket::classify(late, open, close, 60),
            TimeBucket::Close
        );
    }

    #[test]
    fn test_unrealized_signed() {
        let trade = ActiveTrade {
            trade_id: Uuid::new_v4(),
            signal_id: Uuid::new_v4(),
            symbol: "NIFTY".to_string(),
            strategy: "ema".to_string(),
            side: Side::Short,
            entry_time: Utc::now(),
            entry_price: dec!(100),
            planned_risk: dec!(1000),
            qty: dec!(-10),
            initial_size: dec!(10),
            mfe: dec!(0),
            mae: dec!(0),
            adds: 0,
            reduces: 0,
            bars_in_trade: 0,
            realized_pnl: dec!(0),
            stop_price: None,
            target_price: None,
        };

        // Short profits when price falls
        assert_eq!(trade.unrealized_at(dec!(95)), dec!(50));
        assert_eq!(trade.favorable_excursion_per_unit(dec!(95)), dec!(5));
    }
}
