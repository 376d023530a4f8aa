mod decision;
mod intent;
mod portfolio;
mod trade;

pub use decision::{
    ExpiryDecision, RiskDecision, SignalQualityScore, VetoReason,
};
pub use intent::{Fill, OrderIntent, OrderRequest, OrderStatus, Side};
pub use portfolio::{PortfolioState, PositionSnapshot};
pub use trade::{ActiveTrade, ExitReason, QualityTag, TimeBucket, TradeRecord};

pub(crate) use trade::ist_offset;
