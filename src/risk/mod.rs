//! Ordered admission gate. Every prospective entry passes through a fixed
//! chain of independent checks; the first non-ALLOW verdict wins.

mod checks;
mod engine;

pub use checks::{
    AdmissionCheck, CheckContext, DailyLossCheck, HaltCheck, PerTradeRiskCheck,
    PositionLimitCheck, SessionState, ThrottleCheck,
};
pub use engine::{HaltEvent, RiskEngine};
