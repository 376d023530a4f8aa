use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Admission verdict for a single order intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "UPPERCASE")]
pub enum RiskDecision {
    Allow {
        reason: String,
    },
    Block {
        reason: String,
    },
    Reduce {
        adjusted_qty: Decimal,
        reason: String,
    },
    HaltSession {
        reason: String,
    },
}

impl RiskDecision {
    pub fn allow(reason: impl Into<String>) -> Self {
        RiskDecision::Allow {
            reason: reason.into(),
        }
    }

    pub fn block(reason: impl Into<String>) -> Self {
        RiskDecision::Block {
            reason: reason.into(),
        }
    }

    pub fn reduce(adjusted_qty: Decimal, reason: impl Into<String>) -> Self {
        RiskDecision::Reduce {
            adjusted_qty,
            reason: reason.into(),
        }
    }

    pub fn halt(reason: impl Into<String>) -> Self {
        RiskDecision::HaltSession {
            reason: reason.into(),
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, RiskDecision::Allow { .. })
    }

    pub fn is_halt(&self) -> bool {
        matches!(self, RiskDecision::HaltSession { .. })
    }

    /// Quantity the intent may proceed with, if any
    pub fn admitted_qty(&self, requested: Decimal) -> Option<Decimal> {
        match self {
            RiskDecision::Allow { .. } => Some(requested),
            RiskDecision::Reduce { adjusted_qty, .. } => Some(*adjusted_qty),
            _ => None,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            RiskDecision::Allow { reason }
            | RiskDecision::Block { reason }
            | RiskDecision::Reduce { reason, .. }
            | RiskDecision::HaltSession { reason } => reason,
        }
    }
}

impl std::fmt::Display for RiskDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskDecision::Allow { reason } => write!(f, "ALLOW: {reason}"),
            RiskDecision::Block { reason } => write!(f, "BLOCK: {reason}"),
            RiskDecision::Reduce {
                adjusted_qty,
                reason,
            } => write!(f, "REDUCE(qty={adjusted_qty}): {reason}"),
            RiskDecision::HaltSession { reason } => write!(f, "HALT_SESSION: {reason}"),
        }
    }
}

/// Fixed taxonomy of veto causes, evaluated in this order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VetoReason {
    SymbolDailyBudget,
    StrategyDailyBudget,
    GlobalDailyBudget,
    PostLossCooldown,
    InsufficientEdge,
    ScoreBelowMinimum,
}

impl VetoReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            VetoReason::SymbolDailyBudget => "symbol_daily_budget",
            VetoReason::StrategyDailyBudget => "strategy_daily_budget",
            VetoReason::GlobalDailyBudget => "global_daily_budget",
            VetoReason::PostLossCooldown => "post_loss_cooldown",
            VetoReason::InsufficientEdge => "insufficient_edge",
            VetoReason::ScoreBelowMinimum => "score_below_minimum",
        }
    }
}

impl std::fmt::Display for VetoReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Scored (and possibly vetoed) signal assessment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalQualityScore {
    /// Composite score in [0, 1]
    pub score: f64,
    pub vetoed: bool,
    pub veto_reason: Option<VetoReason>,
    pub reason: String,
}

impl SignalQualityScore {
    pub fn passed(score: f64, reason: impl Into<String>) -> Self {
        Self {
            score,
            vetoed: false,
            veto_reason: None,
            reason: reason.into(),
        }
    }

    pub fn vetoed(score: f64, veto: VetoReason, reason: impl Into<String>) -> Self {
        Self {
            score,
            vetoed: true,
            veto_reason: Some(veto),
            reason: reason.into(),
        }
    }
}

/// Expiry-risk assessment for a prospective order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpiryDecision {
    /// Multiplier applied to the sized risk (1.0 = unchanged)
    pub risk_scale: f64,
    pub allow_new_entry: bool,
    pub reason: String,
}

impl ExpiryDecision {
    pub fn pass(reason: impl Into<String>) -> Self {
        Self {
            risk_scale: 1.0,
            allow_new_entry: true,
            reason: reason.into(),
        }
    }

    pub fn scaled(risk_scale: f64, reason: impl Into<String>) -> Self {
        Self {
            risk_scale,
            allow_new_entry: true,
            reason: reason.into(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            risk_scale: 0.0,
            allow_new_entry: false,
            reason: reason.into(),
        }
    }
}
