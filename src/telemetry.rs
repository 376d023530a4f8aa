//! Best-effort telemetry. Events go out on a broadcast channel; a full
//! or absent subscriber never back-pressures or errors the control loop.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::domain::{ExitReason, RiskDecision, TradeRecord, VetoReason};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TelemetryEvent {
    OrderSubmitted {
        symbol: String,
        side: String,
        qty: Decimal,
        price: Decimal,
        /// Signal quality behind the order; absent on exit orders
        quality_score: Option<f64>,
        timestamp: DateTime<Utc>,
    },
    OrderFilled {
        symbol: String,
        side: String,
        qty: Decimal,
        price: Decimal,
        timestamp: DateTime<Utc>,
    },
    RiskBlocked {
        symbol: String,
        decision: RiskDecision,
        timestamp: DateTime<Utc>,
    },
    SignalVetoed {
        symbol: String,
        strategy: String,
        veto: VetoReason,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    ExitTriggered {
        symbol: String,
        exit_reason: ExitReason,
        price: Decimal,
        timestamp: DateTime<Utc>,
    },
    TradeClosed {
        record: TradeRecord,
    },
    SessionHalted {
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

#[derive(Clone)]
pub struct TelemetryBus {
    tx: broadcast::Sender<TelemetryEvent>,
}

impl TelemetryBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.tx.subscribe()
    }

    /// Fire-and-forget publish. Lagging or absent subscribers are their
    /// own problem.
    pub fn publish(&self, event: TelemetryEvent) {
        if self.tx.send(event).is_err() {
            trace!("telemetry event dropped, no subscribers");
        }
    }
}

impl Default for TelemetryBus {
    fn default() -> Self {
        Self::new()
    }
}
