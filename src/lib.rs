pub mod config;
pub mod controller;
pub mod domain;
pub mod error;
pub mod expiry;
pub mod gateway;
pub mod lifecycle;
pub mod logging;
pub mod persistence;
pub mod quality;
pub mod risk;
pub mod sizing;
pub mod stops;
pub mod telemetry;

pub use config::AppConfig;
pub use controller::{Controller, ControllerHandles};
pub use domain::{
    ActiveTrade, ExitReason, Fill, OrderIntent, OrderRequest, OrderStatus, PortfolioState,
    QualityTag, RiskDecision, Side, SignalQualityScore, TimeBucket, TradeRecord, VetoReason,
};
pub use error::{Result, WardenError};
pub use expiry::ExpiryRiskAdapter;
pub use gateway::{BrokerGateway, MarketData, PaperGateway, StaticMarketData};
pub use lifecycle::{FillMeta, FillOutcome, TradeLifecycleManager};
pub use persistence::{
    recover, CheckpointData, CheckpointStore, Journal, JournalEvent, JournalReader, JournalRecord,
    ReplayState,
};
pub use quality::{SignalContext, SignalQualityManager};
pub use risk::{AdmissionCheck, RiskEngine};
pub use sizing::{OverlayStatus, PositionSizer, SizeRequest, SizingOverlay};
pub use stops::{ExitDecision, InitialLevels, LevelMethod, StopEngine, TrailingState};
pub use telemetry::{TelemetryBus, TelemetryEvent};
