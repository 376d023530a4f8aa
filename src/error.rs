use thiserror::Error;

/// Main error type for the trading controller
#[derive(Error, Debug)]
pub enum WardenError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Market data errors
    #[error("Market data unavailable: {0}")]
    MarketDataUnavailable(String),

    // Trade lifecycle errors
    #[error("No active trade for symbol: {0}")]
    NoActiveTrade(String),

    #[error("Finalize rejected: {symbol} still holds qty {residual_qty}")]
    NonZeroResidual {
        symbol: String,
        residual_qty: rust_decimal::Decimal,
    },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    // Gateway errors
    #[error("Order submission failed: {0}")]
    OrderSubmission(String),

    #[error("Order timeout: {0}")]
    OrderTimeout(String),

    #[error("Order rejected: {0}")]
    OrderRejected(String),

    // Persistence errors
    #[error("Journal append failed: {0}")]
    JournalAppend(String),

    #[error("Checkpoint write failed: {0}")]
    CheckpointWrite(String),

    #[error("Replay failed at seq {seq}: {reason}")]
    Replay { seq: u64, reason: String },

    // Risk management errors
    #[error("Session halted: {0}")]
    SessionHalted(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for WardenError
pub type Result<T> = std::result::Result<T, WardenError>;
