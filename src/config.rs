use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub account: AccountConfig,
    pub risk: RiskConfig,
    pub sizing: SizingConfig,
    pub stops: StopConfig,
    pub quality: QualityConfig,
    pub expiry: ExpiryConfig,
    pub session: SessionConfig,
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub dry_run: DryRunConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    /// Starting capital for the session
    pub capital: Decimal,
    /// Exposure cap as fraction of equity (e.g. 2.0 = 200% gross)
    #[serde(default = "default_max_exposure_pct")]
    pub max_exposure_pct: Decimal,
}

fn default_max_exposure_pct() -> Decimal {
    Decimal::ONE
}

/// Admission limits. A zero-valued threshold disables that check.
#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    /// Absolute daily loss that halts the session
    pub max_daily_loss_abs: Decimal,
    /// Daily loss as fraction of capital that halts the session (e.g. 0.03)
    pub max_daily_loss_pct: Decimal,
    /// Per-trade notional budget as fraction of capital (e.g. 0.01)
    pub per_trade_risk_pct: Decimal,
    /// Maximum open positions across all symbols
    pub max_positions_total: u32,
    /// Maximum open positions per symbol
    pub max_positions_per_symbol: u32,
    /// Minimum seconds between entries on the same symbol
    pub min_seconds_between_entries: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SizingConfig {
    /// Risk budget per trade as fraction of capital (e.g. 0.01)
    pub risk_per_trade_pct: Decimal,
    /// ATR multiple used when ATR-scaling the risk budget into a quantity
    #[serde(default = "default_atr_risk_multiple")]
    pub atr_risk_multiple: Decimal,
    /// Minimum order notional (0 disables)
    #[serde(default)]
    pub min_order_notional: Decimal,
    /// Maximum order notional (0 disables)
    #[serde(default)]
    pub max_order_notional: Decimal,
    /// Maximum concurrent trades the sizer will open into (0 disables)
    #[serde(default)]
    pub max_concurrent_trades: u32,
    /// Contract lot size per symbol; symbols not listed trade in units of 1
    #[serde(default)]
    pub lot_sizes: HashMap<String, Decimal>,
}

impl SizingConfig {
    pub fn lot_size_for(&self, symbol: &str) -> Decimal {
        self.lot_sizes
            .get(symbol)
            .copied()
            .filter(|lot| *lot > Decimal::ZERO)
            .unwrap_or(Decimal::ONE)
    }
}

fn default_atr_risk_multiple() -> Decimal {
    Decimal::TWO
}

#[derive(Debug, Clone, Deserialize)]
pub struct StopConfig {
    /// ATR multiple for the candidate stop distance
    pub sl_atr_multiple: Decimal,
    /// ATR multiple for the candidate target distance
    pub tp_atr_multiple: Decimal,
    /// Hard cap on stop distance as fraction of entry price
    pub hard_sl_pct_cap: Decimal,
    /// Hard cap on target distance as fraction of entry price
    pub hard_tp_pct_cap: Decimal,
    /// ATR below this floor falls back to pct-of-price levels
    #[serde(default)]
    pub atr_floor: Decimal,
    /// Fallback stop distance as fraction of entry (used when ATR unusable)
    #[serde(default = "default_fallback_sl_pct")]
    pub fallback_sl_pct: Decimal,
    /// Fallback target distance as fraction of entry
    #[serde(default = "default_fallback_tp_pct")]
    pub fallback_tp_pct: Decimal,
    /// R level at which trailing activates
    pub trail_start_r: Decimal,
    /// R stepped back from the running max when trailing
    pub trail_step_r: Decimal,
    /// Minimum locked R once trailing is active
    pub trail_lock_r: Decimal,
    /// Override for the R basis; unset derives max(price * 0.5%, 1.0)
    #[serde(default)]
    pub r_basis_override: Option<Decimal>,
}

fn default_fallback_sl_pct() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

fn default_fallback_tp_pct() -> Decimal {
    Decimal::new(2, 2) // 0.02
}

#[derive(Debug, Clone, Deserialize)]
pub struct QualityConfig {
    /// Rolling window size of realized R-multiples per (strategy, symbol)
    #[serde(default = "default_quality_window")]
    pub window_size: usize,
    /// Minimum score below which a signal is vetoed
    pub min_score: f64,
    /// Daily entry budget per symbol (0 disables)
    #[serde(default)]
    pub max_trades_per_symbol_day: u32,
    /// Daily entry budget per strategy (0 disables)
    #[serde(default)]
    pub max_trades_per_strategy_day: u32,
    /// Daily entry budget across the session (0 disables)
    #[serde(default)]
    pub max_trades_global_day: u32,
    /// Cooldown after a losing trade on the same (strategy, symbol)
    #[serde(default)]
    pub post_loss_cooldown_secs: u64,
    /// Expected edge must exceed cost_multiplier x estimated cost
    #[serde(default = "default_cost_multiplier")]
    pub cost_multiplier: f64,
    /// Estimated round-trip transaction cost per trade
    #[serde(default)]
    pub est_transaction_cost: Decimal,
    /// ATR-to-price ratio below which volatility is considered too low
    #[serde(default)]
    pub atr_ratio_low: f64,
    /// ATR-to-price ratio above which volatility is considered too high
    #[serde(default = "default_atr_ratio_high")]
    pub atr_ratio_high: f64,
    /// Multiplicative penalty applied at volatility extremes
    #[serde(default = "default_vol_penalty")]
    pub volatility_penalty: f64,
    /// Minutes after open / before close treated as edge-of-session
    #[serde(default = "default_session_edge_minutes")]
    pub session_edge_minutes: i64,
    /// Multiplicative penalty applied near open/close
    #[serde(default = "default_tod_penalty")]
    pub time_of_day_penalty: f64,
}

fn default_quality_window() -> usize {
    20
}

fn default_cost_multiplier() -> f64 {
    1.5
}

fn default_atr_ratio_high() -> f64 {
    0.05
}

fn default_vol_penalty() -> f64 {
    0.7
}

fn default_session_edge_minutes() -> i64 {
    30
}

fn default_tod_penalty() -> f64 {
    0.8
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExpiryConfig {
    /// Master switch; disabled means entries pass at scale 1.0
    pub enabled: bool,
    /// Weekly expiry weekday, e.g. "Thu"
    #[serde(default = "default_expiry_weekday")]
    pub expiry_weekday: String,
    /// IST clock time after which option entries are denied on expiry day
    #[serde(default = "default_entry_cutoff")]
    pub entry_cutoff: String,
    /// Minutes before session close with the tightest scale
    #[serde(default = "default_final_window_minutes")]
    pub final_window_minutes: i64,
    /// Risk scale applied on expiry day
    #[serde(default = "default_expiry_day_scale")]
    pub expiry_day_scale: f64,
    /// Risk scale inside the final window on expiry day
    #[serde(default = "default_final_window_scale")]
    pub final_window_scale: f64,
    /// Risk scale during expiry week (non-expiry days)
    #[serde(default = "default_expiry_week_scale")]
    pub expiry_week_scale: f64,
}

fn default_expiry_weekday() -> String {
    "Thu".to_string()
}

fn default_entry_cutoff() -> String {
    "15:00".to_string()
}

fn default_final_window_minutes() -> i64 {
    30
}

fn default_expiry_day_scale() -> f64 {
    0.5
}

fn default_final_window_scale() -> f64 {
    0.25
}

fn default_expiry_week_scale() -> f64 {
    0.75
}

/// IST trading session clock
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Session open, IST "HH:MM"
    #[serde(default = "default_session_open")]
    pub open_time: String,
    /// Session close, IST "HH:MM"
    #[serde(default = "default_session_close")]
    pub close_time: String,
    /// Gate entries and square-offs on the IST session clock
    #[serde(default = "default_enforce_hours")]
    pub enforce_hours: bool,
}

fn default_session_open() -> String {
    "09:15".to_string()
}

fn default_session_close() -> String {
    "15:30".to_string()
}

fn default_enforce_hours() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            open_time: default_session_open(),
            close_time: default_session_close(),
            enforce_hours: default_enforce_hours(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Directory holding journal and checkpoint files
    pub data_dir: String,
    /// Seconds between periodic checkpoints
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval_secs: u64,
}

fn default_checkpoint_interval() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    /// Control loop tick interval in milliseconds
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Timeout applied to each external gateway call
    #[serde(default = "default_order_timeout")]
    pub order_timeout_ms: u64,
}

fn default_tick_interval() -> u64 {
    1000
}

fn default_order_timeout() -> u64 {
    5000
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval(),
            order_timeout_ms: default_order_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DryRunConfig {
    /// Route orders through the in-process paper gateway
    #[serde(default)]
    pub enabled: bool,
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("persistence.checkpoint_interval_secs", 60)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(
                File::from(config_dir.join(
                    std::env::var("WARDEN_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            .add_source(
                Environment::with_prefix("WARDEN")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.account.capital <= Decimal::ZERO {
            errors.push("account.capital must be positive".to_string());
        }

        if self.risk.per_trade_risk_pct < Decimal::ZERO
            || self.risk.per_trade_risk_pct > Decimal::ONE
        {
            errors.push("risk.per_trade_risk_pct must be in [0, 1]".to_string());
        }

        if self.risk.max_daily_loss_pct < Decimal::ZERO
            || self.risk.max_daily_loss_pct > Decimal::ONE
        {
            errors.push("risk.max_daily_loss_pct must be in [0, 1]".to_string());
        }

        if self.sizing.risk_per_trade_pct <= Decimal::ZERO
            || self.sizing.risk_per_trade_pct > Decimal::ONE
        {
            errors.push("sizing.risk_per_trade_pct must be in (0, 1]".to_string());
        }

        if self.stops.hard_sl_pct_cap <= Decimal::ZERO {
            errors.push("stops.hard_sl_pct_cap must be positive".to_string());
        }

        if self.stops.trail_step_r < Decimal::ZERO || self.stops.trail_lock_r < Decimal::ZERO {
            errors.push("stops trailing R values must be non-negative".to_string());
        }

        if !(0.0..=1.0).contains(&self.quality.min_score) {
            errors.push("quality.min_score must be in [0, 1]".to_string());
        }

        if parse_hhmm(&self.expiry.entry_cutoff).is_none() {
            errors.push(format!(
                "expiry.entry_cutoff is not HH:MM: {}",
                self.expiry.entry_cutoff
            ));
        }

        if parse_weekday(&self.expiry.expiry_weekday).is_none() {
            errors.push(format!(
                "expiry.expiry_weekday is not a weekday: {}",
                self.expiry.expiry_weekday
            ));
        }

        for (name, value) in [
            ("session.open_time", &self.session.open_time),
            ("session.close_time", &self.session.close_time),
        ] {
            if parse_hhmm(value).is_none() {
                errors.push(format!("{name} is not HH:MM: {value}"));
            }
        }

        if self.persistence.data_dir.is_empty() {
            errors.push("persistence.data_dir must be set".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Parse "HH:MM" into a NaiveTime
pub fn parse_hhmm(s: &str) -> Option<chrono::NaiveTime> {
    chrono::NaiveTime::parse_from_str(s, "%H:%M").ok()
}

/// Parse a short or full weekday name
pub fn parse_weekday(s: &str) -> Option<chrono::Weekday> {
    s.parse::<chrono::Weekday>().ok()
}
