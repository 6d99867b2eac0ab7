use chrono::{FixedOffset, NaiveTime};
use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub market: MarketConfig,
    pub session: SessionConfig,
    pub strategy: StrategyDefaults,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketConfig {
    /// Instrument key of the spot index (option chain anchor)
    pub underlying: String,
    /// Underlying symbol for contract lookups (e.g. "NIFTY")
    pub symbol: String,
    /// Broker REST API base URL
    pub rest_url: String,
    /// Exchange timezone as a fixed UTC offset in minutes (IST = 330)
    pub tz_offset_minutes: i32,
}

impl MarketConfig {
    pub fn tz(&self) -> FixedOffset {
        FixedOffset::east_opt(self.tz_offset_minutes * 60)
            .expect("tz_offset_minutes out of range")
    }
}

/// Exchange session timeline; all times are exchange-local.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub market_open: NaiveTime,
    /// Watchlist scan begins here
    pub observation_start: NaiveTime,
    /// Breakout entries are only taken inside [entry_start, entry_end)
    pub entry_start: NaiveTime,
    pub entry_end: NaiveTime,
    /// SL-to-cost rule fires at this time
    pub breakeven_checkpoint: NaiveTime,
    /// Hard intraday exit for any open position
    pub square_off: NaiveTime,
    pub market_close: NaiveTime,
}

/// Seed values for the strategy_params table plus the engine's
/// selection tuning. Runtime values live in the database.
#[derive(Debug, Clone, Deserialize)]
pub struct StrategyDefaults {
    pub target_premium: Decimal,
    pub target_points: Decimal,
    pub sl_points: Decimal,
    pub lot_size: i64,
    pub trailing_on: bool,
    pub trailing_trigger: Decimal,
    pub trailing_gap: Decimal,
    /// Band around target_premium a strike must fall in to be watchlisted
    pub premium_tolerance: Decimal,
    /// Entries are skipped once LTP >= trigger + target_points - this buffer
    pub entry_cap_buffer: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// Bound on any single gateway call in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    /// Polling interval for order status in milliseconds
    #[serde(default = "default_poll_interval")]
    pub order_poll_interval_ms: u64,
    /// How long to poll an order for a fill before giving up
    #[serde(default = "default_fill_timeout")]
    pub order_fill_timeout_ms: u64,
}

fn default_request_timeout() -> u64 {
    5000
}

fn default_poll_interval() -> u64 {
    500
}

fn default_fill_timeout() -> u64 {
    10_000
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout(),
            order_poll_interval_ms: default_poll_interval(),
            order_fill_timeout_ms: default_fill_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchdogConfig {
    /// Poll interval in milliseconds (default: 1s)
    #[serde(default = "default_watchdog_interval")]
    pub interval_ms: u64,
    /// Seconds a stop breach must persist before the failsafe fires
    #[serde(default = "default_grace")]
    pub grace_secs: u64,
    /// Consecutive read failures before an operator alert
    #[serde(default = "default_alert_threshold")]
    pub failure_alert_threshold: u32,
    /// Consecutive read failures before the kill-switch trips
    #[serde(default = "default_kill_threshold")]
    pub failure_kill_threshold: u32,
}

fn default_watchdog_interval() -> u64 {
    1000
}

fn default_grace() -> u64 {
    3
}

fn default_alert_threshold() -> u32 {
    5
}

fn default_kill_threshold() -> u32 {
    15
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_watchdog_interval(),
            grace_secs: default_grace(),
            failure_alert_threshold: default_alert_threshold(),
            failure_kill_threshold: default_kill_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Bind address for the command API
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Actor ids allowed to issue commands
    #[serde(default)]
    pub admin_actor_ids: Vec<i64>,
    /// Shared admin token; set via OPTIX_API__ADMIN_TOKEN
    #[serde(default)]
    pub admin_token: Option<String>,
    /// Refuse all commands when no token is configured
    #[serde(default = "default_auth_required")]
    pub auth_required: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8686".to_string()
}

fn default_auth_required() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for the daily rolling log file; console-only when unset
    #[serde(default)]
    pub dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// Audit rows older than this are purged at startup
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
}

fn default_retention_days() -> i64 {
    30
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
        }
    }
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
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Environment-specific overlay (e.g. config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("OPTIX_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // OPTIX_API__ADMIN_TOKEN=... style overrides
            .add_source(Environment::with_prefix("OPTIX").separator("__"));

        builder.build()?.try_deserialize()
    }
}
