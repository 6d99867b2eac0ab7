use thiserror::Error;

/// Main error type for the trading bot
#[derive(Error, Debug)]
pub enum BotError {
    // Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("http request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Market data errors
    #[error("market data unavailable: {0}")]
    MarketDataUnavailable(String),

    #[error("invalid market data: {0}")]
    InvalidMarketData(String),

    // Order execution errors
    #[error("order submission failed: {0}")]
    OrderSubmission(String),

    #[error("order not found: {0}")]
    OrderNotFound(String),

    #[error("timed out: {0}")]
    Timeout(String),

    // State machine errors
    #[error("invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // Broker/store disagreement; always surfaced to the operator
    #[error("state inconsistency: {0}")]
    Inconsistency(String),

    // Validation errors
    #[error("validation failed: {0}")]
    Validation(String),

    // Command interface errors
    #[error("unauthorized actor: {0}")]
    Unauthorized(i64),

    // IO errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for BotError
pub type Result<T> = std::result::Result<T, BotError>;

impl BotError {
    /// Whether the failure is expected to clear on its own; callers retry on
    /// the next tick instead of escalating.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BotError::Http(_)
                | BotError::Timeout(_)
                | BotError::MarketDataUnavailable(_)
                | BotError::InvalidMarketData(_)
                | BotError::Database(_)
        )
    }
}
