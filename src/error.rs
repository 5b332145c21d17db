use thiserror::Error;

use crate::domain::RuleId;

/// Main error type for the trading bot
#[derive(Error, Debug)]
pub enum RulebotError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Rule {rule_id} has neither an entry nor an exit strategy")]
    NoStrategy { rule_id: RuleId },

    #[error("Invalid predicate at offset {position}: {message}")]
    InvalidPredicate { message: String, position: usize },

    #[error("No instrument mapping for symbol: {0}")]
    MissingInstrument(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Broker API error: HTTP {status}: {message}")]
    BrokerApi { status: u16, message: String },

    #[error("Timed out: {0}")]
    Timeout(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Market data errors
    #[error("Quote unavailable for symbol: {symbol}")]
    QuoteUnavailable { symbol: String },

    // Reconciliation errors
    #[error("Order {order_id} referenced by rule {rule_id} was not found")]
    OrderNotFound { rule_id: RuleId, order_id: String },

    #[error("Cancel of pending order {order_id} did not succeed")]
    CancelFailed { order_id: String },

    #[error("Cancel of partially filled order {order_id} did not succeed")]
    PartialCancelFailed { order_id: String },

    // Gateway rejections
    #[error("Order rejected ({kind}): {message}")]
    OrderRejected { kind: RejectionKind, message: String },

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for RulebotError
pub type Result<T> = std::result::Result<T, RulebotError>;

/// Why the order gateway refused an order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// Not enough shares held to cover a sell
    InsufficientShares,
    /// The instrument cannot be traded on this account
    NotTradable,
    Other,
}

impl std::fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionKind::InsufficientShares => write!(f, "insufficient shares"),
            RejectionKind::NotTradable => write!(f, "not tradable"),
            RejectionKind::Other => write!(f, "other"),
        }
    }
}

impl RulebotError {
    /// Rejection kind, if this error is a gateway rejection
    pub fn rejection(&self) -> Option<RejectionKind> {
        match self {
            RulebotError::OrderRejected { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Reconciliation inconsistencies abort the rule's tick and are logged loudly
    pub fn is_reconciliation(&self) -> bool {
        matches!(
            self,
            RulebotError::OrderNotFound { .. }
                | RulebotError::CancelFailed { .. }
                | RulebotError::PartialCancelFailed { .. }
        )
    }

    /// Configuration problems that make a rule unusable until someone edits it
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            RulebotError::NoStrategy { .. }
                | RulebotError::InvalidPredicate { .. }
                | RulebotError::MissingInstrument(_)
        )
    }
}
