use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub broker: BrokerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    pub dry_run: DryRunConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Trading REST endpoint (orders, account, clock)
    pub trading_url: String,
    /// Market data REST endpoint (latest trades)
    pub data_url: String,
    /// API key id
    #[serde(default)]
    pub key_id: String,
    /// API secret
    #[serde(default)]
    pub secret_key: String,
    /// HTTP timeout for every broker call in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout() -> u64 {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Fast cadence interval in milliseconds
    #[serde(default = "default_fast_interval")]
    pub fast_interval_ms: u64,
    /// Slow cadence interval in milliseconds
    #[serde(default = "default_slow_interval")]
    pub slow_interval_ms: u64,
    /// Upper bound on one rule's processing within a tick
    #[serde(default = "default_rule_timeout")]
    pub rule_timeout_ms: u64,
}

fn default_fast_interval() -> u64 {
    5_000
}

fn default_slow_interval() -> u64 {
    60_000
}

fn default_rule_timeout() -> u64 {
    20_000
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            fast_interval_ms: default_fast_interval(),
            slow_interval_ms: default_slow_interval(),
            rule_timeout_ms: default_rule_timeout(),
        }
    }
}

impl SchedulerConfig {
    pub fn fast_interval(&self) -> Duration {
        Duration::from_millis(self.fast_interval_ms)
    }

    pub fn slow_interval(&self) -> Duration {
        Duration::from_millis(self.slow_interval_ms)
    }

    pub fn rule_timeout(&self) -> Duration {
        Duration::from_millis(self.rule_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// Buy limit premium over the last price, in percent (e.g., 0.5 = 0.5%)
    #[serde(default = "default_price_offset")]
    pub buy_premium_pct: Decimal,
    /// Sell limit discount under the last price, in percent
    #[serde(default = "default_price_offset")]
    pub sell_discount_pct: Decimal,
    /// Seconds before the close at which intraday positions are liquidated
    #[serde(default = "default_closing_window")]
    pub closing_window_secs: i64,
    /// Engage the kill switch on startup (liquidate everything)
    #[serde(default)]
    pub liquidate_all: bool,
}

fn default_price_offset() -> Decimal {
    Decimal::new(5, 1)
}

fn default_closing_window() -> i64 {
    30
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            buy_premium_pct: default_price_offset(),
            sell_discount_pct: default_price_offset(),
            closing_window_secs: default_closing_window(),
            liquidate_all: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct NotificationConfig {
    /// Chat webhook receiving order and error events
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DryRunConfig {
    /// Enable dry run mode (paper orders, live quotes)
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
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
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("dry_run.enabled", false)?
            .set_default("database.max_connections", 5)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("RULEBOT_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (RULEBOT_BROKER__KEY_ID, etc.)
            .add_source(
                Environment::with_prefix("RULEBOT")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Create a default configuration for CLI usage
    pub fn default_config(dry_run: bool) -> Self {
        Self {
            broker: BrokerConfig {
                trading_url: "https://paper-api.alpaca.markets".to_string(),
                data_url: "https://data.alpaca.markets".to_string(),
                key_id: String::new(),
                secret_key: String::new(),
                request_timeout_ms: default_request_timeout(),
            },
            scheduler: SchedulerConfig::default(),
            execution: ExecutionConfig::default(),
            database: DatabaseConfig {
                url: "postgres://localhost/rulebot".to_string(),
                max_connections: 5,
            },
            notifications: NotificationConfig::default(),
            dry_run: DryRunConfig { enabled: dry_run },
            logging: LoggingConfig::default(),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.scheduler.fast_interval_ms == 0 || self.scheduler.slow_interval_ms == 0 {
            errors.push("scheduler intervals must be positive".to_string());
        }

        if self.scheduler.fast_interval_ms > self.scheduler.slow_interval_ms {
            errors.push("fast_interval_ms should not exceed slow_interval_ms".to_string());
        }

        if self.scheduler.rule_timeout_ms == 0 {
            errors.push("rule_timeout_ms must be positive".to_string());
        }

        let pct_ok = |p: Decimal| p >= Decimal::ZERO && p < Decimal::from(10);
        if !pct_ok(self.execution.buy_premium_pct) {
            errors.push("buy_premium_pct must be within [0, 10)".to_string());
        }
        if !pct_ok(self.execution.sell_discount_pct) {
            errors.push("sell_discount_pct must be within [0, 10)".to_string());
        }

        if self.execution.closing_window_secs < 0 {
            errors.push("closing_window_secs must not be negative".to_string());
        }

        if !self.dry_run.enabled
            && (self.broker.key_id.is_empty() || self.broker.secret_key.is_empty())
        {
            errors.push("broker key_id and secret_key are required for live trading".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
