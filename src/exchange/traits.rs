use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::domain::{AccountSnapshot, MarketHours, Order, OrderRequest, Quote};
use crate::error::{Result, RulebotError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrokerKind {
    /// Live REST brokerage
    Rest,
    /// In-memory order simulation
    Paper,
}

impl Default for BrokerKind {
    fn default() -> Self {
        Self::Rest
    }
}

impl BrokerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rest => "rest",
            Self::Paper => "paper",
        }
    }
}

impl std::fmt::Display for BrokerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BrokerKind {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "rest" | "live" => Ok(Self::Rest),
            "paper" | "dry_run" | "dry-run" => Ok(Self::Paper),
            _ => Err("invalid broker; expected rest|paper"),
        }
    }
}

pub fn parse_broker_kind(raw: &str) -> Result<BrokerKind> {
    BrokerKind::from_str(raw).map_err(|e| RulebotError::Validation(e.to_string()))
}

/// Quotes, market clock, account and order gateway of one brokerage.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrokerClient: Send + Sync {
    fn kind(&self) -> BrokerKind;

    /// Last price for every requested symbol; symbols without a price are omitted
    async fn get_quotes(&self, symbols: &[String]) -> Result<Vec<Quote>>;

    async fn get_market_hours(&self) -> Result<MarketHours>;

    async fn get_account(&self) -> Result<AccountSnapshot>;

    /// Shares currently held for `symbol` (zero when there is no position)
    async fn get_position_quantity(&self, symbol: &str) -> Result<Decimal>;

    /// Submit a limit order. Rejections surface as `RulebotError::OrderRejected`.
    async fn place_order(&self, request: &OrderRequest) -> Result<Order>;

    /// Returns whether the broker accepted the cancel
    async fn cancel_order(&self, order_id: &str) -> Result<bool>;

    async fn get_order(&self, order_id: &str) -> Result<Option<Order>>;
}
