use async_trait::async_trait;

use crate::domain::{Frequency, Rule, RuleId, Trade};
use crate::error::Result;

/// Durable rule and trade records
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Enabled rules of one cadence
    async fn get_active_rules(&self, frequency: Frequency) -> Result<Vec<Rule>>;

    /// Trades that are not completed, at most one per rule
    async fn get_incomplete_trades(&self) -> Result<Vec<Trade>>;

    async fn get_trade_for_rule(&self, rule_id: RuleId) -> Result<Option<Trade>>;

    async fn save_rule(&self, rule: &Rule) -> Result<()>;

    /// Insert or update; returns the trade with its id assigned
    async fn save_trade(&self, trade: &Trade) -> Result<Trade>;

    async fn remove_trade(&self, trade: &Trade) -> Result<()>;
}
