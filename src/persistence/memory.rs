//! In-memory rule store for dry runs and tests

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::debug;

use super::RuleStore;
use crate::domain::{Frequency, Rule, RuleId, Trade};
use crate::error::Result;

#[derive(Default)]
pub struct MemoryStore {
    rules: DashMap<RuleId, Rule>,
    trades: DashMap<i64, Trade>,
    /// Completed trades, kept for inspection
    history: DashMap<i64, Trade>,
    next_trade_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            next_trade_id: AtomicI64::new(1),
            ..Self::default()
        }
    }

    pub fn with_rules(rules: impl IntoIterator<Item = Rule>) -> Self {
        let store = Self::new();
        for rule in rules {
            store.rules.insert(rule.id, rule);
        }
        store
    }

    pub fn insert_rule(&self, rule: Rule) {
        self.rules.insert(rule.id, rule);
    }

    pub fn rule(&self, rule_id: RuleId) -> Option<Rule> {
        self.rules.get(&rule_id).map(|r| r.clone())
    }

    /// Open (not completed) trade of a rule
    pub fn trade(&self, rule_id: RuleId) -> Option<Trade> {
        self.trades
            .iter()
            .find(|t| t.rule_id == rule_id)
            .map(|t| t.clone())
    }

    pub fn completed_trades(&self, rule_id: RuleId) -> Vec<Trade> {
        self.history
            .iter()
            .filter(|t| t.rule_id == rule_id)
            .map(|t| t.clone())
            .collect()
    }

    pub fn open_trade_count(&self) -> usize {
        self.trades.len()
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn get_active_rules(&self, frequency: Frequency) -> Result<Vec<Rule>> {
        let mut rules: Vec<Rule> = self
            .rules
            .iter()
            .filter(|r| r.enabled && r.frequency == frequency)
            .map(|r| r.clone())
            .collect();
        rules.sort_by_key(|r| r.id);
        Ok(rules)
    }

    async fn get_incomplete_trades(&self) -> Result<Vec<Trade>> {
        Ok(self.trades.iter().map(|t| t.clone()).collect())
    }

    async fn get_trade_for_rule(&self, rule_id: RuleId) -> Result<Option<Trade>> {
        Ok(self.trade(rule_id))
    }

    async fn save_rule(&self, rule: &Rule) -> Result<()> {
        self.rules.insert(rule.id, rule.clone());
        Ok(())
    }

    async fn save_trade(&self, trade: &Trade) -> Result<Trade> {
        let mut saved = trade.clone();
        let id = match saved.id {
            Some(id) => id,
            None => {
                let id = self.next_trade_id.fetch_add(1, Ordering::SeqCst);
                saved.id = Some(id);
                id
            }
        };
        if saved.completed {
            self.trades.remove(&id);
            self.history.insert(id, saved.clone());
        } else {
            self.trades.insert(id, saved.clone());
        }
        debug!(trade_id = id, rule_id = saved.rule_id, "trade saved");
        Ok(saved)
    }

    async fn remove_trade(&self, trade: &Trade) -> Result<()> {
        if let Some(id) = trade.id {
            self.trades.remove(&id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rule::test_rule;

    #[tokio::test]
    async fn active_rules_filter_by_cadence_and_enabled() {
        let mut slow = test_rule(2, "MSFT");
        slow.frequency = Frequency::Slow;
        let mut disabled = test_rule(3, "TSLA");
        disabled.enabled = false;
        let store = MemoryStore::with_rules(vec![test_rule(1, "AAPL"), slow, disabled]);

        let fast = store.get_active_rules(Frequency::Fast).await.unwrap();
        assert_eq!(fast.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1]);
        let slow = store.get_active_rules(Frequency::Slow).await.unwrap();
        assert_eq!(slow.len(), 1);
    }

    #[tokio::test]
    async fn completed_trades_leave_the_open_set() {
        let rule = test_rule(1, "AAPL");
        let store = MemoryStore::with_rules(vec![rule.clone()]);

        let trade = store.save_trade(&Trade::open(&rule, "b-1")).await.unwrap();
        assert!(trade.id.is_some());
        assert_eq!(store.get_incomplete_trades().await.unwrap().len(), 1);

        let mut done = trade.clone();
        done.complete();
        store.save_trade(&done).await.unwrap();
        assert!(store.trade(1).is_none());
        assert_eq!(store.completed_trades(1).len(), 1);
    }
}
