use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Rule, RuleId};

/// Open-position record for one rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: Option<i64>,
    pub rule_id: RuleId,
    pub symbol: String,
    pub buy_order_id: Option<String>,
    pub sell_order_id: Option<String>,
    pub buy_price: Option<Decimal>,
    pub buy_date: Option<DateTime<Utc>>,
    pub sell_price: Option<Decimal>,
    pub sell_date: Option<DateTime<Utc>>,
    pub bought_shares: u64,
    pub sold_shares: u64,
    /// Stop-loss floor; only ever raised
    pub risk_value: Option<Decimal>,
    /// Take-profit ceiling
    pub profit_value: Option<Decimal>,
    /// Trailing stop armed
    pub target_reached: bool,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Trade {
    /// Trade opened by a freshly placed buy order
    pub fn open(rule: &Rule, buy_order_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            rule_id: rule.id,
            symbol: rule.symbol.clone(),
            buy_order_id: Some(buy_order_id.into()),
            sell_order_id: None,
            buy_price: None,
            buy_date: None,
            sell_price: None,
            sell_date: None,
            bought_shares: 0,
            sold_shares: 0,
            risk_value: None,
            profit_value: None,
            target_reached: false,
            completed: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Shares bought and not yet sold
    pub fn held_shares(&self) -> u64 {
        self.bought_shares.saturating_sub(self.sold_shares)
    }

    pub fn is_fully_sold(&self) -> bool {
        self.bought_shares > 0 && self.sold_shares >= self.bought_shares
    }

    /// Record the buy fill and derive the thresholds from the rule
    pub fn record_buy_fill(&mut self, rule: &Rule, price: Decimal, shares: u64, at: DateTime<Utc>) {
        self.buy_price = Some(price);
        self.buy_date = Some(at);
        self.bought_shares = shares;
        self.risk_value = Some(rule.risk_price(price));
        self.profit_value = Some(rule.profit_price(price));
        self.touch();
    }

    /// Add a (possibly partial) sell fill
    pub fn record_sell_fill(&mut self, price: Option<Decimal>, shares: u64, at: DateTime<Utc>) {
        self.sold_shares = (self.sold_shares + shares).min(self.bought_shares);
        self.sell_price = price.or(self.sell_price);
        self.sell_date = Some(at);
        self.touch();
    }

    /// Forget a sell order that never executed
    pub fn roll_back_sell(&mut self) {
        self.sell_order_id = None;
        if self.sold_shares == 0 {
            self.sell_price = None;
            self.sell_date = None;
        }
        self.touch();
    }

    pub fn complete(&mut self) {
        self.sell_order_id = None;
        self.completed = true;
        self.touch();
    }

    /// Close a position that was already sold outside this engine
    pub fn close_externally(&mut self) {
        self.sold_shares = self.bought_shares;
        self.sell_price = None;
        self.sell_date = None;
        self.complete();
    }

    /// Gain of `price` over the entry, in percent
    pub fn gain_pct(&self, price: Decimal) -> Option<Decimal> {
        match self.buy_price {
            Some(buy) if buy > Decimal::ZERO => {
                Some((price - buy) / buy * Decimal::ONE_HUNDRED)
            }
            _ => None,
        }
    }

    /// Raise the risk floor to `candidate` if it is higher; returns whether it moved
    pub fn raise_risk_floor(&mut self, candidate: Decimal) -> bool {
        match self.risk_value {
            Some(current) if candidate <= current => false,
            _ => {
                self.risk_value = Some(candidate);
                self.touch();
                true
            }
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Where a rule stands, lifted out of the nullable trade record
#[derive(Debug, Clone, PartialEq)]
pub enum Position {
    /// No trade; looking to buy
    Flat,
    /// Buy order placed, no fill recorded yet
    EntryPending(Trade),
    /// Holding shares with nothing outstanding
    Long(Trade),
    /// Sell order outstanding
    ExitPending(Trade),
}

impl Position {
    pub fn from_trade(trade: Option<Trade>) -> Self {
        match trade {
            None => Position::Flat,
            Some(t) if t.sell_order_id.is_some() => Position::ExitPending(t),
            Some(t) if t.buy_price.is_none() => Position::EntryPending(t),
            Some(t) => Position::Long(t),
        }
    }

    pub fn trade(&self) -> Option<&Trade> {
        match self {
            Position::Flat => None,
            Position::EntryPending(t) | Position::Long(t) | Position::ExitPending(t) => Some(t),
        }
    }

    pub fn into_trade(self) -> Option<Trade> {
        match self {
            Position::Flat => None,
            Position::EntryPending(t) | Position::Long(t) | Position::ExitPending(t) => Some(t),
        }
    }

    /// Holding shares (a sell may be outstanding)
    pub fn is_holding(&self) -> bool {
        matches!(self, Position::Long(_) | Position::ExitPending(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Position::Flat => "flat",
            Position::EntryPending(_) => "entry_pending",
            Position::Long(_) => "long",
            Position::ExitPending(_) => "exit_pending",
        }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rule::test_rule;
    use rust_decimal_macros::dec;

    #[test]
    fn test_position_from_trade() {
        let rule = test_rule(1, "AAPL");
        assert_eq!(Position::from_trade(None), Position::Flat);

        let mut trade = Trade::open(&rule, "b-1");
        assert!(matches!(
            Position::from_trade(Some(trade.clone())),
            Position::EntryPending(_)
        ));

        trade.record_buy_fill(&rule, dec!(100), 100, Utc::now());
        assert!(matches!(
            Position::from_trade(Some(trade.clone())),
            Position::Long(_)
        ));

        trade.sell_order_id = Some("s-1".to_string());
        assert!(matches!(
            Position::from_trade(Some(trade)),
            Position::ExitPending(_)
        ));
    }

    #[test]
    fn test_risk_floor_never_lowers() {
        let rule = test_rule(1, "AAPL");
        let mut trade = Trade::open(&rule, "b-1");
        trade.record_buy_fill(&rule, dec!(100), 10, Utc::now());
        assert_eq!(trade.risk_value, Some(dec!(98)));

        assert!(trade.raise_risk_floor(dec!(99)));
        assert!(!trade.raise_risk_floor(dec!(97)));
        assert!(!trade.raise_risk_floor(dec!(99)));
        assert_eq!(trade.risk_value, Some(dec!(99)));
    }

    #[test]
    fn test_partial_sells_accumulate() {
        let rule = test_rule(1, "AAPL");
        let mut trade = Trade::open(&rule, "b-1");
        trade.record_buy_fill(&rule, dec!(100), 100, Utc::now());

        trade.record_sell_fill(Some(dec!(101)), 40, Utc::now());
        assert_eq!(trade.held_shares(), 60);
        assert!(!trade.is_fully_sold());

        trade.record_sell_fill(Some(dec!(102)), 60, Utc::now());
        assert!(trade.is_fully_sold());
        assert_eq!(trade.sell_price, Some(dec!(102)));
    }

    #[test]
    fn test_gain_pct() {
        let rule = test_rule(1, "AAPL");
        let mut trade = Trade::open(&rule, "b-1");
        assert_eq!(trade.gain_pct(dec!(110)), None);
        trade.record_buy_fill(&rule, dec!(100), 10, Utc::now());
        assert_eq!(trade.gain_pct(dec!(110)), Some(dec!(10)));
    }
}
