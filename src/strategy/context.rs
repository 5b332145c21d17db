//! Decision context: everything the decision engine needs about one rule
//! for one tick, built from the reconciled position and the latest quote.

use rust_decimal::Decimal;

use crate::domain::{MarketHours, MarketSnapshot, Position, Quote, Rule, RuleId};
use crate::error::{Result, RulebotError};
use crate::strategy::expr::{Metadata, PredicateCache, PredicateKind};

#[derive(Debug, Clone, PartialEq)]
pub struct DecisionContext {
    pub rule_id: RuleId,
    pub symbol: String,
    pub price: Decimal,
    /// Shares the next order would trade
    pub shares: u64,
    pub holding: bool,
    pub buy_price: Option<Decimal>,
    pub risk_value: Option<Decimal>,
    pub profit_value: Option<Decimal>,
    pub target_reached: bool,
    pub gain_pct: Option<Decimal>,
    pub market: MarketHours,
    pub entry_signal: bool,
    pub exit_signal: bool,
    pub risk_reached: bool,
    pub profit_reached: bool,
}

/// Shares to trade: what is still held, or the rule's entry size when flat
pub fn shares_to_trade(rule: &Rule, position: &Position) -> u64 {
    match position.trade() {
        Some(trade) if trade.sold_shares > 0 => trade.held_shares(),
        Some(trade) => trade.bought_shares,
        None => rule.shares,
    }
}

/// Metadata record the rule predicates are evaluated against
pub fn metadata(
    rule: &Rule,
    position: &Position,
    price: Decimal,
    snapshot: &MarketSnapshot,
) -> Metadata {
    let trade = position.trade();
    Metadata {
        price,
        shares: shares_to_trade(rule, position),
        bought_shares: trade.map(|t| t.bought_shares).unwrap_or(0),
        sold_shares: trade.map(|t| t.sold_shares).unwrap_or(0),
        buy_price: trade.and_then(|t| t.buy_price),
        risk_value: trade.and_then(|t| t.risk_value),
        profit_value: trade.and_then(|t| t.profit_value),
        gain_pct: trade.and_then(|t| t.gain_pct(price)),
        risk_pct: rule.risk_pct,
        profit_pct: rule.profit_pct,
        cash: snapshot.account.cash,
        equity: snapshot.account.equity,
        buying_power: snapshot.account.buying_power,
        seconds_to_close: snapshot.hours.seconds_to_close,
        market_open: snapshot.hours.is_open,
        holding: position.is_holding(),
        target_reached: trade.map(|t| t.target_reached).unwrap_or(false),
    }
}

pub fn build_context(
    rule: &Rule,
    position: &Position,
    quote: &Quote,
    snapshot: &MarketSnapshot,
    predicates: &PredicateCache,
) -> Result<DecisionContext> {
    if !rule.has_strategy() {
        return Err(RulebotError::NoStrategy { rule_id: rule.id });
    }

    let price = quote.price;
    let meta = metadata(rule, position, price, snapshot);

    let entry_signal = match rule.entry.as_deref() {
        Some(src) => predicates
            .get(rule.id, PredicateKind::Entry, src)?
            .evaluate(&meta),
        None => false,
    };
    let exit_signal = match rule.exit.as_deref() {
        Some(src) => predicates
            .get(rule.id, PredicateKind::Exit, src)?
            .evaluate(&meta),
        None => false,
    };

    let holding = position.is_holding();
    let risk_reached = holding && meta.risk_value.map(|r| price <= r).unwrap_or(false);
    let profit_reached = holding && meta.profit_value.map(|p| price >= p).unwrap_or(false);

    Ok(DecisionContext {
        rule_id: rule.id,
        symbol: rule.symbol.clone(),
        price,
        shares: meta.shares,
        holding,
        buy_price: meta.buy_price,
        risk_value: meta.risk_value,
        profit_value: meta.profit_value,
        target_reached: meta.target_reached,
        gain_pct: meta.gain_pct,
        market: snapshot.hours,
        entry_signal,
        exit_signal,
        risk_reached,
        profit_reached,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rule::test_rule;
    use crate::domain::{AccountSnapshot, Trade};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn snapshot() -> MarketSnapshot {
        MarketSnapshot {
            hours: MarketHours::open(3600),
            account: AccountSnapshot {
                cash: dec!(10000),
                equity: dec!(12000),
                buying_power: dec!(20000),
            },
        }
    }

    fn long_position(rule: &Rule, buy: Decimal, bought: u64, sold: u64) -> Position {
        let mut trade = Trade::open(rule, "b-1");
        trade.record_buy_fill(rule, buy, bought, Utc::now());
        trade.sold_shares = sold;
        Position::Long(trade)
    }

    #[test]
    fn share_count_follows_position() {
        let rule = test_rule(1, "AAPL");
        assert_eq!(shares_to_trade(&rule, &Position::Flat), 100);
        assert_eq!(shares_to_trade(&rule, &long_position(&rule, dec!(10), 60, 0)), 60);
        assert_eq!(shares_to_trade(&rule, &long_position(&rule, dec!(10), 60, 25)), 35);
    }

    #[test]
    fn no_strategy_is_a_configuration_error() {
        let mut rule = test_rule(3, "AAPL");
        rule.entry = None;
        rule.exit = None;
        let cache = PredicateCache::new();
        let err = build_context(
            &rule,
            &Position::Flat,
            &Quote::new("AAPL", dec!(10)),
            &snapshot(),
            &cache,
        )
        .unwrap_err();
        assert!(matches!(err, RulebotError::NoStrategy { rule_id: 3 }));
    }

    #[test]
    fn predicates_see_account_fields() {
        let mut rule = test_rule(1, "AAPL");
        rule.entry = Some("price < 50 and cash >= 10000".to_string());
        rule.exit = Some("gain_pct > 3".to_string());
        let cache = PredicateCache::new();

        let ctx = build_context(
            &rule,
            &Position::Flat,
            &Quote::new("AAPL", dec!(49)),
            &snapshot(),
            &cache,
        )
        .unwrap();
        assert!(ctx.entry_signal);
        assert!(!ctx.exit_signal);
        assert!(!ctx.holding);
        assert!(!ctx.risk_reached);
    }

    #[test]
    fn thresholds_crossed() {
        let rule = test_rule(1, "AAPL");
        let cache = PredicateCache::new();
        let position = long_position(&rule, dec!(100), 100, 0);

        let ctx = build_context(&rule, &position, &Quote::new("AAPL", dec!(97)), &snapshot(), &cache)
            .unwrap();
        assert!(ctx.risk_reached);
        assert!(!ctx.profit_reached);

        let ctx = build_context(&rule, &position, &Quote::new("AAPL", dec!(105)), &snapshot(), &cache)
            .unwrap();
        assert!(!ctx.risk_reached);
        assert!(ctx.profit_reached);
        assert_eq!(ctx.gain_pct, Some(dec!(5)));
    }
}
