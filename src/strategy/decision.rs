//! Buy / sell / liquidation policy.
//!
//! Priority, first match wins:
//! 1. forced liquidation (kill switch, or closing window for intraday rules)
//! 2. entry
//! 3. exit (risk floor, profit ceiling, exit predicate)
//! 4. trailing-stop tightening

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::ExecutionConfig;
use crate::domain::{rule, OrderSide, Rule};
use crate::strategy::context::DecisionContext;

/// Why an order is placed; logged and sent with notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    EntryStrategy,
    ForcedLiquidation,
    RiskReached,
    ProfitReached,
    ExitStrategy,
}

impl Reason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::EntryStrategy => "entry strategy",
            Reason::ForcedLiquidation => "forced liquidation",
            Reason::RiskReached => "risk reached",
            Reason::ProfitReached => "profit reached",
            Reason::ExitStrategy => "exit strategy",
        }
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderIntent {
    pub side: OrderSide,
    pub shares: u64,
    /// Last price; the executor derives the limit from it
    pub price: Decimal,
    pub reason: Reason,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrailingUpdate {
    pub target_reached: bool,
    pub risk_value: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Decision {
    pub intent: Option<OrderIntent>,
    pub trailing: Option<TrailingUpdate>,
}

impl Decision {
    fn none() -> Self {
        Self::default()
    }

    fn order(side: OrderSide, ctx: &DecisionContext, reason: Reason) -> Self {
        Self {
            intent: Some(OrderIntent {
                side,
                shares: ctx.shares,
                price: ctx.price,
                reason,
            }),
            trailing: None,
        }
    }
}

/// Limit-price policy: buy a little above market, sell a little below
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricePolicy {
    pub buy_premium_pct: Decimal,
    pub sell_discount_pct: Decimal,
    pub closing_window_secs: i64,
}

impl Default for PricePolicy {
    fn default() -> Self {
        Self::from(&ExecutionConfig::default())
    }
}

impl From<&ExecutionConfig> for PricePolicy {
    fn from(config: &ExecutionConfig) -> Self {
        Self {
            buy_premium_pct: config.buy_premium_pct,
            sell_discount_pct: config.sell_discount_pct,
            closing_window_secs: config.closing_window_secs,
        }
    }
}

impl PricePolicy {
    /// Limit price for `side`, rounded to cents
    pub fn limit_price(&self, side: OrderSide, price: Decimal) -> Decimal {
        let adjusted = match side {
            OrderSide::Buy => rule::above(price, self.buy_premium_pct),
            OrderSide::Sell => rule::below(price, self.sell_discount_pct),
        };
        adjusted.round_dp(2)
    }
}

pub fn decide(
    rule: &Rule,
    ctx: &DecisionContext,
    kill_switch: bool,
    policy: &PricePolicy,
) -> Decision {
    let closing = ctx.market.is_closing(policy.closing_window_secs) && !rule.hold_overnight;

    if ctx.holding {
        if kill_switch || closing {
            return Decision::order(OrderSide::Sell, ctx, Reason::ForcedLiquidation);
        }
        if ctx.risk_reached {
            return Decision::order(OrderSide::Sell, ctx, Reason::RiskReached);
        }
        if ctx.profit_reached {
            return Decision::order(OrderSide::Sell, ctx, Reason::ProfitReached);
        }
        if ctx.exit_signal {
            return Decision::order(OrderSide::Sell, ctx, Reason::ExitStrategy);
        }
        return Decision {
            intent: None,
            trailing: trailing_update(rule, ctx),
        };
    }

    if ctx.entry_signal && ctx.market.is_open && !kill_switch && !closing && ctx.shares > 0 {
        return Decision::order(OrderSide::Buy, ctx, Reason::EntryStrategy);
    }

    Decision::none()
}

/// Ratchet the risk floor upward as the position gains
pub fn trailing_update(rule: &Rule, ctx: &DecisionContext) -> Option<TrailingUpdate> {
    if !rule.trailing.enabled || ctx.buy_price.is_none() {
        return None;
    }
    let gain = ctx.gain_pct?;

    let armed = ctx.target_reached || gain >= rule.trailing.target_pct;
    let candidate = if armed {
        Some(rule::below(ctx.price, rule.trailing.risk_pct_after_target))
    } else if gain > rule.risk_pct / Decimal::TWO {
        Some(rule::below(ctx.price, rule.risk_pct))
    } else {
        None
    };

    let raised = candidate.filter(|c| ctx.risk_value.map(|r| *c > r).unwrap_or(true));

    if raised.is_none() && armed == ctx.target_reached {
        return None;
    }
    Some(TrailingUpdate {
        target_reached: armed,
        risk_value: raised,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rule::test_rule;
    use crate::domain::MarketHours;
    use rust_decimal_macros::dec;

    fn holding_ctx(price: Decimal) -> DecisionContext {
        DecisionContext {
            rule_id: 1,
            symbol: "AAPL".to_string(),
            price,
            shares: 100,
            holding: true,
            buy_price: Some(dec!(100)),
            risk_value: Some(dec!(98)),
            profit_value: Some(dec!(105)),
            target_reached: false,
            gain_pct: Some((price - dec!(100)) / dec!(100) * dec!(100)),
            market: MarketHours::open(3600),
            entry_signal: false,
            exit_signal: false,
            risk_reached: price <= dec!(98),
            profit_reached: price >= dec!(105),
        }
    }

    fn flat_ctx(entry: bool) -> DecisionContext {
        DecisionContext {
            holding: false,
            buy_price: None,
            risk_value: None,
            profit_value: None,
            gain_pct: None,
            entry_signal: entry,
            risk_reached: false,
            profit_reached: false,
            ..holding_ctx(dec!(100))
        }
    }

    #[test]
    fn risk_floor_breach_sells_even_without_exit_signal() {
        let rule = test_rule(1, "AAPL");
        let d = decide(&rule, &holding_ctx(dec!(97.5)), false, &PricePolicy::default());
        let intent = d.intent.unwrap();
        assert_eq!(intent.side, OrderSide::Sell);
        assert_eq!(intent.reason, Reason::RiskReached);
        assert_eq!(intent.reason.as_str(), "risk reached");
    }

    #[test]
    fn closing_window_forces_liquidation() {
        let rule = test_rule(1, "AAPL");
        let mut ctx = holding_ctx(dec!(101));
        ctx.market = MarketHours::open(25);
        ctx.exit_signal = false;
        let d = decide(&rule, &ctx, false, &PricePolicy::default());
        let intent = d.intent.unwrap();
        assert_eq!(intent.side, OrderSide::Sell);
        assert_eq!(intent.reason.as_str(), "forced liquidation");
    }

    #[test]
    fn overnight_rules_are_not_liquidated_at_close() {
        let mut rule = test_rule(1, "AAPL");
        rule.hold_overnight = true;
        let mut ctx = holding_ctx(dec!(101));
        ctx.market = MarketHours::open(25);
        assert!(decide(&rule, &ctx, false, &PricePolicy::default())
            .intent
            .is_none());
    }

    #[test]
    fn kill_switch_liquidates_before_anything_else() {
        let rule = test_rule(1, "AAPL");
        let d = decide(&rule, &holding_ctx(dec!(97)), true, &PricePolicy::default());
        assert_eq!(d.intent.unwrap().reason, Reason::ForcedLiquidation);

        // and never enters
        assert!(decide(&rule, &flat_ctx(true), true, &PricePolicy::default())
            .intent
            .is_none());
    }

    #[test]
    fn entry_requires_open_market() {
        let rule = test_rule(1, "AAPL");
        let d = decide(&rule, &flat_ctx(true), false, &PricePolicy::default());
        let intent = d.intent.unwrap();
        assert_eq!(intent.side, OrderSide::Buy);
        assert_eq!(intent.shares, 100);

        let mut ctx = flat_ctx(true);
        ctx.market = MarketHours::closed();
        assert!(decide(&rule, &ctx, false, &PricePolicy::default())
            .intent
            .is_none());
    }

    #[test]
    fn profit_then_predicate_tags() {
        let rule = test_rule(1, "AAPL");
        let d = decide(&rule, &holding_ctx(dec!(106)), false, &PricePolicy::default());
        assert_eq!(d.intent.unwrap().reason, Reason::ProfitReached);

        let mut ctx = holding_ctx(dec!(101));
        ctx.exit_signal = true;
        let d = decide(&rule, &ctx, false, &PricePolicy::default());
        assert_eq!(d.intent.unwrap().reason, Reason::ExitStrategy);
    }

    #[test]
    fn trailing_stop_arms_and_ratchets() {
        let mut rule = test_rule(1, "AAPL");
        rule.profit_pct = dec!(50);
        rule.trailing.enabled = true;
        rule.trailing.target_pct = dec!(3);
        rule.trailing.risk_pct_after_target = dec!(1);

        // +1.5% > risk/2 (1%): early raise using base risk 2% -> 101.5 * 0.98 = 99.47
        let mut ctx = holding_ctx(dec!(101.5));
        ctx.profit_reached = false;
        let update = trailing_update(&rule, &ctx).unwrap();
        assert!(!update.target_reached);
        assert_eq!(update.risk_value, Some(dec!(99.47)));

        // +4% arms; floor = 104 * 0.99 = 102.96
        let ctx = holding_ctx(dec!(104));
        let update = trailing_update(&rule, &ctx).unwrap();
        assert!(update.target_reached);
        assert_eq!(update.risk_value, Some(dec!(102.96)));
    }

    #[test]
    fn trailing_never_lowers_the_floor() {
        let mut rule = test_rule(1, "AAPL");
        rule.trailing.enabled = true;
        rule.trailing.target_pct = dec!(3);
        rule.trailing.risk_pct_after_target = dec!(1);

        let mut ctx = holding_ctx(dec!(103.5));
        ctx.target_reached = true;
        ctx.risk_value = Some(dec!(103));
        // 103.5 * 0.99 = 102.465 < 103: nothing to do
        assert_eq!(trailing_update(&rule, &ctx), None);
    }

    #[test]
    fn limit_prices_bias_toward_fill() {
        let policy = PricePolicy::default();
        assert_eq!(policy.limit_price(OrderSide::Buy, dec!(100)), dec!(100.50));
        assert_eq!(policy.limit_price(OrderSide::Sell, dec!(100)), dec!(99.50));
    }
}
