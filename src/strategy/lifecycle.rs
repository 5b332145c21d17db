//! Trade lifecycle state machine.
//!
//! Each tick, a rule's last order is reconciled against the broker before
//! any decision is made. Pending orders never survive a tick: they are either
//! filled (fully or partially) or cancelled here, so after reconciliation a
//! rule is always `Flat` or `Long`.
//!
//! ```text
//! Flat ──buy placed──▶ EntryPending ──fill──▶ Long ──sell placed──▶ ExitPending
//!   ▲                      │ no fill                                  │ │
//!   └──────cancel──────────┘                    ◀── no fill / partial ┘ │
//!   ◀──────────────────────────── fully sold ───────────────────────────┘
//! ```

use tracing::{error, info, warn};

use crate::adapters::notifier::{Notification, NotificationSink};
use crate::domain::{Order, Position, Rule, Trade};
use crate::error::{Result, RulebotError};
use crate::exchange::BrokerClient;
use crate::persistence::RuleStore;

/// Position after reconciliation
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub position: Position,
    /// The rule was disabled; nothing else should run for it this tick
    pub skip: bool,
}

impl Reconciled {
    fn proceed(position: Position) -> Self {
        Self {
            position,
            skip: false,
        }
    }
}

pub struct TradeLifecycle<'a> {
    broker: &'a dyn BrokerClient,
    store: &'a dyn RuleStore,
    notifications: &'a NotificationSink,
}

impl<'a> TradeLifecycle<'a> {
    pub fn new(
        broker: &'a dyn BrokerClient,
        store: &'a dyn RuleStore,
        notifications: &'a NotificationSink,
    ) -> Self {
        Self {
            broker,
            store,
            notifications,
        }
    }

    pub async fn reconcile(&self, rule: &mut Rule, position: Position) -> Result<Reconciled> {
        match position {
            Position::Flat | Position::Long(_) => Ok(Reconciled::proceed(position)),
            Position::EntryPending(trade) => self.reconcile_entry(rule, trade).await,
            Position::ExitPending(trade) => self.reconcile_exit(rule, trade).await,
        }
    }

    async fn reconcile_entry(&self, rule: &Rule, mut trade: Trade) -> Result<Reconciled> {
        let Some(order_id) = trade.buy_order_id.clone() else {
            warn!(rule_id = rule.id, "trade without any order; discarding");
            self.store.remove_trade(&trade).await?;
            return Ok(Reconciled::proceed(Position::Flat));
        };

        let order = self.fetch_order(rule, &order_id).await?;
        let order = self.settle(rule, order).await?;

        if !order.has_fill() {
            info!(
                rule_id = rule.id,
                order_id = %order.id,
                status = %order.status,
                "buy never filled; dropping trade"
            );
            self.store.remove_trade(&trade).await?;
            return Ok(Reconciled::proceed(Position::Flat));
        }

        let price = order.fill_price().ok_or_else(|| {
            RulebotError::Internal(format!("order {} has fills but no price", order.id))
        })?;
        trade.record_buy_fill(rule, price, order.filled_shares, order.updated_at);
        let trade = self.store.save_trade(&trade).await?;

        info!(
            rule_id = rule.id,
            symbol = %rule.symbol,
            order_id = %order.id,
            shares = trade.bought_shares,
            requested = order.shares,
            %price,
            risk = ?trade.risk_value,
            profit = ?trade.profit_value,
            "buy filled"
        );
        Ok(Reconciled::proceed(Position::Long(trade)))
    }

    async fn reconcile_exit(&self, rule: &mut Rule, mut trade: Trade) -> Result<Reconciled> {
        let Some(order_id) = trade.sell_order_id.clone() else {
            return Ok(Reconciled::proceed(Position::from_trade(Some(trade))));
        };

        let order = self.fetch_order(rule, &order_id).await?;
        let order = self.settle(rule, order).await?;

        if !order.has_fill() {
            info!(
                rule_id = rule.id,
                order_id = %order.id,
                status = %order.status,
                "sell never filled; still holding"
            );
            trade.roll_back_sell();
            let trade = self.store.save_trade(&trade).await?;
            return Ok(Reconciled::proceed(Position::Long(trade)));
        }

        trade.record_sell_fill(
            order.fill_price(),
            order.filled_shares,
            order.updated_at,
        );

        if !trade.is_fully_sold() {
            info!(
                rule_id = rule.id,
                order_id = %order.id,
                sold = trade.sold_shares,
                bought = trade.bought_shares,
                "partial sell; remaining shares retried next tick"
            );
            trade.sell_order_id = None;
            let trade = self.store.save_trade(&trade).await?;
            return Ok(Reconciled::proceed(Position::Long(trade)));
        }

        trade.complete();
        let trade = self.store.save_trade(&trade).await?;
        info!(
            rule_id = rule.id,
            symbol = %rule.symbol,
            buy = ?trade.buy_price,
            sell = ?trade.sell_price,
            shares = trade.bought_shares,
            "position closed"
        );
        self.notifications.emit(Notification::PositionClosed {
            rule_id: rule.id,
            symbol: rule.symbol.clone(),
            entry_price: trade.buy_price,
            exit_price: trade.sell_price,
            shares: trade.bought_shares,
        });

        if rule.reenters() {
            return Ok(Reconciled::proceed(Position::Flat));
        }

        rule.disable();
        self.store.save_rule(rule).await?;
        info!(rule_id = rule.id, "one-shot rule completed; disabled");
        self.notifications.emit(Notification::RuleDisabled {
            rule_id: rule.id,
            symbol: rule.symbol.clone(),
            reason: "strategy completed".to_string(),
        });
        Ok(Reconciled {
            position: Position::Flat,
            skip: true,
        })
    }

    async fn fetch_order(&self, rule: &Rule, order_id: &str) -> Result<Order> {
        match self.broker.get_order(order_id).await? {
            Some(order) => Ok(order),
            None => {
                error!(rule_id = rule.id, order_id, "order referenced by trade not found");
                Err(RulebotError::OrderNotFound {
                    rule_id: rule.id,
                    order_id: order_id.to_string(),
                })
            }
        }
    }

    /// Cancel a still-working order and return its final state.
    ///
    /// Shares may execute between the status read and the cancel, so the order
    /// is read again after a successful cancel.
    async fn settle(&self, rule: &Rule, order: Order) -> Result<Order> {
        if !order.status.is_active() {
            return Ok(order);
        }

        let cancelled = self.broker.cancel_order(&order.id).await?;
        if !cancelled {
            error!(
                rule_id = rule.id,
                order_id = %order.id,
                filled = order.filled_shares,
                "cancel not accepted"
            );
            return Err(if order.has_fill() {
                RulebotError::PartialCancelFailed { order_id: order.id }
            } else {
                RulebotError::CancelFailed { order_id: order.id }
            });
        }

        info!(
            rule_id = rule.id,
            order_id = %order.id,
            side = %order.side,
            filled = order.filled_shares,
            requested = order.shares,
            "order cancelled"
        );
        self.notifications.emit(Notification::OrderCancelled {
            rule_id: rule.id,
            symbol: order.symbol.clone(),
            side: order.side,
            order_id: order.id.clone(),
        });

        let latest = self.broker.get_order(&order.id).await?;
        Ok(match latest {
            Some(latest) if latest.filled_shares >= order.filled_shares => latest,
            _ => order,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rule::test_rule;
    use crate::domain::{OrderSide, OrderStatus};
    use crate::exchange::MockBrokerClient;
    use crate::persistence::MemoryStore;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn order(id: &str, side: OrderSide, shares: u64, filled: u64, status: OrderStatus) -> Order {
        Order {
            id: id.to_string(),
            client_order_id: None,
            symbol: "AAPL".to_string(),
            side,
            shares,
            filled_shares: filled,
            avg_fill_price: if filled > 0 { Some(dec!(100)) } else { None },
            limit_price: Some(dec!(100.5)),
            status,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn missing_order_is_fatal() {
        let mut broker = MockBrokerClient::new();
        broker.expect_get_order().returning(|_| Ok(None));
        let store = MemoryStore::new();
        let sink = NotificationSink::disabled();
        let mut rule = test_rule(1, "AAPL");
        let trade = Trade::open(&rule, "gone");

        let err = TradeLifecycle::new(&broker, &store, &sink)
            .reconcile(&mut rule, Position::EntryPending(trade))
            .await
            .unwrap_err();
        assert!(matches!(err, RulebotError::OrderNotFound { .. }));
    }

    #[tokio::test]
    async fn refused_cancel_aborts_without_touching_the_trade() {
        let mut broker = MockBrokerClient::new();
        broker
            .expect_get_order()
            .returning(|id| Ok(Some(order(id, OrderSide::Buy, 100, 0, OrderStatus::Pending))));
        broker.expect_cancel_order().times(1).returning(|_| Ok(false));
        let store = MemoryStore::new();
        let sink = NotificationSink::disabled();
        let mut rule = test_rule(1, "AAPL");
        let trade = store.save_trade(&Trade::open(&rule, "b-1")).await.unwrap();

        let err = TradeLifecycle::new(&broker, &store, &sink)
            .reconcile(&mut rule, Position::EntryPending(trade.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, RulebotError::CancelFailed { .. }));
        assert_eq!(store.trade(1), Some(trade));
    }

    #[tokio::test]
    async fn partial_cancel_failure_is_reported_as_such() {
        let mut broker = MockBrokerClient::new();
        broker.expect_get_order().returning(|id| {
            Ok(Some(order(id, OrderSide::Buy, 100, 60, OrderStatus::PartiallyFilled)))
        });
        broker.expect_cancel_order().returning(|_| Ok(false));
        let store = MemoryStore::new();
        let sink = NotificationSink::disabled();
        let mut rule = test_rule(1, "AAPL");
        let pending = Position::EntryPending(Trade::open(&rule, "b-1"));

        let err = TradeLifecycle::new(&broker, &store, &sink)
            .reconcile(&mut rule, pending)
            .await
            .unwrap_err();
        assert!(matches!(err, RulebotError::PartialCancelFailed { .. }));
    }

    #[tokio::test]
    async fn fills_that_land_during_cancel_are_kept() {
        let mut broker = MockBrokerClient::new();
        let mut reads = 0;
        broker.expect_get_order().returning(move |id| {
            reads += 1;
            Ok(Some(if reads == 1 {
                order(id, OrderSide::Buy, 100, 0, OrderStatus::Pending)
            } else {
                order(id, OrderSide::Buy, 100, 30, OrderStatus::Cancelled)
            }))
        });
        broker.expect_cancel_order().returning(|_| Ok(true));
        let store = MemoryStore::new();
        let sink = NotificationSink::disabled();
        let mut rule = test_rule(1, "AAPL");
        let pending = Position::EntryPending(Trade::open(&rule, "b-1"));

        let reconciled = TradeLifecycle::new(&broker, &store, &sink)
            .reconcile(&mut rule, pending)
            .await
            .unwrap();
        match reconciled.position {
            Position::Long(trade) => assert_eq!(trade.bought_shares, 30),
            other => panic!("expected long, got {}", other),
        }
    }

    #[tokio::test]
    async fn unfilled_sell_rolls_back_to_long() {
        let mut broker = MockBrokerClient::new();
        broker
            .expect_get_order()
            .returning(|id| Ok(Some(order(id, OrderSide::Sell, 50, 0, OrderStatus::Pending))));
        broker.expect_cancel_order().returning(|_| Ok(true));
        let store = MemoryStore::new();
        let sink = NotificationSink::disabled();
        let mut rule = test_rule(1, "AAPL");

        let mut trade = Trade::open(&rule, "b-1");
        trade.record_buy_fill(&rule, dec!(100), 50, Utc::now());
        trade.sell_order_id = Some("s-1".to_string());

        let reconciled = TradeLifecycle::new(&broker, &store, &sink)
            .reconcile(&mut rule, Position::ExitPending(trade))
            .await
            .unwrap();
        assert!(!reconciled.skip);
        match reconciled.position {
            Position::Long(trade) => {
                assert_eq!(trade.sell_order_id, None);
                assert_eq!(trade.sold_shares, 0);
                assert_eq!(trade.sell_price, None);
            }
            other => panic!("expected long, got {}", other),
        }
    }

    #[tokio::test]
    async fn flat_and_long_need_no_broker_calls() {
        let broker = MockBrokerClient::new();
        let store = MemoryStore::new();
        let sink = NotificationSink::disabled();
        let mut rule = test_rule(1, "AAPL");
        let lifecycle = TradeLifecycle::new(&broker, &store, &sink);

        let r = lifecycle.reconcile(&mut rule, Position::Flat).await.unwrap();
        assert_eq!(r.position, Position::Flat);

        let mut trade = Trade::open(&rule, "b-1");
        trade.record_buy_fill(&rule, dec!(100), 10, Utc::now());
        let r = lifecycle
            .reconcile(&mut rule, Position::Long(trade.clone()))
            .await
            .unwrap();
        assert_eq!(r.position, Position::Long(trade));
    }
}
