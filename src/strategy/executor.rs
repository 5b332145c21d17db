use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::adapters::notifier::{Notification, NotificationSink};
use crate::domain::{Order, OrderRequest, OrderSide, Position, Rule, Trade};
use crate::error::{RejectionKind, Result, RulebotError};
use crate::exchange::BrokerClient;
use crate::persistence::RuleStore;
use crate::strategy::decision::{PricePolicy, Reason};
use crate::strategy::guard::OrderGuard;

/// Store writes tried before an accepted order is cancelled
const SAVE_ATTEMPTS: u32 = 2;

/// Result of one placement attempt
#[derive(Debug, Clone, PartialEq)]
pub enum PlacementOutcome {
    /// Order accepted; the position now carries its id
    Placed { order: Order, position: Position },
    /// Nothing submitted (placement in flight, or zero shares)
    Skipped,
    /// Gateway rejection handled locally
    Recovered {
        kind: RejectionKind,
        position: Position,
        rule_disabled: bool,
    },
}

/// Order executor: the only path from a decision to the gateway
#[derive(Clone)]
pub struct OrderExecutor {
    broker: Arc<dyn BrokerClient>,
    store: Arc<dyn RuleStore>,
    guard: OrderGuard,
    policy: PricePolicy,
    notifications: NotificationSink,
}

impl OrderExecutor {
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        store: Arc<dyn RuleStore>,
        guard: OrderGuard,
        policy: PricePolicy,
        notifications: NotificationSink,
    ) -> Self {
        Self {
            broker,
            store,
            guard,
            policy,
            notifications,
        }
    }

    pub fn guard(&self) -> &OrderGuard {
        &self.guard
    }

    /// Submit a limit order for `rule` and record it on the trade.
    ///
    /// At most one placement per rule runs at a time; a concurrent call
    /// returns `Skipped` without touching the gateway.
    pub async fn place_order(
        &self,
        rule: &mut Rule,
        side: OrderSide,
        price: Decimal,
        shares: u64,
        position: Position,
        reason: Reason,
    ) -> Result<PlacementOutcome> {
        if shares == 0 {
            debug!(rule_id = rule.id, %side, "zero shares; not submitting");
            return Ok(PlacementOutcome::Skipped);
        }
        if side == OrderSide::Sell && position.trade().is_none() {
            return Err(RulebotError::Internal(format!(
                "rule {} asked to sell without a trade",
                rule.id
            )));
        }

        let Some(_token) = self.guard.try_acquire(rule.id, reason.as_str()) else {
            debug!(rule_id = rule.id, %side, "placement already in flight; skipping");
            return Ok(PlacementOutcome::Skipped);
        };

        let limit_price = self.policy.limit_price(side, price);
        let request = OrderRequest::limit(&rule.symbol, side, shares, limit_price);

        info!(
            rule_id = rule.id,
            symbol = %rule.symbol,
            %side,
            shares,
            %price,
            %limit_price,
            %reason,
            client_order_id = %request.client_order_id,
            "submitting order"
        );

        let order = match self.broker.place_order(&request).await {
            Ok(order) => order,
            Err(e) => return self.recover(rule, position, e).await,
        };

        let trade = match (side, position.into_trade()) {
            (OrderSide::Buy, None) => Trade::open(rule, order.id.clone()),
            (OrderSide::Buy, Some(mut trade)) => {
                trade.buy_order_id = Some(order.id.clone());
                trade
            }
            (OrderSide::Sell, Some(mut trade)) => {
                trade.sell_order_id = Some(order.id.clone());
                trade
            }
            (OrderSide::Sell, None) => {
                return Err(RulebotError::Internal("sell placed without a trade".to_string()))
            }
        };

        let trade = self.record_accepted(rule, &order, &trade).await?;

        self.notifications.emit(Notification::OrderPlaced {
            rule_id: rule.id,
            symbol: rule.symbol.clone(),
            side,
            shares,
            limit_price,
            reason: reason.to_string(),
            order_id: order.id.clone(),
        });

        Ok(PlacementOutcome::Placed {
            order,
            position: Position::from_trade(Some(trade)),
        })
    }

    /// Persist the trade carrying a just-accepted order.
    ///
    /// When the store keeps failing, the order is cancelled at the broker
    /// before the error propagates: a live order must always be reachable
    /// from a trade record.
    async fn record_accepted(&self, rule: &Rule, order: &Order, trade: &Trade) -> Result<Trade> {
        let mut attempt = 1;
        let err = loop {
            match self.store.save_trade(trade).await {
                Ok(saved) => return Ok(saved),
                Err(e) if attempt < SAVE_ATTEMPTS => {
                    warn!(
                        rule_id = rule.id,
                        order_id = %order.id,
                        attempt,
                        error = %e,
                        "trade save failed; retrying"
                    );
                    attempt += 1;
                }
                Err(e) => break e,
            }
        };

        let message = match self.broker.cancel_order(&order.id).await {
            Ok(true) => {
                error!(
                    rule_id = rule.id,
                    order_id = %order.id,
                    error = %err,
                    "trade not saved; accepted order cancelled"
                );
                format!("order {} cancelled: trade not saved ({})", order.id, err)
            }
            Ok(false) => {
                error!(
                    rule_id = rule.id,
                    order_id = %order.id,
                    error = %err,
                    "trade not saved and broker refused the cancel"
                );
                format!("order {} is live but untracked: {}", order.id, err)
            }
            Err(cancel_err) => {
                error!(
                    rule_id = rule.id,
                    order_id = %order.id,
                    error = %err,
                    cancel_error = %cancel_err,
                    "trade not saved and cancel failed"
                );
                format!("order {} is live but untracked: {}", order.id, err)
            }
        };
        self.notifications.emit(Notification::Error {
            rule_id: Some(rule.id),
            message,
        });
        Err(err)
    }

    async fn recover(
        &self,
        rule: &mut Rule,
        position: Position,
        err: RulebotError,
    ) -> Result<PlacementOutcome> {
        match err.rejection() {
            Some(RejectionKind::InsufficientShares) => {
                self.recover_insufficient_shares(rule, position, err).await
            }
            Some(RejectionKind::NotTradable) => {
                warn!(rule_id = rule.id, symbol = %rule.symbol, error = %err, "symbol not tradable");
                self.disable_rule(rule, "symbol not tradable").await?;
                Ok(PlacementOutcome::Recovered {
                    kind: RejectionKind::NotTradable,
                    position,
                    rule_disabled: true,
                })
            }
            _ => {
                error!(rule_id = rule.id, error = %err, "order submission failed");
                Err(err)
            }
        }
    }

    /// The broker holds no shares: the position was closed elsewhere
    async fn recover_insufficient_shares(
        &self,
        rule: &mut Rule,
        position: Position,
        err: RulebotError,
    ) -> Result<PlacementOutcome> {
        let held = self.broker.get_position_quantity(&rule.symbol).await?;
        if held > Decimal::ZERO {
            warn!(
                rule_id = rule.id,
                symbol = %rule.symbol,
                %held,
                "insufficient shares but broker still holds a position"
            );
            return Err(err);
        }

        let Some(mut trade) = position.into_trade() else {
            return Err(err);
        };
        warn!(
            rule_id = rule.id,
            symbol = %rule.symbol,
            bought = trade.bought_shares,
            "position already closed at broker; completing trade"
        );
        trade.close_externally();
        self.store.save_trade(&trade).await?;

        let rule_disabled = !rule.reenters();
        if rule_disabled {
            self.disable_rule(rule, "position closed externally").await?;
        }
        Ok(PlacementOutcome::Recovered {
            kind: RejectionKind::InsufficientShares,
            position: Position::Flat,
            rule_disabled,
        })
    }

    async fn disable_rule(&self, rule: &mut Rule, reason: &str) -> Result<()> {
        rule.disable();
        self.store.save_rule(rule).await?;
        info!(rule_id = rule.id, reason, "rule disabled");
        self.notifications.emit(Notification::RuleDisabled {
            rule_id: rule.id,
            symbol: rule.symbol.clone(),
            reason: reason.to_string(),
        });
        Ok(())
    }
}
