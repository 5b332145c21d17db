//! Rule engine: one processing pass over a batch of rules
//!
//! A pass fetches quotes and open trades once, then runs every rule
//! concurrently. Each rule reconciles its last order, evaluates its
//! predicates, and places at most one order. A failing or slow rule is
//! logged and never takes the rest of the pass down with it.

use dashmap::DashMap;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::adapters::notifier::{Notification, NotificationSink};
use crate::config::AppConfig;
use crate::coordination::KillSwitch;
use crate::domain::{
    Frequency, MarketSnapshot, OrderSide, Position, Quote, Rule, RuleId, Trade,
};
use crate::error::{Result, RulebotError};
use crate::exchange::BrokerClient;
use crate::persistence::RuleStore;
use crate::strategy::{
    build_context, decide, OrderExecutor, OrderGuard, OrderIntent, PlacementOutcome,
    PredicateCache, PricePolicy, Reason, TradeLifecycle, TrailingUpdate,
};

/// What happened to one rule in a pass
#[derive(Debug, Clone, PartialEq)]
pub enum RuleOutcome {
    /// Nothing to do this tick
    Idle,
    Placed {
        side: OrderSide,
        reason: Reason,
        order_id: String,
    },
    /// Placement already in flight, or zero shares
    Skipped,
    /// Gateway rejection handled locally
    Recovered,
    /// Rule switched off this tick
    Disabled,
    TrailingUpdated,
    Failed(String),
    TimedOut,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassReport {
    pub evaluated: usize,
    pub placed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub outcomes: Vec<(RuleId, RuleOutcome)>,
}

impl PassReport {
    pub fn outcome(&self, rule_id: RuleId) -> Option<&RuleOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| *id == rule_id)
            .map(|(_, o)| o)
    }

    fn record(&mut self, rule_id: RuleId, outcome: RuleOutcome) {
        match outcome {
            RuleOutcome::Placed { .. } => self.placed += 1,
            RuleOutcome::Failed(_) => self.failed += 1,
            RuleOutcome::TimedOut => self.timed_out += 1,
            _ => {}
        }
        self.outcomes.push((rule_id, outcome));
    }
}

#[derive(Clone)]
pub struct RuleEngine {
    broker: Arc<dyn BrokerClient>,
    store: Arc<dyn RuleStore>,
    executor: OrderExecutor,
    /// Rules currently inside a pass; keeps overlapping ticks apart
    processing: OrderGuard,
    predicates: Arc<PredicateCache>,
    notifications: NotificationSink,
    kill_switch: KillSwitch,
    policy: PricePolicy,
    rule_timeout: Duration,
    /// Last configuration error reported per rule
    misconfigured: Arc<DashMap<RuleId, String>>,
}

impl RuleEngine {
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        store: Arc<dyn RuleStore>,
        config: &AppConfig,
        notifications: NotificationSink,
        kill_switch: KillSwitch,
    ) -> Self {
        let policy = PricePolicy::from(&config.execution);
        let executor = OrderExecutor::new(
            broker.clone(),
            store.clone(),
            OrderGuard::new(),
            policy,
            notifications.clone(),
        );
        Self {
            broker,
            store,
            executor,
            processing: OrderGuard::new(),
            predicates: Arc::new(PredicateCache::new()),
            notifications,
            kill_switch,
            policy,
            rule_timeout: config.scheduler.rule_timeout(),
            misconfigured: Arc::new(DashMap::new()),
        }
    }

    pub fn with_rule_timeout(mut self, timeout: Duration) -> Self {
        self.rule_timeout = timeout;
        self
    }

    pub fn executor(&self) -> &OrderExecutor {
        &self.executor
    }

    /// Rules whose placement has been in flight for at least `threshold`
    pub fn stuck_placements(&self, threshold: Duration) -> Vec<RuleId> {
        self.executor.guard().stuck(threshold)
    }

    /// Load one cadence's rules with a fresh market snapshot and run a pass
    pub async fn tick(&self, frequency: Frequency) -> Result<PassReport> {
        let (rules, hours, account) = futures::try_join!(
            self.store.get_active_rules(frequency),
            self.broker.get_market_hours(),
            self.broker.get_account(),
        )?;
        debug!(
            %frequency,
            rules = rules.len(),
            open = hours.is_open,
            seconds_to_close = hours.seconds_to_close,
            "tick"
        );
        self.run_pass(rules, MarketSnapshot { hours, account }).await
    }

    pub async fn run_pass(&self, rules: Vec<Rule>, snapshot: MarketSnapshot) -> Result<PassReport> {
        let started = Instant::now();
        let rules: Vec<Rule> = rules
            .into_iter()
            .filter(|r| {
                r.enabled
                    && !self.executor.guard().is_held(r.id)
                    && !self.processing.is_held(r.id)
            })
            .collect();

        let mut report = PassReport::default();
        if rules.is_empty() {
            return Ok(report);
        }

        let symbols: Vec<String> = rules
            .iter()
            .map(|r| r.symbol.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let quotes: HashMap<String, Quote> = self
            .broker
            .get_quotes(&symbols)
            .await?
            .into_iter()
            .map(|q| (q.symbol.clone(), q))
            .collect();

        let mut trades: HashMap<RuleId, Trade> = self
            .store
            .get_incomplete_trades()
            .await?
            .into_iter()
            .map(|t| (t.rule_id, t))
            .collect();

        let tasks = rules.into_iter().map(|rule| {
            let quote = quotes.get(&rule.symbol).cloned();
            let trade = trades.remove(&rule.id);
            let rule_id = rule.id;
            async move {
                let outcome = match self.process_rule(rule, trade, quote, snapshot).await {
                    Ok(outcome) => {
                        self.misconfigured.remove(&rule_id);
                        outcome
                    }
                    Err(RulebotError::Timeout(message)) => {
                        warn!(rule_id, %message, "rule timed out");
                        self.notifications.emit(Notification::Error {
                            rule_id: Some(rule_id),
                            message,
                        });
                        RuleOutcome::TimedOut
                    }
                    Err(e) => {
                        self.report_failure(rule_id, &e);
                        RuleOutcome::Failed(e.to_string())
                    }
                };
                (rule_id, outcome)
            }
        });

        for (rule_id, outcome) in join_all(tasks).await {
            report.evaluated += 1;
            report.record(rule_id, outcome);
        }

        info!(
            evaluated = report.evaluated,
            placed = report.placed,
            failed = report.failed,
            timed_out = report.timed_out,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "pass complete"
        );
        Ok(report)
    }

    /// Reconcile, evaluate and act on one rule.
    ///
    /// The rule timeout covers everything up to the decision. A placement,
    /// once started, runs to completion in its own task holding both guard
    /// tokens, so an order the broker accepted is always recorded on the
    /// trade even when the pass stops waiting or is aborted.
    async fn process_rule(
        &self,
        rule: Rule,
        trade: Option<Trade>,
        quote: Option<Quote>,
        snapshot: MarketSnapshot,
    ) -> Result<RuleOutcome> {
        let Some(processing) = self.processing.try_acquire(rule.id, "tick") else {
            return Ok(RuleOutcome::Skipped);
        };
        let rule_id = rule.id;

        let prepared = tokio::time::timeout(
            self.rule_timeout,
            self.prepare(rule, trade, quote, snapshot),
        )
        .await
        .map_err(|_| {
            RulebotError::Timeout(format!("rule {} exceeded {:?}", rule_id, self.rule_timeout))
        })??;

        let (mut rule, intent, position) = match prepared {
            Prepared::Done(outcome) => return Ok(outcome),
            Prepared::Place {
                rule,
                intent,
                position,
            } => (rule, intent, position),
        };

        let (side, reason) = (intent.side, intent.reason);
        let executor = self.executor.clone();
        let placement = tokio::spawn(async move {
            let _processing = processing;
            executor
                .place_order(
                    &mut rule,
                    intent.side,
                    intent.price,
                    intent.shares,
                    position,
                    intent.reason,
                )
                .await
        });
        let outcome = placement.await.map_err(|e| {
            RulebotError::Internal(format!("placement task for rule {} failed: {}", rule_id, e))
        })??;

        Ok(match outcome {
            PlacementOutcome::Placed { order, .. } => RuleOutcome::Placed {
                side,
                reason,
                order_id: order.id,
            },
            PlacementOutcome::Skipped => RuleOutcome::Skipped,
            PlacementOutcome::Recovered { rule_disabled: true, .. } => RuleOutcome::Disabled,
            PlacementOutcome::Recovered { .. } => RuleOutcome::Recovered,
        })
    }

    async fn prepare(
        &self,
        mut rule: Rule,
        trade: Option<Trade>,
        quote: Option<Quote>,
        snapshot: MarketSnapshot,
    ) -> Result<Prepared> {
        let lifecycle =
            TradeLifecycle::new(self.broker.as_ref(), self.store.as_ref(), &self.notifications);
        let reconciled = lifecycle
            .reconcile(&mut rule, Position::from_trade(trade))
            .await?;
        if reconciled.skip {
            return Ok(Prepared::Done(RuleOutcome::Disabled));
        }
        let position = reconciled.position;

        let quote = quote.ok_or_else(|| RulebotError::QuoteUnavailable {
            symbol: rule.symbol.clone(),
        })?;
        let ctx = build_context(&rule, &position, &quote, &snapshot, &self.predicates)?;
        let decision = decide(&rule, &ctx, self.kill_switch.is_engaged(), &self.policy);

        if let Some(intent) = decision.intent {
            return Ok(Prepared::Place {
                rule,
                intent,
                position,
            });
        }

        match (decision.trailing, position) {
            (Some(update), Position::Long(trade)) => {
                self.apply_trailing(&rule, trade, update).await?;
                Ok(Prepared::Done(RuleOutcome::TrailingUpdated))
            }
            _ => Ok(Prepared::Done(RuleOutcome::Idle)),
        }
    }

    async fn apply_trailing(&self, rule: &Rule, mut trade: Trade, update: TrailingUpdate) -> Result<()> {
        let previous = trade.risk_value;
        if update.target_reached && !trade.target_reached {
            info!(rule_id = rule.id, symbol = %rule.symbol, "profit target reached; trailing armed");
        }
        trade.target_reached = trade.target_reached || update.target_reached;
        if let Some(floor) = update.risk_value {
            if trade.raise_risk_floor(floor) {
                info!(
                    rule_id = rule.id,
                    symbol = %rule.symbol,
                    from = ?previous,
                    to = %floor,
                    "risk floor raised"
                );
            }
        }
        self.store.save_trade(&trade).await?;
        Ok(())
    }

    /// Log and notify a failed rule. A configuration error is reported once
    /// until its message changes or the rule processes cleanly again.
    fn report_failure(&self, rule_id: RuleId, err: &RulebotError) {
        let message = err.to_string();
        if err.is_configuration() {
            if self.misconfigured.get(&rule_id).map(|m| *m == message).unwrap_or(false) {
                debug!(rule_id, error = %err, "rule still misconfigured; skipped");
                return;
            }
            self.misconfigured.insert(rule_id, message.clone());
            warn!(rule_id, error = %err, "rule misconfigured; skipped until fixed");
        } else {
            error!(rule_id, error = %err, "rule processing failed");
        }
        self.notifications.emit(Notification::Error {
            rule_id: Some(rule_id),
            message,
        });
    }
}

/// Result of the timed part of a rule's tick
enum Prepared {
    Done(RuleOutcome),
    Place {
        rule: Rule,
        intent: OrderIntent,
        position: Position,
    },
}
