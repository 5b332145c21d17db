//! Fast and slow cadence timers
//!
//! Each cadence ticks on its own interval and spawns a pass per tick.
//! Passes may overlap; the engine keeps a rule out of a pass while it is
//! still being processed by an earlier one.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::coordination::Shutdown;
use crate::domain::Frequency;
use crate::services::engine::RuleEngine;

/// A placement held this many rule timeouts is reported as stuck
const STUCK_AFTER_TIMEOUTS: u32 = 2;

pub struct Scheduler {
    engine: RuleEngine,
    config: SchedulerConfig,
    shutdown: Arc<Shutdown>,
}

impl Scheduler {
    pub fn new(engine: RuleEngine, config: SchedulerConfig, shutdown: Arc<Shutdown>) -> Self {
        Self {
            engine,
            config,
            shutdown,
        }
    }

    /// Run both cadences until shutdown is requested
    pub async fn run(self) {
        info!(
            fast_ms = self.config.fast_interval_ms,
            slow_ms = self.config.slow_interval_ms,
            rule_timeout_ms = self.config.rule_timeout_ms,
            "scheduler started"
        );

        let stuck_after = self.config.rule_timeout() * STUCK_AFTER_TIMEOUTS;
        let fast = tokio::spawn(run_cadence(
            self.engine.clone(),
            Frequency::Fast,
            self.config.fast_interval(),
            stuck_after,
            self.shutdown.clone(),
        ));
        let slow = tokio::spawn(run_cadence(
            self.engine,
            Frequency::Slow,
            self.config.slow_interval(),
            stuck_after,
            self.shutdown.clone(),
        ));

        for (name, handle) in [("fast", fast), ("slow", slow)] {
            if let Err(e) = handle.await {
                error!(cadence = name, "cadence task panicked: {}", e);
            }
        }
        info!("scheduler stopped");
    }
}

async fn run_cadence(
    engine: RuleEngine,
    frequency: Frequency,
    period: Duration,
    stuck_after: Duration,
    shutdown: Arc<Shutdown>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut token = shutdown.token();
    let mut passes = JoinSet::new();

    loop {
        tokio::select! {
            _ = token.requested() => break,
            _ = ticker.tick() => {
                let stuck = engine.stuck_placements(stuck_after);
                if !stuck.is_empty() {
                    warn!(%frequency, rules = ?stuck, "placements in flight past the rule timeout");
                }
                let pass_engine = engine.clone();
                passes.spawn(async move {
                    if let Err(e) = pass_engine.tick(frequency).await {
                        error!(%frequency, error = %e, "tick failed");
                    }
                });
                debug!(
                    %frequency,
                    passes = passes.len(),
                    placements = engine.executor().guard().inflight_count(),
                    "pass spawned"
                );
            }
            Some(joined) = passes.join_next(), if !passes.is_empty() => {
                if let Err(e) = joined {
                    error!(%frequency, "pass panicked: {}", e);
                }
            }
        }
    }

    let drain = shutdown.drain_timeout();
    let remaining = passes.len();
    if remaining > 0 {
        info!(%frequency, remaining, "waiting for in-flight passes");
        let drained = tokio::time::timeout(drain, async {
            while passes.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(%frequency, "drain timed out; aborting passes");
            passes.abort_all();
        }
    }
    info!(%frequency, "cadence stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::notifier::NotificationSink;
    use crate::config::AppConfig;
    use crate::coordination::{KillSwitch, ShutdownSignal};
    use crate::domain::{AccountSnapshot, MarketHours};
    use crate::exchange::MockBrokerClient;
    use crate::persistence::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn ticks_until_shutdown() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let mut broker = MockBrokerClient::new();
        broker.expect_get_market_hours().returning(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(MarketHours::closed())
        });
        broker
            .expect_get_account()
            .returning(|| Ok(AccountSnapshot::default()));

        let config = AppConfig::default_config(true);
        let engine = RuleEngine::new(
            Arc::new(broker),
            Arc::new(MemoryStore::new()),
            &config,
            NotificationSink::disabled(),
            KillSwitch::new(),
        );
        let shutdown = Shutdown::new(Duration::from_secs(1));
        let scheduler = Scheduler::new(
            engine,
            SchedulerConfig {
                fast_interval_ms: 100,
                slow_interval_ms: 1000,
                rule_timeout_ms: 50,
            },
            shutdown.clone(),
        );

        let handle = tokio::spawn(scheduler.run());
        tokio::time::sleep(Duration::from_millis(1050)).await;
        shutdown.request(ShutdownSignal::Graceful);
        handle.await.unwrap();

        // 11 fast ticks and 2 slow ticks in 1.05s, give or take scheduling
        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen >= 10, "only {} ticks", seen);
    }
}
