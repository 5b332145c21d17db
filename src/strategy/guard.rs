//! Per-rule order placement guard.
//!
//! At most one placement per rule is in flight at any time. Acquiring returns
//! a [`GuardToken`]; dropping the token releases the rule, so every exit
//! path of a placement (success, error, panic unwinding, cancelled future)
//! frees the entry.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::domain::RuleId;

#[derive(Debug, Clone)]
struct GuardEntry {
    acquired_at: Instant,
    reason: &'static str,
}

#[derive(Debug, Clone, Default)]
pub struct OrderGuard {
    inflight: Arc<DashMap<RuleId, GuardEntry>>,
}

impl OrderGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the rule; `None` when a placement is already in flight
    pub fn try_acquire(&self, rule_id: RuleId, reason: &'static str) -> Option<GuardToken> {
        match self.inflight.entry(rule_id) {
            Entry::Occupied(existing) => {
                debug!(
                    rule_id,
                    held_for_ms = existing.get().acquired_at.elapsed().as_millis() as u64,
                    held_by = existing.get().reason,
                    "placement already in flight"
                );
                None
            }
            Entry::Vacant(slot) => {
                slot.insert(GuardEntry {
                    acquired_at: Instant::now(),
                    reason,
                });
                Some(GuardToken {
                    rule_id,
                    inflight: self.inflight.clone(),
                })
            }
        }
    }

    pub fn is_held(&self, rule_id: RuleId) -> bool {
        self.inflight.contains_key(&rule_id)
    }

    pub fn inflight_count(&self) -> usize {
        self.inflight.len()
    }

    /// Rules whose placement has been running for at least `threshold`
    pub fn stuck(&self, threshold: Duration) -> Vec<RuleId> {
        self.inflight
            .iter()
            .filter(|e| e.value().acquired_at.elapsed() >= threshold)
            .map(|e| *e.key())
            .collect()
    }
}

/// Scoped claim on one rule; releases on drop
#[derive(Debug)]
pub struct GuardToken {
    rule_id: RuleId,
    inflight: Arc<DashMap<RuleId, GuardEntry>>,
}

impl Drop for GuardToken {
    fn drop(&mut self) {
        if self.inflight.remove(&self.rule_id).is_none() {
            warn!(rule_id = self.rule_id, "guard entry vanished before release");
        }
    }
}
