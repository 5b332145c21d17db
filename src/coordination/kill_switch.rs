//! Kill switch
//!
//! Once engaged, every holding rule liquidates on its next tick and no rule
//! opens a new position. Engaged from config or the CLI at startup, or at
//! runtime by an operator signal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KillReason {
    /// `execution.liquidate_all` or `--liquidate`
    Startup,
    /// Operator signal at runtime
    Signal,
    Other(String),
}

impl std::fmt::Display for KillReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KillReason::Startup => write!(f, "Startup"),
            KillReason::Signal => write!(f, "Signal"),
            KillReason::Other(s) => write!(f, "Other: {}", s),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KillState {
    pub engaged: bool,
    pub reason: Option<KillReason>,
    pub engaged_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct KillSwitch {
    engaged: Arc<AtomicBool>,
    state: Arc<RwLock<KillState>>,
}

impl KillSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fast atomic check, used on every decision
    pub fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::Relaxed)
    }

    pub async fn state(&self) -> KillState {
        self.state.read().await.clone()
    }

    pub async fn engage(&self, reason: KillReason) {
        if self.engaged.swap(true, Ordering::SeqCst) {
            info!(%reason, "kill switch already engaged");
            return;
        }
        error!(%reason, "KILL SWITCH ENGAGED: liquidating all positions");

        let mut state = self.state.write().await;
        state.engaged = true;
        state.reason = Some(reason);
        state.engaged_at = Some(Utc::now());
    }

    pub async fn release(&self, operator: &str) {
        info!(operator, "kill switch released");
        self.engaged.store(false, Ordering::SeqCst);
        *self.state.write().await = KillState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn engage_and_release() {
        let switch = KillSwitch::new();
        assert!(!switch.is_engaged());

        switch.engage(KillReason::Signal).await;
        assert!(switch.is_engaged());
        let state = switch.state().await;
        assert_eq!(state.reason, Some(KillReason::Signal));
        assert!(state.engaged_at.is_some());

        // a second engage keeps the first reason
        switch.engage(KillReason::Startup).await;
        assert_eq!(switch.state().await.reason, Some(KillReason::Signal));

        switch.release("ops").await;
        assert!(!switch.is_engaged());
        assert!(switch.state().await.reason.is_none());
    }

    #[tokio::test]
    async fn clones_share_the_flag() {
        let switch = KillSwitch::new();
        let observer = switch.clone();
        switch.engage(KillReason::Other("test".into())).await;
        assert!(observer.is_engaged());
    }
}
