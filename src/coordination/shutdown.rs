//! Graceful shutdown
//!
//! A watch channel carries the stop request to both scheduler cadences.
//! In-flight rule passes are allowed to finish (bounded by the drain
//! timeout) so no placement is cut off between submit and persist.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::kill_switch::{KillReason, KillSwitch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGTERM, SIGINT
    Graceful,
    /// Second Ctrl+C or SIGQUIT; skip draining
    Urgent,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Graceful => write!(f, "graceful"),
            ShutdownSignal::Urgent => write!(f, "urgent"),
        }
    }
}

pub struct Shutdown {
    requested: AtomicBool,
    tx: watch::Sender<Option<ShutdownSignal>>,
    drain_timeout: Duration,
}

impl Shutdown {
    pub fn new(drain_timeout: Duration) -> Arc<Self> {
        let (tx, _) = watch::channel(None);
        Arc::new(Self {
            requested: AtomicBool::new(false),
            tx,
            drain_timeout,
        })
    }

    pub fn drain_timeout(&self) -> Duration {
        match *self.tx.borrow() {
            Some(ShutdownSignal::Urgent) => Duration::ZERO,
            _ => self.drain_timeout,
        }
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub fn request(&self, signal: ShutdownSignal) {
        if self.requested.swap(true, Ordering::SeqCst) && signal == ShutdownSignal::Graceful {
            warn!(%signal, "shutdown already requested");
            return;
        }
        info!(%signal, "shutdown requested");
        self.tx.send_replace(Some(signal));
    }

    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            rx: self.tx.subscribe(),
        }
    }
}

/// Per-task view of the shutdown request
#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<Option<ShutdownSignal>>,
}

impl ShutdownToken {
    pub fn is_requested(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Resolves once shutdown is requested
    pub async fn requested(&mut self) -> ShutdownSignal {
        loop {
            if let Some(signal) = *self.rx.borrow_and_update() {
                return signal;
            }
            if self.rx.changed().await.is_err() {
                return ShutdownSignal::Urgent;
            }
        }
    }
}

/// Route OS signals: SIGINT and SIGTERM stop the bot, SIGUSR1 engages the
/// kill switch.
pub fn install_signal_handlers(shutdown: Arc<Shutdown>, kill_switch: KillSwitch) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let on_term = shutdown.clone();
        tokio::spawn(async move {
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                    info!("Received SIGTERM");
                    on_term.request(ShutdownSignal::Graceful);
                }
                Err(e) => error!("Failed to install SIGTERM handler: {}", e),
            }
        });

        tokio::spawn(async move {
            match signal(SignalKind::user_defined1()) {
                Ok(mut stream) => {
                    while stream.recv().await.is_some() {
                        warn!("Received SIGUSR1");
                        kill_switch.engage(KillReason::Signal).await;
                    }
                }
                Err(e) => error!("Failed to install SIGUSR1 handler: {}", e),
            }
        });
    }

    #[cfg(not(unix))]
    let _ = kill_switch;

    tokio::spawn(async move {
        let mut presses = 0u8;
        while tokio::signal::ctrl_c().await.is_ok() {
            presses += 1;
            info!("Received Ctrl+C");
            shutdown.request(if presses == 1 {
                ShutdownSignal::Graceful
            } else {
                ShutdownSignal::Urgent
            });
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn token_wakes_on_request() {
        let shutdown = Shutdown::new(Duration::from_secs(5));
        let mut token = shutdown.token();
        assert!(!token.is_requested());

        let waiter = tokio::spawn(async move { token.requested().await });
        shutdown.request(ShutdownSignal::Graceful);
        assert_eq!(waiter.await.unwrap(), ShutdownSignal::Graceful);
        assert!(shutdown.is_requested());
    }

    #[tokio::test]
    async fn urgent_request_skips_draining() {
        let shutdown = Shutdown::new(Duration::from_secs(5));
        shutdown.request(ShutdownSignal::Graceful);
        assert_eq!(shutdown.drain_timeout(), Duration::from_secs(5));

        // duplicate graceful is ignored
        shutdown.request(ShutdownSignal::Graceful);
        assert_eq!(shutdown.drain_timeout(), Duration::from_secs(5));

        shutdown.request(ShutdownSignal::Urgent);
        assert_eq!(shutdown.drain_timeout(), Duration::ZERO);
        assert!(shutdown.token().is_requested());
    }
}
