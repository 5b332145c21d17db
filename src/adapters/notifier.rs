//! Chat webhook notifications
//!
//! Sends order and error events to a chat webhook. Delivery is
//! fire-and-forget: a failed or slow webhook never reaches trading code.

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::domain::{OrderSide, RuleId};
use crate::error::{Result, RulebotError};

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    OrderPlaced {
        rule_id: RuleId,
        symbol: String,
        side: OrderSide,
        shares: u64,
        limit_price: Decimal,
        reason: String,
        order_id: String,
    },
    OrderCancelled {
        rule_id: RuleId,
        symbol: String,
        side: OrderSide,
        order_id: String,
    },
    PositionClosed {
        rule_id: RuleId,
        symbol: String,
        entry_price: Option<Decimal>,
        exit_price: Option<Decimal>,
        shares: u64,
    },
    RuleDisabled {
        rule_id: RuleId,
        symbol: String,
        reason: String,
    },
    Error {
        rule_id: Option<RuleId>,
        message: String,
    },
    Startup {
        mode: String,
        rules: usize,
    },
}

impl Notification {
    pub fn to_text(&self) -> String {
        match self {
            Notification::OrderPlaced {
                rule_id,
                symbol,
                side,
                shares,
                limit_price,
                reason,
                order_id,
            } => format!(
                "{} {} {} @ ${} ({})\nRule: {} | Order: {}",
                side,
                shares,
                symbol,
                limit_price,
                reason,
                rule_id,
                short_id(order_id)
            ),
            Notification::OrderCancelled {
                rule_id,
                symbol,
                side,
                order_id,
            } => format!(
                "CANCELLED {} {}\nRule: {} | Order: {}",
                side,
                symbol,
                rule_id,
                short_id(order_id)
            ),
            Notification::PositionClosed {
                rule_id,
                symbol,
                entry_price,
                exit_price,
                shares,
            } => {
                let pnl = match (entry_price, exit_price) {
                    (Some(entry), Some(exit)) => {
                        format!(" | PnL: ${}", ((exit - entry) * Decimal::from(*shares)).round_dp(2))
                    }
                    _ => String::new(),
                };
                format!(
                    "POSITION CLOSED {} x{}\nEntry: {} -> Exit: {}{}\nRule: {}",
                    symbol,
                    shares,
                    fmt_price(*entry_price),
                    fmt_price(*exit_price),
                    pnl,
                    rule_id
                )
            }
            Notification::RuleDisabled {
                rule_id,
                symbol,
                reason,
            } => format!("RULE DISABLED {} ({})\nRule: {}", symbol, reason, rule_id),
            Notification::Error { rule_id, message } => match rule_id {
                Some(id) => format!("Error (rule {}): {}", id, message),
                None => format!("Error: {}", message),
            },
            Notification::Startup { mode, rules } => {
                format!("Trading bot started ({})\nActive rules: {}", mode, rules)
            }
        }
    }
}

fn short_id(id: &str) -> &str {
    &id[..16.min(id.len())]
}

fn fmt_price(price: Option<Decimal>) -> String {
    price
        .map(|p| format!("${}", p))
        .unwrap_or_else(|| "n/a".to_string())
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Chat webhook client
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    webhook_url: String,
}

#[derive(Serialize)]
struct WebhookMessage<'a> {
    text: &'a str,
}

impl WebhookNotifier {
    /// Create a new notifier from the `RULEBOT_WEBHOOK_URL` environment variable
    pub fn from_env() -> Option<Arc<Self>> {
        std::env::var("RULEBOT_WEBHOOK_URL").ok().map(Self::new)
    }

    /// Create a new notifier with explicit URL
    pub fn new(webhook_url: String) -> Arc<Self> {
        info!("Webhook notifications enabled");
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Arc::new(Self {
            client,
            webhook_url,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        let text = notification.to_text();
        let resp = self
            .client
            .post(&self.webhook_url)
            .json(&WebhookMessage { text: &text })
            .send()
            .await?;

        if resp.status().is_success() {
            debug!("Webhook notification sent");
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(RulebotError::BrokerApi {
                status: status.as_u16(),
                message: format!("webhook rejected notification: {}", body),
            })
        }
    }
}

/// Fire-and-forget front of an optional notifier
#[derive(Clone, Default)]
pub struct NotificationSink {
    notifier: Option<Arc<dyn Notifier>>,
}

impl NotificationSink {
    pub fn new(notifier: Option<Arc<dyn Notifier>>) -> Self {
        Self { notifier }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    /// Spawn the delivery; errors are logged and dropped
    pub fn emit(&self, notification: Notification) {
        let Some(notifier) = self.notifier.clone() else {
            return;
        };
        if tokio::runtime::Handle::try_current().is_err() {
            debug!("No runtime; dropping notification");
            return;
        }
        tokio::spawn(async move {
            if let Err(e) = notifier.send(&notification).await {
                warn!("Failed to send notification: {}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    struct Recorder {
        sent: Mutex<Vec<Notification>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for Recorder {
        async fn send(&self, notification: &Notification) -> Result<()> {
            self.sent.lock().unwrap().push(notification.clone());
            if self.fail {
                Err(RulebotError::Internal("webhook down".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn order_placed_text() {
        let text = Notification::OrderPlaced {
            rule_id: 7,
            symbol: "AAPL".to_string(),
            side: OrderSide::Buy,
            shares: 10,
            limit_price: dec!(100.50),
            reason: "entry strategy".to_string(),
            order_id: "0123456789abcdef-extra".to_string(),
        }
        .to_text();
        assert!(text.starts_with("BUY 10 AAPL @ $100.50 (entry strategy)"));
        assert!(text.ends_with("Order: 0123456789abcdef"));
    }

    #[test]
    fn closed_position_reports_pnl_when_known() {
        let text = Notification::PositionClosed {
            rule_id: 1,
            symbol: "AAPL".to_string(),
            entry_price: Some(dec!(100)),
            exit_price: Some(dec!(101.5)),
            shares: 10,
        }
        .to_text();
        assert!(text.contains("PnL: $15"));

        let text = Notification::PositionClosed {
            rule_id: 1,
            symbol: "AAPL".to_string(),
            entry_price: Some(dec!(100)),
            exit_price: None,
            shares: 10,
        }
        .to_text();
        assert!(!text.contains("PnL"));
        assert!(text.contains("n/a"));
    }

    #[tokio::test]
    async fn sink_swallows_delivery_failures() {
        let recorder = Arc::new(Recorder {
            sent: Mutex::new(Vec::new()),
            fail: true,
        });
        let sink = NotificationSink::new(Some(recorder.clone() as Arc<dyn Notifier>));
        sink.emit(Notification::Error {
            rule_id: None,
            message: "boom".to_string(),
        });
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(recorder.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn disabled_sink_is_a_no_op() {
        NotificationSink::disabled().emit(Notification::Startup {
            mode: "paper".to_string(),
            rules: 0,
        });
    }
}
