//! REST broker adapter (Alpaca-style trading and market-data API).
//!
//! Trading endpoints live under `broker.trading_url`, latest trades under
//! `broker.data_url`. Gateway rejections are classified into
//! [`RejectionKind`] so the executor can recover from them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::BrokerConfig;
use crate::domain::{
    AccountSnapshot, MarketHours, Order, OrderRequest, OrderSide, OrderStatus, Quote,
};
use crate::error::{RejectionKind, Result, RulebotError};
use crate::exchange::{BrokerClient, BrokerKind};

#[derive(Clone)]
pub struct RestBroker {
    http: Client,
    trading_url: String,
    data_url: String,
}

#[derive(Debug, Deserialize)]
struct ClockResponse {
    is_open: bool,
    timestamp: DateTime<Utc>,
    next_close: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    cash: Decimal,
    equity: Decimal,
    buying_power: Decimal,
}

#[derive(Debug, Deserialize)]
struct PositionResponse {
    qty: Decimal,
}

#[derive(Debug, Deserialize)]
struct LatestTradesResponse {
    trades: HashMap<String, LatestTrade>,
}

#[derive(Debug, Deserialize)]
struct LatestTrade {
    #[serde(rename = "p")]
    price: Decimal,
    #[serde(rename = "t")]
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct NewOrderBody<'a> {
    symbol: &'a str,
    qty: String,
    side: &'static str,
    #[serde(rename = "type")]
    order_type: &'static str,
    time_in_force: &'static str,
    limit_price: String,
    client_order_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    client_order_id: Option<String>,
    symbol: String,
    side: String,
    qty: Option<Decimal>,
    filled_qty: Decimal,
    filled_avg_price: Option<Decimal>,
    limit_price: Option<Decimal>,
    status: String,
    updated_at: Option<DateTime<Utc>>,
}

impl OrderResponse {
    fn into_order(self) -> Result<Order> {
        let side = match self.side.as_str() {
            "buy" => OrderSide::Buy,
            "sell" => OrderSide::Sell,
            other => {
                return Err(RulebotError::Validation(format!(
                    "unknown order side '{}' for order {}",
                    other, self.id
                )))
            }
        };
        Ok(Order {
            status: map_status(&self.status),
            shares: to_shares(self.qty.unwrap_or_default()),
            filled_shares: to_shares(self.filled_qty),
            avg_fill_price: self.filled_avg_price,
            limit_price: self.limit_price,
            updated_at: self.updated_at.unwrap_or_else(Utc::now),
            client_order_id: self.client_order_id,
            symbol: self.symbol,
            side,
            id: self.id,
        })
    }
}

fn to_shares(qty: Decimal) -> u64 {
    use rust_decimal::prelude::ToPrimitive;
    qty.trunc().to_u64().unwrap_or(0)
}

pub(crate) fn map_status(status: &str) -> OrderStatus {
    match status {
        "partially_filled" => OrderStatus::PartiallyFilled,
        "filled" => OrderStatus::Filled,
        "canceled" | "done_for_day" | "replaced" => OrderStatus::Cancelled,
        "rejected" | "suspended" => OrderStatus::Rejected,
        "expired" => OrderStatus::Expired,
        // new, accepted, pending_new, pending_cancel, pending_replace, held, ...
        _ => OrderStatus::Pending,
    }
}

/// Classify a failed order submission
pub(crate) fn classify_rejection(status: StatusCode, body: &str) -> RulebotError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.to_string());
    let lower = message.to_ascii_lowercase();

    let kind = if lower.contains("insufficient qty") || lower.contains("insufficient shares") {
        Some(RejectionKind::InsufficientShares)
    } else if lower.contains("not tradable") || lower.contains("not active") {
        Some(RejectionKind::NotTradable)
    } else if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
        Some(RejectionKind::Other)
    } else {
        None
    };

    match kind {
        Some(kind) => RulebotError::OrderRejected { kind, message },
        None => RulebotError::BrokerApi {
            status: status.as_u16(),
            message,
        },
    }
}

impl RestBroker {
    pub fn new(config: &BrokerConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("apca-api-key-id"),
            HeaderValue::from_str(&config.key_id)
                .map_err(|e| RulebotError::Validation(format!("invalid key id header: {}", e)))?,
        );
        headers.insert(
            HeaderName::from_static("apca-api-secret-key"),
            HeaderValue::from_str(&config.secret_key)
                .map_err(|e| RulebotError::Validation(format!("invalid secret header: {}", e)))?,
        );

        let http = Client::builder()
            .user_agent(concat!("rulebot/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;

        Ok(Self {
            http,
            trading_url: config.trading_url.trim_end_matches('/').to_string(),
            data_url: config.data_url.trim_end_matches('/').to_string(),
        })
    }

    /// Send a request; `Ok(None)` on 404
    async fn request<T: for<'de> Deserialize<'de>>(
        &self,
        method: Method,
        url: String,
        query: Option<&[(&str, String)]>,
    ) -> Result<Option<T>> {
        let mut req = self.http.request(method.clone(), &url);
        if let Some(query) = query {
            req = req.query(query);
        }
        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                RulebotError::Timeout(format!("{} {}", method, url))
            } else {
                RulebotError::Http(e)
            }
        })?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(RulebotError::BrokerApi {
                status: status.as_u16(),
                message: format!("{} {}: {}", method, url, text),
            });
        }
        Ok(Some(serde_json::from_str(&text)?))
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, url: String) -> Result<T> {
        self.request(Method::GET, url.clone(), None)
            .await?
            .ok_or_else(|| RulebotError::BrokerApi {
                status: 404,
                message: format!("GET {}: not found", url),
            })
    }
}

#[async_trait]
impl BrokerClient for RestBroker {
    fn kind(&self) -> BrokerKind {
        BrokerKind::Rest
    }

    async fn get_quotes(&self, symbols: &[String]) -> Result<Vec<Quote>> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/v2/stocks/trades/latest", self.data_url);
        let query = [("symbols", symbols.join(","))];
        let resp: LatestTradesResponse = self
            .request(Method::GET, url, Some(&query))
            .await?
            .unwrap_or(LatestTradesResponse {
                trades: HashMap::new(),
            });

        let quotes: Vec<Quote> = resp
            .trades
            .into_iter()
            .map(|(symbol, t)| Quote {
                symbol,
                price: t.price,
                timestamp: t.timestamp,
            })
            .collect();
        if quotes.len() < symbols.len() {
            warn!(
                requested = symbols.len(),
                received = quotes.len(),
                "latest trades missing for some symbols"
            );
        }
        Ok(quotes)
    }

    async fn get_market_hours(&self) -> Result<MarketHours> {
        let clock: ClockResponse = self.get(format!("{}/v2/clock", self.trading_url)).await?;
        if !clock.is_open {
            return Ok(MarketHours::closed());
        }
        Ok(MarketHours::open(
            (clock.next_close - clock.timestamp).num_seconds(),
        ))
    }

    async fn get_account(&self) -> Result<AccountSnapshot> {
        let account: AccountResponse =
            self.get(format!("{}/v2/account", self.trading_url)).await?;
        Ok(AccountSnapshot {
            cash: account.cash,
            equity: account.equity,
            buying_power: account.buying_power,
        })
    }

    async fn get_position_quantity(&self, symbol: &str) -> Result<Decimal> {
        let position: Option<PositionResponse> = self
            .request(
                Method::GET,
                format!("{}/v2/positions/{}", self.trading_url, symbol),
                None,
            )
            .await?;
        Ok(position.map(|p| p.qty).unwrap_or(Decimal::ZERO))
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<Order> {
        let body = NewOrderBody {
            symbol: &request.symbol,
            qty: request.shares.to_string(),
            side: request.side.as_str(),
            order_type: "limit",
            time_in_force: request.time_in_force.as_str(),
            limit_price: request.limit_price.round_dp(2).to_string(),
            client_order_id: &request.client_order_id,
        };
        let url = format!("{}/v2/orders", self.trading_url);
        let resp = self.http.post(&url).json(&body).send().await.map_err(|e| {
            if e.is_timeout() {
                RulebotError::Timeout(format!("POST {}", url))
            } else {
                RulebotError::Http(e)
            }
        })?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            warn!(
                symbol = %request.symbol,
                side = %request.side,
                status = status.as_u16(),
                body = %text,
                "order rejected"
            );
            return Err(classify_rejection(status, &text));
        }

        let order = serde_json::from_str::<OrderResponse>(&text)?.into_order()?;
        debug!(order_id = %order.id, status = %order.status, "order accepted");
        Ok(order)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<bool> {
        let url = format!("{}/v2/orders/{}", self.trading_url, order_id);
        let resp = self.http.delete(&url).send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(true);
        }
        let text = resp.text().await.unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY => {
                warn!(order_id, status = status.as_u16(), body = %text, "cancel refused");
                Ok(false)
            }
            _ => Err(RulebotError::BrokerApi {
                status: status.as_u16(),
                message: format!("DELETE {}: {}", url, text),
            }),
        }
    }

    async fn get_order(&self, order_id: &str) -> Result<Option<Order>> {
        let resp: Option<OrderResponse> = self
            .request(
                Method::GET,
                format!("{}/v2/orders/{}", self.trading_url, order_id),
                None,
            )
            .await?;
        resp.map(OrderResponse::into_order).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_status_mapping() {
        assert_eq!(map_status("new"), OrderStatus::Pending);
        assert_eq!(map_status("pending_cancel"), OrderStatus::Pending);
        assert_eq!(map_status("partially_filled"), OrderStatus::PartiallyFilled);
        assert_eq!(map_status("filled"), OrderStatus::Filled);
        assert_eq!(map_status("canceled"), OrderStatus::Cancelled);
        assert_eq!(map_status("expired"), OrderStatus::Expired);
        assert_eq!(map_status("rejected"), OrderStatus::Rejected);
    }

    #[test]
    fn test_rejection_classification() {
        let err = classify_rejection(
            StatusCode::FORBIDDEN,
            r#"{"code":40310000,"message":"insufficient qty available for order"}"#,
        );
        assert_eq!(err.rejection(), Some(RejectionKind::InsufficientShares));

        let err = classify_rejection(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"message":"asset \"XYZ\" is not tradable"}"#,
        );
        assert_eq!(err.rejection(), Some(RejectionKind::NotTradable));

        let err = classify_rejection(StatusCode::UNPROCESSABLE_ENTITY, "qty must be > 0");
        assert_eq!(err.rejection(), Some(RejectionKind::Other));

        let err = classify_rejection(StatusCode::BAD_GATEWAY, "upstream");
        assert!(matches!(err, RulebotError::BrokerApi { status: 502, .. }));
        assert_eq!(err.rejection(), None);
    }

    #[test]
    fn test_order_payload_parsing() {
        let body = r#"{
            "id": "61e69015-8549-4bfd-b9c3-01e75843f47d",
            "client_order_id": "eb9e2aaa-f71a-4f51-b5b4-52a6c565dad4",
            "symbol": "AAPL",
            "side": "buy",
            "qty": "100",
            "filled_qty": "60",
            "filled_avg_price": "100.12",
            "limit_price": "100.50",
            "status": "partially_filled",
            "updated_at": "2024-03-01T15:30:00Z"
        }"#;
        let order = serde_json::from_str::<OrderResponse>(body)
            .unwrap()
            .into_order()
            .unwrap();
        assert_eq!(order.side, OrderSide::Buy);
        assert_eq!(order.shares, 100);
        assert_eq!(order.filled_shares, 60);
        assert_eq!(order.avg_fill_price, Some(dec!(100.12)));
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
    }

    #[test]
    fn test_latest_trades_parsing() {
        let body = r#"{"trades":{"AAPL":{"t":"2024-03-01T15:30:00Z","p":180.25,"s":100}}}"#;
        let resp: LatestTradesResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.trades["AAPL"].price, dec!(180.25));
    }
}
