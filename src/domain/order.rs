use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Time in force; every order rests until filled or cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good Till Cancelled
    GTC,
}

impl TimeInForce {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeInForce::GTC => "gtc",
        }
    }
}

/// Order status as reported by the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Accepted by the broker, nothing filled yet
    Pending,
    /// Order partially filled and still working
    PartiallyFilled,
    /// Order fully filled
    Filled,
    /// Order cancelled (possibly after a partial fill)
    Cancelled,
    /// Order rejected by the broker
    Rejected,
    /// Order expired
    Expired,
}

impl OrderStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::PartiallyFilled)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Rejected => "rejected",
            OrderStatus::Expired => "expired",
        };
        write!(f, "{}", s)
    }
}

/// Order request (what we want to do)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Client-generated idempotency token
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub shares: u64,
    pub limit_price: Decimal,
    pub time_in_force: TimeInForce,
}

impl OrderRequest {
    pub fn limit(symbol: impl Into<String>, side: OrderSide, shares: u64, price: Decimal) -> Self {
        Self {
            client_order_id: Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            side,
            shares,
            limit_price: price,
            time_in_force: TimeInForce::GTC,
        }
    }
}

/// Order as reported by the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub side: OrderSide,
    pub shares: u64,
    pub filled_shares: u64,
    pub avg_fill_price: Option<Decimal>,
    pub limit_price: Option<Decimal>,
    pub status: OrderStatus,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// True when at least one share executed, whatever the status says
    pub fn has_fill(&self) -> bool {
        self.filled_shares > 0
    }

    /// Shares that have not executed yet
    pub fn remaining(&self) -> u64 {
        self.shares.saturating_sub(self.filled_shares)
    }

    /// Check if fully filled
    pub fn is_fully_filled(&self) -> bool {
        self.filled_shares >= self.shares && self.shares > 0
    }

    /// Price the fill happened at, falling back to the limit when the broker omits it
    pub fn fill_price(&self) -> Option<Decimal> {
        self.avg_fill_price.or(self.limit_price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order(shares: u64, filled: u64, status: OrderStatus) -> Order {
        Order {
            id: "o-1".to_string(),
            client_order_id: None,
            symbol: "AAPL".to_string(),
            side: OrderSide::Buy,
            shares,
            filled_shares: filled,
            avg_fill_price: Some(dec!(101.25)),
            limit_price: Some(dec!(101.50)),
            status,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_order_remaining() {
        let mut o = order(100, 50, OrderStatus::PartiallyFilled);
        assert_eq!(o.remaining(), 50);
        assert!(o.status.is_active());
        assert!(!o.is_fully_filled());

        o.filled_shares = 100;
        o.status = OrderStatus::Filled;
        assert_eq!(o.remaining(), 0);
        assert!(o.is_fully_filled());
    }

    #[test]
    fn test_cancelled_order_can_still_carry_a_fill() {
        let o = order(100, 60, OrderStatus::Cancelled);
        assert!(!o.status.is_active());
        assert!(o.has_fill());
    }

    #[test]
    fn test_request_tokens_are_unique() {
        let a = OrderRequest::limit("AAPL", OrderSide::Buy, 10, dec!(100));
        let b = OrderRequest::limit("AAPL", OrderSide::Buy, 10, dec!(100));
        assert_ne!(a.client_order_id, b.client_order_id);
        assert_eq!(a.time_in_force, TimeInForce::GTC);
    }
}
