use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Last traded price for one symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    pub fn new(symbol: impl Into<String>, price: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            timestamp: Utc::now(),
        }
    }
}

/// Market clock state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketHours {
    pub is_open: bool,
    /// Seconds until the session closes; zero while closed
    pub seconds_to_close: i64,
}

impl MarketHours {
    pub fn open(seconds_to_close: i64) -> Self {
        Self {
            is_open: true,
            seconds_to_close: seconds_to_close.max(0),
        }
    }

    pub fn closed() -> Self {
        Self {
            is_open: false,
            seconds_to_close: 0,
        }
    }

    /// Session is open and within `window_secs` of the close
    pub fn is_closing(&self, window_secs: i64) -> bool {
        self.is_open && self.seconds_to_close <= window_secs
    }
}

impl Default for MarketHours {
    fn default() -> Self {
        Self::closed()
    }
}

/// Brokerage account balances
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub cash: Decimal,
    pub equity: Decimal,
    pub buying_power: Decimal,
}

/// Clock and account state shared by every rule in one tick
#[derive(Debug, Clone, Copy, Default)]
pub struct MarketSnapshot {
    pub hours: MarketHours,
    pub account: AccountSnapshot,
}
