use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub type RuleId = i64;

/// Polling cadence a rule is evaluated on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Fast,
    Slow,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Fast => "fast",
            Frequency::Slow => "slow",
        }
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(Frequency::Fast),
            "slow" => Ok(Frequency::Slow),
            other => Err(format!("invalid frequency '{}'; expected fast|slow", other)),
        }
    }
}

/// Trailing stop configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrailingStop {
    pub enabled: bool,
    /// Gain (percent) at which the trailing stop arms
    pub target_pct: Decimal,
    /// Risk percentage applied below the current price once armed
    pub risk_pct_after_target: Decimal,
}

/// A user-defined trading rule for one instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub name: String,
    pub symbol: String,
    pub exchange: String,
    pub frequency: Frequency,
    /// Entry predicate source, e.g. `price < 150 and cash > 2000`
    pub entry: Option<String>,
    /// Exit predicate source
    pub exit: Option<String>,
    /// Shares to buy on entry
    pub shares: u64,
    /// Stop-loss distance below the entry price, in percent
    pub risk_pct: Decimal,
    /// Take-profit distance above the entry price, in percent
    pub profit_pct: Decimal,
    pub trailing: TrailingStop,
    pub hold_overnight: bool,
    pub disable_after_sold: bool,
    pub enabled: bool,
    pub updated_at: DateTime<Utc>,
}

impl Rule {
    pub fn has_strategy(&self) -> bool {
        self.entry.is_some() || self.exit.is_some()
    }

    /// Whether the rule buys again after a position closes
    pub fn reenters(&self) -> bool {
        self.entry.is_some() && !self.disable_after_sold
    }

    /// Stop-loss floor for an entry at `buy_price`
    pub fn risk_price(&self, buy_price: Decimal) -> Decimal {
        below(buy_price, self.risk_pct)
    }

    /// Take-profit ceiling for an entry at `buy_price`
    pub fn profit_price(&self, buy_price: Decimal) -> Decimal {
        above(buy_price, self.profit_pct)
    }

    pub fn disable(&mut self) {
        self.enabled = false;
        self.updated_at = Utc::now();
    }
}

/// `price` lowered by `pct` percent
pub fn below(price: Decimal, pct: Decimal) -> Decimal {
    (price * (Decimal::ONE - pct / Decimal::ONE_HUNDRED)).round_dp(4)
}

/// `price` raised by `pct` percent
pub fn above(price: Decimal, pct: Decimal) -> Decimal {
    (price * (Decimal::ONE + pct / Decimal::ONE_HUNDRED)).round_dp(4)
}

#[cfg(test)]
pub(crate) fn test_rule(id: RuleId, symbol: &str) -> Rule {
    use rust_decimal_macros::dec;
    Rule {
        id,
        name: format!("{} rule", symbol),
        symbol: symbol.to_string(),
        exchange: "NASDAQ".to_string(),
        frequency: Frequency::Fast,
        entry: Some("price < 1000".to_string()),
        exit: None,
        shares: 100,
        risk_pct: dec!(2),
        profit_pct: dec!(5),
        trailing: TrailingStop::default(),
        hold_overnight: false,
        disable_after_sold: false,
        enabled: true,
        updated_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_thresholds_from_percentages() {
        let rule = test_rule(1, "AAPL");
        // 100 * (1 - 0.02) = 98, 100 * (1 + 0.05) = 105
        assert_eq!(rule.risk_price(dec!(100)), dec!(98));
        assert_eq!(rule.profit_price(dec!(100)), dec!(105));
    }

    #[test]
    fn test_reentry() {
        let mut rule = test_rule(1, "AAPL");
        assert!(rule.reenters());
        rule.disable_after_sold = true;
        assert!(!rule.reenters());
        rule.disable_after_sold = false;
        rule.entry = None;
        assert!(!rule.reenters());
    }

    #[test]
    fn test_frequency_parse() {
        assert_eq!("FAST".parse::<Frequency>().unwrap(), Frequency::Fast);
        assert!("hourly".parse::<Frequency>().is_err());
    }
}
