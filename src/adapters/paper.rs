//! Paper broker: simulated order gateway
//!
//! Orders, fills and positions live in memory. Quotes, clock and account
//! come either from values set on the broker or from a live client, so a
//! dry run can trade paper against real prices.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::domain::{
    AccountSnapshot, MarketHours, Order, OrderRequest, OrderSide, OrderStatus, Quote,
};
use crate::error::{RejectionKind, Result, RulebotError};
use crate::exchange::{BrokerClient, BrokerKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillMode {
    /// Fill every order in full at its limit price on submission
    #[default]
    Immediate,
    /// Orders rest until [`PaperBroker::fill`] is called
    Manual,
}

pub struct PaperBroker {
    fill_mode: FillMode,
    market_data: Option<Arc<dyn BrokerClient>>,
    quotes: DashMap<String, Quote>,
    hours: RwLock<MarketHours>,
    account: RwLock<AccountSnapshot>,
    orders: DashMap<String, Order>,
    positions: DashMap<String, Decimal>,
    untradable: DashMap<String, ()>,
    refuse_cancels: DashMap<String, ()>,
    next_id: AtomicU64,
}

impl PaperBroker {
    pub fn new(fill_mode: FillMode) -> Self {
        Self {
            fill_mode,
            market_data: None,
            quotes: DashMap::new(),
            hours: RwLock::new(MarketHours::open(6 * 60 * 60)),
            account: RwLock::new(AccountSnapshot {
                cash: Decimal::from(100_000),
                equity: Decimal::from(100_000),
                buying_power: Decimal::from(100_000),
            }),
            orders: DashMap::new(),
            positions: DashMap::new(),
            untradable: DashMap::new(),
            refuse_cancels: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Take quotes, clock and account from a live client
    pub fn with_market_data(mut self, client: Arc<dyn BrokerClient>) -> Self {
        self.market_data = Some(client);
        self
    }

    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.quotes
            .insert(symbol.to_string(), Quote::new(symbol, price));
    }

    pub async fn set_market_hours(&self, hours: MarketHours) {
        *self.hours.write().await = hours;
    }

    pub fn set_position(&self, symbol: &str, shares: Decimal) {
        self.positions.insert(symbol.to_string(), shares);
    }

    pub fn mark_untradable(&self, symbol: &str) {
        self.untradable.insert(symbol.to_string(), ());
    }

    /// Make the next cancels of `order_id` fail
    pub fn refuse_cancel(&self, order_id: &str) {
        self.refuse_cancels.insert(order_id.to_string(), ());
    }

    pub fn order(&self, order_id: &str) -> Option<Order> {
        self.orders.get(order_id).map(|o| o.clone())
    }

    pub fn orders(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self.orders.iter().map(|o| o.clone()).collect();
        orders.sort_by(|a, b| a.id.cmp(&b.id));
        orders
    }

    pub fn position(&self, symbol: &str) -> Decimal {
        self.positions
            .get(symbol)
            .map(|p| *p)
            .unwrap_or(Decimal::ZERO)
    }

    /// Execute `shares` of a resting order at `price`
    pub fn fill(&self, order_id: &str, shares: u64, price: Decimal) -> Result<Order> {
        let mut order = self
            .orders
            .get_mut(order_id)
            .ok_or_else(|| RulebotError::Validation(format!("unknown paper order {}", order_id)))?;
        if !order.status.is_active() {
            return Err(RulebotError::Validation(format!(
                "paper order {} is {}",
                order_id, order.status
            )));
        }

        let shares = shares.min(order.remaining());
        if shares == 0 {
            return Ok(order.clone());
        }
        let prior = Decimal::from(order.filled_shares) * order.avg_fill_price.unwrap_or_default();
        order.filled_shares += shares;
        order.avg_fill_price =
            Some((prior + Decimal::from(shares) * price) / Decimal::from(order.filled_shares));
        order.status = if order.is_fully_filled() {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        order.updated_at = Utc::now();

        let delta = match order.side {
            OrderSide::Buy => Decimal::from(shares),
            OrderSide::Sell => -Decimal::from(shares),
        };
        *self
            .positions
            .entry(order.symbol.clone())
            .or_insert(Decimal::ZERO) += delta;

        debug!(
            order_id,
            shares,
            %price,
            filled = order.filled_shares,
            status = %order.status,
            "paper fill"
        );
        Ok(order.clone())
    }

    fn next_order_id(&self) -> String {
        format!("paper-{:06}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Shares of `symbol` held, less what open sells already commit
    fn available(&self, symbol: &str) -> Decimal {
        let committed: u64 = self
            .orders
            .iter()
            .filter(|o| o.symbol == symbol && o.side == OrderSide::Sell && o.status.is_active())
            .map(|o| o.remaining())
            .sum();
        self.position(symbol) - Decimal::from(committed)
    }
}

#[async_trait]
impl BrokerClient for PaperBroker {
    fn kind(&self) -> BrokerKind {
        BrokerKind::Paper
    }

    async fn get_quotes(&self, symbols: &[String]) -> Result<Vec<Quote>> {
        if let Some(live) = &self.market_data {
            return live.get_quotes(symbols).await;
        }
        let unique: HashSet<&String> = symbols.iter().collect();
        Ok(unique
            .into_iter()
            .filter_map(|s| self.quotes.get(s).map(|q| q.clone()))
            .collect())
    }

    async fn get_market_hours(&self) -> Result<MarketHours> {
        match &self.market_data {
            Some(live) => live.get_market_hours().await,
            None => Ok(*self.hours.read().await),
        }
    }

    async fn get_account(&self) -> Result<AccountSnapshot> {
        match &self.market_data {
            Some(live) => live.get_account().await,
            None => Ok(*self.account.read().await),
        }
    }

    async fn get_position_quantity(&self, symbol: &str) -> Result<Decimal> {
        Ok(self.position(symbol))
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<Order> {
        if self.untradable.contains_key(&request.symbol) {
            return Err(RulebotError::OrderRejected {
                kind: RejectionKind::NotTradable,
                message: format!("asset {} is not tradable", request.symbol),
            });
        }
        if request.shares == 0 {
            return Err(RulebotError::OrderRejected {
                kind: RejectionKind::Other,
                message: "qty must be > 0".to_string(),
            });
        }
        if request.side == OrderSide::Sell
            && self.available(&request.symbol) < Decimal::from(request.shares)
        {
            return Err(RulebotError::OrderRejected {
                kind: RejectionKind::InsufficientShares,
                message: format!(
                    "insufficient qty available for order (requested: {}, available: {})",
                    request.shares,
                    self.available(&request.symbol)
                ),
            });
        }

        let order = Order {
            id: self.next_order_id(),
            client_order_id: Some(request.client_order_id.clone()),
            symbol: request.symbol.clone(),
            side: request.side,
            shares: request.shares,
            filled_shares: 0,
            avg_fill_price: None,
            limit_price: Some(request.limit_price),
            status: OrderStatus::Pending,
            updated_at: Utc::now(),
        };
        let order_id = order.id.clone();
        self.orders.insert(order_id.clone(), order.clone());
        info!(
            order_id = %order_id,
            symbol = %request.symbol,
            side = %request.side,
            shares = request.shares,
            limit = %request.limit_price,
            "paper order accepted"
        );

        match self.fill_mode {
            FillMode::Immediate => self.fill(&order_id, request.shares, request.limit_price),
            FillMode::Manual => Ok(order),
        }
    }

    async fn cancel_order(&self, order_id: &str) -> Result<bool> {
        if self.refuse_cancels.contains_key(order_id) {
            return Ok(false);
        }
        let Some(mut order) = self.orders.get_mut(order_id) else {
            return Ok(false);
        };
        if !order.status.is_active() {
            return Ok(false);
        }
        order.status = OrderStatus::Cancelled;
        order.updated_at = Utc::now();
        debug!(order_id, filled = order.filled_shares, "paper order cancelled");
        Ok(true)
    }

    async fn get_order(&self, order_id: &str) -> Result<Option<Order>> {
        Ok(self.order(order_id))
    }
}
