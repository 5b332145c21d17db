use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info, instrument};

use crate::domain::{Frequency, Rule, RuleId, Trade, TrailingStop};
use crate::error::{Result, RulebotError};
use crate::persistence::RuleStore;

/// PostgreSQL storage adapter
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

const TRADE_COLUMNS: &str = r#"
    id, rule_id, symbol, buy_order_id, sell_order_id, buy_price, buy_date,
    sell_price, sell_date, bought_shares, sold_shares, risk_value, profit_value,
    target_reached, completed, created_at, updated_at
"#;

fn shares_to_db(shares: u64) -> Result<i64> {
    i64::try_from(shares)
        .map_err(|_| RulebotError::Validation(format!("share count {} out of range", shares)))
}

fn shares_from_db(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn rule_from_row(r: &PgRow) -> Result<Rule> {
    let frequency: String = r.get("frequency");
    Ok(Rule {
        id: r.get("id"),
        name: r.get("name"),
        symbol: r.get("symbol"),
        exchange: r.get("exchange"),
        frequency: frequency.parse().map_err(RulebotError::Validation)?,
        entry: r.get("entry_predicate"),
        exit: r.get("exit_predicate"),
        shares: shares_from_db(r.get("shares")),
        risk_pct: r.get("risk_pct"),
        profit_pct: r.get("profit_pct"),
        trailing: TrailingStop {
            enabled: r.get("trailing_enabled"),
            target_pct: r.get("trailing_target_pct"),
            risk_pct_after_target: r.get("trailing_risk_pct"),
        },
        hold_overnight: r.get("hold_overnight"),
        disable_after_sold: r.get("disable_after_sold"),
        enabled: r.get("enabled"),
        updated_at: r.get("updated_at"),
    })
}

fn trade_from_row(r: &PgRow) -> Trade {
    Trade {
        id: Some(r.get("id")),
        rule_id: r.get("rule_id"),
        symbol: r.get("symbol"),
        buy_order_id: r.get("buy_order_id"),
        sell_order_id: r.get("sell_order_id"),
        buy_price: r.get("buy_price"),
        buy_date: r.get("buy_date"),
        sell_price: r.get("sell_price"),
        sell_date: r.get("sell_date"),
        bought_shares: shares_from_db(r.get("bought_shares")),
        sold_shares: shares_from_db(r.get("sold_shares")),
        risk_value: r.get("risk_value"),
        profit_value: r.get("profit_value"),
        target_reached: r.get("target_reached"),
        completed: r.get("completed"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    }
}

impl PostgresStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RuleStore for PostgresStore {
    #[instrument(skip(self))]
    async fn get_active_rules(&self, frequency: Frequency) -> Result<Vec<Rule>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, symbol, exchange, frequency, entry_predicate, exit_predicate,
                   shares, risk_pct, profit_pct, trailing_enabled, trailing_target_pct,
                   trailing_risk_pct, hold_overnight, disable_after_sold, enabled, updated_at
            FROM rules
            WHERE enabled AND frequency = $1
            ORDER BY id
            "#,
        )
        .bind(frequency.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(rule_from_row).collect()
    }

    async fn get_incomplete_trades(&self) -> Result<Vec<Trade>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM trades WHERE NOT completed ORDER BY rule_id",
            TRADE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(trade_from_row).collect())
    }

    async fn get_trade_for_rule(&self, rule_id: RuleId) -> Result<Option<Trade>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM trades WHERE rule_id = $1 AND NOT completed",
            TRADE_COLUMNS
        ))
        .bind(rule_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(trade_from_row))
    }

    #[instrument(skip(self, rule), fields(rule_id = rule.id))]
    async fn save_rule(&self, rule: &Rule) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE rules SET
                enabled = $2,
                entry_predicate = $3,
                exit_predicate = $4,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(rule.id)
        .bind(rule.enabled)
        .bind(&rule.entry)
        .bind(&rule.exit)
        .execute(&self.pool)
        .await?;

        debug!(rule_id = rule.id, enabled = rule.enabled, "rule saved");
        Ok(())
    }

    #[instrument(skip(self, trade), fields(rule_id = trade.rule_id))]
    async fn save_trade(&self, trade: &Trade) -> Result<Trade> {
        let bought = shares_to_db(trade.bought_shares)?;
        let sold = shares_to_db(trade.sold_shares)?;

        let row = match trade.id {
            None => {
                sqlx::query(&format!(
                    r#"
                    INSERT INTO trades (
                        rule_id, symbol, buy_order_id, sell_order_id, buy_price, buy_date,
                        sell_price, sell_date, bought_shares, sold_shares, risk_value,
                        profit_value, target_reached, completed, created_at, updated_at
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
                    RETURNING {}
                    "#,
                    TRADE_COLUMNS
                ))
                .bind(trade.rule_id)
                .bind(&trade.symbol)
                .bind(&trade.buy_order_id)
                .bind(&trade.sell_order_id)
                .bind(trade.buy_price)
                .bind(trade.buy_date)
                .bind(trade.sell_price)
                .bind(trade.sell_date)
                .bind(bought)
                .bind(sold)
                .bind(trade.risk_value)
                .bind(trade.profit_value)
                .bind(trade.target_reached)
                .bind(trade.completed)
                .bind(trade.created_at)
                .bind(trade.updated_at)
                .fetch_one(&self.pool)
                .await?
            }
            Some(id) => {
                sqlx::query(&format!(
                    r#"
                    UPDATE trades SET
                        buy_order_id = $2,
                        sell_order_id = $3,
                        buy_price = $4,
                        buy_date = $5,
                        sell_price = $6,
                        sell_date = $7,
                        bought_shares = $8,
                        sold_shares = $9,
                        risk_value = $10,
                        profit_value = $11,
                        target_reached = $12,
                        completed = $13,
                        updated_at = $14
                    WHERE id = $1
                    RETURNING {}
                    "#,
                    TRADE_COLUMNS
                ))
                .bind(id)
                .bind(&trade.buy_order_id)
                .bind(&trade.sell_order_id)
                .bind(trade.buy_price)
                .bind(trade.buy_date)
                .bind(trade.sell_price)
                .bind(trade.sell_date)
                .bind(bought)
                .bind(sold)
                .bind(trade.risk_value)
                .bind(trade.profit_value)
                .bind(trade.target_reached)
                .bind(trade.completed)
                .bind(trade.updated_at)
                .fetch_one(&self.pool)
                .await?
            }
        };

        let saved = trade_from_row(&row);
        debug!(trade_id = ?saved.id, completed = saved.completed, "trade saved");
        Ok(saved)
    }

    async fn remove_trade(&self, trade: &Trade) -> Result<()> {
        let Some(id) = trade.id else {
            return Ok(());
        };
        sqlx::query("DELETE FROM trades WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        debug!(trade_id = id, rule_id = trade.rule_id, "trade removed");
        Ok(())
    }
}
