use async_trait::async_trait;
use collector::{PortfolioDirectory, StoreError};
use domain::PortfolioMaster;
use sqlx::PgPool;

use super::store_error;

#[derive(Clone)]
pub struct PostgresPortfolioRepository {
    pool: PgPool,
}

impl PostgresPortfolioRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PortfolioDirectory for PostgresPortfolioRepository {
    async fn register_if_absent(&self, portfolio: &PortfolioMaster) -> Result<bool, StoreError> {
        let inserted: Option<i64> = sqlx::query_scalar(
            "INSERT INTO portfolios (fund_name, fund_alias, ot_symbol, status, inception_time)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (fund_name) DO NOTHING
             RETURNING id",
        )
        .bind(&portfolio.fund_name)
        .bind(&portfolio.fund_alias)
        .bind(&portfolio.ot_symbol)
        .bind(&portfolio.status)
        .bind(portfolio.inception_time)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;
        Ok(inserted.is_some())
    }
}
