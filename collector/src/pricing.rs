use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::{error::UpstreamError, upstream::PriceOracle};

/// 以 1:1 計價的穩定幣。
pub const STABLECOINS: [&str; 5] = ["USDT", "USDC", "USD1", "BUSD", "DAI"];

pub fn is_stablecoin(symbol: &str) -> bool {
    STABLECOINS
        .iter()
        .any(|stable| stable.eq_ignore_ascii_case(symbol.trim()))
}

/// 設定檔或預設的固定價格表。
#[derive(Clone, Debug)]
pub struct StaticPriceOracle {
    prices: HashMap<String, Decimal>,
}

impl StaticPriceOracle {
    pub fn new(prices: HashMap<String, Decimal>) -> Self {
        let prices = prices
            .into_iter()
            .map(|(symbol, price)| (symbol.trim().to_uppercase(), price))
            .collect();
        Self { prices }
    }

    pub fn with_defaults(overrides: HashMap<String, Decimal>) -> Self {
        let mut prices = default_prices();
        for (symbol, price) in overrides {
            prices.insert(symbol.trim().to_uppercase(), price);
        }
        Self { prices }
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

fn default_prices() -> HashMap<String, Decimal> {
    HashMap::from([
        ("BTC".to_string(), Decimal::from(65_000)),
        ("ETH".to_string(), Decimal::from(3_500)),
        ("BNB".to_string(), Decimal::from(600)),
        ("SOL".to_string(), Decimal::from(150)),
    ])
}

#[async_trait]
impl PriceOracle for StaticPriceOracle {
    async fn price_usd(&self, symbol: &str) -> Result<Option<Decimal>, UpstreamError> {
        Ok(self.prices.get(&symbol.trim().to_uppercase()).copied())
    }
}

#[derive(Clone)]
pub struct FallbackPriceOracle<P, F>
where
    P: PriceOracle,
    F: PriceOracle,
{
    primary: Arc<P>,
    fallback: Arc<F>,
}

impl<P, F> FallbackPriceOracle<P, F>
where
    P: PriceOracle,
    F: PriceOracle,
{
    pub fn new(primary: Arc<P>, fallback: Arc<F>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl<P, F> PriceOracle for FallbackPriceOracle<P, F>
where
    P: PriceOracle,
    F: PriceOracle,
{
    async fn price_usd(&self, symbol: &str) -> Result<Option<Decimal>, UpstreamError> {
        match self.primary.price_usd(symbol).await {
            Ok(Some(price)) if price > Decimal::ZERO => return Ok(Some(price)),
            Ok(_) => debug!(%symbol, "primary oracle has no price, trying fallback"),
            Err(err) => warn!(%symbol, error = %err, "primary oracle failed, trying fallback"),
        }
        self.fallback.price_usd(symbol).await
    }
}

/// 計算 USD 價值；價格未知時回傳 `None`，不會以 0 代替。
pub async fn usd_value(
    oracle: &dyn PriceOracle,
    symbol: &str,
    amount: Decimal,
) -> Option<Decimal> {
    if amount.is_zero() {
        return Some(Decimal::ZERO);
    }
    if is_stablecoin(symbol) {
        return Some(amount);
    }
    match oracle.price_usd(symbol).await {
        Ok(Some(price)) => match amount.checked_mul(price) {
            Some(value) => Some(value),
            None => {
                warn!(%symbol, %amount, %price, "usd value overflowed, leaving it empty");
                None
            }
        },
        Ok(None) => {
            debug!(%symbol, "no usd price available");
            None
        }
        Err(err) => {
            warn!(%symbol, error = %err, "price lookup failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    struct BrokenOracle;

    #[async_trait]
    impl PriceOracle for BrokenOracle {
        async fn price_usd(&self, _symbol: &str) -> Result<Option<Decimal>, UpstreamError> {
            Err(UpstreamError::Timeout("oracle".into()))
        }
    }

    #[tokio::test]
    async fn stablecoins_pass_through() {
        let oracle = StaticPriceOracle::new(HashMap::new());
        let amount = Decimal::from_str("1250.75").unwrap();
        assert_eq!(usd_value(&oracle, "usdt", amount).await, Some(amount));
        assert_eq!(usd_value(&oracle, "DAI", amount).await, Some(amount));
    }

    #[tokio::test]
    async fn unknown_price_is_null_not_zero() {
        let oracle = StaticPriceOracle::new(HashMap::new());
        assert_eq!(usd_value(&oracle, "DOGE", Decimal::from(10)).await, None);
        assert_eq!(
            usd_value(&BrokenOracle, "BTC", Decimal::from(1)).await,
            None
        );
    }

    #[tokio::test]
    async fn overflowing_usd_value_is_null() {
        let oracle = StaticPriceOracle::new(HashMap::from([(
            "PEPE".to_string(),
            Decimal::from(1_000_000_000),
        )]));
        let amount = Decimal::from_str("100000000000000000000").unwrap();
        let outcome = tokio::spawn(async move { usd_value(&oracle, "PEPE", amount).await }).await;
        assert_eq!(outcome.unwrap(), None);
    }

    #[tokio::test]
    async fn zero_balance_is_zero_usd() {
        assert_eq!(
            usd_value(&BrokenOracle, "DOGE", Decimal::ZERO).await,
            Some(Decimal::ZERO)
        );
    }

    #[tokio::test]
    async fn fallback_oracle_uses_secondary_on_error() {
        let oracle = FallbackPriceOracle::new(
            Arc::new(BrokenOracle),
            Arc::new(StaticPriceOracle::with_defaults(HashMap::new())),
        );
        let value = usd_value(&oracle, "eth", Decimal::from(2)).await;
        assert_eq!(value, Some(Decimal::from(7_000)));
    }

    #[test]
    fn overrides_replace_defaults() {
        let oracle = StaticPriceOracle::with_defaults(HashMap::from([(
            "btc".to_string(),
            Decimal::from(70_000),
        )]));
        assert_eq!(oracle.prices.get("BTC"), Some(&Decimal::from(70_000)));
        assert_eq!(oracle.len(), 4);
    }
}
