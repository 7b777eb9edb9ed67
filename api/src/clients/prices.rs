use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use collector::{PriceOracle, UpstreamError};
use domain::parse_decimal;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::warn;

use super::{classify, read_json};

/// CoinGecko `simple/price` 報價，附 TTL 快取；上游失敗時退回過期快取。
#[derive(Clone)]
pub struct CoingeckoPriceOracle {
    client: Client,
    api_base: String,
    ids: HashMap<String, String>,
    cache: Arc<RwLock<HashMap<String, CachedPrice>>>,
    ttl: Duration,
}

#[derive(Clone, Copy)]
struct CachedPrice {
    price: Decimal,
    fetched_at: Instant,
}

impl CoingeckoPriceOracle {
    pub fn new(client: Client, api_base: &str, ids: HashMap<String, String>, ttl: Duration) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            ids,
            cache: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    fn coingecko_id(&self, symbol: &str) -> Option<String> {
        if let Some(mapped) = self.ids.get(symbol) {
            return Some(mapped.clone());
        }
        let id = match symbol {
            "ETH" | "WETH" => "ethereum",
            "BTC" => "bitcoin",
            "WBTC" => "wrapped-bitcoin",
            "BNB" => "binancecoin",
            "SOL" => "solana",
            "USDC" => "usd-coin",
            "USDT" => "tether",
            "DAI" => "dai",
            _ => return None,
        };
        Some(id.to_string())
    }

    async fn cached_price(&self, symbol: &str) -> Option<(Decimal, bool)> {
        let cache = self.cache.read().await;
        cache.get(symbol).map(|entry| {
            let fresh = entry.fetched_at.elapsed() <= self.ttl;
            (entry.price, fresh)
        })
    }

    async fn store_price(&self, symbol: &str, price: Decimal) {
        let mut cache = self.cache.write().await;
        cache.insert(
            symbol.to_string(),
            CachedPrice {
                price,
                fetched_at: Instant::now(),
            },
        );
    }

    async fn fetch(&self, id: &str) -> Result<Option<Decimal>, UpstreamError> {
        let resp = self
            .client
            .get(format!("{}/simple/price", self.api_base))
            .query(&[("ids", id), ("vs_currencies", "usd")])
            .send()
            .await
            .map_err(classify)?;
        let body = read_json(resp).await?;
        Ok(body
            .get(id)
            .and_then(|entry| entry.get("usd"))
            .and_then(parse_decimal)
            .filter(|price| *price > Decimal::ZERO))
    }
}

#[async_trait]
impl PriceOracle for CoingeckoPriceOracle {
    async fn price_usd(&self, symbol: &str) -> Result<Option<Decimal>, UpstreamError> {
        let symbol = symbol.trim().to_uppercase();
        let stale = match self.cached_price(&symbol).await {
            Some((price, true)) => return Ok(Some(price)),
            Some((price, false)) => Some(price),
            None => None,
        };
        let Some(id) = self.coingecko_id(&symbol) else {
            return Ok(None);
        };

        match self.fetch(&id).await {
            Ok(Some(price)) => {
                self.store_price(&symbol, price).await;
                Ok(Some(price))
            }
            Ok(None) => Ok(stale),
            Err(err) => match stale {
                Some(price) => {
                    warn!(symbol = %symbol, error = %err, "coingecko failed, serving stale price");
                    Ok(Some(price))
                }
                None => Err(err),
            },
        }
    }
}

/// 讀取 `{"<id>": {"usd": ...}}` 形式的回應。
pub(crate) fn usd_quotes(body: &Value) -> HashMap<String, Decimal> {
    body.as_object()
        .map(|entries| {
            entries
                .iter()
                .filter_map(|(id, quote)| {
                    let price = quote.get("usd").and_then(parse_decimal)?;
                    Some((id.clone(), price))
                })
                .collect()
        })
        .unwrap_or_default()
}
