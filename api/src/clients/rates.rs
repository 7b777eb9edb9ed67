use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use collector::{RateSource, UpstreamError};
use domain::{parse_decimal, RatePair};
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::Value;

use super::{classify, prices::usd_quotes, read_json};

/// 公開法幣匯率 API：`GET {base}/latest/{BASE}` 回傳 `{"rates": {"CNY": 7.2, ...}}`。
#[derive(Clone)]
pub struct ExchangeRateApiSource {
    client: Client,
    api_base: String,
}

impl ExchangeRateApiSource {
    pub fn new(client: Client, api_base: &str) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl RateSource for ExchangeRateApiSource {
    fn source_tag(&self) -> &str {
        "exchangerate-api.com"
    }

    async fn fetch(&self, pairs: &[RatePair]) -> Result<HashMap<String, Decimal>, UpstreamError> {
        let bases: BTreeSet<&str> = pairs.iter().map(|pair| pair.base.as_str()).collect();
        let mut rates = HashMap::new();
        for base in bases {
            let resp = self
                .client
                .get(format!("{}/latest/{}", self.api_base, base))
                .send()
                .await
                .map_err(classify)?;
            let body = read_json(resp).await?;
            let table = quote_table(&body)?;
            for pair in pairs.iter().filter(|pair| pair.base == base) {
                if let Some(rate) = table.get(pair.quote.as_str()) {
                    rates.insert(pair.key(), *rate);
                }
            }
        }
        Ok(rates)
    }
}

fn quote_table(body: &Value) -> Result<HashMap<&str, Decimal>, UpstreamError> {
    let rates = body
        .get("rates")
        .and_then(Value::as_object)
        .ok_or_else(|| UpstreamError::Malformed("rates table missing from response".into()))?;
    Ok(rates
        .iter()
        .filter_map(|(quote, value)| Some((quote.as_str(), parse_decimal(value)?)))
        .collect())
}

/// CoinGecko 批次報價；只處理有 `source_id` 且對 USD 報價的 pair。
#[derive(Clone)]
pub struct CoingeckoRateSource {
    client: Client,
    api_base: String,
}

impl CoingeckoRateSource {
    pub fn new(client: Client, api_base: &str) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl RateSource for CoingeckoRateSource {
    fn source_tag(&self) -> &str {
        "coingecko.com"
    }

    async fn fetch(&self, pairs: &[RatePair]) -> Result<HashMap<String, Decimal>, UpstreamError> {
        let ids: BTreeSet<&str> = pairs
            .iter()
            .filter(|pair| pair.quote == "USD")
            .filter_map(|pair| pair.source_id.as_deref())
            .collect();
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let joined = ids.into_iter().collect::<Vec<_>>().join(",");
        let resp = self
            .client
            .get(format!("{}/simple/price", self.api_base))
            .query(&[("ids", joined.as_str()), ("vs_currencies", "usd")])
            .send()
            .await
            .map_err(classify)?;
        let quotes = usd_quotes(&read_json(resp).await?);

        Ok(pairs
            .iter()
            .filter_map(|pair| {
                let id = pair.source_id.as_deref()?;
                quotes.get(id).map(|rate| (pair.key(), *rate))
            })
            .collect())
    }
}
