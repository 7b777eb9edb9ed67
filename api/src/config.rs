use std::{collections::HashMap, env, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use collector::{default_crypto_pairs, default_fiat_pairs, FanOut, SchedulerConfig};
use domain::RatePair;
use rust_decimal::Decimal;

#[derive(Clone, Debug)]
pub struct OneTokenConfig {
    pub base_url: String,
    pub api_key: String,
    pub secret: String,
}

#[derive(Clone, Debug)]
pub struct CeffuConfig {
    pub base_url: String,
    pub api_key: String,
    pub secret_key: String,
    pub wallet_ids: Vec<String>,
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    pub frontend_origins: Vec<String>,
    pub onetoken: Option<OneTokenConfig>,
    pub ceffu: Option<CeffuConfig>,
    pub fiat_rate_api_base: String,
    pub coingecko_api_base: String,
    pub fiat_pairs: Vec<RatePair>,
    pub crypto_pairs: Vec<RatePair>,
    pub token_prices: HashMap<String, Decimal>,
    pub token_price_ids: HashMap<String, String>,
    pub price_cache_ttl: Duration,
    pub upstream_timeout: Duration,
    pub public_api_timeout: Duration,
    pub collection_offset: Duration,
    pub collection_retry_backoff: Duration,
    pub scheduler_shutdown_timeout: Duration,
    pub scheduler_enabled: bool,
    pub collection_parallel: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let collection_offset = parse_duration_seconds("COLLECTION_OFFSET_SECS", 300);
        if collection_offset >= Duration::from_secs(3600) {
            anyhow::bail!("COLLECTION_OFFSET_SECS must be below 3600");
        }

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .context("DATABASE_URL must be set for the collection service")?,
            port: env::var("PORT")
                .unwrap_or_else(|_| "8081".to_string())
                .parse()
                .context("PORT must be a valid u16")?,
            frontend_origins: parse_origins(),
            onetoken: parse_onetoken(),
            ceffu: parse_ceffu(),
            fiat_rate_api_base: env::var("FIAT_RATE_API_BASE")
                .unwrap_or_else(|_| "https://api.exchangerate-api.com/v4".to_string()),
            coingecko_api_base: env::var("COINGECKO_API_BASE")
                .unwrap_or_else(|_| "https://api.coingecko.com/api/v3".to_string()),
            fiat_pairs: parse_fiat_pairs("RATE_FIAT_PAIRS").unwrap_or_else(default_fiat_pairs),
            crypto_pairs: parse_crypto_assets("RATE_CRYPTO_ASSETS")
                .unwrap_or_else(default_crypto_pairs),
            token_prices: parse_token_prices("TOKEN_PRICES"),
            token_price_ids: parse_token_price_ids("TOKEN_PRICE_IDS"),
            price_cache_ttl: parse_duration_seconds("PRICE_CACHE_TTL_SECS", 60),
            upstream_timeout: parse_duration_seconds("UPSTREAM_TIMEOUT_SECS", 30),
            public_api_timeout: parse_duration_seconds("PUBLIC_API_TIMEOUT_SECS", 10),
            collection_offset,
            collection_retry_backoff: parse_duration_seconds("COLLECTION_RETRY_BACKOFF_SECS", 300),
            scheduler_shutdown_timeout: parse_duration_seconds(
                "SCHEDULER_SHUTDOWN_TIMEOUT_SECS",
                120,
            ),
            scheduler_enabled: parse_bool("SCHEDULER_ENABLED", true),
            collection_parallel: parse_bool("COLLECTION_PARALLEL", false),
        })
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            offset: self.collection_offset,
            retry_backoff: self.collection_retry_backoff,
            shutdown_timeout: self.scheduler_shutdown_timeout,
            ..SchedulerConfig::default()
        }
    }

    pub fn fan_out(&self) -> FanOut {
        if self.collection_parallel {
            FanOut::Parallel
        } else {
            FanOut::Sequential
        }
    }
}

fn parse_onetoken() -> Option<OneTokenConfig> {
    let api_key = non_empty_var("ONETOKEN_API_KEY")?;
    let secret = non_empty_var("ONETOKEN_SECRET")?;
    Some(OneTokenConfig {
        base_url: env::var("ONETOKEN_BASE_URL")
            .unwrap_or_else(|_| "https://cdb.1tokentrade.cn".to_string()),
        api_key,
        secret,
    })
}

fn parse_ceffu() -> Option<CeffuConfig> {
    let api_key = non_empty_var("CEFFU_API_KEY")?;
    let secret_key = non_empty_var("CEFFU_SECRET_KEY")?;
    Some(CeffuConfig {
        base_url: env::var("CEFFU_BASE_URL")
            .unwrap_or_else(|_| "https://open-api.ceffu.com".to_string()),
        api_key,
        secret_key,
        wallet_ids: env::var("CEFFU_WALLET_IDS")
            .map(|raw| split_list(&raw))
            .unwrap_or_default(),
    })
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_origins() -> Vec<String> {
    if let Ok(list) = env::var("FRONTEND_ORIGINS") {
        split_list(&list)
    } else {
        vec!["http://localhost:3000".to_string()]
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .filter_map(|item| {
            let trimmed = item.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
        .collect()
}

fn parse_duration_seconds(key: &str, default: u64) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(default))
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes" | "on"))
        .unwrap_or(default)
}

fn parse_fiat_pairs(key: &str) -> Option<Vec<RatePair>> {
    env::var(key).ok().map(|raw| fiat_pairs_from(&raw))
}

/// `USD/CNY=7.2,USD/EUR=0.92`
fn fiat_pairs_from(raw: &str) -> Vec<RatePair> {
    raw.split(',')
        .filter_map(|item| {
            let (pair, fallback) = item.trim().split_once('=')?;
            let (base, quote) = pair.split_once('/')?;
            let fallback = positive_decimal(fallback)?;
            if base.trim().is_empty() || quote.trim().is_empty() {
                return None;
            }
            Some(RatePair::new(base, quote, fallback))
        })
        .collect()
}

fn parse_crypto_assets(key: &str) -> Option<Vec<RatePair>> {
    env::var(key).ok().map(|raw| crypto_assets_from(&raw))
}

/// `BTC:bitcoin=65000,ETH:ethereum=3500`，報價一律對 USD。
fn crypto_assets_from(raw: &str) -> Vec<RatePair> {
    raw.split(',')
        .filter_map(|item| {
            let (asset, fallback) = item.trim().split_once('=')?;
            let (symbol, id) = asset.split_once(':')?;
            let fallback = positive_decimal(fallback)?;
            if symbol.trim().is_empty() || id.trim().is_empty() {
                return None;
            }
            Some(RatePair::new(symbol, "USD", fallback).with_source_id(&id.trim().to_lowercase()))
        })
        .collect()
}

/// 只接受大於 0 的備援值。
fn positive_decimal(raw: &str) -> Option<Decimal> {
    Decimal::from_str(raw.trim())
        .ok()
        .filter(|value| *value > Decimal::ZERO)
}

fn parse_token_prices(key: &str) -> HashMap<String, Decimal> {
    let raw = match env::var(key) {
        Ok(v) => v,
        Err(_) => return HashMap::new(),
    };
    token_prices_from(&raw)
}

fn token_prices_from(raw: &str) -> HashMap<String, Decimal> {
    raw.split(',')
        .filter_map(|item| {
            let (symbol, value) = item.split_once('=')?;
            let price = Decimal::from_str(value.trim()).ok()?;
            let symbol = symbol.trim().to_uppercase();
            if symbol.is_empty() {
                return None;
            }
            Some((symbol, price))
        })
        .collect()
}

fn parse_token_price_ids(key: &str) -> HashMap<String, String> {
    let raw = match env::var(key) {
        Ok(v) => v,
        Err(_) => return HashMap::new(),
    };

    raw.split(',')
        .filter_map(|item| {
            let (symbol, id) = item.split_once(':')?;
            let symbol = symbol.trim().to_uppercase();
            let id = id.trim().to_lowercase();
            if symbol.is_empty() || id.is_empty() {
                return None;
            }
            Some((symbol, id))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fiat_pairs_and_skips_garbage() {
        let pairs = fiat_pairs_from("usd/cny=7.2, USD/EUR=0.92,broken,USD/=1,USD/JPY=abc");
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].key(), "USD/CNY");
        assert_eq!(pairs[0].fallback, Decimal::new(72, 1));
        assert_eq!(pairs[1].key(), "USD/EUR");
    }

    #[test]
    fn parses_crypto_assets_with_source_ids() {
        let pairs = crypto_assets_from("btc:Bitcoin=65000,SOL:solana=150,:x=1");
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].key(), "BTC/USD");
        assert_eq!(pairs[0].source_id.as_deref(), Some("bitcoin"));
        assert_eq!(pairs[1].fallback, Decimal::from(150));
    }

    #[test]
    fn non_positive_fallbacks_are_dropped() {
        let pairs = fiat_pairs_from("USD/CNY=0,USD/EUR=-0.9,USD/JPY=149.5");
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].key(), "USD/JPY");

        let assets = crypto_assets_from("BTC:bitcoin=0,ETH:ethereum=-1,SOL:solana=150");
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].key(), "SOL/USD");
    }

    #[test]
    fn parses_token_prices_as_decimals() {
        let prices = token_prices_from("eth=3500.5, BNB=600,bad=x");
        assert_eq!(prices.len(), 2);
        assert_eq!(prices["ETH"], Decimal::from_str("3500.5").unwrap());
    }

    #[test]
    fn split_list_drops_blanks() {
        assert_eq!(split_list(" a, ,b,"), vec!["a".to_string(), "b".to_string()]);
    }
}
