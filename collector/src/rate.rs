use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    truncate_to_hour, RatePair, RatePoint, SnapshotKind, SnapshotRecord, FALLBACK_SOURCE_TAG,
};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    contract::{CollectionResult, Collector, CollectorIdentity},
    error::{StoreError, ValidationError},
    store::SnapshotStore,
    upstream::RateSource,
};

pub fn default_fiat_pairs() -> Vec<RatePair> {
    vec![
        RatePair::new("USD", "CNY", Decimal::new(72, 1)),
        RatePair::new("USD", "EUR", Decimal::new(92, 2)),
        RatePair::new("USD", "JPY", Decimal::new(1495, 1)),
    ]
}

pub fn default_crypto_pairs() -> Vec<RatePair> {
    vec![
        RatePair::new("BTC", "USD", Decimal::from(65_000)).with_source_id("bitcoin"),
        RatePair::new("ETH", "USD", Decimal::from(3_500)).with_source_id("ethereum"),
        RatePair::new("BNB", "USD", Decimal::from(600)).with_source_id("binancecoin"),
        RatePair::new("USDT", "USD", Decimal::ONE).with_source_id("tether"),
        RatePair::new("USDC", "USD", Decimal::ONE).with_source_id("usd-coin"),
    ]
}

struct RatePortion {
    source: Arc<dyn RateSource>,
    pairs: Vec<RatePair>,
}

/// 法幣與加密貨幣匯率。每個設定的 pair 一定會產出一筆，上游失敗時以靜態值補上。
pub struct RateCollector {
    name: String,
    portions: Vec<RatePortion>,
    store: Arc<dyn SnapshotStore>,
}

impl RateCollector {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            name: "rate".to_string(),
            portions: Vec::new(),
            store,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_source(mut self, source: Arc<dyn RateSource>, pairs: Vec<RatePair>) -> Self {
        if !pairs.is_empty() {
            self.portions.push(RatePortion { source, pairs });
        }
        self
    }

    pub fn pair_count(&self) -> usize {
        self.portions.iter().map(|portion| portion.pairs.len()).sum()
    }

    async fn collect_portion(&self, portion: &RatePortion, timestamp: DateTime<Utc>) -> Vec<RatePoint> {
        let snapshot_at = truncate_to_hour(timestamp);
        let tag = portion.source.source_tag().to_string();
        let fetched = match portion.source.fetch(&portion.pairs).await {
            Ok(rates) => Some(rates),
            Err(err) => {
                warn!(source = %tag, error = %err, pairs = portion.pairs.len(), "rate source failed, using fallback table");
                None
            }
        };

        portion
            .pairs
            .iter()
            .map(|pair| {
                let live = fetched
                    .as_ref()
                    .and_then(|rates| rates.get(&pair.key()))
                    .copied()
                    .filter(|rate| *rate > Decimal::ZERO);
                let (rate, source_tag) = match live {
                    Some(rate) => (rate, tag.clone()),
                    None => {
                        if fetched.is_some() {
                            warn!(source = %tag, pair = %pair.key(), "pair missing from response, using fallback");
                        }
                        (pair.fallback, FALLBACK_SOURCE_TAG.to_string())
                    }
                };
                RatePoint {
                    base: pair.base.clone(),
                    quote: pair.quote.clone(),
                    rate,
                    source_tag,
                    snapshot_at,
                }
            })
            .collect()
    }
}

impl CollectorIdentity for RateCollector {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "RateCollector"
    }

    fn description(&self) -> &'static str {
        "Fiat and crypto exchange rates with static fallback"
    }
}

#[async_trait]
impl Collector for RateCollector {
    type Item = RatePoint;

    async fn collect(&self, timestamp: DateTime<Utc>) -> CollectionResult<RatePoint> {
        let mut items = Vec::with_capacity(self.pair_count());
        for portion in &self.portions {
            items.extend(self.collect_portion(portion, timestamp).await);
        }
        let fallback = items.iter().filter(|point| point.is_fallback()).count();
        info!(pairs = items.len(), fallback, "exchange rates collected");
        CollectionResult::succeeded(items, timestamp)
    }

    fn validate(&self, item: &RatePoint) -> Result<(), ValidationError> {
        if item.base.is_empty() {
            return Err(ValidationError::MissingField("base"));
        }
        if item.quote.is_empty() {
            return Err(ValidationError::MissingField("quote"));
        }
        if item.rate <= Decimal::ZERO {
            return Err(ValidationError::NotPositive {
                field: "rate",
                value: item.rate,
            });
        }
        Ok(())
    }

    async fn save(&self, result: &CollectionResult<RatePoint>) -> Result<usize, StoreError> {
        let batch_id = Uuid::new_v4();
        let created_at = Utc::now();
        let records: Vec<SnapshotRecord> = result
            .items()
            .iter()
            .map(|item| SnapshotRecord {
                kind: SnapshotKind::ExchangeRate,
                subject_key: item.key(),
                value: item.rate,
                secondary_value: None,
                usd_value: None,
                source_tag: item.source_tag.clone(),
                snapshot_at: truncate_to_hour(item.snapshot_at),
                batch_id,
                attributes: json!({ "base": item.base, "quote": item.quote }),
                created_at,
            })
            .collect();
        if records.is_empty() {
            return Ok(0);
        }
        let ids = self.store.insert_batch(&records).await?;
        debug!(%batch_id, rows = ids.len(), "rate batch committed");
        Ok(ids.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{contract::ScheduledCollector, error::UpstreamError, store::InMemorySnapshotStore};
    use chrono::TimeZone;
    use std::collections::HashMap;

    struct FixedSource {
        tag: &'static str,
        outcome: Result<HashMap<String, Decimal>, UpstreamError>,
    }

    #[async_trait]
    impl RateSource for FixedSource {
        fn source_tag(&self) -> &str {
            self.tag
        }

        async fn fetch(&self, _pairs: &[RatePair]) -> Result<HashMap<String, Decimal>, UpstreamError> {
            self.outcome.clone()
        }
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
    }

    fn down(tag: &'static str) -> Arc<dyn RateSource> {
        Arc::new(FixedSource {
            tag,
            outcome: Err(UpstreamError::Timeout(tag.to_string())),
        })
    }

    #[tokio::test]
    async fn every_pair_present_when_all_sources_fail() {
        let store = Arc::new(InMemorySnapshotStore::new());
        let collector = RateCollector::new(store.clone())
            .with_source(down("exchangerate-api.com"), default_fiat_pairs())
            .with_source(down("coingecko.com"), default_crypto_pairs());

        let result = collector.collect(at()).await;
        assert!(result.success());
        assert_eq!(result.count(), 8);
        assert!(result.items().iter().all(RatePoint::is_fallback));
        let cny = result
            .items()
            .iter()
            .find(|point| point.key() == "USD/CNY")
            .unwrap();
        assert_eq!(cny.rate, Decimal::new(72, 1));

        assert!(collector.run(at()).await);
        assert_eq!(store.records().await.len(), 8);
    }

    #[tokio::test]
    async fn missing_pair_falls_back_individually() {
        let live = Arc::new(FixedSource {
            tag: "exchangerate-api.com",
            outcome: Ok(HashMap::from([
                ("USD/CNY".to_string(), Decimal::new(7185, 3)),
                ("USD/EUR".to_string(), Decimal::new(91, 2)),
            ])),
        });
        let store = Arc::new(InMemorySnapshotStore::new());
        let collector = RateCollector::new(store).with_source(live, default_fiat_pairs());

        let result = collector.collect(at()).await;
        let tags: HashMap<String, String> = result
            .items()
            .iter()
            .map(|point| (point.key(), point.source_tag.clone()))
            .collect();
        assert_eq!(tags["USD/CNY"], "exchangerate-api.com");
        assert_eq!(tags["USD/EUR"], "exchangerate-api.com");
        assert_eq!(tags["USD/JPY"], FALLBACK_SOURCE_TAG);
    }

    #[tokio::test]
    async fn non_positive_rate_is_invalid() {
        let store = Arc::new(InMemorySnapshotStore::new());
        let collector = RateCollector::new(store);
        let point = RatePoint {
            base: "USD".into(),
            quote: "CNY".into(),
            rate: Decimal::ZERO,
            source_tag: "test".into(),
            snapshot_at: at(),
        };
        assert!(matches!(
            collector.validate(&point),
            Err(ValidationError::NotPositive { field: "rate", .. })
        ));
    }

    #[tokio::test]
    async fn zero_live_rate_is_replaced_by_fallback() {
        let live = Arc::new(FixedSource {
            tag: "coingecko.com",
            outcome: Ok(HashMap::from([("BTC/USD".to_string(), Decimal::ZERO)])),
        });
        let store = Arc::new(InMemorySnapshotStore::new());
        let collector = RateCollector::new(store).with_source(
            live,
            vec![RatePair::new("BTC", "USD", Decimal::from(65_000)).with_source_id("bitcoin")],
        );
        let result = collector.collect(at()).await;
        assert_eq!(result.items()[0].rate, Decimal::from(65_000));
        assert!(result.items()[0].is_fallback());
    }
}
