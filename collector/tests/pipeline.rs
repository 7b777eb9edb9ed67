use std::{collections::HashMap, str::FromStr, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use collector::{
    default_crypto_pairs, default_fiat_pairs, CollectionResult, Collector, CollectorFactory,
    CollectorIdentity, CollectorRegistry, CustodyApi, InMemorySnapshotStore, PortfolioApi,
    PortfolioCollector, RateCollector, RateSource, ScheduledCollector, Scheduler,
    SchedulerConfig, StaticPriceOracle, StoreError, UpstreamError, ValidationError,
    WalletCollector,
};
use domain::{CustodyAsset, CustodyWallet, PortfolioSummary, RatePair, SnapshotKind};
use rust_decimal::Decimal;
use serde_json::Value;

struct TimedOutPortfolioApi;

#[async_trait]
impl PortfolioApi for TimedOutPortfolioApi {
    async fn list_portfolios(&self) -> Result<Vec<PortfolioSummary>, UpstreamError> {
        Err(UpstreamError::Timeout("list-portfolio after 30s".into()))
    }

    async fn portfolio_detail(&self, _fund_name: &str) -> Result<Value, UpstreamError> {
        Err(UpstreamError::Timeout("get-portfolio-detail after 30s".into()))
    }
}

struct SingleWalletApi;

#[async_trait]
impl CustodyApi for SingleWalletApi {
    async fn list_wallets(&self) -> Result<Vec<CustodyWallet>, UpstreamError> {
        Ok(vec![CustodyWallet {
            wallet_id: "1001".into(),
            wallet_name: Some("treasury".into()),
        }])
    }

    async fn wallet_assets(&self, _wallet_id: &str) -> Result<Vec<CustodyAsset>, UpstreamError> {
        Ok(vec![
            CustodyAsset {
                coin_symbol: "BTC".into(),
                network: Some("BTC".into()),
                amount: Some(Decimal::from_str("0.5").unwrap()),
                available_amount: Some(Decimal::from_str("0.5").unwrap()),
                total_amount_with_mirror: Some(Decimal::from_str("0.75").unwrap()),
            },
            CustodyAsset {
                coin_symbol: "USDC".into(),
                network: Some("ETH".into()),
                amount: Some(Decimal::from(2_500)),
                available_amount: None,
                total_amount_with_mirror: None,
            },
        ])
    }
}

struct LiveRates {
    tag: &'static str,
}

#[async_trait]
impl RateSource for LiveRates {
    fn source_tag(&self) -> &str {
        self.tag
    }

    async fn fetch(&self, pairs: &[RatePair]) -> Result<HashMap<String, Decimal>, UpstreamError> {
        Ok(pairs
            .iter()
            .map(|pair| (pair.key(), pair.fallback + Decimal::ONE))
            .collect())
    }
}

/// collect 階段直接 panic 的 collector。
struct ExplodingCollector;

impl CollectorIdentity for ExplodingCollector {
    fn name(&self) -> &str {
        "exploding"
    }

    fn kind(&self) -> &'static str {
        "ExplodingCollector"
    }

    fn description(&self) -> &'static str {
        "panics while collecting"
    }
}

#[async_trait]
impl Collector for ExplodingCollector {
    type Item = u32;

    async fn collect(&self, _timestamp: DateTime<Utc>) -> CollectionResult<u32> {
        panic!("upstream client bug");
    }

    fn validate(&self, _item: &u32) -> Result<(), ValidationError> {
        Ok(())
    }

    async fn save(&self, result: &CollectionResult<u32>) -> Result<usize, StoreError> {
        Ok(result.count())
    }
}

fn pipeline(store: Arc<InMemorySnapshotStore>, with_exploding: bool) -> Arc<Scheduler> {
    let factory = move || -> anyhow::Result<Vec<Arc<dyn ScheduledCollector>>> {
        let portfolio: Arc<dyn ScheduledCollector> = Arc::new(PortfolioCollector::new(
            Arc::new(TimedOutPortfolioApi),
            store.clone(),
            store.clone(),
        ));
        let wallet: Arc<dyn ScheduledCollector> = Arc::new(WalletCollector::new(
            Arc::new(SingleWalletApi),
            Arc::new(StaticPriceOracle::with_defaults(HashMap::new())),
            store.clone(),
        ));
        let rate: Arc<dyn ScheduledCollector> = Arc::new(
            RateCollector::new(store.clone())
                .with_source(
                    Arc::new(LiveRates {
                        tag: "exchangerate-api.com",
                    }),
                    default_fiat_pairs(),
                )
                .with_source(Arc::new(LiveRates { tag: "coingecko.com" }), default_crypto_pairs()),
        );
        let mut collectors = vec![portfolio, wallet, rate];
        if with_exploding {
            collectors.push(Arc::new(ExplodingCollector));
        }
        Ok(collectors)
    };
    let factory: Arc<dyn CollectorFactory> = Arc::new(factory);
    Arc::new(Scheduler::new(
        Arc::new(CollectorRegistry::default()),
        factory,
        SchedulerConfig::default(),
    ))
}

fn hour() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 30, 14, 0, 0).unwrap()
}

#[tokio::test]
async fn failed_source_does_not_block_healthy_ones() {
    let store = Arc::new(InMemorySnapshotStore::new());
    let scheduler = pipeline(store.clone(), false);

    let results = scheduler
        .trigger(Some(hour() + chrono::Duration::minutes(5)))
        .await
        .unwrap();

    assert_eq!(results.get("portfolio"), Some(&false));
    assert_eq!(results.get("wallet"), Some(&true));
    assert_eq!(results.get("rate"), Some(&true));

    let stats = scheduler.stats().await;
    assert_eq!(stats.total_runs, 1);
    assert_eq!(stats.failed_runs, 1);
    assert_eq!(stats.last_run_success, Some(false));

    let records = store.records().await;
    assert!(records.iter().all(|record| record.snapshot_at == hour()));
    assert!(records
        .iter()
        .all(|record| record.kind != SnapshotKind::PortfolioProfit));

    let wallets: Vec<_> = records
        .iter()
        .filter(|record| record.kind == SnapshotKind::WalletAsset)
        .collect();
    assert_eq!(wallets.len(), 2);
    let btc = wallets
        .iter()
        .find(|record| record.subject_key == "1001:BTC:BTC")
        .unwrap();
    assert_eq!(btc.value, Decimal::from_str("0.75").unwrap());
    assert_eq!(btc.secondary_value, Some(Decimal::from_str("0.5").unwrap()));
    assert_eq!(btc.usd_value, Some(Decimal::from(48_750)));

    let rates = records
        .iter()
        .filter(|record| record.kind == SnapshotKind::ExchangeRate)
        .count();
    assert_eq!(rates, 8);
}

#[tokio::test]
async fn repeated_trigger_appends_rows() {
    let store = Arc::new(InMemorySnapshotStore::new());
    let scheduler = pipeline(store.clone(), false);

    scheduler.trigger(Some(hour())).await.unwrap();
    scheduler.trigger(Some(hour())).await.unwrap();

    let records = store.records().await;
    let usd_cny: Vec<_> = records
        .iter()
        .filter(|record| record.subject_key == "USD/CNY")
        .collect();
    assert_eq!(usd_cny.len(), 2);
    assert_ne!(usd_cny[0].batch_id, usd_cny[1].batch_id);
    assert_eq!(scheduler.stats().await.total_runs, 2);
}

#[tokio::test]
async fn panicking_collector_reports_false_and_others_still_run() {
    let store = Arc::new(InMemorySnapshotStore::new());
    let scheduler = pipeline(store.clone(), true);

    let results = scheduler.trigger(Some(hour())).await.unwrap();
    assert_eq!(results.len(), 4);
    assert_eq!(results.get("exploding"), Some(&false));
    assert_eq!(results.get("wallet"), Some(&true));
    assert_eq!(results.get("rate"), Some(&true));
    assert!(!store.records().await.is_empty());
}

#[tokio::test]
async fn store_outage_fails_every_writer() {
    let store = Arc::new(InMemorySnapshotStore::new());
    store.set_fail_writes(true);
    let scheduler = pipeline(store.clone(), false);

    let results = scheduler.trigger(Some(hour())).await.unwrap();
    assert!(results.values().all(|ok| !ok));
    assert!(store.records().await.is_empty());
}

#[tokio::test]
async fn collectors_are_listed_in_registration_order() {
    let store = Arc::new(InMemorySnapshotStore::new());
    let scheduler = pipeline(store, false);

    let report = scheduler.initialize().await.unwrap();
    assert!(!report.already_initialized);
    assert_eq!(report.collectors_count, 3);

    let listed: Vec<_> = scheduler
        .list_collectors()
        .await
        .into_iter()
        .map(|info| (info.name, info.kind))
        .collect();
    assert_eq!(
        listed,
        vec![
            ("portfolio".to_string(), "PortfolioCollector".to_string()),
            ("wallet".to_string(), "WalletCollector".to_string()),
            ("rate".to_string(), "RateCollector".to_string()),
        ]
    );
    assert!(scheduler.initialize().await.unwrap().already_initialized);
}
