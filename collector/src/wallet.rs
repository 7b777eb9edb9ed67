use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    truncate_to_hour, CustodyAsset, CustodyWallet, SnapshotKind, SnapshotRecord, WalletAssetPoint,
};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    contract::{CollectionResult, Collector, CollectorIdentity},
    error::{StoreError, UpstreamError, ValidationError},
    pricing::usd_value,
    store::SnapshotStore,
    upstream::{CustodyApi, PriceOracle},
};

/// 託管錢包資產餘額快照。
pub struct WalletCollector {
    name: String,
    source_tag: String,
    api: Arc<dyn CustodyApi>,
    prices: Arc<dyn PriceOracle>,
    store: Arc<dyn SnapshotStore>,
    wallet_ids: Vec<String>,
}

impl WalletCollector {
    pub fn new(
        api: Arc<dyn CustodyApi>,
        prices: Arc<dyn PriceOracle>,
        store: Arc<dyn SnapshotStore>,
    ) -> Self {
        Self {
            name: "wallet".to_string(),
            source_tag: "ceffu".to_string(),
            api,
            prices,
            store,
            wallet_ids: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// 指定錢包清單後就不再呼叫 wallet list。
    pub fn with_wallet_ids(mut self, wallet_ids: Vec<String>) -> Self {
        self.wallet_ids = wallet_ids
            .into_iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();
        self
    }

    async fn known_wallets(&self) -> Result<Vec<CustodyWallet>, UpstreamError> {
        if !self.wallet_ids.is_empty() {
            return Ok(self
                .wallet_ids
                .iter()
                .map(|wallet_id| CustodyWallet {
                    wallet_id: wallet_id.clone(),
                    wallet_name: None,
                })
                .collect());
        }
        self.api.list_wallets().await
    }

    async fn to_point(
        &self,
        wallet: &CustodyWallet,
        asset: CustodyAsset,
        timestamp: DateTime<Utc>,
    ) -> WalletAssetPoint {
        let symbol = asset.coin_symbol.trim().to_uppercase();
        let effective = asset.effective_balance();
        let usd = match effective {
            Some(amount) => usd_value(self.prices.as_ref(), &symbol, amount).await,
            None => None,
        };
        WalletAssetPoint {
            wallet_id: wallet.wallet_id.clone(),
            wallet_name: wallet.wallet_name.clone(),
            symbol,
            network: asset.network,
            effective_balance: effective,
            custody_balance: asset.amount,
            available_balance: asset.available_amount,
            usd_value: usd,
            snapshot_at: truncate_to_hour(timestamp),
        }
    }
}

impl CollectorIdentity for WalletCollector {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "WalletCollector"
    }

    fn description(&self) -> &'static str {
        "Custodial wallet asset balances with USD valuation"
    }
}

#[async_trait]
impl Collector for WalletCollector {
    type Item = WalletAssetPoint;

    async fn collect(&self, timestamp: DateTime<Utc>) -> CollectionResult<WalletAssetPoint> {
        let wallets = match self.known_wallets().await {
            Ok(wallets) => wallets,
            Err(err) => return CollectionResult::failed(err, timestamp),
        };
        info!(wallets = wallets.len(), "collecting custody balances");

        let mut items = Vec::new();
        let mut failed_wallets = 0usize;
        let mut last_error: Option<UpstreamError> = None;
        for wallet in &wallets {
            match self.api.wallet_assets(&wallet.wallet_id).await {
                Ok(assets) => {
                    debug!(wallet_id = %wallet.wallet_id, assets = assets.len(), "wallet assets fetched");
                    for asset in assets {
                        items.push(self.to_point(wallet, asset, timestamp).await);
                    }
                }
                Err(err) if err.is_auth() => return CollectionResult::failed(err, timestamp),
                Err(err) => {
                    warn!(wallet_id = %wallet.wallet_id, error = %err, "wallet asset listing failed");
                    failed_wallets += 1;
                    last_error = Some(err);
                }
            }
        }

        match last_error {
            Some(err) if failed_wallets == wallets.len() => CollectionResult::failed(err, timestamp),
            _ => CollectionResult::succeeded(items, timestamp),
        }
    }

    fn validate(&self, item: &WalletAssetPoint) -> Result<(), ValidationError> {
        if item.wallet_id.trim().is_empty() {
            return Err(ValidationError::MissingField("wallet_id"));
        }
        if item.symbol.is_empty() {
            return Err(ValidationError::MissingField("coin_symbol"));
        }
        let effective = item
            .effective_balance
            .ok_or(ValidationError::MissingField("amount"))?;
        non_negative("amount", effective)?;
        if let Some(custody) = item.custody_balance {
            non_negative("custody_amount", custody)?;
        }
        if let Some(usd) = item.usd_value {
            non_negative("usd_value", usd)?;
        }
        Ok(())
    }

    async fn save(&self, result: &CollectionResult<WalletAssetPoint>) -> Result<usize, StoreError> {
        let batch_id = Uuid::new_v4();
        let created_at = Utc::now();
        let records: Vec<SnapshotRecord> = result
            .items()
            .iter()
            .filter_map(|item| {
                Some(SnapshotRecord {
                    kind: SnapshotKind::WalletAsset,
                    subject_key: item.subject_key(),
                    value: item.effective_balance?,
                    secondary_value: item.custody_balance,
                    usd_value: item.usd_value,
                    source_tag: self.source_tag.clone(),
                    snapshot_at: truncate_to_hour(item.snapshot_at),
                    batch_id,
                    attributes: json!({
                        "wallet_id": item.wallet_id,
                        "wallet_name": item.wallet_name,
                        "symbol": item.symbol,
                        "network": item.network,
                        "available_amount": item.available_balance,
                    }),
                    created_at,
                })
            })
            .collect();
        if records.is_empty() {
            return Ok(0);
        }
        let ids = self.store.insert_batch(&records).await?;
        debug!(%batch_id, rows = ids.len(), "wallet batch committed");
        Ok(ids.len())
    }
}

fn non_negative(field: &'static str, value: Decimal) -> Result<(), ValidationError> {
    if value < Decimal::ZERO {
        return Err(ValidationError::Negative { field, value });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{contract::ScheduledCollector, pricing::StaticPriceOracle, store::InMemorySnapshotStore};
    use chrono::TimeZone;
    use serde_json::Value;
    use std::{
        collections::HashMap,
        str::FromStr,
        sync::atomic::{AtomicUsize, Ordering},
    };

    #[derive(Default)]
    struct FakeCustodyApi {
        wallets: Vec<CustodyWallet>,
        assets: HashMap<String, Result<Vec<Value>, UpstreamError>>,
        list_calls: AtomicUsize,
    }

    #[async_trait]
    impl CustodyApi for FakeCustodyApi {
        async fn list_wallets(&self) -> Result<Vec<CustodyWallet>, UpstreamError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.wallets.clone())
        }

        async fn wallet_assets(&self, wallet_id: &str) -> Result<Vec<CustodyAsset>, UpstreamError> {
            match self.assets.get(wallet_id) {
                Some(Ok(raw)) => Ok(raw
                    .iter()
                    .map(|value| serde_json::from_value(value.clone()).unwrap())
                    .collect()),
                Some(Err(err)) => Err(err.clone()),
                None => Ok(Vec::new()),
            }
        }
    }

    fn wallet(id: &str) -> CustodyWallet {
        CustodyWallet {
            wallet_id: id.to_string(),
            wallet_name: Some(format!("{id}-name")),
        }
    }

    fn dec(raw: &str) -> Decimal {
        Decimal::from_str(raw).unwrap()
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
    }

    fn collector(api: FakeCustodyApi, store: Arc<InMemorySnapshotStore>) -> WalletCollector {
        WalletCollector::new(
            Arc::new(api),
            Arc::new(StaticPriceOracle::with_defaults(HashMap::new())),
            store,
        )
    }

    #[tokio::test]
    async fn effective_balance_prefers_mirror_and_keeps_custody() {
        let api = FakeCustodyApi {
            wallets: vec![wallet("w1")],
            assets: HashMap::from([(
                "w1".to_string(),
                Ok(vec![
                    serde_json::json!({ "coinSymbol": "BTC", "amount": "1.5", "totalAmountWithMirror": "2" }),
                    serde_json::json!({ "coinSymbol": "usdt", "amount": "1,000", "totalAmountWithMirror": null }),
                    serde_json::json!({ "coinSymbol": "PEPE", "amount": "5" }),
                ]),
            )]),
            ..Default::default()
        };
        let store = Arc::new(InMemorySnapshotStore::new());
        let result = collector(api, store).collect(at()).await;
        assert!(result.success());

        let btc = &result.items()[0];
        assert_eq!(btc.effective_balance, Some(dec("2")));
        assert_eq!(btc.custody_balance, Some(dec("1.5")));
        assert_eq!(btc.usd_value, Some(dec("130000")));

        let usdt = &result.items()[1];
        assert_eq!(usdt.symbol, "USDT");
        assert_eq!(usdt.effective_balance, Some(dec("1000")));
        assert_eq!(usdt.usd_value, Some(dec("1000")));

        let pepe = &result.items()[2];
        assert_eq!(pepe.usd_value, None);
    }

    #[tokio::test]
    async fn negative_or_missing_balances_are_rejected() {
        let store = Arc::new(InMemorySnapshotStore::new());
        let collector = collector(FakeCustodyApi::default(), store);
        let mut point = WalletAssetPoint {
            wallet_id: "w1".to_string(),
            wallet_name: None,
            symbol: "ETH".to_string(),
            network: None,
            effective_balance: Some(dec("-1")),
            custody_balance: Some(dec("1")),
            available_balance: None,
            usd_value: None,
            snapshot_at: at(),
        };
        assert!(matches!(
            collector.validate(&point),
            Err(ValidationError::Negative { field: "amount", .. })
        ));
        point.effective_balance = None;
        assert_eq!(
            collector.validate(&point),
            Err(ValidationError::MissingField("amount"))
        );
        point.effective_balance = Some(Decimal::ZERO);
        assert_eq!(collector.validate(&point), Ok(()));
    }

    #[tokio::test]
    async fn configured_wallets_skip_listing() {
        let api = Arc::new(FakeCustodyApi {
            wallets: vec![wallet("ignored")],
            assets: HashMap::from([(
                "w9".to_string(),
                Ok(vec![serde_json::json!({ "coinSymbol": "ETH", "amount": 3 })]),
            )]),
            ..Default::default()
        });
        let store = Arc::new(InMemorySnapshotStore::new());
        let collector = WalletCollector::new(
            api.clone(),
            Arc::new(StaticPriceOracle::with_defaults(HashMap::new())),
            store.clone(),
        )
        .with_wallet_ids(vec!["w9".to_string(), " ".to_string()]);

        assert!(collector.run(at()).await);
        assert_eq!(api.list_calls.load(Ordering::SeqCst), 0);
        let records = store.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].subject_key, "w9:ETH");
        assert_eq!(records[0].usd_value, Some(dec("10500")));
    }

    #[tokio::test]
    async fn every_wallet_failing_fails_collection() {
        let api = FakeCustodyApi {
            wallets: vec![wallet("w1"), wallet("w2")],
            assets: HashMap::from([
                ("w1".to_string(), Err(UpstreamError::Timeout("w1".into()))),
                ("w2".to_string(), Err(UpstreamError::Connection("w2".into()))),
            ]),
            ..Default::default()
        };
        let store = Arc::new(InMemorySnapshotStore::new());
        let result = collector(api, store).collect(at()).await;
        assert!(!result.success());
    }

    #[tokio::test]
    async fn one_wallet_failing_keeps_the_rest() {
        let api = FakeCustodyApi {
            wallets: vec![wallet("w1"), wallet("w2")],
            assets: HashMap::from([
                ("w1".to_string(), Err(UpstreamError::Timeout("w1".into()))),
                (
                    "w2".to_string(),
                    Ok(vec![serde_json::json!({ "coinSymbol": "BNB", "amount": "2", "network": "BSC" })]),
                ),
            ]),
            ..Default::default()
        };
        let store = Arc::new(InMemorySnapshotStore::new());
        let collector = collector(api, store.clone());
        assert!(collector.run(at()).await);
        let records = store.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].subject_key, "w2:BNB:BSC");
        assert_eq!(records[0].value, dec("2"));
    }
}
