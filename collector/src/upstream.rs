use std::collections::HashMap;

use async_trait::async_trait;
use domain::{CustodyAsset, CustodyWallet, PortfolioSummary, RatePair};
use rust_decimal::Decimal;

use crate::error::UpstreamError;

/// NAV / 組合損益 API 需要的最小介面。
#[async_trait]
pub trait PortfolioApi: Send + Sync {
    async fn list_portfolios(&self) -> Result<Vec<PortfolioSummary>, UpstreamError>;

    /// 回傳原始 JSON，欄位別名由 collector 處理。
    async fn portfolio_detail(&self, fund_name: &str) -> Result<serde_json::Value, UpstreamError>;
}

#[async_trait]
pub trait CustodyApi: Send + Sync {
    async fn list_wallets(&self) -> Result<Vec<CustodyWallet>, UpstreamError>;
    async fn wallet_assets(&self, wallet_id: &str) -> Result<Vec<CustodyAsset>, UpstreamError>;
}

/// 單一匯率來源；回傳以 `RatePair::key()` 為 key 的匯率，缺漏的 pair 不出現在結果中。
#[async_trait]
pub trait RateSource: Send + Sync {
    fn source_tag(&self) -> &str;
    async fn fetch(&self, pairs: &[RatePair]) -> Result<HashMap<String, Decimal>, UpstreamError>;
}

/// `Ok(None)` 代表此來源不認得該 symbol。
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn price_usd(&self, symbol: &str) -> Result<Option<Decimal>, UpstreamError>;
}
