use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// 靜態備援資料使用的 source tag。
pub const FALLBACK_SOURCE_TAG: &str = "fallback";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    PortfolioProfit,
    WalletAsset,
    ExchangeRate,
}

impl SnapshotKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SnapshotKind::PortfolioProfit => "portfolio_profit",
            SnapshotKind::WalletAsset => "wallet_asset",
            SnapshotKind::ExchangeRate => "exchange_rate",
        }
    }
}

impl fmt::Display for SnapshotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SnapshotKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "portfolio_profit" => Ok(SnapshotKind::PortfolioProfit),
            "wallet_asset" => Ok(SnapshotKind::WalletAsset),
            "exchange_rate" => Ok(SnapshotKind::ExchangeRate),
            other => Err(format!("unknown snapshot kind: {other}")),
        }
    }
}

/// 寫入 snapshot store 的單筆紀錄，落地後不再修改。
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SnapshotRecord {
    pub kind: SnapshotKind,
    pub subject_key: String,
    pub value: Decimal,
    pub secondary_value: Option<Decimal>,
    pub usd_value: Option<Decimal>,
    pub source_tag: String,
    pub snapshot_at: DateTime<Utc>,
    pub batch_id: Uuid,
    #[serde(default)]
    pub attributes: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PortfolioMaster {
    pub fund_name: String,
    pub fund_alias: String,
    pub ot_symbol: String,
    pub status: String,
    pub inception_time: Option<DateTime<Utc>>,
}

/// list-portfolio 回傳的精簡資訊。
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PortfolioSummary {
    pub fund_name: String,
    pub ot_symbol: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PortfolioPoint {
    pub fund_name: String,
    pub ot_symbol: String,
    pub acc_profit: Option<Decimal>,
    pub nav: Option<Decimal>,
    pub status: String,
    pub quote: Option<String>,
    pub inception_time: Option<DateTime<Utc>>,
    pub snapshot_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CustodyWallet {
    #[serde(deserialize_with = "lenient_string")]
    pub wallet_id: String,
    #[serde(default)]
    pub wallet_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CustodyAsset {
    pub coin_symbol: String,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub amount: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub available_amount: Option<Decimal>,
    #[serde(default, deserialize_with = "lenient_decimal")]
    pub total_amount_with_mirror: Option<Decimal>,
}

impl CustodyAsset {
    /// 有 mirror 總額時以其為準，否則退回 custody 餘額。
    pub fn effective_balance(&self) -> Option<Decimal> {
        self.total_amount_with_mirror.or(self.amount)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct WalletAssetPoint {
    pub wallet_id: String,
    pub wallet_name: Option<String>,
    pub symbol: String,
    pub network: Option<String>,
    pub effective_balance: Option<Decimal>,
    pub custody_balance: Option<Decimal>,
    pub available_balance: Option<Decimal>,
    pub usd_value: Option<Decimal>,
    pub snapshot_at: DateTime<Utc>,
}

impl WalletAssetPoint {
    /// 同一幣種可能分佈在多條鏈上，key 需要帶上 network。
    pub fn subject_key(&self) -> String {
        match self.network.as_deref().filter(|network| !network.is_empty()) {
            Some(network) => format!("{}:{}:{}", self.wallet_id, self.symbol, network),
            None => format!("{}:{}", self.wallet_id, self.symbol),
        }
    }
}

/// 設定中的匯率對，`source_id` 為上游的資產識別 (例如 coingecko id)。
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RatePair {
    pub base: String,
    pub quote: String,
    pub source_id: Option<String>,
    pub fallback: Decimal,
}

impl RatePair {
    pub fn new(base: &str, quote: &str, fallback: Decimal) -> Self {
        Self {
            base: base.trim().to_uppercase(),
            quote: quote.trim().to_uppercase(),
            source_id: None,
            fallback,
        }
    }

    pub fn with_source_id(mut self, source_id: &str) -> Self {
        self.source_id = Some(source_id.trim().to_string());
        self
    }

    pub fn key(&self) -> String {
        format!("{}/{}", self.base, self.quote)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RatePoint {
    pub base: String,
    pub quote: String,
    pub rate: Decimal,
    pub source_tag: String,
    pub snapshot_at: DateTime<Utc>,
}

impl RatePoint {
    pub fn key(&self) -> String {
        format!("{}/{}", self.base, self.quote)
    }

    pub fn is_fallback(&self) -> bool {
        self.source_tag == FALLBACK_SOURCE_TAG
    }
}

/// 截到整點 (分、秒、奈秒歸零)。
pub fn truncate_to_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    let secs = ts.timestamp();
    let floored = secs - secs.rem_euclid(3600);
    DateTime::<Utc>::from_timestamp(floored, 0).unwrap_or(ts)
}

pub fn is_hour_aligned(ts: DateTime<Utc>) -> bool {
    ts.timestamp_subsec_nanos() == 0 && ts.timestamp().rem_euclid(3600) == 0
}

/// 寬鬆解析上游數值：接受 JSON number、含千分位逗號的字串與科學記號。
pub fn parse_decimal(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                return Some(Decimal::from(int));
            }
            parse_decimal_str(&number.to_string())
        }
        serde_json::Value::String(raw) => parse_decimal_str(raw),
        _ => None,
    }
}

fn parse_decimal_str(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw.trim().chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return None;
    }
    Decimal::from_str(&cleaned)
        .or_else(|_| Decimal::from_scientific(&cleaned))
        .ok()
}

/// 依序嘗試多個欄位別名，回傳第一個可解析的值。
pub fn first_decimal(object: &serde_json::Value, aliases: &[&str]) -> Option<Decimal> {
    aliases
        .iter()
        .filter_map(|alias| object.get(*alias))
        .find_map(parse_decimal)
}

fn lenient_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(parse_decimal))
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(value) => Ok(value),
        serde_json::Value::Number(value) => Ok(value.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn truncates_to_top_of_hour() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 14, 37, 12).unwrap()
            + chrono::Duration::milliseconds(250);
        let truncated = truncate_to_hour(ts);
        assert_eq!(truncated, Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap());
        assert!(is_hour_aligned(truncated));
        assert!(!is_hour_aligned(ts));
    }

    #[test]
    fn parses_commas_strings_and_numbers() {
        assert_eq!(
            parse_decimal(&json!("1,234.50")),
            Some(Decimal::from_str("1234.50").unwrap())
        );
        assert_eq!(parse_decimal(&json!(42)), Some(Decimal::from(42)));
        assert_eq!(
            parse_decimal(&json!(7.2)),
            Some(Decimal::from_str("7.2").unwrap())
        );
        assert_eq!(parse_decimal(&json!("abc")), None);
        assert_eq!(parse_decimal(&json!(null)), None);
    }

    #[test]
    fn first_decimal_respects_alias_order() {
        let payload = json!({ "total_profit": "5", "pnl": 9 });
        let value = first_decimal(&payload, &["acc_profit", "total_profit", "pnl"]);
        assert_eq!(value, Some(Decimal::from(5)));
    }

    #[test]
    fn custody_asset_prefers_mirror_total() {
        let with_mirror: CustodyAsset = serde_json::from_value(json!({
            "coinSymbol": "BTC",
            "amount": "1.5",
            "totalAmountWithMirror": "2.0"
        }))
        .unwrap();
        assert_eq!(
            with_mirror.effective_balance(),
            Some(Decimal::from_str("2.0").unwrap())
        );

        let without_mirror: CustodyAsset = serde_json::from_value(json!({
            "coinSymbol": "BTC",
            "amount": "1.5",
            "totalAmountWithMirror": null
        }))
        .unwrap();
        assert_eq!(
            without_mirror.effective_balance(),
            Some(Decimal::from_str("1.5").unwrap())
        );
    }

    #[test]
    fn custody_wallet_accepts_numeric_id() {
        let wallet: CustodyWallet =
            serde_json::from_value(json!({ "walletId": 12345, "walletName": "main" })).unwrap();
        assert_eq!(wallet.wallet_id, "12345");
    }

    #[test]
    fn snapshot_kind_round_trips_through_str() {
        for kind in [
            SnapshotKind::PortfolioProfit,
            SnapshotKind::WalletAsset,
            SnapshotKind::ExchangeRate,
        ] {
            assert_eq!(kind.as_str().parse::<SnapshotKind>().unwrap(), kind);
        }
    }
}
