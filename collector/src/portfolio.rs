use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    first_decimal, truncate_to_hour, PortfolioMaster, PortfolioPoint, PortfolioSummary,
    SnapshotKind, SnapshotRecord,
};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    contract::{CollectionResult, Collector, CollectorIdentity},
    error::{StoreError, UpstreamError, ValidationError},
    store::{PortfolioDirectory, SnapshotStore},
    upstream::PortfolioApi,
};

pub const ACC_PROFIT_ALIASES: [&str; 4] = ["acc_profit", "accumulated_profit", "total_profit", "pnl"];
pub const NAV_ALIASES: [&str; 3] = ["nav", "net_asset_value", "unit_nav"];

/// 收集各投資組合的累積損益與 NAV。
pub struct PortfolioCollector {
    name: String,
    source_tag: String,
    api: Arc<dyn PortfolioApi>,
    store: Arc<dyn SnapshotStore>,
    directory: Arc<dyn PortfolioDirectory>,
}

impl PortfolioCollector {
    pub fn new(
        api: Arc<dyn PortfolioApi>,
        store: Arc<dyn SnapshotStore>,
        directory: Arc<dyn PortfolioDirectory>,
    ) -> Self {
        Self {
            name: "portfolio".to_string(),
            source_tag: "1token".to_string(),
            api,
            store,
            directory,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_source_tag(mut self, tag: impl Into<String>) -> Self {
        self.source_tag = tag.into();
        self
    }

    async fn register_portfolios(&self, items: &[PortfolioPoint]) -> Result<(), StoreError> {
        for item in items {
            let master = PortfolioMaster {
                fund_name: item.fund_name.clone(),
                fund_alias: item.fund_name.clone(),
                ot_symbol: item.ot_symbol.clone(),
                status: item.status.clone(),
                inception_time: item.inception_time,
            };
            if self.directory.register_if_absent(&master).await? {
                info!(fund_name = %item.fund_name, "registered new portfolio");
            }
        }
        Ok(())
    }
}

impl CollectorIdentity for PortfolioCollector {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "PortfolioCollector"
    }

    fn description(&self) -> &'static str {
        "Portfolio cumulative profit and NAV snapshots"
    }
}

#[async_trait]
impl Collector for PortfolioCollector {
    type Item = PortfolioPoint;

    async fn collect(&self, timestamp: DateTime<Utc>) -> CollectionResult<PortfolioPoint> {
        let summaries = match self.api.list_portfolios().await {
            Ok(list) => list,
            Err(err) => return CollectionResult::failed(err, timestamp),
        };
        info!(count = summaries.len(), "portfolio list fetched");

        let mut items = Vec::with_capacity(summaries.len());
        let mut last_error: Option<UpstreamError> = None;
        for summary in &summaries {
            if summary.fund_name.trim().is_empty() {
                warn!("skipping portfolio entry without fund name");
                continue;
            }
            match self.api.portfolio_detail(&summary.fund_name).await {
                Ok(detail) => items.push(extract_point(summary, &detail, timestamp)),
                Err(err) if err.is_auth() => return CollectionResult::failed(err, timestamp),
                Err(err) => {
                    warn!(fund_name = %summary.fund_name, error = %err, "portfolio detail failed");
                    last_error = Some(err);
                }
            }
        }

        match last_error {
            Some(err) if items.is_empty() => CollectionResult::failed(err, timestamp),
            _ => CollectionResult::succeeded(items, timestamp),
        }
    }

    fn validate(&self, item: &PortfolioPoint) -> Result<(), ValidationError> {
        if item.fund_name.trim().is_empty() {
            return Err(ValidationError::MissingField("fund_name"));
        }
        if item.acc_profit.is_none() {
            return Err(ValidationError::MissingField("acc_profit"));
        }
        if let Some(nav) = item.nav {
            if nav < Decimal::ZERO {
                return Err(ValidationError::Negative {
                    field: "nav",
                    value: nav,
                });
            }
        }
        Ok(())
    }

    async fn save(&self, result: &CollectionResult<PortfolioPoint>) -> Result<usize, StoreError> {
        let batch_id = Uuid::new_v4();
        let created_at = Utc::now();
        let records: Vec<SnapshotRecord> = result
            .items()
            .iter()
            .filter_map(|item| {
                let value = item.acc_profit?;
                Some(SnapshotRecord {
                    kind: SnapshotKind::PortfolioProfit,
                    subject_key: item.fund_name.clone(),
                    value,
                    secondary_value: item.nav,
                    usd_value: None,
                    source_tag: self.source_tag.clone(),
                    snapshot_at: truncate_to_hour(item.snapshot_at),
                    batch_id,
                    attributes: json!({
                        "ot_symbol": item.ot_symbol,
                        "status": item.status,
                        "quote": item.quote,
                    }),
                    created_at,
                })
            })
            .collect();
        if records.is_empty() {
            return Ok(0);
        }
        let ids = self.store.insert_batch(&records).await?;
        debug!(%batch_id, rows = ids.len(), "portfolio batch committed");

        // 主檔在 snapshot 落地後才寫入；失敗時下一輪會再補
        if let Err(err) = self.register_portfolios(result.items()).await {
            warn!(%batch_id, error = %err, "portfolio master registration failed");
        }
        Ok(ids.len())
    }
}

/// detail 可能包在 `result` 或 `data` 之下。
fn detail_body(detail: &Value) -> &Value {
    ["result", "data"]
        .iter()
        .filter_map(|key| detail.get(*key))
        .find(|value| value.is_object())
        .unwrap_or(detail)
}

fn extract_point(summary: &PortfolioSummary, detail: &Value, timestamp: DateTime<Utc>) -> PortfolioPoint {
    let body = detail_body(detail);
    let text = |key: &str| {
        body.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };

    PortfolioPoint {
        fund_name: summary.fund_name.trim().to_string(),
        ot_symbol: summary
            .ot_symbol
            .clone()
            .or_else(|| text("ot_symbol"))
            .unwrap_or_else(|| summary.fund_name.trim().to_string()),
        acc_profit: first_decimal(body, &ACC_PROFIT_ALIASES),
        nav: first_decimal(body, &NAV_ALIASES),
        status: text("status")
            .or_else(|| summary.status.clone())
            .unwrap_or_else(|| "unknown".to_string()),
        quote: text("quote"),
        inception_time: body.get("inception_time").and_then(parse_inception),
        snapshot_at: truncate_to_hour(timestamp),
    }
}

/// 秒或毫秒的 epoch，或 RFC 3339 字串。
fn parse_inception(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(number) => {
            let raw = number.as_i64()?;
            if raw > 100_000_000_000 {
                DateTime::<Utc>::from_timestamp_millis(raw)
            } else {
                DateTime::<Utc>::from_timestamp(raw, 0)
            }
        }
        Value::String(raw) => DateTime::parse_from_rfc3339(raw.trim())
            .ok()
            .map(|ts| ts.with_timezone(&Utc)),
        _ => None,
    }
}
