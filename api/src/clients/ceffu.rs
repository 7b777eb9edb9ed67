use async_trait::async_trait;
use chrono::Utc;
use collector::{CustodyApi, UpstreamError};
use domain::{CustodyAsset, CustodyWallet};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::{classify, read_json, signing::ceffu_signature};

const WALLET_LIST_PATH: &str = "/open-api/v1/wallet/list";
const WALLET_ASSET_PATH: &str = "/open-api/v1/wallet/asset/list";
const PAGE_LIMIT: u32 = 500;

/// Ceffu 託管錢包 API。
#[derive(Clone)]
pub struct CeffuClient {
    client: Client,
    base_url: String,
    api_key: String,
    secret_key: String,
}

impl CeffuClient {
    pub fn new(client: Client, base_url: &str, api_key: &str, secret_key: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            secret_key: secret_key.to_string(),
        }
    }

    async fn signed_get(&self, path_and_query: &str) -> Result<Value, UpstreamError> {
        let timestamp = Utc::now().timestamp_millis();
        let signature = ceffu_signature(&self.secret_key, timestamp, "GET", path_and_query, "")?;
        debug!(path = %path_and_query, "ceffu request");
        let resp = self
            .client
            .get(format!("{}{}", self.base_url, path_and_query))
            .header("X-CEFFU-APIKEY", &self.api_key)
            .header("X-CEFFU-TIMESTAMP", timestamp.to_string())
            .header("X-CEFFU-SIGNATURE", signature)
            .send()
            .await
            .map_err(classify)?;
        read_json(resp).await
    }
}

#[async_trait]
impl CustodyApi for CeffuClient {
    async fn list_wallets(&self) -> Result<Vec<CustodyWallet>, UpstreamError> {
        let path = format!("{WALLET_LIST_PATH}?pageNo=1&pageLimit={PAGE_LIMIT}");
        let body = self.signed_get(&path).await?;
        parse_rows(&body, "walletId")
    }

    async fn wallet_assets(&self, wallet_id: &str) -> Result<Vec<CustodyAsset>, UpstreamError> {
        let body = self.signed_get(&asset_path(wallet_id)).await?;
        parse_rows(&body, "coinSymbol")
    }
}

fn asset_path(wallet_id: &str) -> String {
    format!(
        "{WALLET_ASSET_PATH}?walletId={}&pageNo=1&pageLimit={PAGE_LIMIT}",
        urlencoding::encode(wallet_id.trim())
    )
}

/// 回應格式為 `{"code": "000000", "data": {"data": [...]}}`；缺少必要欄位的列會被略過。
pub fn parse_rows<T: DeserializeOwned>(body: &Value, required: &str) -> Result<Vec<T>, UpstreamError> {
    if let Some(code) = body.get("code").and_then(Value::as_str) {
        if code != "000000" {
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(UpstreamError::Status {
                status: 200,
                message: format!("ceffu code {code}: {message}"),
            });
        }
    }
    let rows = body
        .pointer("/data/data")
        .and_then(Value::as_array)
        .ok_or_else(|| UpstreamError::Malformed("ceffu response missing data.data".into()))?;

    Ok(rows
        .iter()
        .filter(|row| row.get(required).map(|v| !v.is_null()).unwrap_or(false))
        .filter_map(|row| match serde_json::from_value::<T>(row.clone()) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                warn!(error = %err, "skipping undecodable ceffu row");
                None
            }
        })
        .collect())
}
