use async_trait::async_trait;
use chrono::Utc;
use collector::{PortfolioApi, UpstreamError};
use domain::PortfolioSummary;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use super::{classify, read_json, signing::onetoken_signature};

const LIST_PORTFOLIO_PATH: &str = "/api/v1/fundv3/openapi/portfolio/list-portfolio";
const PORTFOLIO_DETAIL_PATH: &str = "/api/v1/fundv3/openapi/portfolio/get-portfolio-detail";

/// 1Token 投組 API (HMAC 簽名)。
#[derive(Clone)]
pub struct OneTokenClient {
    client: Client,
    base_url: String,
    api_key: String,
    secret: String,
}

impl OneTokenClient {
    pub fn new(client: Client, base_url: &str, api_key: &str, secret: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            secret: secret.to_string(),
        }
    }

    async fn signed_get(&self, path_and_query: &str) -> Result<Value, UpstreamError> {
        let timestamp = Utc::now().timestamp();
        let signature = onetoken_signature(&self.secret, "GET", path_and_query, timestamp, "")?;
        debug!(path = %path_and_query, "1token request");
        let resp = self
            .client
            .get(format!("{}{}", self.base_url, path_and_query))
            .header("Api-Key", &self.api_key)
            .header("Api-Signature", signature)
            .header("Api-Timestamp", timestamp.to_string())
            .send()
            .await
            .map_err(classify)?;
        read_json(resp).await
    }
}

#[async_trait]
impl PortfolioApi for OneTokenClient {
    async fn list_portfolios(&self) -> Result<Vec<PortfolioSummary>, UpstreamError> {
        let body = self.signed_get(LIST_PORTFOLIO_PATH).await?;
        parse_portfolio_list(&body)
    }

    async fn portfolio_detail(&self, fund_name: &str) -> Result<Value, UpstreamError> {
        self.signed_get(&detail_path(fund_name)).await
    }
}

/// 簽名涵蓋實際送出的 path 與 query。
fn detail_path(fund_name: &str) -> String {
    format!(
        "{}?fund_name={}",
        PORTFOLIO_DETAIL_PATH,
        urlencoding::encode(fund_name.trim())
    )
}

/// 支援 `result.fund_info_list`、`data.fund_info_list` 與舊版 `data.result`。
pub fn parse_portfolio_list(body: &Value) -> Result<Vec<PortfolioSummary>, UpstreamError> {
    let entries = body
        .pointer("/result/fund_info_list")
        .or_else(|| body.pointer("/data/fund_info_list"))
        .or_else(|| body.pointer("/data/result"))
        .and_then(Value::as_array)
        .ok_or_else(|| UpstreamError::Malformed("portfolio list missing from response".into()))?;

    Ok(entries
        .iter()
        .filter_map(|entry| {
            let fund_name = entry
                .get("fund_name")
                .or_else(|| entry.get("name"))
                .and_then(Value::as_str)?
                .trim()
                .to_string();
            let text = |key: &str| {
                entry
                    .get(key)
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(str::to_string)
            };
            Some(PortfolioSummary {
                fund_name,
                ot_symbol: text("ot_symbol"),
                status: text("status"),
            })
        })
        .collect())
}
