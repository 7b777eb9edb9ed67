pub mod ceffu;
pub mod onetoken;
pub mod prices;
pub mod rates;
pub mod signing;

use std::time::Duration;

use anyhow::Context;
use collector::UpstreamError;
use reqwest::{Client, Response};

pub use ceffu::CeffuClient;
pub use onetoken::OneTokenClient;
pub use prices::CoingeckoPriceOracle;
pub use rates::{CoingeckoRateSource, ExchangeRateApiSource};

/// 所有上游 client 共用：逾時由 client 負責，不交給 scheduler。
pub fn http_client(timeout: Duration) -> anyhow::Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("snapshot-collector/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build http client")
}

pub(crate) fn classify(err: reqwest::Error) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::Timeout(err.to_string())
    } else if err.is_decode() {
        UpstreamError::Malformed(err.to_string())
    } else if let Some(status) = err.status() {
        UpstreamError::from_status(status.as_u16(), err.to_string())
    } else {
        UpstreamError::Connection(err.to_string())
    }
}

/// 非 2xx 轉成 `UpstreamError`，否則解成 JSON。
pub(crate) async fn read_json(resp: Response) -> Result<serde_json::Value, UpstreamError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        let snippet: String = body.chars().take(200).collect();
        return Err(UpstreamError::from_status(status.as_u16(), snippet));
    }
    resp.json::<serde_json::Value>().await.map_err(classify)
}
