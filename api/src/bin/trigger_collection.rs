use std::process::ExitCode;

use anyhow::Context;
use api::{bootstrap::build_state, config::AppConfig, telemetry};
use chrono::{DateTime, Utc};

/// 用法：`trigger_collection [epoch_seconds]`，執行一次收集並印出各 collector 結果。
#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing()?;
    let config = AppConfig::from_env()?;

    let timestamp = match std::env::args().nth(1) {
        Some(raw) => {
            let secs: i64 = raw
                .trim()
                .parse()
                .with_context(|| format!("timestamp must be epoch seconds, got {raw}"))?;
            Some(
                DateTime::<Utc>::from_timestamp(secs, 0)
                    .with_context(|| format!("timestamp out of range: {secs}"))?,
            )
        }
        None => None,
    };

    let state = build_state(&config).await?;
    let results = state.scheduler.trigger(timestamp).await?;
    println!("{}", serde_json::to_string_pretty(&results)?);

    if results.values().all(|ok| *ok) {
        Ok(ExitCode::SUCCESS)
    } else {
        tracing::warn!(?results, "some collectors failed");
        Ok(ExitCode::FAILURE)
    }
}
