use std::collections::BTreeMap;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use collector::{CollectorInfo, InitializeReport, SchedulerStatus};
use domain::{truncate_to_hour, SnapshotRecord};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/data-collection/status", get(get_status))
        .route("/data-collection/trigger", post(trigger_collection))
        .route("/data-collection/collectors", get(list_collectors))
        .route("/data-collection/initialize", post(initialize))
        .route("/data-collection/snapshots", get(list_snapshots))
}

async fn get_status(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(state.scheduler.status())
}

#[derive(Debug, Deserialize)]
struct TimestampQuery {
    /// epoch 秒
    timestamp: Option<i64>,
}

impl TimestampQuery {
    fn resolve(&self) -> Result<Option<DateTime<Utc>>, StatusCode> {
        match self.timestamp {
            Some(secs) => DateTime::<Utc>::from_timestamp(secs, 0)
                .map(Some)
                .ok_or(StatusCode::BAD_REQUEST),
            None => Ok(None),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub collection_time: DateTime<Utc>,
    pub results: BTreeMap<String, bool>,
    pub success: bool,
}

async fn trigger_collection(
    State(state): State<AppState>,
    Query(params): Query<TimestampQuery>,
) -> Result<Json<TriggerResponse>, StatusCode> {
    let requested = params.resolve()?;
    let collection_time = truncate_to_hour(requested.unwrap_or_else(Utc::now));
    let results = state
        .scheduler
        .trigger(Some(collection_time))
        .await
        .map_err(|err| {
            error!(error = %err, "manual collection failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    let success = results.values().all(|ok| *ok);
    Ok(Json(TriggerResponse {
        collection_time,
        results,
        success,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CollectorsResponse {
    pub total: usize,
    pub collectors: Vec<CollectorInfo>,
}

async fn list_collectors(State(state): State<AppState>) -> Json<CollectorsResponse> {
    let collectors = state.scheduler.list_collectors().await;
    Json(CollectorsResponse {
        total: collectors.len(),
        collectors,
    })
}

async fn initialize(State(state): State<AppState>) -> Result<Json<InitializeReport>, StatusCode> {
    state.scheduler.initialize().await.map(Json).map_err(|err| {
        error!(error = %err, "collector initialization failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

async fn list_snapshots(
    State(state): State<AppState>,
    Query(params): Query<TimestampQuery>,
) -> Result<Json<Vec<SnapshotRecord>>, StatusCode> {
    let snapshot_at = params.resolve()?.ok_or(StatusCode::BAD_REQUEST)?;
    state
        .snapshots
        .list_at(truncate_to_hour(snapshot_at))
        .await
        .map(Json)
        .map_err(|err| {
            error!(error = %err, "snapshot query failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}
