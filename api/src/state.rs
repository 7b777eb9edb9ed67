use std::sync::Arc;

use collector::Scheduler;
use sqlx::PgPool;

use crate::{config::AppConfig, repositories::PostgresSnapshotRepository};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub db: PgPool,
    pub scheduler: Arc<Scheduler>,
    pub snapshots: Arc<PostgresSnapshotRepository>,
}

#[allow(dead_code)]
fn _assert_state_bounds() {
    fn assert_bounds<T: Clone + Send + Sync + 'static>() {}
    assert_bounds::<AppState>();
}
