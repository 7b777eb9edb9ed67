use async_trait::async_trait;
use chrono::{DateTime, Utc};
use collector::{SnapshotStore, StoreError};
use domain::{SnapshotKind, SnapshotRecord};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use super::store_error;

#[derive(Clone)]
pub struct PostgresSnapshotRepository {
    pool: PgPool,
}

impl PostgresSnapshotRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 某個整點的所有 snapshot，依寫入順序。
    pub async fn list_at(&self, snapshot_at: DateTime<Utc>) -> anyhow::Result<Vec<SnapshotRecord>> {
        let rows = sqlx::query(
            "SELECT kind, subject_key, value, secondary_value, usd_value, source_tag, snapshot_at,
                    batch_id, attributes, created_at
             FROM collection_snapshots WHERE snapshot_at = $1 ORDER BY id",
        )
        .bind(snapshot_at.timestamp())
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let kind: String = row.try_get("kind")?;
            let epoch: i64 = row.try_get("snapshot_at")?;
            records.push(SnapshotRecord {
                kind: kind.parse::<SnapshotKind>().map_err(anyhow::Error::msg)?,
                subject_key: row.try_get("subject_key")?,
                value: row.try_get::<Decimal, _>("value")?,
                secondary_value: row.try_get("secondary_value")?,
                usd_value: row.try_get("usd_value")?,
                source_tag: row.try_get("source_tag")?,
                snapshot_at: DateTime::<Utc>::from_timestamp(epoch, 0)
                    .ok_or_else(|| anyhow::anyhow!("snapshot_at out of range: {epoch}"))?,
                batch_id: row.try_get::<Uuid, _>("batch_id")?,
                attributes: row.try_get("attributes")?,
                created_at: row.try_get("created_at")?,
            });
        }
        Ok(records)
    }
}

#[async_trait]
impl SnapshotStore for PostgresSnapshotRepository {
    async fn insert_batch(&self, records: &[SnapshotRecord]) -> Result<Vec<i64>, StoreError> {
        if records.is_empty() {
            return Ok(Vec::new());
        }
        // 交易未 commit 就 drop 會自動 rollback
        let mut tx = self.pool.begin().await.map_err(store_error)?;
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            let id: i64 = sqlx::query_scalar(
                "INSERT INTO collection_snapshots
                    (kind, subject_key, value, secondary_value, usd_value, source_tag,
                     snapshot_at, batch_id, attributes, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                 RETURNING id",
            )
            .bind(record.kind.as_str())
            .bind(&record.subject_key)
            .bind(record.value)
            .bind(record.secondary_value)
            .bind(record.usd_value)
            .bind(&record.source_tag)
            .bind(record.snapshot_at.timestamp())
            .bind(record.batch_id)
            .bind(&record.attributes)
            .bind(record.created_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(store_error)?;
            ids.push(id);
        }
        tx.commit().await.map_err(store_error)?;
        debug!(count = ids.len(), "snapshot batch committed");
        Ok(ids)
    }
}
