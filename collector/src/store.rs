use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, AtomicI64, Ordering},
};

use async_trait::async_trait;
use domain::{PortfolioMaster, SnapshotRecord};
use tokio::sync::RwLock;

use crate::error::StoreError;

/// Append-only snapshot 儲存。
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// 整批寫在同一個交易內；任何一筆失敗則整批不落地。回傳依輸入順序的 id。
    async fn insert_batch(&self, records: &[SnapshotRecord]) -> Result<Vec<i64>, StoreError>;
}

#[async_trait]
pub trait PortfolioDirectory: Send + Sync {
    /// 第一次看到的組合才寫入，回傳是否新建。
    async fn register_if_absent(&self, portfolio: &PortfolioMaster) -> Result<bool, StoreError>;
}

#[derive(Default)]
pub struct InMemorySnapshotStore {
    records: RwLock<Vec<(i64, SnapshotRecord)>>,
    portfolios: RwLock<HashMap<String, PortfolioMaster>>,
    next_id: AtomicI64,
    fail_writes: AtomicBool,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 之後的寫入全部回傳錯誤，用來模擬資料庫中斷。
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn records(&self) -> Vec<SnapshotRecord> {
        self.records
            .read()
            .await
            .iter()
            .map(|(_, record)| record.clone())
            .collect()
    }

    pub async fn portfolios(&self) -> Vec<PortfolioMaster> {
        let mut list: Vec<_> = self.portfolios.read().await.values().cloned().collect();
        list.sort_by(|a, b| a.fund_name.cmp(&b.fund_name));
        list
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn insert_batch(&self, records: &[SnapshotRecord]) -> Result<Vec<i64>, StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store offline".into()));
        }
        let mut guard = self.records.write().await;
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            guard.push((id, record.clone()));
            ids.push(id);
        }
        Ok(ids)
    }
}

#[async_trait]
impl PortfolioDirectory for InMemorySnapshotStore {
    async fn register_if_absent(&self, portfolio: &PortfolioMaster) -> Result<bool, StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store offline".into()));
        }
        let mut guard = self.portfolios.write().await;
        if guard.contains_key(&portfolio.fund_name) {
            return Ok(false);
        }
        guard.insert(portfolio.fund_name.clone(), portfolio.clone());
        Ok(true)
    }
}
