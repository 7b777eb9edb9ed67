use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::error::{StoreError, UpstreamError, ValidationError};

/// 一次 `collect` 的結果，產生後不可變；驗證過濾會產生新的值。
#[derive(Debug, Clone)]
pub struct CollectionResult<T> {
    success: bool,
    items: Vec<T>,
    error: Option<UpstreamError>,
    collected_at: DateTime<Utc>,
}

impl<T> CollectionResult<T> {
    pub fn succeeded(items: Vec<T>, collected_at: DateTime<Utc>) -> Self {
        Self {
            success: true,
            items,
            error: None,
            collected_at,
        }
    }

    pub fn failed(error: UpstreamError, collected_at: DateTime<Utc>) -> Self {
        Self {
            success: false,
            items: Vec::new(),
            error: Some(error),
            collected_at,
        }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn error(&self) -> Option<&UpstreamError> {
        self.error.as_ref()
    }

    pub fn collected_at(&self) -> DateTime<Utc> {
        self.collected_at
    }

    pub fn count(&self) -> usize {
        self.items.len()
    }

    /// 只保留通過檢查的項目，並回傳被剔除項目的驗證錯誤。
    pub fn filter_valid<F>(self, mut check: F) -> (Self, Vec<ValidationError>)
    where
        F: FnMut(&T) -> Result<(), ValidationError>,
    {
        let mut rejected = Vec::new();
        let items = self
            .items
            .into_iter()
            .filter(|item| match check(item) {
                Ok(()) => true,
                Err(err) => {
                    rejected.push(err);
                    false
                }
            })
            .collect();
        (
            Self {
                success: self.success,
                items,
                error: self.error,
                collected_at: self.collected_at,
            },
            rejected,
        )
    }
}

pub trait CollectorIdentity: Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> &'static str;
    fn description(&self) -> &'static str;
}

/// 單一資料來源的 collect / validate / save 三段式流程。
///
/// `collect` 不應因一般上游錯誤而 panic 或回傳 Err，而是回傳 `success = false` 的結果。
/// `validate` 必須是純函式，不做任何 I/O。
#[async_trait]
pub trait Collector: CollectorIdentity {
    type Item: Send + Sync + fmt::Debug;

    async fn collect(&self, timestamp: DateTime<Utc>) -> CollectionResult<Self::Item>;

    fn validate(&self, item: &Self::Item) -> Result<(), ValidationError>;

    /// 以單一交易寫入，回傳寫入筆數。
    async fn save(&self, result: &CollectionResult<Self::Item>) -> Result<usize, StoreError>;
}

/// Registry 與 scheduler 看到的 object-safe 介面。
#[async_trait]
pub trait ScheduledCollector: CollectorIdentity {
    async fn run(&self, timestamp: DateTime<Utc>) -> bool;
}

#[async_trait]
impl<C> ScheduledCollector for C
where
    C: Collector,
{
    async fn run(&self, timestamp: DateTime<Utc>) -> bool {
        let name = self.name().to_string();
        let result = self.collect(timestamp).await;

        if !result.success() {
            match result.error() {
                Some(err) if err.is_auth() => {
                    error!(collector = %name, error = %err, "collection rejected by upstream")
                }
                Some(err) => warn!(collector = %name, error = %err, "collection failed"),
                None => warn!(collector = %name, "collection failed without error detail"),
            }
            record_outcome(&name, "collect_failed");
            return false;
        }

        let collected = result.count();
        if collected == 0 {
            info!(collector = %name, %timestamp, "upstream returned no records");
            record_outcome(&name, "empty");
            return true;
        }

        let (valid, rejected) = result.filter_valid(|item| self.validate(item));
        for err in &rejected {
            warn!(collector = %name, error = %err, "dropping invalid record");
        }
        info!(
            collector = %name,
            collected,
            valid = valid.count(),
            rejected = rejected.len(),
            "validation finished"
        );
        if valid.count() == 0 {
            error!(collector = %name, collected, "every collected record failed validation");
            record_outcome(&name, "invalid");
            return false;
        }

        match self.save(&valid).await {
            Ok(saved) if saved > 0 => {
                info!(collector = %name, saved, %timestamp, "snapshots saved");
                metrics::counter!("collector_records_saved_total", "collector" => name.clone())
                    .increment(saved as u64);
                record_outcome(&name, "success");
                true
            }
            Ok(_) => {
                warn!(collector = %name, "store wrote zero records");
                record_outcome(&name, "save_failed");
                false
            }
            Err(err) => {
                error!(collector = %name, error = %err, "saving snapshots failed");
                record_outcome(&name, "save_failed");
                false
            }
        }
    }
}

fn record_outcome(collector: &str, outcome: &'static str) {
    metrics::counter!(
        "collector_runs_total",
        "collector" => collector.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}
