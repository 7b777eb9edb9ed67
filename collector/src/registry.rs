use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::{sync::RwLock, task::JoinError};
use tracing::{error, info};

use crate::{contract::ScheduledCollector, error::RegistryError};

/// `run_all` 的派發方式。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FanOut {
    #[default]
    Sequential,
    Parallel,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectorInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
}

/// 依註冊順序保存 collector。
pub struct CollectorRegistry {
    collectors: RwLock<Vec<Arc<dyn ScheduledCollector>>>,
    fan_out: FanOut,
}

impl Default for CollectorRegistry {
    fn default() -> Self {
        Self::new(FanOut::Sequential)
    }
}

impl CollectorRegistry {
    pub fn new(fan_out: FanOut) -> Self {
        Self {
            collectors: RwLock::new(Vec::new()),
            fan_out,
        }
    }

    pub async fn register(&self, collector: Arc<dyn ScheduledCollector>) -> Result<(), RegistryError> {
        let mut guard = self.collectors.write().await;
        if guard.iter().any(|existing| existing.name() == collector.name()) {
            return Err(RegistryError::DuplicateName(collector.name().to_string()));
        }
        info!(collector = %collector.name(), kind = collector.kind(), "collector registered");
        guard.push(collector);
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn ScheduledCollector>> {
        self.collectors
            .read()
            .await
            .iter()
            .find(|collector| collector.name() == name)
            .cloned()
    }

    pub async fn all(&self) -> Vec<Arc<dyn ScheduledCollector>> {
        self.collectors.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.collectors.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 不等待寫鎖；拿不到鎖時回傳 `None`。
    pub fn try_describe(&self) -> Option<Vec<CollectorInfo>> {
        self.collectors.try_read().ok().map(|guard| {
            guard
                .iter()
                .map(|collector| CollectorInfo {
                    name: collector.name().to_string(),
                    kind: collector.kind().to_string(),
                    description: collector.description().to_string(),
                })
                .collect()
        })
    }

    pub async fn describe(&self) -> Vec<CollectorInfo> {
        self.collectors
            .read()
            .await
            .iter()
            .map(|collector| CollectorInfo {
                name: collector.name().to_string(),
                kind: collector.kind().to_string(),
                description: collector.description().to_string(),
            })
            .collect()
    }

    /// 每個 collector 在獨立 task 中執行，panic 會被收斂成 `false`。
    pub async fn run_all(&self, timestamp: DateTime<Utc>) -> BTreeMap<String, bool> {
        let collectors = self.all().await;
        let mut results = BTreeMap::new();

        match self.fan_out {
            FanOut::Sequential => {
                for collector in collectors {
                    let name = collector.name().to_string();
                    let outcome = tokio::spawn(async move { collector.run(timestamp).await }).await;
                    results.insert(name.clone(), settle(&name, outcome));
                }
            }
            FanOut::Parallel => {
                let names: Vec<String> = collectors
                    .iter()
                    .map(|collector| collector.name().to_string())
                    .collect();
                let outcomes = join_all(collectors.into_iter().map(|collector| {
                    tokio::spawn(async move { collector.run(timestamp).await })
                }))
                .await;
                for (name, outcome) in names.into_iter().zip(outcomes) {
                    let ok = settle(&name, outcome);
                    results.insert(name, ok);
                }
            }
        }

        let succeeded = results.values().filter(|ok| **ok).count();
        info!(%timestamp, total = results.len(), succeeded, "collector fan-out finished");
        results
    }
}

fn settle(name: &str, outcome: Result<bool, JoinError>) -> bool {
    match outcome {
        Ok(success) => success,
        Err(err) if err.is_panic() => {
            error!(collector = %name, "collector panicked");
            false
        }
        Err(err) => {
            error!(collector = %name, error = %err, "collector task cancelled");
            false
        }
    }
}
