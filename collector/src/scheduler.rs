use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use domain::truncate_to_hour;
use serde::{Serialize, Serializer};
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
    time::sleep,
};
use tracing::{debug, error, info, warn};

use crate::{
    contract::ScheduledCollector,
    error::{RegistryError, SchedulerError},
    registry::{CollectorInfo, CollectorRegistry},
};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 建立 collector 的工廠，scheduler 只會呼叫一次。
pub trait CollectorFactory: Send + Sync {
    fn build(&self) -> anyhow::Result<Vec<Arc<dyn ScheduledCollector>>>;
}

impl<F> CollectorFactory for F
where
    F: Fn() -> anyhow::Result<Vec<Arc<dyn ScheduledCollector>>> + Send + Sync,
{
    fn build(&self) -> anyhow::Result<Vec<Arc<dyn ScheduledCollector>>> {
        self()
    }
}

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// 整點之後多久執行 (必須小於一小時)。
    pub offset: Duration,
    pub retry_backoff: Duration,
    pub shutdown_timeout: Duration,
    /// 單次 sleep 上限，醒來後重新讀取牆鐘。
    pub max_sleep_slice: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            offset: Duration::from_secs(300),
            retry_backoff: Duration::from_secs(300),
            shutdown_timeout: Duration::from_secs(120),
            max_sleep_slice: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// 狀態查詢用：取不到的值序列化成 `"unknown"`。
#[derive(Clone, Debug, PartialEq)]
pub enum Metric<T> {
    Known(T),
    Unknown,
}

impl<T> Metric<T> {
    pub fn known(self) -> Option<T> {
        match self {
            Metric::Known(value) => Some(value),
            Metric::Unknown => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Metric::Unknown)
    }
}

impl<T: Serialize> Serialize for Metric<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Metric::Known(value) => value.serialize(serializer),
            Metric::Unknown => serializer.serialize_str("unknown"),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct RunStats {
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_collection_at: Option<DateTime<Utc>>,
    pub last_run_success: Option<bool>,
    pub last_results: BTreeMap<String, bool>,
    pub next_run_at: Option<DateTime<Utc>>,
}

impl RunStats {
    /// 百分比，小數一位；尚未執行過回傳 `None`。
    pub fn success_rate(&self) -> Option<f64> {
        if self.total_runs == 0 {
            return None;
        }
        let rate = self.successful_runs as f64 / self.total_runs as f64 * 100.0;
        Some((rate * 10.0).round() / 10.0)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct StatusStats {
    pub total_runs: Metric<u64>,
    pub successful_runs: Metric<u64>,
    pub failed_runs: Metric<u64>,
    pub success_rate: Metric<Option<f64>>,
    pub last_run_at: Metric<Option<DateTime<Utc>>>,
    pub last_collection_at: Metric<Option<DateTime<Utc>>>,
    pub last_run_success: Metric<Option<bool>>,
    pub last_results: Metric<BTreeMap<String, bool>>,
    pub next_run_at: Metric<Option<DateTime<Utc>>>,
    pub collectors_count: Metric<usize>,
}

impl StatusStats {
    fn from_parts(stats: Option<RunStats>, collectors_count: Option<usize>) -> Self {
        let collectors_count = collectors_count.map_or(Metric::Unknown, Metric::Known);
        match stats {
            Some(stats) => Self {
                total_runs: Metric::Known(stats.total_runs),
                successful_runs: Metric::Known(stats.successful_runs),
                failed_runs: Metric::Known(stats.failed_runs),
                success_rate: Metric::Known(stats.success_rate()),
                last_run_at: Metric::Known(stats.last_run_at),
                last_collection_at: Metric::Known(stats.last_collection_at),
                last_run_success: Metric::Known(stats.last_run_success),
                last_results: Metric::Known(stats.last_results),
                next_run_at: Metric::Known(stats.next_run_at),
                collectors_count,
            },
            None => Self {
                total_runs: Metric::Unknown,
                successful_runs: Metric::Unknown,
                failed_runs: Metric::Unknown,
                success_rate: Metric::Unknown,
                last_run_at: Metric::Unknown,
                last_collection_at: Metric::Unknown,
                last_run_success: Metric::Unknown,
                last_results: Metric::Unknown,
                next_run_at: Metric::Unknown,
                collectors_count,
            },
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct CollectorSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub state: SchedulerState,
    pub collectors: Metric<Vec<CollectorSummary>>,
    pub stats: StatusStats,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
pub struct InitializeReport {
    pub already_initialized: bool,
    pub collectors_count: usize,
}

/// 回傳嚴格晚於 `now` 的下一個 `HH:offset` 時間點。
pub fn next_boundary(now: DateTime<Utc>, offset: Duration) -> Result<DateTime<Utc>, SchedulerError> {
    let offset = ChronoDuration::from_std(offset)
        .map_err(|err| SchedulerError::Clock(format!("invalid offset: {err}")))?;
    if offset >= ChronoDuration::hours(1) {
        return Err(SchedulerError::Clock(format!(
            "offset {}s must be shorter than an hour",
            offset.num_seconds()
        )));
    }
    let candidate = truncate_to_hour(now)
        .checked_add_signed(offset)
        .ok_or_else(|| SchedulerError::Clock("boundary overflow".into()))?;
    if candidate > now {
        return Ok(candidate);
    }
    candidate
        .checked_add_signed(ChronoDuration::hours(1))
        .ok_or_else(|| SchedulerError::Clock("boundary overflow".into()))
}

struct Worker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// 每小時整點後 `offset` 觸發一次 `run_all`，並支援手動觸發。
pub struct Scheduler {
    registry: Arc<CollectorRegistry>,
    factory: Arc<dyn CollectorFactory>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    initialized: Mutex<bool>,
    stats: Mutex<RunStats>,
    state: watch::Sender<SchedulerState>,
    worker: Mutex<Option<Worker>>,
}

impl Scheduler {
    pub fn new(
        registry: Arc<CollectorRegistry>,
        factory: Arc<dyn CollectorFactory>,
        config: SchedulerConfig,
    ) -> Self {
        Self::with_clock(registry, factory, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        registry: Arc<CollectorRegistry>,
        factory: Arc<dyn CollectorFactory>,
        config: SchedulerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (state, _) = watch::channel(SchedulerState::Stopped);
        Self {
            registry,
            factory,
            clock,
            config,
            initialized: Mutex::new(false),
            stats: Mutex::new(RunStats::default()),
            state,
            worker: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> Arc<CollectorRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: SchedulerState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(?previous, ?next, "scheduler state changed");
        }
    }

    /// 建立並註冊 collector；重複呼叫不會重建。
    pub async fn initialize(&self) -> Result<InitializeReport, SchedulerError> {
        let mut initialized = self.initialized.lock().await;
        if *initialized {
            return Ok(InitializeReport {
                already_initialized: true,
                collectors_count: self.registry.len().await,
            });
        }

        let collectors = self
            .factory
            .build()
            .map_err(|err| SchedulerError::Initialization(format!("{err:#}")))?;
        // 先檢查整批名稱，避免註冊到一半失敗
        let mut names: HashSet<String> = self
            .registry
            .describe()
            .await
            .into_iter()
            .map(|info| info.name)
            .collect();
        for collector in &collectors {
            if !names.insert(collector.name().to_string()) {
                return Err(RegistryError::DuplicateName(collector.name().to_string()).into());
            }
        }
        for collector in collectors {
            self.registry.register(collector).await?;
        }
        *initialized = true;

        let collectors_count = self.registry.len().await;
        info!(collectors_count, "collectors initialized");
        Ok(InitializeReport {
            already_initialized: false,
            collectors_count,
        })
    }

    pub async fn start(self: &Arc<Self>) -> Result<(), SchedulerError> {
        let mut worker = self.worker.lock().await;
        if worker.is_some() {
            warn!("scheduler already running");
            return Ok(());
        }

        self.set_state(SchedulerState::Starting);
        if let Err(err) = self.initialize().await {
            self.set_state(SchedulerState::Stopped);
            return Err(err);
        }

        let (shutdown, receiver) = watch::channel(false);
        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move { scheduler.run_loop(receiver).await });
        *worker = Some(Worker { shutdown, handle });
        self.set_state(SchedulerState::Running);
        info!(
            offset_secs = self.config.offset.as_secs(),
            "collection scheduler started"
        );
        Ok(())
    }

    /// 取消等待中的 sleep；進行中的收集會跑完 (最多等 `shutdown_timeout`)。
    pub async fn stop(&self) {
        let mut guard = self.worker.lock().await;
        let Some(worker) = guard.take() else {
            debug!("scheduler is not running");
            return;
        };

        self.set_state(SchedulerState::Stopping);
        if worker.shutdown.send(true).is_err() {
            debug!("collection loop already exited");
        }
        let mut handle = worker.handle;
        match tokio::time::timeout(self.config.shutdown_timeout, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(error = %err, "collection loop ended abnormally"),
            Err(_) => warn!(
                timeout_secs = self.config.shutdown_timeout.as_secs(),
                "collection loop did not stop in time, detaching"
            ),
        }
        self.stats.lock().await.next_run_at = None;
        self.set_state(SchedulerState::Stopped);
        info!("collection scheduler stopped");
    }

    /// 手動觸發；未指定時間則使用目前時間，一律截到整點。
    /// 收集在獨立 task 中執行，呼叫端被取消時仍會跑完整輪並更新統計。
    pub async fn trigger(
        self: &Arc<Self>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<BTreeMap<String, bool>, SchedulerError> {
        self.initialize().await?;
        let collection_at = truncate_to_hour(timestamp.unwrap_or_else(|| self.clock.now()));
        info!(%collection_at, "manual collection triggered");
        let scheduler = Arc::clone(self);
        tokio::spawn(async move { scheduler.run_cycle(collection_at).await })
            .await
            .map_err(|err| SchedulerError::CycleAborted(err.to_string()))
    }

    pub async fn list_collectors(&self) -> Vec<CollectorInfo> {
        self.registry.describe().await
    }

    pub async fn stats(&self) -> RunStats {
        self.stats.lock().await.clone()
    }

    /// 不會阻塞也不會失敗；被鎖住的部分回報為 unknown。
    pub fn status(&self) -> SchedulerStatus {
        let state = self.state();
        let described = self.registry.try_describe();
        let collectors_count = described.as_ref().map(Vec::len);
        let collectors = match described {
            Some(list) => Metric::Known(
                list.into_iter()
                    .map(|info| CollectorSummary {
                        name: info.name,
                        kind: info.kind,
                    })
                    .collect(),
            ),
            None => Metric::Unknown,
        };
        let stats = self.stats.try_lock().ok().map(|guard| guard.clone());

        SchedulerStatus {
            running: state == SchedulerState::Running,
            state,
            collectors,
            stats: StatusStats::from_parts(stats, collectors_count),
        }
    }

    async fn run_cycle(&self, collection_at: DateTime<Utc>) -> BTreeMap<String, bool> {
        let collection_at = truncate_to_hour(collection_at);
        info!(%collection_at, "collection cycle started");
        let results = self.registry.run_all(collection_at).await;
        let success = results.values().all(|ok| *ok);

        {
            let mut stats = self.stats.lock().await;
            stats.total_runs += 1;
            if success {
                stats.successful_runs += 1;
            } else {
                stats.failed_runs += 1;
            }
            stats.last_run_at = Some(self.clock.now());
            stats.last_collection_at = Some(collection_at);
            stats.last_run_success = Some(success);
            stats.last_results = results.clone();
        }

        metrics::counter!(
            "collection_cycles_total",
            "outcome" => if success { "success" } else { "failure" }
        )
        .increment(1);
        if success {
            info!(%collection_at, collectors = results.len(), "collection cycle succeeded");
        } else {
            let failed: Vec<&str> = results
                .iter()
                .filter(|(_, ok)| !**ok)
                .map(|(name, _)| name.as_str())
                .collect();
            warn!(%collection_at, ?failed, "collection cycle finished with failures");
        }
        results
    }

    async fn run_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("collection loop started");
        loop {
            match self.wait_for_boundary(&mut shutdown).await {
                Ok(Some(collection_at)) => {
                    // 進行中的收集不受 shutdown 影響
                    let scheduler = Arc::clone(&self);
                    let cycle =
                        tokio::spawn(async move { scheduler.run_cycle(collection_at).await }).await;
                    if let Err(err) = cycle {
                        let err = SchedulerError::CycleAborted(err.to_string());
                        error!(error = %err, "collection cycle crashed, backing off");
                        if self.back_off(&mut shutdown).await {
                            break;
                        }
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    error!(error = %err, "scheduler error, backing off");
                    if self.back_off(&mut shutdown).await {
                        break;
                    }
                }
            }
        }
        info!("collection loop exited");
    }

    async fn wait_for_boundary(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Option<DateTime<Utc>>, SchedulerError> {
        let mut target = next_boundary(self.clock.now(), self.config.offset)?;
        self.stats.lock().await.next_run_at = Some(target);
        info!(next_run_at = %target, "waiting for next collection boundary");

        loop {
            if *shutdown.borrow() {
                return Ok(None);
            }
            let now = self.clock.now();
            if now >= target {
                if now - target >= ChronoDuration::hours(1) {
                    warn!(missed = %target, %now, "missed collection boundary, rescheduling");
                    target = next_boundary(now, self.config.offset)?;
                    self.stats.lock().await.next_run_at = Some(target);
                    continue;
                }
                return Ok(Some(truncate_to_hour(target)));
            }

            let remaining = (target - now)
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(self.config.max_sleep_slice);
            tokio::select! {
                _ = sleep(remaining) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// 回傳 true 代表等待期間收到停止訊號。
    async fn back_off(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = sleep(self.config.retry_backoff) => *shutdown.borrow(),
            changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
        }
    }
}
