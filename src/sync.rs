//! Replays the offline queue against the remote API.
//!
//! A run processes queued records one at a time in enqueue order. A record that
//! fails stays queued with its retry count bumped; only storage failures abort
//! the run. Progress is published on a broadcast channel and the latest status
//! is kept on a watch channel, cleared a short delay after a run completes.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::api_client::RemoteApi;
use crate::connectivity::ConnectivityTracker;
use crate::error::{OfflineError, StorageError};
use crate::models::{Action, IdMapping, QueueRecord, Resource, ResourceType};
use crate::serialization;
use crate::storage::{resolve_temp_ids, QueueStore};

const STATUS_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Failed attempts after which a record raises an error status on every further failure.
    pub retry_warning_threshold: u32,
    /// How long a `completed` status stays visible.
    pub status_clear_delay: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry_warning_threshold: 3,
            status_clear_delay: Duration::from_secs(3),
        }
    }
}

// ===== STATUS TYPES =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    Syncing,
    Completed,
    Error,
}

/// Identifies the queued record a status refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueItemRef {
    pub id: String,
    pub resource_type: ResourceType,
    pub action: Action,
    pub retry_count: u32,
}

impl From<&QueueRecord> for QueueItemRef {
    fn from(record: &QueueRecord) -> Self {
        Self {
            id: record.id.clone(),
            resource_type: record.resource_type,
            action: record.action,
            retry_count: record.retry_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub phase: SyncPhase,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub error: Option<String>,
    pub item: Option<QueueItemRef>,
}

impl SyncStatus {
    pub fn syncing(total: usize, completed: usize, failed: usize, item: Option<QueueItemRef>) -> Self {
        Self {
            phase: SyncPhase::Syncing,
            total,
            completed,
            failed,
            error: None,
            item,
        }
    }

    pub fn completed(report: &SyncReport) -> Self {
        Self {
            phase: SyncPhase::Completed,
            total: report.total,
            completed: report.completed,
            failed: report.failed,
            error: None,
            item: None,
        }
    }

    pub fn error(message: String, item: Option<QueueItemRef>, report: &SyncReport) -> Self {
        Self {
            phase: SyncPhase::Error,
            total: report.total,
            completed: report.completed,
            failed: report.failed,
            error: Some(message),
            item,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Offline,
    AlreadyRunning,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    /// Records that reached the retry warning threshold during this run.
    pub escalated: Vec<QueueItemRef>,
}

#[derive(Debug)]
pub enum SyncOutcome {
    Skipped(SkipReason),
    Completed(SyncReport),
    Aborted(StorageError),
}

impl SyncOutcome {
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncOutcome::Completed(report) => Some(report),
            _ => None,
        }
    }
}

// ===== ENGINE =====

pub struct SyncEngine {
    store: Arc<dyn QueueStore>,
    api: Arc<dyn RemoteApi>,
    connectivity: ConnectivityTracker,
    config: SyncConfig,
    running: AtomicBool,
    events: broadcast::Sender<SyncStatus>,
    current: Arc<watch::Sender<Option<SyncStatus>>>,
    generation: Arc<AtomicU64>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .field("online", &self.connectivity.is_online())
            .finish()
    }
}

struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn QueueStore>,
        api: Arc<dyn RemoteApi>,
        connectivity: ConnectivityTracker,
        config: SyncConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        let (current, _) = watch::channel(None);
        Self {
            store,
            api,
            connectivity,
            config,
            running: AtomicBool::new(false),
            events,
            current: Arc::new(current),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn get_config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Every status event from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncStatus> {
        self.events.subscribe()
    }

    /// Latest status, `None` when idle.
    pub fn current_status(&self) -> Option<SyncStatus> {
        self.current.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<Option<SyncStatus>> {
        self.current.subscribe()
    }

    /// Starts a run in the background. Progress is observed through [`Self::subscribe`].
    pub fn trigger(self: &Arc<Self>) -> JoinHandle<SyncOutcome> {
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.run().await })
    }

    /// Replays the whole queue once. Does nothing while offline or while another run is active.
    pub async fn run(&self) -> SyncOutcome {
        if !self.connectivity.is_online() {
            debug!("Sync skipped: offline");
            return SyncOutcome::Skipped(SkipReason::Offline);
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Sync skipped: a run is already in progress");
            return SyncOutcome::Skipped(SkipReason::AlreadyRunning);
        }
        let _guard = RunGuard(&self.running);

        let mut report = SyncReport::default();
        match self.replay(&mut report).await {
            Ok(()) => {
                info!(
                    "Sync finished: {} of {} synced, {} failed",
                    report.completed, report.total, report.failed
                );
                self.publish(SyncStatus::completed(&report));
                SyncOutcome::Completed(report)
            }
            Err(e) => {
                error!("Sync aborted: {}", e);
                self.publish(SyncStatus::error(format!("Sync aborted: {}", e), None, &report));
                SyncOutcome::Aborted(e)
            }
        }
    }

    async fn replay(&self, report: &mut SyncReport) -> Result<(), StorageError> {
        report.total = self.store.count().await?;
        info!("Starting sync of {} queued mutations", report.total);
        self.publish(SyncStatus::syncing(report.total, 0, 0, None));

        let mut records = self.store.list_all().await?;
        records.sort_by(|a, b| a.replay_key().cmp(&b.replay_key()));
        report.total = records.len();

        for record in records {
            match self.dispatch(&record).await {
                Ok(resource) => {
                    // The create stays queued until its mapping is stored.
                    self.remember_server_id(&record, resource.as_ref()).await?;
                    self.store.remove(&record.id).await?;
                    report.completed += 1;
                    debug!("Synced {}", record.id);
                    self.publish(SyncStatus::syncing(
                        report.total,
                        report.completed,
                        report.failed,
                        Some(QueueItemRef::from(&record)),
                    ));
                }
                Err(e) => {
                    report.failed += 1;
                    let mut record = record;
                    record.retry_count += 1;
                    record.last_error = Some(e.to_string());
                    warn!(
                        "Failed to sync {} (attempt {}): {}",
                        record.id, record.retry_count, e
                    );
                    self.store.update(record.clone()).await?;

                    if record.retry_count >= self.config.retry_warning_threshold {
                        let item = QueueItemRef::from(&record);
                        let message = format!(
                            "Failed to sync {} {} after {} attempts",
                            record.resource_type, record.action, record.retry_count
                        );
                        warn!("{}", message);
                        self.publish(SyncStatus::error(message, Some(item.clone()), report));
                        report.escalated.push(item);
                    }
                }
            }
        }

        Ok(())
    }

    async fn dispatch(&self, record: &QueueRecord) -> Result<Option<Resource>, OfflineError> {
        let mut mutation = serialization::decode_mutation(record.mutation.clone())?;
        if let Some(temp_id) = resolve_temp_ids(self.store.as_ref(), &mut mutation).await? {
            return Err(OfflineError::UnsyncedReference(temp_id));
        }
        Ok(self.api.apply(&mutation).await?)
    }

    /// Maps the placeholder id of a synced create to the id the server assigned.
    async fn remember_server_id(
        &self,
        record: &QueueRecord,
        resource: Option<&Resource>,
    ) -> Result<(), StorageError> {
        let (Some(temp_id), Some(server_id)) = (
            record.temp_id.as_ref(),
            resource.and_then(|r| r.id()),
        ) else {
            return Ok(());
        };

        let mapping = IdMapping::new(temp_id.clone(), server_id.to_string(), record.resource_type);
        self.store.record_mapping(mapping).await?;
        debug!("Mapped {} to {}", temp_id, server_id);
        Ok(())
    }

    fn publish(&self, status: SyncStatus) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let clear = status.phase == SyncPhase::Completed;

        // No subscribers is fine.
        let _ = self.events.send(status.clone());
        self.current.send_replace(Some(status));

        if clear {
            self.schedule_clear(generation);
        }
    }

    fn schedule_clear(&self, generation: u64) {
        let current = Arc::clone(&self.current);
        let latest = Arc::clone(&self.generation);
        let delay = self.config.status_clear_delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            current.send_if_modified(|status| {
                if latest.load(Ordering::SeqCst) != generation || status.is_none() {
                    return false;
                }
                *status = None;
                true
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::models::{Mutation, PhotoRef, Submission};
    use crate::storage::MemoryQueueStore;
    use async_trait::async_trait;

    struct AcceptAll;

    #[async_trait]
    impl RemoteApi for AcceptAll {
        async fn create(&self, payload: &Submission) -> Result<Resource, ApiError> {
            Ok(payload.clone().map_photo(|blob| PhotoRef::Url(blob.name)))
        }

        async fn update(&self, _id: &str, payload: &Submission) -> Result<Resource, ApiError> {
            self.create(payload).await
        }

        async fn delete(&self, _resource_type: ResourceType, _id: &str) -> Result<(), ApiError> {
            Ok(())
        }

        async fn ping(&self) -> Result<(), ApiError> {
            Ok(())
        }
    }

    fn engine(online: bool, clear_delay: Duration) -> (Arc<SyncEngine>, Arc<MemoryQueueStore>) {
        let store = Arc::new(MemoryQueueStore::new());
        let engine = SyncEngine::new(
            store.clone(),
            Arc::new(AcceptAll),
            ConnectivityTracker::new(online),
            SyncConfig {
                status_clear_delay: clear_delay,
                ..SyncConfig::default()
            },
        );
        (Arc::new(engine), store)
    }

    fn delete(id: &str) -> QueueRecord {
        QueueRecord::new(
            Mutation::Delete {
                resource_type: ResourceType::Crop,
                id: id.to_string(),
            },
            None,
        )
    }

    #[tokio::test]
    async fn test_offline_run_is_skipped() {
        let (engine, store) = engine(false, Duration::from_secs(3));
        store.append(delete("1")).await.unwrap();
        let mut events = engine.subscribe();

        assert!(matches!(engine.run().await, SyncOutcome::Skipped(SkipReason::Offline)));
        assert_eq!(store.count().await.unwrap(), 1);
        assert!(events.try_recv().is_err());
        assert!(engine.current_status().is_none());
    }

    #[tokio::test]
    async fn test_empty_queue_completes() {
        let (engine, _) = engine(true, Duration::from_secs(3));
        let outcome = engine.run().await;
        assert_eq!(outcome.report(), Some(&SyncReport::default()));
        assert_eq!(
            engine.current_status().map(|s| s.phase),
            Some(SyncPhase::Completed)
        );
        assert!(!engine.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_status_is_cleared_after_delay() {
        let (engine, store) = engine(true, Duration::from_secs(3));
        store.append(delete("1")).await.unwrap();

        engine.run().await;
        let status = engine.current_status().unwrap();
        assert_eq!(status.phase, SyncPhase::Completed);
        assert_eq!((status.total, status.completed, status.failed), (1, 1, 0));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(engine.current_status().is_some());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(engine.current_status().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_status_is_not_cleared_by_older_run() {
        let (engine, store) = engine(true, Duration::from_secs(3));
        engine.run().await;

        tokio::time::sleep(Duration::from_secs(2)).await;
        store.append(delete("1")).await.unwrap();
        engine.run().await;

        // First run's timer fires here; the second run's status must survive it.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let status = engine.current_status().unwrap();
        assert_eq!(status.completed, 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(engine.current_status().is_none());
    }

    #[tokio::test]
    async fn test_trigger_runs_in_background() {
        let (engine, store) = engine(true, Duration::from_secs(3));
        store.append(delete("1")).await.unwrap();

        let outcome = engine.trigger().await.unwrap();
        assert_eq!(outcome.report().map(|r| r.completed), Some(1));
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
