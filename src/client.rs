use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api_client::{ApiConfig, HttpApi, RemoteApi};
use crate::connectivity::{ConnectivityTracker, Subscription};
use crate::error::OfflineResult;
use crate::models::{
    generate_temp_id, FieldResponse, FileBlob, Mutation, QueueRecord, Resource, ResourceType,
    Submission,
};
use crate::serialization;
use crate::storage::{resolve_temp_ids, MemoryQueueStore, NativeQueueStore, QueueStore};
use crate::sync::{SyncConfig, SyncEngine, SyncOutcome, SyncStatus};

/// Entry point for mutating field records whether or not the server is reachable.
///
/// Construct one per process and pass it around; clones are not needed since every
/// method takes `&self`.
pub struct OfflineClient {
    api: Arc<dyn RemoteApi>,
    store: Arc<dyn QueueStore>,
    connectivity: ConnectivityTracker,
    engine: Arc<SyncEngine>,
}

impl std::fmt::Debug for OfflineClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineClient")
            .field("online", &self.connectivity.is_online())
            .field("engine", &self.engine)
            .finish()
    }
}

impl OfflineClient {
    pub fn new(
        api: Arc<dyn RemoteApi>,
        store: Arc<dyn QueueStore>,
        connectivity: ConnectivityTracker,
        sync_config: SyncConfig,
    ) -> Self {
        let engine = Arc::new(SyncEngine::new(
            store.clone(),
            api.clone(),
            connectivity.clone(),
            sync_config,
        ));
        Self {
            api,
            store,
            connectivity,
            engine,
        }
    }

    /// HTTP client with the durable queue at the configured path.
    pub fn from_config(config: ApiConfig, connectivity: ConnectivityTracker) -> Result<Self> {
        let store = NativeQueueStore::open(config.get_queue_path()).with_context(|| {
            format!(
                "Failed to open queue database at {}",
                config.get_queue_path().display()
            )
        })?;
        let api = HttpApi::new(config)?;
        Ok(Self::new(
            Arc::new(api),
            Arc::new(store),
            connectivity,
            SyncConfig::default(),
        ))
    }

    /// Client with an in-memory queue and no reachability signal, for non-interactive use.
    pub fn headless(api: Arc<dyn RemoteApi>) -> Self {
        Self::new(
            api,
            Arc::new(MemoryQueueStore::new()),
            ConnectivityTracker::always_online(),
            SyncConfig::default(),
        )
    }

    // ===== MUTATIONS =====

    /// Sends the mutation to the server when online, otherwise queues it.
    ///
    /// A network failure while online also queues it. Every other failure is returned
    /// unchanged and nothing is queued.
    pub async fn perform(
        &self,
        mutation: Mutation<FileBlob>,
    ) -> OfflineResult<FieldResponse<Resource>> {
        let mut mutation = mutation;
        let unsynced = resolve_temp_ids(self.store.as_ref(), &mut mutation).await?;

        match unsynced {
            Some(temp_id) => {
                debug!(
                    "{} {} refers to unsynced {}, queuing",
                    mutation.resource_type(),
                    mutation.action(),
                    temp_id
                );
            }
            None if self.connectivity.is_online() => match self.api.apply(&mutation).await {
                Ok(resource) => return Ok(FieldResponse::success(resource)),
                Err(e) if e.is_network() => {
                    warn!(
                        "{} {} failed to reach the server, queuing: {}",
                        mutation.resource_type(),
                        mutation.action(),
                        e
                    );
                }
                Err(e) => return Err(e.into()),
            },
            None => {}
        }

        self.enqueue(mutation).await
    }

    pub async fn create(&self, payload: Submission) -> OfflineResult<FieldResponse<Resource>> {
        self.perform(Mutation::Create(payload)).await
    }

    pub async fn update(
        &self,
        id: impl Into<String>,
        payload: Submission,
    ) -> OfflineResult<FieldResponse<Resource>> {
        self.perform(Mutation::Update {
            id: id.into(),
            payload,
        })
        .await
    }

    pub async fn delete(
        &self,
        resource_type: ResourceType,
        id: impl Into<String>,
    ) -> OfflineResult<FieldResponse<Resource>> {
        self.perform(Mutation::Delete {
            resource_type,
            id: id.into(),
        })
        .await
    }

    async fn enqueue(&self, mutation: Mutation<FileBlob>) -> OfflineResult<FieldResponse<Resource>> {
        let temp_id = matches!(mutation, Mutation::Create(_)).then(generate_temp_id);
        let stored = serialization::encode_mutation(mutation).await?;
        let record = QueueRecord::new(stored, temp_id);
        let response = synthesize_response(&record);
        let id = record.id.clone();

        self.store.append(record).await?;
        info!("Queued {} for sync", id);
        Ok(response)
    }

    // ===== CONNECTIVITY =====

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    pub fn connectivity(&self) -> &ConnectivityTracker {
        &self.connectivity
    }

    /// Pings the server once and records whether it answered.
    pub async fn probe_connectivity(&self) -> bool {
        self.connectivity.probe_once(self.api.as_ref()).await
    }

    pub fn subscribe_connectivity(&self) -> watch::Receiver<bool> {
        self.connectivity.subscribe()
    }

    pub fn subscribe_connectivity_fn<F>(&self, listener: F) -> Subscription
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.connectivity.subscribe_fn(listener)
    }

    // ===== SYNC =====

    /// Starts a sync in the background and returns immediately.
    pub fn trigger_sync(&self) -> JoinHandle<SyncOutcome> {
        self.engine.trigger()
    }

    pub async fn sync_now(&self) -> SyncOutcome {
        self.engine.run().await
    }

    pub fn subscribe_sync_status(&self) -> broadcast::Receiver<SyncStatus> {
        self.engine.subscribe()
    }

    pub fn current_sync_status(&self) -> Option<SyncStatus> {
        self.engine.current_status()
    }

    pub fn watch_sync_status(&self) -> watch::Receiver<Option<SyncStatus>> {
        self.engine.watch_status()
    }

    // ===== QUEUE =====

    pub async fn queue_count(&self) -> OfflineResult<usize> {
        Ok(self.store.count().await?)
    }

    /// Pending records in replay order.
    pub async fn queued_items(&self) -> OfflineResult<Vec<QueueRecord>> {
        let mut records = self.store.list_all().await?;
        records.sort_by(|a, b| a.replay_key().cmp(&b.replay_key()));
        Ok(records)
    }

    /// Discards every pending record and id mapping. Never called automatically.
    pub async fn clear_queue(&self) -> OfflineResult<usize> {
        let discarded = self.store.clear().await?;
        warn!("Cleared offline queue, {} pending mutations discarded", discarded);
        Ok(discarded)
    }
}

/// The response a caller gets for a queued mutation, shaped like the server's.
fn synthesize_response(record: &QueueRecord) -> FieldResponse<Resource> {
    let now = record.enqueued_at;
    match &record.mutation {
        Mutation::Create(payload) => {
            let mut resource = serialization::preview(payload);
            resource.stamp(record.temp_id.clone(), Some(now), Some(now));
            FieldResponse::queued(Some(resource))
        }
        Mutation::Update { id, payload } => {
            let mut resource = serialization::preview(payload);
            resource.stamp(Some(id.clone()), None, Some(now));
            FieldResponse::queued(Some(resource))
        }
        Mutation::Delete { .. } => FieldResponse::queued(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FileAttachment, Payload, PhotoRef, WaterSample};
    use chrono::NaiveDate;

    fn water_sample() -> Payload<FileAttachment> {
        let mut sample = WaterSample::new(
            "farm-1".to_string(),
            NaiveDate::from_ymd_opt(2024, 7, 3).unwrap(),
            "borehole".to_string(),
            7.1,
        );
        sample.photo = Some(FileAttachment::encode("well.jpg", "image/jpeg", &[1, 2, 3]));
        Payload::WaterSample(sample)
    }

    #[test]
    fn test_synthesized_create() {
        let record = QueueRecord::new(
            Mutation::Create(water_sample()),
            Some("temp-1-abcdefghi".to_string()),
        );
        let response = synthesize_response(&record);
        assert!(response.is_offline());

        let Some(Payload::WaterSample(sample)) = response.data else {
            panic!("expected water sample");
        };
        assert_eq!(sample.id.as_deref(), Some("temp-1-abcdefghi"));
        assert_eq!(sample.created_at, Some(record.enqueued_at));
        assert_eq!(sample.updated_at, Some(record.enqueued_at));
        assert_eq!(sample.source, "borehole");
        assert!(matches!(sample.photo, Some(PhotoRef::Pending { size_bytes: 3, .. })));
    }

    #[test]
    fn test_synthesized_update_and_delete() {
        let record = QueueRecord::new(
            Mutation::Update {
                id: "88".to_string(),
                payload: water_sample(),
            },
            None,
        );
        let response = synthesize_response(&record);
        let data = response.data.unwrap();
        assert_eq!(data.id(), Some("88"));

        let record = QueueRecord::new(
            Mutation::Delete {
                resource_type: ResourceType::WaterSample,
                id: "88".to_string(),
            },
            None,
        );
        let response = synthesize_response(&record);
        assert!(response.is_offline());
        assert!(response.data.is_none());
    }
}
