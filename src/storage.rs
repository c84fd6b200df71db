//! Durable storage for the offline mutation queue.
//!
//! [`NativeQueueStore`] keeps records in a native_db file that survives restarts.
//! [`MemoryQueueStore`] keeps them in process memory for tests and headless runs.

use crate::error::StorageError;
use crate::models::{is_temp_id, IdMapping, Mutation, QueueRecord};
use async_trait::async_trait;
use native_db::{Builder, Database, Models};
use once_cell::sync::OnceCell;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Inserts a new record. Fails if a record with the same id exists.
    async fn append(&self, record: QueueRecord) -> Result<(), StorageError>;

    /// All records, in no particular order.
    async fn list_all(&self) -> Result<Vec<QueueRecord>, StorageError>;

    async fn get(&self, id: &str) -> Result<Option<QueueRecord>, StorageError>;

    /// Deletes a record. Removing an absent id is not an error.
    async fn remove(&self, id: &str) -> Result<(), StorageError>;

    /// Overwrites an existing record. Returns false, writing nothing, when the id is gone.
    async fn update(&self, record: QueueRecord) -> Result<bool, StorageError>;

    async fn count(&self) -> Result<usize, StorageError>;

    /// Drops every record and id mapping, returning how many records were discarded.
    async fn clear(&self) -> Result<usize, StorageError>;

    async fn record_mapping(&self, mapping: IdMapping) -> Result<(), StorageError>;

    async fn resolve_mapping(&self, temp_id: &str) -> Result<Option<IdMapping>, StorageError>;
}

/// Rewrites temporary ids in `mutation` to their server ids.
/// Returns the first temporary id that has no mapping yet, if any.
pub async fn resolve_temp_ids<S, P>(
    store: &S,
    mutation: &mut Mutation<P>,
) -> Result<Option<String>, StorageError>
where
    S: QueueStore + ?Sized,
    P: Send,
{
    let mut unresolved = None;
    for id in mutation.referenced_ids_mut() {
        if !is_temp_id(id.as_str()) {
            continue;
        }
        match store.resolve_mapping(id.as_str()).await? {
            Some(mapping) => {
                debug!("Resolved {} to {}", id, mapping.server_id);
                *id = mapping.server_id;
            }
            None => {
                if unresolved.is_none() {
                    unresolved = Some(id.clone());
                }
            }
        }
    }
    Ok(unresolved)
}

// ===== NATIVE_DB STORE =====

static MODELS: OnceCell<Models> = OnceCell::new();

fn models() -> Result<&'static Models, StorageError> {
    MODELS.get_or_try_init(|| {
        let mut models = Models::new();
        models.define::<QueueRecord>()?;
        models.define::<IdMapping>()?;
        Ok(models)
    })
}

pub struct NativeQueueStore {
    database: Arc<Database<'static>>,
    path: Option<PathBuf>,
}

impl NativeQueueStore {
    /// Opens the queue database at `path`, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let database = Builder::new().create(models()?, &path)?;
        debug!("Opened queue database at {}", path.display());
        Ok(Self {
            database: Arc::new(database),
            path: Some(path),
        })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let database = Builder::new().create_in_memory(models()?)?;
        Ok(Self {
            database: Arc::new(database),
            path: None,
        })
    }

    pub fn get_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Database<'static>) -> Result<T, StorageError> + Send + 'static,
    {
        let database = Arc::clone(&self.database);
        tokio::task::spawn_blocking(move || f(&database)).await?
    }
}

impl std::fmt::Debug for NativeQueueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeQueueStore")
            .field("path", &self.path)
            .finish()
    }
}

#[async_trait]
impl QueueStore for NativeQueueStore {
    async fn append(&self, record: QueueRecord) -> Result<(), StorageError> {
        self.blocking(move |db| {
            let rw = db.rw_transaction()?;
            if rw.get().primary::<QueueRecord>(record.id.clone())?.is_some() {
                return Err(StorageError::Duplicate(record.id));
            }
            rw.insert(record)?;
            rw.commit()?;
            Ok(())
        })
        .await
    }

    async fn list_all(&self) -> Result<Vec<QueueRecord>, StorageError> {
        self.blocking(|db| {
            let r = db.r_transaction()?;
            let records = r
                .scan()
                .primary::<QueueRecord>()?
                .all()?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(records)
        })
        .await
    }

    async fn get(&self, id: &str) -> Result<Option<QueueRecord>, StorageError> {
        let id = id.to_string();
        self.blocking(move |db| {
            let r = db.r_transaction()?;
            Ok(r.get().primary::<QueueRecord>(id)?)
        })
        .await
    }

    async fn remove(&self, id: &str) -> Result<(), StorageError> {
        let id = id.to_string();
        self.blocking(move |db| {
            let rw = db.rw_transaction()?;
            if let Some(record) = rw.get().primary::<QueueRecord>(id)? {
                rw.remove(record)?;
            }
            rw.commit()?;
            Ok(())
        })
        .await
    }

    async fn update(&self, record: QueueRecord) -> Result<bool, StorageError> {
        self.blocking(move |db| {
            let rw = db.rw_transaction()?;
            let Some(existing) = rw.get().primary::<QueueRecord>(record.id.clone())? else {
                warn!("Record {} is no longer queued, skipping update", record.id);
                return Ok(false);
            };
            rw.update(existing, record)?;
            rw.commit()?;
            Ok(true)
        })
        .await
    }

    async fn count(&self) -> Result<usize, StorageError> {
        self.blocking(|db| {
            let r = db.r_transaction()?;
            Ok(r.len().primary::<QueueRecord>()? as usize)
        })
        .await
    }

    async fn clear(&self) -> Result<usize, StorageError> {
        self.blocking(|db| {
            let rw = db.rw_transaction()?;
            let records = rw
                .scan()
                .primary::<QueueRecord>()?
                .all()?
                .collect::<Result<Vec<_>, _>>()?;
            let mappings = rw
                .scan()
                .primary::<IdMapping>()?
                .all()?
                .collect::<Result<Vec<_>, _>>()?;

            let discarded = records.len();
            for record in records {
                rw.remove(record)?;
            }
            for mapping in mappings {
                rw.remove(mapping)?;
            }
            rw.commit()?;
            Ok(discarded)
        })
        .await
    }

    async fn record_mapping(&self, mapping: IdMapping) -> Result<(), StorageError> {
        self.blocking(move |db| {
            let rw = db.rw_transaction()?;
            match rw.get().primary::<IdMapping>(mapping.temp_id.clone())? {
                Some(existing) => rw.update(existing, mapping)?,
                None => rw.insert(mapping)?,
            }
            rw.commit()?;
            Ok(())
        })
        .await
    }

    async fn resolve_mapping(&self, temp_id: &str) -> Result<Option<IdMapping>, StorageError> {
        let temp_id = temp_id.to_string();
        self.blocking(move |db| {
            let r = db.r_transaction()?;
            Ok(r.get().primary::<IdMapping>(temp_id)?)
        })
        .await
    }
}

// ===== IN-MEMORY STORE =====

/// Process-local store for tests and non-interactive contexts. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryQueueStore {
    records: Mutex<BTreeMap<String, QueueRecord>>,
    mappings: Mutex<HashMap<String, IdMapping>>,
    max_records: Option<usize>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that refuses appends once `max_records` are queued.
    pub fn with_capacity_limit(max_records: usize) -> Self {
        Self {
            max_records: Some(max_records),
            ..Self::default()
        }
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn append(&self, record: QueueRecord) -> Result<(), StorageError> {
        let mut records = self.records.lock().await;
        if records.contains_key(&record.id) {
            return Err(StorageError::Duplicate(record.id));
        }
        if let Some(max) = self.max_records {
            if records.len() >= max {
                return Err(StorageError::Unavailable(format!(
                    "queue is full ({} records)",
                    max
                )));
            }
        }
        records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<QueueRecord>, StorageError> {
        Ok(self.records.lock().await.values().cloned().collect())
    }

    async fn get(&self, id: &str) -> Result<Option<QueueRecord>, StorageError> {
        Ok(self.records.lock().await.get(id).cloned())
    }

    async fn remove(&self, id: &str) -> Result<(), StorageError> {
        self.records.lock().await.remove(id);
        Ok(())
    }

    async fn update(&self, record: QueueRecord) -> Result<bool, StorageError> {
        let mut records = self.records.lock().await;
        match records.get_mut(&record.id) {
            Some(existing) => {
                *existing = record;
                Ok(true)
            }
            None => {
                warn!("Record {} is no longer queued, skipping update", record.id);
                Ok(false)
            }
        }
    }

    async fn count(&self) -> Result<usize, StorageError> {
        Ok(self.records.lock().await.len())
    }

    async fn clear(&self) -> Result<usize, StorageError> {
        let mut records = self.records.lock().await;
        let discarded = records.len();
        records.clear();
        self.mappings.lock().await.clear();
        Ok(discarded)
    }

    async fn record_mapping(&self, mapping: IdMapping) -> Result<(), StorageError> {
        self.mappings
            .lock()
            .await
            .insert(mapping.temp_id.clone(), mapping);
        Ok(())
    }

    async fn resolve_mapping(&self, temp_id: &str) -> Result<Option<IdMapping>, StorageError> {
        Ok(self.mappings.lock().await.get(temp_id).cloned())
    }
}
