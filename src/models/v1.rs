use chrono::{DateTime, TimeZone, Utc};
use native_db::{native_db, ToKey};
use native_model::{native_model, Model};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

use super::attachment::FileAttachment;
use super::codec::JsonCodec;
use super::resources::{Action, Mutation, ResourceType};

static LAST_ENQUEUED_MICROS: AtomicI64 = AtomicI64::new(0);

/// Wall-clock timestamp that never repeats or goes backwards within the process.
fn next_enqueued_at() -> DateTime<Utc> {
    let now = Utc::now().timestamp_micros();
    let mut last = LAST_ENQUEUED_MICROS.load(Ordering::SeqCst);
    loop {
        let next = now.max(last + 1);
        match LAST_ENQUEUED_MICROS.compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => return Utc.timestamp_micros(next).single().unwrap_or_else(Utc::now),
            Err(current) => last = current,
        }
    }
}

// ===== QUEUE RECORD =====

/// A mutation waiting in the offline queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[native_model(id = 1, version = 1, with = JsonCodec)]
#[native_db]
pub struct QueueRecord {
    #[primary_key]
    pub id: String,
    pub resource_type: ResourceType,
    pub action: Action,
    pub mutation: Mutation<FileAttachment>,
    /// Placeholder id handed to the caller for a queued create.
    pub temp_id: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

impl QueueRecord {
    pub fn new(mutation: Mutation<FileAttachment>, temp_id: Option<String>) -> Self {
        let enqueued_at = next_enqueued_at();
        let resource_type = mutation.resource_type();
        let action = mutation.action();
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let id = format!(
            "{}-{}-{}-{}",
            resource_type,
            action,
            enqueued_at.timestamp_millis(),
            &suffix[..8]
        );

        Self {
            id,
            resource_type,
            action,
            mutation,
            temp_id,
            enqueued_at,
            retry_count: 0,
            last_error: None,
        }
    }

    pub fn get_id(&self) -> &str {
        &self.id
    }

    pub fn get_retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Replay order: oldest first, id as tie-breaker.
    pub fn replay_key(&self) -> (DateTime<Utc>, &str) {
        (self.enqueued_at, self.id.as_str())
    }
}

// ===== ID MAPPING =====

/// Server id assigned to a record that was created offline under a placeholder id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[native_model(id = 2, version = 1, with = JsonCodec)]
#[native_db]
pub struct IdMapping {
    #[primary_key]
    pub temp_id: String,
    pub server_id: String,
    pub resource_type: ResourceType,
    pub mapped_at: DateTime<Utc>,
}

impl IdMapping {
    pub fn new(temp_id: String, server_id: String, resource_type: ResourceType) -> Self {
        Self {
            temp_id,
            server_id,
            resource_type,
            mapped_at: Utc::now(),
        }
    }
}
