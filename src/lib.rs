pub mod api_client;
pub mod client;
pub mod connectivity;
pub mod error;
pub mod models;
pub mod serialization;
pub mod storage;
pub mod sync;

pub use client::OfflineClient;
pub use error::{ApiError, OfflineError, OfflineResult, SerializationError, StorageError};
