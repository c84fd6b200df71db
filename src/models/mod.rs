pub mod attachment;
pub mod codec;
pub mod resources;
pub mod serde_helpers;
pub mod v1;

// ===== VERSIONED MODELS FOLLOWING NATIVE_DB PATTERN =====
// Stored models live in versioned modules; `data` always points at the latest.

pub mod data {
    pub type QueueRecord = super::v1::QueueRecord;
    pub type IdMapping = super::v1::IdMapping;

    pub use super::v1;
}

pub use data::*;

pub use attachment::{FileAttachment, FileBlob, FileSource, PhotoRef};
pub use codec::JsonCodec;
pub use resources::{
    generate_temp_id, is_temp_id, Action, Crop, Farm, FieldResponse, Mutation, Payload,
    PestCategory, PestDiseaseReport, RecordPayload, Resource, ResourceType, ResponseStatus,
    Severity, SoilSample, Submission, WaterSample, TEMP_ID_PREFIX,
};
