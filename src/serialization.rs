//! Conversion between submitted mutations, which may reference raw file data,
//! and the fully serializable form persisted in the offline queue.

use crate::error::SerializationError;
use crate::models::{
    FileAttachment, FileBlob, Mutation, PhotoRef, RecordPayload, Resource, Submission,
};
use tracing::debug;

/// Reads the photo, if any, fully into memory and stores it as base64 text.
pub async fn to_record(payload: Submission) -> Result<RecordPayload, SerializationError> {
    let (payload, photo) = payload.replace_photo::<()>(None);
    let attachment = match photo {
        Some(blob) => Some(encode_blob(&blob).await?),
        None => None,
    };
    Ok(payload.replace_photo(attachment).0)
}

/// Restores a stored payload, decoding any attachment back into an in-memory blob.
pub fn from_record(payload: RecordPayload) -> Result<Submission, SerializationError> {
    payload.try_map_photo(decode_attachment)
}

pub async fn encode_mutation(
    mutation: Mutation<FileBlob>,
) -> Result<Mutation<FileAttachment>, SerializationError> {
    Ok(match mutation {
        Mutation::Create(payload) => Mutation::Create(to_record(payload).await?),
        Mutation::Update { id, payload } => Mutation::Update {
            id,
            payload: to_record(payload).await?,
        },
        Mutation::Delete { resource_type, id } => Mutation::Delete { resource_type, id },
    })
}

pub fn decode_mutation(
    mutation: Mutation<FileAttachment>,
) -> Result<Mutation<FileBlob>, SerializationError> {
    mutation.try_map_photo(decode_attachment)
}

/// What a caller sees of a stored payload: attachments become pending-upload references.
pub fn preview(payload: &RecordPayload) -> Resource {
    payload.clone().map_photo(|attachment| PhotoRef::from(&attachment))
}

async fn encode_blob(blob: &FileBlob) -> Result<FileAttachment, SerializationError> {
    let bytes = blob
        .read()
        .await
        .map_err(|source| SerializationError::Encoding {
            name: blob.name.clone(),
            source,
        })?;
    debug!("Encoded attachment {} ({} bytes)", blob.name, bytes.len());
    Ok(FileAttachment::encode(&blob.name, &blob.mime_type, &bytes))
}

fn decode_attachment(attachment: FileAttachment) -> Result<FileBlob, SerializationError> {
    let bytes = attachment
        .decode_bytes()
        .map_err(|source| SerializationError::Decoding {
            name: attachment.name.clone(),
            source,
        })?;
    Ok(FileBlob::from_bytes(attachment.name, attachment.mime_type, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Crop, Farm, FileSource, Payload, ResourceType, SoilSample};
    use chrono::NaiveDate;
    use std::io::Write;

    fn sample_with_photo(photo: Option<FileBlob>) -> Submission {
        let mut sample = SoilSample::new(
            "b5a8e1c2-7f0e-4b8e-9d6a-2c4e5f7a8b90".to_string(),
            NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
            6.4,
        );
        sample.moisture_pct = Some(18.0);
        sample.notes = Some("clay, after rain".to_string());
        sample.photo = photo;
        Payload::SoilSample(sample)
    }

    #[tokio::test]
    async fn test_round_trip_with_attachment() {
        let bytes: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
        let original = sample_with_photo(Some(FileBlob::from_bytes(
            "core.jpg",
            "image/jpeg",
            bytes.clone(),
        )));

        let record = to_record(original.clone()).await.unwrap();
        let attachment = record.photo().unwrap();
        assert!(attachment.is_file);
        assert_eq!(attachment.size_bytes, 4096);

        let restored = from_record(record).unwrap();
        assert_eq!(restored, original);
        assert_eq!(restored.photo().unwrap().bytes(), Some(bytes.as_slice()));
    }

    #[tokio::test]
    async fn test_round_trip_without_attachment() {
        let crop: Submission = Payload::Crop(Crop::new(
            "farm-1".to_string(),
            "Maize".to_string(),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        ));
        let record = to_record(crop.clone()).await.unwrap();
        assert_eq!(from_record(record).unwrap(), crop);
    }

    #[tokio::test]
    async fn test_disk_blob_is_read_into_memory() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"\x89PNG\r\n\x1a\nrest").unwrap();

        let mut blob = FileBlob::from_path(file.path());
        blob.mime_type = "image/png".to_string();
        let mut farm: Farm<FileBlob> = Farm::new(
            "route-3".to_string(),
            "Riverside".to_string(),
            "J. Otieno".to_string(),
            2.0,
        );
        farm.photo = Some(blob.clone());

        let restored = from_record(to_record(Payload::Farm(farm)).await.unwrap()).unwrap();
        let photo = restored.photo().unwrap();
        assert_eq!(photo.name, blob.name);
        assert_eq!(photo.mime_type, "image/png");
        assert_eq!(photo.source, FileSource::Memory(b"\x89PNG\r\n\x1a\nrest".to_vec()));
    }

    #[tokio::test]
    async fn test_unreadable_file_is_encoding_error() {
        let payload = sample_with_photo(Some(FileBlob::from_path("/nonexistent/photo.jpg")));
        let err = to_record(payload).await.unwrap_err();
        assert!(matches!(err, SerializationError::Encoding { ref name, .. } if name == "photo.jpg"));
    }

    #[tokio::test]
    async fn test_malformed_base64_is_decoding_error() {
        let mut record = to_record(sample_with_photo(Some(FileBlob::from_bytes(
            "a.jpg",
            "image/jpeg",
            vec![1, 2, 3],
        ))))
        .await
        .unwrap();
        if let Payload::SoilSample(sample) = &mut record {
            sample.photo.as_mut().unwrap().encoded_content = "not*base64!".to_string();
        }

        let mutation = Mutation::Update {
            id: "42".to_string(),
            payload: record,
        };
        let err = decode_mutation(mutation).unwrap_err();
        assert!(matches!(err, SerializationError::Decoding { .. }));
    }

    #[tokio::test]
    async fn test_delete_passes_through() {
        let mutation: Mutation<FileBlob> = Mutation::Delete {
            resource_type: ResourceType::PestDisease,
            id: "7".to_string(),
        };
        let stored = encode_mutation(mutation.clone()).await.unwrap();
        assert_eq!(decode_mutation(stored).unwrap(), mutation);
    }

    #[tokio::test]
    async fn test_preview_marks_pending_photo() {
        let record = to_record(sample_with_photo(Some(FileBlob::from_bytes(
            "b.jpg",
            "image/jpeg",
            vec![0; 10],
        ))))
        .await
        .unwrap();

        match preview(&record).photo() {
            Some(PhotoRef::Pending { name, size_bytes, .. }) => {
                assert_eq!(name, "b.jpg");
                assert_eq!(*size_bytes, 10);
            }
            other => panic!("unexpected photo: {:?}", other),
        }
    }
}
