//! File attachments in the three shapes a photo takes on its way to the server.
//!
//! - [`FileBlob`]: what a form submits, raw bytes in memory or a file on disk.
//! - [`FileAttachment`]: what the queue persists, the bytes as base64 text.
//! - [`PhotoRef`]: what callers get back, a server URL or pending-upload metadata.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where the bytes of a [`FileBlob`] live.
#[derive(Debug, Clone, PartialEq)]
pub enum FileSource {
    Memory(Vec<u8>),
    Disk(PathBuf),
}

/// A binary file attached to an interactive submission.
#[derive(Debug, Clone, PartialEq)]
pub struct FileBlob {
    pub name: String,
    pub mime_type: String,
    pub source: FileSource,
}

impl FileBlob {
    pub fn from_bytes(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            source: FileSource::Memory(bytes),
        }
    }

    /// References a file on disk. Nothing is read until the blob is uploaded or queued.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();
        let mime_type = guess_mime_type(&path).to_string();

        Self {
            name,
            mime_type,
            source: FileSource::Disk(path),
        }
    }

    /// Reads the full content into memory.
    pub async fn read(&self) -> std::io::Result<Vec<u8>> {
        match &self.source {
            FileSource::Memory(bytes) => Ok(bytes.clone()),
            FileSource::Disk(path) => tokio::fs::read(path).await,
        }
    }

    /// Returns the bytes when they are already in memory.
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.source {
            FileSource::Memory(bytes) => Some(bytes),
            FileSource::Disk(_) => None,
        }
    }
}

/// A blob serializes as its file name only. The bytes travel as a multipart part.
impl Serialize for FileBlob {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name)
    }
}

/// Serializable stand-in for a [`FileBlob`] inside a queued record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttachment {
    pub is_file: bool,
    pub name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    /// Standard base64 of the file bytes, no data-URL prefix.
    pub encoded_content: String,
}

impl FileAttachment {
    pub fn encode(name: impl Into<String>, mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            is_file: true,
            name: name.into(),
            mime_type: mime_type.into(),
            size_bytes: bytes.len() as u64,
            encoded_content: base64::encode(bytes),
        }
    }

    pub fn decode_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        base64::decode(&self.encoded_content)
    }
}

/// Photo reference carried by resources returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PhotoRef {
    /// URL of a photo the server already stores.
    Url(String),
    /// Photo waiting in the offline queue.
    Pending {
        name: String,
        mime_type: String,
        size_bytes: u64,
    },
}

impl From<&FileAttachment> for PhotoRef {
    fn from(attachment: &FileAttachment) -> Self {
        PhotoRef::Pending {
            name: attachment.name.clone(),
            mime_type: attachment.mime_type.clone(),
            size_bytes: attachment.size_bytes,
        }
    }
}

fn guess_mime_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("heic") => "image/heic",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_path_derives_name_and_mime() {
        let blob = FileBlob::from_path("/data/photos/Field_07.JPG");
        assert_eq!(blob.name, "Field_07.JPG");
        assert_eq!(blob.mime_type, "image/jpeg");
        assert!(blob.bytes().is_none());

        let unknown = FileBlob::from_path("/data/readings.bin");
        assert_eq!(unknown.mime_type, "application/octet-stream");
    }

    #[test]
    fn test_blob_serializes_as_name_without_reading() {
        let blob = FileBlob::from_path("/nonexistent/leaf.jpg");
        assert_eq!(serde_json::to_value(&blob).unwrap(), "leaf.jpg");
    }

    #[test]
    fn test_attachment_records_size_and_decodes() {
        let bytes = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];
        let attachment = FileAttachment::encode("leaf.jpg", "image/jpeg", &bytes);

        assert!(attachment.is_file);
        assert_eq!(attachment.size_bytes, 6);
        assert_eq!(attachment.decode_bytes().unwrap(), bytes);
    }

    #[test]
    fn test_photo_ref_accepts_server_url() {
        let photo: PhotoRef =
            serde_json::from_str("\"http://localhost:8000/media/soil_samples/a.jpg\"").unwrap();
        assert_eq!(
            photo,
            PhotoRef::Url("http://localhost:8000/media/soil_samples/a.jpg".to_string())
        );
    }
}
