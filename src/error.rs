//! Error types for the offline queue and the REST client.

use reqwest::StatusCode;

/// Error returned by a remote API call.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The server could not be reached: no route, refused connection, timeout.
    #[error("network error: {0}")]
    Network(String),

    /// The server rejected the request body (4xx other than auth).
    #[error("validation failed ({status}): {body}")]
    Validation { status: u16, body: String },

    /// Missing or rejected credentials (401/403).
    #[error("not authorized ({status}): {body}")]
    Auth { status: u16, body: String },

    /// The server failed while handling the request (5xx).
    #[error("server error ({status}): {body}")]
    Server { status: u16, body: String },

    /// The server answered but the body was not a resource.
    #[error("could not decode response: {0}")]
    Decode(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A photo attached to the mutation could not be read.
    #[error("could not read attachment {name}: {source}")]
    Attachment {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

impl ApiError {
    /// Classifies a non-success HTTP response.
    pub fn from_status(status: StatusCode, body: impl Into<String>) -> Self {
        let code = status.as_u16();
        let body = body.into();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiError::Auth { status: code, body },
            s if s.is_server_error() => ApiError::Server { status: code, body },
            _ => ApiError::Validation { status: code, body },
        }
    }

    /// Only connectivity failures send a mutation to the offline queue.
    pub fn is_network(&self) -> bool {
        matches!(self, ApiError::Network(_))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Validation { status, .. }
            | ApiError::Auth { status, .. }
            | ApiError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            ApiError::InvalidRequest(e.to_string())
        } else if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            ApiError::from_status(status, e.to_string())
        } else {
            ApiError::Network(e.to_string())
        }
    }
}

/// Error raised by a queue store.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] native_db::db_type::Error),

    #[error("record {0} is already queued")]
    Duplicate(String),

    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Error converting between a submitted mutation and its stored form.
#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    /// The file behind a blob could not be read.
    #[error("failed to encode attachment {name}: {source}")]
    Encoding {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// The stored content of an attachment is not valid base64.
    #[error("failed to decode attachment {name}: {source}")]
    Decoding {
        name: String,
        #[source]
        source: base64::DecodeError,
    },
}

/// Any failure surfaced by the offline client.
#[derive(Debug, thiserror::Error)]
pub enum OfflineError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    /// The mutation refers to a record that only exists in the offline queue.
    #[error("refers to unsynced record {0}")]
    UnsyncedReference(String),
}

pub type OfflineResult<T> = Result<T, OfflineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            ApiError::from_status(StatusCode::BAD_REQUEST, "{}"),
            ApiError::Validation { status: 400, .. }
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::UNAUTHORIZED, ""),
            ApiError::Auth { status: 401, .. }
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::FORBIDDEN, ""),
            ApiError::Auth { status: 403, .. }
        ));
        assert!(matches!(
            ApiError::from_status(StatusCode::BAD_GATEWAY, ""),
            ApiError::Server { status: 502, .. }
        ));
        assert_eq!(ApiError::from_status(StatusCode::NOT_FOUND, "").status(), Some(404));
    }

    #[test]
    fn test_only_network_is_network() {
        assert!(ApiError::Network("connection refused".into()).is_network());
        assert!(!ApiError::Decode("eof".into()).is_network());
        assert!(!ApiError::from_status(StatusCode::SERVICE_UNAVAILABLE, "").is_network());
    }
}
