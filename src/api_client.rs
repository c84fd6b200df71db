use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Method, Response};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::error::ApiError;
use crate::models::{FileBlob, Mutation, Payload, Resource, ResourceType, Submission};

pub const DEFAULT_API_URL: &str = "http://localhost:8000/api";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_QUEUE_PATH: &str = "agrisurvey-offline.db";

/// Fields the server assigns; never sent in a request body.
const SERVER_FIELDS: [&str; 3] = ["id", "created_at", "updated_at"];

// ===== CONFIGURATION =====

#[derive(Clone)]
pub struct ApiConfig {
    pub api_url: Url,
    pub access_token: Option<String>,
    pub timeout: Duration,
    pub queue_path: PathBuf,
}

impl ApiConfig {
    pub fn new(api_url: &str, access_token: Option<String>) -> Result<Self> {
        Ok(Self {
            api_url: normalize_api_url(api_url)?,
            access_token,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            queue_path: PathBuf::from(DEFAULT_QUEUE_PATH),
        })
    }

    /// Creates a config from environment variables, reading `.env` first if present
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let api_url =
            std::env::var("AGRISURVEY_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());

        let access_token = std::env::var("AGRISURVEY_ACCESS_TOKEN")
            .ok()
            .filter(|token| !token.is_empty());
        if access_token.is_none() {
            warn!("AGRISURVEY_ACCESS_TOKEN not set, requests will be sent without authorization");
        }

        let timeout_secs = match std::env::var("AGRISURVEY_TIMEOUT_SECS") {
            Ok(value) => value
                .parse::<u64>()
                .with_context(|| format!("AGRISURVEY_TIMEOUT_SECS is not a number: {}", value))?,
            Err(_) => DEFAULT_TIMEOUT_SECS,
        };

        let queue_path = std::env::var("AGRISURVEY_QUEUE_PATH")
            .unwrap_or_else(|_| DEFAULT_QUEUE_PATH.to_string());

        Ok(Self {
            api_url: normalize_api_url(&api_url)?,
            access_token,
            timeout: Duration::from_secs(timeout_secs),
            queue_path: PathBuf::from(queue_path),
        })
    }

    pub fn set_api_url(&mut self, api_url: &str) -> Result<()> {
        self.api_url = normalize_api_url(api_url)?;
        Ok(())
    }

    pub fn get_api_url(&self) -> &Url {
        &self.api_url
    }

    pub fn get_access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    pub fn get_timeout(&self) -> Duration {
        self.timeout
    }

    pub fn get_queue_path(&self) -> &PathBuf {
        &self.queue_path
    }
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("api_url", &self.api_url.as_str())
            .field(
                "access_token",
                if self.access_token.is_some() {
                    &"<set>"
                } else {
                    &"<none>"
                },
            )
            .field("timeout", &self.timeout)
            .field("queue_path", &self.queue_path)
            .finish()
    }
}

/// Parses the API base URL and makes sure it ends with `/` so collection paths join under it.
fn normalize_api_url(raw: &str) -> Result<Url> {
    let mut raw = raw.trim().to_string();
    if !raw.ends_with('/') {
        raw.push('/');
    }
    Url::parse(&raw).map_err(|e| anyhow!("Invalid API URL {}: {}", raw, e))
}

// ===== REMOTE API =====

/// The REST collections the offline queue replays against.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn create(&self, payload: &Submission) -> Result<Resource, ApiError>;

    async fn update(&self, id: &str, payload: &Submission) -> Result<Resource, ApiError>;

    async fn delete(&self, resource_type: ResourceType, id: &str) -> Result<(), ApiError>;

    /// Succeeds when the server can be reached at all.
    async fn ping(&self) -> Result<(), ApiError>;

    /// Dispatches a mutation to the method implied by its action.
    async fn apply(&self, mutation: &Mutation<FileBlob>) -> Result<Option<Resource>, ApiError> {
        match mutation {
            Mutation::Create(payload) => self.create(payload).await.map(Some),
            Mutation::Update { id, payload } => self.update(id, payload).await.map(Some),
            Mutation::Delete { resource_type, id } => {
                self.delete(*resource_type, id).await.map(|_| None)
            }
        }
    }
}

// ===== HTTP CLIENT =====

pub struct HttpApi {
    config: ApiConfig,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpApi")
            .field("config", &self.config)
            .finish()
    }
}

impl HttpApi {
    pub fn new(config: ApiConfig) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(token) = config.get_access_token() {
            let mut value = reqwest::header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| anyhow!("Invalid auth header: {}", e))?;
            value.set_sensitive(true);
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.get_timeout())
            .build()
            .map_err(|e| anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self { config, client })
    }

    pub fn get_config(&self) -> &ApiConfig {
        &self.config
    }

    /// `{api_url}/{collection}/`
    pub fn collection_url(&self, resource_type: ResourceType) -> Result<Url, ApiError> {
        self.join(&format!("{}/", resource_type.collection()))
    }

    /// `{api_url}/{collection}/{id}/`
    pub fn item_url(&self, resource_type: ResourceType, id: &str) -> Result<Url, ApiError> {
        self.join(&format!("{}/{}/", resource_type.collection(), id))
    }

    fn join(&self, path: &str) -> Result<Url, ApiError> {
        self.config
            .api_url
            .join(path)
            .map_err(|e| ApiError::InvalidRequest(format!("{}: {}", path, e)))
    }

    async fn send_payload(
        &self,
        method: Method,
        url: Url,
        payload: &Submission,
    ) -> Result<Resource, ApiError> {
        let resource_type = payload.resource_type();
        let fields = wire_fields(payload)?;
        let request = self.client.request(method.clone(), url.clone());

        let request = match payload.photo() {
            None => request.json(&fields),
            Some(blob) => {
                let bytes = blob.read().await.map_err(|source| ApiError::Attachment {
                    name: blob.name.clone(),
                    source,
                })?;
                let mut form = Form::new();
                for (key, value) in fields {
                    if let Some(text) = form_text(&value) {
                        form = form.text(key, text);
                    }
                }
                let part = Part::bytes(bytes)
                    .file_name(blob.name.clone())
                    .mime_str(&blob.mime_type)?;
                request.multipart(form.part("photo", part))
            }
        };

        debug!("{} {}", method, url);
        let response = check_status(request.send().await?).await?;
        decode_resource(resource_type, response).await
    }
}

#[async_trait]
impl RemoteApi for HttpApi {
    async fn create(&self, payload: &Submission) -> Result<Resource, ApiError> {
        let url = self.collection_url(payload.resource_type())?;
        self.send_payload(Method::POST, url, payload).await
    }

    async fn update(&self, id: &str, payload: &Submission) -> Result<Resource, ApiError> {
        let url = self.item_url(payload.resource_type(), id)?;
        self.send_payload(Method::PUT, url, payload).await
    }

    async fn delete(&self, resource_type: ResourceType, id: &str) -> Result<(), ApiError> {
        let url = self.item_url(resource_type, id)?;
        debug!("DELETE {}", url);
        check_status(self.client.delete(url).send().await?).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), ApiError> {
        // Any HTTP answer, even 401, means the server is reachable.
        self.client
            .get(self.config.api_url.clone())
            .send()
            .await
            .map(|_| ())
            .map_err(ApiError::from)
    }
}

/// Request body fields of a payload: server-managed fields and the photo removed.
pub fn wire_fields<P: Serialize>(
    payload: &Payload<P>,
) -> Result<serde_json::Map<String, serde_json::Value>, ApiError> {
    let mut fields = payload
        .to_fields()
        .map_err(|e| ApiError::InvalidRequest(e.to_string()))?;
    for key in SERVER_FIELDS {
        fields.remove(key);
    }
    fields.remove("photo");
    Ok(fields)
}

/// Text form of a JSON value for a multipart field; `None` for null.
fn form_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    warn!("Request rejected with {}: {}", status, body);
    Err(ApiError::from_status(status, body))
}

async fn decode_resource(
    resource_type: ResourceType,
    response: Response,
) -> Result<Resource, ApiError> {
    let value = response.json::<serde_json::Value>().await?;
    Resource::from_value(resource_type, value).map_err(|e| ApiError::Decode(e.to_string()))
}
