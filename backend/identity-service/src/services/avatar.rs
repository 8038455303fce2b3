/// Avatar ingestion: copy a remote image into the local file store
///
/// Best-effort from the caller's side. Every failure is reported as an [`AvatarError`] and the
/// identity flows log it and carry on without an avatar.
use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use super::file_store::{FileStore, Upload};
use crate::validators::validate_remote_url;

pub const DEFAULT_MAX_AVATAR_BYTES: usize = 5 * 1024 * 1024;
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);
/// File kind the file store files avatars under
pub const AVATAR_FILE_KIND: &str = "avatar";

pub(crate) const FALLBACK_FILENAME: &str = "avatar";
pub(crate) const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum AvatarError {
    #[error("invalid avatar URL")]
    InvalidUrl,

    #[error("avatar fetch failed: {0}")]
    Fetch(String),

    #[error("avatar host answered with status {0}")]
    Status(u16),

    #[error("avatar exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("avatar upload failed: {0}")]
    Upload(String),
}

#[async_trait]
pub trait AvatarIngestor: Send + Sync {
    /// Fetch `remote_url` and store it for `owner`; returns the local handle
    async fn ingest(&self, trace_id: &str, owner: Uuid, remote_url: &str)
        -> Result<String, AvatarError>;
}

pub struct HttpAvatarIngestor {
    client: reqwest::Client,
    file_store: Arc<dyn FileStore>,
    max_bytes: usize,
}

impl HttpAvatarIngestor {
    pub fn new(
        file_store: Arc<dyn FileStore>,
        timeout: Duration,
        max_bytes: usize,
    ) -> Result<Self, AvatarError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AvatarError::Fetch(e.to_string()))?;

        Ok(Self {
            client,
            file_store,
            max_bytes,
        })
    }

    /// Read the body, giving up as soon as it grows past the cap
    async fn read_capped(&self, mut response: reqwest::Response) -> Result<Vec<u8>, AvatarError> {
        let limit = self.max_bytes;

        if let Some(declared) = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok())
        {
            if declared > limit {
                return Err(AvatarError::TooLarge { limit });
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| AvatarError::Fetch(e.to_string()))?
        {
            if body.len() + chunk.len() > limit {
                return Err(AvatarError::TooLarge { limit });
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

/// Last non-empty path segment of the URL, or a generic name
pub fn filename_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(str::to_string)
        .unwrap_or_else(|| FALLBACK_FILENAME.to_string())
}

#[async_trait]
impl AvatarIngestor for HttpAvatarIngestor {
    async fn ingest(
        &self,
        trace_id: &str,
        owner: Uuid,
        remote_url: &str,
    ) -> Result<String, AvatarError> {
        let url = validate_remote_url(remote_url).map_err(|_| AvatarError::InvalidUrl)?;
        debug!(trace_id, user_id = %owner, host = url.host_str(), "Fetching remote avatar");

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| AvatarError::Fetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AvatarError::Status(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .unwrap_or(FALLBACK_CONTENT_TYPE)
            .to_string();

        let bytes = self.read_capped(response).await?;

        let upload = Upload {
            owner_id: owner,
            file_kind: AVATAR_FILE_KIND,
            filename: filename_from_url(&url),
            content_type,
            bytes,
        };
        self.file_store
            .upload(upload)
            .await
            .map_err(|e| AvatarError::Upload(e.to_string()))
    }
}
