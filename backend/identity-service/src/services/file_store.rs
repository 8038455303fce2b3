/// Client for the local file store that owns ingested avatars
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{IdentityError, Result};

/// One file to store
#[derive(Debug, Clone)]
pub struct Upload {
    pub owner_id: Uuid,
    pub file_kind: &'static str,
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait FileStore: Send + Sync {
    /// Store the file and return its local handle
    async fn upload(&self, upload: Upload) -> Result<String>;
}

#[derive(Deserialize)]
struct UploadReply {
    #[serde(default)]
    id: String,
}

#[derive(Clone)]
pub struct HttpFileStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFileStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl FileStore for HttpFileStore {
    async fn upload(&self, upload: Upload) -> Result<String> {
        let part = Part::bytes(upload.bytes).file_name(upload.filename);
        let part = part
            .mime_str(&upload.content_type)
            .map_err(|e| IdentityError::FileStore(format!("invalid content type: {e}")))?;

        let form = Form::new()
            .part("file", part)
            .text("content_type", upload.content_type)
            .text("owner_id", upload.owner_id.to_string())
            .text("file_kind", upload.file_kind);

        let response = self
            .client
            .post(format!("{}/files/upload", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| IdentityError::FileStore(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IdentityError::FileStore(format!("upload rejected: status {status}")));
        }

        let reply: UploadReply = response
            .json()
            .await
            .map_err(|e| IdentityError::FileStore(format!("malformed upload response: {e}")))?;
        if reply.id.is_empty() {
            return Err(IdentityError::FileStore("upload response missing id".to_string()));
        }
        Ok(reply.id)
    }
}
