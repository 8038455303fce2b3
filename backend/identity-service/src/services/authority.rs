/// JSON-over-HTTP plumbing shared by the external authority clients
///
/// Every call runs inside `resilience::with_retry`. Transport failures, 5xx, 408 and 429 are
/// transient; other statuses and undecodable bodies abort immediately.
use reqwest::{Client, StatusCode};
use resilience::{with_retry, RetryConfig, RetryError, Retryable};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected status {0}")]
    Status(StatusCode),

    #[error("malformed response: {0}")]
    Decode(String),
}

impl Retryable for CallError {
    fn is_transient(&self) -> bool {
        match self {
            CallError::Transport(_) => true,
            CallError::Status(status) => {
                status.is_server_error()
                    || *status == StatusCode::TOO_MANY_REQUESTS
                    || *status == StatusCode::REQUEST_TIMEOUT
            }
            CallError::Decode(_) => false,
        }
    }
}

impl CallError {
    /// Status of a rejected request, if the authority answered at all
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            CallError::Status(status) => Some(*status),
            _ => None,
        }
    }
}

/// Body envelope expected by the authorities: `{"value": {...}}`
#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub value: T,
}

/// Base URL plus a configured client and retry policy
#[derive(Clone)]
pub struct AuthorityHttp {
    client: Client,
    base_url: String,
    retry: RetryConfig,
}

impl AuthorityHttp {
    pub fn new(base_url: &str, timeout: Duration, retry: RetryConfig) -> Result<Self, CallError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CallError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
        })
    }

    pub async fn get_json<R: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<R, RetryError<CallError>> {
        let url = &format!("{}{}", self.base_url, path);
        let client = &self.client;
        with_retry(&self.retry, || async move {
            debug!(%url, "GET authority");
            let response = client
                .get(url)
                .query(query)
                .send()
                .await
                .map_err(transport)?;
            decode(response).await
        })
        .await
    }

    pub async fn post_json<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, RetryError<CallError>> {
        let url = &format!("{}{}", self.base_url, path);
        let client = &self.client;
        with_retry(&self.retry, || async move {
            debug!(%url, "POST authority");
            let response = client
                .post(url)
                .json(body)
                .send()
                .await
                .map_err(transport)?;
            decode(response).await
        })
        .await
    }

    /// POST whose reply body is ignored
    pub async fn post_ack<B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(), RetryError<CallError>> {
        let url = &format!("{}{}", self.base_url, path);
        let client = &self.client;
        with_retry(&self.retry, || async move {
            let response = client
                .post(url)
                .json(body)
                .send()
                .await
                .map_err(transport)?;
            let status = response.status();
            if !status.is_success() {
                return Err(CallError::Status(status));
            }
            Ok(())
        })
        .await
    }
}

fn transport(err: reqwest::Error) -> CallError {
    CallError::Transport(err.to_string())
}

async fn decode<R: DeserializeOwned>(response: reqwest::Response) -> Result<R, CallError> {
    let status = response.status();
    if !status.is_success() {
        return Err(CallError::Status(status));
    }

    let bytes = response.bytes().await.map_err(transport)?;
    serde_json::from_slice(&bytes).map_err(|e| CallError::Decode(e.to_string()))
}
