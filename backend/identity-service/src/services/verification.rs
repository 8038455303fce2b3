/// Client for the external verification authority (one-time signup and email-change codes)
use async_trait::async_trait;
use resilience::{RetryConfig, RetryError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use super::authority::{AuthorityHttp, CallError, Envelope};
use crate::error::{IdentityError, Result};

/// Credentials held by the authority while a signup is pending
#[derive(Debug, Clone, Deserialize)]
pub struct PendingRegistration {
    pub email: String,
    pub password: String,
}

#[async_trait]
pub trait VerificationAuthority: Send + Sync {
    /// Register a pending signup; returns the correlation token
    async fn start_registration(&self, email: &str, password: &str) -> Result<String>;
    async fn verify_registration(&self, correlation: &str, code: &str)
        -> Result<PendingRegistration>;
    /// Returns the correlation token
    async fn start_email_change(&self, user_id: Uuid, email: &str) -> Result<String>;
    /// Returns the confirmed new email
    async fn verify_email_change(&self, correlation: &str, code: &str) -> Result<String>;
}

#[derive(Deserialize)]
struct CorrelationReply {
    uuid: String,
}

#[derive(Deserialize)]
struct EmailReply {
    email: String,
}

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct CodeRedemption<'a> {
    uuid: &'a str,
    code: &'a str,
}

#[derive(Serialize)]
struct EmailChange<'a> {
    user_id: String,
    email: &'a str,
}

#[derive(Clone)]
pub struct HttpVerificationAuthority {
    http: AuthorityHttp,
}

impl HttpVerificationAuthority {
    pub fn new(base_url: &str, timeout: Duration, retry: RetryConfig) -> Result<Self> {
        let http = AuthorityHttp::new(base_url, timeout, retry).map_err(|e| {
            IdentityError::Internal(format!("Failed to build verification client: {e}"))
        })?;
        Ok(Self { http })
    }
}

fn start_error(err: RetryError<CallError>) -> IdentityError {
    IdentityError::VerificationAuthority(err.to_string())
}

/// A rejected redemption means the code or token is wrong or expired
fn redeem_error(err: RetryError<CallError>) -> IdentityError {
    match err {
        RetryError::Permanent(CallError::Status(status)) if status.is_client_error() => {
            IdentityError::InvalidVerificationCode
        }
        other => start_error(other),
    }
}

#[async_trait]
impl VerificationAuthority for HttpVerificationAuthority {
    async fn start_registration(&self, email: &str, password: &str) -> Result<String> {
        let body = Envelope {
            value: Credentials { email, password },
        };
        let reply: CorrelationReply = self
            .http
            .post_json("/set-new-user", &body)
            .await
            .map_err(start_error)?;
        Ok(reply.uuid)
    }

    async fn verify_registration(
        &self,
        correlation: &str,
        code: &str,
    ) -> Result<PendingRegistration> {
        let body = Envelope {
            value: CodeRedemption {
                uuid: correlation,
                code,
            },
        };
        self.http
            .post_json("/check-new-user-code", &body)
            .await
            .map_err(redeem_error)
    }

    async fn start_email_change(&self, user_id: Uuid, email: &str) -> Result<String> {
        let body = Envelope {
            value: EmailChange {
                user_id: user_id.to_string(),
                email,
            },
        };
        let reply: CorrelationReply = self
            .http
            .post_json("/start-email-change", &body)
            .await
            .map_err(start_error)?;
        Ok(reply.uuid)
    }

    async fn verify_email_change(&self, correlation: &str, code: &str) -> Result<String> {
        let body = Envelope {
            value: CodeRedemption {
                uuid: correlation,
                code,
            },
        };
        let reply: EmailReply = self
            .http
            .post_json("/verify-email-change", &body)
            .await
            .map_err(redeem_error)?;
        Ok(reply.email)
    }
}
