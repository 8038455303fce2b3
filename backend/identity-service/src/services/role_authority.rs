/// Client for the external role authority (source of truth for roles and permissions)
use async_trait::async_trait;
use resilience::{RetryConfig, RetryError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use uuid::Uuid;

use super::authority::{AuthorityHttp, CallError, Envelope};
use crate::error::{IdentityError, Result};

/// Role and permission facts for a subject
///
/// Callers decide whether a failure demotes to "deny" (authorization) or is fatal (assignment).
#[async_trait]
pub trait RoleAuthority: Send + Sync {
    async fn resolve_role(&self, subject: Uuid) -> Result<String>;
    async fn list_permissions(&self, subject: Uuid) -> Result<BTreeSet<String>>;
    async fn has_permission(&self, subject: Uuid, permission: &str) -> Result<bool>;
    async fn has_role(&self, subject: Uuid, role: &str) -> Result<bool>;
    /// Mutating; never cached
    async fn assign_role(&self, subject: Uuid, role: &str) -> Result<()>;
}

#[derive(Deserialize)]
struct RoleReply {
    role: String,
}

#[derive(Deserialize)]
struct PermissionsReply {
    permissions: Vec<String>,
}

#[derive(Deserialize)]
struct AllowedReply {
    allowed: bool,
}

#[derive(Serialize)]
struct AssignRole<'a> {
    user_id: String,
    role: &'a str,
}

/// HTTP transport to the role authority, retried per `RetryConfig`
#[derive(Clone)]
pub struct HttpRoleAuthority {
    http: AuthorityHttp,
}

impl HttpRoleAuthority {
    pub fn new(base_url: &str, timeout: Duration, retry: RetryConfig) -> Result<Self> {
        let http = AuthorityHttp::new(base_url, timeout, retry)
            .map_err(|e| IdentityError::Internal(format!("Failed to build role client: {e}")))?;
        Ok(Self { http })
    }
}

fn role_error(err: RetryError<CallError>) -> IdentityError {
    IdentityError::RoleAuthority(err.to_string())
}

#[async_trait]
impl RoleAuthority for HttpRoleAuthority {
    async fn resolve_role(&self, subject: Uuid) -> Result<String> {
        let user_id = subject.to_string();
        let reply: RoleReply = self
            .http
            .get_json("/get_role_by_user_id", &[("user_id", &user_id)])
            .await
            .map_err(role_error)?;
        Ok(reply.role)
    }

    async fn list_permissions(&self, subject: Uuid) -> Result<BTreeSet<String>> {
        let user_id = subject.to_string();
        let reply: PermissionsReply = self
            .http
            .get_json("/get_permissions_by_user_id_for_role", &[("user_id", &user_id)])
            .await
            .map_err(role_error)?;
        Ok(reply.permissions.into_iter().collect())
    }

    async fn has_permission(&self, subject: Uuid, permission: &str) -> Result<bool> {
        let user_id = subject.to_string();
        let reply: AllowedReply = self
            .http
            .get_json(
                "/check_permission_by_user_id",
                &[("user_id", &user_id), ("permission", permission)],
            )
            .await
            .map_err(role_error)?;
        Ok(reply.allowed)
    }

    async fn has_role(&self, subject: Uuid, role: &str) -> Result<bool> {
        let user_id = subject.to_string();
        let reply: AllowedReply = self
            .http
            .get_json("/check_role_by_user_id", &[("user_id", &user_id), ("role", role)])
            .await
            .map_err(role_error)?;
        Ok(reply.allowed)
    }

    async fn assign_role(&self, subject: Uuid, role: &str) -> Result<()> {
        let body = Envelope {
            value: AssignRole {
                user_id: subject.to_string(),
                role,
            },
        };
        self.http
            .post_ack("/assign_role", &body)
            .await
            .map_err(role_error)
    }
}
