/// Request extractors: bearer authentication, admin authorization and trace ids
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use std::sync::Arc;
use uuid::Uuid;

use super::AppState;
use crate::error::IdentityError;
use crate::security::Claims;

pub const MANAGE_USERS_PERMISSION: &str = "users.manage";

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Caller-supplied request id, or a fresh one
pub fn trace_id(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Caller authenticated by a valid access token
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub claims: Claims,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = IdentityError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(IdentityError::InvalidToken)?;

        let claims = state.verifier.validate_access(token)?;
        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| IdentityError::InvalidToken)?;

        Ok(AuthUser { user_id, claims })
    }
}

/// Authenticated caller holding the user management permission
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminUser {
    type Rejection = IdentityError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !state
            .accounts
            .authorize(user.user_id, MANAGE_USERS_PERMISSION)
            .await
        {
            return Err(IdentityError::PermissionDenied);
        }
        Ok(AdminUser(user))
    }
}
