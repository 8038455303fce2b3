/// Self-service account endpoints
use axum::{
    extract::{Multipart, Path, State},
    http::HeaderMap,
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use super::auth::{OAuthCallbackRequest, PendingResponse, VerifyCodeRequest};
use super::{trace_id, AppState, AuthUser};
use crate::error::{IdentityError, Result};
use crate::models::{Profile, ProfilePatch, ProviderType, User};
use crate::services::account::MAX_AVATAR_UPLOAD_BYTES;
use crate::services::{AccountView, AvatarUpload, LinkedIdentity};

/// Multipart field carrying the avatar image
const AVATAR_FIELD: &str = "file";

#[derive(Debug, Deserialize, Validate)]
pub struct EmailChangeRequest {
    #[validate(length(min = 1, max = 254))]
    pub email: String,
}

/// GET /v1/users/me
pub async fn get_me(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
) -> Result<Json<AccountView>> {
    Ok(Json(state.accounts.get_me(caller.user_id).await?))
}

/// GET /v1/users/:user_id
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    _caller: AuthUser,
    Path(user_id): Path<Uuid>,
) -> Result<Json<User>> {
    Ok(Json(state.accounts.get_user(user_id).await?))
}

/// PATCH /v1/users/me/profile
pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    headers: HeaderMap,
    Json(patch): Json<ProfilePatch>,
) -> Result<Json<Profile>> {
    let profile = state
        .accounts
        .update_profile(&trace_id(&headers), caller.user_id, patch)
        .await?;
    Ok(Json(profile))
}

/// POST /v1/users/me/email
pub async fn start_email_change(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Json(req): Json<EmailChangeRequest>,
) -> Result<(StatusCode, Json<PendingResponse>)> {
    req.validate()?;
    let correlation_id = state
        .identity
        .start_email_change(caller.user_id, &req.email)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(PendingResponse { correlation_id })))
}

/// POST /v1/users/me/email/verify
pub async fn verify_email_change(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    headers: HeaderMap,
    Json(req): Json<VerifyCodeRequest>,
) -> Result<Json<User>> {
    req.validate()?;
    let user = state
        .identity
        .verify_email_change(
            &trace_id(&headers),
            caller.user_id,
            &req.correlation_id,
            &req.code,
        )
        .await?;
    Ok(Json(user))
}

/// POST /v1/users/me/avatar
pub async fn upload_avatar(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<Profile>)> {
    let mut upload: Option<AvatarUpload> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| IdentityError::Validation(format!("multipart error: {e}")))?
    {
        if field.name() != Some(AVATAR_FIELD) {
            continue;
        }

        let mut file = AvatarUpload {
            filename: field.file_name().map(ToString::to_string),
            content_type: field.content_type().map(ToString::to_string),
            bytes: Vec::new(),
        };
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| IdentityError::Validation(format!("failed to read avatar: {e}")))?
        {
            if file.bytes.len() + chunk.len() > MAX_AVATAR_UPLOAD_BYTES {
                return Err(IdentityError::Validation(format!(
                    "avatar exceeds {} bytes",
                    MAX_AVATAR_UPLOAD_BYTES
                )));
            }
            file.bytes.extend_from_slice(&chunk);
        }
        upload = Some(file);
        break;
    }

    let upload = upload.ok_or_else(|| {
        IdentityError::Validation(format!("multipart field '{AVATAR_FIELD}' is required"))
    })?;

    let profile = state
        .accounts
        .upload_avatar(&trace_id(&headers), caller.user_id, upload)
        .await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

/// DELETE /v1/users/me/identities/:provider/:provider_user_id
pub async fn remove_identity(
    State(state): State<Arc<AppState>>,
    caller: AuthUser,
    Path((provider, provider_user_id)): Path<(String, String)>,
) -> Result<StatusCode> {
    let provider_type = provider.parse::<ProviderType>()?;
    state
        .accounts
        .remove_identity(caller.user_id, provider_type, &provider_user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /internal/users/:user_id/identities
///
/// Called by the OAuth gateway once the provider has confirmed the identity.
pub async fn attach_identity(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
    Json(req): Json<OAuthCallbackRequest>,
) -> Result<(StatusCode, Json<LinkedIdentity>)> {
    req.validate()?;
    let identity = req.into_identity()?;

    let linked = state
        .accounts
        .attach_identity(&trace_id(&headers), user_id, identity)
        .await?;
    Ok((StatusCode::CREATED, Json(linked)))
}
