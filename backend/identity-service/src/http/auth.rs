/// Signup, sign-in, refresh and OAuth callback endpoints
use axum::{extract::State, http::HeaderMap, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use super::{trace_id, AppState};
use crate::error::Result;
use crate::models::{OAuthIdentity, ProviderType};
use crate::services::AuthOutcome;

#[derive(Debug, Deserialize, Validate)]
pub struct CredentialsRequest {
    #[validate(length(min = 1, max = 254))]
    pub email: String,
    #[validate(length(min = 1, max = 1024))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyCodeRequest {
    #[validate(length(min = 1))]
    pub correlation_id: String,
    #[validate(length(min = 1, max = 64))]
    pub code: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RefreshRequest {
    #[validate(length(min = 1))]
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct OAuthCallbackRequest {
    #[validate(length(min = 1))]
    pub provider: String,
    #[validate(length(min = 1, max = 255))]
    pub provider_user_id: String,
    #[validate(length(min = 1, max = 254))]
    pub email: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl OAuthCallbackRequest {
    pub fn into_identity(self) -> Result<OAuthIdentity> {
        Ok(OAuthIdentity {
            provider_type: self.provider.parse::<ProviderType>()?,
            provider_user_id: self.provider_user_id,
            email: self.email,
            display_name: self.display_name,
            avatar_url: self.avatar_url,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct PendingResponse {
    pub correlation_id: String,
}

/// POST /v1/auth/signup
pub async fn start_signup(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CredentialsRequest>,
) -> Result<(StatusCode, Json<PendingResponse>)> {
    req.validate()?;
    let correlation_id = state
        .identity
        .start_signup(&req.email, &req.password)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(PendingResponse { correlation_id })))
}

/// POST /v1/auth/signup/verify
pub async fn verify_signup(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<VerifyCodeRequest>,
) -> Result<(StatusCode, Json<AuthOutcome>)> {
    req.validate()?;
    let outcome = state
        .identity
        .verify_signup(&trace_id(&headers), &req.correlation_id, &req.code)
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// POST /v1/auth/signin
pub async fn sign_in(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CredentialsRequest>,
) -> Result<Json<AuthOutcome>> {
    req.validate()?;
    let outcome = state.identity.sign_in(&req.email, &req.password).await?;
    Ok(Json(outcome))
}

/// POST /v1/auth/refresh
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<AuthOutcome>> {
    req.validate()?;
    let outcome = state.identity.refresh_tokens(&req.refresh_token).await?;
    Ok(Json(outcome))
}

/// POST /internal/oauth/callback
///
/// The gateway has already completed the provider exchange; this reconciles the identity.
pub async fn oauth_callback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<OAuthCallbackRequest>,
) -> Result<Json<AuthOutcome>> {
    req.validate()?;
    let identity = req.into_identity()?;

    let outcome = state
        .identity
        .handle_oauth_callback(&trace_id(&headers), identity)
        .await?;
    Ok(Json(outcome))
}
