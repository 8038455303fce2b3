/// User administration endpoints, gated on the user management permission
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use super::{trace_id, AdminUser, AppState};
use crate::error::Result;
use crate::models::{User, UserStatus};

const DEFAULT_PAGE_SIZE: i64 = 20;

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 1, max = 254))]
    pub email: String,
    #[validate(length(min = 1, max = 1024))]
    pub password: String,
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RoleRequest {
    #[validate(length(min = 1, max = 64))]
    pub role: String,
}

/// GET /v1/admin/users
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(query): Query<ListUsersQuery>,
) -> Result<Json<Vec<User>>> {
    let users = state
        .accounts
        .list_users(
            query.offset.unwrap_or(0),
            query.limit.unwrap_or(DEFAULT_PAGE_SIZE),
        )
        .await?;
    Ok(Json(users))
}

/// POST /v1/admin/users
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    headers: HeaderMap,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<User>)> {
    req.validate()?;
    let trace_id = trace_id(&headers);
    let user = state
        .accounts
        .create_user(&trace_id, &req.email, &req.password, req.role.as_deref())
        .await?;

    info!(admin_id = %admin.user_id, user_id = %user.id, trace_id, "Admin created user");
    Ok((StatusCode::CREATED, Json(user)))
}

/// PUT /v1/admin/users/:user_id/status
pub async fn change_status(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    headers: HeaderMap,
    Path(user_id): Path<Uuid>,
    Json(req): Json<StatusRequest>,
) -> Result<Json<User>> {
    let status: UserStatus = req.status.parse()?;
    let trace_id = trace_id(&headers);
    let user = state
        .accounts
        .change_status(&trace_id, user_id, status)
        .await?;

    info!(admin_id = %admin.user_id, %user_id, trace_id, "Admin changed user status");
    Ok(Json(user))
}

/// PUT /v1/admin/users/:user_id/role
pub async fn change_role(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(user_id): Path<Uuid>,
    Json(req): Json<RoleRequest>,
) -> Result<StatusCode> {
    req.validate()?;
    state.accounts.change_role(user_id, &req.role).await?;

    info!(admin_id = %admin.user_id, %user_id, role = %req.role, "Admin changed user role");
    Ok(StatusCode::NO_CONTENT)
}
