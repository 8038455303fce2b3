/// HTTP API for identity-service
///
/// Public routes live under `/v1`. `/internal/*` is reserved for the upstream OAuth gateway and
/// requires the `X-Internal-API-Key` header.
mod account;
mod admin;
mod auth;
mod extract;

pub use extract::{trace_id, AdminUser, AuthUser, MANAGE_USERS_PERMISSION};

use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post, put},
    Router,
};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::security::TokenVerifier;
use crate::services::account::MAX_AVATAR_UPLOAD_BYTES;
use crate::services::{AccountService, IdentityService};

// Room for multipart boundaries and part headers around the image
const AVATAR_BODY_LIMIT: usize = MAX_AVATAR_UPLOAD_BYTES + 64 * 1024;

/// Shared HTTP server state
pub struct AppState {
    pub identity: IdentityService,
    pub accounts: AccountService,
    pub verifier: TokenVerifier,
    pub internal_api_key: Option<String>,
}

/// Build the HTTP router with all endpoints
pub fn build_router(state: AppState) -> Router {
    let state = Arc::new(state);

    let internal = Router::new()
        .route("/internal/oauth/callback", post(auth::oauth_callback))
        .route(
            "/internal/users/:user_id/identities",
            post(account::attach_identity),
        )
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            internal_auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/v1/auth/signup", post(auth::start_signup))
        .route("/v1/auth/signup/verify", post(auth::verify_signup))
        .route("/v1/auth/signin", post(auth::sign_in))
        .route("/v1/auth/refresh", post(auth::refresh))
        .route("/v1/users/me", get(account::get_me))
        .route("/v1/users/:user_id", get(account::get_user))
        .route("/v1/users/me/profile", patch(account::update_profile))
        .route(
            "/v1/users/me/avatar",
            post(account::upload_avatar).layer(DefaultBodyLimit::max(AVATAR_BODY_LIMIT)),
        )
        .route(
            "/v1/users/me/identities/:provider/:provider_user_id",
            delete(account::remove_identity),
        )
        .route("/v1/users/me/email", post(account::start_email_change))
        .route("/v1/users/me/email/verify", post(account::verify_email_change))
        .route(
            "/v1/admin/users",
            get(admin::list_users).post(admin::create_user),
        )
        .route("/v1/admin/users/:user_id/status", put(admin::change_status))
        .route("/v1/admin/users/:user_id/role", put(admin::change_role))
        .merge(internal)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint (no auth required)
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Prometheus text exposition of the default registry
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}

/// Validates X-Internal-API-Key for gateway-only routes
async fn internal_auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected_key) = &state.internal_api_key else {
        warn!("Internal API key not configured - blocking all internal requests");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "Internal API key not configured",
        )
            .into_response();
    };

    let provided_key = request
        .headers()
        .get("x-internal-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if provided_key != expected_key {
        warn!(
            path = %request.uri().path(),
            "Unauthorized internal API request - invalid API key"
        );
        return (StatusCode::UNAUTHORIZED, "Invalid API key").into_response();
    }

    next.run(request).await
}

/// Serve the router until a shutdown signal arrives
pub async fn start_http_server(
    state: AppState,
    host: &str,
    port: u16,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = build_router(state);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("Starting HTTP API server on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

    Ok(())
}
