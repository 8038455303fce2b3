// Router tests: requests go through the full axum stack via `oneshot`

mod common;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use common::{sign_up, Harness, VALID_CODE};
use identity_service::http::{build_router, AppState, MANAGE_USERS_PERMISSION};
use identity_service::services::account::MAX_AVATAR_UPLOAD_BYTES;
use serde_json::{json, Value};
use tower::ServiceExt;

const INTERNAL_KEY: &str = "gateway-key";

fn router(h: &Harness) -> Router {
    build_router(AppState {
        identity: h.identity.clone(),
        accounts: h.accounts.clone(),
        verifier: h.signer.verifier(),
        internal_api_key: Some(INTERNAL_KEY.to_string()),
    })
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_with_token(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

const BOUNDARY: &str = "identity-test-boundary";

fn multipart_avatar(token: &str, field: &str, bytes: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"me.png\"\r\nContent-Type: image/png\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/v1/users/me/avatar")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn test_health() {
    let h = Harness::new();
    let response = router(&h)
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_exposed() {
    let h = Harness::new();
    let response = router(&h)
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_signup_over_http() {
    let h = Harness::new();

    let (status, body) = send(
        router(&h),
        post_json(
            "/v1/auth/signup",
            json!({ "email": "ada@example.com", "password": "password123" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let correlation = body["correlation_id"].as_str().unwrap().to_string();

    let (status, body) = send(
        router(&h),
        post_json(
            "/v1/auth/signup/verify",
            json!({ "correlation_id": correlation, "code": VALID_CODE }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["user"]["email"], "ada@example.com");
    assert_eq!(body["tokens"]["token_type"], "Bearer");
    assert!(body["user"].get("password_hash").is_none());
}

#[tokio::test]
async fn test_bad_credentials_render_error_body() {
    let h = Harness::new();

    let (status, body) = send(
        router(&h),
        post_json(
            "/v1/auth/signin",
            json!({ "email": "ada@example.com", "password": "password123" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "authentication");
    assert_eq!(body["message"], "Invalid credentials");
}

#[tokio::test]
async fn test_me_requires_bearer_token() {
    let h = Harness::new();
    let created = sign_up(&h, "ada@example.com", "password123").await;

    let (status, _) = send(
        router(&h),
        Request::builder()
            .uri("/v1/users/me")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Refresh tokens are not accepted as bearer credentials
    let (status, _) = send(
        router(&h),
        get_with_token("/v1/users/me", &created.tokens.refresh_token),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(
        router(&h),
        get_with_token("/v1/users/me", &created.tokens.access_token),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["email"], "ada@example.com");
    assert_eq!(body["role"], "user");
}

#[tokio::test]
async fn test_oauth_callback_requires_internal_key() {
    let h = Harness::new();
    let payload = json!({
        "provider": "google",
        "provider_user_id": "g-1",
        "email": "ada@example.com",
        "display_name": "Ada"
    });

    let (status, _) = send(router(&h), post_json("/internal/oauth/callback", payload.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let mut request = post_json("/internal/oauth/callback", payload);
    request
        .headers_mut()
        .insert("x-internal-api-key", INTERNAL_KEY.parse().unwrap());
    let (status, body) = send(router(&h), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["profile"]["display_name"], "Ada");
}

#[tokio::test]
async fn test_oauth_callback_unknown_provider() {
    let h = Harness::new();
    let mut request = post_json(
        "/internal/oauth/callback",
        json!({
            "provider": "myspace",
            "provider_user_id": "m-1",
            "email": "ada@example.com"
        }),
    );
    request
        .headers_mut()
        .insert("x-internal-api-key", INTERNAL_KEY.parse().unwrap());

    let (status, body) = send(router(&h), request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation");
}

#[tokio::test]
async fn test_admin_routes_require_permission() {
    let h = Harness::new();
    let created = sign_up(&h, "ada@example.com", "password123").await;

    let (status, body) = send(
        router(&h),
        get_with_token("/v1/admin/users", &created.tokens.access_token),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    h.roles.grant("user", MANAGE_USERS_PERMISSION);
    let (status, body) = send(
        router(&h),
        get_with_token("/v1/admin/users?limit=10", &created.tokens.access_token),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_admin_status_change_validates_transition() {
    let h = Harness::new();
    let admin = sign_up(&h, "admin@example.com", "password123").await;
    let target = sign_up(&h, "ada@example.com", "password123").await;
    h.roles.grant("user", MANAGE_USERS_PERMISSION);

    let request = |status: &str| {
        Request::builder()
            .method("PUT")
            .uri(format!("/v1/admin/users/{}/status", target.user.id))
            .header(header::AUTHORIZATION, format!("Bearer {}", admin.tokens.access_token))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "status": status }).to_string()))
            .unwrap()
    };

    let (status, body) = send(router(&h), request("BLOCKED")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "BLOCKED");

    let (status, body) = send(router(&h), request("ACTIVE")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation");
}

#[tokio::test]
async fn test_get_user_by_id_over_http() {
    let h = Harness::new();
    let caller = sign_up(&h, "ada@example.com", "password123").await;
    let other = sign_up(&h, "bob@example.com", "password123").await;

    let (status, body) = send(
        router(&h),
        get_with_token(
            &format!("/v1/users/{}", other.user.id),
            &caller.tokens.access_token,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "bob@example.com");
    assert!(body.get("password_hash").is_none());

    let (status, body) = send(
        router(&h),
        get_with_token(
            &format!("/v1/users/{}", uuid::Uuid::new_v4()),
            &caller.tokens.access_token,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_avatar_upload_over_http() {
    let h = Harness::new();
    let created = sign_up(&h, "ada@example.com", "password123").await;

    let (status, body) = send(
        router(&h),
        multipart_avatar(&created.tokens.access_token, "file", b"\x89PNG fake image"),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["avatar_ref"], "files/upload-1");

    let uploads = h.files.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].filename, "me.png");
    assert_eq!(uploads[0].content_type, "image/png");
    assert_eq!(uploads[0].bytes, b"\x89PNG fake image".to_vec());
}

#[tokio::test]
async fn test_avatar_upload_rejects_missing_or_oversized_file() {
    let h = Harness::new();
    let created = sign_up(&h, "ada@example.com", "password123").await;

    let (status, body) = send(
        router(&h),
        multipart_avatar(&created.tokens.access_token, "photo", b"data"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation");

    let oversized = vec![7u8; MAX_AVATAR_UPLOAD_BYTES + 1];
    let (status, _) = send(
        router(&h),
        multipart_avatar(&created.tokens.access_token, "file", &oversized),
    )
    .await;
    assert!(status.is_client_error());
    assert!(h.files.uploads().is_empty());
}

#[tokio::test]
async fn test_identity_attach_and_remove_over_http() {
    let h = Harness::new();
    let created = sign_up(&h, "ada@example.com", "password123").await;
    let attach_uri = format!("/internal/users/{}/identities", created.user.id);
    let payload = json!({
        "provider": "github",
        "provider_user_id": "gh-7",
        "email": "ada@example.com"
    });

    let (status, _) = send(router(&h), post_json(&attach_uri, payload.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let mut request = post_json(&attach_uri, payload);
    request
        .headers_mut()
        .insert("x-internal-api-key", INTERNAL_KEY.parse().unwrap());
    let (status, body) = send(router(&h), request).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["link"]["provider_type"], "github");
    assert_eq!(body["link"]["user_id"], created.user.id.to_string());

    let remove = |path: &str| {
        Request::builder()
            .method("DELETE")
            .uri(path)
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", created.tokens.access_token),
            )
            .body(Body::empty())
            .unwrap()
    };

    let (status, _) = send(router(&h), remove("/v1/users/me/identities/github/gh-7")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(h.links.all().is_empty());

    let (status, body) = send(router(&h), remove("/v1/users/me/identities/github/gh-7")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}
