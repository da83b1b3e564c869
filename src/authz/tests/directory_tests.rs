//! Logto client tests against a mock management API on an ephemeral port

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use rowgate_authz::{
    AuthzError, CompilerOptions, EntityMeta, EntityRegistry, FieldMeta, InMemoryVersionCache,
    LogtoConfig, LogtoDirectory, PermissionsVersions, RoleDirectory, RuleCompiler, UserDirectory,
    VersionCache,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const BASIC_AUTH: &str = "Basic bTJtOnMzY3JldA==";
const TOKEN: &str = "mock-token";

#[derive(Default)]
struct Mock {
    tokens: AtomicUsize,
    users: Mutex<HashMap<String, Value>>,
}

fn bearer_ok(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map_or(false, |v| v == format!("Bearer {}", TOKEN))
}

async fn token(
    State(mock): State<Arc<Mock>>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let basic = headers.get("authorization").and_then(|v| v.to_str().ok());
    if basic != Some(BASIC_AUTH) {
        return (StatusCode::UNAUTHORIZED, "invalid_client").into_response();
    }
    if form.get("grant_type").map(String::as_str) != Some("client_credentials")
        || form.get("scope").map(String::as_str) != Some("all")
        || form.get("resource").map(String::as_str) != Some("https://default.logto.app/api")
    {
        return (StatusCode::BAD_REQUEST, "invalid_request").into_response();
    }

    mock.tokens.fetch_add(1, Ordering::SeqCst);
    Json(json!({ "access_token": TOKEN, "expires_in": 3600, "token_type": "Bearer" })).into_response()
}

async fn roles(headers: HeaderMap, Query(query): Query<HashMap<String, String>>) -> Response {
    if !bearer_ok(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    assert_eq!(query.get("type").map(String::as_str), Some("User"));
    Json(json!([
        { "id": "r1", "name": "Supercow", "description": "all pages", "type": "User" },
        { "id": "r2", "name": "broken", "description": "", "type": "User" }
    ]))
    .into_response()
}

async fn scopes(headers: HeaderMap, Path(id): Path<String>) -> Response {
    if !bearer_ok(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match id.as_str() {
        "r1" => Json(json!([
            { "id": "s1", "name": "read:pages", "resourceId": "api" },
            { "id": "s2", "name": "create:pages", "resourceId": "api" },
            { "id": "s3", "name": "read:pagez", "resourceId": "api" }
        ]))
        .into_response(),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
    }
}

async fn get_user(State(mock): State<Arc<Mock>>, headers: HeaderMap, Path(id): Path<String>) -> Response {
    if !bearer_ok(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let users = mock.users.lock().unwrap();
    let custom_data = users.get(&id).cloned().unwrap_or_else(|| json!({}));
    Json(json!({ "id": id, "customData": custom_data })).into_response()
}

async fn patch_user(
    State(mock): State<Arc<Mock>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    if !bearer_ok(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    mock.users.lock().unwrap().insert(id.clone(), body["customData"].clone());
    Json(json!({ "id": id })).into_response()
}

async fn spawn_mock() -> (String, Arc<Mock>) {
    let mock = Arc::new(Mock::default());
    let app = Router::new()
        .route("/oidc/token", post(token))
        .route("/api/roles", get(roles))
        .route("/api/roles/:id/scopes", get(scopes))
        .route("/api/users/:id", get(get_user).patch(patch_user))
        .with_state(mock.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), mock)
}

fn client(base_url: &str, app_secret: &str) -> LogtoDirectory {
    LogtoDirectory::new(LogtoConfig {
        base_url: base_url.to_string(),
        app_id: "m2m".to_string(),
        app_secret: app_secret.to_string(),
        ..Default::default()
    })
    .unwrap()
}

fn registry() -> EntityRegistry {
    EntityRegistry::new(vec![EntityMeta::new(
        "pages",
        vec![FieldMeta::primary_key("id"), FieldMeta::nullable("title")],
    )])
}

// ============================================================================
// ROLE DIRECTORY
// ============================================================================

#[tokio::test]
async fn test_lists_roles_and_scopes_with_one_token() {
    let (base_url, mock) = spawn_mock().await;
    let directory = client(&base_url, "s3cret");

    let roles = directory.list_roles().await.unwrap();
    assert_eq!(roles.len(), 2);
    assert_eq!(roles[0].name, "Supercow");

    let scopes = directory.list_scopes("r1").await.unwrap();
    assert_eq!(scopes.len(), 3);
    assert_eq!(scopes[0].split(), Some(("read", "pages")));

    assert_eq!(mock.tokens.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_non_success_status_carries_body() {
    let (base_url, _mock) = spawn_mock().await;
    let directory = client(&base_url, "s3cret");

    let err = directory.list_scopes("r2").await.unwrap_err();
    match err {
        AuthzError::Directory { status, path, body } => {
            assert_eq!(status, 500);
            assert_eq!(path, "/api/roles/r2/scopes");
            assert_eq!(body, "boom");
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_bad_credentials_fail_token_request() {
    let (base_url, _mock) = spawn_mock().await;
    let directory = client(&base_url, "wrong");

    let err = directory.list_roles().await.unwrap_err();
    assert!(matches!(err, AuthzError::Directory { status: 401, ref path, .. } if path == "/oidc/token"));
}

#[tokio::test]
async fn test_compile_aborts_on_directory_failure() {
    let (base_url, _mock) = spawn_mock().await;
    let directory = client(&base_url, "s3cret");
    let registry = registry();
    let options = CompilerOptions::default();

    // Role "broken" answers its scope listing with a 500.
    let err = RuleCompiler::new(&directory, &registry, &options)
        .compile()
        .await
        .unwrap_err();
    assert!(matches!(err, AuthzError::Directory { status: 500, .. }));
}

// ============================================================================
// USER CUSTOM DATA
// ============================================================================

#[tokio::test]
async fn test_permissions_version_roundtrip() {
    let (base_url, mock) = spawn_mock().await;
    mock.users
        .lock()
        .unwrap()
        .insert("u1".to_string(), json!({ "theme": "dark", "sessionVersion": 1 }));

    let directory = Arc::new(client(&base_url, "s3cret"));
    let cache = Arc::new(InMemoryVersionCache::new());
    let versions = PermissionsVersions::new(directory.clone()).with_cache(cache.clone());

    assert_eq!(versions.increment("u1").await.unwrap(), 2);

    let data = directory.custom_data("u1").await.unwrap();
    assert_eq!(data["sessionVersion"], json!(2));
    assert_eq!(data["theme"], json!("dark"));
    assert_eq!(cache.get("permissions:version:u1").await.unwrap().as_deref(), Some("2"));
}
