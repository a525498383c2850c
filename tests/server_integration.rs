//! HTTP surface tests, driven in-process with `tower::ServiceExt::oneshot`

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use rfrender::config::{RenderSettings, StorageSettings};
use rfrender::engine::mock::MockLauncher;
use rfrender::pool::PoolConfig;
use rfrender::server::{router, AppState};
use rfrender::storage::memory::MemoryStorage;
use rfrender::storage::{ArtifactStore, ObjectStorage, StorageError};
use rfrender::{CaptureEngine, DeliveryOrchestrator, EnginePool, RenderDefaults};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

struct TestApp {
    app: axum::Router,
    launcher: MockLauncher,
    storage: Arc<MemoryStorage>,
}

fn app(bucket: &str) -> TestApp {
    let launcher = MockLauncher::new();
    let storage = Arc::new(MemoryStorage::new());
    let pool = Arc::new(EnginePool::new(Arc::new(launcher.clone()), PoolConfig::default()));
    let render = RenderSettings {
        settle_delay: Duration::ZERO,
        ..Default::default()
    };
    let capture = Arc::new(CaptureEngine::new(pool, &render));
    let store = Arc::new(ArtifactStore::new(
        StorageSettings {
            bucket: bucket.to_string(),
            ..Default::default()
        },
        Some(storage.clone() as Arc<dyn ObjectStorage>),
    ));
    let state = AppState::new(DeliveryOrchestrator::new(capture, store), RenderDefaults::default());
    TestApp {
        app: router(Arc::new(state)),
        launcher,
        storage,
    }
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_generate_base64() {
    let t = app("");
    let (status, body) = send(
        &t.app,
        post(
            "/api/v1/generate",
            json!({ "html": "<div>Hi</div>", "width": 800, "height": 600, "response_format": "base64" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert!(body["url"].is_null());
    assert!(body["inlineData"].as_str().unwrap().starts_with("data:image/png;base64,"));
    assert_eq!(body["metadata"]["width"], 800);
    assert_eq!(body["metadata"]["height"], 600);
}

#[tokio::test]
async fn test_generate_defaults_to_url() {
    let t = app("renders");
    let (status, body) = send(&t.app, post("/api/v1/generate", json!({ "html": "<p>x</p>" }))).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["url"].as_str().unwrap().starts_with("https://renders.s3.us-east-1.amazonaws.com/images/"));
    assert!(body["inlineData"].is_null());
    assert_eq!(body["metadata"]["width"], 1024);
    assert_eq!(t.storage.len(), 1);
}

#[tokio::test]
async fn test_empty_html_is_rejected() {
    let t = app("");
    let (status, body) = send(
        &t.app,
        post("/api/v1/generate", json!({ "html": "   ", "response_format": "base64" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["errorCode"], "VALIDATION_ERROR");
    assert_eq!(t.launcher.launches(), 0);

    let (status, body) = send(&t.app, post("/api/v1/generate", json!({ "css": "p {}" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errorCode"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_url_mode_without_storage_is_an_error() {
    let t = app("");
    let (status, body) = send(
        &t.app,
        post("/api/v1/generate", json!({ "html": "<p>x</p>", "response_format": "url" })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["errorCode"], "NOT_CONFIGURED");
}

#[tokio::test]
async fn test_both_mode_partial_failure() {
    let t = app("renders");
    t.storage.set_failure(Some(StorageError::new("AccessDenied", "Access Denied")));
    let (status, body) = send(
        &t.app,
        post("/api/v1/generate", json!({ "html": "<p>x</p>", "response_format": "both" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert!(body["inlineData"].is_string());
    assert_eq!(body["storageError"]["errorCode"], "STORAGE_UPLOAD_FAILURE");
}

#[tokio::test]
async fn test_preview_never_uploads() {
    let t = app("renders");
    let (status, body) = send(
        &t.app,
        post("/api/v1/generate/preview", json!({ "html": "<p>x</p>", "response_format": "url" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["inlineData"].is_string());
    assert_eq!(t.storage.put_attempts(), 0);
}

#[tokio::test]
async fn test_health_reports_services() {
    let t = app("");
    let (status, body) = send(&t.app, get("/api/v1/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["services"]["renderer"], "idle");
    assert_eq!(body["services"]["s3"], "not_configured");

    let t = app("renders");
    send(&t.app, post("/api/v1/generate/preview", json!({ "html": "<p>x</p>" }))).await;
    let (_, body) = send(&t.app, get("/api/v1/health")).await;
    assert_eq!(body["services"]["renderer"], "ok");
    assert_eq!(body["services"]["s3"], "ok");

    t.launcher.kill_current();
    t.storage.set_failure(Some(StorageError::new("NoSuchBucket", "gone")));
    let (_, body) = send(&t.app, get("/api/v1/health")).await;
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["services"]["renderer"], "error");
    assert_eq!(body["services"]["s3"], "error");
}

#[tokio::test]
async fn test_root_lists_endpoints() {
    let t = app("");
    let (status, body) = send(&t.app, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "rfrender");
    assert_eq!(body["endpoints"]["generate"], "/api/v1/generate");
}
