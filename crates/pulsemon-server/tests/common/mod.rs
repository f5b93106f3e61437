#![allow(dead_code)]

use axum::body::{to_bytes, Body};
use axum::http::{HeaderMap, Request, StatusCode};
use pulsemon_server::app;
use pulsemon_server::persistence::FilePersistenceService;
use pulsemon_server::state::AppState;
use pulsemon_storage::file::FileBackedStore;
use pulsemon_storage::memory::MemoryStore;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::util::ServiceExt;

pub struct TestContext {
    pub temp_dir: TempDir,
    pub state: AppState,
    pub app: axum::Router,
}

pub fn build_test_context() -> TestContext {
    let temp_dir = tempfile::tempdir().expect("tempdir should be created");
    let state = AppState {
        storage: Arc::new(MemoryStore::new()),
        persistence: None,
        ping_timeout: Duration::from_secs(5),
    };
    let app = app::build_http_app(state.clone());
    TestContext {
        temp_dir,
        state,
        app,
    }
}

/// File backend in save-after-every-update mode.
pub fn build_sync_file_context() -> TestContext {
    let temp_dir = tempfile::tempdir().expect("tempdir should be created");
    let store = Arc::new(FileBackedStore::new());
    let persistence = Arc::new(FilePersistenceService::new(
        store.clone(),
        temp_dir.path().join("metrics.json"),
        Duration::ZERO,
    ));
    let state = AppState {
        storage: store,
        persistence: Some(persistence),
        ping_timeout: Duration::from_secs(5),
    };
    let app = app::build_http_app(state.clone());
    TestContext {
        temp_dir,
        state,
        app,
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("response should be JSON")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

pub async fn send(app: &axum::Router, req: Request<Body>) -> TestResponse {
    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should read")
        .to_vec();
    TestResponse {
        status,
        headers,
        body,
    }
}

pub async fn request_json(app: &axum::Router, method: &str, uri: &str, body: Value) -> TestResponse {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build");
    send(app, req).await
}

pub async fn request_no_body(app: &axum::Router, method: &str, uri: &str) -> TestResponse {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build");
    send(app, req).await
}
