//! Common test utilities and fixtures.
//!
//! Note: #[allow(dead_code)] because each test file compiles common/
//! separately.

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use depot_core::config::AppConfig;
use depot_metadata::{ApiTokenRow, MetadataStore, SqliteStore};
use depot_server::auth::hash_token;
use depot_server::reconciler::sync_channel;
use depot_server::{AppState, Auditor, create_router};
use depot_storage::BlobStore;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tempfile::TempDir;
use time::OffsetDateTime;
use tower::ServiceExt;

static NEXT_USER_ID: AtomicI64 = AtomicI64::new(1);

/// A test server wrapper with all dependencies on temporary storage.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a test server with default test configuration.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("failed to create temp directory");

        let mut config = AppConfig::for_testing(temp_dir.path());
        modifier(&mut config);
        config.finalize().expect("test config must validate");

        // The SPA shell served to browsers on directory hits.
        std::fs::create_dir_all(&config.server.web_dir).expect("failed to create web dir");
        std::fs::write(
            config.server.web_dir.join("index.html"),
            "<!doctype html><title>depot</title>",
        )
        .expect("failed to write SPA shell");

        let blobs = Arc::new(
            BlobStore::new(&config.storage.base_dir)
                .await
                .expect("failed to create blob store"),
        );
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&config.database.file)
                .await
                .expect("failed to create metadata store"),
        );
        let audit =
            Arc::new(Auditor::open(&config.audit.file).expect("failed to open audit log"));
        let (sync_handle, _trigger_rx) = sync_channel();

        let state = AppState::new(config, blobs, metadata, audit, sync_handle);
        let router = create_router(state.clone());

        Self {
            router,
            state,
            _temp_dir: temp_dir,
        }
    }

    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }

    pub fn blobs(&self) -> Arc<BlobStore> {
        self.state.blobs.clone()
    }

    /// Contents of the audit log so far.
    pub fn audit_log(&self) -> String {
        std::fs::read_to_string(&self.state.config.audit.file).unwrap_or_default()
    }

    /// Seed an API token and return the raw token value.
    pub async fn create_token(&self, username: &str, is_admin: bool, scopes: &[&str]) -> String {
        let raw = format!("test-token-{}", uuid::Uuid::new_v4());
        let allowed: Vec<String> = scopes.iter().map(|s| s.to_string()).collect();
        let token = ApiTokenRow {
            id: 0,
            token_hash: hash_token(&raw),
            user_id: NEXT_USER_ID.fetch_add(1, Ordering::SeqCst),
            username: username.to_string(),
            is_admin,
            allowed_paths: serde_json::to_string(&allowed).unwrap(),
            created_at: OffsetDateTime::now_utc(),
            last_used_at: None,
        };
        self.metadata()
            .create_token(&token)
            .await
            .expect("failed to create token");
        raw
    }

    /// Seed an unrestricted admin token.
    pub async fn admin_token(&self) -> String {
        self.create_token("admin", true, &["/"]).await
    }
}

/// Send a request and collect status, headers, and body bytes.
#[allow(dead_code)]
pub async fn send(
    router: &axum::Router,
    request: Request<Body>,
) -> (StatusCode, HeaderMap, Vec<u8>) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec();
    (status, headers, body)
}

/// Upload helper: PUT/POST raw bytes with optional extra headers.
#[allow(dead_code)]
pub async fn upload(
    router: &axum::Router,
    method: &str,
    uri: &str,
    token: &str,
    body: &[u8],
    extra_headers: &[(&str, &str)],
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("X-API-Token", token);
    for (name, value) in extra_headers {
        builder = builder.header(*name, *value);
    }
    let request = builder.body(Body::from(body.to_vec())).unwrap();

    let (status, _, bytes) = send(router, request).await;
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

/// JSON API helper.
#[allow(dead_code)]
pub async fn api_json(
    router: &axum::Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("X-API-Token", token);
    }
    let body = match body {
        Some(v) => {
            builder = builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&v).unwrap())
        }
        None => Body::empty(),
    };

    let (status, _, bytes) = send(router, builder.body(body).unwrap()).await;
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

/// GET a blob.
#[allow(dead_code)]
pub async fn get_blob(router: &axum::Router, uri: &str) -> (StatusCode, HeaderMap, Vec<u8>) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    send(router, request).await
}
