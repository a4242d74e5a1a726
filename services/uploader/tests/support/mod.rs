//! In-process fake of the firmware API and object storage.

#![allow(dead_code)]

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use firmware_uploader::{
    config::ApiConfig, ApiClient, ArtifactDescriptor, ArtifactSource, CredentialStore,
    MemoryCredentialStore,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Status codes the fake answers with
#[derive(Debug, Clone)]
pub struct Behavior {
    pub presign_status: u16,
    /// Consumed one per PUT; 200 once empty
    pub storage_statuses: Vec<u16>,
    pub metadata_status: u16,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            presign_status: 200,
            storage_statuses: Vec::new(),
            metadata_status: 201,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub grant: String,
    pub content_type: Option<String>,
    pub content_length: Option<String>,
    pub bytes: usize,
}

/// Everything the fake saw
#[derive(Default)]
pub struct Recorded {
    pub calls: Mutex<Vec<String>>,
    pub authorization: Mutex<Vec<Option<String>>>,
    pub presign_bodies: Mutex<Vec<Value>>,
    pub presign_content_types: Mutex<Vec<Option<String>>>,
    pub stored: Mutex<Vec<StoredObject>>,
    pub metadata_bodies: Mutex<Vec<Value>>,
}

struct BackendState {
    base_url: String,
    behavior: Behavior,
    storage_statuses: Mutex<VecDeque<u16>>,
    grants: AtomicUsize,
    recorded: Arc<Recorded>,
}

pub struct FakeBackend {
    pub base_url: String,
    pub recorded: Arc<Recorded>,
}

impl FakeBackend {
    pub async fn start(behavior: Behavior) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let recorded = Arc::new(Recorded::default());

        let state = Arc::new(BackendState {
            base_url: base_url.clone(),
            storage_statuses: Mutex::new(behavior.storage_statuses.iter().copied().collect()),
            behavior,
            grants: AtomicUsize::new(0),
            recorded: recorded.clone(),
        });

        let router = Router::new()
            .route("/api/v1/firmwares/presign", post(presign))
            .route("/api/v1/firmwares", post(register))
            .route("/api/v1/me", get(me))
            .route("/api/v1/empty", get(empty))
            .route("/api/v1/broken", get(broken))
            .route("/storage/:grant", put(store))
            .with_state(state);

        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { base_url, recorded }
    }

    pub fn calls(&self) -> Vec<String> {
        self.recorded.calls.lock().clone()
    }

    pub fn api(&self, credentials: Arc<dyn CredentialStore>) -> ApiClient {
        let config = ApiConfig {
            base_url: self.base_url.clone(),
            ..Default::default()
        };
        ApiClient::new(&config, credentials).unwrap()
    }

    pub fn anonymous_api(&self) -> ApiClient {
        self.api(Arc::new(MemoryCredentialStore::new()))
    }
}

fn header_value(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap()
}

async fn presign(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let recorded = &state.recorded;
    recorded.calls.lock().push("presign".to_string());
    recorded
        .authorization
        .lock()
        .push(header_value(&headers, header::AUTHORIZATION));
    recorded
        .presign_content_types
        .lock()
        .push(header_value(&headers, header::CONTENT_TYPE));
    recorded.presign_bodies.lock().push(body);

    if state.behavior.presign_status != 200 {
        return (status(state.behavior.presign_status), "quota exceeded").into_response();
    }

    let n = state.grants.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({
        "upload_url": format!("{}/storage/grant-{}", state.base_url, n),
        "blob_url": format!("https://cdn.example.com/firmware/{}", n),
    }))
    .into_response()
}

async fn store(
    State(state): State<Arc<BackendState>>,
    Path(grant): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let recorded = &state.recorded;
    recorded.calls.lock().push(format!("put:{grant}"));
    recorded.stored.lock().push(StoredObject {
        grant,
        content_type: header_value(&headers, header::CONTENT_TYPE),
        content_length: header_value(&headers, header::CONTENT_LENGTH),
        bytes: body.len(),
    });

    let code = state.storage_statuses.lock().pop_front().unwrap_or(200);
    (status(code), "").into_response()
}

async fn register(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let recorded = &state.recorded;
    recorded.calls.lock().push("register".to_string());
    recorded
        .authorization
        .lock()
        .push(header_value(&headers, header::AUTHORIZATION));
    recorded.metadata_bodies.lock().push(body.clone());

    let code = status(state.behavior.metadata_status);
    if !code.is_success() {
        return (code, "version already registered").into_response();
    }
    (code, Json(json!({ "id": 42, "blob_url": body["blob_url"] }))).into_response()
}

async fn me(State(state): State<Arc<BackendState>>, headers: HeaderMap) -> Response {
    state.recorded.calls.lock().push("me".to_string());
    match header_value(&headers, header::AUTHORIZATION) {
        Some(auth) => Json(json!({ "authorization": auth })).into_response(),
        None => (StatusCode::UNAUTHORIZED, "missing token").into_response(),
    }
}

async fn empty() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn broken() -> impl IntoResponse {
    (StatusCode::OK, "not json")
}

pub fn descriptor() -> ArtifactDescriptor {
    ArtifactDescriptor {
        version: "v2.1.0".to_string(),
        model: "glasses-mk2".to_string(),
        checksum: "sha256:deadbeef".to_string(),
        signed_by: "ci-signing-key".to_string(),
    }
}

pub fn artifact(len: usize) -> ArtifactSource {
    ArtifactSource::new(
        "fw.bin",
        "application/octet-stream",
        len as u64,
        Box::new(std::io::Cursor::new(vec![0xA5u8; len])),
    )
}
