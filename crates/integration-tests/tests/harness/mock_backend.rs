//! Mock image gateway for integration tests
//!
//! Serves canned responses for a handful of backend families plus the
//! generated assets themselves, and records every backend request it sees.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::{Json, Router, routing};
use base64::Engine;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

/// PNG signature every served asset starts with
pub const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

/// A backend request as the mock received it
#[derive(Debug, Clone)]
pub struct Recorded {
    pub path: String,
    pub body: Value,
    pub authorization: Option<String>,
    pub trace_id: Option<String>,
}

/// Mock gateway that fronts every backend family on one address
pub struct MockBackend {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<MockState>,
}

struct MockState {
    base_url: String,
    /// Status polls answered as pending before a job reports its outcome
    pending_polls: u32,
    requests: Mutex<Vec<Recorded>>,
    polls: Mutex<HashMap<String, u32>>,
    asset_hits: AtomicU32,
    request_ids: AtomicU32,
}

impl MockBackend {
    /// Start the mock; jobs succeed after one pending poll
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_with_pending_polls(1).await
    }

    /// Start a mock whose jobs stay pending for `pending_polls` polls
    pub async fn start_with_pending_polls(pending_polls: u32) -> anyhow::Result<Self> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let state = Arc::new(MockState {
            base_url: format!("http://{addr}"),
            pending_polls,
            requests: Mutex::new(Vec::new()),
            polls: Mutex::new(HashMap::new()),
            asset_hits: AtomicU32::new(0),
            request_ids: AtomicU32::new(0),
        });

        let app = Router::new()
            .route("/302/submit/{model}", routing::post(handle_submit))
            .route("/v1/images/generations", routing::post(handle_openai))
            .route("/mj/submit/imagine", routing::post(handle_imagine))
            .route("/mj/submit/action", routing::post(handle_action))
            .route("/mj/task/{id}/fetch", routing::get(handle_mj_fetch))
            .route("/klingai/v1/images/generations", routing::post(handle_kling_submit))
            .route("/klingai/v1/images/generations/{id}", routing::get(handle_kling_fetch))
            .route("/flux/v1/get_result", routing::get(handle_kontext_result))
            .route("/flux/v1/slow_result", routing::get(handle_kontext_slow))
            .route("/flux/v1/{model}", routing::post(handle_kontext_submit))
            .route("/assets/{name}", routing::get(handle_asset))
            .with_state(Arc::clone(&state));

        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_clone.cancelled().await;
                })
                .await
                .ok();
        });

        Ok(Self { addr, shutdown, state })
    }

    /// Base URL for configuring the mock as the gateway
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Every backend request received so far, in arrival order
    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().unwrap().clone()
    }

    /// Backend requests received on `path`
    pub fn requests_to(&self, path: &str) -> Vec<Recorded> {
        self.requests().into_iter().filter(|r| r.path == path).collect()
    }

    /// Number of status polls answered for job `id`
    pub fn poll_count(&self, id: &str) -> u32 {
        self.state.polls.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    /// Number of asset downloads attempted, including failed ones
    pub fn asset_hits(&self) -> u32 {
        self.state.asset_hits.load(Ordering::Relaxed)
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Asset content served for `name`
pub fn asset_bytes(name: &str) -> Vec<u8> {
    [PNG_MAGIC, name.as_bytes()].concat()
}

impl MockState {
    fn record(&self, path: String, headers: &HeaderMap, body: Value) {
        let header = |name: &str| {
            headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_owned)
        };

        self.requests.lock().unwrap().push(Recorded {
            path,
            body,
            authorization: header("authorization"),
            trace_id: header("x-trace-id"),
        });
    }

    /// Count a poll for `id` and report whether the job is still pending
    fn poll(&self, id: &str) -> bool {
        let mut polls = self.polls.lock().unwrap();
        let count = polls.entry(id.to_owned()).or_insert(0);
        *count += 1;
        *count <= self.pending_polls
    }

    fn asset_url(&self, name: &str) -> String {
        format!("{}/assets/{name}", self.base_url)
    }

    fn request_id(&self) -> [(&'static str, String); 1] {
        let id = self.request_ids.fetch_add(1, Ordering::Relaxed) + 1;
        [("x-request-id", format!("req-{id}"))]
    }
}

// -- Synchronous backends --

/// fal-style submit; `mock_assets` in the body picks the asset names and
/// `mock_detail` answers with an error body instead of an image list
async fn handle_submit(
    State(state): State<Arc<MockState>>,
    Path(model): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    state.record(format!("/302/submit/{model}"), &headers, body.clone());

    if let Some(detail) = body.get("mock_detail") {
        return (state.request_id(), Json(json!({ "detail": detail })));
    }

    let names: Vec<String> = match body.get("mock_assets").and_then(Value::as_array) {
        Some(names) => names.iter().filter_map(Value::as_str).map(str::to_owned).collect(),
        None => {
            let count = body
                .get("num_images")
                .or_else(|| body.get("batch_size"))
                .and_then(Value::as_u64)
                .unwrap_or(1);
            (1..=count).map(|i| format!("{model}-{i}.png")).collect()
        }
    };

    let images: Vec<Value> = names.iter().map(|name| json!({ "url": state.asset_url(name) })).collect();

    (state.request_id(), Json(json!({ "images": images })))
}

/// `OpenAI`-compatible endpoint answering with inline base64 payloads
async fn handle_openai(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    state.record("/v1/images/generations".to_owned(), &headers, body.clone());

    let n = body.get("n").and_then(Value::as_u64).unwrap_or(1);
    let data: Vec<Value> = (1..=n)
        .map(|i| {
            let encoded = base64::engine::general_purpose::STANDARD.encode(asset_bytes(&format!("inline-{i}")));
            json!({ "b64_json": encoded })
        })
        .collect();

    Json(json!({ "created": 1_700_000_000, "data": data }))
}

// -- Midjourney --

async fn handle_imagine(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    state.record("/mj/submit/imagine".to_owned(), &headers, body);

    Json(json!({ "code": 1, "description": "Submit success", "result": "grid-1" }))
}

async fn handle_action(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    state.record("/mj/submit/action".to_owned(), &headers, body.clone());

    let custom_id = body.get("customId").and_then(Value::as_str).unwrap_or_default();
    let index = custom_id.split("::").nth(3).unwrap_or("0");

    Json(json!({ "code": 1, "description": "Submit success", "result": format!("upscale-{index}") }))
}

async fn handle_mj_fetch(
    State(state): State<Arc<MockState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if state.poll(&id) {
        return (state.request_id(), Json(json!({ "status": "IN_PROGRESS", "progress": "40%" })));
    }

    let task = if id == "grid-1" {
        let buttons: Vec<Value> = (1..=4)
            .flat_map(|i| {
                [
                    json!({ "customId": format!("MJ::JOB::upsample::{i}::grid-1"), "label": format!("U{i}") }),
                    json!({ "customId": format!("MJ::JOB::variation::{i}::grid-1"), "label": format!("V{i}") }),
                ]
            })
            .collect();
        json!({ "status": "SUCCESS", "imageUrl": state.asset_url("grid-1.png"), "buttons": buttons })
    } else {
        json!({ "status": "SUCCESS", "imageUrl": state.asset_url(&format!("{id}.png")), "buttons": [] })
    };

    (state.request_id(), Json(task))
}

// -- Kling: every task is rejected by moderation --

async fn handle_kling_submit(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    state.record("/klingai/v1/images/generations".to_owned(), &headers, body);

    Json(json!({
        "code": 0,
        "message": "SUCCEED",
        "data": { "task_id": "kling-1", "task_status": "submitted" }
    }))
}

async fn handle_kling_fetch(
    State(state): State<Arc<MockState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let data = if state.poll(&id) {
        json!({ "task_id": id, "task_status": "processing" })
    } else {
        json!({ "task_id": id, "task_status": "failed", "task_status_msg": "risk control" })
    };

    Json(json!({ "code": 0, "message": "SUCCEED", "data": data }))
}

// -- Flux Kontext: `flux-kontext-max` polls a status URL that never answers in time --

async fn handle_kontext_submit(
    State(state): State<Arc<MockState>>,
    Path(model): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    state.record(format!("/flux/v1/{model}"), &headers, body);

    let polling_url = if model == "flux-kontext-max" {
        format!("{}/flux/v1/slow_result?id=ktx-1", state.base_url)
    } else {
        String::new()
    };

    Json(json!({ "id": "ktx-1", "polling_url": polling_url }))
}

async fn handle_kontext_result(
    State(state): State<Arc<MockState>>,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let id = query.get("id").cloned().unwrap_or_default();
    if state.poll(&id) {
        return Json(json!({ "id": id, "status": "Pending" }));
    }

    Json(json!({ "id": id, "status": "Ready", "result": { "sample": state.asset_url("kontext.png") } }))
}

async fn handle_kontext_slow(State(state): State<Arc<MockState>>) -> impl IntoResponse {
    state.poll("ktx-slow");
    tokio::time::sleep(Duration::from_secs(30)).await;
    Json(json!({ "status": "Pending" }))
}

// -- Assets --

/// Names starting with `missing` are not found
async fn handle_asset(
    State(state): State<Arc<MockState>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    state.asset_hits.fetch_add(1, Ordering::Relaxed);

    if name.starts_with("missing") {
        return (StatusCode::NOT_FOUND, Vec::new());
    }

    (StatusCode::OK, asset_bytes(&name))
}
