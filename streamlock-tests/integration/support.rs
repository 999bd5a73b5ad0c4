//! Shared fixtures: devices on a shared in-memory coordinator and a local
//! HTTP server speaking the hosted coordinator's protocol.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::routing::{get, post};
use axum::Json;
use parking_lot::Mutex;
use serde_json::{Value, json};
use streamlock_core::config::{LockConfig, StaleLockPolicy, StreamLockConfig};
use streamlock_core::{
    ChangeFeed, DeviceId, Identity, InMemoryCoordinator, InstanceId, LockClient, LockCoordinator,
    LockHandle, LockStatus, LockView, RecordingPlayback, Session, UserId, spawn_lock_client,
};
use tokio::net::TcpListener;
use url::Url;

pub const WAIT: Duration = Duration::from_secs(3);
pub const STREAM_URL: &str = "http://provider.example/live/42.ts";

pub fn user() -> UserId {
    UserId::new("user-1")
}

pub fn session() -> Session {
    Session::new(user(), "access-token")
}

pub fn lock_config(policy: StaleLockPolicy) -> LockConfig {
    LockConfig {
        stale_lock_policy: policy,
        ..StreamLockConfig::for_testing().lock
    }
}

/// One running client instance with a recording player.
pub struct Device {
    pub client: LockClient,
    pub handle: LockHandle,
    pub playback: Arc<RecordingPlayback>,
}

impl Device {
    pub fn spawn(
        device_id: &str,
        instance_id: &str,
        config: LockConfig,
        coordinator: Arc<dyn LockCoordinator>,
        feed: Arc<dyn ChangeFeed>,
    ) -> Self {
        let playback = Arc::new(RecordingPlayback::new());
        let client = spawn_lock_client(
            config,
            Identity::new(DeviceId::new(device_id), InstanceId::new(instance_id)),
            coordinator,
            feed,
            playback.clone(),
        );
        let handle = client.handle();
        Self {
            client,
            handle,
            playback,
        }
    }

    /// Device on the shared in-memory coordinator with default policy.
    pub fn on(coordinator: &Arc<InMemoryCoordinator>, device_id: &str) -> Self {
        Self::spawn(
            device_id,
            &format!("{device_id}-instance"),
            lock_config(StaleLockPolicy::default()),
            coordinator.clone(),
            coordinator.clone(),
        )
    }

    /// Starts the session and waits for the initial read to land.
    pub async fn sign_in(&self) -> LockView {
        self.client.start(session()).await.unwrap();
        let mut view = self.handle.watch();
        tokio::time::timeout(
            WAIT,
            view.wait_for(|current| current.status != LockStatus::Initial),
        )
        .await
        .expect("initial read did not complete")
        .unwrap()
        .clone()
    }

    pub async fn wait_for(&self, status: LockStatus) -> LockView {
        tokio::time::timeout(WAIT, self.handle.wait_for_status(status))
            .await
            .unwrap_or_else(|_| {
                panic!(
                    "timed out waiting for {status}, still {}",
                    self.handle.status()
                )
            })
            .unwrap()
    }

    pub fn status(&self) -> LockStatus {
        self.handle.status()
    }
}

/// Request seen by [`MockCoordinatorServer`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub api_key: Option<String>,
    pub authorization: Option<String>,
    pub body: Option<Value>,
}

/// Local HTTP server implementing the hosted coordinator protocol on top of
/// an [`InMemoryCoordinator`].
#[derive(Clone)]
pub struct MockCoordinatorServer {
    pub memory: Arc<InMemoryCoordinator>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    rows_override: Arc<Mutex<Option<Value>>>,
    reject_requests: Arc<Mutex<bool>>,
}

impl MockCoordinatorServer {
    /// Binds an ephemeral port and returns the server with its base URL.
    pub async fn start() -> (Self, Url) {
        let server = Self {
            memory: InMemoryCoordinator::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
            rows_override: Arc::new(Mutex::new(None)),
            reject_requests: Arc::new(Mutex::new(false)),
        };

        let app = Router::new()
            .route("/functions/v1/request-stream-lock", post(request_lock))
            .route("/functions/v1/release-stream-lock", post(release_lock))
            .route("/rest/v1/stream_lock", get(fetch_rows).patch(heartbeat))
            .with_state(server.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let base_url = Url::parse(&format!("http://{address}/")).unwrap();
        (server, base_url)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, path: &str) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|call| call.path == path)
            .collect()
    }

    /// Serves `rows` verbatim from the table endpoint.
    pub fn override_rows(&self, rows: Value) {
        *self.rows_override.lock() = Some(rows);
    }

    /// Makes the request-lock function answer 409.
    pub fn reject_requests(&self) {
        *self.reject_requests.lock() = true;
    }

    fn record(&self, method: Method, uri: &Uri, headers: &HeaderMap, body: Option<Value>) {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        self.calls.lock().push(RecordedCall {
            method,
            path: uri.path().to_string(),
            query: uri.query().map(str::to_string),
            api_key: header("apikey"),
            authorization: header("authorization"),
            body,
        });
    }
}

fn user_filter(params: &HashMap<String, String>) -> Option<UserId> {
    params
        .get("user_id")
        .and_then(|filter| filter.strip_prefix("eq."))
        .map(UserId::new)
}

fn device_field(body: &Value, field: &str) -> Option<DeviceId> {
    body.get(field).and_then(Value::as_str).map(DeviceId::new)
}

async fn request_lock(
    State(server): State<MockCoordinatorServer>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    server.record(method, &uri, &headers, Some(body.clone()));
    if *server.reject_requests.lock() {
        return (
            StatusCode::CONFLICT,
            Json(json!({ "error": "request refused" })),
        );
    }
    let Some(device_id) = device_field(&body, "requestingDeviceId") else {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "missing device" })));
    };

    match server.memory.request_lock(&session(), &device_id).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "ok": true }))),
        Err(e) => (StatusCode::CONFLICT, Json(json!({ "error": e.to_string() }))),
    }
}

async fn release_lock(
    State(server): State<MockCoordinatorServer>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    server.record(method, &uri, &headers, Some(body.clone()));
    let Some(device_id) = device_field(&body, "releasingDeviceId") else {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "missing device" })));
    };

    match server.memory.release_lock(&session(), &device_id).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "ok": true }))),
        Err(e) => (StatusCode::CONFLICT, Json(json!({ "error": e.to_string() }))),
    }
}

async fn fetch_rows(
    State(server): State<MockCoordinatorServer>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    server.record(method, &uri, &headers, None);
    if let Some(rows) = server.rows_override.lock().clone() {
        return Json(rows);
    }

    let rows: Vec<_> = user_filter(&params)
        .and_then(|user_id| server.memory.record(&user_id))
        .into_iter()
        .collect();
    Json(json!(rows))
}

async fn heartbeat(
    State(server): State<MockCoordinatorServer>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> StatusCode {
    server.record(method, &uri, &headers, Some(body));
    let device_id = params
        .get("locked_by_device_id")
        .and_then(|filter| filter.strip_prefix("eq."))
        .map(DeviceId::new);

    // Filters that match no row still succeed, as with any table update.
    if let (Some(_), Some(device_id)) = (user_filter(&params), device_id) {
        let _ = server.memory.heartbeat(&session(), &device_id).await;
    }
    StatusCode::NO_CONTENT
}
