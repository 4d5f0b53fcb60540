//! Test helpers: a mock OmniParser server and an in-process queue

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use omniparser_queue::app_state::AppState;
use omniparser_queue::config::QueueSettings;
use omniparser_queue::models::instance::{FlapDamping, InstanceConfig};
use omniparser_queue::routes;

use crate::fixtures;

/// Knobs and counters shared with a running mock OmniParser server.
#[derive(Default)]
pub struct MockBehavior {
    pub unhealthy: AtomicBool,
    pub parse_delay_ms: AtomicU64,
    /// Non-zero makes `/parse/` answer with this status code.
    pub fail_status: AtomicU16,
    pub parse_calls: AtomicUsize,
    pub probe_calls: AtomicUsize,
}

pub struct MockOmniparser {
    pub url: String,
    pub behavior: Arc<MockBehavior>,
}

impl MockOmniparser {
    pub fn set_healthy(&self, healthy: bool) {
        self.behavior.unhealthy.store(!healthy, Ordering::SeqCst);
    }

    pub fn set_parse_delay(&self, delay: Duration) {
        self.behavior
            .parse_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn fail_with(&self, status: StatusCode) {
        self.behavior.fail_status.store(status.as_u16(), Ordering::SeqCst);
    }

    pub fn parse_calls(&self) -> usize {
        self.behavior.parse_calls.load(Ordering::SeqCst)
    }

    pub fn probe_calls(&self) -> usize {
        self.behavior.probe_calls.load(Ordering::SeqCst)
    }

    pub fn config(&self, name: &str) -> InstanceConfig {
        InstanceConfig {
            name: name.to_string(),
            display_name: None,
            url: self.url.clone(),
            capacity: None,
        }
    }
}

async fn mock_probe(State(behavior): State<Arc<MockBehavior>>) -> Response {
    behavior.probe_calls.fetch_add(1, Ordering::SeqCst);
    if behavior.unhealthy.load(Ordering::SeqCst) {
        return (StatusCode::SERVICE_UNAVAILABLE, "model not loaded").into_response();
    }
    Json(json!({ "message": "Omniparser API ready" })).into_response()
}

async fn mock_parse(State(behavior): State<Arc<MockBehavior>>, Json(body): Json<Value>) -> Response {
    behavior.parse_calls.fetch_add(1, Ordering::SeqCst);
    if body.get("base64_image").and_then(Value::as_str).is_none() {
        return (StatusCode::UNPROCESSABLE_ENTITY, "missing base64_image").into_response();
    }

    let delay = behavior.parse_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    match behavior.fail_status.load(Ordering::SeqCst) {
        0 => Json(fixtures::parse_response()).into_response(),
        code => {
            let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(json!({ "detail": "inference failed" }))).into_response()
        }
    }
}

/// Start a mock OmniParser server on an ephemeral port.
pub async fn spawn_mock_omniparser() -> MockOmniparser {
    let behavior = Arc::new(MockBehavior::default());
    let app = Router::new()
        .route("/probe/", get(mock_probe))
        .route("/parse/", post(mock_parse))
        .with_state(behavior.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockOmniparser {
        url: format!("http://{addr}"),
        behavior,
    }
}

/// Settings with short intervals so tests settle in well under a second.
pub fn fast_settings() -> QueueSettings {
    QueueSettings {
        health_check_interval: Duration::from_millis(100),
        probe_timeout: Duration::from_millis(500),
        damping: FlapDamping {
            success_threshold: 1,
            failure_threshold: 2,
        },
        max_queue_wait: Duration::from_secs(10),
        max_processing_wait: Duration::from_secs(5),
        depth_sample_interval: Duration::from_millis(100),
        ..QueueSettings::default()
    }
}

/// The queue service running in-process behind a real HTTP listener.
pub struct TestApp {
    pub base_url: String,
    pub state: AppState,
    pub client: reqwest::Client,
    shutdown: CancellationToken,
}

impl TestApp {
    pub async fn spawn(settings: QueueSettings, instances: Vec<InstanceConfig>) -> Self {
        let state = AppState::new(settings, instances).unwrap();
        let shutdown = CancellationToken::new();
        state.start(shutdown.clone());

        let app = routes::router(state.clone(), 25 * 1024 * 1024);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server_shutdown = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
                .await
                .unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
            client: reqwest::Client::new(),
            shutdown,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn get_json(&self, path: &str) -> (StatusCode, Value) {
        let response = self.client.get(self.url(path)).send().await.unwrap();
        let status = StatusCode::from_u16(response.status().as_u16()).unwrap();
        (status, response.json().await.unwrap())
    }

    /// `POST /parse` with the fixture screenshot.
    pub async fn submit(&self, wait: bool) -> (StatusCode, Value) {
        let path = if wait { "/parse?wait=true" } else { "/parse" };
        let response = self
            .client
            .post(self.url(path))
            .json(&json!({ "base64_image": fixtures::png_base64() }))
            .send()
            .await
            .unwrap();
        let status = StatusCode::from_u16(response.status().as_u16()).unwrap();
        (status, response.json().await.unwrap())
    }

    /// Wait until every named instance reports `status`.
    pub async fn wait_for_instances(&self, names: &[&str], status: &str) {
        wait_until(Duration::from_secs(5), || async move {
            let (_, body) = self.get_json("/instances").await;
            let instances = body.as_array().cloned().unwrap_or_default();
            names.iter().all(|name| {
                instances
                    .iter()
                    .any(|i| i["name"] == *name && i["status"] == status)
            })
        })
        .await;
    }

    /// Poll `GET /jobs/{job_id}` until the job reaches a terminal state.
    pub async fn wait_for_job(&self, job_id: &str) -> Value {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let (status, body) = self.get_json(&format!("/jobs/{job_id}")).await;
            if status == StatusCode::OK
                && matches!(
                    body["status"].as_str(),
                    Some("succeeded" | "failed" | "timed_out")
                )
            {
                return body;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("job {job_id} did not finish: {body}");
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Poll `check` every 25ms until it holds; panics after `timeout`.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
