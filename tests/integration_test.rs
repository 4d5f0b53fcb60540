//! End-to-end tests against mock OmniParser servers
//!
//! Each test starts its own mock instances and an in-process queue bound to
//! an ephemeral port, so they run in parallel without external services.

mod fixtures;
mod helpers;

use std::time::Duration;

use axum::http::StatusCode;
use futures::future::join_all;
use serde_json::{json, Value};
use tokio_test::assert_ok;

use helpers::*;

#[tokio::test]
async fn test_jobs_spread_evenly_across_healthy_instances() {
    let a = spawn_mock_omniparser().await;
    let b = spawn_mock_omniparser().await;
    a.set_parse_delay(Duration::from_millis(100));
    b.set_parse_delay(Duration::from_millis(100));

    let app = TestApp::spawn(fast_settings(), vec![a.config("a"), b.config("b")]).await;
    app.wait_for_instances(&["a", "b"], "online").await;

    let submissions = join_all((0..10).map(|_| app.submit(false))).await;
    let mut job_ids = Vec::new();
    for (status, body) in submissions {
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "queued");
        job_ids.push(body["job_id"].as_str().unwrap().to_string());
    }

    for job_id in &job_ids {
        let record = app.wait_for_job(job_id).await;
        assert_eq!(record["status"], "succeeded", "{record}");
        assert_eq!(record["result"]["elements"].as_array().unwrap().len(), 2);
    }

    assert_eq!(a.parse_calls() + b.parse_calls(), 10);
    assert_eq!(a.parse_calls(), 5);
    assert_eq!(b.parse_calls(), 5);

    let (_, stats) = app.get_json("/stats").await;
    assert_eq!(stats["successful_requests"], 10);
    assert_eq!(stats["total_requests"], 10);
    assert_eq!(stats["current_queue_size"], 0);
    assert_eq!(stats["worker_running"], true);
}

#[tokio::test]
async fn test_offline_instance_never_receives_work() {
    let healthy = spawn_mock_omniparser().await;
    let broken = spawn_mock_omniparser().await;
    broken.set_healthy(false);

    let app = TestApp::spawn(
        fast_settings(),
        vec![healthy.config("healthy"), broken.config("broken")],
    )
    .await;
    app.wait_for_instances(&["healthy"], "online").await;
    app.wait_for_instances(&["broken"], "offline").await;

    for _ in 0..4 {
        let (status, record) = app.submit(true).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(record["assigned_instance"], "healthy");
    }
    assert_eq!(healthy.parse_calls(), 4);
    assert_eq!(broken.parse_calls(), 0);
    assert!(broken.probe_calls() >= 2);

    let (status, health) = app.get_json("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");
}

#[tokio::test]
async fn test_transient_failure_is_retried_then_fails() {
    let flaky = spawn_mock_omniparser().await;
    flaky.fail_with(StatusCode::INTERNAL_SERVER_ERROR);

    let app = TestApp::spawn(fast_settings(), vec![flaky.config("flaky")]).await;
    app.wait_for_instances(&["flaky"], "online").await;

    let (status, record) = app.submit(true).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(record["status"], "failed");
    assert_eq!(record["attempt"], 2);
    assert_eq!(record["error_kind"], "transient");
    assert_eq!(flaky.parse_calls(), 2);

    let (_, stats) = app.get_json("/stats").await;
    assert_eq!(stats["failed_requests"], 1);
    assert_eq!(stats["retried_requests"], 1);
}

#[tokio::test]
async fn test_retry_does_not_count_failed_attempt_as_queue_wait() {
    let flaky = spawn_mock_omniparser().await;
    flaky.set_parse_delay(Duration::from_millis(700));
    flaky.fail_with(StatusCode::INTERNAL_SERVER_ERROR);

    let app = TestApp::spawn(fast_settings(), vec![flaky.config("flaky")]).await;
    app.wait_for_instances(&["flaky"], "online").await;

    let (status, record) = app.submit(true).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(record["attempt"], 2);
    let waited = record["queue_wait_time"].as_u64().unwrap();
    assert!(waited < 300, "queue_wait_time {waited}ms includes time on the instance");

    let (_, stats) = app.get_json("/stats").await;
    let avg_wait = stats["avg_queue_wait_time"].as_f64().unwrap();
    assert!(avg_wait < 0.3, "avg_queue_wait_time {avg_wait}s");
}

#[tokio::test]
async fn test_job_on_instance_that_goes_offline_times_out_and_frees_slot() {
    let a = spawn_mock_omniparser().await;
    a.set_parse_delay(Duration::from_secs(3));

    let mut settings = fast_settings();
    settings.max_processing_wait = Duration::from_millis(800);
    let app = TestApp::spawn(settings, vec![a.config("a")]).await;
    app.wait_for_instances(&["a"], "online").await;

    let (status, body) = app.submit(false).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let app_ref = &app;
    wait_until(Duration::from_secs(2), || async move {
        let (_, instances) = app_ref.get_json("/instances").await;
        instances[0]["in_flight"] == 1
    })
    .await;

    a.set_healthy(false);
    app.wait_for_instances(&["a"], "offline").await;

    let record = app.wait_for_job(&job_id).await;
    assert_eq!(record["status"], "timed_out");
    assert_eq!(record["error_kind"], "deadline_exceeded");
    assert_eq!(record["attempt"], 1);
    assert_eq!(record["assigned_instance"], "a");

    let (_, instances) = app.get_json("/instances").await;
    assert_eq!(instances[0]["in_flight"], 0);
    assert_eq!(instances[0]["status"], "offline");
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let picky = spawn_mock_omniparser().await;
    picky.fail_with(StatusCode::BAD_REQUEST);

    let app = TestApp::spawn(fast_settings(), vec![picky.config("picky")]).await;
    app.wait_for_instances(&["picky"], "online").await;

    let (status, record) = app.submit(true).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(record["attempt"], 1);
    assert_eq!(record["error_kind"], "permanent");
    assert_eq!(picky.parse_calls(), 1);
}

#[tokio::test]
async fn test_instance_going_down_is_routed_around() {
    let a = spawn_mock_omniparser().await;
    let b = spawn_mock_omniparser().await;

    let app = TestApp::spawn(fast_settings(), vec![a.config("a"), b.config("b")]).await;
    app.wait_for_instances(&["a", "b"], "online").await;

    a.set_healthy(false);
    app.wait_for_instances(&["a"], "offline").await;

    let (_, instances) = app.get_json("/instances").await;
    let a_view = instances
        .as_array()
        .unwrap()
        .iter()
        .find(|i| i["name"] == "a")
        .unwrap()
        .clone();
    assert!(a_view["consecutive_failures"].as_u64().unwrap() >= 2);
    assert!(a_view["last_error"].is_string());

    for _ in 0..3 {
        let (status, record) = app.submit(true).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(record["assigned_instance"], "b");
    }
    assert_eq!(a.parse_calls(), 0);

    a.set_healthy(true);
    app.wait_for_instances(&["a"], "online").await;
}

#[tokio::test]
async fn test_full_queue_rejects_with_503() {
    let settings = QueueSettingsBuilder::no_instances()
        .max_queue_size(3)
        .build();
    let app = TestApp::spawn(settings, Vec::new()).await;

    for position in 1..=3 {
        let (status, body) = app.submit(false).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["queue_position"], position);
    }

    let response = app
        .client
        .post(app.url("/parse"))
        .json(&json!({ "base64_image": fixtures::png_base64() }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.headers()["retry-after"], "5");
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "queue_full");

    let (_, stats) = app.get_json("/stats").await;
    assert_eq!(stats["rejected_requests"], 1);
    assert_eq!(stats["current_queue_size"], 3);
    assert_eq!(app.state.queue.len().await, 3);

    let (_, jobs) = app.get_json("/jobs?limit=1").await;
    assert_eq!(jobs[0]["status"], "rejected");
}

#[tokio::test]
async fn test_job_times_out_when_no_instance_is_online() {
    let settings = QueueSettingsBuilder::no_instances()
        .max_queue_wait(Duration::from_millis(300))
        .build();
    let app = TestApp::spawn(settings, Vec::new()).await;

    let (status, health) = app.get_json("/health").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health["status"], "unhealthy");

    let (status, record) = app.submit(true).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(record["status"], "timed_out");
    assert_eq!(record["error_kind"], "instance_unavailable");
    assert!(record["assigned_instance"].is_null());

    let (_, stats) = app.get_json("/stats").await;
    assert_eq!(stats["timeout_requests"], 1);
}

#[tokio::test]
async fn test_slow_instance_hits_processing_deadline() {
    let slow = spawn_mock_omniparser().await;
    slow.set_parse_delay(Duration::from_secs(3));

    let mut settings = fast_settings();
    settings.max_processing_wait = Duration::from_millis(300);
    let app = TestApp::spawn(settings, vec![slow.config("slow")]).await;
    app.wait_for_instances(&["slow"], "online").await;

    let (status, record) = app.submit(true).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(record["status"], "timed_out");
    assert_eq!(record["error_kind"], "deadline_exceeded");
    assert_eq!(record["assigned_instance"], "slow");

    let (_, instances) = app.get_json("/instances").await;
    assert_eq!(instances[0]["in_flight"], 0);
}

#[tokio::test]
async fn test_reconfigure_instances_at_runtime() {
    let app = TestApp::spawn(fast_settings(), Vec::new()).await;
    let mock = spawn_mock_omniparser().await;

    let response = app
        .client
        .put(app.url("/instances"))
        .json(&json!([{ "name": "late", "display_name": "Late joiner", "url": mock.url }]))
        .send()
        .await;
    let response = assert_ok!(response);
    assert_eq!(response.status(), StatusCode::OK);

    app.wait_for_instances(&["late"], "online").await;
    let (status, record) = app.submit(true).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["assigned_instance"], "late");

    let (_, health) = app.get_json("/health").await;
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["omniparser_status"][0]["display_name"], "Late joiner");

    let response = app
        .client
        .put(app.url("/instances"))
        .json(&json!([{ "name": "bad", "url": "ftp://nowhere" }]))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_multipart_upload_with_options() {
    let mock = spawn_mock_omniparser().await;
    let app = TestApp::spawn(fast_settings(), vec![mock.config("solo")]).await;
    app.wait_for_instances(&["solo"], "online").await;

    let form = reqwest::multipart::Form::new()
        .part(
            "image",
            reqwest::multipart::Part::bytes(fixtures::JPEG_SCREENSHOT.to_vec())
                .file_name("screen.jpg")
                .mime_str("image/jpeg")
                .unwrap(),
        )
        .text("box_threshold", "0.05");

    let response = app
        .client
        .post(app.url("/jobs?wait=true"))
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let record: Value = response.json().await.unwrap();
    assert_eq!(record["status"], "succeeded");
    assert_eq!(record["image_size"], fixtures::JPEG_SCREENSHOT.len());
}

#[tokio::test]
async fn test_invalid_submissions_are_rejected_up_front() {
    let app = TestApp::spawn(fast_settings(), Vec::new()).await;

    let response = app
        .client
        .post(app.url("/parse"))
        .json(&json!({ "base64_image": "%%% not base64 %%%" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .client
        .post(app.url("/parse"))
        .json(&json!({ "base64_image": "aGVsbG8gd29ybGQ=" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let response = app
        .client
        .post(app.url("/parse"))
        .json(&json!({ "base64_image": fixtures::png_base64(), "box_threshold": 4.0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let (_, stats) = app.get_json("/stats").await;
    assert_eq!(stats["current_queue_size"], 0);
}

#[tokio::test]
async fn test_job_lookup_and_listing() {
    let mock = spawn_mock_omniparser().await;
    let app = TestApp::spawn(fast_settings(), vec![mock.config("solo")]).await;
    app.wait_for_instances(&["solo"], "online").await;

    let (status, _) = app
        .get_json(&format!("/jobs/{}", uuid::Uuid::new_v4()))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let mut ids = Vec::new();
    for _ in 0..3 {
        let (_, body) = app.submit(false).await;
        ids.push(body["job_id"].as_str().unwrap().to_string());
    }
    for id in &ids {
        app.wait_for_job(id).await;
    }

    let (status, jobs) = app.get_json("/jobs?limit=2").await;
    assert_eq!(status, StatusCode::OK);
    let jobs = jobs.as_array().unwrap();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0]["job_id"], ids[2].as_str());
    assert_eq!(jobs[0]["status"], "success");
    assert!(jobs[0]["processing_time"].is_u64());
}

#[tokio::test]
async fn test_queue_depth_and_probe_endpoints() {
    let app = TestApp::spawn(fast_settings(), Vec::new()).await;

    let (status, probe) = app.get_json("/probe").await;
    assert_eq!(status, StatusCode::OK);
    assert!(probe["message"].is_string());

    app.submit(false).await;
    let app_ref = &app;
    wait_until(Duration::from_secs(2), || async move {
        let (_, depth) = app_ref.get_json("/queue-depth?limit=5").await;
        depth
            .as_array()
            .map(|points| points.iter().any(|p| p["depth"] == 1))
            .unwrap_or(false)
    })
    .await;

    let (_, depth) = app.get_json("/queue-depth?limit=3").await;
    let points = depth.as_array().unwrap();
    assert!(points.len() <= 3);
    assert!(points.windows(2).all(|w| {
        w[0]["timestamp"].as_str().unwrap() <= w[1]["timestamp"].as_str().unwrap()
    }));
}

/// Settings for a queue whose jobs can only wait, never dispatch.
struct QueueSettingsBuilder(omniparser_queue::config::QueueSettings);

impl QueueSettingsBuilder {
    fn no_instances() -> Self {
        Self(fast_settings())
    }

    fn max_queue_size(mut self, size: usize) -> Self {
        self.0.max_queue_size = size;
        self
    }

    fn max_queue_wait(mut self, wait: Duration) -> Self {
        self.0.max_queue_wait = wait;
        self
    }

    fn build(self) -> omniparser_queue::config::QueueSettings {
        self.0
    }
}
