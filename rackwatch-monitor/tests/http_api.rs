//! The HTTP API driven through the router, without a socket.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use rackwatch_core::{SensorSource, Status};
use rackwatch_devkit::{MockHostManager, ScriptedSensor, TestHarness};
use rackwatch_monitor::http::{build_router, AppState};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tower::ServiceExt;

fn app_state(h: &TestHarness, api_key: Option<&str>) -> AppState {
    AppState {
        sensor: h.sensor_source(),
        latest: h.latest(),
        health: h.health(),
        coordinator: Arc::clone(&h.coordinator),
        config: h.config.subscribe(),
        api_key: api_key.map(Arc::from),
        started: Instant::now(),
    }
}

async fn send(state: AppState, request: Request<Body>) -> (StatusCode, Value) {
    let response = build_router(state).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn post_override(body: &str) -> Request<Body> {
    Request::post("/override").body(Body::from(body.to_string())).unwrap()
}

#[tokio::test]
async fn temperature_is_a_fresh_read_with_the_last_status() {
    let mut h = TestHarness::builder(ScriptedSensor::constant(25.0, 40.0).then_reading(26.0, 41.0))
        .threshold(25.5)
        .build();
    h.poll.tick().await;

    for uri in ["/temperature", "/"] {
        let (status, body) = send(app_state(&h, None), get(uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["temperature"], 26.0);
        assert_eq!(body["humidity"], 41.0);
        assert_eq!(body["status"], "HIGH");
        assert_eq!(body["last_status"], "NORMAL");
        assert!(body["captured_at"].is_string());
    }
    // HTTP reads never feed the sinks
    assert_eq!(h.recorder.ticks(), vec![1]);
}

#[tokio::test]
async fn last_status_is_null_before_the_first_tick() {
    let h = TestHarness::builder(ScriptedSensor::constant(25.0, 40.0)).build();
    let (status, body) = send(app_state(&h, None), get("/temperature")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["last_status"].is_null());
}

#[tokio::test(start_paused = true)]
async fn sensor_failure_is_a_503() {
    let h = TestHarness::builder(ScriptedSensor::new().then_hang())
        .sensor_timeout(Duration::from_secs(2))
        .build();

    let (status, body) = send(app_state(&h, None), get("/temperature")).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("timed out"));
}

#[tokio::test]
async fn out_of_range_override_is_rejected_without_touching_sinks() {
    let hosts = MockHostManager::with_hosts(&["pve1"]);
    let h = TestHarness::builder(ScriptedSensor::constant(25.0, 40.0))
        .with_hosts(hosts.clone())
        .build();

    let (status, body) = send(app_state(&h, None), post_override("150")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("out of range"));
    assert_eq!(h.sensor_source().override_value(), None);
    assert!(h.recorder.is_empty());
    assert_eq!(hosts.list_calls(), 0);
}

#[tokio::test]
async fn non_integer_override_is_rejected() {
    let h = TestHarness::builder(ScriptedSensor::constant(25.0, 40.0)).build();
    let (status, body) = send(app_state(&h, None), post_override("hot")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("is not an integer"));
}

#[tokio::test]
async fn override_then_reset() {
    let h = TestHarness::builder(ScriptedSensor::constant(25.0, 40.0)).build();
    let sensor: Arc<SensorSource> = h.sensor_source();

    let (status, body) = send(app_state(&h, None), post_override("85")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["override"], 85);
    assert_eq!(sensor.override_value(), Some(85));

    let (_, reading) = send(app_state(&h, None), get("/temperature")).await;
    assert_eq!(reading["temperature"], 85.0);
    assert_eq!(reading["status"], "HIGH");

    let (status, body) = send(app_state(&h, None), post_override("Reset")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["override"].is_null());
    assert_eq!(sensor.override_value(), None);
}

#[tokio::test]
async fn override_needs_the_api_key_when_configured() {
    let h = TestHarness::builder(ScriptedSensor::constant(25.0, 40.0)).build();

    let (status, _) = send(app_state(&h, Some("k3y")), post_override("50")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::post("/override")
        .header("x-api-key", "k3y")
        .body(Body::from("50"))
        .unwrap();
    let (status, _) = send(app_state(&h, Some("k3y")), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(h.sensor_source().override_value(), Some(50));

    // reads stay public
    let (status, _) = send(app_state(&h, Some("k3y")), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn health_reports_sinks_and_coordinator() {
    let hosts = MockHostManager::with_hosts(&["pve1"]);
    let mut h = TestHarness::builder(ScriptedSensor::constant(90.0, 40.0))
        .threshold(80.0)
        .with_failing_store()
        .with_hosts(hosts)
        .build();

    let (_, before) = send(app_state(&h, None), get("/health")).await;
    assert_eq!(before["status"], "ok");
    assert_eq!(before["shutdown_fired"], false);
    assert_eq!(before["coordinator"], "ARMED");

    let outcome = h.poll.tick().await;
    assert_eq!(outcome.sample.status, Status::High);

    let (status, after) = send(app_state(&h, None), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(after["shutdown_fired"], true);
    assert_eq!(after["coordinator"], "FIRED");
    assert_eq!(after["sinks"][0]["name"], "store");
    assert_eq!(after["sinks"][0]["failures"], 1);
    assert_eq!(after["sinks"][1]["deliveries"], 1);
    assert!(after["override"].is_null());
}
