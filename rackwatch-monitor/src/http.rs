//! HTTP API
//!
//! - `GET /` and `GET /temperature`: fresh sensor read plus the poll loop's
//!   last status. 503 when the sensor fails.
//! - `POST /override`: plain-text body, an integer in `[0, 99]` or `reset`.
//! - `GET /health`: uptime, coordinator state and per-sink counters.
//!
//! Reads are public. When an API key is configured, `POST /override` needs
//! it in the `x-api-key` header.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rackwatch_core::{
    classify, CoordinatorState, HealthBoard, LatestSample, PollConfig, SensorSource,
    ShutdownCoordinator, SinkHealth, Status,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub sensor: Arc<SensorSource>,
    pub latest: LatestSample,
    pub health: HealthBoard,
    pub coordinator: Arc<ShutdownCoordinator>,
    pub config: watch::Receiver<PollConfig>,
    pub api_key: Option<Arc<str>>,
    pub started: Instant,
}

#[derive(Debug, Serialize)]
struct TemperatureView {
    temperature: f64,
    humidity: f64,
    #[serde(with = "time::serde::rfc3339")]
    captured_at: OffsetDateTime,
    status: Status,
    /// Status of the last poll tick, `null` before the first one.
    last_status: Option<Status>,
}

#[derive(Debug, Serialize)]
struct HealthView {
    status: &'static str,
    uptime_seconds: u64,
    shutdown_fired: bool,
    coordinator: CoordinatorState,
    #[serde(rename = "override")]
    override_temperature: Option<u8>,
    sinks: Vec<SinkHealth>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideCommand {
    Set(u8),
    Reset,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OverrideError {
    #[error("'{0}' is not an integer (expected 0-99 or 'reset')")]
    NotInteger(String),
    #[error("{0} is out of range (expected 0-99)")]
    OutOfRange(String),
}

/// Parses the override body. All-digit input too long for an integer is
/// out of range, not malformed.
pub fn parse_override(body: &str) -> Result<OverrideCommand, OverrideError> {
    let raw = body.trim();
    if raw.eq_ignore_ascii_case("reset") {
        return Ok(OverrideCommand::Reset);
    }

    match raw.parse::<i64>() {
        Ok(value) => u8::try_from(value)
            .ok()
            .filter(|v| *v <= 99)
            .map(OverrideCommand::Set)
            .ok_or_else(|| OverrideError::OutOfRange(raw.to_string())),
        Err(_) => {
            let digits = raw.strip_prefix(['-', '+']).unwrap_or(raw);
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                Err(OverrideError::OutOfRange(raw.to_string()))
            } else {
                Err(OverrideError::NotInteger(raw.to_string()))
            }
        }
    }
}

async fn require_api_key(
    State(app): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = app.api_key.as_deref() else {
        return Ok(next.run(req).await);
    };

    let ok = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == expected)
        .unwrap_or(false);

    if !ok {
        warn!(path = %req.uri().path(), "rejected request without a valid api key");
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

pub fn build_router(app_state: AppState) -> Router {
    let protected = Router::new()
        .route("/override", post(set_override))
        .route_layer(middleware::from_fn_with_state(app_state.clone(), require_api_key));

    Router::new()
        .route("/", get(current_reading))
        .route("/temperature", get(current_reading))
        .route("/health", get(health))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

// GET / and GET /temperature
async fn current_reading(State(app): State<AppState>) -> Response {
    let threshold = app.config.borrow().threshold;
    let acquired = app.sensor.read().await;
    let status = classify(acquired.as_ref(), threshold);

    match acquired {
        Ok(reading) => Json(TemperatureView {
            temperature: reading.temperature,
            humidity: reading.humidity,
            captured_at: reading.captured_at,
            status,
            last_status: app.latest.status(),
        })
        .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": e.to_string(), "last_status": app.latest.status() })),
        )
            .into_response(),
    }
}

// POST /override
async fn set_override(State(app): State<AppState>, body: String) -> Response {
    match parse_override(&body) {
        Ok(OverrideCommand::Set(value)) => {
            app.sensor.set_override(Some(value));
            info!(temperature = value, "temperature override set");
            Json(json!({ "override": value })).into_response()
        }
        Ok(OverrideCommand::Reset) => {
            app.sensor.set_override(None);
            info!("temperature override cleared");
            Json(json!({ "override": null })).into_response()
        }
        Err(e) => (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))).into_response(),
    }
}

// GET /health
async fn health(State(app): State<AppState>) -> Json<HealthView> {
    let coordinator = app.coordinator.state();
    Json(HealthView {
        status: "ok",
        uptime_seconds: app.started.elapsed().as_secs(),
        shutdown_fired: coordinator == CoordinatorState::Fired,
        coordinator,
        override_temperature: app.sensor.override_value(),
        sinks: app.health.snapshot(),
    })
}
