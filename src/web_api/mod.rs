//! WebAPI - HTTP endpoints
//!
//! ## Responsibilities
//!
//! - /mood and /video_feed routes
//! - Health and device status
//! - Response formatting
//!
//! Handlers only read MoodState; classifier faults can never surface here,
//! so /mood always answers 200 with a valid label.

use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;

use crate::emotion::EmotionLabel;
use crate::state::AppState;
use crate::stream;

/// Body of GET /mood
#[derive(Debug, Clone, Serialize)]
pub struct MoodResponse {
    pub mood: EmotionLabel,
}

/// Health check response
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_sec: i64,
    pub camera_connected: bool,
    pub inference_connected: bool,
    pub detection_running: bool,
}

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/mood", get(get_mood))
        .route("/video_feed", get(video_feed))
        .route("/healthz", get(health_check))
        .route("/api/status", get(device_status))
        .with_state(state)
}

/// Current stable mood. Always succeeds; before the first observation this
/// is the default label.
async fn get_mood(State(state): State<AppState>) -> Json<MoodResponse> {
    let mood = state.mood.current_mood().await;
    Json(MoodResponse { mood })
}

/// Annotated MJPEG feed. In degraded mode (no camera) the multipart body
/// ends immediately but the endpoint still answers 200.
async fn video_feed(State(state): State<AppState>) -> impl IntoResponse {
    let content_type = format!("multipart/x-mixed-replace; boundary={}", stream::BOUNDARY);

    let body = match &state.camera {
        Some(camera) => {
            Body::from_stream(stream::mjpeg_stream(camera.clone(), state.mood.clone()))
        }
        None => Body::empty(),
    };

    ([(header::CONTENT_TYPE, content_type)], body)
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let inference_ok = state.inference.health_check().await;

    let response = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_sec: state.uptime_sec(),
        camera_connected: state.camera.is_some(),
        inference_connected: inference_ok,
        detection_running: state.mood.is_running(),
    };

    Json(response)
}

/// Device status endpoint
async fn device_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "device_type": "moodcam",
        "firmware_version": env!("CARGO_PKG_VERSION"),
        "status": if state.mood.is_running() { "running" } else { "stopping" },
        "observations": state.mood.observation_count(),
    }))
}
