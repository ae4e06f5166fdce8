//! Application state
//!
//! Holds the shared mood state, configuration, and the components exposed
//! to HTTP handlers.

use crate::camera::FrameSource;
use crate::emotion::EmotionLabel;
use crate::inference::InferenceClient;
use crate::vision::Region;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Capture device path
    pub camera_device: String,
    /// ffmpeg input format for the capture device
    pub camera_input_format: String,
    /// Capture width in pixels
    pub frame_width: u32,
    /// Capture height in pixels
    pub frame_height: u32,
    /// Inference server URL (face locator + emotion classifier)
    pub inference_url: String,
    /// Only every Nth pulled frame goes through the classifier
    pub frame_skip: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            camera_device: std::env::var("CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            camera_input_format: std::env::var("CAMERA_INPUT_FORMAT")
                .unwrap_or_else(|_| "v4l2".to_string()),
            frame_width: std::env::var("FRAME_WIDTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(640),
            frame_height: std::env::var("FRAME_HEIGHT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(480),
            inference_url: std::env::var("INFERENCE_URL")
                .unwrap_or_else(|_| "http://localhost:9000".to_string()),
            frame_skip: std::env::var("FRAME_SKIP")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|&n| n > 0)
                .unwrap_or(5),
        }
    }
}

/// Shared mood state
///
/// Single writer (the detection loop) / many readers (HTTP handlers, stream
/// publishers). The running flag gates both the detection loop and every
/// stream publisher; it flips true→false exactly once at shutdown.
pub struct MoodState {
    /// Stable label and the region it was observed in, behind one lock so
    /// readers never see a label paired with a stale region
    current: RwLock<(EmotionLabel, Option<Region>)>,
    running: AtomicBool,
    observations: AtomicU64,
}

impl MoodState {
    pub fn new() -> Self {
        Self {
            current: RwLock::new((EmotionLabel::default(), None)),
            running: AtomicBool::new(true),
            observations: AtomicU64::new(0),
        }
    }

    /// Current stable label. Returns immediately; never waits on the
    /// detection loop.
    pub async fn current_mood(&self) -> EmotionLabel {
        self.current.read().await.0
    }

    /// Last face region the detection loop saw, for feed annotation
    pub async fn last_region(&self) -> Option<Region> {
        self.current.read().await.1
    }

    /// Stable label together with the region it came from, read under one
    /// guard. The feed annotator uses this so the box and the mood color
    /// always belong to the same observation.
    pub async fn mood_and_region(&self) -> (EmotionLabel, Option<Region>) {
        *self.current.read().await
    }

    /// Publish a new stable label and the region it came from. Called only
    /// by the detection loop.
    pub async fn publish(&self, label: EmotionLabel, region: Region) {
        {
            let mut current = self.current.write().await;
            *current = (label, Some(region));
        }
        self.observations.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of successful classifications so far
    pub fn observation_count(&self) -> u64 {
        self.observations.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Cooperative shutdown: loops observe the flag at their next iteration
    /// boundary. Idempotent; the flag never flips back to true.
    pub fn request_shutdown(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            tracing::info!("Shutdown requested");
        }
    }
}

impl Default for MoodState {
    fn default() -> Self {
        Self::new()
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// Shared mood state (stable label, last region, running flag)
    pub mood: Arc<MoodState>,
    /// Camera; None when the device failed to open at startup (degraded
    /// mode: /mood serves the default label, /video_feed is inert)
    pub camera: Option<Arc<dyn FrameSource>>,
    /// Inference server adapter
    pub inference: Arc<InferenceClient>,
    /// Process start time for uptime reporting
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn uptime_sec(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}
