//! Camera frame acquisition
//!
//! ## Responsibilities
//!
//! - Continuous frame capture from the local video device via ffmpeg
//! - Serialized access to the device handle (single critical section)
//! - Transient not-ready vs fatal failure split for the detection loop
//!
//! The detection loop and every video-feed connection read frames through
//! the same [`CameraSource`]; the internal mutex covers each read only, so
//! locator/classifier calls never execute while the device is held.

use crate::state::AppConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::RgbImage;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::time::{timeout_at, Instant};

/// Bytes per pixel of the raw ffmpeg output (rgb24)
const BYTES_PER_PIXEL: usize = 3;

/// Per-read timeout before reporting the transient not-ready condition
const READ_TIMEOUT: Duration = Duration::from_millis(200);

/// Timeout for the first frame when opening the device
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// One captured video frame, owned by whoever pulled it
pub struct Frame {
    /// Monotonic sequence number assigned at capture
    pub seq: u64,
    /// Capture timestamp
    pub captured_at: DateTime<Utc>,
    /// Decoded RGB pixels
    pub pixels: RgbImage,
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}

/// Frame acquisition failure
#[derive(Debug, Clone, thiserror::Error)]
pub enum CameraError {
    /// No frame available yet; retry after a short backoff
    #[error("frame not ready")]
    NotReady,

    /// Device handle is gone; no further reads will succeed
    #[error("camera failed: {0}")]
    Fatal(String),
}

/// Frame producer seam consumed by the detection loop and stream publisher
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Pull one frame. Concurrent callers are serialized internally.
    async fn read(&self) -> Result<Frame, CameraError>;

    /// Release the underlying device. Subsequent reads fail fast.
    async fn release(&self);
}

struct CameraInner {
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    /// Partial frame bytes carried across not-ready reads so the rgb24
    /// stream never loses alignment
    buf: Vec<u8>,
    filled: usize,
    seq: u64,
    released: bool,
}

/// Real frame source: persistent ffmpeg child decoding the capture device
/// to a raw rgb24 pipe
pub struct CameraSource {
    inner: Mutex<CameraInner>,
    width: u32,
    height: u32,
}

impl CameraSource {
    /// Open the capture device. Spawns ffmpeg and waits for the first frame;
    /// failure here is the fatal-at-startup case the caller turns into
    /// degraded mode.
    pub async fn open(config: &AppConfig) -> Result<Self, CameraError> {
        let video_size = format!("{}x{}", config.frame_width, config.frame_height);
        let mut child = Command::new("ffmpeg")
            .args([
                "-f",
                config.camera_input_format.as_str(),
                "-video_size",
                video_size.as_str(),
                "-i",
                config.camera_device.as_str(),
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgb24",
                "-",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CameraError::Fatal(format!("failed to spawn ffmpeg: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CameraError::Fatal("ffmpeg stdout not captured".to_string()))?;

        let frame_len = config.frame_width as usize * config.frame_height as usize * BYTES_PER_PIXEL;
        let source = Self {
            inner: Mutex::new(CameraInner {
                child: Some(child),
                stdout: Some(stdout),
                buf: vec![0u8; frame_len],
                filled: 0,
                seq: 0,
                released: false,
            }),
            width: config.frame_width,
            height: config.frame_height,
        };

        // The device either delivers a first frame within the open
        // window or the startup is treated as a fatal resource failure.
        let deadline = Instant::now() + OPEN_TIMEOUT;
        loop {
            match source.read().await {
                Ok(frame) => {
                    tracing::info!(
                        device = %config.camera_device,
                        width = frame.width(),
                        height = frame.height(),
                        "Camera opened"
                    );
                    return Ok(source);
                }
                Err(CameraError::NotReady) if Instant::now() < deadline => {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                Err(CameraError::NotReady) => {
                    source.release().await;
                    return Err(CameraError::Fatal(format!(
                        "no frame from {} within {:?}",
                        config.camera_device, OPEN_TIMEOUT
                    )));
                }
                Err(e) => {
                    source.release().await;
                    return Err(e);
                }
            }
        }
    }
}

#[async_trait]
impl FrameSource for CameraSource {
    async fn read(&self) -> Result<Frame, CameraError> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        if inner.released {
            return Err(CameraError::Fatal("camera released".to_string()));
        }

        let frame_len = inner.buf.len();
        let deadline = Instant::now() + READ_TIMEOUT;
        let stdout = inner
            .stdout
            .as_mut()
            .ok_or_else(|| CameraError::Fatal("camera pipe closed".to_string()))?;

        while inner.filled < frame_len {
            match timeout_at(deadline, stdout.read(&mut inner.buf[inner.filled..])).await {
                Ok(Ok(0)) => {
                    return Err(CameraError::Fatal("ffmpeg pipe ended".to_string()));
                }
                Ok(Ok(n)) => inner.filled += n,
                Ok(Err(e)) => {
                    return Err(CameraError::Fatal(format!("read failed: {}", e)));
                }
                // Partial bytes stay buffered; the next read resumes where
                // this one stopped, keeping the stream aligned.
                Err(_) => return Err(CameraError::NotReady),
            }
        }

        inner.filled = 0;
        inner.seq += 1;

        let pixels = RgbImage::from_raw(self.width, self.height, inner.buf.clone())
            .ok_or_else(|| CameraError::Fatal("frame buffer size mismatch".to_string()))?;

        Ok(Frame {
            seq: inner.seq,
            captured_at: Utc::now(),
            pixels,
        })
    }

    async fn release(&self) {
        let mut inner = self.inner.lock().await;
        if inner.released {
            return;
        }
        inner.released = true;
        inner.stdout = None;
        if let Some(mut child) = inner.child.take() {
            if let Err(e) = child.kill().await {
                tracing::warn!(error = %e, "Failed to kill ffmpeg child");
            }
        }
        tracing::info!("Camera released");
    }
}
