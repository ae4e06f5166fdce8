//! Stream publisher - annotated MJPEG feed
//!
//! ## Responsibilities
//!
//! - Per-connection frame pulls (through the shared camera mutex)
//! - Annotation with the current stable mood and last face region
//! - JPEG encoding and multipart part framing
//!
//! One publisher task runs per /video_feed connection, pull-based, bound to
//! the connection lifetime and the running flag. Back-pressure comes from
//! the bounded channel: a slow client blocks only its own publisher, which
//! then releases the camera to the other readers.

use crate::camera::{CameraError, FrameSource};
use crate::state::MoodState;
use crate::vision;
use axum::body::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Multipart boundary token, mirrored in the content-type header
pub const BOUNDARY: &str = "frame";

/// Channel depth between publisher and HTTP writer
const CHANNEL_DEPTH: usize = 4;

/// Pause between frames so N publishers and the detection loop share the
/// camera mutex without starving each other (~15 fps)
const FRAME_INTERVAL: Duration = Duration::from_millis(66);

/// Upper bound on waiting for a slow client before the running flag is
/// rechecked; keeps shutdown bounded even with a stalled viewer
const SEND_TIMEOUT: Duration = Duration::from_millis(500);

/// Spawn a publisher for one feed connection and return the part stream.
///
/// The stream ends when the client disconnects, the running flag drops, or
/// the camera fails fatally.
pub fn mjpeg_stream(
    camera: Arc<dyn FrameSource>,
    mood: Arc<MoodState>,
) -> ReceiverStream<Result<Bytes, std::convert::Infallible>> {
    let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);

    tokio::spawn(async move {
        while mood.is_running() {
            let frame = match camera.read().await {
                Ok(frame) => frame,
                Err(CameraError::NotReady) => {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
                Err(CameraError::Fatal(msg)) => {
                    tracing::debug!(error = %msg, "Feed publisher stopping, camera gone");
                    break;
                }
            };

            let mut pixels = frame.pixels;
            let (label, region) = mood.mood_and_region().await;
            vision::annotate(&mut pixels, label, region);

            let jpeg = match vision::encode_jpeg(&pixels) {
                Ok(jpeg) => jpeg,
                Err(e) => {
                    tracing::warn!(seq = frame.seq, error = %e, "Feed frame encode failed");
                    continue;
                }
            };

            match tokio::time::timeout(SEND_TIMEOUT, tx.send(Ok(frame_part(&jpeg)))).await {
                Ok(Ok(())) => {}
                // Client disconnected
                Ok(Err(_)) => break,
                // Stalled client; drop the frame and recheck the flag
                Err(_) => continue,
            }

            tokio::time::sleep(FRAME_INTERVAL).await;
        }
    });

    ReceiverStream::new(rx)
}

/// Frame one JPEG as a multipart/x-mixed-replace part
fn frame_part(jpeg: &[u8]) -> Bytes {
    let mut part = Vec::with_capacity(jpeg.len() + 64);
    part.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    part.extend_from_slice(b"Content-Type: image/jpeg\r\n\r\n");
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Frame;
    use crate::emotion::EmotionLabel;
    use async_trait::async_trait;
    use chrono::Utc;
    use image::RgbImage;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio_stream::StreamExt;

    struct StubCamera {
        reads: AtomicU64,
    }

    #[async_trait]
    impl FrameSource for StubCamera {
        async fn read(&self) -> Result<Frame, CameraError> {
            let n = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Frame {
                seq: n,
                captured_at: Utc::now(),
                pixels: RgbImage::new(32, 32),
            })
        }

        async fn release(&self) {}
    }

    #[test]
    fn test_frame_part_framing() {
        let part = frame_part(&[0xFF, 0xD8, 0xFF]);
        let text = part.as_ref();
        assert!(text.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n"));
        assert!(text.ends_with(b"\xFF\xD8\xFF\r\n"));
    }

    #[tokio::test]
    async fn test_stream_yields_jpeg_parts() {
        let camera = Arc::new(StubCamera {
            reads: AtomicU64::new(0),
        });
        let mood = Arc::new(MoodState::new());
        mood.publish(EmotionLabel::Happy, crate::vision::Region::new(2, 2, 20, 20))
            .await;

        let mut stream = mjpeg_stream(camera, mood);
        let part = stream.next().await.expect("one part").unwrap();
        assert!(part.as_ref().starts_with(b"--frame\r\n"));
    }

    #[tokio::test]
    async fn test_stream_ends_after_shutdown() {
        let camera = Arc::new(StubCamera {
            reads: AtomicU64::new(0),
        });
        let mood = Arc::new(MoodState::new());
        mood.request_shutdown();

        let mut stream = mjpeg_stream(camera, mood);
        assert!(stream.next().await.is_none());
    }
}
