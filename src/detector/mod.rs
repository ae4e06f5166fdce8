//! DetectionLoop - continuous frame sampling and classification
//!
//! ## Responsibilities
//!
//! - Pull frames from the camera at full rate
//! - Pass every Nth frame through the locator + classifier pipeline
//! - Feed classifications into the smoothing filter
//! - Publish the stable label into the shared mood state
//!
//! The loop runs on its own task for the life of the process; request
//! latency never depends on classifier latency. Classifier and locator
//! calls execute outside the camera mutex.

use crate::camera::{CameraError, FrameSource};
use crate::emotion::SmoothingFilter;
use crate::inference::{EmotionClassifier, RegionLocator};
use crate::state::MoodState;
use crate::vision::REGION_PADDING;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Backoff after a transient frame-not-ready read
const NOT_READY_BACKOFF: Duration = Duration::from_millis(100);

/// DetectionLoop instance
pub struct DetectionLoop {
    camera: Arc<dyn FrameSource>,
    locator: Arc<dyn RegionLocator>,
    classifier: Arc<dyn EmotionClassifier>,
    mood: Arc<MoodState>,
    frame_skip: u64,
}

impl DetectionLoop {
    /// Create new DetectionLoop
    pub fn new(
        camera: Arc<dyn FrameSource>,
        locator: Arc<dyn RegionLocator>,
        classifier: Arc<dyn EmotionClassifier>,
        mood: Arc<MoodState>,
        frame_skip: u64,
    ) -> Self {
        Self {
            camera,
            locator,
            classifier,
            mood,
            frame_skip: frame_skip.max(1),
        }
    }

    /// Spawn the loop task. The handle is joined by the caller at shutdown
    /// so one in-flight iteration can finish within the grace period.
    pub fn start(self) -> JoinHandle<()> {
        tracing::info!(frame_skip = self.frame_skip, "Starting detection loop");
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        let mut filter = SmoothingFilter::new();
        let mut counter: u64 = 0;

        while self.mood.is_running() {
            // Camera mutex is held for this read only
            let frame = match self.camera.read().await {
                Ok(frame) => frame,
                Err(CameraError::NotReady) => {
                    tokio::time::sleep(NOT_READY_BACKOFF).await;
                    continue;
                }
                Err(CameraError::Fatal(msg)) => {
                    tracing::error!(error = %msg, "Camera lost, stopping detection loop");
                    // Without a camera neither this loop nor the feed
                    // publishers can make progress; drop the running flag
                    // so health reporting reflects the dead pipeline.
                    self.mood.request_shutdown();
                    break;
                }
            };

            counter += 1;
            if counter % self.frame_skip != 0 {
                // Cheap path: keep the pull rate up without burning
                // classifier cycles
                continue;
            }

            if let Err(e) = self.process_frame(&frame, &mut filter).await {
                tracing::warn!(seq = frame.seq, error = %e, "Classification skipped");
            }
        }

        tracing::info!(
            observations = self.mood.observation_count(),
            "Detection loop stopped"
        );
    }

    /// Locate, crop, classify, and publish for one sampled frame.
    /// No-detection returns Ok without touching the mood state; only
    /// locator/classifier faults bubble up to be logged.
    async fn process_frame(
        &self,
        frame: &crate::camera::Frame,
        filter: &mut SmoothingFilter,
    ) -> crate::error::Result<()> {
        let region = match self.locator.locate(frame).await? {
            Some(region) => region,
            None => return Ok(()),
        };

        // A degenerate region is "no region"
        if region.is_empty() {
            return Ok(());
        }

        let padded = region.padded(REGION_PADDING, frame.width(), frame.height());
        let crop = match padded.crop(&frame.pixels) {
            Some(crop) => crop,
            // Degenerate crop never reaches the classifier
            None => return Ok(()),
        };

        let label = self.classifier.classify(&crop).await?;
        let stable = filter.observe(label);
        self.mood.publish(stable, region).await;

        tracing::debug!(
            seq = frame.seq,
            label = %label,
            stable = %stable,
            history = filter.len(),
            "Observation recorded"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Frame;
    use crate::emotion::EmotionLabel;
    use crate::error::{Error, Result};
    use crate::vision::Region;
    use async_trait::async_trait;
    use chrono::Utc;
    use image::RgbImage;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Frame source producing a fixed number of frames, then fatal
    struct CountingSource {
        pulls: AtomicU64,
        limit: u64,
    }

    #[async_trait]
    impl FrameSource for CountingSource {
        async fn read(&self) -> std::result::Result<Frame, CameraError> {
            let n = self.pulls.fetch_add(1, Ordering::SeqCst) + 1;
            if n > self.limit {
                return Err(CameraError::Fatal("script exhausted".to_string()));
            }
            Ok(Frame {
                seq: n,
                captured_at: Utc::now(),
                pixels: RgbImage::new(64, 64),
            })
        }

        async fn release(&self) {}
    }

    struct FixedLocator {
        region: Option<Region>,
        calls: AtomicU64,
    }

    #[async_trait]
    impl RegionLocator for FixedLocator {
        async fn locate(&self, _frame: &Frame) -> Result<Option<Region>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.region)
        }
    }

    struct ScriptedClassifier {
        labels: Vec<Result<EmotionLabel>>,
        calls: AtomicU64,
    }

    #[async_trait]
    impl EmotionClassifier for ScriptedClassifier {
        async fn classify(&self, _crop: &RgbImage) -> Result<EmotionLabel> {
            let i = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            match self.labels.get(i % self.labels.len().max(1)) {
                Some(Ok(label)) => Ok(*label),
                Some(Err(_)) => Err(Error::Inference("scripted fault".to_string())),
                None => Ok(EmotionLabel::Neutral),
            }
        }
    }

    fn harness(
        pulls: u64,
        region: Option<Region>,
        labels: Vec<Result<EmotionLabel>>,
    ) -> (
        Arc<MoodState>,
        Arc<FixedLocator>,
        Arc<ScriptedClassifier>,
        DetectionLoop,
    ) {
        let mood = Arc::new(MoodState::new());
        let source = Arc::new(CountingSource {
            pulls: AtomicU64::new(0),
            limit: pulls,
        });
        let locator = Arc::new(FixedLocator {
            region,
            calls: AtomicU64::new(0),
        });
        let classifier = Arc::new(ScriptedClassifier {
            labels,
            calls: AtomicU64::new(0),
        });
        let detector = DetectionLoop::new(
            source,
            locator.clone(),
            classifier.clone(),
            mood.clone(),
            5,
        );
        (mood, locator, classifier, detector)
    }

    #[tokio::test]
    async fn test_frame_skip_throttle() {
        // 17 pulls with frame_skip 5 sample frames 5, 10, 15
        let (_, locator, classifier, detector) = harness(
            17,
            Some(Region::new(10, 10, 40, 40)),
            vec![Ok(EmotionLabel::Happy)],
        );
        detector.start().await.unwrap();
        assert_eq!(locator.calls.load(Ordering::SeqCst), 3);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_no_region_leaves_state_untouched() {
        let (mood, locator, classifier, detector) =
            harness(17, None, vec![Ok(EmotionLabel::Happy)]);
        detector.start().await.unwrap();
        assert_eq!(locator.calls.load(Ordering::SeqCst), 3);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
        assert_eq!(mood.current_mood().await, EmotionLabel::Neutral);
        assert_eq!(mood.observation_count(), 0);
    }

    #[tokio::test]
    async fn test_classifier_fault_does_not_stop_loop() {
        let (mood, _, classifier, detector) = harness(
            20,
            Some(Region::new(10, 10, 40, 40)),
            vec![
                Ok(EmotionLabel::Happy),
                Err(Error::Inference("boom".to_string())),
                Ok(EmotionLabel::Happy),
                Ok(EmotionLabel::Happy),
            ],
        );
        detector.start().await.unwrap();
        // All 4 sampled frames hit the classifier despite the fault
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 4);
        // Faulted call produced no observation
        assert_eq!(mood.observation_count(), 3);
        assert_eq!(mood.current_mood().await, EmotionLabel::Happy);
    }

    #[tokio::test]
    async fn test_zero_area_region_skips_classifier() {
        let (mood, _, classifier, detector) = harness(
            10,
            Some(Region::new(30, 30, 30, 30)),
            vec![Ok(EmotionLabel::Happy)],
        );
        detector.start().await.unwrap();
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
        assert_eq!(mood.observation_count(), 0);
    }

    #[tokio::test]
    async fn test_fatal_camera_flips_running_flag() {
        // A mid-run fatal camera error must not leave health reporting
        // claiming the loop is alive
        let (mood, _, _, detector) = harness(0, None, vec![]);
        assert!(mood.is_running());
        detector.start().await.unwrap();
        assert!(!mood.is_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_stops_loop_promptly() {
        let mood = Arc::new(MoodState::new());
        let source = Arc::new(CountingSource {
            pulls: AtomicU64::new(0),
            limit: u64::MAX,
        });
        let locator = Arc::new(FixedLocator {
            region: None,
            calls: AtomicU64::new(0),
        });
        let classifier = Arc::new(ScriptedClassifier {
            labels: vec![],
            calls: AtomicU64::new(0),
        });
        let handle =
            DetectionLoop::new(source, locator, classifier, mood.clone(), 5).start();

        tokio::time::sleep(Duration::from_millis(20)).await;
        mood.request_shutdown();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("loop did not stop within grace period")
            .unwrap();
        assert!(!mood.is_running());
        assert_eq!(mood.current_mood().await, EmotionLabel::Neutral);
    }
}
