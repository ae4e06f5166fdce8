//! moodcam - live mood detection stream server
//!
//! Ingests a live webcam stream, classifies the face's emotion per sampled
//! frame, smooths the noisy label sequence into a stable "current mood",
//! and serves the result over HTTP.
//!
//! ## Components
//!
//! 1. camera - frame capture via ffmpeg, serialized device access
//! 2. inference - face locator + emotion classifier HTTP adapter
//! 3. emotion - label vocabulary + majority-vote smoothing filter
//! 4. detector - frame-sampling detection loop
//! 5. vision - region geometry, annotation, JPEG encoding
//! 6. stream - per-connection MJPEG publisher
//! 7. web_api - /mood, /video_feed, health endpoints
//! 8. state - shared mood state and configuration
//!
//! ## Concurrency contract
//!
//! The detection loop is the sole writer of the stable label; handlers and
//! stream publishers are readers. All camera reads go through one mutex;
//! locator/classifier calls run outside it. Shutdown is cooperative through
//! a one-way running flag.

pub mod camera;
pub mod detector;
pub mod emotion;
pub mod error;
pub mod inference;
pub mod state;
pub mod stream;
pub mod vision;
pub mod web_api;
