//! Inference server adapter
//!
//! ## Responsibilities
//!
//! - Face region location requests
//! - Emotion classification requests
//! - Response parsing and health checks
//!
//! Both collaborators sit behind traits so the detection loop can run
//! against stubs in tests. The real implementation posts JPEG frames to an
//! external inference server.

use crate::camera::Frame;
use crate::emotion::EmotionLabel;
use crate::error::{Error, Result};
use crate::vision::{self, Region};
use async_trait::async_trait;
use image::RgbImage;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;

/// Locates the primary face in a frame
#[async_trait]
pub trait RegionLocator: Send + Sync {
    /// None when no face is present; this is the silent-skip case, not an
    /// error.
    async fn locate(&self, frame: &Frame) -> Result<Option<Region>>;
}

/// Classifies the emotion shown in a cropped face region
#[async_trait]
pub trait EmotionClassifier: Send + Sync {
    async fn classify(&self, crop: &RgbImage) -> Result<EmotionLabel>;
}

/// Response of POST /v1/locate
#[derive(Debug, Clone, Deserialize)]
pub struct LocateResponse {
    pub found: bool,
    #[serde(default)]
    pub x_min: u32,
    #[serde(default)]
    pub y_min: u32,
    #[serde(default)]
    pub x_max: u32,
    #[serde(default)]
    pub y_max: u32,
}

/// Response of POST /v1/classify
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifyResponse {
    pub label: String,
    /// Raw classifier confidence; extracted for logging only, the smoothing
    /// core never retains it
    #[serde(default)]
    pub confidence: f32,
}

/// HTTP client for the face locator + emotion classifier server
pub struct InferenceClient {
    client: reqwest::Client,
    base_url: String,
}

impl InferenceClient {
    /// Create new inference client
    pub fn new(base_url: String) -> Self {
        Self::with_timeout(base_url, Duration::from_secs(10))
    }

    /// Create new inference client with custom timeout
    pub fn with_timeout(base_url: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self { client, base_url }
    }

    /// Check inference server health
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/healthz", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    /// Get base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_jpeg(&self, endpoint: &str, jpeg: Vec<u8>) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, endpoint);
        let form = Form::new().part(
            "image",
            Part::bytes(jpeg)
                .file_name("frame.jpg")
                .mime_str("image/jpeg")?,
        );

        let resp = self.client.post(&url).multipart(form).send().await?;

        if !resp.status().is_success() {
            return Err(Error::Inference(format!(
                "{} failed: {}",
                endpoint,
                resp.status()
            )));
        }

        Ok(resp)
    }
}

#[async_trait]
impl RegionLocator for InferenceClient {
    async fn locate(&self, frame: &Frame) -> Result<Option<Region>> {
        let jpeg = vision::encode_jpeg(&frame.pixels)?;
        let resp = self.post_jpeg("/v1/locate", jpeg).await?;
        let body: LocateResponse = resp.json().await?;

        if !body.found {
            return Ok(None);
        }

        let region = Region::new(body.x_min, body.y_min, body.x_max, body.y_max)
            .clamped(frame.width(), frame.height());

        // A degenerate box from the locator counts as no region
        if region.is_empty() {
            return Ok(None);
        }

        Ok(Some(region))
    }
}

#[async_trait]
impl EmotionClassifier for InferenceClient {
    async fn classify(&self, crop: &RgbImage) -> Result<EmotionLabel> {
        let jpeg = vision::encode_jpeg(crop)?;
        let resp = self.post_jpeg("/v1/classify", jpeg).await?;
        let body: ClassifyResponse = resp.json().await?;

        let label: EmotionLabel = body
            .label
            .parse()
            .map_err(|e: crate::emotion::UnknownLabel| Error::Inference(e.to_string()))?;

        tracing::trace!(
            label = %label,
            confidence = body.confidence,
            "Classification received"
        );

        Ok(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate_response_parsing() {
        let json = r#"{"found": true, "x_min": 10, "y_min": 20, "x_max": 110, "y_max": 140}"#;
        let resp: LocateResponse = serde_json::from_str(json).unwrap();
        assert!(resp.found);
        assert_eq!(resp.x_max, 110);
    }

    #[test]
    fn test_locate_response_not_found_defaults() {
        let json = r#"{"found": false}"#;
        let resp: LocateResponse = serde_json::from_str(json).unwrap();
        assert!(!resp.found);
        assert_eq!(resp.x_min, 0);
    }

    #[test]
    fn test_classify_response_parsing() {
        let json = r#"{"label": "happy", "confidence": 0.93}"#;
        let resp: ClassifyResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.label.parse::<EmotionLabel>().unwrap(), EmotionLabel::Happy);
        assert!((resp.confidence - 0.93).abs() < f32::EPSILON);
    }
}
