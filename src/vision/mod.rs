//! Region geometry and frame annotation
//!
//! ## Responsibilities
//!
//! - Face region rectangle with padding clamped to frame bounds
//! - Crop extraction for the classifier
//! - Annotation of feed frames (face box + mood strip)
//! - JPEG encoding for the multipart stream

use crate::emotion::EmotionLabel;
use crate::error::{Error, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Fixed padding applied around a located face before cropping
pub const REGION_PADDING: u32 = 20;

/// JPEG quality for the video feed
const JPEG_QUALITY: u8 = 80;

/// Axis-aligned face region within a frame
///
/// Invariant: `x_min <= x_max` and `y_min <= y_max`, both within the frame
/// the region was located in. A zero-area region means "no region".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x_min: u32,
    pub y_min: u32,
    pub x_max: u32,
    pub y_max: u32,
}

impl Region {
    /// Build a region, normalizing inverted coordinates to empty
    pub fn new(x_min: u32, y_min: u32, x_max: u32, y_max: u32) -> Self {
        Self {
            x_min,
            y_min,
            x_max: x_max.max(x_min),
            y_max: y_max.max(y_min),
        }
    }

    pub fn width(&self) -> u32 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> u32 {
        self.y_max - self.y_min
    }

    /// Zero area in either dimension
    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Expand by `padding` on every side, clamped to the frame extent
    pub fn padded(&self, padding: u32, frame_width: u32, frame_height: u32) -> Region {
        Region {
            x_min: self.x_min.saturating_sub(padding),
            y_min: self.y_min.saturating_sub(padding),
            x_max: (self.x_max + padding).min(frame_width),
            y_max: (self.y_max + padding).min(frame_height),
        }
    }

    /// Clamp the region to the given frame extent
    pub fn clamped(&self, frame_width: u32, frame_height: u32) -> Region {
        let x_min = self.x_min.min(frame_width);
        let y_min = self.y_min.min(frame_height);
        Region {
            x_min,
            y_min,
            x_max: self.x_max.clamp(x_min, frame_width),
            y_max: self.y_max.clamp(y_min, frame_height),
        }
    }

    /// Extract the region's pixels. Returns None for a zero-area region or
    /// one that falls outside the image.
    pub fn crop(&self, pixels: &RgbImage) -> Option<RgbImage> {
        let clamped = self.clamped(pixels.width(), pixels.height());
        if clamped.is_empty() {
            return None;
        }
        Some(
            image::imageops::crop_imm(
                pixels,
                clamped.x_min,
                clamped.y_min,
                clamped.width(),
                clamped.height(),
            )
            .to_image(),
        )
    }
}

/// Display color per emotion for the feed overlay
fn mood_color(label: EmotionLabel) -> Rgb<u8> {
    match label {
        EmotionLabel::Happy => Rgb([64, 200, 64]),
        EmotionLabel::Sad => Rgb([64, 96, 220]),
        EmotionLabel::Angry => Rgb([220, 48, 48]),
        EmotionLabel::Neutral => Rgb([180, 180, 180]),
        EmotionLabel::Surprised => Rgb([240, 200, 48]),
        EmotionLabel::Fearful => Rgb([150, 64, 200]),
        EmotionLabel::Disgusted => Rgb([96, 160, 64]),
    }
}

/// Draw the current mood annotation onto a feed frame: a hollow box around
/// the last detected face and a mood-colored strip along the top edge.
pub fn annotate(pixels: &mut RgbImage, mood: EmotionLabel, region: Option<Region>) {
    let color = mood_color(mood);
    let (width, height) = (pixels.width(), pixels.height());

    if let Some(region) = region {
        let region = region.clamped(width, height);
        if !region.is_empty() {
            let rect = Rect::at(region.x_min as i32, region.y_min as i32)
                .of_size(region.width(), region.height());
            draw_hollow_rect_mut(pixels, rect, color);
        }
    }

    let strip_height = (height / 48).max(4).min(height);
    for y in 0..strip_height {
        for x in 0..width {
            pixels.put_pixel(x, y, color);
        }
    }
}

/// Encode a frame as JPEG for the multipart stream
pub fn encode_jpeg(pixels: &RgbImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut bytes), JPEG_QUALITY);
    pixels
        .write_with_encoder(encoder)
        .map_err(|e| Error::Encode(format!("JPEG encode failed: {}", e)))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padding_clamps_to_frame_edges() {
        let region = Region::new(5, 5, 630, 470);
        let padded = region.padded(REGION_PADDING, 640, 480);
        assert_eq!(padded.x_min, 0);
        assert_eq!(padded.y_min, 0);
        assert_eq!(padded.x_max, 640);
        assert_eq!(padded.y_max, 480);
        assert!(padded.x_min <= padded.x_max);
        assert!(padded.y_min <= padded.y_max);
    }

    #[test]
    fn test_clamp_never_inverts_coordinates() {
        // Region reported beyond the frame extent
        let region = Region::new(700, 500, 900, 600);
        let clamped = region.clamped(640, 480);
        assert!(clamped.x_min <= clamped.x_max);
        assert!(clamped.y_min <= clamped.y_max);
        assert!(clamped.is_empty());
    }

    #[test]
    fn test_inverted_input_normalizes_to_empty() {
        let region = Region::new(100, 100, 40, 40);
        assert!(region.is_empty());
    }

    #[test]
    fn test_zero_area_crop_is_none() {
        let pixels = RgbImage::new(64, 64);
        let region = Region::new(10, 10, 10, 40);
        assert!(region.crop(&pixels).is_none());
    }

    #[test]
    fn test_crop_dimensions() {
        let pixels = RgbImage::new(64, 64);
        let region = Region::new(8, 16, 40, 48);
        let crop = region.crop(&pixels).unwrap();
        assert_eq!(crop.width(), 32);
        assert_eq!(crop.height(), 32);
    }

    #[test]
    fn test_annotate_handles_missing_region() {
        let mut pixels = RgbImage::new(64, 64);
        annotate(&mut pixels, EmotionLabel::Happy, None);
        // Strip painted along the top edge
        assert_eq!(*pixels.get_pixel(0, 0), Rgb([64, 200, 64]));
    }

    #[test]
    fn test_encode_jpeg_produces_jpeg_magic() {
        let pixels = RgbImage::new(32, 32);
        let bytes = encode_jpeg(&pixels).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }
}
