//! Frame-differencing motion detection.
//!
//! Each incoming BGR frame is converted to grayscale and blurred with a
//! 21x21 Gaussian. The absolute difference against the previous blurred
//! frame is thresholded, dilated twice with a 5x5 kernel, and the bounding
//! boxes of sufficiently large connected regions are reported. The first
//! frame only seeds the reference and reports nothing; the reference is
//! replaced after every frame.

use serde::{Deserialize, Serialize};
use tracing::debug;

use director_types::BgrFrame;

mod ops;
use ops::GrayFrame;

/// Axis-aligned region of detected motion, in pixels.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct MotionRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MotionDetectorConfig {
    /// Per-pixel difference threshold.
    #[serde(default = "default_threshold")]
    pub threshold: u8,
    /// Minimum changed area, in pixels, for a region to be reported.
    #[serde(default = "default_min_area")]
    pub min_area: u32,
}

fn default_threshold() -> u8 {
    25
}

fn default_min_area() -> u32 {
    500
}

impl Default for MotionDetectorConfig {
    fn default() -> Self {
        MotionDetectorConfig {
            threshold: default_threshold(),
            min_area: default_min_area(),
        }
    }
}

pub struct MotionDetector {
    config: MotionDetectorConfig,
    prev: Option<GrayFrame>,
}

impl MotionDetector {
    pub fn new(config: MotionDetectorConfig) -> Self {
        MotionDetector { config, prev: None }
    }

    /// Process one frame and report motion regions relative to the previous
    /// frame. Empty on the very first frame and after a resolution change.
    pub fn detect(&mut self, frame: &BgrFrame) -> Vec<MotionRegion> {
        let gray = ops::bgr_to_gray(frame);
        let blurred = ops::gaussian_blur_21(&gray);

        let prev = match self.prev.take() {
            Some(prev) if prev.width == blurred.width && prev.height == blurred.height => prev,
            _ => {
                self.prev = Some(blurred);
                return Vec::new();
            }
        };

        let mut mask = ops::absdiff(&prev, &blurred);
        ops::threshold_binary(&mut mask, self.config.threshold);
        let mask = ops::dilate_5x5(&mask);
        let mask = ops::dilate_5x5(&mask);

        let regions = ops::component_bounding_boxes(&mask, self.config.min_area);
        if !regions.is_empty() {
            debug!("motion in {} region(s)", regions.len());
        }

        self.prev = Some(blurred);
        regions
    }

    /// Drop the reference frame; the next frame seeds a new one.
    pub fn reset(&mut self) {
        self.prev = None;
    }
}
