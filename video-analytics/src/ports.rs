//! Boundary ports of the analytics pipeline.
//!
//! The WebRTC/WHEP transport, the inference engine and the preview window
//! live outside this crate; each is modeled as a small capability trait so
//! virtual stand-ins are drop-in substitutes.

use async_trait::async_trait;

use director_types::{BgrFrame, Detection};

/// Supplier of decoded BGR frames.
///
/// Implementations must drop (never queue) frames when the consumer is
/// slow; `next_frame` always hands out the most recent frame available.
#[async_trait]
pub trait FrameSource: Send {
    /// The next frame, or `None` when the stream has ended.
    async fn next_frame(&mut self) -> eyre::Result<Option<BgrFrame>>;
}

/// Inference parameters passed to the detector on every frame.
#[derive(Debug, Clone)]
pub struct DetectParams {
    pub confidence_threshold: f32,
    pub image_size: u32,
    pub half_precision: bool,
    pub max_detections: usize,
}

impl Default for DetectParams {
    fn default() -> Self {
        DetectParams {
            confidence_threshold: 0.5,
            image_size: 640,
            half_precision: false,
            max_detections: 100,
        }
    }
}

/// Per-frame object detection. Class ids follow the 80-class COCO
/// ordering.
pub trait Detector: Send {
    fn detect(&mut self, frame: &BgrFrame, params: &DetectParams) -> eyre::Result<Vec<Detection>>;
}

/// Consumer of annotated preview frames (a window, a stream, or nothing).
pub trait PreviewSink: Send {
    fn show(&mut self, frame: &BgrFrame) -> eyre::Result<()>;
}

/// Detector stand-in for deployments without an inference engine: the
/// pipeline then publishes frames with an empty detection list.
#[derive(Default)]
pub struct NoopDetector;

impl Detector for NoopDetector {
    fn detect(
        &mut self,
        _frame: &BgrFrame,
        _params: &DetectParams,
    ) -> eyre::Result<Vec<Detection>> {
        Ok(Vec::new())
    }
}

/// Frame source stand-in: a bright square orbiting a dark background at a
/// fixed frame rate. Useful for driving the pipeline without any camera.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    interval: tokio::time::Interval,
    frame_index: u64,
    max_frames: Option<u64>,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, fps: f64, max_frames: Option<u64>) -> Self {
        let period = std::time::Duration::from_secs_f64(1.0 / fps.max(0.1));
        SyntheticSource {
            width,
            height,
            interval: tokio::time::interval(period),
            frame_index: 0,
            max_frames,
        }
    }
}

#[async_trait]
impl FrameSource for SyntheticSource {
    async fn next_frame(&mut self) -> eyre::Result<Option<BgrFrame>> {
        if let Some(max) = self.max_frames {
            if self.frame_index >= max {
                return Ok(None);
            }
        }
        self.interval.tick().await;

        let mut frame = BgrFrame::new(self.width, self.height);
        let size = (self.width.min(self.height) / 4).max(8);
        let phase = (self.frame_index % 120) as f64 / 120.0 * std::f64::consts::TAU;
        let cx = (self.width / 2) as f64 + phase.cos() * (self.width / 4) as f64;
        let cy = (self.height / 2) as f64 + phase.sin() * (self.height / 4) as f64;
        let x0 = (cx as u32).saturating_sub(size / 2).min(self.width - 1);
        let y0 = (cy as u32).saturating_sub(size / 2).min(self.height - 1);
        for y in y0..(y0 + size).min(self.height) {
            for x in x0..(x0 + size).min(self.width) {
                frame.set_pixel(x, y, [230, 230, 230]);
            }
        }

        self.frame_index += 1;
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn synthetic_source_is_bounded() {
        let mut source = SyntheticSource::new(64, 48, 1000.0, Some(3));
        let mut frames = 0;
        while let Some(frame) = source.next_frame().await.unwrap() {
            assert_eq!(frame.width, 64);
            assert_eq!(frame.height, 48);
            frames += 1;
        }
        assert_eq!(frames, 3);
    }

    #[test]
    fn noop_detector_is_empty() {
        let mut det = NoopDetector;
        let frame = BgrFrame::new(8, 8);
        assert!(det
            .detect(&frame, &DetectParams::default())
            .unwrap()
            .is_empty());
    }
}
