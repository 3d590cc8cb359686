//! The publish side of the analytics pipeline.
//!
//! A receiver task pulls frames from the [FrameSource] into a single-slot
//! latest-wins buffer; the processor task takes the most recent frame, runs
//! the detector and the motion detector, hands an annotated copy to the
//! preview sink and publishes the raw frame plus detections to the shared
//! frame slot. Backlog never accumulates: a new frame replaces an unread
//! one, which bounds end-to-end latency at one frame.

use std::path::PathBuf;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use director_types::{timestamp, BgrFrame, Detection};
use frame_ipc::FramePublisher;
use latest_wins::LatestValue;
use motion_detector::{MotionDetector, MotionDetectorConfig};
use object_cropper::{CropperConfig, ObjectCropper};

use crate::draw;
use crate::fps::FpsCounter;
use crate::ports::{DetectParams, Detector, FrameSource, PreviewSink};

/// Poll cadence of the processor when no fresh frame is available.
const IDLE_SPIN: std::time::Duration = std::time::Duration::from_millis(10);

pub struct PipelineConfig {
    /// Name of the shared frame slot.
    pub slot_name: String,
    /// Directory holding the slot (the platform default outside tests).
    pub slot_dir: PathBuf,
    pub enable_motion: bool,
    pub detect_params: DetectParams,
    /// Where manually triggered crops are written.
    pub manual_crop_dir: PathBuf,
    /// JPEG quality and padding for manual crops.
    pub manual_cropper: CropperConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            slot_name: frame_ipc::DEFAULT_SLOT_NAME.to_string(),
            slot_dir: PathBuf::from(frame_ipc::SLOT_DIR),
            enable_motion: true,
            detect_params: DetectParams::default(),
            manual_crop_dir: PathBuf::from("manual_crops"),
            manual_cropper: CropperConfig {
                max_images: 0,
                ..Default::default()
            },
        }
    }
}

pub struct AnalyticsPipeline {
    source: Box<dyn FrameSource>,
    detector: Box<dyn Detector>,
    preview: Option<Box<dyn PreviewSink>>,
    config: PipelineConfig,
}

impl AnalyticsPipeline {
    pub fn new(
        source: Box<dyn FrameSource>,
        detector: Box<dyn Detector>,
        preview: Option<Box<dyn PreviewSink>>,
        config: PipelineConfig,
    ) -> Self {
        AnalyticsPipeline {
            source,
            detector,
            preview,
            config,
        }
    }

    /// Run until the source ends or shutdown fires. `manual_trigger_rx`
    /// fires a crop of every current detection from the latest raw frame.
    pub async fn run(
        self,
        mut manual_trigger_rx: mpsc::Receiver<()>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) -> eyre::Result<()> {
        let AnalyticsPipeline {
            mut source,
            mut detector,
            mut preview,
            config,
        } = self;

        // Slot creation failure is fatal for the publisher side.
        let mut publisher = FramePublisher::create_in(&config.slot_dir, &config.slot_name)?;
        let manual_cropper = ObjectCropper::new(CropperConfig {
            output_dir: config.manual_crop_dir.clone(),
            ..config.manual_cropper.clone()
        })?;

        let mut motion = config
            .enable_motion
            .then(|| MotionDetector::new(MotionDetectorConfig::default()));

        let latest: LatestValue<BgrFrame> = LatestValue::new();

        // Receiver task: drain the source as fast as it produces, keeping
        // only the most recent frame.
        let (source_done_tx, mut source_done_rx) = mpsc::channel::<()>(1);
        let receiver_latest = latest.clone();
        tokio::spawn(async move {
            loop {
                match source.next_frame().await {
                    Ok(Some(frame)) => {
                        if receiver_latest.put(frame) {
                            debug!("replaced an unprocessed frame");
                        }
                    }
                    Ok(None) => {
                        info!("frame source ended");
                        break;
                    }
                    Err(e) => {
                        error!("frame source error: {}", e);
                        break;
                    }
                }
            }
            let _ = source_done_tx.send(()).await;
        });

        let mut fps = FpsCounter::new();
        let mut manual_counter: u32 = 0;
        let mut last_published: Option<(BgrFrame, Vec<Detection>)> = None;

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("shutdown requested, stopping pipeline");
                    break;
                }
                _ = source_done_rx.recv() => {
                    // Drain whatever is still in the buffer, then stop.
                    if let Some(frame) = latest.take() {
                        Self::process_frame(
                            &mut detector, &mut motion, &mut preview, &mut publisher,
                            &config, &mut fps, &mut last_published, frame,
                        );
                    }
                    break;
                }
                Some(()) = manual_trigger_rx.recv() => {
                    match &last_published {
                        Some((frame, detections)) if !detections.is_empty() => {
                            let ts = timestamp::now_f64();
                            for det in detections {
                                manual_counter += 1;
                                if let Err(e) = manual_cropper.save_manual_crop(
                                    frame, det, ts, manual_counter, &config.manual_crop_dir,
                                ) {
                                    error!("manual crop failed: {}", e);
                                }
                            }
                        }
                        _ => {
                            warn!("manual crop requested but no detections available");
                        }
                    }
                }
                _ = tokio::time::sleep(IDLE_SPIN) => {
                    if let Some(frame) = latest.take() {
                        Self::process_frame(
                            &mut detector, &mut motion, &mut preview, &mut publisher,
                            &config, &mut fps, &mut last_published, frame,
                        );
                    }
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn process_frame(
        detector: &mut Box<dyn Detector>,
        motion: &mut Option<MotionDetector>,
        preview: &mut Option<Box<dyn PreviewSink>>,
        publisher: &mut FramePublisher,
        config: &PipelineConfig,
        fps: &mut FpsCounter,
        last_published: &mut Option<(BgrFrame, Vec<Detection>)>,
        frame: BgrFrame,
    ) {
        let detections = match detector.detect(&frame, &config.detect_params) {
            Ok(detections) => detections,
            Err(e) => {
                error!("detector error: {}", e);
                Vec::new()
            }
        };

        let motion_regions = motion
            .as_mut()
            .map(|m| m.detect(&frame))
            .unwrap_or_default();

        if let Some(preview) = preview.as_mut() {
            // Overlays go onto a copy; the published frame stays raw.
            let mut annotated = frame.clone();
            for det in &detections {
                draw::draw_rect(&mut annotated, det.x1, det.y1, det.x2, det.y2, draw::GREEN, 2);
            }
            for region in &motion_regions {
                draw::draw_rect(
                    &mut annotated,
                    region.x,
                    region.y,
                    region.x + region.width,
                    region.y + region.height,
                    draw::RED,
                    2,
                );
            }
            if let Err(e) = preview.show(&annotated) {
                warn!("preview sink error: {}", e);
            }
        }

        let ts = timestamp::now_f64();
        match publisher.publish(&frame, &detections, ts) {
            Ok(true) => {}
            Ok(false) => {
                // Oversized frame was dropped with a warning already.
            }
            Err(e) => {
                error!("publish failed: {}", e);
            }
        }

        if let Some(rate) = fps.tick() {
            info!(
                "{:.1} fps, {} detection(s), {} motion region(s)",
                rate,
                detections.len(),
                motion_regions.len()
            );
        }

        *last_published = Some((frame, detections));
    }
}
