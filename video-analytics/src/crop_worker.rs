//! The consume side of the analytics pipeline.
//!
//! Attaches to the shared frame slot, feeds detections into the tracker,
//! and writes one crop per newly appearing object (the first-appearance
//! rule). Retention runs after every batch of writes.

use std::path::PathBuf;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use frame_ipc::FrameSubscriber;
use object_cropper::{CropperConfig, ObjectCropper};
use object_tracker::ObjectTracker;

/// Poll cadence of the consumer when the slot has no new publication.
const IDLE_SPIN: std::time::Duration = std::time::Duration::from_millis(10);

pub struct CropWorkerConfig {
    pub slot_name: String,
    pub slot_dir: PathBuf,
    pub retry_interval: std::time::Duration,
    pub iou_threshold: f64,
    pub object_timeout: f64,
    pub cropper: CropperConfig,
}

impl Default for CropWorkerConfig {
    fn default() -> Self {
        CropWorkerConfig {
            slot_name: frame_ipc::DEFAULT_SLOT_NAME.to_string(),
            slot_dir: PathBuf::from(frame_ipc::SLOT_DIR),
            retry_interval: frame_ipc::DEFAULT_RETRY_INTERVAL,
            iou_threshold: object_tracker::DEFAULT_IOU_THRESHOLD,
            object_timeout: object_tracker::DEFAULT_TIMEOUT_SEC,
            cropper: CropperConfig::default(),
        }
    }
}

pub async fn run_crop_worker(
    config: CropWorkerConfig,
    mut shutdown_rx: mpsc::Receiver<()>,
) -> eyre::Result<()> {
    let cropper = ObjectCropper::new(config.cropper)?;
    let mut tracker = ObjectTracker::new(config.iou_threshold, config.object_timeout);
    info!(
        "crop worker: iou_threshold={}, object_timeout={}s",
        config.iou_threshold, config.object_timeout
    );

    let mut subscriber = tokio::select! {
        _ = shutdown_rx.recv() => {
            info!("shutdown requested before the frame slot appeared");
            return Ok(());
        }
        subscriber = FrameSubscriber::attach_in(
            &config.slot_dir,
            &config.slot_name,
            config.retry_interval,
        ) => subscriber,
    };

    let mut crop_count: u64 = 0;
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("shutdown requested, leaving crop worker");
                break;
            }
            _ = tokio::time::sleep(IDLE_SPIN) => {}
        }

        let snapshot = match subscriber.read() {
            Some(snapshot) => snapshot,
            None => continue,
        };
        let (frame, detections, ts, sequence) = match snapshot.into_bgr_frame() {
            Some(parts) => parts,
            None => {
                warn!("publication is not a BGR frame; skipping");
                continue;
            }
        };

        let mut saved = Vec::new();
        for update in tracker.update(&detections, ts) {
            if !update.is_new {
                continue;
            }
            match cropper.save_crop(&frame, &update.detection, ts, sequence, update.track_id) {
                Ok(Some(path)) => {
                    tracker.mark_cropped(update.track_id);
                    crop_count += 1;
                    info!(
                        "[{}] new object #{} {}: {} ({}x{}, conf {:.2})",
                        crop_count,
                        update.track_id,
                        update.detection.class_name(),
                        path.display(),
                        update.detection.width(),
                        update.detection.height(),
                        update.detection.confidence,
                    );
                    saved.push(path);
                }
                Ok(None) => {}
                Err(e) => {
                    error!("crop of track #{} failed: {}", update.track_id, e);
                }
            }
        }

        if !saved.is_empty() {
            if let Err(e) = cropper.apply_retention(&saved) {
                warn!("retention cleanup failed: {}", e);
            }
        }
    }

    info!("crop worker wrote {} crop(s)", crop_count);
    Ok(())
}
