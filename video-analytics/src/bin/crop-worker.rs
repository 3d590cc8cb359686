use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use object_cropper::{CropFormat, CropperConfig};
use video_analytics::crop_worker::{run_crop_worker, CropWorkerConfig};

#[derive(Debug, Parser)]
#[command(author, version, about = "writes a crop for every newly appearing tracked object")]
struct CropWorkerArgs {
    /// Name of the shared frame slot.
    #[arg(long, default_value = frame_ipc::DEFAULT_SLOT_NAME)]
    slot_name: String,

    /// Output directory for crops.
    #[arg(long, default_value = "cropped_images")]
    output_dir: PathBuf,

    /// Crop only these class names (repeatable); all classes when omitted.
    #[arg(long, num_args = 0..)]
    classes: Vec<String>,

    /// Padding in pixels around each bounding box.
    #[arg(long, default_value_t = 10)]
    padding: u32,

    /// Skip detections smaller than this in either dimension.
    #[arg(long, default_value_t = 32)]
    min_size: u32,

    /// JPEG quality (1-100).
    #[arg(long, default_value_t = 90)]
    quality: u8,

    /// Output format: jpeg or png.
    #[arg(long, default_value = "jpeg")]
    format: String,

    /// Keep only the newest image per class.
    #[arg(long)]
    keep_latest: bool,

    /// Keep at most this many images (0 = unlimited, default 100).
    #[arg(long)]
    max_images: Option<usize>,

    /// Stamp the track label onto each crop.
    #[arg(long)]
    label: bool,

    /// IoU threshold for matching a detection to an existing track.
    #[arg(long, default_value_t = object_tracker::DEFAULT_IOU_THRESHOLD)]
    iou_threshold: f64,

    /// Seconds after which an unseen track is evicted.
    #[arg(long, default_value_t = object_tracker::DEFAULT_TIMEOUT_SEC)]
    timeout: f64,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    video_analytics::analytics_start();
    let args = CropWorkerArgs::parse();

    let format: CropFormat = args.format.parse()?;
    let max_images = match (args.keep_latest, args.max_images) {
        (true, Some(n)) if n > 0 => {
            eyre::bail!("--keep-latest and --max-images are mutually exclusive")
        }
        (true, _) => 0,
        (false, Some(n)) => n,
        (false, None) => 100,
    };
    let config = CropWorkerConfig {
        slot_name: args.slot_name.clone(),
        iou_threshold: args.iou_threshold,
        object_timeout: args.timeout,
        cropper: CropperConfig {
            output_dir: args.output_dir.clone(),
            quality: args.quality,
            format,
            padding: args.padding,
            min_size: args.min_size,
            target_classes: (!args.classes.is_empty()).then(|| args.classes.clone()),
            keep_latest_only: args.keep_latest,
            max_images,
            draw_label: args.label,
        },
        ..Default::default()
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    ctrlc::set_handler(move || {
        info!("got termination signal, shutting down");
        let _ = shutdown_tx.blocking_send(());
    })?;

    run_crop_worker(config, shutdown_rx).await
}
