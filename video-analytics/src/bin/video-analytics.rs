use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use video_analytics::pipeline::{AnalyticsPipeline, PipelineConfig};
use video_analytics::ports::{DetectParams, NoopDetector, SyntheticSource};

#[derive(Debug, Parser)]
#[command(author, version, about = "analytics pipeline: detect, analyze motion, publish frames")]
struct AnalyticsArgs {
    /// Name of the shared frame slot.
    #[arg(long, default_value = frame_ipc::DEFAULT_SLOT_NAME)]
    slot_name: String,

    /// Frame width of the synthetic source.
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// Frame height of the synthetic source.
    #[arg(long, default_value_t = 480)]
    height: u32,

    /// Frame rate of the synthetic source.
    #[arg(long, default_value_t = 15.0)]
    fps: f64,

    /// Stop after this many frames (0 = run until interrupted).
    #[arg(long, default_value_t = 0)]
    max_frames: u64,

    /// Disable motion detection.
    #[arg(long)]
    no_motion: bool,

    /// Detector confidence threshold.
    #[arg(long, default_value_t = 0.5)]
    confidence: f32,

    /// Directory for manually triggered crops.
    #[arg(long, default_value = "manual_crops")]
    manual_crop_dir: PathBuf,
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    video_analytics::analytics_start();
    let args = AnalyticsArgs::parse();

    let config = PipelineConfig {
        slot_name: args.slot_name.clone(),
        enable_motion: !args.no_motion,
        detect_params: DetectParams {
            confidence_threshold: args.confidence,
            ..Default::default()
        },
        manual_crop_dir: args.manual_crop_dir.clone(),
        ..Default::default()
    };

    let max_frames = (args.max_frames > 0).then_some(args.max_frames);
    let source = SyntheticSource::new(args.width, args.height, args.fps, max_frames);

    // The manual-crop trigger is surfaced by an out-of-band collaborator
    // (e.g. the preview window); the channel stays open but silent here.
    let (_manual_tx, manual_rx) = tokio::sync::mpsc::channel::<()>(1);

    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    ctrlc::set_handler(move || {
        info!("got termination signal, shutting down");
        let _ = shutdown_tx.blocking_send(());
    })?;

    let pipeline = AnalyticsPipeline::new(
        Box::new(source),
        Box::new(NoopDetector),
        None,
        config,
    );
    pipeline.run(manual_rx, shutdown_rx).await
}
