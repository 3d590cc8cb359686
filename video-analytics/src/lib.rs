//! Video analytics for the director platform.
//!
//! Two cooperating processes share one frame slot: the pipeline
//! ([pipeline::AnalyticsPipeline]) pulls frames from a [ports::FrameSource],
//! runs detection and motion analysis and publishes the raw frame plus
//! detections; the crop worker ([crop_worker::run_crop_worker]) attaches to
//! the same slot, tracks objects across frames and writes one crop per
//! newly appearing object.

pub mod crop_worker;
pub mod draw;
pub mod fps;
pub mod pipeline;
pub mod ports;

/// Default `RUST_LOG` plus subscriber installation for the analytics
/// binaries.
pub fn analytics_start() {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var(
            "RUST_LOG",
            "video_analytics=info,frame_ipc=info,object_cropper=info,object_tracker=info,motion_detector=info,warn",
        );
    }
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}
