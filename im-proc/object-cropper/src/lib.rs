//! Crop extraction for newly tracked objects.
//!
//! Crops are padded, clamped to the frame, optionally stamped with an
//! `"{index}-{class}"` label on a black band, and written as JPEG or PNG
//! under `output_dir` with the naming scheme
//! `{class_name}_{YYYYMMDD_HHMMSS}_{sequence:06}_{track_id:02}.{ext}`.
//! Manual crops use `manual_{class_name}_{YYYYMMDD_HHMMSS}_{counter:04}.jpg`.
//!
//! Two mutually exclusive retention policies bound the output directory:
//! keep only the newest file per class, or delete the oldest files beyond a
//! maximum count.

use std::path::{Path, PathBuf};

use image::RgbImage;
use rusttype::Font;
use tracing::{debug, info, warn};

use director_types::{timestamp, BgrFrame, Detection};

mod draw;

pub type Result<T> = std::result::Result<T, CropperError>;

#[derive(thiserror::Error, Debug)]
pub enum CropperError {
    #[error("{source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("{0}")]
    Image(#[from] image::ImageError),
    #[error("jpeg quality {0} out of range (must be 1-100)")]
    QualityOutOfRange(u8),
    #[error("keep_latest_only and max_images are mutually exclusive retention policies")]
    ConflictingRetention,
    #[error("unknown crop format \"{0}\"")]
    UnknownFormat(String),
    #[error("could not load the label font")]
    FontError,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum CropFormat {
    Jpeg,
    Png,
}

impl CropFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            CropFormat::Jpeg => "jpg",
            CropFormat::Png => "png",
        }
    }
}

impl std::str::FromStr for CropFormat {
    type Err = CropperError;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(CropFormat::Jpeg),
            "png" => Ok(CropFormat::Png),
            other => Err(CropperError::UnknownFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CropperConfig {
    pub output_dir: PathBuf,
    /// JPEG quality, 1-100.
    pub quality: u8,
    pub format: CropFormat,
    /// Padding in pixels added around the bounding box before clamping.
    pub padding: u32,
    /// Detections narrower or shorter than this are skipped.
    pub min_size: u32,
    /// Restrict crops to these class names; `None` crops every class.
    pub target_classes: Option<Vec<String>>,
    /// Retain only the newest image per class.
    pub keep_latest_only: bool,
    /// Retain at most this many images (0 = unlimited).
    pub max_images: usize,
    /// Stamp the `"{index}-{class}"` label onto each crop.
    pub draw_label: bool,
}

impl Default for CropperConfig {
    fn default() -> Self {
        CropperConfig {
            output_dir: PathBuf::from("cropped_images"),
            quality: 90,
            format: CropFormat::Jpeg,
            padding: 10,
            min_size: 32,
            target_classes: None,
            keep_latest_only: false,
            max_images: 100,
            draw_label: false,
        }
    }
}

impl CropperConfig {
    pub fn validate(&self) -> Result<()> {
        if self.quality == 0 || self.quality > 100 {
            return Err(CropperError::QualityOutOfRange(self.quality));
        }
        if self.keep_latest_only && self.max_images > 0 {
            return Err(CropperError::ConflictingRetention);
        }
        Ok(())
    }
}

pub struct ObjectCropper {
    config: CropperConfig,
    font: Font<'static>,
}

impl ObjectCropper {
    pub fn new(config: CropperConfig) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.output_dir)?;
        info!("crop output directory: {}", config.output_dir.display());
        if let Some(classes) = &config.target_classes {
            info!("crop target classes: {}", classes.join(", "));
        }
        let font = Font::try_from_bytes(ttf_firacode::REGULAR).ok_or(CropperError::FontError)?;
        Ok(ObjectCropper { config, font })
    }

    pub fn config(&self) -> &CropperConfig {
        &self.config
    }

    /// Padded bounding box clamped to the frame, without any filtering.
    fn padded_bounds(&self, frame: &BgrFrame, det: &Detection) -> (u32, u32, u32, u32) {
        let pad = self.config.padding;
        let x1 = det.x1.saturating_sub(pad);
        let y1 = det.y1.saturating_sub(pad);
        let x2 = (det.x2 + pad).min(frame.width);
        let y2 = (det.y2 + pad).min(frame.height);
        (x1, y1, x2, y2)
    }

    /// Crop region for an automatic (first-appearance) crop, or `None` when
    /// the detection fails the class or size filters.
    pub fn crop_bounds(&self, frame: &BgrFrame, det: &Detection) -> Option<(u32, u32, u32, u32)> {
        if let Some(classes) = &self.config.target_classes {
            if !classes.iter().any(|c| *c == det.class_name()) {
                return None;
            }
        }
        if det.width() < self.config.min_size || det.height() < self.config.min_size {
            return None;
        }
        Some(self.padded_bounds(frame, det))
    }

    fn extract_rgb(frame: &BgrFrame, bounds: (u32, u32, u32, u32)) -> RgbImage {
        let (x1, y1, x2, y2) = bounds;
        let (w, h) = (x2 - x1, y2 - y1);
        let mut img = RgbImage::new(w, h);
        for y in 0..h {
            for x in 0..w {
                let [b, g, r] = frame.pixel(x1 + x, y1 + y);
                img.put_pixel(x, y, image::Rgb([r, g, b]));
            }
        }
        img
    }

    fn encode_to(&self, img: &RgbImage, path: &Path) -> Result<()> {
        match self.config.format {
            CropFormat::Jpeg => {
                let mut buf = Vec::new();
                let mut encoder =
                    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, self.config.quality);
                encoder.encode(
                    img.as_raw(),
                    img.width(),
                    img.height(),
                    image::ExtendedColorType::Rgb8,
                )?;
                std::fs::write(path, &buf)?;
            }
            CropFormat::Png => {
                img.save_with_format(path, image::ImageFormat::Png)?;
            }
        }
        Ok(())
    }

    fn label_image(&self, img: &mut RgbImage, index: u32, class_name: &str) {
        let text = format!("{}-{}", index, class_name);
        let font_scale = 0.4_f32.max(img.width().min(img.height()) as f32 / 200.0);
        draw::label_top_left(img, &self.font, &text, font_scale);
    }

    /// Write the first-appearance crop for a tracked detection. Returns the
    /// written path, or `None` when the detection was filtered out.
    pub fn save_crop(
        &self,
        frame: &BgrFrame,
        det: &Detection,
        ts: f64,
        sequence: u64,
        track_id: u32,
    ) -> Result<Option<PathBuf>> {
        let bounds = match self.crop_bounds(frame, det) {
            Some(bounds) => bounds,
            None => return Ok(None),
        };
        let mut img = Self::extract_rgb(frame, bounds);
        if self.config.draw_label {
            self.label_image(&mut img, track_id, &det.class_name());
        }

        let dt = timestamp::f64_to_datetime(ts);
        let class_name = det.class_name().replace(' ', "_");
        let filename = format!(
            "{}_{}_{:06}_{:02}.{}",
            class_name,
            dt.format("%Y%m%d_%H%M%S"),
            sequence,
            track_id,
            self.config.format.extension()
        );
        let path = self.config.output_dir.join(filename);
        self.encode_to(&img, &path)?;
        debug!(
            "crop written: {} ({}x{})",
            path.display(),
            img.width(),
            img.height()
        );
        Ok(Some(path))
    }

    /// Write a manually triggered crop of a current detection into
    /// `manual_dir`. Manual crops bypass the class and size filters and are
    /// always JPEG.
    pub fn save_manual_crop(
        &self,
        frame: &BgrFrame,
        det: &Detection,
        ts: f64,
        counter: u32,
        manual_dir: &Path,
    ) -> Result<PathBuf> {
        std::fs::create_dir_all(manual_dir)?;
        let bounds = self.padded_bounds(frame, det);
        let mut img = Self::extract_rgb(frame, bounds);
        if self.config.draw_label {
            self.label_image(&mut img, counter, &det.class_name());
        }

        let dt = timestamp::f64_to_datetime(ts);
        let class_name = det.class_name().replace(' ', "_");
        let filename = format!(
            "manual_{}_{}_{:04}.jpg",
            class_name,
            dt.format("%Y%m%d_%H%M%S"),
            counter
        );
        let path = manual_dir.join(filename);

        let mut buf = Vec::new();
        let mut encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, self.config.quality);
        encoder.encode(
            img.as_raw(),
            img.width(),
            img.height(),
            image::ExtendedColorType::Rgb8,
        )?;
        std::fs::write(&path, &buf)?;
        info!("manual crop written: {}", path.display());
        Ok(path)
    }

    fn list_output_images(&self) -> Result<Vec<PathBuf>> {
        let ext = self.config.format.extension();
        let mut images: Vec<PathBuf> = std::fs::read_dir(&self.config.output_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(ext))
            .collect();
        // Lexicographic order coincides with timestamp order for this
        // naming scheme.
        images.sort();
        Ok(images)
    }

    /// Enforce the configured retention policy after `saved` files were
    /// written.
    pub fn apply_retention(&self, saved: &[PathBuf]) -> Result<()> {
        if saved.is_empty() {
            return Ok(());
        }
        if self.config.keep_latest_only {
            self.cleanup_except_latest_per_class(saved)?;
        } else if self.config.max_images > 0 {
            self.cleanup_old_images()?;
        }
        Ok(())
    }

    /// For each class that just got a new image, delete its older peers.
    fn cleanup_except_latest_per_class(&self, saved: &[PathBuf]) -> Result<()> {
        for latest in saved {
            let latest_name = match latest.file_name().and_then(|n| n.to_str()) {
                Some(name) => name,
                None => continue,
            };
            let class_prefix = match class_prefix_of(latest_name) {
                Some(prefix) => prefix,
                None => continue,
            };
            for img in self.list_output_images()? {
                if img == *latest {
                    continue;
                }
                let name = match img.file_name().and_then(|n| n.to_str()) {
                    Some(name) => name,
                    None => continue,
                };
                if class_prefix_of(name) == Some(class_prefix.clone()) {
                    if let Err(e) = std::fs::remove_file(&img) {
                        warn!("could not delete {}: {}", img.display(), e);
                    }
                }
            }
        }
        Ok(())
    }

    /// Delete the oldest images until at most `max_images` remain.
    fn cleanup_old_images(&self) -> Result<()> {
        let mut images = self.list_output_images()?;
        while images.len() > self.config.max_images {
            let oldest = images.remove(0);
            match std::fs::remove_file(&oldest) {
                Ok(()) => debug!("retention removed {}", oldest.display()),
                Err(e) => warn!("could not delete {}: {}", oldest.display(), e),
            }
        }
        Ok(())
    }
}

/// Class portion of a crop file name: everything before the trailing
/// `_{YYYYMMDD}_{HHMMSS}_{seq}_{track}` block.
fn class_prefix_of(file_name: &str) -> Option<String> {
    let stem = file_name.rsplit_once('.').map(|(s, _)| s).unwrap_or(file_name);
    let parts: Vec<&str> = stem.split('_').collect();
    if parts.len() < 5 {
        return None;
    }
    Some(parts[..parts.len() - 4].join("_"))
}
