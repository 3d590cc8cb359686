//! Shared-memory transport for the most recent video frame and its
//! detections.
//!
//! One process-wide named slot holds exactly one publication at a time:
//! a small metadata block, a bounded detection array and the raw BGR frame
//! bytes, all little-endian at fixed offsets. The strictly monotonic
//! sequence number is the only consistency mechanism; readers that observe
//! an unchanged sequence yield nothing, and a slow reader simply misses
//! frames. There is no cross-process lock.
//!
//! Layout:
//!
//! | offset | size | field |
//! |--------|------|-------|
//! | 0      | 4    | width (u32) |
//! | 4      | 4    | height (u32) |
//! | 8      | 4    | channels (u32) |
//! | 12     | 8    | timestamp (f64, seconds since epoch) |
//! | 20     | 8    | sequence (u64, starts at 1) |
//! | 28     | 4    | num_detections (u32) |
//! | 32     | 2400 | detection array, 24 bytes each |
//! | 2432   | ...  | frame bytes, row-major BGR |

use std::io::Cursor;
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use memmap2::{Mmap, MmapMut};
use tracing::{debug, info, warn};

use director_types::{BgrFrame, Detection};

pub const METADATA_SIZE: usize = 32;
pub const DETECTION_SIZE: usize = 24;
pub const MAX_DETECTIONS: usize = 100;
pub const MAX_FRAME_SIZE: usize = 1920 * 1080 * 3;
pub const FRAME_OFFSET: usize = METADATA_SIZE + DETECTION_SIZE * MAX_DETECTIONS;
pub const SLOT_SIZE: usize = FRAME_OFFSET + MAX_FRAME_SIZE;

pub const DEFAULT_SLOT_NAME: &str = "webrtc_motion_frame";
pub const DEFAULT_RETRY_INTERVAL: std::time::Duration = std::time::Duration::from_secs(1);

/// Where named slots live. POSIX shared memory objects appear here, so a
/// publisher in any language using `shm_open` with the same name
/// interoperates.
#[cfg(target_os = "linux")]
pub const SLOT_DIR: &str = "/dev/shm";
#[cfg(not(target_os = "linux"))]
pub const SLOT_DIR: &str = "/tmp";

pub type Result<T> = std::result::Result<T, FrameIpcError>;

#[derive(thiserror::Error, Debug)]
pub enum FrameIpcError {
    #[error("{source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("slot \"{path}\" has size {got}, expected {expected}")]
    SlotSizeMismatch {
        path: String,
        expected: usize,
        got: usize,
    },
}

fn slot_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(name)
}

/// One publication copied out of the slot.
#[derive(Debug, Clone)]
pub struct FrameSnapshot {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub timestamp: f64,
    pub sequence: u64,
    pub detections: Vec<Detection>,
    pub data: Vec<u8>,
}

impl FrameSnapshot {
    /// Reinterpret the copied bytes as an owned BGR frame. `None` unless the
    /// publication carried three channels.
    pub fn into_bgr_frame(self) -> Option<(BgrFrame, Vec<Detection>, f64, u64)> {
        if self.channels != BgrFrame::CHANNELS {
            return None;
        }
        let frame = BgrFrame::from_data(self.width, self.height, self.data).ok()?;
        Some((frame, self.detections, self.timestamp, self.sequence))
    }
}

/// Single writer of a named slot. Creating the publisher replaces any stale
/// slot of the same name; dropping it unlinks the slot it created.
pub struct FramePublisher {
    mmap: MmapMut,
    path: PathBuf,
    sequence: u64,
    creator: bool,
}

impl FramePublisher {
    /// Create (or replace) the named slot in the default slot directory.
    pub fn create(name: &str) -> Result<Self> {
        Self::create_in(Path::new(SLOT_DIR), name)
    }

    pub fn create_in(dir: &Path, name: &str) -> Result<Self> {
        let path = slot_path(dir, name);

        // A slot left behind by a crashed publisher is stale; remove it so
        // the new mapping starts zeroed.
        match std::fs::remove_file(&path) {
            Ok(()) => {
                warn!("removed stale frame slot {}", path.display());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        file.set_len(SLOT_SIZE as u64)?;
        let mmap = unsafe { MmapMut::map_mut(&file)? };

        info!(
            "created frame slot {} ({} bytes)",
            path.display(),
            SLOT_SIZE
        );

        Ok(FramePublisher {
            mmap,
            path,
            sequence: 0,
            creator: true,
        })
    }

    /// Write one publication: metadata (with the next sequence number), the
    /// first `MAX_DETECTIONS` detections, and the frame bytes.
    ///
    /// Returns `Ok(false)` and leaves the slot untouched when the frame does
    /// not fit the slot.
    pub fn publish(
        &mut self,
        frame: &BgrFrame,
        detections: &[Detection],
        timestamp: f64,
    ) -> Result<bool> {
        let frame_size = frame.data.len();
        if frame_size > MAX_FRAME_SIZE {
            warn!(
                "dropping {}x{} frame: {} bytes exceeds slot capacity {}",
                frame.width, frame.height, frame_size, MAX_FRAME_SIZE
            );
            return Ok(false);
        }

        self.sequence += 1;

        let n_dets = detections.len().min(MAX_DETECTIONS);

        {
            let mut cursor = Cursor::new(&mut self.mmap[..METADATA_SIZE]);
            cursor.write_u32::<LittleEndian>(frame.width)?;
            cursor.write_u32::<LittleEndian>(frame.height)?;
            cursor.write_u32::<LittleEndian>(BgrFrame::CHANNELS)?;
            cursor.write_f64::<LittleEndian>(timestamp)?;
            cursor.write_u64::<LittleEndian>(self.sequence)?;
            cursor.write_u32::<LittleEndian>(n_dets as u32)?;
        }

        {
            let det_buf = &mut self.mmap[METADATA_SIZE..FRAME_OFFSET];
            let mut cursor = Cursor::new(det_buf);
            for det in &detections[..n_dets] {
                cursor.write_u32::<LittleEndian>(det.x1)?;
                cursor.write_u32::<LittleEndian>(det.y1)?;
                cursor.write_u32::<LittleEndian>(det.x2)?;
                cursor.write_u32::<LittleEndian>(det.y2)?;
                cursor.write_u32::<LittleEndian>(det.class_id as u32)?;
                cursor.write_f32::<LittleEndian>(det.confidence)?;
            }
        }

        self.mmap[FRAME_OFFSET..FRAME_OFFSET + frame_size].copy_from_slice(&frame.data);

        debug!(
            "published sequence {} ({}x{}, {} detections)",
            self.sequence, frame.width, frame.height, n_dets
        );
        Ok(true)
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl Drop for FramePublisher {
    fn drop(&mut self) {
        if self.creator {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("could not unlink frame slot {}: {}", self.path.display(), e);
                }
            }
        }
    }
}

/// Reader of a named slot. Multiple subscribers can read concurrently; each
/// tracks the last sequence it has seen.
pub struct FrameSubscriber {
    mmap: Mmap,
    path: PathBuf,
    last_sequence: u64,
}

impl FrameSubscriber {
    /// Open the named slot, retrying forever at `retry_interval` until it
    /// exists (the publisher may not have started yet).
    pub async fn attach(name: &str, retry_interval: std::time::Duration) -> Self {
        Self::attach_in(Path::new(SLOT_DIR), name, retry_interval).await
    }

    pub async fn attach_in(dir: &Path, name: &str, retry_interval: std::time::Duration) -> Self {
        loop {
            match Self::try_attach_in(dir, name) {
                Ok(sub) => {
                    info!("attached to frame slot {}", sub.path.display());
                    return sub;
                }
                Err(e) => {
                    info!(
                        "frame slot \"{}\" not available ({}); retrying in {:?}",
                        name, e, retry_interval
                    );
                    tokio::time::sleep(retry_interval).await;
                }
            }
        }
    }

    /// Attempt a single attach without retrying.
    pub fn try_attach_in(dir: &Path, name: &str) -> Result<Self> {
        let path = slot_path(dir, name);
        let file = std::fs::File::open(&path)?;
        let len = file.metadata()?.len() as usize;
        if len < SLOT_SIZE {
            return Err(FrameIpcError::SlotSizeMismatch {
                path: path.display().to_string(),
                expected: SLOT_SIZE,
                got: len,
            });
        }
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(FrameSubscriber {
            mmap,
            path,
            last_sequence: 0,
        })
    }

    /// Copy out the current publication, or `None` when the sequence has not
    /// advanced since the previous read or the metadata fails validation.
    pub fn read(&mut self) -> Option<FrameSnapshot> {
        let mut cursor = Cursor::new(&self.mmap[..METADATA_SIZE]);
        let width = cursor.read_u32::<LittleEndian>().ok()?;
        let height = cursor.read_u32::<LittleEndian>().ok()?;
        let channels = cursor.read_u32::<LittleEndian>().ok()?;
        let timestamp = cursor.read_f64::<LittleEndian>().ok()?;
        let sequence = cursor.read_u64::<LittleEndian>().ok()?;
        let num_detections = cursor.read_u32::<LittleEndian>().ok()?;

        if sequence == self.last_sequence {
            return None;
        }
        self.last_sequence = sequence;

        let frame_size = width as usize * height as usize * channels as usize;
        if frame_size == 0 || frame_size > MAX_FRAME_SIZE {
            warn!(
                "ignoring publication {}: invalid frame size {}x{}x{}",
                sequence, width, height, channels
            );
            return None;
        }

        let n_dets = (num_detections as usize).min(MAX_DETECTIONS);
        let mut detections = Vec::with_capacity(n_dets);
        let mut cursor = Cursor::new(&self.mmap[METADATA_SIZE..FRAME_OFFSET]);
        for _ in 0..n_dets {
            let x1 = cursor.read_u32::<LittleEndian>().ok()?;
            let y1 = cursor.read_u32::<LittleEndian>().ok()?;
            let x2 = cursor.read_u32::<LittleEndian>().ok()?;
            let y2 = cursor.read_u32::<LittleEndian>().ok()?;
            let class_id = cursor.read_u32::<LittleEndian>().ok()?;
            let confidence = cursor.read_f32::<LittleEndian>().ok()?;
            detections.push(Detection {
                x1,
                y1,
                x2,
                y2,
                class_id: class_id as u16,
                confidence,
            });
        }

        let data = self.mmap[FRAME_OFFSET..FRAME_OFFSET + frame_size].to_vec();

        Some(FrameSnapshot {
            width,
            height,
            channels,
            timestamp,
            sequence,
            detections,
            data,
        })
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x1: u32, y1: u32, x2: u32, y2: u32, class_id: u16) -> Detection {
        Detection {
            x1,
            y1,
            x2,
            y2,
            class_id,
            confidence: 0.75,
        }
    }

    #[test]
    fn layout_constants() {
        assert_eq!(FRAME_OFFSET, 2432);
        assert_eq!(SLOT_SIZE, 2432 + 6_220_800);
    }

    #[test]
    fn roundtrip_and_stale_read() {
        let dir = tempfile::tempdir().unwrap();
        let mut publisher = FramePublisher::create_in(dir.path(), "test_slot").unwrap();

        let mut frame = BgrFrame::new(320, 240);
        frame.set_pixel(10, 20, [1, 2, 3]);
        let dets = vec![det(10, 10, 50, 50, 0), det(60, 60, 90, 100, 2)];

        assert!(publisher.publish(&frame, &dets, 1000.5).unwrap());
        assert_eq!(publisher.sequence(), 1);

        let mut sub = FrameSubscriber::try_attach_in(dir.path(), "test_slot").unwrap();
        let snap = sub.read().expect("first read returns the publication");
        assert_eq!(snap.sequence, 1);
        assert_eq!(snap.timestamp, 1000.5);
        assert_eq!(snap.detections, dets);
        let (got, _, _, _) = snap.into_bgr_frame().unwrap();
        assert_eq!(got.data, frame.data);

        // Unchanged sequence yields nothing.
        assert!(sub.read().is_none());

        // A new publication is visible with a strictly larger sequence.
        assert!(publisher.publish(&frame, &[], 1001.0).unwrap());
        let snap = sub.read().unwrap();
        assert_eq!(snap.sequence, 2);
        assert!(snap.detections.is_empty());
    }

    #[test]
    fn detection_list_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let mut publisher = FramePublisher::create_in(dir.path(), "bounded").unwrap();

        let frame = BgrFrame::new(16, 16);
        let dets: Vec<Detection> = (0..150)
            .map(|i| det(i, i, i + 5, i + 5, (i % 80) as u16))
            .collect();
        assert!(publisher.publish(&frame, &dets, 0.5).unwrap());

        let mut sub = FrameSubscriber::try_attach_in(dir.path(), "bounded").unwrap();
        let snap = sub.read().unwrap();
        assert_eq!(snap.detections.len(), MAX_DETECTIONS);
        assert_eq!(snap.detections[..], dets[..MAX_DETECTIONS]);
    }

    #[test]
    fn oversized_frame_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let mut publisher = FramePublisher::create_in(dir.path(), "oversize").unwrap();

        let frame = BgrFrame::new(2048, 1080);
        assert!(!publisher.publish(&frame, &[], 0.0).unwrap());
        assert_eq!(publisher.sequence(), 0);

        let mut sub = FrameSubscriber::try_attach_in(dir.path(), "oversize").unwrap();
        assert!(sub.read().is_none());
    }

    #[test]
    fn stale_slot_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale");
        std::fs::write(&path, b"junk").unwrap();

        let publisher = FramePublisher::create_in(dir.path(), "stale").unwrap();
        assert_eq!(
            std::fs::metadata(&path).unwrap().len(),
            SLOT_SIZE as u64
        );
        drop(publisher);

        // The creator unlinks its slot on drop.
        assert!(!path.exists());
    }
}
