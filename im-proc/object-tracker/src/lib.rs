//! Greedy IoU-based multi-object tracking.
//!
//! Each update first evicts tracks that have not been seen within the
//! timeout, then greedily matches incoming detections (in input order)
//! against unmatched tracks of the same class by maximum IoU. A detection
//! with no acceptable match starts a new track with a monotonically
//! increasing id. The `is_new` bit on each result drives the
//! first-appearance crop rule downstream.

use std::collections::BTreeMap;

use tracing::debug;

use director_types::Detection;

pub const DEFAULT_IOU_THRESHOLD: f64 = 0.3;
pub const DEFAULT_TIMEOUT_SEC: f64 = 2.0;

/// One tracked object and its bookkeeping.
#[derive(Debug, Clone)]
pub struct TrackedObject {
    pub track_id: u32,
    pub detection: Detection,
    pub first_seen: f64,
    pub last_seen: f64,
    /// Whether the first-appearance crop for this track has been written.
    pub cropped: bool,
}

/// One matched (or newly created) track for a detection of the current
/// frame.
#[derive(Debug, Clone, Copy)]
pub struct TrackUpdate {
    pub detection: Detection,
    pub track_id: u32,
    pub is_new: bool,
}

pub struct ObjectTracker {
    iou_threshold: f64,
    timeout: f64,
    tracked: BTreeMap<u32, TrackedObject>,
    next_track_id: u32,
}

impl ObjectTracker {
    pub fn new(iou_threshold: f64, timeout: f64) -> Self {
        ObjectTracker {
            iou_threshold,
            timeout,
            tracked: BTreeMap::new(),
            next_track_id: 0,
        }
    }

    /// Update the tracked set with the detections of one frame taken at
    /// `now` (seconds since epoch). Results are in detection input order.
    pub fn update(&mut self, detections: &[Detection], now: f64) -> Vec<TrackUpdate> {
        // Evict before matching so a long-gone object never captures a new
        // detection.
        let expired: Vec<u32> = self
            .tracked
            .iter()
            .filter(|(_, obj)| now - obj.last_seen > self.timeout)
            .map(|(id, _)| *id)
            .collect();
        for track_id in expired {
            debug!("track #{} timed out", track_id);
            self.tracked.remove(&track_id);
        }

        let mut matched: Vec<u32> = Vec::new();
        let mut results = Vec::with_capacity(detections.len());

        for detection in detections {
            let mut best: Option<(u32, f64)> = None;
            // BTreeMap iteration is id order, which is insertion order since
            // ids increase monotonically; the first track reaching the
            // maximum IoU wins a tie.
            for (track_id, obj) in &self.tracked {
                if matched.contains(track_id) {
                    continue;
                }
                if obj.detection.class_id != detection.class_id {
                    continue;
                }
                let iou = detection.iou(&obj.detection);
                if iou > self.iou_threshold && best.map_or(true, |(_, b)| iou > b) {
                    best = Some((*track_id, iou));
                }
            }

            match best {
                Some((track_id, _)) => {
                    let obj = self
                        .tracked
                        .get_mut(&track_id)
                        .expect("matched track exists");
                    obj.detection = *detection;
                    obj.last_seen = now;
                    matched.push(track_id);
                    results.push(TrackUpdate {
                        detection: *detection,
                        track_id,
                        is_new: false,
                    });
                }
                None => {
                    let track_id = self.next_track_id;
                    self.next_track_id += 1;
                    self.tracked.insert(
                        track_id,
                        TrackedObject {
                            track_id,
                            detection: *detection,
                            first_seen: now,
                            last_seen: now,
                            cropped: false,
                        },
                    );
                    matched.push(track_id);
                    debug!(
                        "new track #{}: {}",
                        track_id,
                        detection.class_name()
                    );
                    results.push(TrackUpdate {
                        detection: *detection,
                        track_id,
                        is_new: true,
                    });
                }
            }
        }

        results
    }

    pub fn get(&self, track_id: u32) -> Option<&TrackedObject> {
        self.tracked.get(&track_id)
    }

    /// Record that the first-appearance crop for this track was written.
    pub fn mark_cropped(&mut self, track_id: u32) {
        if let Some(obj) = self.tracked.get_mut(&track_id) {
            obj.cropped = true;
        }
    }

    pub fn tracked_objects(&self) -> impl Iterator<Item = &TrackedObject> {
        self.tracked.values()
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    /// Drop all tracks and restart id allocation.
    pub fn reset(&mut self) {
        self.tracked.clear();
        self.next_track_id = 0;
    }
}

impl Default for ObjectTracker {
    fn default() -> Self {
        Self::new(DEFAULT_IOU_THRESHOLD, DEFAULT_TIMEOUT_SEC)
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
            confidence: 0.9,
        }
    }

    #[test]
    fn identity_preserved_across_overlapping_frames() {
        let mut tracker = ObjectTracker::default();

        let r1 = tracker.update(&[det(10, 10, 50, 50, 0)], 0.0);
        assert_eq!(r1.len(), 1);
        assert!(r1[0].is_new);
        assert_eq!(r1[0].track_id, 0);

        let r2 = tracker.update(&[det(12, 12, 52, 52, 0)], 0.1);
        assert!(!r2[0].is_new);
        assert_eq!(r2[0].track_id, 0);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn timeout_creates_a_fresh_track() {
        let mut tracker = ObjectTracker::default();

        tracker.update(&[det(10, 10, 50, 50, 0)], 0.0);
        // Same box three seconds later: the old track is evicted first.
        let r = tracker.update(&[det(10, 10, 50, 50, 0)], 3.0);
        assert!(r[0].is_new);
        assert_eq!(r[0].track_id, 1);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn no_stale_entries_after_update() {
        let mut tracker = ObjectTracker::default();
        tracker.update(&[det(10, 10, 50, 50, 0)], 0.0);
        tracker.update(&[det(200, 200, 240, 240, 0)], 5.0);
        let now = 5.0;
        assert!(tracker
            .tracked_objects()
            .all(|obj| now - obj.last_seen <= DEFAULT_TIMEOUT_SEC));
    }

    #[test]
    fn class_mismatch_never_matches() {
        let mut tracker = ObjectTracker::default();
        tracker.update(&[det(10, 10, 50, 50, 0)], 0.0);
        let r = tracker.update(&[det(10, 10, 50, 50, 2)], 0.1);
        assert!(r[0].is_new);
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn best_iou_wins() {
        let mut tracker = ObjectTracker::default();
        // Two tracks of the same class.
        tracker.update(&[det(0, 0, 40, 40, 0), det(100, 0, 140, 40, 0)], 0.0);

        // A detection overlapping both, but much more with track 1.
        let r = tracker.update(&[det(95, 0, 135, 40, 0)], 0.1);
        assert!(!r[0].is_new);
        assert_eq!(r[0].track_id, 1);
    }

    #[test]
    fn each_track_matched_at_most_once_per_cycle() {
        let mut tracker = ObjectTracker::default();
        tracker.update(&[det(0, 0, 40, 40, 0)], 0.0);

        // Two nearly identical detections: the first takes the track, the
        // second becomes a new one.
        let r = tracker.update(&[det(1, 1, 41, 41, 0), det(2, 2, 42, 42, 0)], 0.1);
        assert!(!r[0].is_new);
        assert!(r[1].is_new);
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn cropped_flag_bookkeeping() {
        let mut tracker = ObjectTracker::default();
        let r = tracker.update(&[det(10, 10, 50, 50, 0)], 0.0);
        let id = r[0].track_id;
        assert!(!tracker.get(id).unwrap().cropped);
        tracker.mark_cropped(id);
        assert!(tracker.get(id).unwrap().cropped);
    }

    #[test]
    fn reset_restarts_id_allocation() {
        let mut tracker = ObjectTracker::default();
        tracker.update(&[det(10, 10, 50, 50, 0)], 0.0);
        tracker.reset();
        assert!(tracker.is_empty());
        let r = tracker.update(&[det(10, 10, 50, 50, 0)], 1.0);
        assert_eq!(r[0].track_id, 0);
    }
}
