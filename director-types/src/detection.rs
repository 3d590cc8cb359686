use serde::{Deserialize, Serialize};

use crate::DirectorTypesError;

/// The 80 COCO class names in model output order.
pub const COCO_CLASS_NAMES: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

/// One detected object in pixel coordinates.
///
/// Invariant: `x2 > x1` and `y2 > y1`.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct Detection {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
    pub class_id: u16,
    pub confidence: f32,
}

impl Detection {
    pub fn new(
        x1: u32,
        y1: u32,
        x2: u32,
        y2: u32,
        class_id: u16,
        confidence: f32,
    ) -> Result<Self, DirectorTypesError> {
        if x2 <= x1 || y2 <= y1 {
            return Err(DirectorTypesError::DegenerateBoundingBox { x1, y1, x2, y2 });
        }
        Ok(Detection {
            x1,
            y1,
            x2,
            y2,
            class_id,
            confidence,
        })
    }

    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.x1 + self.x2) as f64 / 2.0,
            (self.y1 + self.y2) as f64 / 2.0,
        )
    }

    /// COCO class name, or `class_{id}` for ids outside the table.
    pub fn class_name(&self) -> String {
        match COCO_CLASS_NAMES.get(self.class_id as usize) {
            Some(name) => name.to_string(),
            None => format!("class_{}", self.class_id),
        }
    }

    /// Intersection over union with another box. Returns 0.0 for disjoint
    /// boxes.
    pub fn iou(&self, other: &Detection) -> f64 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) as f64 * (y2 - y1) as f64;
        let union = self.area() as f64 + other.area() as f64 - intersection;
        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}
