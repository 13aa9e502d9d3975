use serde::{Deserialize, Serialize};

use crate::frame::BoundingBox;
use crate::TrackId;

/// One tracked object in one frame, as reported by a tracker backend.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackedDetection {
    pub bbox: BoundingBox,
    /// Stable across frames while the tracker keeps the object.
    pub track_id: TrackId,
    /// Index into the backend's `LabelTable`.
    pub class_index: usize,
}

impl TrackedDetection {
    pub fn new(bbox: BoundingBox, track_id: TrackId, class_index: usize) -> Self {
        Self {
            bbox,
            track_id,
            class_index,
        }
    }
}
