//! Scripted scene backend.
//!
//! A `Scene` lists, per frame index, the tracked boxes a real detector would
//! have produced together with the text visible on each vehicle's plate. The
//! tracker half replays the boxes; `ocr::ScriptedRecognizer` replays the text.
//! Scenes load from JSON so the daemon can be exercised without a model.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::detect::backend::TrackerBackend;
use crate::detect::result::TrackedDetection;
use crate::frame::{BoundingBox, Frame, PixelRect};
use crate::TrackId;

pub const DEMO_WIDTH: u32 = 640;
pub const DEMO_HEIGHT: u32 = 480;
pub const DEMO_FPS: u32 = 10;
pub const DEMO_FRAMES: u64 = 60;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Scene {
    #[serde(default)]
    pub frames: Vec<SceneFrame>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SceneFrame {
    #[serde(default)]
    pub detections: Vec<SceneDetection>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SceneDetection {
    pub bbox: BoundingBox,
    pub track_id: TrackId,
    #[serde(default)]
    pub class_index: usize,
    /// Text fragments a recognizer would read off this crop, in reading order.
    #[serde(default)]
    pub plate: Vec<String>,
}

impl Scene {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read scene file {}: {}", path.display(), e))?;
        let scene = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid scene file {}: {}", path.display(), e))?;
        Ok(scene)
    }

    pub fn frame(&self, index: u64) -> Option<&SceneFrame> {
        usize::try_from(index).ok().and_then(|i| self.frames.get(i))
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Plate fragments for the detection whose crop matches `bounds` in frame `index`.
    pub fn plate_fragments(
        &self,
        index: u64,
        bounds: PixelRect,
        width: u32,
        height: u32,
    ) -> Option<&[String]> {
        self.frame(index)?
            .detections
            .iter()
            .find(|det| PixelRect::clamp(&det.bbox, width, height) == bounds)
            .map(|det| det.plate.as_slice())
    }

    /// Three vehicles driving down a 640x480 frame at 10 fps.
    ///
    /// - track 1, car, 1 px/frame (36 km/h at 1 m/px), plate readable from frame 5
    /// - track 2, car, 3 px/frame (108 km/h), plate readable from frame 10
    /// - track 3, truck, 2 px/frame (72 km/h), plate never readable
    pub fn demo() -> Self {
        let vehicles: [(TrackId, usize, f32, f32, u64, &[&str]); 3] = [
            (1, 0, 80.0, 1.0, 5, &["KA01", "AB 1234"]),
            (2, 0, 280.0, 3.0, 10, &["MH12AB1234"]),
            (3, 3, 460.0, 2.0, u64::MAX, &[]),
        ];
        let frames = (0..DEMO_FRAMES)
            .map(|i| SceneFrame {
                detections: vehicles
                    .iter()
                    .map(|&(track_id, class_index, x, step, readable_from, plate)| {
                        let y = 40.0 + step * i as f32;
                        SceneDetection {
                            bbox: BoundingBox::new(x, y, x + 80.0, y + 50.0),
                            track_id,
                            class_index,
                            plate: if i >= readable_from {
                                plate.iter().map(|s| s.to_string()).collect()
                            } else {
                                Vec::new()
                            },
                        }
                    })
                    .collect(),
            })
            .collect();
        Self { frames }
    }
}

/// Replays scene boxes keyed by frame index.
pub struct ScriptedTracker {
    scene: Arc<Scene>,
}

impl ScriptedTracker {
    pub fn new(scene: Arc<Scene>) -> Self {
        Self { scene }
    }
}

impl TrackerBackend for ScriptedTracker {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn track(&mut self, frame: &Frame) -> Result<Vec<TrackedDetection>> {
        let Some(scene_frame) = self.scene.frame(frame.index()) else {
            return Ok(Vec::new());
        };
        Ok(scene_frame
            .detections
            .iter()
            .map(|det| TrackedDetection::new(det.bbox, det.track_id, det.class_index))
            .collect())
    }
}
