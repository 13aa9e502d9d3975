use anyhow::Result;
use std::sync::Arc;

use crate::detect::Scene;
use crate::frame::Region;

use super::TextRecognizer;

/// Replays plate text from a `Scene`, matched on frame index and crop bounds.
pub struct ScriptedRecognizer {
    scene: Arc<Scene>,
    frame_width: u32,
    frame_height: u32,
}

impl ScriptedRecognizer {
    pub fn new(scene: Arc<Scene>, frame_width: u32, frame_height: u32) -> Self {
        Self {
            scene,
            frame_width,
            frame_height,
        }
    }
}

impl TextRecognizer for ScriptedRecognizer {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn recognize(&mut self, region: &Region<'_>) -> Result<Vec<String>> {
        Ok(self
            .scene
            .plate_fragments(
                region.frame_index(),
                region.bounds(),
                self.frame_width,
                self.frame_height,
            )
            .map(<[String]>::to_vec)
            .unwrap_or_default())
    }
}

/// Adapter turning a closure into a recognizer.
pub struct FnRecognizer<F> {
    f: F,
}

impl<F> FnRecognizer<F>
where
    F: FnMut(&Region<'_>) -> Result<Vec<String>> + Send,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> TextRecognizer for FnRecognizer<F>
where
    F: FnMut(&Region<'_>) -> Result<Vec<String>> + Send,
{
    fn name(&self) -> &'static str {
        "fn"
    }

    fn recognize(&mut self, region: &Region<'_>) -> Result<Vec<String>> {
        (self.f)(region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::scripted::{DEMO_HEIGHT, DEMO_WIDTH};
    use crate::frame::Frame;

    #[test]
    fn scripted_recognizer_reads_matching_crop_only() {
        let scene = Arc::new(Scene::demo());
        let mut recognizer = ScriptedRecognizer::new(scene.clone(), DEMO_WIDTH, DEMO_HEIGHT);
        let frame = Frame::blank(DEMO_WIDTH, DEMO_HEIGHT, 12, 1.2);
        let det = &scene.frame(12).unwrap().detections[1];

        let text = recognizer.recognize(&frame.crop(&det.bbox)).unwrap();
        assert_eq!(text, vec!["MH12AB1234"]);

        let elsewhere = crate::frame::BoundingBox::new(0.0, 0.0, 5.0, 5.0);
        assert!(recognizer.recognize(&frame.crop(&elsewhere)).unwrap().is_empty());
    }
}
