use anyhow::Result;

use crate::detect::result::TrackedDetection;
use crate::frame::Frame;

/// Detector + tracker backend trait.
///
/// The pipeline holds one backend and calls `track` once per frame, in stream
/// order. Implementations own whatever association state they need to keep
/// track ids stable across frames.
pub trait TrackerBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Detect and associate objects in a frame.
    ///
    /// Detections are returned in the order the pipeline must process them.
    fn track(&mut self, frame: &Frame) -> Result<Vec<TrackedDetection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
