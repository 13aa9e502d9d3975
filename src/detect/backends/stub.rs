use anyhow::Result;

use crate::detect::backend::TrackerBackend;
use crate::detect::result::TrackedDetection;
use crate::frame::Frame;

/// Stub backend that never reports anything. Lets the pipeline run on sources
/// that have no model attached.
#[derive(Debug, Default)]
pub struct StubTracker {
    frames_seen: u64,
}

impl StubTracker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TrackerBackend for StubTracker {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn track(&mut self, _frame: &Frame) -> Result<Vec<TrackedDetection>> {
        if self.frames_seen == 0 {
            log::warn!("stub tracker attached: no vehicles will be detected");
        }
        self.frames_seen += 1;
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_tracker_reports_nothing() {
        let mut tracker = StubTracker::new();
        let frame = Frame::blank(8, 8, 0, 0.0);
        assert!(tracker.track(&frame).unwrap().is_empty());
        assert!(tracker.track(&frame).unwrap().is_empty());
    }
}
