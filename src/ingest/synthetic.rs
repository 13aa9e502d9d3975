use anyhow::Result;
use chrono::Local;

use super::{FrameSource, SourceConfig};
use crate::frame::Frame;

/// Blank frames at a fixed rate. Pair with a scripted tracker for content.
pub struct SyntheticSource {
    config: SourceConfig,
    next_index: u64,
}

impl SyntheticSource {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            config,
            next_index: 0,
        }
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.next_index >= self.config.frames {
            return Ok(None);
        }
        let index = self.next_index;
        self.next_index += 1;
        let timestamp_s = index as f64 / self.config.fps as f64;
        Ok(Some(
            Frame::blank(self.config.width, self.config.height, index, timestamp_s)
                .with_captured_at(Local::now()),
        ))
    }

    fn total_frames(&self) -> Option<u64> {
        Some(self.config.frames)
    }

    fn describe(&self) -> String {
        format!(
            "{} ({}x{} @ {} fps, synthetic)",
            self.config.path, self.config.width, self.config.height, self.config.fps
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_configured_frame_count_with_stream_timestamps() {
        let mut source = SyntheticSource::new(SourceConfig {
            path: "stub://test".to_string(),
            width: 16,
            height: 8,
            fps: 5,
            frames: 3,
        });
        let mut stamps = Vec::new();
        while let Some(frame) = source.next_frame().unwrap() {
            assert_eq!((frame.width(), frame.height()), (16, 8));
            stamps.push((frame.index(), frame.timestamp_s()));
        }
        assert_eq!(stamps, vec![(0, 0.0), (1, 0.2), (2, 0.4)]);
        assert!(source.next_frame().unwrap().is_none());
    }
}
