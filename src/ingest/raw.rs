use anyhow::{anyhow, Result};
use chrono::Local;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};

use super::{FrameSource, SourceConfig};
use crate::frame::{Frame, BYTES_PER_PIXEL};

/// Concatenated RGB24 frames from a local file.
///
/// A trailing partial frame is logged and treated as end of stream.
pub struct RawRgbFileSource {
    config: SourceConfig,
    reader: BufReader<File>,
    frame_len: usize,
    total: Option<u64>,
    next_index: u64,
}

impl RawRgbFileSource {
    pub fn open(config: SourceConfig) -> Result<Self> {
        let file = File::open(&config.path)
            .map_err(|e| anyhow!("failed to open source {}: {}", config.path, e))?;
        let frame_len = config.width as usize * config.height as usize * BYTES_PER_PIXEL;
        let total = file
            .metadata()
            .ok()
            .map(|meta| meta.len() / frame_len as u64);
        Ok(Self {
            config,
            reader: BufReader::new(file),
            frame_len,
            total,
            next_index: 0,
        })
    }
}

impl FrameSource for RawRgbFileSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let mut data = vec![0u8; self.frame_len];
        let mut filled = 0;
        while filled < self.frame_len {
            match self.reader.read(&mut data[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(anyhow!("read failed on {}: {}", self.config.path, e)),
            }
        }
        if filled == 0 {
            return Ok(None);
        }
        if filled < self.frame_len {
            log::warn!(
                "{}: ignoring trailing partial frame ({} of {} bytes)",
                self.config.path,
                filled,
                self.frame_len
            );
            return Ok(None);
        }

        let index = self.next_index;
        self.next_index += 1;
        let timestamp_s = index as f64 / self.config.fps as f64;
        let frame = Frame::new(data, self.config.width, self.config.height, index, timestamp_s)?
            .with_captured_at(Local::now());
        Ok(Some(frame))
    }

    fn total_frames(&self) -> Option<u64> {
        self.total
    }

    fn describe(&self) -> String {
        format!(
            "{} ({}x{} @ {} fps, rgb24)",
            self.config.path, self.config.width, self.config.height, self.config.fps
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn reads_whole_frames_and_drops_partial_tail() {
        let mut file = NamedTempFile::new().unwrap();
        let frame_len = 4 * 2 * BYTES_PER_PIXEL;
        let mut bytes = vec![10u8; frame_len];
        bytes.extend(vec![20u8; frame_len]);
        bytes.extend(vec![30u8; 5]);
        file.write_all(&bytes).unwrap();

        let mut source = RawRgbFileSource::open(SourceConfig {
            path: file.path().display().to_string(),
            width: 4,
            height: 2,
            fps: 10,
            frames: 0,
        })
        .unwrap();
        assert_eq!(source.total_frames(), Some(2));

        let first = source.next_frame().unwrap().unwrap();
        assert_eq!(first.pixel(0, 0), Some([10, 10, 10]));
        let second = source.next_frame().unwrap().unwrap();
        assert_eq!(second.index(), 1);
        assert_eq!(second.timestamp_s(), 0.1);
        assert_eq!(second.pixel(3, 1), Some([20, 20, 20]));
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn missing_file_is_an_error() {
        let config = SourceConfig {
            path: "/nonexistent/speedtrap.rgb".to_string(),
            ..SourceConfig::default()
        };
        assert!(RawRgbFileSource::open(config).is_err());
    }
}
