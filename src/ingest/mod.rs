//! Frame ingestion sources.
//!
//! - `stub://...` scripted synthetic stream (demos and tests)
//! - local raw RGB24 file: frames of the configured size concatenated back to back
//!
//! Sources stamp each frame with its stream timestamp (`index / fps`) and the
//! local wall-clock time it was read. Decoding compressed video is left to an
//! external tool (`ffmpeg -f rawvideo -pix_fmt rgb24`).

pub mod raw;
pub mod synthetic;

use anyhow::{anyhow, Result};

use crate::detect::backends::scripted::{DEMO_FPS, DEMO_FRAMES, DEMO_HEIGHT, DEMO_WIDTH};
use crate::frame::Frame;

pub use raw::RawRgbFileSource;
pub use synthetic::SyntheticSource;

pub const STUB_SCHEME: &str = "stub://";

/// A finite or unbounded stream of frames, read in order.
pub trait FrameSource: Send {
    /// `Ok(None)` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Total frame count when known up front.
    fn total_frames(&self) -> Option<u64>;

    fn describe(&self) -> String;
}

#[derive(Clone, Debug, PartialEq)]
pub struct SourceConfig {
    /// `stub://<name>` or a local file path.
    pub path: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Frame count for synthetic streams.
    pub frames: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: "stub://demo".to_string(),
            width: DEMO_WIDTH,
            height: DEMO_HEIGHT,
            fps: DEMO_FPS,
            frames: DEMO_FRAMES,
        }
    }
}

impl SourceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.path.trim().is_empty() {
            return Err(anyhow!("source path must not be empty"));
        }
        if self.width == 0 || self.height == 0 {
            return Err(anyhow!("source width and height must be non-zero"));
        }
        if self.fps == 0 {
            return Err(anyhow!("source fps must be greater than zero"));
        }
        if !is_stub(&self.path) && self.path.contains("://") {
            return Err(anyhow!(
                "only local files and stub:// sources are supported (got {})",
                self.path
            ));
        }
        Ok(())
    }
}

pub fn is_stub(path: &str) -> bool {
    path.starts_with(STUB_SCHEME)
}

pub fn open_source(config: &SourceConfig) -> Result<Box<dyn FrameSource>> {
    config.validate()?;
    if is_stub(&config.path) {
        log::info!("frame source: {} (synthetic, {} frames)", config.path, config.frames);
        Ok(Box::new(SyntheticSource::new(config.clone())))
    } else {
        let source = RawRgbFileSource::open(config.clone())?;
        log::info!("frame source: {}", source.describe());
        Ok(Box::new(source))
    }
}
