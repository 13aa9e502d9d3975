//! Frame container and pixel geometry.
//!
//! - `Frame`: owned RGB24 pixels plus stream timestamp and capture wall-clock time.
//! - `Region`: borrowed crop of a frame. Text recognizers receive this, never the frame.
//! - `AnnotatedFrame`: a processed frame with one color-coded box per track drawn on it.
//!
//! Detector boxes are floating point; crops are integer rectangles clamped to the
//! frame. A box that clamps to zero width or height yields an empty `Region`.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

pub const BYTES_PER_PIXEL: usize = 3;

pub type Rgb = [u8; 3];

pub const COLOR_NEUTRAL: Rgb = [0, 128, 0];
pub const COLOR_BLACKLISTED: Rgb = [255, 0, 0];
pub const COLOR_OVER_SPEED: Rgb = [0, 0, 255];

pub const DEFAULT_LINE_WIDTH: u32 = 2;

// ----------------------------------------------------------------------------
// Geometry
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance in pixels.
    pub fn distance_to(self, other: Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Detector box in pixel coordinates: (x1, y1) top-left, (x2, y2) bottom-right.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn center(&self) -> Point {
        Point::new(
            (self.x1 as f64 + self.x2 as f64) / 2.0,
            (self.y1 as f64 + self.y2 as f64) / 2.0,
        )
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }
}

/// Integer rectangle clamped to the frame, `x2`/`y2` exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRect {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl PixelRect {
    /// Truncates box coordinates to integers and clamps them into `width` x `height`.
    pub fn clamp(bbox: &BoundingBox, width: u32, height: u32) -> Self {
        let x1 = clamp_axis(bbox.x1, width);
        let y1 = clamp_axis(bbox.y1, height);
        let x2 = clamp_axis(bbox.x2, width).max(x1);
        let y2 = clamp_axis(bbox.y2, height).max(y1);
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }
}

fn clamp_axis(value: f32, max: u32) -> u32 {
    if !value.is_finite() || value <= 0.0 {
        return 0;
    }
    (value as u32).min(max)
}

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One decoded video frame.
///
/// `timestamp_s` is stream time in seconds and drives motion estimation.
/// `captured_at` is wall-clock time and stamps persisted records.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    index: u64,
    timestamp_s: f64,
    captured_at: DateTime<Local>,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, index: u64, timestamp_s: f64) -> Result<Self> {
        let expected = width as usize * height as usize * BYTES_PER_PIXEL;
        if data.len() != expected {
            return Err(anyhow!(
                "frame {} has {} bytes, expected {} for {}x{} rgb24",
                index,
                data.len(),
                expected,
                width,
                height
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            index,
            timestamp_s,
            captured_at: Local::now(),
        })
    }

    /// All-black frame, mostly for tests and synthetic sources.
    pub fn blank(width: u32, height: u32, index: u64, timestamp_s: f64) -> Self {
        Self {
            data: vec![0u8; width as usize * height as usize * BYTES_PER_PIXEL],
            width,
            height,
            index,
            timestamp_s,
            captured_at: Local::now(),
        }
    }

    pub fn with_captured_at(mut self, captured_at: DateTime<Local>) -> Self {
        self.captured_at = captured_at;
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Zero-based position in the stream.
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn timestamp_s(&self) -> f64 {
        self.timestamp_s
    }

    pub fn captured_at(&self) -> DateTime<Local> {
        self.captured_at
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgb> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = self.offset(x, y);
        Some([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        ])
    }

    /// Crop for text recognition. Never fails; degenerate boxes give an empty region.
    pub fn crop(&self, bbox: &BoundingBox) -> Region<'_> {
        Region {
            frame: self,
            bounds: PixelRect::clamp(bbox, self.width, self.height),
        }
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL
    }

    fn set_pixel(&mut self, x: u32, y: u32, color: Rgb) {
        if x >= self.width || y >= self.height {
            return;
        }
        let offset = self.offset(x, y);
        self.data[offset..offset + BYTES_PER_PIXEL].copy_from_slice(&color);
    }
}

// ----------------------------------------------------------------------------
// Region
// ----------------------------------------------------------------------------

/// Borrowed crop of a frame.
pub struct Region<'a> {
    frame: &'a Frame,
    bounds: PixelRect,
}

impl<'a> Region<'a> {
    pub fn bounds(&self) -> PixelRect {
        self.bounds
    }

    pub fn width(&self) -> u32 {
        self.bounds.width()
    }

    pub fn height(&self) -> u32 {
        self.bounds.height()
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    /// Index of the frame this region was cut from.
    pub fn frame_index(&self) -> u64 {
        self.frame.index
    }

    /// Copies the cropped pixels out as a packed RGB24 buffer.
    pub fn to_rgb(&self) -> Vec<u8> {
        let row_bytes = self.width() as usize * BYTES_PER_PIXEL;
        let mut out = Vec::with_capacity(row_bytes * self.height() as usize);
        for y in self.bounds.y1..self.bounds.y2 {
            let start = self.frame.offset(self.bounds.x1, y);
            out.extend_from_slice(&self.frame.data[start..start + row_bytes]);
        }
        out
    }
}

// ----------------------------------------------------------------------------
// Annotation
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct Annotation {
    pub bounds: PixelRect,
    pub color: Rgb,
    pub label: String,
}

/// Processed frame with track boxes drawn into its pixels.
///
/// Labels are kept as metadata next to the pixels; text rendering belongs to the
/// video encoder.
pub struct AnnotatedFrame {
    frame: Frame,
    annotations: Vec<Annotation>,
}

impl AnnotatedFrame {
    pub fn new(mut frame: Frame, annotations: Vec<Annotation>, line_width: u32) -> Self {
        for annotation in &annotations {
            draw_box(&mut frame, annotation.bounds, annotation.color, line_width);
        }
        Self { frame, annotations }
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn into_frame(self) -> Frame {
        self.frame
    }
}

fn draw_box(frame: &mut Frame, rect: PixelRect, color: Rgb, line_width: u32) {
    if rect.is_empty() {
        return;
    }
    let thickness = line_width.max(1).min(rect.width().min(rect.height()));
    for t in 0..thickness {
        let top = rect.y1 + t;
        let bottom = rect.y2 - 1 - t;
        let left = rect.x1 + t;
        let right = rect.x2 - 1 - t;
        for x in rect.x1..rect.x2 {
            frame.set_pixel(x, top, color);
            frame.set_pixel(x, bottom, color);
        }
        for y in rect.y1..rect.y2 {
            frame.set_pixel(left, y, color);
            frame.set_pixel(right, y, color);
        }
    }
}
