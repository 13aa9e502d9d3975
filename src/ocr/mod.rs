//! Plate reading.
//!
//! Text recognition engines are external collaborators behind
//! `TextRecognizer`. `PlateReader` turns whatever they return into the
//! canonical plate string used for blacklist lookup and persistence:
//! fragments joined in reading order, then every whitespace character removed.
//!
//! `PlateReader::read` never fails. Recognizer errors, empty output, zero-area
//! crops and (when configured) text that does not look like a plate all come
//! back as the empty string.

mod scripted;

use anyhow::Result;
use regex::Regex;

use crate::frame::Region;

pub use scripted::{FnRecognizer, ScriptedRecognizer};

pub trait TextRecognizer: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Recognize text in a crop. Fragments are returned in reading order.
    fn recognize(&mut self, region: &Region<'_>) -> Result<Vec<String>>;
}

/// Canonical plate form: all whitespace removed.
///
/// Idempotent: `canonicalize_plate(&canonicalize_plate(s)) == canonicalize_plate(s)`.
pub fn canonicalize_plate(text: &str) -> String {
    text.split_whitespace().collect()
}

pub struct PlateReader {
    recognizer: Box<dyn TextRecognizer>,
    pattern: Option<Regex>,
}

impl PlateReader {
    pub fn new(recognizer: Box<dyn TextRecognizer>) -> Self {
        Self {
            recognizer,
            pattern: None,
        }
    }

    /// Canonical plates that do not match `pattern` are discarded as garbled.
    pub fn with_pattern(mut self, pattern: Regex) -> Self {
        self.pattern = Some(pattern);
        self
    }

    pub fn read(&mut self, region: &Region<'_>) -> String {
        if region.is_empty() {
            return String::new();
        }
        let fragments = match self.recognizer.recognize(region) {
            Ok(fragments) => fragments,
            Err(e) => {
                log::warn!(
                    "text recognizer '{}' failed on frame {}: {}",
                    self.recognizer.name(),
                    region.frame_index(),
                    e
                );
                return String::new();
            }
        };
        let plate = canonicalize_plate(&fragments.join(" "));
        if plate.is_empty() {
            return plate;
        }
        if let Some(pattern) = &self.pattern {
            if !pattern.is_match(&plate) {
                log::debug!("discarding unrecognizable plate text '{}'", plate);
                return String::new();
            }
        }
        plate
    }
}
