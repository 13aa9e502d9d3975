//! Speed estimation with a one-shot lock per track.
//!
//! A track's speed is computed once, from the first inter-frame sample whose
//! elapsed time clears the debounce interval, and then frozen. Every later call
//! returns the locked value regardless of further motion. Tracks that never
//! produce a qualifying sample report 0.0.

use std::collections::HashMap;

use crate::TrackId;

pub const DEFAULT_DEBOUNCE_SECS: f64 = 0.05;
pub const DEFAULT_METERS_PER_PIXEL: f64 = 1.0;
const MPS_TO_KMH: f64 = 3.6;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpeedSettings {
    /// Samples with `elapsed <= debounce_secs` never lock a speed.
    pub debounce_secs: f64,
    /// Ground distance covered by one pixel of box-center motion.
    pub meters_per_pixel: f64,
}

impl Default for SpeedSettings {
    fn default() -> Self {
        Self {
            debounce_secs: DEFAULT_DEBOUNCE_SECS,
            meters_per_pixel: DEFAULT_METERS_PER_PIXEL,
        }
    }
}

#[derive(Debug, Default)]
pub struct SpeedEstimator {
    settings: SpeedSettings,
    locked: HashMap<TrackId, f64>,
}

impl SpeedEstimator {
    pub fn new(settings: SpeedSettings) -> Self {
        Self {
            settings,
            locked: HashMap::new(),
        }
    }

    /// Returns the track's speed in km/h, locking it on the first qualifying sample.
    pub fn estimate(&mut self, track_id: TrackId, displacement: f64, elapsed_secs: f64) -> f64 {
        if let Some(speed) = self.locked.get(&track_id) {
            return *speed;
        }
        if elapsed_secs.is_nan() || elapsed_secs <= self.settings.debounce_secs {
            return 0.0;
        }
        let meters = displacement * self.settings.meters_per_pixel;
        let speed = round2(meters / elapsed_secs * MPS_TO_KMH);
        log::debug!(
            "track {} speed locked at {} km/h ({:.1}px over {:.3}s)",
            track_id,
            speed,
            displacement,
            elapsed_secs
        );
        self.locked.insert(track_id, speed);
        speed
    }

    pub fn locked_speed(&self, track_id: TrackId) -> Option<f64> {
        self.locked.get(&track_id).copied()
    }

    /// Drops the lock for a recycled track id.
    pub fn forget(&mut self, track_id: TrackId) {
        self.locked.remove(&track_id);
    }

    pub fn settings(&self) -> SpeedSettings {
        self.settings
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
