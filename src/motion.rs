//! Per-track motion history.
//!
//! Each track remembers only its last box center and timestamp, so every
//! displacement is inter-frame rather than cumulative.

use std::collections::HashMap;

use crate::frame::Point;
use crate::TrackId;

#[derive(Clone, Debug)]
pub struct TrackState {
    /// Set from the first observation and never changed.
    pub class_name: String,
    pub last_position: Point,
    pub last_timestamp: f64,
    pub observations: u64,
}

/// Motion measured by one `TrackMotionState::update` call.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackSnapshot {
    pub track_id: TrackId,
    pub class_name: String,
    /// Pixels moved since the previous observation.
    pub displacement: f64,
    /// Seconds since the previous observation.
    pub elapsed_secs: f64,
    /// True on first sighting, or when a stale id was recycled.
    pub is_new: bool,
}

#[derive(Debug, Default)]
pub struct TrackMotionState {
    tracks: HashMap<TrackId, TrackState>,
    stale_after_secs: Option<f64>,
}

impl TrackMotionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids unseen for longer than `secs` are treated as new tracks when they reappear.
    pub fn with_stale_after(mut self, secs: f64) -> Self {
        self.stale_after_secs = Some(secs);
        self
    }

    pub fn update(
        &mut self,
        track_id: TrackId,
        class_name: &str,
        center: Point,
        timestamp: f64,
    ) -> TrackSnapshot {
        let stale_after = self.stale_after_secs;
        let recycled = self.tracks.get(&track_id).is_some_and(|state| {
            stale_after.is_some_and(|limit| timestamp - state.last_timestamp > limit)
        });
        if recycled {
            log::debug!("track {} reappeared after stale interval; resetting", track_id);
            self.tracks.remove(&track_id);
        }

        match self.tracks.get_mut(&track_id) {
            Some(state) => {
                let displacement = state.last_position.distance_to(center);
                let elapsed_secs = timestamp - state.last_timestamp;
                state.last_position = center;
                state.last_timestamp = timestamp;
                state.observations += 1;
                TrackSnapshot {
                    track_id,
                    class_name: state.class_name.clone(),
                    displacement,
                    elapsed_secs,
                    is_new: false,
                }
            }
            None => {
                self.tracks.insert(
                    track_id,
                    TrackState {
                        class_name: class_name.to_string(),
                        last_position: center,
                        last_timestamp: timestamp,
                        observations: 1,
                    },
                );
                TrackSnapshot {
                    track_id,
                    class_name: class_name.to_string(),
                    displacement: 0.0,
                    elapsed_secs: 0.0,
                    is_new: true,
                }
            }
        }
    }

    pub fn get(&self, track_id: TrackId) -> Option<&TrackState> {
        self.tracks.get(&track_id)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}
