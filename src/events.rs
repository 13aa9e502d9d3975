//! Live progress and detection events.
//!
//! Emission is fire-and-forget. `ChannelSink` writes into a bounded channel
//! with `try_send`; when the consumer is slow or gone the event is dropped and
//! counted, and the frame loop carries on.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};

use crate::policy::Status;
use crate::TrackId;

pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LiveEvent {
    /// Percent complete; -1 when the stream length is unknown.
    ProgressUpdate { progress: f64 },
    DetectionUpdate {
        track_id: TrackId,
        numberplate: String,
        speed: f64,
        status: Status,
    },
}

impl LiveEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LiveEvent::ProgressUpdate { .. } => "progress_update",
            LiveEvent::DetectionUpdate { .. } => "detection_update",
        }
    }

    /// Progress for frame `current` (1-based) of `total`.
    pub fn progress(current: u64, total: Option<u64>) -> Self {
        let progress = match total {
            Some(total) if total > 0 => (current as f64 / total as f64 * 100.0).min(100.0),
            _ => -1.0,
        };
        LiveEvent::ProgressUpdate { progress }
    }
}

pub trait EventSink: Send {
    fn emit(&self, event: LiveEvent);
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: LiveEvent) {}
}

pub struct ChannelSink {
    tx: SyncSender<LiveEvent>,
    dropped: AtomicU64,
}

impl ChannelSink {
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: LiveEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) | Err(TrySendError::Disconnected(event)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                log::debug!("live event {} dropped ({} total)", event.name(), dropped);
            }
        }
    }
}

/// Bounded live-event channel. `capacity` of 0 is bumped to 1.
pub fn live_channel(capacity: usize) -> (ChannelSink, Receiver<LiveEvent>) {
    let (tx, rx) = mpsc::sync_channel(capacity.max(1));
    (
        ChannelSink {
            tx,
            dropped: AtomicU64::new(0),
        },
        rx,
    )
}
