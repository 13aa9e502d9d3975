//! Speedtrap: per-track traffic enforcement over a tracked video stream.
//!
//! Each frame runs through a tracker; every tracked vehicle is followed by a
//! small state machine that estimates its speed once, reads its number plate,
//! classifies it against a speed threshold and a plate blacklist, and records
//! the first complete observation exactly once.
//!
//! # Module Structure
//!
//! - `frame`: Frame container, crops and annotation
//! - `ingest`: Frame sources (synthetic stub streams, raw RGB files)
//! - `detect`: Tracker backends and class labels
//! - `motion`, `speed`: Per-track displacement and one-shot speed lock
//! - `ocr`: Plate recognition adapter and plate canonicalization
//! - `policy`: Threshold and blacklist classification, policy stores
//! - `recorder`, `storage`, `notify`: At-most-once violation recording
//! - `events`: Fire-and-forget live event stream
//! - `pipeline`: Frame orchestrator tying the above together
//! - `api`, `config`: Admin interface and daemon configuration

use anyhow::Result;
use rand::RngCore;
use rusqlite::{Connection, OpenFlags};
use std::time::Duration;

pub mod api;
pub mod config;
pub mod detect;
pub mod events;
pub mod frame;
pub mod ingest;
pub mod motion;
pub mod notify;
pub mod ocr;
pub mod pipeline;
pub mod policy;
pub mod recorder;
pub mod speed;
pub mod storage;

pub use detect::{LabelTable, Scene, ScriptedTracker, TrackedDetection, TrackerBackend};
pub use events::{live_channel, ChannelSink, EventSink, LiveEvent, NullSink};
pub use frame::{AnnotatedFrame, BoundingBox, Frame, Point, Region};
pub use ingest::{open_source, FrameSource, SourceConfig};
pub use notify::{LogNotifier, MemoryNotifier, Notification, Notifier};
pub use ocr::{canonicalize_plate, PlateReader, ScriptedRecognizer, TextRecognizer};
pub use pipeline::{FrameOutput, FramePipeline, PipelineSettings, TrackPhase, TrackResult};
pub use policy::{
    evaluate, InMemoryPolicyStore, PolicyEvaluator, PolicyStore, SqlitePolicyStore, Status,
};
pub use recorder::{FinalizeOutcome, FinalizeRequest, ViolationRecorder};
pub use speed::{SpeedEstimator, SpeedSettings};
pub use storage::{
    InMemoryViolationStore, SqliteStats, SqliteViolationStore, StatsSource, ViolationRecord,
    ViolationStats, ViolationStore,
};

/// Tracker-assigned identity; unique among concurrently tracked objects.
pub type TrackId = u64;

const DB_BUSY_TIMEOUT: Duration = Duration::from_secs(2);

pub fn shared_memory_uri() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!(
        "file:speedtrap_{:x}?mode=memory&cache=shared",
        u64::from_le_bytes(bytes)
    )
}

pub(crate) fn open_db_connection(db_path: &str) -> Result<Connection> {
    let conn = if db_path.starts_with("file:") {
        Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?
    } else {
        Connection::open(db_path)?
    };
    conn.busy_timeout(DB_BUSY_TIMEOUT)?;
    Ok(conn)
}
