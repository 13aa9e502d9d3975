//! Frame pipeline orchestrator.
//!
//! Per-track state machine, advanced once per observed frame:
//!
//! ```text
//! SEEN ──(debounced speed sample)──▶ SPEED_LOCKED ──(non-empty plate)──▶ FINALIZED
//! ```
//!
//! For every detection, in tracker order: motion update, plate read, speed,
//! policy, live event, finalize attempt, annotation. The threshold is read once
//! per frame and shared by every track in that frame. Nothing returned by a
//! collaborator can abort `process_frame`; failures are logged and the frame
//! degrades to fewer results.

use anyhow::Result;
use regex::Regex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::detect::{LabelTable, TrackerBackend};
use crate::events::{EventSink, LiveEvent, NullSink};
use crate::frame::{AnnotatedFrame, Annotation, Frame, DEFAULT_LINE_WIDTH};
use crate::ingest::FrameSource;
use crate::motion::TrackMotionState;
use crate::notify::{LogNotifier, Notifier};
use crate::ocr::{PlateReader, TextRecognizer};
use crate::policy::{PolicyEvaluator, PolicyStore, Status, DEFAULT_THRESHOLD_KMH};
use crate::recorder::{FinalizeRequest, ViolationRecorder};
use crate::speed::{SpeedEstimator, SpeedSettings};
use crate::storage::{InMemoryViolationStore, ViolationStore};
use crate::TrackId;

pub const DEFAULT_STALE_TRACK_SECS: f64 = 5.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackPhase {
    Seen,
    SpeedLocked,
    Finalized,
}

/// Per-track outcome for one frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrackResult {
    pub track_id: TrackId,
    pub class_name: String,
    pub speed: f64,
    pub numberplate: String,
    pub status: Status,
}

pub struct FrameOutput {
    pub frame: AnnotatedFrame,
    pub results: Vec<TrackResult>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PipelineSettings {
    pub speed: SpeedSettings,
    /// `None` disables track id recycling.
    pub stale_track_secs: Option<f64>,
    pub default_threshold_kmh: f64,
    pub line_width: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            speed: SpeedSettings::default(),
            stale_track_secs: Some(DEFAULT_STALE_TRACK_SECS),
            default_threshold_kmh: DEFAULT_THRESHOLD_KMH,
            line_width: DEFAULT_LINE_WIDTH,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunSummary {
    pub frames: u64,
    pub detections: u64,
    pub finalized: usize,
    pub stopped_early: bool,
}

pub struct PipelineBuilder {
    tracker: Box<dyn TrackerBackend>,
    recognizer: Box<dyn TextRecognizer>,
    policy: Arc<dyn PolicyStore>,
    store: Box<dyn ViolationStore>,
    notifier: Box<dyn Notifier>,
    events: Box<dyn EventSink>,
    labels: LabelTable,
    plate_pattern: Option<Regex>,
    settings: PipelineSettings,
}

impl PipelineBuilder {
    pub fn violation_store(mut self, store: Box<dyn ViolationStore>) -> Self {
        self.store = store;
        self
    }

    pub fn notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn events(mut self, events: Box<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn labels(mut self, labels: LabelTable) -> Self {
        self.labels = labels;
        self
    }

    pub fn plate_pattern(mut self, pattern: Option<Regex>) -> Self {
        self.plate_pattern = pattern;
        self
    }

    pub fn settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn build(self) -> FramePipeline {
        let mut motion = TrackMotionState::new();
        if let Some(secs) = self.settings.stale_track_secs {
            motion = motion.with_stale_after(secs);
        }
        let mut plates = PlateReader::new(self.recognizer);
        if let Some(pattern) = self.plate_pattern {
            plates = plates.with_pattern(pattern);
        }
        FramePipeline {
            tracker: self.tracker,
            labels: self.labels,
            motion,
            speed: SpeedEstimator::new(self.settings.speed),
            plates,
            policy: PolicyEvaluator::new(self.policy)
                .with_default_threshold(self.settings.default_threshold_kmh),
            recorder: ViolationRecorder::new(self.store, self.notifier),
            events: self.events,
            line_width: self.settings.line_width,
            frames_processed: 0,
            detections_processed: 0,
        }
    }
}

pub struct FramePipeline {
    tracker: Box<dyn TrackerBackend>,
    labels: LabelTable,
    motion: TrackMotionState,
    speed: SpeedEstimator,
    plates: PlateReader,
    policy: PolicyEvaluator,
    recorder: ViolationRecorder,
    events: Box<dyn EventSink>,
    line_width: u32,
    frames_processed: u64,
    detections_processed: u64,
}

impl FramePipeline {
    /// Start a pipeline. Unset collaborators default to an in-memory store,
    /// log notifier and no live events.
    pub fn builder(
        tracker: Box<dyn TrackerBackend>,
        recognizer: Box<dyn TextRecognizer>,
        policy: Arc<dyn PolicyStore>,
    ) -> PipelineBuilder {
        PipelineBuilder {
            tracker,
            recognizer,
            policy,
            store: Box::new(InMemoryViolationStore::new()),
            notifier: Box::new(LogNotifier),
            events: Box::new(NullSink),
            labels: LabelTable::default(),
            plate_pattern: None,
            settings: PipelineSettings::default(),
        }
    }

    pub fn process_frame(&mut self, frame: Frame) -> FrameOutput {
        let threshold = self.policy.current_threshold();
        let detections = match self.tracker.track(&frame) {
            Ok(detections) => detections,
            Err(e) => {
                log::warn!(
                    "tracker '{}' failed on frame {}: {}",
                    self.tracker.name(),
                    frame.index(),
                    e
                );
                Vec::new()
            }
        };

        let mut results = Vec::with_capacity(detections.len());
        let mut annotations = Vec::with_capacity(detections.len());
        for det in detections {
            let track_id = det.track_id;
            let snapshot = self.motion.update(
                track_id,
                self.labels.name(det.class_index),
                det.bbox.center(),
                frame.timestamp_s(),
            );
            if snapshot.is_new {
                self.speed.forget(track_id);
                self.recorder.reset(track_id);
            }

            let region = frame.crop(&det.bbox);
            let plate = self.plates.read(&region);
            let speed = self
                .speed
                .estimate(track_id, snapshot.displacement, snapshot.elapsed_secs);
            let status = self.policy.evaluate(&plate, speed, threshold);
            log::debug!(
                "frame {} track {} | speed: {} km/h | plate: {} | {}",
                frame.index(),
                track_id,
                speed,
                plate,
                status
            );

            self.events.emit(LiveEvent::DetectionUpdate {
                track_id,
                numberplate: plate.clone(),
                speed,
                status,
            });
            self.recorder.finalize(FinalizeRequest {
                track_id,
                class_name: &snapshot.class_name,
                locked_speed: self.speed.locked_speed(track_id),
                plate: &plate,
                status,
                at: frame.captured_at(),
            });

            annotations.push(Annotation {
                bounds: region.bounds(),
                color: status.color(),
                label: track_label(&plate, status, speed),
            });
            results.push(TrackResult {
                track_id,
                class_name: snapshot.class_name,
                speed,
                numberplate: plate,
                status,
            });
        }

        self.frames_processed += 1;
        self.detections_processed += results.len() as u64;
        FrameOutput {
            frame: AnnotatedFrame::new(frame, annotations, self.line_width),
            results,
        }
    }

    /// Drive a source to exhaustion, or until `stop` is raised between frames.
    ///
    /// Progress events go out after every frame and a final 100% at the end.
    /// Only source errors are returned; per-frame failures never are.
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        stop: &AtomicBool,
        mut on_frame: impl FnMut(&FrameOutput),
    ) -> Result<RunSummary> {
        let total = source.total_frames();
        let start_frames = self.frames_processed;
        let start_detections = self.detections_processed;
        let mut stopped_early = false;
        while let Some(frame) = source.next_frame()? {
            let output = self.process_frame(frame);
            on_frame(&output);
            let done = self.frames_processed - start_frames;
            self.events.emit(LiveEvent::progress(done, total));
            if stop.load(Ordering::SeqCst) {
                log::info!("stop requested after {} frames", done);
                stopped_early = true;
                break;
            }
        }
        self.events
            .emit(LiveEvent::ProgressUpdate { progress: 100.0 });
        Ok(RunSummary {
            frames: self.frames_processed - start_frames,
            detections: self.detections_processed - start_detections,
            finalized: self.recorder.finalized_count(),
            stopped_early,
        })
    }

    pub fn phase(&self, track_id: TrackId) -> Option<TrackPhase> {
        self.motion.get(track_id)?;
        if self.recorder.is_finalized(track_id) {
            Some(TrackPhase::Finalized)
        } else if self.speed.locked_speed(track_id).is_some() {
            Some(TrackPhase::SpeedLocked)
        } else {
            Some(TrackPhase::Seen)
        }
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    pub fn recorder(&self) -> &ViolationRecorder {
        &self.recorder
    }
}

/// `"plate | STATUS | speed km/h"`, status segment omitted for compliant vehicles.
pub fn track_label(plate: &str, status: Status, speed: f64) -> String {
    match status {
        Status::None => format!("{} | {:.2} km/h", plate, speed),
        _ => format!("{} | {} | {:.2} km/h", plate, status.label(), speed),
    }
}
