use anyhow::{anyhow, Result};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use speedtrap::detect::{SceneDetection, SceneFrame, StubTracker};
use speedtrap::frame::{COLOR_BLACKLISTED, COLOR_NEUTRAL, COLOR_OVER_SPEED};
use speedtrap::ingest::{SourceConfig, SyntheticSource};
use speedtrap::ocr::FnRecognizer;
use speedtrap::speed::SpeedSettings;
use speedtrap::{
    live_channel, BoundingBox, Frame, FramePipeline, InMemoryPolicyStore, InMemoryViolationStore,
    LiveEvent, MemoryNotifier, PipelineSettings, PolicyStore, Scene, ScriptedRecognizer,
    ScriptedTracker, Status, TrackPhase, TrackedDetection, TrackerBackend, ViolationRecord,
    ViolationStore,
};

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;

/// 80x50 box centered on (cx, cy).
fn det(track_id: u64, cx: f32, cy: f32, plate: &[&str]) -> SceneDetection {
    SceneDetection {
        bbox: BoundingBox::new(cx - 40.0, cy - 25.0, cx + 40.0, cy + 25.0),
        track_id,
        class_index: 0,
        plate: plate.iter().map(|s| s.to_string()).collect(),
    }
}

fn scene(frames: Vec<Vec<SceneDetection>>) -> Arc<Scene> {
    Arc::new(Scene {
        frames: frames
            .into_iter()
            .map(|detections| SceneFrame { detections })
            .collect(),
    })
}

struct Harness {
    pipeline: FramePipeline,
    policy: Arc<InMemoryPolicyStore>,
    store: InMemoryViolationStore,
    notifier: MemoryNotifier,
}

fn harness(scene: Arc<Scene>, settings: PipelineSettings) -> Harness {
    let policy = Arc::new(InMemoryPolicyStore::default());
    let store = InMemoryViolationStore::new();
    let notifier = MemoryNotifier::new();
    let pipeline = FramePipeline::builder(
        Box::new(ScriptedTracker::new(scene.clone())),
        Box::new(ScriptedRecognizer::new(scene, WIDTH, HEIGHT)),
        policy.clone(),
    )
    .violation_store(Box::new(store.clone()))
    .notifier(Box::new(notifier.clone()))
    .settings(settings)
    .build();
    Harness {
        pipeline,
        policy,
        store,
        notifier,
    }
}

fn frame(index: u64, timestamp_s: f64) -> Frame {
    Frame::blank(WIDTH, HEIGHT, index, timestamp_s)
}

#[test]
fn fast_vehicle_locks_648_and_records_over_speed_once() {
    let scene = scene(vec![
        vec![det(7, 100.0, 100.0, &[])],
        vec![det(7, 100.0, 136.0, &["MH12", "AB1234"])],
        vec![det(7, 100.0, 200.0, &["MH12AB1234"])],
        vec![det(7, 100.0, 260.0, &["MH12AB1234"])],
    ]);
    let mut h = harness(scene, PipelineSettings::default());

    let first = h.pipeline.process_frame(frame(0, 0.0));
    assert_eq!(first.results[0].speed, 0.0);
    assert_eq!(first.results[0].status, Status::None);
    assert_eq!(h.pipeline.phase(7), Some(TrackPhase::Seen));

    let second = h.pipeline.process_frame(frame(1, 0.2));
    let result = &second.results[0];
    assert_eq!(result.speed, 648.0);
    assert_eq!(result.numberplate, "MH12AB1234");
    assert_eq!(result.status, Status::OverSpeed);
    assert_eq!(h.pipeline.phase(7), Some(TrackPhase::Finalized));
    let annotation = &second.frame.annotations()[0];
    assert_eq!(annotation.color, COLOR_OVER_SPEED);
    assert_eq!(annotation.label, "MH12AB1234 | OVER SPEED | 648.00 km/h");

    // Further motion never changes the locked speed.
    for (i, ts) in [(2, 0.4), (3, 0.6)] {
        let out = h.pipeline.process_frame(frame(i, ts));
        assert_eq!(out.results[0].speed, 648.0);
    }

    let records = h.store.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].track_id, 7);
    assert_eq!(records[0].class_name, "car");
    assert_eq!(records[0].speed, 648.0);
    assert_eq!(records[0].status, Status::OverSpeed);
    assert_eq!(h.notifier.sent().len(), 1);
}

#[test]
fn unreadable_plate_is_never_finalized() {
    let frames = (0..20)
        .map(|i| vec![det(3, 300.0, 50.0 + 10.0 * i as f32, &["  "])])
        .collect();
    let mut h = harness(scene(frames), PipelineSettings::default());
    for i in 0..20u64 {
        let out = h.pipeline.process_frame(frame(i, i as f64 * 0.1));
        assert_eq!(out.results[0].numberplate, "");
    }
    assert_eq!(h.pipeline.phase(3), Some(TrackPhase::SpeedLocked));
    assert!(h.store.is_empty());
    assert!(h.notifier.sent().is_empty());
    assert_eq!(h.pipeline.recorder().finalized_count(), 0);
}

#[test]
fn threshold_change_applies_from_the_next_frame() {
    // 7 px every 0.36 s at 1 m/px is 70 km/h; plate readable from frame 11.
    let frames = (0..13u64)
        .map(|i| {
            let plate: &[&str] = if i >= 11 { &["KA 01 AB 1234"] } else { &[] };
            vec![det(4, 200.0, 60.0 + 7.0 * i as f32, plate)]
        })
        .collect();
    let mut h = harness(scene(frames), PipelineSettings::default());
    h.policy.set_threshold(50.0).unwrap();

    for i in 0..=10u64 {
        let out = h.pipeline.process_frame(frame(i, i as f64 * 0.36));
        if i >= 1 {
            assert_eq!(out.results[0].speed, 70.0);
            assert_eq!(out.results[0].status, Status::OverSpeed);
        }
    }
    assert!(h.store.is_empty());

    h.policy.set_threshold(80.0).unwrap();
    let out = h.pipeline.process_frame(frame(11, 11.0 * 0.36));
    assert_eq!(out.results[0].status, Status::None);
    assert_eq!(out.frame.annotations()[0].color, COLOR_NEUTRAL);
    assert_eq!(out.frame.annotations()[0].label, "KA01AB1234 | 70.00 km/h");

    let records = h.store.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].numberplate, "KA01AB1234");
    assert_eq!(records[0].speed, 70.0);
    assert_eq!(records[0].status, Status::None);
    assert!(h.notifier.sent().is_empty());
}

#[test]
fn blacklisted_plate_wins_over_low_speed() {
    let frames = (0..3)
        .map(|i| vec![det(9, 400.0, 100.0 + i as f32, &["DL 3C", "AB 0001"])])
        .collect();
    let mut h = harness(scene(frames), PipelineSettings::default());
    h.policy.add("DL3CAB0001").unwrap();

    h.pipeline.process_frame(frame(0, 0.0));
    let out = h.pipeline.process_frame(frame(1, 0.1));
    assert_eq!(out.results[0].speed, 36.0);
    assert_eq!(out.results[0].status, Status::Blacklisted);
    assert_eq!(out.frame.annotations()[0].color, COLOR_BLACKLISTED);

    let sent = h.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].status, Status::Blacklisted);
    assert_eq!(sent[0].numberplate, "DL3CAB0001");
}

#[test]
fn blacklist_removal_is_seen_by_later_tracks() {
    let scene = scene(vec![
        vec![det(1, 100.0, 100.0, &["ABC123"])],
        vec![det(1, 100.0, 101.0, &["ABC123"])],
        vec![det(2, 300.0, 100.0, &["ABC123"])],
        vec![det(2, 300.0, 101.0, &["ABC123"])],
    ]);
    let mut h = harness(scene, PipelineSettings::default());
    h.policy.add("ABC 123").unwrap();
    h.pipeline.process_frame(frame(0, 0.0));
    h.pipeline.process_frame(frame(1, 0.1));
    h.policy.remove("ABC123").unwrap();
    h.pipeline.process_frame(frame(2, 0.2));
    h.pipeline.process_frame(frame(3, 0.3));

    let statuses: Vec<Status> = h.store.records().iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![Status::Blacklisted, Status::None]);
}

#[test]
fn recycled_track_id_is_recorded_again() {
    let scene = scene(vec![
        vec![det(5, 100.0, 100.0, &["GJ01XY9999"])],
        vec![det(5, 100.0, 110.0, &["GJ01XY9999"])],
        vec![det(5, 500.0, 100.0, &["RJ14CD0001"])],
        vec![det(5, 500.0, 102.0, &["RJ14CD0001"])],
    ]);
    let settings = PipelineSettings {
        stale_track_secs: Some(5.0),
        ..PipelineSettings::default()
    };
    let mut h = harness(scene, settings);
    h.pipeline.process_frame(frame(0, 0.0));
    h.pipeline.process_frame(frame(1, 0.1));
    assert_eq!(h.pipeline.phase(5), Some(TrackPhase::Finalized));

    // Same id, 20 s later, far away: a different vehicle.
    let out = h.pipeline.process_frame(frame(2, 20.0));
    assert_eq!(out.results[0].speed, 0.0);
    assert_eq!(h.pipeline.phase(5), Some(TrackPhase::Seen));
    let out = h.pipeline.process_frame(frame(3, 20.1));
    assert_eq!(out.results[0].speed, 72.0);

    let plates: Vec<String> = h.store.records().into_iter().map(|r| r.numberplate).collect();
    assert_eq!(plates, vec!["GJ01XY9999", "RJ14CD0001"]);
}

#[test]
fn close_samples_are_debounced() {
    let scene = scene(vec![
        vec![det(6, 100.0, 100.0, &[])],
        vec![det(6, 100.0, 130.0, &[])],
        vec![det(6, 100.0, 131.0, &[])],
    ]);
    let settings = PipelineSettings {
        speed: SpeedSettings {
            debounce_secs: 0.05,
            meters_per_pixel: 1.0,
        },
        ..PipelineSettings::default()
    };
    let mut h = harness(scene, settings);
    h.pipeline.process_frame(frame(0, 0.0));
    let out = h.pipeline.process_frame(frame(1, 0.01));
    assert_eq!(out.results[0].speed, 0.0);
    assert_eq!(h.pipeline.phase(6), Some(TrackPhase::Seen));
    let out = h.pipeline.process_frame(frame(2, 0.11));
    assert_eq!(out.results[0].speed, 36.0);
}

struct BrokenTracker;

impl TrackerBackend for BrokenTracker {
    fn name(&self) -> &'static str {
        "broken"
    }

    fn track(&mut self, _frame: &Frame) -> Result<Vec<TrackedDetection>> {
        Err(anyhow!("model not loaded"))
    }
}

struct BrokenPolicy;

impl PolicyStore for BrokenPolicy {
    fn threshold(&self) -> Result<f64> {
        Err(anyhow!("settings table locked"))
    }
    fn set_threshold(&self, _kmh: f64) -> Result<()> {
        Err(anyhow!("settings table locked"))
    }
    fn is_blacklisted(&self, _plate: &str) -> Result<bool> {
        Err(anyhow!("blacklist unavailable"))
    }
    fn add(&self, _plate: &str) -> Result<bool> {
        Err(anyhow!("blacklist unavailable"))
    }
    fn remove(&self, _plate: &str) -> Result<bool> {
        Err(anyhow!("blacklist unavailable"))
    }
    fn list(&self) -> Result<Vec<String>> {
        Err(anyhow!("blacklist unavailable"))
    }
}

struct BrokenStore;

impl ViolationStore for BrokenStore {
    fn insert_violation(&mut self, _record: &ViolationRecord) -> Result<()> {
        Err(anyhow!("disk full"))
    }
}

#[test]
fn tracker_failure_yields_empty_frame() {
    let mut pipeline = FramePipeline::builder(
        Box::new(BrokenTracker),
        Box::new(FnRecognizer::new(|_region: &speedtrap::Region<'_>| Ok(Vec::new()))),
        Arc::new(InMemoryPolicyStore::default()),
    )
    .build();
    let out = pipeline.process_frame(frame(0, 0.0));
    assert!(out.results.is_empty());
    assert!(out.frame.annotations().is_empty());
    assert_eq!(pipeline.frames_processed(), 1);
}

#[test]
fn failing_collaborators_degrade_without_aborting() {
    let scene = scene(vec![
        vec![det(8, 100.0, 100.0, &[])],
        vec![det(8, 100.0, 101.0, &[])],
    ]);
    let mut calls = 0;
    let recognizer = FnRecognizer::new(move |_region: &speedtrap::Region<'_>| {
        calls += 1;
        if calls == 1 {
            Err(anyhow!("ocr engine crashed"))
        } else {
            Ok(vec!["MH 12".to_string(), "AB 1234".to_string()])
        }
    });
    let notifier = MemoryNotifier::new();
    let mut pipeline = FramePipeline::builder(
        Box::new(ScriptedTracker::new(scene)),
        Box::new(recognizer),
        Arc::new(BrokenPolicy),
    )
    .violation_store(Box::new(BrokenStore))
    .notifier(Box::new(notifier.clone()))
    .build();

    let out = pipeline.process_frame(frame(0, 0.0));
    assert_eq!(out.results[0].numberplate, "");

    // Threshold falls back to 50 km/h; blacklist lookups count as not listed.
    let out = pipeline.process_frame(frame(1, 0.1));
    assert_eq!(out.results[0].numberplate, "MH12AB1234");
    assert_eq!(out.results[0].speed, 36.0);
    assert_eq!(out.results[0].status, Status::None);
    assert_eq!(pipeline.phase(8), Some(TrackPhase::Finalized));
    assert_eq!(pipeline.recorder().store_failures(), 1);
    assert!(notifier.sent().is_empty());
}

#[test]
fn demo_run_emits_live_events_and_progress() {
    let scene = Arc::new(Scene::demo());
    let (sink, rx) = live_channel(4096);
    let store = InMemoryViolationStore::new();
    let mut pipeline = FramePipeline::builder(
        Box::new(ScriptedTracker::new(scene.clone())),
        Box::new(ScriptedRecognizer::new(scene.clone(), WIDTH, HEIGHT)),
        Arc::new(InMemoryPolicyStore::default()),
    )
    .violation_store(Box::new(store.clone()))
    .events(Box::new(sink))
    .build();

    let mut source = SyntheticSource::new(SourceConfig {
        frames: scene.len() as u64,
        ..SourceConfig::default()
    });
    let stop = AtomicBool::new(false);
    let mut frames_seen = 0;
    let summary = pipeline
        .run(&mut source, &stop, |_| frames_seen += 1)
        .unwrap();
    assert_eq!(summary.frames, 60);
    assert_eq!(frames_seen, 60);
    assert_eq!(summary.detections, 180);
    assert_eq!(summary.finalized, 2);
    assert!(!summary.stopped_early);
    drop(pipeline);

    let events: Vec<LiveEvent> = rx.try_iter().collect();
    let detections = events
        .iter()
        .filter(|e| matches!(e, LiveEvent::DetectionUpdate { .. }))
        .count();
    assert_eq!(detections, 180);
    assert_eq!(
        events.last(),
        Some(&LiveEvent::ProgressUpdate { progress: 100.0 })
    );

    let mut records = store.records();
    records.sort_by_key(|r| r.track_id);
    assert_eq!(records.len(), 2);
    assert_eq!((records[0].track_id, records[0].speed), (1, 36.0));
    assert_eq!(records[0].numberplate, "KA01AB1234");
    assert_eq!(records[0].status, Status::None);
    assert_eq!((records[1].track_id, records[1].speed), (2, 108.0));
    assert_eq!(records[1].status, Status::OverSpeed);
}

#[test]
fn stop_flag_ends_run_after_current_frame() {
    let mut pipeline = FramePipeline::builder(
        Box::new(StubTracker::new()),
        Box::new(FnRecognizer::new(|_region: &speedtrap::Region<'_>| Ok(Vec::new()))),
        Arc::new(InMemoryPolicyStore::default()),
    )
    .build();
    let mut source = SyntheticSource::new(SourceConfig::default());
    let stop = AtomicBool::new(true);
    let summary = pipeline.run(&mut source, &stop, |_| {}).unwrap();
    assert_eq!(summary.frames, 1);
    assert!(summary.stopped_early);
}
