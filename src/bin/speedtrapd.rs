//! speedtrapd - run a frame source through the enforcement pipeline.
//!
//! 1. Loads configuration (`SPEEDTRAP_CONFIG` file plus env overrides)
//! 2. Opens the SQLite policy and violation stores
//! 3. Starts the loopback admin API (blacklist, threshold, stats)
//! 4. Feeds every frame through the pipeline until the source ends or Ctrl-C

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use speedtrap::{
    api::{AdminConfig, AdminServer},
    config::SpeedtrapConfig,
    detect::{BackendRegistry, StubTracker},
    ingest::is_stub,
    notify::MqttNotifier,
    open_source, live_channel, FramePipeline, LiveEvent, LogNotifier, Notifier, PolicyStore,
    Scene, ScriptedRecognizer, ScriptedTracker, SqlitePolicyStore, SqliteStats,
    SqliteViolationStore, StatsSource,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about = "Per-track speed and blacklist enforcement daemon")]
struct Args {
    /// Scripted scene (JSON) replayed by the scripted tracker and recognizer.
    #[arg(long, env = "SPEEDTRAP_SCENE")]
    scene: Option<PathBuf>,

    /// Do not start the admin API.
    #[arg(long)]
    no_admin: bool,

    /// Print live events to stdout as JSON lines.
    #[arg(long, env = "SPEEDTRAP_PRINT_EVENTS")]
    print_events: bool,

    /// UI mode for stderr progress (auto|plain|pretty).
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, args.print_events || !stdout_is_tty);

    let mut cfg = {
        let _stage = ui.stage("Load configuration");
        SpeedtrapConfig::load()?
    };
    let scene = Arc::new(match &args.scene {
        Some(path) => Scene::load(path)?,
        None => Scene::demo(),
    });
    if is_stub(&cfg.source.path) && cfg.tracker == "scripted" {
        cfg.source.frames = scene.len() as u64;
    }

    let (policy, violations, stats) = {
        let _stage = ui.stage("Open stores");
        let policy: Arc<dyn PolicyStore> = Arc::new(
            SqlitePolicyStore::open(&cfg.db_path)?
                .with_default_threshold(cfg.default_threshold_kmh)?,
        );
        let violations = SqliteViolationStore::open(&cfg.db_path)?;
        let stats: Arc<dyn StatsSource> = Arc::new(SqliteStats::new(cfg.db_path.clone()));
        (policy, violations, stats)
    };

    let admin = if args.no_admin {
        None
    } else {
        let handle = AdminServer::new(
            AdminConfig {
                addr: cfg.admin_addr.clone(),
                token_path: cfg.admin_token_path.clone(),
            },
            policy.clone(),
            stats,
        )
        .spawn()?;
        if let Some(path) = &handle.token_path {
            log::info!("admin api capability token written to {}", path.display());
        } else {
            log::warn!("admin api capability token (handle securely): {}", handle.token);
        }
        Some(handle)
    };

    let notifier: Box<dyn Notifier> = match &cfg.mqtt {
        Some(settings) => Box::new(MqttNotifier::connect(settings)?),
        None => Box::new(LogNotifier),
    };

    let mut registry = BackendRegistry::new();
    let tracker_scene = scene.clone();
    registry.register("scripted", move || {
        Ok(Box::new(ScriptedTracker::new(tracker_scene.clone())))
    });
    registry.register("stub", || Ok(Box::new(StubTracker::new())));
    let tracker = registry.create(&cfg.tracker)?;
    let recognizer = ScriptedRecognizer::new(scene, cfg.source.width, cfg.source.height);

    let (sink, live_rx) = live_channel(cfg.event_capacity);
    let print_events = args.print_events;
    let consumer = std::thread::spawn(move || {
        for event in live_rx {
            if print_events {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => log::warn!("failed to encode live event: {}", e),
                }
            } else if let LiveEvent::DetectionUpdate { track_id, .. } = &event {
                log::trace!("live event {} for track {}", event.name(), track_id);
            }
        }
    });

    let mut pipeline = FramePipeline::builder(tracker, Box::new(recognizer), policy)
        .violation_store(Box::new(violations))
        .notifier(notifier)
        .events(Box::new(sink))
        .labels(cfg.labels.clone())
        .plate_pattern(cfg.plate_pattern.clone())
        .settings(cfg.pipeline_settings())
        .build();

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = stop.clone();
    ctrlc::set_handler(move || {
        stop_handler.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let mut source = open_source(&cfg.source)?;
    log::info!(
        "speedtrapd running: {} -> {} (tracker {})",
        source.describe(),
        cfg.db_path,
        cfg.tracker
    );
    let summary = {
        let _stage = ui.stage("Process frames");
        let mut progress = ui.frames(source.total_frames());
        let summary = pipeline.run(source.as_mut(), &stop, |output| {
            progress.advance(output.results.len())
        })?;
        progress.finish();
        summary
    };
    log::info!(
        "processed {} frames, {} detections, {} tracks finalized{}",
        summary.frames,
        summary.detections,
        summary.finalized,
        if summary.stopped_early { " (stopped early)" } else { "" }
    );
    let recorder = pipeline.recorder();
    if recorder.store_failures() > 0 || recorder.notify_failures() > 0 {
        log::warn!(
            "{} store failures, {} notification failures",
            recorder.store_failures(),
            recorder.notify_failures()
        );
    }

    drop(pipeline);
    consumer
        .join()
        .map_err(|_| anyhow!("live event consumer panicked"))?;
    if let Some(handle) = admin {
        handle.stop()?;
    }
    Ok(())
}
