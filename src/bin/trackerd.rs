//! trackerd - activity tracking daemon
//!
//! This daemon:
//! 1. Polls the camera snapshot endpoint (or replays recorded observations)
//! 2. Runs the configured detector backend on each frame
//! 3. Classifies zone and activity for the detected person
//! 4. Segments samples into activity intervals
//! 5. Hands closed intervals to the configured sink (SQLite or HTTP API)
//! 6. Stores rate-limited floor-object events from the same detections

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use activity_tracker::config::{DetectorKind, SinkKind, TrackerdConfig};
use activity_tracker::detect::{BackendRegistry, SharedBackend, StubBackend};
use activity_tracker::{
    ActivityTracker, Driver, HttpIntervalSink, IntervalSink, ObservationSource, ReplaySource,
    SqliteIntervalStore,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Replay recorded observations (JSON lines) instead of polling the camera.
    #[arg(long, value_name = "FILE")]
    replay: Option<PathBuf>,

    /// Run live capture with the stub detector (records nothing; for wiring checks).
    #[arg(long)]
    allow_stub_detector: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let mut cfg = TrackerdConfig::load()?;
    if args.allow_stub_detector {
        cfg.detector.allow_stub = true;
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            log::info!("shutdown requested");
            shutdown.store(true, Ordering::SeqCst);
        })?;
    }

    let mut sink = open_sink(&cfg)?;
    let perception = cfg.perception()?;
    let mut tracker = ActivityTracker::new();

    let mut driver_cfg = cfg.driver_config();
    let mut source: Box<dyn ObservationSource> = match &args.replay {
        Some(path) => {
            log::info!("replaying observations from {}", path.display());
            driver_cfg.poll_interval = Duration::ZERO;
            Box::new(ReplaySource::open(path)?)
        }
        None => live_source(&cfg)?,
    };

    log::info!(
        "trackerd running: {} zones, poll every {:?}",
        perception.zones().zones().len(),
        driver_cfg.poll_interval
    );
    let stats = Driver::new(driver_cfg).run(
        &mut source,
        &perception,
        &mut tracker,
        &mut sink,
        &shutdown,
    );
    log::info!(
        "trackerd done: {} source errors, {} empty frames, {} ordering violations",
        stats.source_errors,
        stats.empty_frames,
        stats.ordering_violations
    );
    Ok(())
}

fn open_sink(cfg: &TrackerdConfig) -> Result<Box<dyn IntervalSink>> {
    match cfg.sink.kind {
        SinkKind::Sqlite => {
            log::info!("writing intervals to {}", cfg.db_path);
            Ok(Box::new(SqliteIntervalStore::open(&cfg.db_path)?))
        }
        SinkKind::Http => {
            log::info!("posting intervals to {}", cfg.sink.api_url);
            Ok(Box::new(HttpIntervalSink::new(cfg.http_sink_config())?))
        }
    }
}

#[cfg(feature = "ingest-snapshot")]
fn open_event_sink(cfg: &TrackerdConfig) -> Result<Box<dyn activity_tracker::EventSink>> {
    use activity_tracker::HttpEventSink;

    match cfg.sink.kind {
        SinkKind::Sqlite => Ok(Box::new(SqliteIntervalStore::open(&cfg.db_path)?)),
        SinkKind::Http => {
            log::info!("posting events to {}", cfg.sink.events_url);
            Ok(Box::new(HttpEventSink::new(cfg.http_sink_config())?))
        }
    }
}

fn detector(cfg: &TrackerdConfig) -> Result<SharedBackend> {
    cfg.check_live_detector()?;
    let mut registry = BackendRegistry::new();
    registry.register(StubBackend::default());
    match cfg.detector.backend {
        DetectorKind::Stub => {
            log::warn!("stub detector allowed; no person will be detected");
        }
        DetectorKind::Tract => {
            register_tract(&mut registry, cfg)?;
            registry.set_default("tract")?;
        }
    }
    let backend = registry
        .default_backend()
        .ok_or_else(|| anyhow!("no detector backend registered"))?;
    backend
        .lock()
        .map_err(|_| anyhow!("detector backend lock poisoned"))?
        .warm_up()?;
    log::info!("detector backends available: {}", registry.list().join(", "));
    Ok(backend)
}

#[cfg(feature = "backend-tract")]
fn register_tract(registry: &mut BackendRegistry, cfg: &TrackerdConfig) -> Result<()> {
    let model_path = cfg
        .detector
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow!("tract detector requires detector.model_path"))?;
    let backend = activity_tracker::detect::TractBackend::new(model_path, cfg.yolo_params())?;
    registry.register(backend);
    Ok(())
}

#[cfg(not(feature = "backend-tract"))]
fn register_tract(_registry: &mut BackendRegistry, _cfg: &TrackerdConfig) -> Result<()> {
    Err(anyhow!("tract detector requires the backend-tract feature"))
}

#[cfg(feature = "ingest-snapshot")]
fn live_source(cfg: &TrackerdConfig) -> Result<Box<dyn ObservationSource>> {
    use activity_tracker::{DetectingSource, FloorObjectDetector, SnapshotSource};

    let detector = detector(cfg)?;
    let frames = SnapshotSource::new(cfg.snapshot_config())?;
    let source = DetectingSource::new(frames, detector, cfg.detector.confidence_threshold);
    if !cfg.events.enabled {
        return Ok(Box::new(source));
    }
    let floor = FloorObjectDetector::new(cfg.floor_object_config()?)?;
    Ok(Box::new(source.with_floor_events(floor, open_event_sink(cfg)?)))
}

#[cfg(not(feature = "ingest-snapshot"))]
fn live_source(cfg: &TrackerdConfig) -> Result<Box<dyn ObservationSource>> {
    let _ = detector(cfg)?;
    Err(anyhow!(
        "live capture requires the ingest-snapshot feature; use --replay"
    ))
}
