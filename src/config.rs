use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::activity::{ActivityClassifier, PostureThresholds};
use crate::detect::YoloParams;
use crate::driver::{DriverConfig, RetryPolicy};
use crate::events::FloorObjectConfig;
use crate::observation::Perception;
use crate::transport::HttpSinkConfig;
use crate::zone::{Zone, ZoneMap};

const DEFAULT_DB_PATH: &str = "activity.db";
const DEFAULT_API_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_API_URL: &str = "http://127.0.0.1:8000/api/activities";
const DEFAULT_EVENTS_URL: &str = "http://127.0.0.1:8000/api/events";
const DEFAULT_SNAPSHOT_URL: &str = "http://127.0.0.1:8080/shot.jpg";
const DEFAULT_SNAPSHOT_TIMEOUT_SECS: u64 = 5;
const DEFAULT_POLL_MS: u64 = 500;
const DEFAULT_FRAME_WIDTH: u32 = 1920;
const DEFAULT_FRAME_HEIGHT: u32 = 1080;
const DEFAULT_MIN_CONFIDENCE: f32 = 0.25;
const DEFAULT_INITIAL_BACKOFF_MS: u64 = 1000;
const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;
const DEFAULT_FLOOR_RATIO: f32 = 0.5;
const DEFAULT_EVENT_COOLDOWN_MS: u64 = 5000;

#[derive(Debug, Deserialize, Default)]
struct TrackerdConfigFile {
    db_path: Option<String>,
    snapshot: Option<SnapshotConfigFile>,
    poll: Option<PollConfigFile>,
    frame: Option<FrameConfigFile>,
    zones: Option<Vec<Zone>>,
    posture: Option<PostureConfigFile>,
    detector: Option<DetectorConfigFile>,
    sink: Option<SinkConfigFile>,
    api: Option<ApiConfigFile>,
    retry: Option<RetryConfigFile>,
    events: Option<EventsConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SnapshotConfigFile {
    url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct PollConfigFile {
    interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct FrameConfigFile {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct PostureConfigFile {
    desk_seated_ratio: Option<f32>,
    bed_lying_ratio: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
    confidence_threshold: Option<f32>,
    allow_stub: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct SinkConfigFile {
    kind: Option<String>,
    api_url: Option<String>,
    events_url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct EventsConfigFile {
    enabled: Option<bool>,
    floor_ratio: Option<f32>,
    cooldown_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RetryConfigFile {
    initial_backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorKind {
    Stub,
    Tract,
}

impl DetectorKind {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stub" => Ok(Self::Stub),
            "tract" => Ok(Self::Tract),
            other => Err(anyhow!(
                "unknown detector backend '{}'; expected stub or tract",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Sqlite,
    Http,
}

impl SinkKind {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "http" => Ok(Self::Http),
            other => Err(anyhow!("unknown sink '{}'; expected sqlite or http", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackerdConfig {
    pub db_path: String,
    pub snapshot: SnapshotSettings,
    pub poll_interval: Duration,
    pub frame: FrameSettings,
    pub zones: Vec<Zone>,
    pub posture: PostureThresholds,
    pub detector: DetectorSettings,
    pub sink: SinkSettings,
    pub api_addr: String,
    pub retry: RetryPolicy,
    pub events: EventSettings,
}

#[derive(Debug, Clone)]
pub struct SnapshotSettings {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct FrameSettings {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: DetectorKind,
    pub model_path: Option<PathBuf>,
    pub input_size: u32,
    pub confidence_threshold: f32,
    /// Live capture with the stub detector records nothing; it must be asked for.
    pub allow_stub: bool,
}

#[derive(Debug, Clone)]
pub struct SinkSettings {
    pub kind: SinkKind,
    pub api_url: String,
    pub events_url: String,
}

/// Floor-object detection events produced alongside live tracking.
#[derive(Debug, Clone)]
pub struct EventSettings {
    pub enabled: bool,
    pub floor_ratio: f32,
    pub cooldown: Duration,
}

impl TrackerdConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("ACTIVITY_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: TrackerdConfigFile) -> Result<Self> {
        let db_path = file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let snapshot = file.snapshot.unwrap_or_default();
        let snapshot = SnapshotSettings {
            url: snapshot
                .url
                .unwrap_or_else(|| DEFAULT_SNAPSHOT_URL.to_string()),
            username: snapshot.username,
            password: snapshot.password,
            timeout: Duration::from_secs(
                snapshot
                    .timeout_secs
                    .unwrap_or(DEFAULT_SNAPSHOT_TIMEOUT_SECS),
            ),
        };
        let poll_interval = Duration::from_millis(
            file.poll
                .and_then(|poll| poll.interval_ms)
                .unwrap_or(DEFAULT_POLL_MS),
        );
        let frame = FrameSettings {
            width: file
                .frame
                .as_ref()
                .and_then(|frame| frame.width)
                .unwrap_or(DEFAULT_FRAME_WIDTH),
            height: file
                .frame
                .as_ref()
                .and_then(|frame| frame.height)
                .unwrap_or(DEFAULT_FRAME_HEIGHT),
        };
        let zones = file
            .zones
            .unwrap_or_else(|| ZoneMap::default_layout().zones().to_vec());
        let defaults = PostureThresholds::default();
        let posture = PostureThresholds {
            desk_seated_ratio: file
                .posture
                .as_ref()
                .and_then(|posture| posture.desk_seated_ratio)
                .unwrap_or(defaults.desk_seated_ratio),
            bed_lying_ratio: file
                .posture
                .as_ref()
                .and_then(|posture| posture.bed_lying_ratio)
                .unwrap_or(defaults.bed_lying_ratio),
        };
        let detector_file = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            backend: match detector_file.backend.as_deref() {
                Some(name) => DetectorKind::parse(name)?,
                None => DetectorKind::Stub,
            },
            model_path: detector_file.model_path,
            input_size: detector_file
                .input_size
                .unwrap_or(YoloParams::default().input_size),
            confidence_threshold: detector_file
                .confidence_threshold
                .unwrap_or(DEFAULT_MIN_CONFIDENCE),
            allow_stub: detector_file.allow_stub.unwrap_or(false),
        };
        let sink_file = file.sink.unwrap_or_default();
        let sink = SinkSettings {
            kind: match sink_file.kind.as_deref() {
                Some(kind) => SinkKind::parse(kind)?,
                None => SinkKind::Sqlite,
            },
            api_url: sink_file
                .api_url
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            events_url: sink_file
                .events_url
                .unwrap_or_else(|| DEFAULT_EVENTS_URL.to_string()),
        };
        let events_file = file.events.unwrap_or_default();
        let events = EventSettings {
            enabled: events_file.enabled.unwrap_or(true),
            floor_ratio: events_file.floor_ratio.unwrap_or(DEFAULT_FLOOR_RATIO),
            cooldown: Duration::from_millis(
                events_file.cooldown_ms.unwrap_or(DEFAULT_EVENT_COOLDOWN_MS),
            ),
        };
        let api_addr = file
            .api
            .and_then(|api| api.addr)
            .unwrap_or_else(|| DEFAULT_API_ADDR.to_string());
        let retry_file = file.retry.unwrap_or_default();
        let retry = RetryPolicy {
            initial_backoff: Duration::from_millis(
                retry_file
                    .initial_backoff_ms
                    .unwrap_or(DEFAULT_INITIAL_BACKOFF_MS),
            ),
            max_backoff: Duration::from_millis(
                retry_file.max_backoff_ms.unwrap_or(DEFAULT_MAX_BACKOFF_MS),
            ),
        };
        Ok(Self {
            db_path,
            snapshot,
            poll_interval,
            frame,
            zones,
            posture,
            detector,
            sink,
            api_addr,
            retry,
            events,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = non_empty_env("ACTIVITY_DB_PATH") {
            self.db_path = path;
        }
        if let Some(url) = non_empty_env("ACTIVITY_SNAPSHOT_URL") {
            self.snapshot.url = url;
        }
        if let Some(user) = non_empty_env("ACTIVITY_SNAPSHOT_USER") {
            self.snapshot.username = Some(user);
        }
        if let Some(password) = non_empty_env("ACTIVITY_SNAPSHOT_PASSWORD") {
            self.snapshot.password = Some(password);
        }
        if let Some(addr) = non_empty_env("ACTIVITY_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(url) = non_empty_env("ACTIVITY_API_URL") {
            self.sink.api_url = url;
        }
        if let Some(url) = non_empty_env("ACTIVITY_EVENTS_URL") {
            self.sink.events_url = url;
        }
        if let Some(kind) = non_empty_env("ACTIVITY_SINK") {
            self.sink.kind = SinkKind::parse(&kind)?;
        }
        if let Some(poll) = non_empty_env("ACTIVITY_POLL_MS") {
            let millis: u64 = poll
                .parse()
                .map_err(|_| anyhow!("ACTIVITY_POLL_MS must be an integer number of milliseconds"))?;
            self.poll_interval = Duration::from_millis(millis);
        }
        if let Some(path) = non_empty_env("ACTIVITY_MODEL_PATH") {
            self.detector.model_path = Some(PathBuf::from(path));
            self.detector.backend = DetectorKind::Tract;
        }
        if let Some(allow) = non_empty_env("ACTIVITY_ALLOW_STUB_DETECTOR") {
            self.detector.allow_stub = parse_bool("ACTIVITY_ALLOW_STUB_DETECTOR", &allow)?;
        }
        if let Some(enabled) = non_empty_env("ACTIVITY_EVENTS") {
            self.events.enabled = parse_bool("ACTIVITY_EVENTS", &enabled)?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.zone_map()?;
        self.perception()?;
        if self.frame.width == 0 || self.frame.height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero"));
        }
        let (width, height) = (self.frame.width as f32, self.frame.height as f32);
        for zone in &self.zones {
            if zone.x1 < 0.0 || zone.y1 < 0.0 || zone.x2 > width || zone.y2 > height {
                return Err(anyhow!(
                    "zone '{}' ({}, {}) - ({}, {}) lies outside the {}x{} frame",
                    zone.name,
                    zone.x1,
                    zone.y1,
                    zone.x2,
                    zone.y2,
                    self.frame.width,
                    self.frame.height
                ));
            }
        }
        self.floor_object_config()?;
        if !(self.detector.confidence_threshold > 0.0 && self.detector.confidence_threshold <= 1.0)
        {
            return Err(anyhow!("detector confidence threshold must be in (0, 1]"));
        }
        if self.detector.backend == DetectorKind::Tract && self.detector.model_path.is_none() {
            return Err(anyhow!("tract detector requires detector.model_path"));
        }
        if self.retry.initial_backoff.is_zero() {
            return Err(anyhow!("initial backoff must be greater than zero"));
        }
        if self.retry.initial_backoff > self.retry.max_backoff {
            return Err(anyhow!("initial backoff must not exceed max backoff"));
        }
        Ok(())
    }

    /// Live capture needs a detector that can see a person. The stub never does,
    /// so it is refused unless `detector.allow_stub` is set.
    pub fn check_live_detector(&self) -> Result<()> {
        if self.detector.backend == DetectorKind::Stub && !self.detector.allow_stub {
            return Err(anyhow!(
                "live capture with the stub detector records nothing; configure detector.model_path \
                 or set detector.allow_stub (ACTIVITY_ALLOW_STUB_DETECTOR=1)"
            ));
        }
        Ok(())
    }

    pub fn zone_map(&self) -> Result<ZoneMap> {
        ZoneMap::new(self.zones.clone())
    }

    pub fn perception(&self) -> Result<Perception> {
        let classifier =
            ActivityClassifier::with_thresholds(self.posture, self.frame.height as f32)?;
        Ok(Perception::new(self.zone_map()?, classifier))
    }

    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            poll_interval: self.poll_interval,
            retry: self.retry,
        }
    }

    pub fn http_sink_config(&self) -> HttpSinkConfig {
        HttpSinkConfig {
            api_url: self.sink.api_url.clone(),
            events_url: self.sink.events_url.clone(),
            ..HttpSinkConfig::default()
        }
    }

    pub fn floor_object_config(&self) -> Result<FloorObjectConfig> {
        let ratio = self.events.floor_ratio;
        if !(ratio > 0.0 && ratio < 1.0) {
            return Err(anyhow!("events.floor_ratio must be within (0, 1)"));
        }
        Ok(FloorObjectConfig {
            floor_ratio: ratio,
            cooldown: chrono::Duration::from_std(self.events.cooldown)
                .map_err(|_| anyhow!("events.cooldown_ms is too large"))?,
            min_confidence: self.detector.confidence_threshold,
        })
    }

    pub fn yolo_params(&self) -> YoloParams {
        YoloParams {
            input_size: self.detector.input_size,
            conf_threshold: self.detector.confidence_threshold,
            ..YoloParams::default()
        }
    }

    #[cfg(feature = "ingest-snapshot")]
    pub fn snapshot_config(&self) -> crate::ingest::SnapshotConfig {
        crate::ingest::SnapshotConfig {
            url: self.snapshot.url.clone(),
            username: self.snapshot.username.clone(),
            password: self.snapshot.password.clone(),
            timeout: self.snapshot.timeout,
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("{} must be a boolean", key)),
    }
}

fn read_config_file(path: &Path) -> Result<TrackerdConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
