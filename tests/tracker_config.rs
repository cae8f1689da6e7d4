use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use activity_tracker::config::{DetectorKind, SinkKind, TrackerdConfig};
use activity_tracker::{ActivitySample, Observation, Point};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "ACTIVITY_CONFIG",
        "ACTIVITY_DB_PATH",
        "ACTIVITY_SNAPSHOT_URL",
        "ACTIVITY_SNAPSHOT_USER",
        "ACTIVITY_SNAPSHOT_PASSWORD",
        "ACTIVITY_API_ADDR",
        "ACTIVITY_API_URL",
        "ACTIVITY_SINK",
        "ACTIVITY_POLL_MS",
        "ACTIVITY_MODEL_PATH",
        "ACTIVITY_EVENTS_URL",
        "ACTIVITY_EVENTS",
        "ACTIVITY_ALLOW_STUB_DETECTOR",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = TrackerdConfig::load().expect("load defaults");
    assert_eq!(cfg.db_path, "activity.db");
    assert_eq!(cfg.poll_interval, Duration::from_millis(500));
    assert_eq!(cfg.snapshot.timeout, Duration::from_secs(5));
    assert_eq!(cfg.sink.kind, SinkKind::Sqlite);
    assert_eq!(cfg.detector.backend, DetectorKind::Stub);
    assert!(!cfg.detector.allow_stub);
    assert!(cfg.check_live_detector().is_err());
    assert!(cfg.events.enabled);
    assert_eq!(cfg.events.cooldown, Duration::from_secs(5));
    assert_eq!(cfg.sink.events_url, "http://127.0.0.1:8000/api/events");
    let floor = cfg.floor_object_config().unwrap();
    assert_eq!(floor.floor_ratio, 0.5);
    assert_eq!(floor.cooldown, chrono::Duration::seconds(5));
    let names: Vec<_> = cfg.zones.iter().map(|z| z.name.as_str()).collect();
    assert_eq!(names, vec!["desk", "piano", "bed"]);

    clear_env();
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{
            "db_path": "/var/lib/activity/log.db",
            "snapshot": {
                "url": "http://cam.local/shot.jpg",
                "username": "viewer",
                "timeout_secs": 3
            },
            "poll": { "interval_ms": 250 },
            "frame": { "width": 1280, "height": 720 },
            "zones": [
                { "name": "desk", "x1": 0, "y1": 0, "x2": 640, "y2": 720 },
                { "name": "bed", "x1": 640, "y1": 0, "x2": 1280, "y2": 720 }
            ],
            "posture": { "bed_lying_ratio": 0.7 },
            "sink": { "kind": "http" },
            "api": { "addr": "0.0.0.0:9000" },
            "retry": { "initial_backoff_ms": 200, "max_backoff_ms": 5000 }
        }"#,
    );

    std::env::set_var("ACTIVITY_CONFIG", file.path());
    std::env::set_var("ACTIVITY_SNAPSHOT_PASSWORD", "hunter2");
    std::env::set_var("ACTIVITY_API_URL", "http://tracker.local:8000/api/activities");
    std::env::set_var("ACTIVITY_POLL_MS", "1000");

    let cfg = TrackerdConfig::load().expect("load config");

    assert_eq!(cfg.db_path, "/var/lib/activity/log.db");
    assert_eq!(cfg.snapshot.url, "http://cam.local/shot.jpg");
    assert_eq!(cfg.snapshot.username.as_deref(), Some("viewer"));
    assert_eq!(cfg.snapshot.password.as_deref(), Some("hunter2"));
    assert_eq!(cfg.snapshot.timeout, Duration::from_secs(3));
    assert_eq!(cfg.poll_interval, Duration::from_millis(1000));
    assert_eq!(cfg.frame.height, 720);
    assert_eq!(cfg.zones.len(), 2);
    assert_eq!(cfg.posture.bed_lying_ratio, 0.7);
    assert_eq!(cfg.posture.desk_seated_ratio, 0.5);
    assert_eq!(cfg.sink.kind, SinkKind::Http);
    assert_eq!(cfg.sink.api_url, "http://tracker.local:8000/api/activities");
    assert_eq!(cfg.api_addr, "0.0.0.0:9000");
    assert_eq!(cfg.retry.initial_backoff, Duration::from_millis(200));
    assert_eq!(cfg.retry.max_backoff, Duration::from_secs(5));

    let zones = cfg.zone_map().unwrap();
    assert_eq!(zones.classify(Point::new(900.0, 100.0)), "bed");
    assert_eq!(zones.classify(Point::new(1500.0, 100.0)), "other");

    // Posture ratios follow the configured frame height.
    let perception = cfg.perception().unwrap();
    let obs: Observation = serde_json::from_str(
        r#"{"timestamp":"2024-03-01T22:00:00Z","person_box":{"x1":700,"y1":100,"x2":1000,"y2":650}}"#,
    )
    .unwrap();
    assert_eq!(
        perception.sample(&obs),
        ActivitySample::new("lying_on_bed", "bed", obs.timestamp)
    );

    clear_env();
}

#[test]
fn rejects_invalid_configuration() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cases = [
        r#"{ "zones": [ { "name": "other", "x1": 0, "y1": 0, "x2": 10, "y2": 10 } ] }"#,
        r#"{ "zones": [ { "name": "Desk Area", "x1": 0, "y1": 0, "x2": 10, "y2": 10 } ] }"#,
        r#"{ "zones": [ { "name": "desk", "x1": 10, "y1": 0, "x2": 0, "y2": 10 } ] }"#,
        r#"{ "posture": { "desk_seated_ratio": 0.0 } }"#,
        r#"{ "retry": { "initial_backoff_ms": 5000, "max_backoff_ms": 100 } }"#,
        r#"{ "sink": { "kind": "kafka" } }"#,
        r#"{ "detector": { "backend": "tract" } }"#,
        r#"{ "db_path": 7 }"#,
        r#"{ "frame": { "width": 1280, "height": 720 } }"#,
        r#"{ "zones": [ { "name": "desk", "x1": 0, "y1": 0, "x2": 2000, "y2": 10 } ] }"#,
        r#"{ "zones": [ { "name": "desk", "x1": -5, "y1": 0, "x2": 10, "y2": 10 } ] }"#,
        r#"{ "events": { "floor_ratio": 1.0 } }"#,
    ];
    for json in cases {
        let file = write_config(json);
        std::env::set_var("ACTIVITY_CONFIG", file.path());
        assert!(TrackerdConfig::load().is_err(), "accepted: {}", json);
    }

    clear_env();
    std::env::set_var("ACTIVITY_POLL_MS", "fast");
    assert!(TrackerdConfig::load().is_err());

    clear_env();
    std::env::set_var("ACTIVITY_ALLOW_STUB_DETECTOR", "maybe");
    assert!(TrackerdConfig::load().is_err());

    clear_env();
}

#[test]
fn stub_detector_needs_opt_in_for_live_capture() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = write_config(
        r#"{ "detector": { "allow_stub": true }, "events": { "enabled": false, "cooldown_ms": 1500 } }"#,
    );
    std::env::set_var("ACTIVITY_CONFIG", file.path());
    let cfg = TrackerdConfig::load().expect("load config");
    assert!(cfg.check_live_detector().is_ok());
    assert!(!cfg.events.enabled);
    assert_eq!(cfg.events.cooldown, Duration::from_millis(1500));

    clear_env();
    std::env::set_var("ACTIVITY_ALLOW_STUB_DETECTOR", "1");
    std::env::set_var("ACTIVITY_EVENTS_URL", "http://tracker.local:8000/api/events");
    let cfg = TrackerdConfig::load().expect("load config");
    assert!(cfg.check_live_detector().is_ok());
    assert_eq!(cfg.http_sink_config().events_url, "http://tracker.local:8000/api/events");

    clear_env();
}

#[test]
fn model_path_selects_tract_backend() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("ACTIVITY_MODEL_PATH", "/opt/models/yolov8n.onnx");
    let cfg = TrackerdConfig::load().expect("load config");
    assert_eq!(cfg.detector.backend, DetectorKind::Tract);
    assert!(cfg.check_live_detector().is_ok());
    assert_eq!(
        cfg.detector.model_path.as_deref(),
        Some(std::path::Path::new("/opt/models/yolov8n.onnx"))
    );

    clear_env();
}
