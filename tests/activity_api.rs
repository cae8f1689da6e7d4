use anyhow::Result;
use serde_json::Value;
use std::io::{Read, Write};
use std::net::TcpStream;
use tempfile::tempdir;

use activity_tracker::api::{ApiConfig, ApiHandle, ApiServer};
use activity_tracker::{
    EventSink, FloorObjectConfig, FloorObjectDetector, HttpEventSink, HttpIntervalSink,
    HttpSinkConfig, IntervalSink,
};

fn read_response(stream: &mut TcpStream) -> Result<(String, String)> {
    let mut response = String::new();
    stream.read_to_string(&mut response)?;
    let mut parts = response.splitn(2, "\r\n\r\n");
    let headers = parts.next().unwrap_or("").to_string();
    let body = parts.next().unwrap_or("").to_string();
    Ok((headers, body))
}

struct TestApi {
    _dir: tempfile::TempDir,
    api_handle: Option<ApiHandle>,
}

impl TestApi {
    fn new() -> Result<Self> {
        let dir = tempdir()?;
        let db_path = dir.path().join("activity.db");
        let api_config = ApiConfig {
            addr: "127.0.0.1:0".to_string(),
            db_path: db_path.to_string_lossy().to_string(),
        };
        let api_handle = ApiServer::new(api_config).spawn()?;
        Ok(Self {
            _dir: dir,
            api_handle: Some(api_handle),
        })
    }

    fn addr(&self) -> std::net::SocketAddr {
        self.api_handle.as_ref().expect("api handle").addr
    }

    fn request(&self, method: &str, path: &str, body: Option<&str>) -> Result<(String, Value)> {
        let mut stream = TcpStream::connect(self.addr())?;
        let body = body.unwrap_or("");
        let request = format!(
            "{method} {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {len}\r\n\r\n{body}",
            len = body.len()
        );
        stream.write_all(request.as_bytes())?;
        let (headers, body) = read_response(&mut stream)?;
        let value = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&body)?
        };
        Ok((headers, value))
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        if let Some(handle) = self.api_handle.take() {
            let _ = handle.stop();
        }
    }
}

#[test]
fn health_and_cors() -> Result<()> {
    let api = TestApi::new()?;
    let (headers, body) = api.request("GET", "/health", None)?;
    assert!(headers.starts_with("HTTP/1.1 200"));
    assert!(headers.contains("Access-Control-Allow-Origin: *"));
    assert_eq!(body["status"], "ok");
    Ok(())
}

#[test]
fn post_list_summary_and_stats() -> Result<()> {
    let api = TestApi::new()?;

    let posts = [
        r#"{"activity":"laptop_work","zone":"desk","timestamp":"2024-03-01T08:00:00","duration":3900}"#,
        r#"{"activity":"on_bed","zone":"bed","timestamp":"2024-03-01T09:05:00Z","duration":600,"confidence":0.8,"details":{"note":"nap"}}"#,
        r#"{"activity":"laptop_work","zone":"desk","timestamp":"2024-03-02T08:00:00Z"}"#,
    ];
    for (i, body) in posts.iter().enumerate() {
        let (headers, value) = api.request("POST", "/api/activities", Some(body))?;
        assert!(headers.starts_with("HTTP/1.1 200"), "{}", headers);
        assert_eq!(value["success"], true);
        assert_eq!(value["id"], i as i64 + 1);
    }

    let (_, listed) = api.request("GET", "/api/activities?date=2024-03-01", None)?;
    let listed = listed.as_array().expect("array");
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0]["activity"], "on_bed");
    assert_eq!(listed[0]["details"]["note"], "nap");
    assert_eq!(listed[1]["timestamp"], "2024-03-01T08:00:00Z");

    let (_, limited) = api.request("GET", "/api/activities?limit=1", None)?;
    assert_eq!(limited.as_array().expect("array").len(), 1);
    assert_eq!(limited[0]["timestamp"], "2024-03-02T08:00:00Z");
    assert!(limited[0]["duration"].is_null());

    let (_, summary) = api.request("GET", "/api/activities/summary?date=2024-03-01", None)?;
    assert_eq!(summary["date"], "2024-03-01");
    assert_eq!(summary["summary"]["laptop_work"]["total_time"], "1h 5m");
    assert_eq!(summary["summary"]["laptop_work"]["total_seconds"], 3900);
    assert_eq!(summary["summary"]["on_bed"]["count"], 1);

    let (_, stats) = api.request("GET", "/api/stats", None)?;
    assert_eq!(stats["activities"]["total"], 3);
    assert_eq!(stats["events"]["total"], 0);
    Ok(())
}

#[test]
fn huge_durations_do_not_take_the_api_down() -> Result<()> {
    let api = TestApi::new()?;
    let body = format!(
        r#"{{"activity":"on_bed","timestamp":"2024-03-01T08:00:00Z","duration":{}}}"#,
        i64::MAX
    );
    for _ in 0..2 {
        let (headers, _) = api.request("POST", "/api/activities", Some(&body))?;
        assert!(headers.starts_with("HTTP/1.1 200"), "{}", headers);
    }

    let (headers, summary) = api.request("GET", "/api/activities/summary?date=2024-03-01", None)?;
    assert!(headers.starts_with("HTTP/1.1 200"), "{}", headers);
    assert_eq!(summary["summary"]["on_bed"]["total_seconds"], i64::MAX);

    let (headers, body) = api.request("GET", "/health", None)?;
    assert!(headers.starts_with("HTTP/1.1 200"));
    assert_eq!(body["status"], "ok");
    Ok(())
}

#[test]
fn events_post_list_and_stats() -> Result<()> {
    let api = TestApi::new()?;
    let posts = [
        r#"{"type":"floor_object_detected","timestamp":"2024-03-01T08:00:00","object_count":1,"confidence":0.4,"metadata":{"frame_number":1}}"#,
        r#"{"type":"floor_object_detected","timestamp":"2024-03-01T08:00:06Z","object_count":3,"confidence":0.9}"#,
    ];
    for (i, body) in posts.iter().enumerate() {
        let (headers, value) = api.request("POST", "/api/events", Some(body))?;
        assert!(headers.starts_with("HTTP/1.1 200"), "{}", headers);
        assert_eq!(value["id"], i as i64 + 1);
    }
    let (headers, value) = api.request("POST", "/api/events", Some(r#"{"type":"","timestamp":"2024-03-01T08:00:00Z"}"#))?;
    assert!(headers.starts_with("HTTP/1.1 400"));
    assert_eq!(value["success"], false);

    let (_, events) = api.request("GET", "/api/events", None)?;
    let events = events.as_array().expect("array");
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["object_count"], 3);
    assert!(events[0]["details"].is_null());
    assert_eq!(events[1]["type"], "floor_object_detected");
    assert_eq!(events[1]["details"]["frame_number"], 1);

    let (_, limited) = api.request("GET", "/api/events?limit=1", None)?;
    assert_eq!(limited.as_array().expect("array").len(), 1);

    let (_, stats) = api.request("GET", "/api/stats", None)?;
    assert_eq!(stats["events"]["total"], 2);
    assert_eq!(stats["activities"]["total"], 0);
    Ok(())
}

#[test]
fn floor_events_reach_the_api_over_http() -> Result<()> {
    use activity_tracker::detect::{BoundingBox, Detection};

    let api = TestApi::new()?;
    let mut sink = HttpEventSink::new(HttpSinkConfig {
        events_url: format!("http://{}/api/events", api.addr()),
        ..HttpSinkConfig::default()
    })?;
    let mut floor = FloorObjectDetector::new(FloorObjectConfig::default())?;
    let shoe = Detection::new("shoe", 0.7, BoundingBox::new(100.0, 900.0, 200.0, 1000.0));
    let start: chrono::DateTime<chrono::Utc> =
        chrono::DateTime::parse_from_rfc3339("2024-03-01T08:00:00Z")?.into();
    for s in 0..8 {
        floor.observe_into(start + chrono::Duration::seconds(s), 1080, &[shoe.clone()], &mut sink)?;
    }
    sink.submit_event(&activity_tracker::NewDetectionEvent {
        event_type: "manual".to_string(),
        timestamp: start,
        object_count: None,
        confidence: None,
        metadata: None,
    })?;

    let (_, events) = api.request("GET", "/api/events", None)?;
    let events = events.as_array().expect("array");
    // stored at 0s and 6s; the manual event shares the first timestamp
    assert_eq!(events.len(), 3);
    assert_eq!(events[0]["timestamp"], "2024-03-01T08:00:06Z");
    assert_eq!(events[0]["details"]["objects"][0]["name"], "shoe");
    Ok(())
}

#[test]
fn rejects_bad_requests() -> Result<()> {
    let api = TestApi::new()?;

    let (headers, value) = api.request("POST", "/api/activities", Some(r#"{"zone":"desk"}"#))?;
    assert!(headers.starts_with("HTTP/1.1 400"));
    assert_eq!(value["success"], false);
    assert!(value["error"].is_string());

    let (headers, value) = api.request(
        "POST",
        "/api/activities",
        Some(r#"{"activity":"on_bed","timestamp":"2024-03-01T09:00:00Z","duration":-5}"#),
    )?;
    assert!(headers.starts_with("HTTP/1.1 400"));
    assert_eq!(value["success"], false);

    let (headers, _) = api.request("GET", "/api/activities?date=31-12-2024", None)?;
    assert!(headers.starts_with("HTTP/1.1 400"));
    let (headers, _) = api.request("PUT", "/api/activities", Some("{}"))?;
    assert!(headers.starts_with("HTTP/1.1 405"));
    let (headers, _) = api.request("GET", "/events", None)?;
    assert!(headers.starts_with("HTTP/1.1 404"));
    Ok(())
}

#[test]
fn http_sink_round_trips_through_api() -> Result<()> {
    let api = TestApi::new()?;
    let mut sink = HttpIntervalSink::new(HttpSinkConfig {
        api_url: format!("http://{}/api/activities", api.addr()),
        ..HttpSinkConfig::default()
    })?;
    let interval = activity_tracker::ActivityInterval {
        activity: "playing_piano".to_string(),
        zone: "piano".to_string(),
        start: chrono::DateTime::parse_from_rfc3339("2024-03-01T19:00:00Z")?.into(),
        duration_secs: 1800,
    };
    sink.submit(&interval)?;

    let (_, listed) = api.request("GET", "/api/activities", None)?;
    assert_eq!(listed[0]["activity"], "playing_piano");
    assert_eq!(listed[0]["zone"], "piano");
    assert_eq!(listed[0]["duration"], 1800);
    Ok(())
}
