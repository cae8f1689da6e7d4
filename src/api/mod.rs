//! Activity log HTTP API.
//!
//! A small blocking HTTP/1.1 server over `TcpListener`, one request per
//! connection. Routes:
//!
//! - `GET  /health`
//! - `POST /api/activities`
//! - `GET  /api/activities?limit=N&date=YYYY-MM-DD`
//! - `GET  /api/activities/summary?date=YYYY-MM-DD`
//! - `POST /api/events`
//! - `GET  /api/events?limit=N`
//! - `GET  /api/stats`
//!
//! Every response carries `Access-Control-Allow-Origin: *` so a browser
//! dashboard on another port can read it.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::Utc;
use serde_json::json;

use crate::events::{EventStore, NewDetectionEvent, DEFAULT_EVENT_LIMIT};
use crate::query::{parse_date, IntervalQuery, DEFAULT_LIST_LIMIT};
use crate::storage::{ActivityStore, LogStore, NewActivity, SqliteIntervalStore};

const MAX_HEADER_BYTES: usize = 8192;
const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub db_path: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8000".to_string(),
            db_path: "activity.db".to_string(),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }

    /// Block until the server thread exits.
    pub fn wait(mut self) -> Result<()> {
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig) -> Self {
        Self { cfg }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        // Open once up front so schema problems surface to the caller.
        let store = SqliteIntervalStore::open(&self.cfg.db_path)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, store, shutdown_thread) {
                log::error!("activity api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    mut store: SqliteIntervalStore,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    handle_connection(stream, &mut store)
                }));
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => log::warn!("activity api request failed: {}", err),
                    Err(_) => log::error!("activity api request handler panicked"),
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, store: &mut dyn LogStore) -> Result<()> {
    stream.set_nonblocking(false)?;
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            write_json(&mut stream, 400, &json!({"error": "bad_request"}))?;
            return Err(err);
        }
    };
    log::debug!("{} {}", request.method, request.raw_path);

    let (status, body) = route(&request, store);
    write_json(&mut stream, status, &body)
}

fn route(request: &HttpRequest, store: &mut dyn LogStore) -> (u16, serde_json::Value) {
    let allowed: &[&str] = match request.path.as_str() {
        "/health" | "/api/activities/summary" | "/api/stats" => &["GET"],
        "/api/activities" | "/api/events" => &["GET", "POST"],
        _ => return (404, json!({"error": "not_found"})),
    };
    if !allowed.contains(&request.method.as_str()) {
        return (405, json!({"error": "method_not_allowed"}));
    }

    let result = match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") => Ok((200, json!({"status": "ok"}))),
        ("POST", "/api/activities") => return create_activity(request, store),
        ("GET", "/api/activities") => list_activities(request, store),
        ("GET", "/api/activities/summary") => activity_summary(request, store),
        ("POST", "/api/events") => return create_event(request, store),
        ("GET", "/api/events") => list_events(request, store),
        _ => stats(store),
    };
    result.unwrap_or_else(|err| {
        log::warn!("activity api {} failed: {:#}", request.path, err);
        (500, json!({"error": "internal_error"}))
    })
}

fn create_activity(
    request: &HttpRequest,
    store: &mut dyn LogStore,
) -> (u16, serde_json::Value) {
    let activity: NewActivity = match serde_json::from_slice(&request.body) {
        Ok(activity) => activity,
        Err(err) => return (400, json!({"success": false, "error": err.to_string()})),
    };
    match store.insert(&activity) {
        Ok(id) => {
            log::info!(
                "activity #{} stored: {} ({}s)",
                id,
                activity.activity,
                activity.duration.unwrap_or(0)
            );
            (200, json!({"success": true, "id": id}))
        }
        Err(err) => {
            log::warn!("activity rejected: {:#}", err);
            (400, json!({"success": false, "error": err.to_string()}))
        }
    }
}

fn list_activities(
    request: &HttpRequest,
    store: &mut dyn LogStore,
) -> Result<(u16, serde_json::Value)> {
    let limit = match query_limit(request, DEFAULT_LIST_LIMIT) {
        Some(limit) => limit,
        None => return Ok((400, json!({"error": "invalid_limit"}))),
    };
    let query = match request.query.get("date") {
        Some(raw) => match parse_date(raw) {
            Ok(date) => IntervalQuery::for_date(date),
            Err(_) => return Ok((400, json!({"error": "invalid_date"}))),
        },
        None => IntervalQuery::default(),
    }
    .with_limit(limit);
    let records = store.list(&query)?;
    Ok((200, serde_json::to_value(records)?))
}

fn activity_summary(
    request: &HttpRequest,
    store: &mut dyn LogStore,
) -> Result<(u16, serde_json::Value)> {
    let date = match request.query.get("date") {
        Some(raw) => match parse_date(raw) {
            Ok(date) => date,
            Err(_) => return Ok((400, json!({"error": "invalid_date"}))),
        },
        None => Utc::now().date_naive(),
    };
    let summary = store.summary(date)?;
    Ok((200, serde_json::to_value(summary)?))
}

fn create_event(request: &HttpRequest, store: &mut dyn LogStore) -> (u16, serde_json::Value) {
    let event: NewDetectionEvent = match serde_json::from_slice(&request.body) {
        Ok(event) => event,
        Err(err) => return (400, json!({"success": false, "error": err.to_string()})),
    };
    match store.insert_event(&event) {
        Ok(id) => {
            log::info!("event #{} stored: {}", id, event.event_type);
            (200, json!({"success": true, "id": id}))
        }
        Err(err) => {
            log::warn!("event rejected: {:#}", err);
            (400, json!({"success": false, "error": err.to_string()}))
        }
    }
}

fn list_events(
    request: &HttpRequest,
    store: &mut dyn LogStore,
) -> Result<(u16, serde_json::Value)> {
    let limit = match query_limit(request, DEFAULT_EVENT_LIMIT) {
        Some(limit) => limit,
        None => return Ok((400, json!({"error": "invalid_limit"}))),
    };
    let events = store.list_events(limit)?;
    Ok((200, serde_json::to_value(events)?))
}

fn stats(store: &mut dyn LogStore) -> Result<(u16, serde_json::Value)> {
    let now = Utc::now();
    let events = store.event_stats(now)?;
    let activities = store.stats(now)?;
    Ok((200, json!({ "events": events, "activities": activities })))
}

/// `None` when `limit` is present but not a non-negative integer.
fn query_limit(request: &HttpRequest, default: usize) -> Option<usize> {
    match request.query.get("limit") {
        Some(raw) => raw.parse::<usize>().ok(),
        None => Some(default),
    }
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before headers"));
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(anyhow!("request headers too large"));
        }
    };

    let head = String::from_utf8_lossy(&data[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }

    let content_length = match headers.get("content-length") {
        Some(value) => value
            .parse::<usize>()
            .map_err(|_| anyhow!("invalid content-length"))?,
        None => 0,
    };
    if content_length > MAX_BODY_BYTES {
        return Err(anyhow!("request body too large"));
    }
    let mut body = data[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed mid-body"));
        }
        body.extend_from_slice(&buf[..n]);
    }
    body.truncate(content_length);

    let (path, query) = match raw_path.split_once('?') {
        Some((path, query)) => (path, query),
        None => (raw_path, ""),
    };
    let query = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();
    Ok(HttpRequest {
        method: method.to_string(),
        path: path.to_string(),
        raw_path: raw_path.to_string(),
        query,
        body,
    })
}

fn write_json(stream: &mut TcpStream, status: u16, body: &serde_json::Value) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    write_response(stream, status, "application/json", &payload)
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nAccess-Control-Allow-Origin: *\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status_line = status_line,
        content_type = content_type,
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    raw_path: String,
    query: HashMap<String, String>,
    body: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryIntervalStore;

    fn request(method: &str, raw_path: &str, body: &str) -> HttpRequest {
        let (path, query) = raw_path.split_once('?').unwrap_or((raw_path, ""));
        HttpRequest {
            method: method.to_string(),
            path: path.to_string(),
            raw_path: raw_path.to_string(),
            query: url::form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect(),
            body: body.as_bytes().to_vec(),
        }
    }

    #[test]
    fn routes_reject_unknown_paths_and_methods() {
        let mut store = InMemoryIntervalStore::default();
        assert_eq!(route(&request("GET", "/nope", ""), &mut store).0, 404);
        assert_eq!(route(&request("DELETE", "/api/activities", ""), &mut store).0, 405);
        assert_eq!(route(&request("POST", "/api/stats", ""), &mut store).0, 405);
        assert_eq!(route(&request("GET", "/health", ""), &mut store).0, 200);
    }

    #[test]
    fn create_then_list_by_date() {
        let mut store = InMemoryIntervalStore::default();
        let (status, body) = route(
            &request(
                "POST",
                "/api/activities",
                r#"{"activity":"on_bed","zone":"bed","timestamp":"2024-03-01T23:30:00","duration":600}"#,
            ),
            &mut store,
        );
        assert_eq!(status, 200);
        assert_eq!(body, json!({"success": true, "id": 1}));

        let (status, body) = route(&request("GET", "/api/activities?date=2024-03-01", ""), &mut store);
        assert_eq!(status, 200);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["activity"], "on_bed");
        assert_eq!(body[0]["duration"], 600);

        let (_, body) = route(&request("GET", "/api/activities?date=2024-03-02", ""), &mut store);
        assert!(body.as_array().unwrap().is_empty());
    }

    #[test]
    fn events_are_stored_listed_and_counted() {
        let mut store = InMemoryIntervalStore::default();
        let (status, body) = route(
            &request(
                "POST",
                "/api/events",
                r#"{"type":"floor_object_detected","timestamp":"2024-03-01T08:00:00","object_count":2,"confidence":0.7,"metadata":{"frame_number":4}}"#,
            ),
            &mut store,
        );
        assert_eq!(status, 200);
        assert_eq!(body, json!({"success": true, "id": 1}));

        let (status, body) = route(&request("GET", "/api/events", ""), &mut store);
        assert_eq!(status, 200);
        assert_eq!(body[0]["type"], "floor_object_detected");
        assert_eq!(body[0]["object_count"], 2);
        assert_eq!(body[0]["details"]["frame_number"], 4);

        let (status, body) = route(&request("GET", "/api/stats", ""), &mut store);
        assert_eq!(status, 200);
        assert_eq!(body["events"]["total"], 1);
        assert_eq!(body["activities"]["total"], 0);

        let (status, body) = route(&request("POST", "/api/events", r#"{"timestamp":"x"}"#), &mut store);
        assert_eq!(status, 400);
        assert_eq!(body["success"], false);
        assert_eq!(route(&request("GET", "/api/events?limit=-1", ""), &mut store).0, 400);
        assert_eq!(route(&request("DELETE", "/api/events", ""), &mut store).0, 405);
    }

    #[test]
    fn summary_of_huge_durations_still_answers() {
        let mut store = InMemoryIntervalStore::default();
        let body = format!(
            r#"{{"activity":"on_bed","timestamp":"2024-03-01T08:00:00Z","duration":{}}}"#,
            i64::MAX
        );
        for _ in 0..2 {
            assert_eq!(route(&request("POST", "/api/activities", &body), &mut store).0, 200);
        }
        let (status, body) = route(&request("GET", "/api/activities/summary?date=2024-03-01", ""), &mut store);
        assert_eq!(status, 200);
        assert_eq!(body["summary"]["on_bed"]["total_seconds"], i64::MAX);
        assert_eq!(body["summary"]["on_bed"]["count"], 2);
    }

    #[test]
    fn malformed_input_is_400() {
        let mut store = InMemoryIntervalStore::default();
        let (status, body) = route(&request("POST", "/api/activities", "{"), &mut store);
        assert_eq!(status, 400);
        assert_eq!(body["success"], false);

        let (status, _) = route(&request("GET", "/api/activities?limit=abc", ""), &mut store);
        assert_eq!(status, 400);
        let (status, _) = route(&request("GET", "/api/activities/summary?date=soon", ""), &mut store);
        assert_eq!(status, 400);
    }
}
