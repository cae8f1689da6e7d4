use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, OpenFlags, Row};
use serde::{Deserialize, Serialize};

use crate::events::{DetectionEvent, EventSink, EventStore, NewDetectionEvent};
use crate::query::{
    day_bounds, deserialize_timestamp, summarize, ActivityStats, DailySummary, IntervalQuery,
};
use crate::segment::ActivityInterval;

/// Destination for closed activity intervals.
///
/// The tracker does not retry: an `Err` here means the interval is dropped.
pub trait IntervalSink {
    fn submit(&mut self, interval: &ActivityInterval) -> Result<()>;
}

/// Activity row as accepted by the store (API payload or a tracker interval).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewActivity {
    pub activity: String,
    #[serde(default)]
    pub zone: Option<String>,
    /// RFC 3339, or a naive ISO-8601 date-time taken as UTC.
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

impl NewActivity {
    fn validate(&self) -> Result<()> {
        if self.activity.trim().is_empty() {
            return Err(anyhow!("activity must not be empty"));
        }
        if let Some(duration) = self.duration {
            if duration < 0 {
                return Err(anyhow!("duration must be non-negative"));
            }
        }
        if let Some(confidence) = self.confidence {
            if !(0.0..=1.0).contains(&confidence) {
                return Err(anyhow!("confidence must be within 0..=1"));
            }
        }
        Ok(())
    }
}

impl From<&ActivityInterval> for NewActivity {
    fn from(interval: &ActivityInterval) -> Self {
        Self {
            activity: interval.activity.clone(),
            zone: Some(interval.zone.clone()),
            timestamp: interval.start,
            duration: Some(i64::try_from(interval.duration_secs).unwrap_or(i64::MAX)),
            confidence: None,
            details: None,
        }
    }
}

/// Persisted activity row.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ActivityRecord {
    pub id: i64,
    pub activity: String,
    pub zone: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub duration: Option<i64>,
    pub confidence: Option<f64>,
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing)]
    pub created_at: DateTime<Utc>,
}

/// Append + query surface over persisted activity rows.
pub trait ActivityStore {
    fn insert(&mut self, activity: &NewActivity) -> Result<i64>;

    /// Rows matching `query`, newest first.
    fn list(&self, query: &IntervalQuery) -> Result<Vec<ActivityRecord>>;

    /// Rows with `timestamp >= since`, or all rows.
    fn count_since(&self, since: Option<DateTime<Utc>>) -> Result<u64>;

    fn summary(&self, date: NaiveDate) -> Result<DailySummary> {
        let records = self.list(&IntervalQuery::for_date(date).with_limit(usize::MAX))?;
        Ok(summarize(date, &records))
    }

    fn stats(&self, now: DateTime<Utc>) -> Result<ActivityStats> {
        let (today_start, _) = day_bounds(now.date_naive());
        Ok(ActivityStats {
            today: self.count_since(Some(today_start))?,
            total: self.count_since(None)?,
        })
    }
}

/// Both logs behind one handle, as the API serves them.
pub trait LogStore: ActivityStore + EventStore {}

impl<T: ActivityStore + EventStore + ?Sized> LogStore for T {}

pub struct SqliteIntervalStore {
    conn: Connection,
}

impl SqliteIntervalStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = open_db_connection(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS activity_logs (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              activity TEXT NOT NULL,
              zone TEXT,
              timestamp TEXT NOT NULL,
              duration INTEGER,
              confidence REAL,
              details TEXT,
              created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_activity_logs_timestamp ON activity_logs(timestamp);

            CREATE TABLE IF NOT EXISTS detection_events (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              type TEXT NOT NULL,
              timestamp TEXT NOT NULL,
              object_count INTEGER,
              confidence REAL,
              details TEXT,
              created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_detection_events_timestamp ON detection_events(timestamp);
            "#,
        )?;
        Ok(())
    }
}

impl ActivityStore for SqliteIntervalStore {
    fn insert(&mut self, activity: &NewActivity) -> Result<i64> {
        activity.validate()?;
        let details = activity
            .details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.conn.execute(
            r#"
            INSERT INTO activity_logs(activity, zone, timestamp, duration, confidence, details, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                activity.activity,
                activity.zone,
                db_timestamp(activity.timestamp),
                activity.duration,
                activity.confidence,
                details,
                db_timestamp(Utc::now()),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn list(&self, query: &IntervalQuery) -> Result<Vec<ActivityRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, activity, zone, timestamp, duration, confidence, details, created_at
            FROM activity_logs
            WHERE (?1 IS NULL OR timestamp >= ?1) AND (?2 IS NULL OR timestamp < ?2)
            ORDER BY timestamp DESC, id DESC
            LIMIT ?3
            "#,
        )?;
        let rows = stmt.query_map(
            params![
                query.from.map(db_timestamp),
                query.to.map(db_timestamp),
                i64::try_from(query.limit).unwrap_or(i64::MAX),
            ],
            row_to_record,
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn count_since(&self, since: Option<DateTime<Utc>>) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM activity_logs WHERE (?1 IS NULL OR timestamp >= ?1)",
            params![since.map(db_timestamp)],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }
}

impl IntervalSink for SqliteIntervalStore {
    fn submit(&mut self, interval: &ActivityInterval) -> Result<()> {
        self.insert(&NewActivity::from(interval)).map(|_| ())
    }
}

impl EventStore for SqliteIntervalStore {
    fn insert_event(&mut self, event: &NewDetectionEvent) -> Result<i64> {
        event.validate()?;
        let details = event
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.conn.execute(
            r#"
            INSERT INTO detection_events(type, timestamp, object_count, confidence, details, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                event.event_type,
                db_timestamp(event.timestamp),
                event.object_count,
                event.confidence,
                details,
                db_timestamp(Utc::now()),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn list_events(&self, limit: usize) -> Result<Vec<DetectionEvent>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, type, timestamp, object_count, confidence, details, created_at
            FROM detection_events
            ORDER BY timestamp DESC, id DESC
            LIMIT ?1
            "#,
        )?;
        let rows = stmt.query_map(
            params![i64::try_from(limit).unwrap_or(i64::MAX)],
            row_to_event,
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn count_events_since(&self, since: Option<DateTime<Utc>>) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM detection_events WHERE (?1 IS NULL OR timestamp >= ?1)",
            params![since.map(db_timestamp)],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }
}

impl EventSink for SqliteIntervalStore {
    fn submit_event(&mut self, event: &NewDetectionEvent) -> Result<()> {
        self.insert_event(event).map(|_| ())
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryIntervalStore {
    records: Vec<ActivityRecord>,
    events: Vec<DetectionEvent>,
}

impl InMemoryIntervalStore {
    pub fn records(&self) -> &[ActivityRecord] {
        &self.records
    }

    pub fn events(&self) -> &[DetectionEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl ActivityStore for InMemoryIntervalStore {
    fn insert(&mut self, activity: &NewActivity) -> Result<i64> {
        activity.validate()?;
        let id = self.records.len() as i64 + 1;
        self.records.push(ActivityRecord {
            id,
            activity: activity.activity.clone(),
            zone: activity.zone.clone(),
            timestamp: activity.timestamp,
            duration: activity.duration,
            confidence: activity.confidence,
            details: activity.details.clone(),
            created_at: Utc::now(),
        });
        Ok(id)
    }

    fn list(&self, query: &IntervalQuery) -> Result<Vec<ActivityRecord>> {
        let mut out: Vec<ActivityRecord> = self
            .records
            .iter()
            .filter(|record| query.matches(record.timestamp))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        out.truncate(query.limit);
        Ok(out)
    }

    fn count_since(&self, since: Option<DateTime<Utc>>) -> Result<u64> {
        Ok(self
            .records
            .iter()
            .filter(|record| since.map_or(true, |since| record.timestamp >= since))
            .count() as u64)
    }
}

impl IntervalSink for InMemoryIntervalStore {
    fn submit(&mut self, interval: &ActivityInterval) -> Result<()> {
        self.insert(&NewActivity::from(interval)).map(|_| ())
    }
}

impl EventStore for InMemoryIntervalStore {
    fn insert_event(&mut self, event: &NewDetectionEvent) -> Result<i64> {
        event.validate()?;
        let id = self.events.len() as i64 + 1;
        self.events.push(DetectionEvent {
            id,
            event_type: event.event_type.clone(),
            timestamp: event.timestamp,
            object_count: event.object_count,
            confidence: event.confidence,
            details: event.metadata.clone(),
            created_at: Utc::now(),
        });
        Ok(id)
    }

    fn list_events(&self, limit: usize) -> Result<Vec<DetectionEvent>> {
        let mut out = self.events.clone();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
        out.truncate(limit);
        Ok(out)
    }

    fn count_events_since(&self, since: Option<DateTime<Utc>>) -> Result<u64> {
        Ok(self
            .events
            .iter()
            .filter(|event| since.map_or(true, |since| event.timestamp >= since))
            .count() as u64)
    }
}

impl EventSink for InMemoryIntervalStore {
    fn submit_event(&mut self, event: &NewDetectionEvent) -> Result<()> {
        self.insert_event(event).map(|_| ())
    }
}

impl<S: IntervalSink + ?Sized> IntervalSink for Box<S> {
    fn submit(&mut self, interval: &ActivityInterval) -> Result<()> {
        (**self).submit(interval)
    }
}

/// Open a connection; `file:` paths are treated as SQLite URIs (shared memory dbs).
fn open_db_connection(db_path: &str) -> Result<Connection> {
    if db_path.starts_with("file:") {
        return Ok(Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?);
    }
    Ok(Connection::open(db_path)?)
}

/// Fixed-width UTC text so string order matches time order.
fn db_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_db_timestamp(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn json_column(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<serde_json::Value>> {
    raw.map(|raw| {
        serde_json::from_str(&raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    })
    .transpose()
}

fn row_to_event(row: &Row) -> rusqlite::Result<DetectionEvent> {
    let timestamp: String = row.get(2)?;
    let created_at: String = row.get(6)?;
    Ok(DetectionEvent {
        id: row.get(0)?,
        event_type: row.get(1)?,
        timestamp: parse_db_timestamp(2, &timestamp)?,
        object_count: row.get(3)?,
        confidence: row.get(4)?,
        details: json_column(5, row.get(5)?)?,
        created_at: parse_db_timestamp(6, &created_at)?,
    })
}

fn row_to_record(row: &Row) -> rusqlite::Result<ActivityRecord> {
    let timestamp: String = row.get(3)?;
    let created_at: String = row.get(7)?;
    let details = json_column(6, row.get(6)?)?;
    Ok(ActivityRecord {
        id: row.get(0)?,
        activity: row.get(1)?,
        zone: row.get(2)?,
        timestamp: parse_db_timestamp(3, &timestamp)?,
        duration: row.get(4)?,
        confidence: row.get(5)?,
        details,
        created_at: parse_db_timestamp(7, &created_at)?,
    })
}
