//! Detection events.
//!
//! Events are point-in-time records kept next to the activity log, not part of
//! segmentation. The one producer today is [`FloorObjectDetector`]: anything whose
//! box reaches into the lower part of the frame counts as lying on the floor, and
//! at most one event is stored per cooldown window.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::detect::Detection;
use crate::query::{day_bounds, deserialize_timestamp, ActivityStats};

pub const FLOOR_OBJECT_EVENT: &str = "floor_object_detected";
pub const DEFAULT_EVENT_LIMIT: usize = 50;

/// Event as accepted by the store (API payload or a producer).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewDetectionEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub object_count: Option<i64>,
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Stored and listed as `details`.
    #[serde(default, alias = "details")]
    pub metadata: Option<serde_json::Value>,
}

impl NewDetectionEvent {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.event_type.trim().is_empty() {
            return Err(anyhow!("event type must not be empty"));
        }
        if let Some(count) = self.object_count {
            if count < 0 {
                return Err(anyhow!("object_count must be non-negative"));
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

/// Persisted event row.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectionEvent {
    pub id: i64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub object_count: Option<i64>,
    pub confidence: Option<f64>,
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing)]
    pub created_at: DateTime<Utc>,
}

pub trait EventStore {
    fn insert_event(&mut self, event: &NewDetectionEvent) -> Result<i64>;

    /// Newest first.
    fn list_events(&self, limit: usize) -> Result<Vec<DetectionEvent>>;

    /// Events with `timestamp >= since`, or all events.
    fn count_events_since(&self, since: Option<DateTime<Utc>>) -> Result<u64>;

    fn event_stats(&self, now: DateTime<Utc>) -> Result<ActivityStats> {
        let (today_start, _) = day_bounds(now.date_naive());
        Ok(ActivityStats {
            today: self.count_events_since(Some(today_start))?,
            total: self.count_events_since(None)?,
        })
    }
}

/// Destination for produced events. No retries; `Err` means not stored.
pub trait EventSink {
    fn submit_event(&mut self, event: &NewDetectionEvent) -> Result<()>;
}

impl<S: EventSink + ?Sized> EventSink for Box<S> {
    fn submit_event(&mut self, event: &NewDetectionEvent) -> Result<()> {
        (**self).submit_event(event)
    }
}

#[derive(Clone, Debug)]
pub struct FloorObjectConfig {
    /// Boxes whose bottom edge lies below `floor_ratio * frame_height` are on the floor.
    pub floor_ratio: f32,
    /// Minimum gap between stored events.
    pub cooldown: Duration,
    pub min_confidence: f32,
}

impl Default for FloorObjectConfig {
    fn default() -> Self {
        Self {
            floor_ratio: 0.5,
            cooldown: Duration::seconds(5),
            min_confidence: 0.25,
        }
    }
}

/// Turns per-frame detections into `floor_object_detected` events.
///
/// The cooldown starts only once an event was actually stored, so a failed
/// submission is retried on the next frame that still shows floor objects.
#[derive(Clone, Debug)]
pub struct FloorObjectDetector {
    config: FloorObjectConfig,
    last_stored: Option<DateTime<Utc>>,
    frames: u64,
}

impl FloorObjectDetector {
    pub fn new(config: FloorObjectConfig) -> Result<Self> {
        if !(config.floor_ratio > 0.0 && config.floor_ratio < 1.0) {
            return Err(anyhow!("floor ratio must be within (0, 1)"));
        }
        if config.cooldown < Duration::zero() {
            return Err(anyhow!("event cooldown must not be negative"));
        }
        Ok(Self {
            config,
            last_stored: None,
            frames: 0,
        })
    }

    /// Event candidate for one frame; `None` when nothing is on the floor or the
    /// cooldown has not elapsed. Every call counts as one frame.
    pub fn observe(
        &mut self,
        at: DateTime<Utc>,
        frame_height: u32,
        detections: &[Detection],
    ) -> Option<NewDetectionEvent> {
        self.frames += 1;
        let floor_line = frame_height as f32 * self.config.floor_ratio;
        let on_floor: Vec<&Detection> = detections
            .iter()
            .filter(|d| d.confidence >= self.config.min_confidence && d.bbox.y2 > floor_line)
            .collect();
        if on_floor.is_empty() || !self.cooled_down(at) {
            return None;
        }

        let objects: Vec<serde_json::Value> = on_floor
            .iter()
            .map(|d| {
                let position: [i64; 4] = [
                    d.bbox.x1 as i64,
                    d.bbox.y1 as i64,
                    d.bbox.x2 as i64,
                    d.bbox.y2 as i64,
                ];
                json!({
                    "name": d.label,
                    "confidence": d.confidence,
                    "position": position,
                })
            })
            .collect();
        let confidence = on_floor
            .iter()
            .map(|d| f64::from(d.confidence))
            .fold(0.0, f64::max)
            .min(1.0);
        Some(NewDetectionEvent {
            event_type: FLOOR_OBJECT_EVENT.to_string(),
            timestamp: at,
            object_count: Some(on_floor.len() as i64),
            confidence: Some(confidence),
            metadata: Some(json!({
                "objects": objects,
                "frame_number": self.frames,
            })),
        })
    }

    pub fn mark_stored(&mut self, at: DateTime<Utc>) {
        self.last_stored = Some(at);
    }

    /// `observe`, then hand any event to `sink`. `Ok(true)` when one was stored.
    pub fn observe_into<S: EventSink + ?Sized>(
        &mut self,
        at: DateTime<Utc>,
        frame_height: u32,
        detections: &[Detection],
        sink: &mut S,
    ) -> Result<bool> {
        let Some(event) = self.observe(at, frame_height, detections) else {
            return Ok(false);
        };
        sink.submit_event(&event)?;
        log::info!(
            "{} stored: {} objects at {}",
            event.event_type,
            event.object_count.unwrap_or(0),
            at.to_rfc3339()
        );
        self.mark_stored(at);
        Ok(true)
    }

    fn cooled_down(&self, at: DateTime<Utc>) -> bool {
        self.last_stored
            .map_or(true, |last| at - last > self.config.cooldown)
    }
}
