//! Activity tracker
//!
//! Turns periodic camera snapshots of a single room into a log of what the
//! occupant was doing and for how long.
//!
//! # Pipeline
//!
//! 1. **Ingest**: a `FrameSource` yields decoded frames; `DetectingSource` runs a
//!    detector backend over them and produces `Observation`s (or `ReplaySource`
//!    reads recorded ones).
//! 2. **Perception**: the person box center picks a zone, and the zone's rule
//!    table picks an activity label from visible objects and posture.
//! 3. **Segmentation**: `ActivityTracker` collapses the per-frame samples into
//!    intervals, emitting one only when the activity changes or on flush.
//! 4. **Sink**: closed intervals go to SQLite, memory, or the HTTP API.
//!
//! Alongside the pipeline, `FloorObjectDetector` turns the same detections into
//! rate-limited `floor_object_detected` events, stored next to the activity log.
//!
//! # Module Structure
//!
//! - `zone`, `activity`, `observation`: per-frame classification
//! - `segment`: the segmentation state machine
//! - `storage`, `transport`, `query`: interval persistence and read side
//! - `events`: detection events and the floor-object producer
//! - `detect`, `ingest`, `frame`: detection backends and sources
//! - `driver`: polling loop with retry
//! - `api`, `config`: service surfaces

pub mod activity;
pub mod api;
pub mod config;
pub mod detect;
pub mod driver;
pub mod events;
pub mod frame;
pub mod ingest;
pub mod observation;
pub mod query;
pub mod segment;
pub mod storage;
pub mod transport;
pub mod zone;

pub use activity::{ActivityClassifier, PostureThresholds, ZoneRules, IDLE_ACTIVITY};
pub use driver::{Driver, DriverConfig, DriverStats, RetryPolicy};
pub use events::{
    DetectionEvent, EventSink, EventStore, FloorObjectConfig, FloorObjectDetector,
    NewDetectionEvent, FLOOR_OBJECT_EVENT,
};
pub use ingest::{DetectingSource, FrameSource, ObservationSource, ReplaySource};
#[cfg(feature = "ingest-snapshot")]
pub use ingest::{SnapshotConfig, SnapshotSource};
pub use observation::{ActivitySample, Observation, Perception};
pub use query::{ActivityStats, DailySummary, IntervalQuery};
pub use segment::{ActivityInterval, ActivityTracker, Emission, TrackerError, Transition};
pub use storage::{
    ActivityRecord, ActivityStore, InMemoryIntervalStore, IntervalSink, LogStore, NewActivity,
    SqliteIntervalStore,
};
pub use transport::{HttpEventSink, HttpIntervalSink, HttpSinkConfig};
pub use zone::{Point, Zone, ZoneMap, FALLBACK_ZONE};
