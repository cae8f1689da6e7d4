//! Activity segmentation.
//!
//! `ActivityTracker` turns a stream of per-frame samples into closed activity
//! intervals. At most one interval is open at a time. Emission is edge-triggered:
//! an interval closes only when a sample arrives with a different activity, or
//! when the caller flushes on shutdown. Holding the same activity for any number
//! of polling cycles produces no output.
//!
//! A closed interval carries the zone of the sample that closed it, not the zone
//! the interval was opened in. Flushed intervals carry the opening zone because
//! there is no closing sample.
//!
//! Timestamps must be non-decreasing across calls. A sample older than the latest
//! accepted one is rejected with [`TrackerError::TimestampOrderingViolation`] and
//! leaves the tracker untouched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::observation::ActivitySample;
use crate::storage::IntervalSink;

/// A closed span during which one activity label was continuously inferred.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityInterval {
    pub activity: String,
    pub zone: String,
    /// Start of the interval.
    #[serde(rename = "timestamp")]
    pub start: DateTime<Utc>,
    /// Whole seconds, truncated toward zero.
    #[serde(rename = "duration")]
    pub duration_secs: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrackerError {
    #[error("sample at {sample} precedes latest accepted timestamp {latest}")]
    TimestampOrderingViolation {
        sample: DateTime<Utc>,
        latest: DateTime<Utc>,
    },
}

/// What a single `ingest` did to the tracker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    /// No interval was open; one was opened for the sample's activity.
    Opened,
    /// Same activity as the open interval; nothing changed.
    Continued,
    /// The open interval closed and a new one opened for the sample's activity.
    Switched { closed: ActivityInterval },
}

/// Result of handing an interval to a sink.
#[derive(Debug)]
pub enum Emission {
    Nothing,
    Submitted(ActivityInterval),
    /// The sink failed; the interval is gone. The tracker still moved on.
    Dropped {
        interval: ActivityInterval,
        error: anyhow::Error,
    },
}

impl Emission {
    pub fn interval(&self) -> Option<&ActivityInterval> {
        match self {
            Emission::Nothing => None,
            Emission::Submitted(interval) => Some(interval),
            Emission::Dropped { interval, .. } => Some(interval),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct OpenInterval {
    activity: String,
    zone: String,
    start: DateTime<Utc>,
}

/// Caller-owned segmentation state. One per camera.
#[derive(Clone, Debug, Default)]
pub struct ActivityTracker {
    open: Option<OpenInterval>,
    latest: Option<DateTime<Utc>>,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ingest(&mut self, sample: &ActivitySample) -> Result<Transition, TrackerError> {
        self.check_order(sample.timestamp)?;
        self.latest = Some(sample.timestamp);

        let Some(open) = self.open.as_ref() else {
            self.open = Some(OpenInterval {
                activity: sample.activity.clone(),
                zone: sample.zone.clone(),
                start: sample.timestamp,
            });
            return Ok(Transition::Opened);
        };

        if open.activity == sample.activity {
            return Ok(Transition::Continued);
        }

        let closed = ActivityInterval {
            activity: open.activity.clone(),
            zone: sample.zone.clone(),
            start: open.start,
            duration_secs: whole_seconds(open.start, sample.timestamp),
        };
        self.open = Some(OpenInterval {
            activity: sample.activity.clone(),
            zone: sample.zone.clone(),
            start: sample.timestamp,
        });
        Ok(Transition::Switched { closed })
    }

    /// Close the open interval at `at`, if any, and clear the state.
    ///
    /// With nothing open this is a no-op whatever `at` is; the ordering check
    /// only guards the instant that would close an interval.
    pub fn flush(&mut self, at: DateTime<Utc>) -> Result<Option<ActivityInterval>, TrackerError> {
        if self.open.is_none() {
            return Ok(None);
        }
        self.check_order(at)?;
        let Some(open) = self.open.take() else {
            return Ok(None);
        };
        self.latest = Some(at);
        Ok(Some(ActivityInterval {
            duration_secs: whole_seconds(open.start, at),
            activity: open.activity,
            zone: open.zone,
            start: open.start,
        }))
    }

    /// Ingest and hand any closed interval to `sink`.
    ///
    /// A sink failure never blocks the transition: the tracker has already moved
    /// to the new activity and the failed interval is reported as dropped.
    pub fn ingest_into<S: IntervalSink + ?Sized>(
        &mut self,
        sample: &ActivitySample,
        sink: &mut S,
    ) -> Result<Emission, TrackerError> {
        match self.ingest(sample)? {
            Transition::Opened | Transition::Continued => Ok(Emission::Nothing),
            Transition::Switched { closed } => Ok(submit(sink, closed)),
        }
    }

    /// Flush and hand the final interval to `sink`.
    pub fn flush_into<S: IntervalSink + ?Sized>(
        &mut self,
        at: DateTime<Utc>,
        sink: &mut S,
    ) -> Result<Emission, TrackerError> {
        match self.flush(at)? {
            Some(interval) => Ok(submit(sink, interval)),
            None => Ok(Emission::Nothing),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    pub fn current_activity(&self) -> Option<&str> {
        self.open.as_ref().map(|open| open.activity.as_str())
    }

    pub fn current_zone(&self) -> Option<&str> {
        self.open.as_ref().map(|open| open.zone.as_str())
    }

    pub fn interval_start(&self) -> Option<DateTime<Utc>> {
        self.open.as_ref().map(|open| open.start)
    }

    /// Latest timestamp the tracker accepted.
    pub fn latest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.latest
    }

    fn check_order(&self, timestamp: DateTime<Utc>) -> Result<(), TrackerError> {
        match self.latest {
            Some(latest) if timestamp < latest => Err(TrackerError::TimestampOrderingViolation {
                sample: timestamp,
                latest,
            }),
            _ => Ok(()),
        }
    }
}

fn submit<S: IntervalSink + ?Sized>(sink: &mut S, interval: ActivityInterval) -> Emission {
    match sink.submit(&interval) {
        Ok(()) => Emission::Submitted(interval),
        Err(error) => {
            log::warn!(
                "interval dropped: {} ({}s from {}) sink error: {:#}",
                interval.activity,
                interval.duration_secs,
                interval.start.to_rfc3339(),
                error
            );
            Emission::Dropped { interval, error }
        }
    }
}

fn whole_seconds(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    u64::try_from((end - start).num_seconds()).unwrap_or(0)
}
