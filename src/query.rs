//! Read-side queries over persisted intervals.
//!
//! Everything here works on records that are already stored; nothing in this
//! module touches the segmentation state.

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::ActivityRecord;

pub const DEFAULT_LIST_LIMIT: usize = 100;

/// Date-range filter for listing activity records, newest first.
///
/// `from` is inclusive and `to` exclusive; the limit applies after filtering.
#[derive(Clone, Debug, PartialEq)]
pub struct IntervalQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: usize,
}

impl Default for IntervalQuery {
    fn default() -> Self {
        Self {
            from: None,
            to: None,
            limit: DEFAULT_LIST_LIMIT,
        }
    }
}

impl IntervalQuery {
    pub fn for_date(date: NaiveDate) -> Self {
        let (from, to) = day_bounds(date);
        Self {
            from: Some(from),
            to: Some(to),
            limit: DEFAULT_LIST_LIMIT,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn matches(&self, timestamp: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| timestamp >= from)
            && self.to.map_or(true, |to| timestamp < to)
    }
}

/// UTC calendar day as a half-open range.
pub fn day_bounds(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = date.and_time(NaiveTime::MIN).and_utc();
    (start, start + chrono::Duration::days(1))
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityTotals {
    pub total_time: String,
    pub total_seconds: i64,
    pub count: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub summary: BTreeMap<String, ActivityTotals>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityStats {
    pub today: u64,
    pub total: u64,
}

/// Group records by activity, summing durations. Missing durations count as zero.
///
/// Totals saturate at `i64::MAX` rather than overflow.
pub fn summarize(date: NaiveDate, records: &[ActivityRecord]) -> DailySummary {
    let mut totals: BTreeMap<String, (i64, u64)> = BTreeMap::new();
    for record in records {
        let entry = totals.entry(record.activity.clone()).or_insert((0, 0));
        entry.0 = entry.0.saturating_add(record.duration.unwrap_or(0));
        entry.1 += 1;
    }
    let summary = totals
        .into_iter()
        .map(|(activity, (total_seconds, count))| {
            (
                activity,
                ActivityTotals {
                    total_time: format_total_time(total_seconds),
                    total_seconds,
                    count,
                },
            )
        })
        .collect();
    DailySummary { date, summary }
}

/// "{hours}h {minutes}m"; leftover seconds are dropped.
pub fn format_total_time(total_seconds: i64) -> String {
    let total_seconds = total_seconds.max(0);
    format!("{}h {}m", total_seconds / 3600, (total_seconds % 3600) / 60)
}

/// Accept RFC 3339, or a naive ISO-8601 date-time taken as UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| anyhow!("invalid timestamp '{}': {}", value, e))
}

/// Serde hook for payload timestamps; same shapes as [`parse_timestamp`].
pub(crate) fn deserialize_timestamp<'de, D>(
    deserializer: D,
) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).map_err(serde::de::Error::custom)
}

/// Accept `YYYY-MM-DD`, or any timestamp `parse_timestamp` accepts.
pub fn parse_date(value: &str) -> Result<NaiveDate> {
    let value = value.trim();
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(date);
    }
    parse_timestamp(value)
        .map(|ts| ts.date_naive())
        .map_err(|_| anyhow!("invalid date '{}'; expected YYYY-MM-DD", value))
}
