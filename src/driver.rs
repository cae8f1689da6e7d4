//! Polling loop: source → perception → tracker → sink.
//!
//! Source failures never end the loop; they are logged and retried with capped
//! exponential backoff. The loop ends when the shutdown flag is raised or a
//! finite source runs dry, and the open interval is flushed on the way out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::ingest::ObservationSource;
use crate::observation::Perception;
use crate::segment::{ActivityTracker, Emission};
use crate::storage::IntervalSink;

const SHUTDOWN_POLL_SLICE: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// Doubling backoff, capped at `max_backoff`, reset by `succeeded`.
#[derive(Clone, Debug)]
pub struct Backoff {
    policy: RetryPolicy,
    next: Duration,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            next: policy.initial_backoff,
        }
    }

    /// Delay to wait after a failure.
    pub fn failed(&mut self) -> Duration {
        let delay = self.next.min(self.policy.max_backoff);
        self.next = delay.saturating_mul(2).min(self.policy.max_backoff);
        delay
    }

    pub fn succeeded(&mut self) {
        self.next = self.policy.initial_backoff;
    }
}

#[derive(Clone, Debug)]
pub struct DriverConfig {
    /// Pause between cycles. Zero for recorded sources.
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DriverStats {
    pub cycles: u64,
    pub samples: u64,
    pub empty_frames: u64,
    pub source_errors: u64,
    pub ordering_violations: u64,
    pub intervals_submitted: u64,
    pub intervals_dropped: u64,
}

pub struct Driver {
    config: DriverConfig,
}

impl Driver {
    pub fn new(config: DriverConfig) -> Self {
        Self { config }
    }

    pub fn run<O, S>(
        &self,
        source: &mut O,
        perception: &Perception,
        tracker: &mut ActivityTracker,
        sink: &mut S,
        shutdown: &AtomicBool,
    ) -> DriverStats
    where
        O: ObservationSource + ?Sized,
        S: IntervalSink + ?Sized,
    {
        let mut stats = DriverStats::default();
        let mut backoff = Backoff::new(self.config.retry);

        while !shutdown.load(Ordering::SeqCst) {
            stats.cycles += 1;
            match source.next_observation() {
                Ok(Some(observation)) => {
                    backoff.succeeded();
                    let sample = perception.sample(&observation);
                    log::debug!(
                        "sample {} in {} at {}",
                        sample.activity,
                        sample.zone,
                        sample.timestamp
                    );
                    match tracker.ingest_into(&sample, sink) {
                        Ok(emission) => {
                            stats.samples += 1;
                            record_emission(&mut stats, emission);
                        }
                        Err(err) => {
                            stats.ordering_violations += 1;
                            log::warn!("sample skipped: {}", err);
                        }
                    }
                }
                Ok(None) => {
                    backoff.succeeded();
                    if source.is_finished() {
                        break;
                    }
                    stats.empty_frames += 1;
                }
                Err(err) if !source.is_live() => {
                    stats.source_errors += 1;
                    log::warn!("recorded observation skipped: {:#}", err);
                    if source.is_finished() {
                        break;
                    }
                    continue;
                }
                Err(err) => {
                    stats.source_errors += 1;
                    let delay = backoff.failed();
                    log::warn!("observation failed: {:#}; retrying in {:?}", err, delay);
                    sleep_unless_shutdown(delay, shutdown);
                    continue;
                }
            }
            if source.is_finished() {
                break;
            }
            sleep_unless_shutdown(self.config.poll_interval, shutdown);
        }

        let flush_at = flush_time(source.is_live(), tracker);
        match tracker.flush_into(flush_at, sink) {
            Ok(emission) => record_emission(&mut stats, emission),
            Err(err) => log::warn!("final flush skipped: {}", err),
        }
        log::info!(
            "driver stopped after {} cycles: {} samples, {} intervals submitted, {} dropped",
            stats.cycles,
            stats.samples,
            stats.intervals_submitted,
            stats.intervals_dropped
        );
        stats
    }
}

/// Live sources close at wall time; recorded ones at their last accepted sample.
fn flush_time(live: bool, tracker: &ActivityTracker) -> DateTime<Utc> {
    let latest = tracker.latest_timestamp();
    if live {
        let now = Utc::now();
        latest.map_or(now, |latest| latest.max(now))
    } else {
        latest.unwrap_or_else(Utc::now)
    }
}

fn record_emission(stats: &mut DriverStats, emission: Emission) {
    match emission {
        Emission::Nothing => {}
        Emission::Submitted(interval) => {
            stats.intervals_submitted += 1;
            log::info!(
                "interval {} in {} from {} for {}s",
                interval.activity,
                interval.zone,
                interval.start,
                interval.duration_secs
            );
        }
        // Already logged by the tracker.
        Emission::Dropped { .. } => stats.intervals_dropped += 1,
    }
}

fn sleep_unless_shutdown(total: Duration, shutdown: &AtomicBool) {
    let deadline = Instant::now() + total;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep((deadline - now).min(SHUTDOWN_POLL_SLICE));
    }
}
