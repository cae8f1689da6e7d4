//! Outbound transports for closed intervals and detection events.
//!
//! The tracker only knows the `IntervalSink` and `EventSink` traits; this module
//! provides the network-backed implementations that post to the activity API.

mod http_sink;

pub use http_sink::{HttpEventSink, HttpIntervalSink, HttpSinkConfig};
