use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::events::{EventSink, NewDetectionEvent};
use crate::segment::ActivityInterval;
use crate::storage::IntervalSink;

const DEFAULT_TIMEOUT_SECS: u64 = 3;

#[derive(Clone, Debug)]
pub struct HttpSinkConfig {
    /// Full endpoint, e.g. `http://localhost:8000/api/activities`.
    pub api_url: String,
    /// Full endpoint for detection events, e.g. `http://localhost:8000/api/events`.
    pub events_url: String,
    pub timeout: Duration,
}

impl Default for HttpSinkConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8000/api/activities".to_string(),
            events_url: "http://127.0.0.1:8000/api/events".to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Posts each interval as JSON to the activity API.
///
/// One request per interval, no retries. A transport error, a non-2xx status or
/// a `{"success": false}` body all count as a failed submission.
pub struct HttpIntervalSink {
    agent: ureq::Agent,
    url: String,
}

impl HttpIntervalSink {
    pub fn new(config: HttpSinkConfig) -> Result<Self> {
        let url = checked_url(&config.api_url)?;
        Ok(Self {
            agent: agent(&config),
            url,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl IntervalSink for HttpIntervalSink {
    fn submit(&mut self, interval: &ActivityInterval) -> Result<()> {
        post_json(&self.agent, &self.url, "interval", interval)
    }
}

/// Posts each detection event as JSON to the events endpoint. Same failure
/// rules as [`HttpIntervalSink`].
pub struct HttpEventSink {
    agent: ureq::Agent,
    url: String,
}

impl HttpEventSink {
    pub fn new(config: HttpSinkConfig) -> Result<Self> {
        let url = checked_url(&config.events_url)?;
        Ok(Self {
            agent: agent(&config),
            url,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl EventSink for HttpEventSink {
    fn submit_event(&mut self, event: &NewDetectionEvent) -> Result<()> {
        post_json(&self.agent, &self.url, "event", event)
    }
}

fn checked_url(raw: &str) -> Result<String> {
    let url = Url::parse(raw).context("parse activity api url")?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(anyhow!(
            "unsupported activity api scheme '{}'; expected http(s)",
            url.scheme()
        ));
    }
    Ok(url.to_string())
}

fn agent(config: &HttpSinkConfig) -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(config.timeout).build()
}

fn post_json<T: Serialize>(agent: &ureq::Agent, url: &str, what: &str, payload: &T) -> Result<()> {
    let body = serde_json::to_string(payload)?;
    let response = match agent
        .post(url)
        .set("Content-Type", "application/json")
        .send_string(&body)
    {
        Ok(response) => response,
        Err(ureq::Error::Status(code, _)) => {
            return Err(anyhow!("activity api returned HTTP {}", code));
        }
        Err(err) => return Err(anyhow!(err)).with_context(|| format!("post {} to {}", what, url)),
    };
    let text = response.into_string().context("read activity api response")?;
    let parsed: SubmitResponse =
        serde_json::from_str(&text).context("decode activity api response")?;
    if !parsed.success {
        return Err(anyhow!(
            "activity api rejected {}: {}",
            what,
            parsed.error.unwrap_or_else(|| "unknown error".to_string())
        ));
    }
    Ok(())
}
