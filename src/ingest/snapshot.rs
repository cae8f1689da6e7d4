//! HTTP JPEG snapshot source.
//!
//! Fetches one JPEG per call from a camera's snapshot endpoint and decodes it
//! in memory. Credentials, when configured, are carried in the request URL's
//! userinfo and sent as HTTP basic auth.

use std::io::Read;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use image::GenericImageView;
use url::Url;

use super::FrameSource;
use crate::frame::Frame;

const MAX_JPEG_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct SnapshotConfig {
    /// Snapshot endpoint, e.g. `http://192.168.1.20/cgi-bin/snapshot.cgi`.
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1/snapshot.jpg".to_string(),
            username: None,
            password: None,
            timeout: Duration::from_secs(5),
        }
    }
}

pub struct SnapshotSource {
    agent: ureq::Agent,
    url: Url,
    frames_captured: u64,
}

impl SnapshotSource {
    pub fn new(config: SnapshotConfig) -> Result<Self> {
        let url = request_url(&config)?;
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Ok(Self {
            agent,
            url,
            frames_captured: 0,
        })
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured
    }

    fn fetch_jpeg(&self) -> Result<Vec<u8>> {
        let response = match self.agent.request_url("GET", &self.url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(code, _)) => {
                return Err(anyhow!("snapshot endpoint returned HTTP {}", code));
            }
            Err(err) => {
                return Err(anyhow!(err))
                    .with_context(|| format!("fetch snapshot from {}", redacted(&self.url)))
            }
        };
        if response.status() != 200 {
            return Err(anyhow!(
                "snapshot endpoint returned HTTP {}",
                response.status()
            ));
        }
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_JPEG_BYTES)
            .read_to_end(&mut bytes)
            .context("read snapshot body")?;
        if bytes.is_empty() {
            return Err(anyhow!("empty snapshot"));
        }
        Ok(bytes)
    }
}

impl FrameSource for SnapshotSource {
    fn next_frame(&mut self) -> Result<Frame> {
        let bytes = self.fetch_jpeg()?;
        let captured_at = Utc::now();
        let (pixels, width, height) = decode_jpeg(&bytes)?;
        self.frames_captured += 1;
        Frame::new(pixels, width, height, captured_at)
    }
}

fn request_url(config: &SnapshotConfig) -> Result<Url> {
    let mut url = Url::parse(&config.url).context("parse snapshot url")?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(anyhow!(
            "unsupported snapshot scheme '{}'; expected http(s)",
            url.scheme()
        ));
    }
    if let Some(username) = config.username.as_deref().filter(|u| !u.is_empty()) {
        url.set_username(username)
            .map_err(|_| anyhow!("snapshot url cannot carry credentials"))?;
        url.set_password(config.password.as_deref())
            .map_err(|_| anyhow!("snapshot url cannot carry credentials"))?;
    }
    Ok(url)
}

fn redacted(url: &Url) -> String {
    let mut shown = url.clone();
    let _ = shown.set_username("");
    let _ = shown.set_password(None);
    shown.to_string()
}

fn decode_jpeg(bytes: &[u8]) -> Result<(Vec<u8>, u32, u32)> {
    let image = image::load_from_memory(bytes).context("decode jpeg")?;
    let (width, height) = image.dimensions();
    let rgb = image.into_rgb8();
    Ok((rgb.into_raw(), width, height))
}
