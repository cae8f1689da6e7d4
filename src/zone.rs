//! Zone classification.
//!
//! Zones are named axis-aligned rectangles over the frame's pixel space. They are
//! loaded once from configuration and never change while the tracker runs.
//! Classification walks the zones in configuration order and returns the first
//! rectangle whose inclusive bounds contain the point. Points that fall in a gap
//! resolve to [`FALLBACK_ZONE`].

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Reserved zone name for points outside every configured rectangle.
pub const FALLBACK_ZONE: &str = "other";

/// A point in frame-pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Named rectangle with inclusive bounds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub name: String,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl Zone {
    pub fn new(name: &str, x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self {
            name: name.to_string(),
            x1,
            y1,
            x2,
            y2,
        }
    }

    pub fn contains(&self, point: Point) -> bool {
        self.x1 <= point.x && point.x <= self.x2 && self.y1 <= point.y && point.y <= self.y2
    }

    fn validate(&self) -> Result<()> {
        validate_zone_name(&self.name)?;
        if self.name == FALLBACK_ZONE {
            return Err(anyhow!(
                "zone name '{}' is reserved for unmatched points",
                FALLBACK_ZONE
            ));
        }
        if !(self.x1 <= self.x2 && self.y1 <= self.y2) {
            return Err(anyhow!(
                "zone '{}' has inverted bounds ({}, {}) - ({}, {})",
                self.name,
                self.x1,
                self.y1,
                self.x2,
                self.y2
            ));
        }
        Ok(())
    }
}

/// Zone names are short local identifiers: 1..64 of [a-z0-9_-].
pub fn validate_zone_name(name: &str) -> Result<()> {
    static ZONE_NAME_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = ZONE_NAME_RE.get_or_init(|| {
        regex::Regex::new(r"^[a-z0-9_-]{1,64}$").expect("zone name pattern is valid")
    });
    if !re.is_match(name) {
        return Err(anyhow!(
            "zone name '{}' must match ^[a-z0-9_-]{{1,64}}$",
            name
        ));
    }
    Ok(())
}

/// Ordered set of zones. Overlaps are allowed; the first match wins.
#[derive(Clone, Debug, PartialEq)]
pub struct ZoneMap {
    zones: Vec<Zone>,
}

impl ZoneMap {
    pub fn new(zones: Vec<Zone>) -> Result<Self> {
        for zone in &zones {
            zone.validate()?;
        }
        for (i, zone) in zones.iter().enumerate() {
            if zones[..i].iter().any(|prev| prev.name == zone.name) {
                return Err(anyhow!("duplicate zone name '{}'", zone.name));
            }
        }
        Ok(Self { zones })
    }

    /// Desk / piano / bed split of a 1920x1080 frame.
    pub fn default_layout() -> Self {
        Self {
            zones: vec![
                Zone::new("desk", 0.0, 0.0, 960.0, 1080.0),
                Zone::new("piano", 960.0, 0.0, 1440.0, 1080.0),
                Zone::new("bed", 1440.0, 0.0, 1920.0, 1080.0),
            ],
        }
    }

    pub fn classify(&self, point: Point) -> &str {
        self.zones
            .iter()
            .find(|zone| zone.contains(point))
            .map(|zone| zone.name.as_str())
            .unwrap_or(FALLBACK_ZONE)
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }
}

impl Default for ZoneMap {
    fn default() -> Self {
        Self::default_layout()
    }
}
