//! Activity classification.
//!
//! A rule table keyed by zone maps what the camera sees to an activity label.
//! Within a zone the rules are checked in a fixed order:
//!
//! 1. object rules, in table order (first rule with any listed object present wins)
//! 2. the posture rule, comparing person-box height to frame height
//! 3. the zone default
//!
//! Zones without a table entry resolve to [`IDLE_ACTIVITY`].

use std::collections::BTreeSet;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::detect::BoundingBox;

/// Label for zones that have no rules.
pub const IDLE_ACTIVITY: &str = "idle";

const DEFAULT_FRAME_HEIGHT: f32 = 1080.0;
const DEFAULT_DESK_SEATED_RATIO: f32 = 0.5;
const DEFAULT_BED_LYING_RATIO: f32 = 0.6;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectRule {
    /// Fires when any of these labels was detected.
    pub any_of: Vec<String>,
    pub activity: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PostureRule {
    /// Fires when box height / frame height is strictly greater than this.
    pub min_height_ratio: f32,
    pub activity: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ZoneRules {
    pub zone: String,
    #[serde(default)]
    pub objects: Vec<ObjectRule>,
    #[serde(default)]
    pub posture: Option<PostureRule>,
    pub default: String,
}

/// Posture thresholds used by the built-in rule table.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PostureThresholds {
    pub desk_seated_ratio: f32,
    pub bed_lying_ratio: f32,
}

impl Default for PostureThresholds {
    fn default() -> Self {
        Self {
            desk_seated_ratio: DEFAULT_DESK_SEATED_RATIO,
            bed_lying_ratio: DEFAULT_BED_LYING_RATIO,
        }
    }
}

/// Built-in rules for the desk / piano / bed layout.
pub fn default_rules(thresholds: PostureThresholds) -> Vec<ZoneRules> {
    vec![
        ZoneRules {
            zone: "desk".to_string(),
            objects: vec![
                ObjectRule {
                    any_of: vec!["laptop".to_string()],
                    activity: "laptop_work".to_string(),
                },
                ObjectRule {
                    any_of: vec!["keyboard".to_string(), "mouse".to_string()],
                    activity: "desktop_work".to_string(),
                },
            ],
            posture: Some(PostureRule {
                min_height_ratio: thresholds.desk_seated_ratio,
                activity: "sitting_at_desk".to_string(),
            }),
            default: "at_desk".to_string(),
        },
        ZoneRules {
            zone: "piano".to_string(),
            objects: vec![],
            posture: None,
            default: "playing_piano".to_string(),
        },
        ZoneRules {
            zone: "bed".to_string(),
            objects: vec![],
            posture: Some(PostureRule {
                min_height_ratio: thresholds.bed_lying_ratio,
                activity: "lying_on_bed".to_string(),
            }),
            default: "on_bed".to_string(),
        },
    ]
}

#[derive(Clone, Debug)]
pub struct ActivityClassifier {
    rules: Vec<ZoneRules>,
    frame_height: f32,
}

impl ActivityClassifier {
    pub fn new(rules: Vec<ZoneRules>, frame_height: f32) -> Result<Self> {
        if !(frame_height > 0.0) {
            return Err(anyhow!("frame height must be positive"));
        }
        for zone_rules in &rules {
            if let Some(posture) = &zone_rules.posture {
                if !(posture.min_height_ratio > 0.0 && posture.min_height_ratio <= 1.0) {
                    return Err(anyhow!(
                        "posture ratio for zone '{}' must be in (0, 1]",
                        zone_rules.zone
                    ));
                }
            }
            if zone_rules.default.trim().is_empty() {
                return Err(anyhow!(
                    "zone '{}' needs a non-empty default activity",
                    zone_rules.zone
                ));
            }
        }
        Ok(Self {
            rules,
            frame_height,
        })
    }

    pub fn with_thresholds(thresholds: PostureThresholds, frame_height: f32) -> Result<Self> {
        Self::new(default_rules(thresholds), frame_height)
    }

    pub fn classify(
        &self,
        zone: &str,
        objects: &BTreeSet<String>,
        person_box: &BoundingBox,
    ) -> String {
        let Some(zone_rules) = self.rules.iter().find(|rules| rules.zone == zone) else {
            return IDLE_ACTIVITY.to_string();
        };

        for rule in &zone_rules.objects {
            if rule.any_of.iter().any(|label| objects.contains(label)) {
                return rule.activity.clone();
            }
        }

        if let Some(posture) = &zone_rules.posture {
            if self.height_ratio(person_box) > posture.min_height_ratio {
                return posture.activity.clone();
            }
        }

        zone_rules.default.clone()
    }

    fn height_ratio(&self, person_box: &BoundingBox) -> f32 {
        person_box.height() / self.frame_height
    }
}

impl Default for ActivityClassifier {
    fn default() -> Self {
        Self {
            rules: default_rules(PostureThresholds::default()),
            frame_height: DEFAULT_FRAME_HEIGHT,
        }
    }
}
