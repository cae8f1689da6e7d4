//! Per-frame observations and the samples derived from them.
//!
//! An `Observation` is what one processed frame tells us: when it was captured,
//! where the person was, and which other objects were in view. `Perception` turns
//! it into an `ActivitySample` by running the zone and activity classifiers.
//! Neither type is persisted.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::activity::ActivityClassifier;
use crate::detect::{BoundingBox, Detection, PERSON_LABEL};
use crate::zone::{Point, ZoneMap};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub detected_objects: BTreeSet<String>,
    pub person_box: BoundingBox,
}

impl Observation {
    /// Build an observation from raw detections.
    ///
    /// The highest-confidence person box is the subject; every other label at or
    /// above `min_confidence` goes into the object set. Returns `None` when no
    /// person was detected.
    pub fn from_detections(
        timestamp: DateTime<Utc>,
        detections: &[Detection],
        min_confidence: f32,
    ) -> Option<Self> {
        let confident = detections
            .iter()
            .filter(|det| det.confidence >= min_confidence);

        let mut person: Option<&Detection> = None;
        let mut detected_objects = BTreeSet::new();
        for det in confident {
            if det.label == PERSON_LABEL {
                if person.map_or(true, |best| det.confidence > best.confidence) {
                    person = Some(det);
                }
            } else {
                detected_objects.insert(det.label.clone());
            }
        }

        person.map(|person| Self {
            timestamp,
            detected_objects,
            person_box: person.bbox,
        })
    }
}

/// One classified frame: the unit the segmentation state machine consumes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivitySample {
    pub activity: String,
    pub zone: String,
    pub timestamp: DateTime<Utc>,
}

impl ActivitySample {
    pub fn new(activity: &str, zone: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            activity: activity.to_string(),
            zone: zone.to_string(),
            timestamp,
        }
    }
}

/// Zone + activity classification for observations.
#[derive(Clone, Debug, Default)]
pub struct Perception {
    zones: ZoneMap,
    classifier: ActivityClassifier,
}

impl Perception {
    pub fn new(zones: ZoneMap, classifier: ActivityClassifier) -> Self {
        Self { zones, classifier }
    }

    pub fn sample(&self, observation: &Observation) -> ActivitySample {
        let (cx, cy) = observation.person_box.center();
        let zone = self.zones.classify(Point::new(cx, cy));
        let activity =
            self.classifier
                .classify(zone, &observation.detected_objects, &observation.person_box);
        ActivitySample {
            activity,
            zone: zone.to_string(),
            timestamp: observation.timestamp,
        }
    }

    pub fn zones(&self) -> &ZoneMap {
        &self.zones
    }
}
