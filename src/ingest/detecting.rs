use anyhow::{anyhow, Result};

use super::{FrameSource, ObservationSource};
use crate::detect::SharedBackend;
use crate::events::{EventSink, FloorObjectDetector};
use crate::observation::Observation;

/// Runs a detector backend over every frame from a `FrameSource`.
///
/// Observations are stamped with the frame's capture time, not the time
/// detection finished. With floor events attached, the same detections also
/// feed a [`FloorObjectDetector`]; an event sink failure is logged and never
/// fails the observation.
pub struct DetectingSource<F> {
    frames: F,
    detector: SharedBackend,
    min_confidence: f32,
    floor_events: Option<(FloorObjectDetector, Box<dyn EventSink>)>,
}

impl<F: FrameSource> DetectingSource<F> {
    pub fn new(frames: F, detector: SharedBackend, min_confidence: f32) -> Self {
        Self {
            frames,
            detector,
            min_confidence,
            floor_events: None,
        }
    }

    pub fn with_floor_events(mut self, floor: FloorObjectDetector, sink: Box<dyn EventSink>) -> Self {
        self.floor_events = Some((floor, sink));
        self
    }
}

impl<F: FrameSource> ObservationSource for DetectingSource<F> {
    fn next_observation(&mut self) -> Result<Option<Observation>> {
        let frame = self.frames.next_frame()?;
        let detections = {
            let mut backend = self
                .detector
                .lock()
                .map_err(|_| anyhow!("detector backend lock poisoned"))?;
            backend.detect(frame.pixels(), frame.width, frame.height)?
        };
        log::debug!(
            "frame {}x{} at {}: {} detections",
            frame.width,
            frame.height,
            frame.captured_at,
            detections.len()
        );
        if let Some((floor, sink)) = self.floor_events.as_mut() {
            if let Err(err) = floor.observe_into(frame.captured_at, frame.height, &detections, sink) {
                log::warn!("floor event not stored: {:#}", err);
            }
        }
        Ok(Observation::from_detections(
            frame.captured_at,
            &detections,
            self.min_confidence,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, Detection, StubBackend};
    use crate::events::{EventStore, FloorObjectConfig, NewDetectionEvent};
    use crate::frame::Frame;
    use crate::storage::InMemoryIntervalStore;
    use chrono::{DateTime, TimeZone, Utc};
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::{Arc, Mutex};

    struct SharedStore(Rc<RefCell<InMemoryIntervalStore>>);

    impl EventSink for SharedStore {
        fn submit_event(&mut self, event: &NewDetectionEvent) -> Result<()> {
            self.0.borrow_mut().insert_event(event).map(|_| ())
        }
    }

    struct FixedFrames {
        next: i64,
    }

    impl FrameSource for FixedFrames {
        fn next_frame(&mut self) -> Result<Frame> {
            let at: DateTime<Utc> = Utc.timestamp_opt(1_700_000_000 + self.next, 0).unwrap();
            self.next += 1;
            Frame::new(vec![0; 2 * 2 * 3], 2, 2, at)
        }
    }

    #[test]
    fn stamps_observations_with_capture_time() {
        let person = Detection::new("person", 0.8, BoundingBox::new(0.0, 0.0, 1.0, 2.0));
        let laptop = Detection::new("laptop", 0.5, BoundingBox::new(0.0, 0.0, 1.0, 1.0));
        let backend = StubBackend::new(vec![vec![person, laptop], vec![]]);
        let mut source =
            DetectingSource::new(FixedFrames { next: 0 }, Arc::new(Mutex::new(backend)), 0.25);

        let first = source.next_observation().unwrap().unwrap();
        assert_eq!(first.timestamp, Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        assert!(first.detected_objects.contains("laptop"));

        assert!(source.next_observation().unwrap().is_none());
        assert!(!source.is_finished());
        assert!(source.is_live());
    }

    #[test]
    fn floor_events_follow_detections() {
        let person = Detection::new("person", 0.8, BoundingBox::new(0.0, 0.0, 1.0, 1.0));
        let cup = Detection::new("cup", 0.6, BoundingBox::new(0.0, 1.0, 1.0, 2.0));
        let backend = StubBackend::new(vec![vec![person.clone(), cup.clone()], vec![person, cup]]);
        let floor = FloorObjectDetector::new(FloorObjectConfig::default()).unwrap();
        let store = Rc::new(RefCell::new(InMemoryIntervalStore::default()));
        let mut source =
            DetectingSource::new(FixedFrames { next: 0 }, Arc::new(Mutex::new(backend)), 0.25)
                .with_floor_events(floor, Box::new(SharedStore(store.clone())));

        assert!(source.next_observation().unwrap().is_some());
        assert!(source.next_observation().unwrap().is_some());
        let store = store.borrow();
        assert_eq!(store.events().len(), 1);
        assert_eq!(store.events()[0].object_count, Some(1));
        assert_eq!(store.events()[0].details.as_ref().unwrap()["objects"][0]["name"], "cup");
    }

    #[test]
    fn floor_event_failure_keeps_observation() {
        struct Refusing;
        impl EventSink for Refusing {
            fn submit_event(&mut self, _event: &NewDetectionEvent) -> Result<()> {
                Err(anyhow!("api down"))
            }
        }
        let person = Detection::new("person", 0.8, BoundingBox::new(0.0, 0.0, 1.0, 2.0));
        let backend = StubBackend::new(vec![vec![person]]);
        let floor = FloorObjectDetector::new(FloorObjectConfig::default()).unwrap();
        let mut source =
            DetectingSource::new(FixedFrames { next: 0 }, Arc::new(Mutex::new(backend)), 0.25)
                .with_floor_events(floor, Box::new(Refusing));
        assert!(source.next_observation().unwrap().is_some());
    }

    #[test]
    fn frame_errors_propagate() {
        struct Broken;
        impl FrameSource for Broken {
            fn next_frame(&mut self) -> Result<Frame> {
                Err(anyhow!("camera offline"))
            }
        }
        let mut source =
            DetectingSource::new(Broken, Arc::new(Mutex::new(StubBackend::default())), 0.25);
        assert!(source.next_observation().is_err());
    }
}
