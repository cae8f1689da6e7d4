mod backend;
mod backends;
mod labels;
mod registry;
mod result;
mod yolo;

pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use labels::{coco_label, COCO_LABELS, PERSON_LABEL};
pub use registry::{BackendRegistry, SharedBackend};
pub use result::{BoundingBox, Detection};
pub use yolo::{decode_output, YoloParams};
