//! Frame and observation sources.
//!
//! Two layers:
//! - `FrameSource` yields decoded frames (camera snapshots).
//! - `ObservationSource` yields per-frame observations, either by running a
//!   detector over a `FrameSource` (`DetectingSource`) or by reading recorded
//!   observations back (`ReplaySource`).
//!
//! Frames are decoded in memory and dropped after detection; nothing here writes
//! pixels to disk.

use anyhow::Result;

use crate::frame::Frame;
use crate::observation::Observation;

mod detecting;
mod replay;
#[cfg(feature = "ingest-snapshot")]
pub mod snapshot;

pub use detecting::DetectingSource;
pub use replay::ReplaySource;
#[cfg(feature = "ingest-snapshot")]
pub use snapshot::{SnapshotConfig, SnapshotSource};

pub trait FrameSource {
    /// Capture and decode the next frame.
    fn next_frame(&mut self) -> Result<Frame>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Frame> {
        (**self).next_frame()
    }
}

pub trait ObservationSource {
    /// `Ok(None)` means the frame was processed but held no person.
    fn next_observation(&mut self) -> Result<Option<Observation>>;

    /// Finite sources report true once they have nothing more to yield.
    fn is_finished(&self) -> bool {
        false
    }

    /// Recorded sources carry their own clock; live ones follow wall time.
    fn is_live(&self) -> bool {
        true
    }
}

impl<S: ObservationSource + ?Sized> ObservationSource for Box<S> {
    fn next_observation(&mut self) -> Result<Option<Observation>> {
        (**self).next_observation()
    }

    fn is_finished(&self) -> bool {
        (**self).is_finished()
    }

    fn is_live(&self) -> bool {
        (**self).is_live()
    }
}
