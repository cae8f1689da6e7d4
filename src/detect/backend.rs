use anyhow::Result;

use crate::detect::result::Detection;

/// Object detector backend.
///
/// Backends are black boxes to the rest of the crate: pixels go in, labeled boxes in
/// frame-pixel coordinates come out. A backend may keep internal state between calls
/// (a loaded model, a replay cursor) but must not retain the pixel slice.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a packed RGB8 frame.
    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
