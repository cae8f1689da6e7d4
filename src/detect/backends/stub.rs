use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;

/// Scripted backend for demos and tests.
///
/// Each call returns the next scripted detection set, wrapping around at the end.
/// An empty script always detects nothing.
pub struct StubBackend {
    script: Vec<Vec<Detection>>,
    cursor: usize,
}

impl StubBackend {
    pub fn new(script: Vec<Vec<Detection>>) -> Self {
        Self { script, cursor: 0 }
    }

    /// Number of frames processed so far.
    pub fn frames_seen(&self) -> usize {
        self.cursor
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _pixels: &[u8], _width: u32, _height: u32) -> Result<Vec<Detection>> {
        let out = if self.script.is_empty() {
            Vec::new()
        } else {
            self.script[self.cursor % self.script.len()].clone()
        };
        self.cursor += 1;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    #[test]
    fn stub_backend_cycles_script() {
        let person = Detection::new("person", 0.9, BoundingBox::new(0.0, 0.0, 10.0, 10.0));
        let mut backend = StubBackend::new(vec![vec![person.clone()], vec![]]);

        assert_eq!(backend.detect(b"frame1", 10, 10).unwrap(), vec![person.clone()]);
        assert!(backend.detect(b"frame2", 10, 10).unwrap().is_empty());
        assert_eq!(backend.detect(b"frame3", 10, 10).unwrap(), vec![person]);
        assert_eq!(backend.frames_seen(), 3);
    }

    #[test]
    fn empty_script_detects_nothing() {
        let mut backend = StubBackend::default();
        assert!(backend.detect(b"frame", 1, 1).unwrap().is_empty());
    }
}
