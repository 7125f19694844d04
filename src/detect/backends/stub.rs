use anyhow::Result;
use image::RgbImage;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;

/// Scripted backend for tests and offline demos.
///
/// Replays a fixed sequence of detection sets, one per call, wrapping around
/// at the end. An empty script always yields no detections.
pub struct StubBackend {
    script: Vec<Vec<Detection>>,
    cursor: usize,
}

impl StubBackend {
    /// Return the same detections on every call.
    pub fn new(detections: Vec<Detection>) -> Self {
        Self::cycling(vec![detections])
    }

    /// Return each detection set in turn.
    pub fn cycling(script: Vec<Vec<Detection>>) -> Self {
        Self { script, cursor: 0 }
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::cycling(Vec::new())
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _image: &RgbImage) -> Result<Vec<Detection>> {
        if self.script.is_empty() {
            return Ok(Vec::new());
        }
        let detections = self.script[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.script.len();
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    #[test]
    fn stub_backend_cycles_through_script() {
        let shoplifting = Detection::new(BoundingBox::new(0.0, 0.0, 10.0, 10.0), "Shoplifting", 0.91);
        let mut backend = StubBackend::cycling(vec![vec![shoplifting.clone()], vec![]]);
        let image = RgbImage::new(4, 4);

        assert_eq!(backend.detect(&image).unwrap(), vec![shoplifting.clone()]);
        assert!(backend.detect(&image).unwrap().is_empty());
        assert_eq!(backend.detect(&image).unwrap(), vec![shoplifting]);
    }

    #[test]
    fn empty_stub_detects_nothing() {
        let mut backend = StubBackend::default();
        assert!(backend.detect(&RgbImage::new(2, 2)).unwrap().is_empty());
    }
}
