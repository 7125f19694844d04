use anyhow::Result;
use image::RgbImage;

use crate::detect::result::Detection;

/// Detector backend trait.
///
/// A backend takes one decoded 3-channel image and returns zero or more
/// detections in model output order. Calls are assumed deterministic and
/// side-effect free; the engine never retries them.
///
/// `detect` takes `&mut self` because most inference runtimes keep scratch
/// state between runs. The engine serializes calls behind a mutex.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>>;

    /// Optional warm-up hook, run once before the engine reports ready.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
