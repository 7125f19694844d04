//! Captured frames.
//!
//! A `Frame` is produced by a `FrameSource`, handed to the capture loop and
//! dropped once it has been submitted (or skipped). Frames are never persisted.

use std::time::SystemTime;

use image::RgbImage;

/// One raster frame plus its capture time.
pub struct Frame {
    pub image: RgbImage,
    pub captured_at: SystemTime,
}

impl Frame {
    /// Stamp a freshly captured image with the current wall-clock time.
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            captured_at: SystemTime::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}
