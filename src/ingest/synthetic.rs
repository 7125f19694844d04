use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};

use super::{FrameSource, SourceStats};
use crate::frame::Frame;

const WIDTH: u32 = 320;
const HEIGHT: u32 = 240;

/// Deterministic generated frames. Every frame differs from the previous one
/// so downstream consumers can tell them apart.
pub struct SyntheticSource {
    name: String,
    width: u32,
    height: u32,
    frame_count: u64,
    connected: bool,
}

impl SyntheticSource {
    pub fn new(name: &str) -> Self {
        Self::with_size(name, WIDTH, HEIGHT)
    }

    pub fn with_size(name: &str, width: u32, height: u32) -> Self {
        Self {
            name: name.to_string(),
            width: width.max(1),
            height: height.max(1),
            frame_count: 0,
            connected: false,
        }
    }

    fn render(&self) -> RgbImage {
        let shift = self.frame_count as u32;
        RgbImage::from_fn(self.width, self.height, |x, y| {
            Rgb([
                ((x + shift) % 256) as u8,
                ((y + shift * 3) % 256) as u8,
                ((x ^ y) % 256) as u8,
            ])
        })
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        log::info!("SyntheticSource: connected to stub://{}", self.name);
        self.connected = true;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if !self.connected {
            return Err(anyhow!("synthetic source not connected; call connect() first"));
        }
        self.frame_count += 1;
        Ok(Frame::new(self.render()))
    }

    fn is_healthy(&self) -> bool {
        self.connected
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: format!("stub://{}", self.name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_require_connect_and_change_each_time() {
        let mut source = SyntheticSource::with_size("aisle", 16, 8);
        assert!(source.next_frame().is_err());
        source.connect().unwrap();
        let first = source.next_frame().unwrap();
        let second = source.next_frame().unwrap();
        assert_eq!((first.width(), first.height()), (16, 8));
        assert_ne!(first.image, second.image);
        assert_eq!(source.stats().frames_captured, 2);
        assert!(source.is_healthy());
    }
}
