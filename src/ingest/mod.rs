//! Frame sources for the capture client.
//!
//! - `stub://name`: synthetic frames, deterministic (tests, demos)
//! - `http(s)://...`: IP cameras serving MJPEG or single JPEG snapshots
//!   (phone camera apps, ESP32-CAM boards)
//! - a local directory of `.jpg`/`.jpeg`/`.png` stills
//!
//! Sources decode in memory and hand frames straight to the capture loop.
//! Nothing is written to disk here.

mod dir;
mod http;
mod synthetic;

use anyhow::{anyhow, Result};

use crate::frame::Frame;

pub use dir::ImageDirSource;
pub use http::{HttpCameraConfig, HttpCameraSource};
pub use synthetic::SyntheticSource;

/// Frame counters reported by every source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

/// Produces raster frames on demand.
pub trait FrameSource: Send {
    /// Open the underlying device or stream. A failure here is fatal to the
    /// capture loop.
    fn connect(&mut self) -> Result<()>;

    /// Read the next frame. Errors are per-frame and may be retried.
    fn next_frame(&mut self) -> Result<Frame>;

    fn is_healthy(&self) -> bool;

    fn stats(&self) -> SourceStats;
}

/// Pick a source implementation from a URL or path.
pub fn open_source(source: &str) -> Result<Box<dyn FrameSource>> {
    let source = source.trim();
    if source.is_empty() {
        return Err(anyhow!("frame source must not be empty"));
    }
    if let Some(name) = source.strip_prefix("stub://") {
        return Ok(Box::new(SyntheticSource::new(name)));
    }
    if source.starts_with("http://") || source.starts_with("https://") {
        return Ok(Box::new(HttpCameraSource::new(HttpCameraConfig {
            url: source.to_string(),
            ..HttpCameraConfig::default()
        })?));
    }
    if source.contains("://") {
        return Err(anyhow!(
            "unsupported frame source '{}'; expected stub://, http(s):// or a directory",
            source
        ));
    }
    Ok(Box::new(ImageDirSource::new(source, true)))
}
