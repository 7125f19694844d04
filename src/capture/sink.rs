//! Where annotated frames go once the service returns them.

use std::path::PathBuf;

use anyhow::{Context, Result};
use image::RgbImage;

use crate::codec::{self, WireFormat, DEFAULT_JPEG_QUALITY};

pub trait FrameSink {
    fn present(&mut self, frame: &RgbImage) -> Result<()>;
}

/// Keeps exactly one preview file up to date. Writes go to a sibling temp
/// file first and are renamed into place, so a viewer never sees a partial
/// image.
pub struct LatestFileSink {
    path: PathBuf,
    format: WireFormat,
    presented: u64,
}

impl LatestFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let format = match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("png") => WireFormat::Png,
            _ => WireFormat::Jpeg,
        };
        Self {
            path,
            format,
            presented: 0,
        }
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }
}

impl FrameSink for LatestFileSink {
    fn present(&mut self, frame: &RgbImage) -> Result<()> {
        let bytes = codec::encode(frame, self.format, DEFAULT_JPEG_QUALITY)?;
        let tmp = self.path.with_extension(format!("{}.tmp", self.format.extension()));
        std::fs::write(&tmp, bytes).with_context(|| format!("write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replace {}", self.path.display()))?;
        self.presented += 1;
        Ok(())
    }
}

/// Writes every annotated frame as `frame-000001.jpg`, `frame-000002.jpg`, ...
pub struct DirectorySink {
    dir: PathBuf,
    format: WireFormat,
    presented: u64,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>, format: WireFormat) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
        Ok(Self {
            dir,
            format,
            presented: 0,
        })
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }
}

impl FrameSink for DirectorySink {
    fn present(&mut self, frame: &RgbImage) -> Result<()> {
        let bytes = codec::encode(frame, self.format, DEFAULT_JPEG_QUALITY)?;
        let path = self.dir.join(format!(
            "frame-{:06}.{}",
            self.presented + 1,
            self.format.extension()
        ));
        std::fs::write(&path, bytes).with_context(|| format!("write {}", path.display()))?;
        self.presented += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn latest_file_sink_overwrites_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preview.png");
        let mut sink = LatestFileSink::new(&path);
        sink.present(&RgbImage::from_pixel(2, 2, Rgb([1, 1, 1]))).unwrap();
        sink.present(&RgbImage::from_pixel(2, 2, Rgb([9, 9, 9]))).unwrap();
        let stored = codec::decode(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(*stored.get_pixel(0, 0), Rgb([9, 9, 9]));
        assert_eq!(sink.presented(), 2);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn directory_sink_numbers_frames() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = DirectorySink::new(dir.path().join("out"), WireFormat::Jpeg).unwrap();
        sink.present(&RgbImage::new(4, 4)).unwrap();
        sink.present(&RgbImage::new(4, 4)).unwrap();
        assert!(dir.path().join("out/frame-000001.jpg").exists());
        assert!(dir.path().join("out/frame-000002.jpg").exists());
    }
}
