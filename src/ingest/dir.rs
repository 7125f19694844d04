use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use super::{FrameSource, SourceStats};
use crate::codec;
use crate::frame::Frame;

/// Replays still images from a local directory in file-name order.
pub struct ImageDirSource {
    dir: PathBuf,
    looping: bool,
    files: Vec<PathBuf>,
    cursor: usize,
    frame_count: u64,
    last_error: Option<String>,
}

impl ImageDirSource {
    pub fn new(dir: impl Into<PathBuf>, looping: bool) -> Self {
        Self {
            dir: dir.into(),
            looping,
            files: Vec::new(),
            cursor: 0,
            frame_count: 0,
            last_error: None,
        }
    }
}

impl FrameSource for ImageDirSource {
    fn connect(&mut self) -> Result<()> {
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("open frame directory {}", self.dir.display()))?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && is_still_image(&path) {
                files.push(path);
            }
        }
        if files.is_empty() {
            return Err(anyhow!(
                "no .jpg/.jpeg/.png files in {}",
                self.dir.display()
            ));
        }
        files.sort();
        log::info!(
            "ImageDirSource: {} frame(s) in {}",
            files.len(),
            self.dir.display()
        );
        self.files = files;
        self.cursor = 0;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if self.files.is_empty() {
            return Err(anyhow!("image directory source not connected"));
        }
        if self.cursor >= self.files.len() {
            if !self.looping {
                return Err(anyhow!("image directory exhausted"));
            }
            self.cursor = 0;
        }
        let path = &self.files[self.cursor];
        self.cursor += 1;
        let bytes = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
        match codec::decode(&bytes) {
            Ok(image) => {
                self.frame_count += 1;
                self.last_error = None;
                Ok(Frame::new(image))
            }
            Err(err) => {
                self.last_error = Some(err.to_string());
                Err(anyhow!("decode {}: {}", path.display(), err))
            }
        }
    }

    fn is_healthy(&self) -> bool {
        !self.files.is_empty() && self.last_error.is_none()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.dir.display().to_string(),
        }
    }
}

fn is_still_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::WireFormat;
    use image::{Rgb, RgbImage};

    fn write_png(dir: &Path, name: &str, shade: u8) {
        let image = RgbImage::from_pixel(4, 4, Rgb([shade, shade, shade]));
        let bytes = codec::encode(&image, WireFormat::Png, 90).unwrap();
        std::fs::write(dir.join(name), bytes).unwrap();
    }

    #[test]
    fn replays_sorted_and_loops() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "b.png", 20);
        write_png(dir.path(), "a.png", 10);
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let mut source = ImageDirSource::new(dir.path(), true);
        source.connect().unwrap();
        let shades: Vec<u8> = (0..3)
            .map(|_| source.next_frame().unwrap().image.get_pixel(0, 0).0[0])
            .collect();
        assert_eq!(shades, vec![10, 20, 10]);
        assert_eq!(source.stats().frames_captured, 3);
    }

    #[test]
    fn non_looping_source_runs_dry() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "only.png", 1);
        let mut source = ImageDirSource::new(dir.path(), false);
        source.connect().unwrap();
        source.next_frame().unwrap();
        assert!(source.next_frame().is_err());
    }

    #[test]
    fn empty_or_missing_directory_fails_connect() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ImageDirSource::new(dir.path(), true).connect().is_err());
        assert!(ImageDirSource::new(dir.path().join("nope"), true)
            .connect()
            .is_err());
    }

    #[test]
    fn corrupt_file_is_a_per_frame_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"garbage").unwrap();
        write_png(dir.path(), "b.png", 7);
        let mut source = ImageDirSource::new(dir.path(), false);
        source.connect().unwrap();
        assert!(source.next_frame().is_err());
        assert!(!source.is_healthy());
        assert!(source.next_frame().is_ok());
        assert!(source.is_healthy());
    }
}
