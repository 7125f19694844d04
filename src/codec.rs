//! Still-image wire codec used on both sides of `/detect`.

use std::io::Cursor;
use std::str::FromStr;

use anyhow::anyhow;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, ImageResult, RgbImage};
use serde::Deserialize;

pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Encoding used for request and response bodies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    #[default]
    Jpeg,
    Png,
}

impl WireFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            WireFormat::Jpeg => "image/jpeg",
            WireFormat::Png => "image/png",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            WireFormat::Jpeg => "jpg",
            WireFormat::Png => "png",
        }
    }
}

impl FromStr for WireFormat {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" | "image/jpeg" => Ok(WireFormat::Jpeg),
            "png" | "image/png" => Ok(WireFormat::Png),
            other => Err(anyhow!(
                "unsupported wire format '{}'; expected jpeg or png",
                other
            )),
        }
    }
}

/// Encode an opaque RGB image. `jpeg_quality` is ignored for PNG.
pub fn encode(image: &RgbImage, format: WireFormat, jpeg_quality: u8) -> ImageResult<Vec<u8>> {
    let mut buffer = Vec::new();
    match format {
        WireFormat::Jpeg => {
            JpegEncoder::new_with_quality(&mut buffer, jpeg_quality.clamp(1, 100))
                .encode_image(image)?;
        }
        WireFormat::Png => {
            DynamicImage::ImageRgb8(image.clone())
                .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)?;
        }
    }
    Ok(buffer)
}

/// Decode any supported still image into 3-channel RGB, dropping alpha.
pub fn decode(bytes: &[u8]) -> ImageResult<RgbImage> {
    Ok(image::load_from_memory(bytes)?.into_rgb8())
}
