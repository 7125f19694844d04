//! Detection overlays.
//!
//! Boxes and labels are drawn onto a transparent RGBA layer which is then
//! composited onto a copy of the source frame in one pass. The caller's image
//! is never touched.

mod font;

use std::collections::BTreeMap;

use image::{imageops, DynamicImage, Rgb, RgbImage, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::config::RenderSettings;
use crate::detect::{BoundingBox, Detection};

pub use font::LabelFont;

const UNMAPPED_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);
const LABEL_BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);
const LABEL_TEXT: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Class label -> outline color.
#[derive(Clone, Debug)]
pub struct ClassPalette {
    colors: BTreeMap<String, Rgba<u8>>,
}

impl ClassPalette {
    pub fn with_overrides(overrides: &BTreeMap<String, [u8; 3]>) -> Self {
        let mut palette = Self::default();
        for (class, [r, g, b]) in overrides {
            palette.colors.insert(class.clone(), Rgba([*r, *g, *b, 255]));
        }
        palette
    }

    /// Unmapped classes are drawn white.
    pub fn color_for(&self, class_name: &str) -> Rgba<u8> {
        self.colors
            .get(class_name)
            .copied()
            .unwrap_or(UNMAPPED_COLOR)
    }
}

impl Default for ClassPalette {
    fn default() -> Self {
        let mut colors = BTreeMap::new();
        colors.insert("Normal".to_string(), Rgba([0, 255, 0, 255]));
        colors.insert("Shoplifting".to_string(), Rgba([255, 0, 0, 255]));
        Self { colors }
    }
}

/// `"{class}: {confidence}"` with two decimals.
pub fn label_for(detection: &Detection) -> String {
    format!("{}: {:.2}", detection.class_name, detection.confidence)
}

pub struct AnnotationRenderer {
    palette: ClassPalette,
    font: LabelFont,
    line_width: u32,
}

impl AnnotationRenderer {
    pub fn new(palette: ClassPalette, font: LabelFont, line_width: u32) -> Self {
        Self {
            palette,
            font,
            line_width: line_width.max(1),
        }
    }

    pub fn from_settings(settings: &RenderSettings) -> Self {
        let font = LabelFont::load(settings.font_path.as_deref(), settings.font_px);
        Self::new(
            ClassPalette::with_overrides(&settings.class_colors),
            font,
            settings.line_width,
        )
    }

    pub fn palette(&self) -> &ClassPalette {
        &self.palette
    }

    /// Draw every detection, in order, and return the annotated copy.
    pub fn render(&self, image: &RgbImage, detections: &[Detection]) -> RgbImage {
        if detections.is_empty() || image.width() == 0 || image.height() == 0 {
            return image.clone();
        }
        let mut overlay = RgbaImage::new(image.width(), image.height());
        for detection in detections {
            self.draw_detection(&mut overlay, detection);
        }

        let mut composed = DynamicImage::ImageRgb8(image.clone()).into_rgba8();
        imageops::overlay(&mut composed, &overlay, 0, 0);
        drop_alpha(&composed)
    }

    fn draw_detection(&self, overlay: &mut RgbaImage, detection: &Detection) {
        let (width, height) = overlay.dimensions();
        let Some(bounds) = clamp_box(&detection.bbox, width, height) else {
            log::debug!("skipping degenerate box for {}", detection.class_name);
            return;
        };
        let color = self.palette.color_for(&detection.class_name);
        for inset in 0..self.line_width as i32 {
            let w = bounds.w - 2 * inset;
            let h = bounds.h - 2 * inset;
            if w <= 0 || h <= 0 {
                break;
            }
            let rect = Rect::at(bounds.x + inset, bounds.y + inset).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(overlay, rect, color);
        }

        let label = label_for(detection);
        let (text_w, text_h) = self.font.measure(&label);
        if text_w == 0 || text_h == 0 {
            return;
        }
        let label_y = (bounds.y - text_h as i32).max(0);
        draw_filled_rect_mut(
            overlay,
            Rect::at(bounds.x, label_y).of_size(text_w, text_h),
            LABEL_BACKGROUND,
        );
        self.font.draw(overlay, bounds.x, label_y, &label, LABEL_TEXT);
    }
}

struct PixelBounds {
    x: i32,
    y: i32,
    w: i32,
    h: i32,
}

fn clamp_box(bbox: &BoundingBox, width: u32, height: u32) -> Option<PixelBounds> {
    let coords = [bbox.x1, bbox.y1, bbox.x2, bbox.y2];
    if coords.iter().any(|c| !c.is_finite()) {
        return None;
    }
    let max_x = width as f32 - 1.0;
    let max_y = height as f32 - 1.0;
    let x1 = bbox.x1.min(bbox.x2).clamp(0.0, max_x).round() as i32;
    let y1 = bbox.y1.min(bbox.y2).clamp(0.0, max_y).round() as i32;
    let x2 = bbox.x1.max(bbox.x2).clamp(0.0, max_x).round() as i32;
    let y2 = bbox.y1.max(bbox.y2).clamp(0.0, max_y).round() as i32;
    Some(PixelBounds {
        x: x1,
        y: y1,
        w: x2 - x1 + 1,
        h: y2 - y1 + 1,
    })
}

fn drop_alpha(image: &RgbaImage) -> RgbImage {
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b, _] = image.get_pixel(x, y).0;
        Rgb([r, g, b])
    })
}
