use std::collections::HashMap;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use image::codecs::png::PngEncoder;
use image::{ImageEncoder as _, Rgba, RgbaImage};

use crate::browser::sandbox::LivePage;
use crate::error::PipelineError;
use crate::geometry::geometry_model::BoundingBox;

/// Per-channel tolerance for "same color as the background".
pub const BACKGROUND_TOLERANCE: u8 = 12;

/// A full-viewport raster.
#[derive(Debug, Clone, PartialEq)]
pub struct Screenshot {
    image: RgbaImage,
}

impl Screenshot {
    pub fn new(image: RgbaImage) -> Self {
        Self { image }
    }

    /// A single-color raster, mostly useful as a stand-in capture.
    pub fn filled(width: u32, height: u32, color: [u8; 4]) -> Self {
        Self::new(RgbaImage::from_pixel(width, height, Rgba(color)))
    }

    pub fn from_png(bytes: &[u8]) -> Result<Self, PipelineError> {
        let decoded = image::load_from_memory(bytes)
            .map_err(|e| PipelineError::Image(format!("failed to decode screenshot: {}", e)))?;
        Ok(Self::new(decoded.to_rgba8()))
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbaImage {
        &mut self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Crop to `bbox`, clipped to the raster. `None` if nothing remains.
    pub fn crop(&self, bbox: &BoundingBox) -> Option<Screenshot> {
        let (x, y, w, h) = bbox.clip_to(self.width(), self.height())?;
        Some(Screenshot::new(
            image::imageops::crop_imm(&self.image, x, y, w, h).to_image(),
        ))
    }

    pub fn to_png(&self) -> Result<Vec<u8>, PipelineError> {
        let mut buf = Vec::new();
        PngEncoder::new(&mut buf)
            .write_image(
                self.image.as_raw(),
                self.width(),
                self.height(),
                image::ExtendedColorType::Rgba8,
            )
            .map_err(|e| PipelineError::Image(format!("failed to encode PNG: {}", e)))?;
        Ok(buf)
    }

    pub fn to_base64_png(&self) -> Result<String, PipelineError> {
        Ok(BASE64_STANDARD.encode(self.to_png()?))
    }

    pub fn save(&self, path: &Path) -> Result<(), PipelineError> {
        let png = self.to_png()?;
        std::fs::write(path, png).map_err(|e| PipelineError::io(path.display(), e))
    }
}

/// Take a full-viewport capture of the live page.
pub fn capture(page: &mut dyn LivePage) -> Result<Screenshot, PipelineError> {
    page.screenshot()
}

pub fn within_tolerance(a: &Rgba<u8>, b: &Rgba<u8>, tolerance: u8) -> bool {
    a.0.iter()
        .zip(b.0.iter())
        .take(3)
        .all(|(x, y)| x.abs_diff(*y) <= tolerance)
}

/// Most frequent color, bucketed to 5 bits per channel. Returns the mean of
/// the winning bucket.
pub fn dominant_color(shot: &Screenshot) -> Rgba<u8> {
    let mut buckets: HashMap<(u8, u8, u8), (u64, [u64; 3])> = HashMap::new();
    for px in shot.image.pixels() {
        let key = (px[0] >> 3, px[1] >> 3, px[2] >> 3);
        let entry = buckets.entry(key).or_insert((0, [0; 3]));
        entry.0 += 1;
        entry.1[0] += px[0] as u64;
        entry.1[1] += px[1] as u64;
        entry.1[2] += px[2] as u64;
    }

    buckets
        .into_iter()
        .max_by(|a, b| a.1.0.cmp(&b.1.0).then_with(|| b.0.cmp(&a.0)))
        .map(|(_, (count, sums))| {
            Rgba([
                (sums[0] / count) as u8,
                (sums[1] / count) as u8,
                (sums[2] / count) as u8,
                255,
            ])
        })
        .unwrap_or(Rgba([255, 255, 255, 255]))
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlankAnalysis {
    /// Fraction of pixels within tolerance of the dominant color
    pub uniform_ratio: f64,
    pub background: [u8; 4],
    pub blank: bool,
}

/// A page is blank when more than `threshold` of its pixels match the
/// dominant background color.
pub fn analyze_blank(shot: &Screenshot, threshold: f64) -> BlankAnalysis {
    let background = dominant_color(shot);
    let total = shot.image.pixels().len() as u64;
    let uniform = shot
        .image
        .pixels()
        .filter(|px| within_tolerance(px, &background, BACKGROUND_TOLERANCE))
        .count() as u64;

    let uniform_ratio = if total == 0 {
        1.0
    } else {
        uniform as f64 / total as f64
    };

    BlankAnalysis {
        uniform_ratio,
        background: background.0,
        blank: uniform_ratio > threshold,
    }
}
