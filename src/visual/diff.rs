use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

use crate::geometry::geometry_model::BoundingBox;
use crate::visual::capture::Screenshot;

// ============================================================================
// Pixel diff
// ============================================================================

/// A pixel "changed" when any RGB channel moved by more than this.
pub const PIXEL_SENSITIVITY: u8 = 30;

/// Padding around the element for the tight crop.
pub const TIGHT_PAD: f64 = 20.0;

/// Padding around the element for the local crop.
pub const LOCAL_PAD: f64 = 100.0;

/// Global change above this reads as a page navigation.
pub const NAVIGATION_RATIO: f64 = 0.20;

/// Local change above this (with a quiet tight crop) reads as a side effect.
pub const CASCADE_LOCAL_RATIO: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiffResult {
    pub ratio: f64,
    pub changed_pixels: u64,
    pub total_pixels: u64,
    /// The "after" raster had to be resized to match "before"
    pub resized: bool,
}

impl DiffResult {
    fn empty() -> Self {
        Self {
            ratio: 0.0,
            changed_pixels: 0,
            total_pixels: 0,
            resized: false,
        }
    }
}

/// Fraction of differing pixels between two captures, optionally within a
/// crop. Mismatched dimensions are reconciled by resizing `after`.
pub fn diff(before: &Screenshot, after: &Screenshot, crop: Option<&BoundingBox>) -> DiffResult {
    let resized = before.width() != after.width() || before.height() != after.height();
    let after_img = if resized {
        image::imageops::resize(
            after.image(),
            before.width(),
            before.height(),
            FilterType::Nearest,
        )
    } else {
        after.image().clone()
    };

    let (x, y, w, h) = match crop {
        Some(bbox) => match bbox.clip_to(before.width(), before.height()) {
            Some(bounds) => bounds,
            None => return DiffResult { resized, ..DiffResult::empty() },
        },
        None => (0, 0, before.width(), before.height()),
    };

    let mut changed = 0u64;
    for py in y..y + h {
        for px in x..x + w {
            let a = before.image().get_pixel(px, py);
            let b = after_img.get_pixel(px, py);
            let delta = a.0[..3]
                .iter()
                .zip(b.0[..3].iter())
                .map(|(p, q)| p.abs_diff(*q))
                .max()
                .unwrap_or(0);
            if delta > PIXEL_SENSITIVITY {
                changed += 1;
            }
        }
    }

    let total = w as u64 * h as u64;
    DiffResult {
        ratio: if total == 0 { 0.0 } else { changed as f64 / total as f64 },
        changed_pixels: changed,
        total_pixels: total,
        resized,
    }
}

/// Diff ratios at the three nested crops around one element.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScaleDiff {
    pub tight: f64,
    pub local: f64,
    pub global: f64,
}

pub fn three_scale_diff(before: &Screenshot, after: &Screenshot, bbox: &BoundingBox) -> ScaleDiff {
    ScaleDiff {
        tight: diff(before, after, Some(&bbox.expand(TIGHT_PAD))).ratio,
        local: diff(before, after, Some(&bbox.expand(LOCAL_PAD))).ratio,
        global: diff(before, after, None).ratio,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiffClass {
    Responsive,
    Navigation,
    CascadeEffect,
    WeakFeedback,
    NoResponse,
}

/// Classify a three-scale diff. Checks run in priority order; the first
/// match wins.
pub fn classify_diff(scales: &ScaleDiff, threshold: f64) -> DiffClass {
    if scales.tight > threshold {
        DiffClass::Responsive
    } else if scales.global > NAVIGATION_RATIO {
        DiffClass::Navigation
    } else if scales.local > CASCADE_LOCAL_RATIO && scales.tight < threshold {
        DiffClass::CascadeEffect
    } else if scales.tight > 0.0 && scales.tight < threshold {
        DiffClass::WeakFeedback
    } else {
        DiffClass::NoResponse
    }
}
