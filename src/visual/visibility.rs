use image::Rgba;
use serde::{Deserialize, Serialize};

use crate::geometry::geometry_model::{BoundingBox, Visibility};
use crate::visual::capture::{within_tolerance, Screenshot, BACKGROUND_TOLERANCE};

/// Ink below this fraction renders nothing.
pub const INVISIBLE_BELOW: f64 = 0.05;

/// Ink above this fraction is fully visible.
pub const VISIBLE_ABOVE: f64 = 0.50;

/// Alpha at or below this counts as transparent.
const TRANSPARENT_ALPHA: u8 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisibilityCheck {
    /// Fraction of non-transparent, non-background pixels in the box
    pub ink_ratio: f64,
    pub visibility: Visibility,
}

/// Rendered visibility of one element from a full-viewport capture.
/// An empty or off-screen box yields `Unknown`.
pub fn check_visibility(
    shot: &Screenshot,
    bbox: &BoundingBox,
    background: [u8; 4],
) -> VisibilityCheck {
    let Some(crop) = shot.crop(bbox) else {
        return VisibilityCheck {
            ink_ratio: 0.0,
            visibility: Visibility::Unknown,
        };
    };

    let background = Rgba(background);
    let total = crop.image().pixels().len();
    let ink = crop
        .image()
        .pixels()
        .filter(|px| px[3] > TRANSPARENT_ALPHA && !within_tolerance(px, &background, BACKGROUND_TOLERANCE))
        .count();

    let ink_ratio = if total == 0 { 0.0 } else { ink as f64 / total as f64 };
    VisibilityCheck {
        ink_ratio,
        visibility: classify_ink(ink_ratio),
    }
}

pub fn classify_ink(ink_ratio: f64) -> Visibility {
    if ink_ratio < INVISIBLE_BELOW {
        Visibility::Invisible
    } else if ink_ratio <= VISIBLE_ABOVE {
        Visibility::Partial
    } else {
        Visibility::Visible
    }
}
