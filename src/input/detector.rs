use log::debug;
use serde::{Deserialize, Serialize};

use crate::geometry::geometry_model::{Geometry, NodeDescriptor, Viewport, Visibility};
use crate::visual::capture::Screenshot;
use crate::visual::visibility::check_visibility;

// ============================================================================
// Ranked input heuristics
// ============================================================================

/// Why a node was picked as a candidate. Lower rank wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Heuristic {
    NativeButton,
    AriaButton,
    ExplicitMarker,
    ClassConvention,
    ChoiceInput,
}

impl Heuristic {
    pub fn rank(&self) -> u8 {
        match self {
            Heuristic::NativeButton => 1,
            Heuristic::AriaButton => 2,
            Heuristic::ExplicitMarker => 3,
            Heuristic::ClassConvention => 4,
            Heuristic::ChoiceInput => 5,
        }
    }
}

/// Class-name fragments that conventionally mark a clickable element.
const CLASS_HINTS: &[&str] = &[
    "btn", "button", "option", "choice", "answer", "card", "tile", "clickable", "toggle", "flip",
];

fn class_convention(node: &NodeDescriptor) -> bool {
    node.classes.iter().any(|class| {
        class
            .to_ascii_lowercase()
            .split(['-', '_'])
            .any(|segment| CLASS_HINTS.contains(&segment))
    })
}

/// Best-ranked heuristic matching `node`, if any.
pub fn match_heuristic(node: &NodeDescriptor) -> Option<Heuristic> {
    let input_type = node.attr("type").map(|t| t.to_ascii_lowercase());
    let input_type = input_type.as_deref();

    if node.tag == "button"
        || (node.tag == "input" && matches!(input_type, Some("button" | "submit" | "reset")))
    {
        return Some(Heuristic::NativeButton);
    }
    if node.attr("role") == Some("button") {
        return Some(Heuristic::AriaButton);
    }
    if node.attributes.contains_key("data-option")
        || node.attributes.contains_key("data-submit")
        || node.attributes.contains_key("onclick")
    {
        return Some(Heuristic::ExplicitMarker);
    }
    if class_convention(node) {
        return Some(Heuristic::ClassConvention);
    }
    if node.tag == "input" && matches!(input_type, Some("radio" | "checkbox")) {
        return Some(Heuristic::ChoiceInput);
    }
    None
}

/// True for anything the heuristics recognize as interactive, regardless of
/// position or rendered visibility.
pub fn is_interactive(node: &NodeDescriptor) -> bool {
    match_heuristic(node).is_some()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputCandidate {
    pub node: NodeDescriptor,
    pub selector: String,
    pub heuristic: Heuristic,
    pub rank: u8,
    pub visibility: Visibility,
    /// Rendered ink inside the box, once the visibility check ran
    pub ink_ratio: Option<f64>,
}

impl InputCandidate {
    pub fn path(&self) -> &str {
        &self.node.path
    }
}

fn in_viewport(node: &NodeDescriptor, viewport: &Viewport) -> bool {
    node.bbox.area() > 0.0 && node.bbox.intersects(&viewport.bounds())
}

/// Select up to `max` candidates, best heuristic first, document order within
/// a heuristic. A node nested inside (or wrapping) an already chosen
/// candidate is skipped so one control is never clicked twice.
pub fn detect_candidates(geometry: &Geometry, viewport: &Viewport, max: usize) -> Vec<InputCandidate> {
    let mut ranked: Vec<(Heuristic, &NodeDescriptor)> = geometry
        .iter()
        .filter(|n| in_viewport(n, viewport) && !n.is_disabled())
        .filter_map(|n| match_heuristic(n).map(|h| (h, n)))
        .collect();
    ranked.sort_by_key(|(h, n)| (h.rank(), n.index));

    let mut chosen: Vec<InputCandidate> = Vec::new();
    for (heuristic, node) in ranked {
        if chosen.len() >= max {
            break;
        }
        let overlaps = chosen
            .iter()
            .any(|c| node.is_within(&c.node) || c.node.is_within(node));
        if overlaps {
            continue;
        }
        chosen.push(InputCandidate {
            node: node.clone(),
            selector: node.selector.clone(),
            heuristic,
            rank: heuristic.rank(),
            visibility: node.visibility,
            ink_ratio: None,
        });
    }

    debug!(
        "detected {} candidate(s) from {} nodes",
        chosen.len(),
        geometry.len()
    );
    chosen
}

/// Replace each candidate's visibility with the rendered check. A node the
/// browser already reports invisible stays invisible.
pub fn evaluate_visibility(candidates: &mut [InputCandidate], shot: &Screenshot, background: [u8; 4]) {
    for candidate in candidates.iter_mut() {
        let check = check_visibility(shot, &candidate.node.bbox, background);
        candidate.ink_ratio = Some(check.ink_ratio);
        candidate.visibility = if candidate.node.visibility == Visibility::Invisible {
            Visibility::Invisible
        } else {
            check.visibility
        };
    }
}
