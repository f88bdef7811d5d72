use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use crate::geometry::geometry_model::{Geometry, NodeDescriptor, Visibility};
use crate::geometry::selector::{parse_selector, SelectorList};
use crate::input::detector::match_heuristic;
use crate::repair::classify::ClassifiedError;
use crate::repair::patch::{
    Patch, FORCE_DISPLAY, FORCE_VISIBLE, HIDING_CLASSES, PASS_THROUGH, POINTER_AUTO,
};

// ============================================================================
// Patch safety gate
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum PatchRejection {
    Malformed { selector: String, detail: String },
    HidesInteractive { selector: String, node: String, what: String },
    ReducesInteractive { before: usize, after: usize },
    OutOfScope { selector: String },
}

impl fmt::Display for PatchRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatchRejection::Malformed { selector, detail } => {
                write!(f, "malformed patch for '{}': {}", selector, detail)
            }
            PatchRejection::HidesInteractive { selector, node, what } => {
                write!(f, "patch '{}' adds hiding {} to interactive element {}", selector, what, node)
            }
            PatchRejection::ReducesInteractive { before, after } => {
                write!(f, "patch set reduces interactive elements from {} to {}", before, after)
            }
            PatchRejection::OutOfScope { selector } => {
                write!(f, "selector '{}' is outside the declared error set", selector)
            }
        }
    }
}

/// True if a `property: value` declaration hides the element or stops it
/// taking clicks.
pub fn is_hiding_style(property: &str, value: &str) -> bool {
    let property = property.trim().to_ascii_lowercase();
    let value = value.trim().trim_end_matches(';').trim().to_ascii_lowercase();
    match property.as_str() {
        "display" => value == "none",
        "visibility" => value == "hidden" || value == "collapse",
        "opacity" => value.parse::<f64>().map(|o| o < 0.05).unwrap_or(false),
        "pointer-events" => value == "none",
        "transform" => has_zero_scale(&value),
        "width" | "height" | "max-width" | "max-height" => {
            value == "0" || value.starts_with("0px") || value.starts_with("0%")
        }
        _ => false,
    }
}

/// `scale(0)`, `scaleX(0)` and friends collapse the element to nothing.
fn has_zero_scale(value: &str) -> bool {
    ["scale(", "scalex(", "scaley(", "scale3d("].iter().any(|func| {
        value.match_indices(func).any(|(at, _)| {
            let args = &value[at + func.len()..];
            let first = args.split([',', ')']).next().unwrap_or("").trim();
            first.parse::<f64>().is_ok_and(|v| v == 0.0)
        })
    })
}

fn is_hiding_class(class: &str) -> bool {
    HIDING_CLASSES.contains(&class) || class == PASS_THROUGH
}

fn valid_class_name(class: &str) -> bool {
    let mut chars = class.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '-' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn valid_property(property: &str) -> bool {
    !property.is_empty()
        && property
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// One declaration value. A trailing `;` is tolerated; any other `;` would
/// smuggle a second declaration past the hiding check.
fn valid_value(value: &str) -> bool {
    let value = value.trim().trim_end_matches(';');
    !value.trim().is_empty()
        && !value.contains(['{', '}', '<', ';'])
        && !value.contains("!important")
}

/// Simulated per-node state after a patch set lands.
#[derive(Default)]
struct NodeEdit {
    added: BTreeSet<String>,
    removed: BTreeSet<String>,
    styles: BTreeMap<String, String>,
}

/// Checks patch sets against the pre-patch geometry and the error set they
/// claim to address.
pub struct PatchValidator<'a> {
    geometry: &'a Geometry,
    errors: &'a [ClassifiedError],
}

impl<'a> PatchValidator<'a> {
    pub fn new(geometry: &'a Geometry, errors: &'a [ClassifiedError]) -> Self {
        Self { geometry, errors }
    }

    /// All-or-nothing: the first failing patch rejects the whole set.
    pub fn validate(&self, patches: &[Patch]) -> Result<(), PatchRejection> {
        let mut parsed: Vec<(&Patch, SelectorList)> = Vec::with_capacity(patches.len());
        for patch in patches {
            let selector = self.check_well_formed(patch)?;
            parsed.push((patch, selector));
        }

        for (patch, selector) in &parsed {
            self.check_scope(patch, selector)?;
            self.check_no_hiding(patch, selector)?;
        }

        let before = self.count_interactive(&BTreeMap::new());
        let edits = self.simulate(&parsed);
        let after = self.count_interactive(&edits);
        if after < before {
            return Err(PatchRejection::ReducesInteractive { before, after });
        }
        Ok(())
    }

    fn check_well_formed(&self, patch: &Patch) -> Result<SelectorList, PatchRejection> {
        let malformed = |detail: String| PatchRejection::Malformed {
            selector: patch.selector.clone(),
            detail,
        };
        if patch.selector.contains(['{', '}', '<', ';']) {
            return Err(malformed("selector contains markup characters".to_string()));
        }
        let selector = parse_selector(&patch.selector).map_err(|e| malformed(e.to_string()))?;
        for class in patch.add_classes.iter().chain(&patch.remove_classes) {
            if !valid_class_name(class) {
                return Err(malformed(format!("invalid class name '{}'", class)));
            }
        }
        for (property, value) in &patch.add_styles {
            if !valid_property(property) || !valid_value(value) {
                return Err(malformed(format!("invalid declaration '{}: {}'", property, value)));
            }
        }
        for property in &patch.remove_styles {
            if !valid_property(property) {
                return Err(malformed(format!("invalid property '{}'", property)));
            }
        }
        Ok(selector)
    }

    fn error_targets(&self) -> Vec<&'a NodeDescriptor> {
        let mut targets = Vec::new();
        for error in self.errors {
            for selector in std::iter::once(error.selector.as_str()).chain(error.blocking_selector.as_deref()) {
                if let Some(node) = self.geometry.find_by_selector(selector) {
                    targets.push(node);
                } else if let Ok(list) = parse_selector(selector) {
                    targets.extend(list.select(self.geometry));
                }
            }
        }
        targets
    }

    /// In scope: the selector names an error target or blocker verbatim, or
    /// matches at least one element that is a target, sits inside one, or
    /// wraps one. A shared base class reaching a healthy sibling is allowed.
    fn check_scope(&self, patch: &Patch, selector: &SelectorList) -> Result<(), PatchRejection> {
        let declared = self.errors.iter().any(|e| {
            e.selector == patch.selector || e.blocking_selector.as_deref() == Some(patch.selector.as_str())
        });
        if declared {
            return Ok(());
        }

        let targets = self.error_targets();
        let matched = selector.select(self.geometry);
        let related = |n: &NodeDescriptor| {
            targets
                .iter()
                .any(|t| n.is_within(t) || t.is_descendant_of(n))
        };
        if matched.iter().any(|n| related(n)) {
            return Ok(());
        }
        Err(PatchRejection::OutOfScope {
            selector: patch.selector.clone(),
        })
    }

    fn check_no_hiding(&self, patch: &Patch, selector: &SelectorList) -> Result<(), PatchRejection> {
        let hiding_class = patch.add_classes.iter().find(|c| is_hiding_class(c));
        let hiding_style = patch
            .add_styles
            .iter()
            .find(|(p, v)| is_hiding_style(p, v))
            .map(|(p, v)| format!("style {}: {}", p, v));
        let what = match (hiding_class, hiding_style) {
            (Some(class), _) => format!("class '{}'", class),
            (None, Some(style)) => style,
            (None, None) => return Ok(()),
        };

        match selector
            .select(self.geometry)
            .into_iter()
            .find(|n| match_heuristic(n).is_some())
        {
            Some(node) => Err(PatchRejection::HidesInteractive {
                selector: patch.selector.clone(),
                node: node.selector.clone(),
                what,
            }),
            None => Ok(()),
        }
    }

    fn simulate(&self, parsed: &[(&Patch, SelectorList)]) -> BTreeMap<usize, NodeEdit> {
        let mut edits: BTreeMap<usize, NodeEdit> = BTreeMap::new();
        for (patch, selector) in parsed {
            for node in selector.select(self.geometry) {
                let edit = edits.entry(node.index).or_default();
                for class in &patch.remove_classes {
                    edit.added.remove(class);
                    edit.removed.insert(class.clone());
                }
                for class in &patch.add_classes {
                    edit.removed.remove(class);
                    edit.added.insert(class.clone());
                }
                for (property, value) in &patch.add_styles {
                    edit.styles
                        .insert(property.to_ascii_lowercase(), value.to_ascii_lowercase());
                }
            }
        }
        edits
    }

    /// Interactive elements that are rendered and can take a click.
    fn count_interactive(&self, edits: &BTreeMap<usize, NodeEdit>) -> usize {
        let patched: Vec<NodeDescriptor> = self
            .geometry
            .iter()
            .map(|n| match edits.get(&n.index) {
                Some(edit) => {
                    let mut node = n.clone();
                    node.classes.retain(|c| !edit.removed.contains(c));
                    node.classes.extend(edit.added.iter().cloned());
                    node
                }
                None => n.clone(),
            })
            .collect();

        patched
            .iter()
            .filter(|n| match_heuristic(n).is_some())
            .filter(|n| !self.hidden_after(n, edits))
            .filter(|n| self.pointer_enabled(n, edits))
            .count()
    }

    fn hidden_after(&self, node: &NodeDescriptor, edits: &BTreeMap<usize, NodeEdit>) -> bool {
        let edit = edits.get(&node.index);
        let forced = node.has_class(FORCE_VISIBLE) || node.has_class(FORCE_DISPLAY);
        if node.visibility == Visibility::Invisible && !forced {
            return true;
        }
        let hiding_class = node
            .classes
            .iter()
            .any(|c| HIDING_CLASSES.contains(&c.as_str()) && edit.is_some_and(|e| e.added.contains(c)));
        let hiding_style = edit.is_some_and(|e| {
            e.styles
                .iter()
                .any(|(p, v)| p != "pointer-events" && is_hiding_style(p, v))
        });
        hiding_class || hiding_style
    }

    /// Resolve inherited `pointer-events` along the ancestor chain: the
    /// nearest explicit setting wins.
    fn pointer_enabled(&self, node: &NodeDescriptor, edits: &BTreeMap<usize, NodeEdit>) -> bool {
        let setting = |n: &NodeDescriptor| -> Option<bool> {
            let edit = edits.get(&n.index)?;
            let class_auto = edit.added.contains(POINTER_AUTO);
            let class_none = edit.added.contains(PASS_THROUGH);
            match edit.styles.get("pointer-events").map(|v| v.trim()) {
                Some("none") => Some(false),
                Some("auto") => Some(true),
                _ if class_auto => Some(true),
                _ if class_none => Some(false),
                _ => None,
            }
        };
        if let Some(enabled) = setting(node) {
            return enabled;
        }
        for ancestor in self.geometry.ancestors_of(node) {
            if let Some(enabled) = setting(ancestor) {
                return enabled;
            }
        }
        true
    }
}
