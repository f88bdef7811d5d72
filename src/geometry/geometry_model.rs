use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

// ============================================================================
// Geometry snapshot types produced by one extraction pass
// ============================================================================

/// Target display resolution in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn bounds(&self) -> BoundingBox {
        BoundingBox::new(0.0, 0.0, self.width as f64, self.height as f64)
    }

    pub fn area(&self) -> f64 {
        self.width as f64 * self.height as f64
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 600,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    pub fn area(&self) -> f64 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    pub fn right(&self) -> f64 {
        self.x + self.w
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.h
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    /// Grow the box by `pad` pixels on every side.
    pub fn expand(&self, pad: f64) -> BoundingBox {
        BoundingBox::new(self.x - pad, self.y - pad, self.w + 2.0 * pad, self.h + 2.0 * pad)
    }

    /// Clip to an image of `width` x `height`, returning integer pixel bounds
    /// `(x, y, w, h)`, or `None` if nothing remains.
    pub fn clip_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x.floor().max(0.0);
        let y0 = self.y.floor().max(0.0);
        let x1 = self.right().ceil().min(width as f64);
        let y1 = self.bottom().ceil().min(height as f64);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZIndex {
    #[default]
    Auto,
    Value(i32),
}

impl ZIndex {
    pub fn parse(raw: &str) -> ZIndex {
        raw.trim().parse::<i32>().map(ZIndex::Value).unwrap_or(ZIndex::Auto)
    }

    /// Numeric stacking value, with `auto` treated as 0.
    pub fn effective(&self) -> i32 {
        match self {
            ZIndex::Auto => 0,
            ZIndex::Value(v) => *v,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointerEvents {
    #[default]
    Auto,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Visible,
    Partial,
    Invisible,
    #[default]
    Unknown,
}

impl Visibility {
    pub fn parse(raw: &str) -> Visibility {
        match raw {
            "visible" => Visibility::Visible,
            "partial" => Visibility::Partial,
            "invisible" => Visibility::Invisible,
            _ => Visibility::Unknown,
        }
    }
}

/// The computed-style subset the classifier and rule engine reason about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputedStyle {
    pub opacity: f64,
    pub display: String,
    pub visibility: String,
    pub position: String,
    pub transform: String,
    pub transform_style: String,
    pub backface_visibility: String,
    pub perspective: String,
    pub cursor: String,
}

impl Default for ComputedStyle {
    fn default() -> Self {
        Self {
            opacity: 1.0,
            display: "block".to_string(),
            visibility: "visible".to_string(),
            position: "static".to_string(),
            transform: "none".to_string(),
            transform_style: "flat".to_string(),
            backface_visibility: "visible".to_string(),
            perspective: "none".to_string(),
            cursor: "auto".to_string(),
        }
    }
}

impl ComputedStyle {
    pub fn has_transform(&self) -> bool {
        !self.transform.is_empty() && self.transform != "none"
    }

    pub fn preserves_3d(&self) -> bool {
        self.transform_style == "preserve-3d"
    }

    pub fn hides_backface(&self) -> bool {
        self.backface_visibility == "hidden"
    }

    pub fn participates_in_3d(&self) -> bool {
        self.has_transform() || self.preserves_3d() || self.hides_backface()
    }
}

/// One element's geometry snapshot. Read-only once produced.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Position of the element in document order
    pub index: usize,
    pub parent: Option<usize>,
    pub tag: String,
    pub id: Option<String>,
    pub classes: BTreeSet<String>,
    pub bbox: BoundingBox,
    pub z_index: ZIndex,
    pub pointer_events: PointerEvents,
    pub visibility: Visibility,
    pub attributes: BTreeMap<String, String>,
    pub style: ComputedStyle,
    /// Structural path, e.g. `html > body:nth-of-type(1) > div:nth-of-type(2)`
    pub path: String,
    /// Preferred stable selector (`#id` when unique, otherwise the path)
    pub selector: String,
    pub nth_of_type: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl NodeDescriptor {
    pub fn has_class(&self, class: &str) -> bool {
        self.classes.contains(class)
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(|s| s.as_str())
    }

    pub fn is_disabled(&self) -> bool {
        self.attributes.contains_key("disabled") || self.attr("aria-disabled") == Some("true")
    }

    /// True if `self` sits strictly below `ancestor` in the tree.
    pub fn is_descendant_of(&self, ancestor: &NodeDescriptor) -> bool {
        is_path_descendant(&self.path, &ancestor.path)
    }

    /// True if `self` is `other` or one of its descendants.
    pub fn is_within(&self, other: &NodeDescriptor) -> bool {
        self.path == other.path || self.is_descendant_of(other)
    }
}

pub fn is_path_descendant(path: &str, ancestor_path: &str) -> bool {
    path.len() > ancestor_path.len()
        && path.starts_with(ancestor_path)
        && path[ancestor_path.len()..].starts_with(" > ")
}

/// A flat, document-ordered list of node descriptors.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Geometry {
    pub nodes: Vec<NodeDescriptor>,
}

impl Geometry {
    pub fn new(mut nodes: Vec<NodeDescriptor>) -> Self {
        nodes.sort_by_key(|n| n.index);
        Self { nodes }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeDescriptor> {
        self.nodes.iter()
    }

    pub fn get(&self, index: usize) -> Option<&NodeDescriptor> {
        self.nodes
            .binary_search_by_key(&index, |n| n.index)
            .ok()
            .map(|pos| &self.nodes[pos])
    }

    pub fn parent_of(&self, node: &NodeDescriptor) -> Option<&NodeDescriptor> {
        node.parent.and_then(|p| self.get(p))
    }

    /// Ancestors from the nearest parent outwards.
    pub fn ancestors_of(&self, node: &NodeDescriptor) -> Vec<&NodeDescriptor> {
        let mut out = Vec::new();
        let mut current = self.parent_of(node);
        while let Some(parent) = current {
            out.push(parent);
            current = self.parent_of(parent);
        }
        out
    }

    pub fn descendants_of(&self, node: &NodeDescriptor) -> Vec<&NodeDescriptor> {
        self.nodes.iter().filter(|n| n.is_descendant_of(node)).collect()
    }

    pub fn siblings_of(&self, node: &NodeDescriptor) -> Vec<&NodeDescriptor> {
        self.nodes
            .iter()
            .filter(|n| n.parent == node.parent && n.index != node.index)
            .collect()
    }

    pub fn find_by_path(&self, path: &str) -> Option<&NodeDescriptor> {
        self.nodes.iter().find(|n| n.path == path)
    }

    /// Lookup by preferred selector, falling back to structural path.
    /// Records pixel-level invisibility that computed styles can't see.
    pub fn mark_invisible(&mut self, path: &str) {
        if let Some(node) = self.nodes.iter_mut().find(|n| n.path == path) {
            node.visibility = Visibility::Invisible;
        }
    }

    pub fn find_by_selector(&self, selector: &str) -> Option<&NodeDescriptor> {
        self.nodes
            .iter()
            .find(|n| n.selector == selector)
            .or_else(|| self.find_by_path(selector))
    }

    /// Stable digest of the structural and visual state, used to confirm
    /// that a page reset actually restored the baseline.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha1::new();
        for node in &self.nodes {
            hasher.update(node.path.as_bytes());
            for class in &node.classes {
                hasher.update(class.as_bytes());
            }
            hasher.update(
                format!(
                    "{:.0},{:.0},{:.0},{:.0},{:?},{:?},{:.2}",
                    node.bbox.x,
                    node.bbox.y,
                    node.bbox.w,
                    node.bbox.h,
                    node.z_index,
                    node.visibility,
                    node.style.opacity
                )
                .as_bytes(),
            );
        }
        let digest = hasher.finalize();
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }
}
