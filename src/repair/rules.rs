use log::debug;
use serde::Serialize;

use crate::geometry::geometry_model::{Geometry, NodeDescriptor, Viewport, Visibility};
use crate::input::detector::is_interactive;
use crate::repair::classify::{ClassifiedError, ErrorKind};
use crate::repair::patch::{
    Patch, BACKFACE_HIDDEN, BACKFACE_VISIBLE, FEEDBACK, FORCE_DISPLAY, FORCE_VISIBLE,
    HIDING_CLASSES, PASS_THROUGH, POINTER_AUTO, PRESERVE_3D,
};

// ============================================================================
// Deterministic rule engine
// ============================================================================

/// What a rule may look at besides the error itself.
pub struct RuleContext<'a> {
    pub geometry: &'a Geometry,
    pub viewport: Viewport,
}

impl<'a> RuleContext<'a> {
    pub fn new(geometry: &'a Geometry, viewport: Viewport) -> Self {
        Self { geometry, viewport }
    }

    fn node(&self, selector: &str) -> Option<&'a NodeDescriptor> {
        self.geometry.find_by_selector(selector)
    }
}

pub trait FixRule {
    fn name(&self) -> &'static str;

    /// Lower runs first.
    fn priority(&self) -> u32;

    fn handles(&self, kind: ErrorKind) -> bool;

    /// Patches for one error. Empty when the rule cannot help after all.
    fn patches(&self, error: &ClassifiedError, ctx: &RuleContext) -> Vec<Patch>;
}

// ---- Visibility restore ----

pub struct VisibilityRestore;

impl FixRule for VisibilityRestore {
    fn name(&self) -> &'static str {
        "visibility-restore"
    }

    fn priority(&self) -> u32 {
        5
    }

    fn handles(&self, kind: ErrorKind) -> bool {
        kind.is_invisibility()
    }

    fn patches(&self, error: &ClassifiedError, ctx: &RuleContext) -> Vec<Patch> {
        let mut patch = match error.kind {
            ErrorKind::InvisibleDisplay => Patch::new(&error.selector)
                .add_class(FORCE_DISPLAY)
                .remove_style("display"),
            ErrorKind::InvisibleVisibility => Patch::new(&error.selector)
                .add_class(FORCE_VISIBLE)
                .remove_style("visibility"),
            _ => Patch::new(&error.selector)
                .add_class(FORCE_VISIBLE)
                .remove_style("opacity"),
        };
        if let Some(node) = ctx.node(&error.selector) {
            for class in HIDING_CLASSES.iter().filter(|c| node.has_class(c)) {
                patch = patch.remove_class(class);
            }
        }
        vec![patch]
    }
}

// ---- Z-index ----

pub struct ZIndexFix;

impl FixRule for ZIndexFix {
    fn name(&self) -> &'static str {
        "z-index"
    }

    fn priority(&self) -> u32 {
        10
    }

    fn handles(&self, kind: ErrorKind) -> bool {
        kind == ErrorKind::ZIndexConflict
    }

    fn patches(&self, error: &ClassifiedError, ctx: &RuleContext) -> Vec<Patch> {
        let Some(node) = ctx.node(&error.selector) else {
            return Vec::new();
        };

        let mut ceiling = node.z_index.effective();
        for sibling in ctx.geometry.siblings_of(node) {
            ceiling = ceiling.max(sibling.z_index.effective());
        }
        if let Some(blocker) = error.blocking_selector.as_deref().and_then(|s| ctx.node(s)) {
            ceiling = ceiling.max(blocker.z_index.effective());
            for ancestor in ctx.geometry.ancestors_of(blocker) {
                ceiling = ceiling.max(ancestor.z_index.effective());
            }
        }

        let mut patch = Patch::new(&error.selector).add_style("z-index", (ceiling + 1).to_string());
        if node.style.position == "static" {
            patch = patch.add_style("position", "relative");
        }
        vec![patch]
    }
}

// ---- Pointer events ----

pub struct PointerEventsFix;

impl FixRule for PointerEventsFix {
    fn name(&self) -> &'static str {
        "pointer-events"
    }

    fn priority(&self) -> u32 {
        20
    }

    fn handles(&self, kind: ErrorKind) -> bool {
        kind == ErrorKind::PointerIntercepted
    }

    fn patches(&self, error: &ClassifiedError, ctx: &RuleContext) -> Vec<Patch> {
        let Some(blocker_selector) = error.blocking_selector.as_deref() else {
            return Vec::new();
        };
        let mut patches = vec![Patch::new(blocker_selector).add_class(PASS_THROUGH)];

        let blocker = ctx.node(blocker_selector);
        if let Some(blocker) = blocker {
            for child in ctx.geometry.descendants_of(blocker) {
                if is_interactive(child) && child.selector != error.selector {
                    patches.push(Patch::new(&child.selector).add_class(POINTER_AUTO));
                }
            }
        }

        let blocker_z = blocker.map(|b| b.z_index.effective()).unwrap_or(0);
        let mut target = Patch::new(&error.selector)
            .add_class(POINTER_AUTO)
            .add_style("z-index", (blocker_z + 1).to_string());
        if ctx
            .node(&error.selector)
            .map(|n| n.style.position == "static")
            .unwrap_or(true)
        {
            target = target.add_style("position", "relative");
        }
        patches.push(target);
        patches
    }
}

// ---- 3D transforms ----

pub struct Transform3dFix;

impl Transform3dFix {
    /// Nearest node (self first, then ancestors) that establishes the 3D
    /// context, i.e. has a child taking part in 3D.
    fn context_root<'a>(node: &'a NodeDescriptor, ctx: &RuleContext<'a>) -> &'a NodeDescriptor {
        let mut chain = vec![node];
        chain.extend(ctx.geometry.ancestors_of(node));
        chain
            .iter()
            .copied()
            .find(|n| {
                n.style.preserves_3d()
                    || ctx
                        .geometry
                        .descendants_of(n)
                        .iter()
                        .any(|d| d.parent == Some(n.index) && d.style.participates_in_3d())
            })
            .unwrap_or(node)
    }
}

impl FixRule for Transform3dFix {
    fn name(&self) -> &'static str {
        "transform-3d"
    }

    fn priority(&self) -> u32 {
        30
    }

    fn handles(&self, kind: ErrorKind) -> bool {
        kind == ErrorKind::TransformHidden
    }

    fn patches(&self, error: &ClassifiedError, ctx: &RuleContext) -> Vec<Patch> {
        let Some(node) = ctx.node(&error.selector) else {
            return vec![Patch::new(&error.selector).add_class(PRESERVE_3D)];
        };
        let root = Self::context_root(node, ctx);
        let mut patches = vec![Patch::new(&root.selector).add_class(PRESERVE_3D)];

        // Faces: transformed descendants, plus every child of a node that
        // carries the 3D context. A face without a hidden backface shows
        // through its sibling when flipped.
        let carries_3d = |n: &NodeDescriptor| n.style.preserves_3d() || n.style.has_transform();
        for face in ctx.geometry.descendants_of(root).into_iter().filter(|d| {
            !d.style.preserves_3d()
                && (d.style.has_transform()
                    || d.style.hides_backface()
                    || ctx.geometry.parent_of(d).is_some_and(|p| carries_3d(p)))
        }) {
            if face.style.hides_backface() && face.visibility == Visibility::Invisible {
                patches.push(Patch::new(&face.selector).add_class(BACKFACE_VISIBLE));
            } else if !face.style.hides_backface() {
                patches.push(Patch::new(&face.selector).add_class(BACKFACE_HIDDEN));
            }
        }
        patches
    }
}

// ---- Feedback ----

pub struct FeedbackAmplify;

impl FixRule for FeedbackAmplify {
    fn name(&self) -> &'static str {
        "feedback"
    }

    fn priority(&self) -> u32 {
        50
    }

    fn handles(&self, kind: ErrorKind) -> bool {
        kind == ErrorKind::WeakFeedback
    }

    fn patches(&self, error: &ClassifiedError, _ctx: &RuleContext) -> Vec<Patch> {
        vec![Patch::new(&error.selector).add_class(FEEDBACK)]
    }
}

// ============================================================================
// Fixer
// ============================================================================

#[derive(Debug, Clone, Default, Serialize)]
pub struct FixOutcome {
    pub patches: Vec<Patch>,
    pub fixed: Vec<ClassifiedError>,
    pub unfixed: Vec<ClassifiedError>,
    /// `(rule, selector)` for each error a rule produced patches for
    pub applied_rules: Vec<(String, String)>,
}

pub struct DeterministicFixer {
    rules: Vec<Box<dyn FixRule>>,
}

impl Default for DeterministicFixer {
    fn default() -> Self {
        Self::new(vec![
            Box::new(VisibilityRestore),
            Box::new(ZIndexFix),
            Box::new(PointerEventsFix),
            Box::new(Transform3dFix),
            Box::new(FeedbackAmplify),
        ])
    }
}

impl DeterministicFixer {
    pub fn new(mut rules: Vec<Box<dyn FixRule>>) -> Self {
        rules.sort_by_key(|r| r.priority());
        Self { rules }
    }

    /// For each error, the first applicable rule (by priority) that yields
    /// patches wins.
    pub fn fix(&self, errors: &[ClassifiedError], ctx: &RuleContext) -> FixOutcome {
        let mut outcome = FixOutcome::default();
        for error in errors {
            let produced = self
                .rules
                .iter()
                .filter(|r| r.handles(error.kind))
                .find_map(|r| {
                    let patches = r.patches(error, ctx);
                    (!patches.is_empty()).then(|| (r.name(), patches))
                });
            match produced {
                Some((rule, patches)) => {
                    debug!("rule '{}' patched {}", rule, error.selector);
                    outcome.applied_rules.push((rule.to_string(), error.selector.clone()));
                    for patch in patches {
                        merge_patch(&mut outcome.patches, patch);
                    }
                    outcome.fixed.push(error.clone());
                }
                None => outcome.unfixed.push(error.clone()),
            }
        }
        outcome
    }
}

/// Fold `patch` into an existing patch for the same selector.
fn merge_patch(patches: &mut Vec<Patch>, patch: Patch) {
    match patches.iter_mut().find(|p| p.selector == patch.selector) {
        Some(existing) => {
            for class in &patch.add_classes {
                if !existing.add_classes.contains(class) {
                    existing.add_classes.push(class.clone());
                }
            }
            for class in &patch.remove_classes {
                if !existing.remove_classes.contains(class) {
                    existing.remove_classes.push(class.clone());
                }
            }
            existing.add_styles.extend(patch.add_styles);
            for style in &patch.remove_styles {
                if !existing.remove_styles.contains(style) {
                    existing.remove_styles.push(style.clone());
                }
            }
        }
        None => patches.push(patch),
    }
}
