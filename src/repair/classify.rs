use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::geometry::geometry_model::{Geometry, NodeDescriptor, Viewport, Visibility};
use crate::input::detector::{is_interactive, InputCandidate};
use crate::interaction::interaction_model::{InteractionKind, InteractionResult};
use crate::validation::report::{Phase, ValidationReport};

/// Blockers covering at least this share of the viewport are overlays.
pub const OVERLAY_AREA_RATIO: f64 = 0.40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ZIndexConflict,
    PointerIntercepted,
    InvisibleOpacity,
    InvisibleDisplay,
    InvisibleVisibility,
    TransformHidden,
    WeakFeedback,
    NoResponse,
    ClickFailed,
    BlankPage,
    RenderFailure,
    MissingInteraction,
}

impl ErrorKind {
    pub fn rule_fixable(&self) -> bool {
        matches!(
            self,
            ErrorKind::ZIndexConflict
                | ErrorKind::PointerIntercepted
                | ErrorKind::InvisibleOpacity
                | ErrorKind::InvisibleDisplay
                | ErrorKind::InvisibleVisibility
                | ErrorKind::TransformHidden
                | ErrorKind::WeakFeedback
        )
    }

    pub fn is_invisibility(&self) -> bool {
        matches!(
            self,
            ErrorKind::InvisibleOpacity | ErrorKind::InvisibleDisplay | ErrorKind::InvisibleVisibility
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ZIndexConflict => "z_index_conflict",
            ErrorKind::PointerIntercepted => "pointer_intercepted",
            ErrorKind::InvisibleOpacity => "invisible_opacity",
            ErrorKind::InvisibleDisplay => "invisible_display",
            ErrorKind::InvisibleVisibility => "invisible_visibility",
            ErrorKind::TransformHidden => "transform_hidden",
            ErrorKind::WeakFeedback => "weak_feedback",
            ErrorKind::NoResponse => "no_response",
            ErrorKind::ClickFailed => "click_failed",
            ErrorKind::BlankPage => "blank_page",
            ErrorKind::RenderFailure => "render_failure",
            ErrorKind::MissingInteraction => "missing_interaction",
        }
    }
}

/// One diagnosed defect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub selector: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocking_selector: Option<String>,
    pub rule_fixable: bool,
    pub confidence: f64,
    pub detail: String,
}

impl ClassifiedError {
    pub fn new(kind: ErrorKind, selector: &str, confidence: f64, detail: impl Into<String>) -> Self {
        Self {
            kind,
            selector: selector.to_string(),
            blocking_selector: None,
            rule_fixable: kind.rule_fixable(),
            confidence,
            detail: detail.into(),
        }
    }

    pub fn with_blocker(mut self, blocker: &str) -> Self {
        self.blocking_selector = Some(blocker.to_string());
        self
    }
}

/// Derive the defect list from a report. Pure: the same report always yields
/// the same, identically ordered list.
pub fn classify_errors(report: &ValidationReport) -> Vec<ClassifiedError> {
    if report.phase_failed(Phase::Render) {
        let detail = report
            .phase(Phase::Render)
            .map(|p| p.diagnostics.clone())
            .unwrap_or_default();
        return vec![ClassifiedError::new(ErrorKind::RenderFailure, "body", 1.0, detail)];
    }
    if report.phase_failed(Phase::Visual) {
        let detail = report
            .phase(Phase::Visual)
            .map(|p| p.diagnostics.clone())
            .unwrap_or_default();
        return vec![ClassifiedError::new(ErrorKind::BlankPage, "body", 1.0, detail)];
    }

    let geometry = &report.geometry;
    let mut errors: Vec<ClassifiedError> = Vec::new();

    for candidate in &report.candidates {
        if candidate.visibility == Visibility::Invisible {
            errors.push(classify_invisible(candidate, geometry));
        }
    }

    for result in &report.interactions {
        if let Some(error) = classify_interaction(result, report, geometry) {
            errors.push(error);
        }
    }

    if report.interactive && report.candidates.is_empty() {
        errors.push(ClassifiedError::new(
            ErrorKind::MissingInteraction,
            "body",
            0.8,
            "interactive layout exposes no detectable inputs",
        ));
    }

    // Navigation and cascades alone never satisfy an interactive layout.
    if report.interactive && report.tested_count > 0 && report.responsive_count == 0 && errors.is_empty() {
        errors.push(ClassifiedError::new(
            ErrorKind::MissingInteraction,
            "body",
            0.6,
            "no input gives local feedback when clicked",
        ));
    }

    dedupe(errors)
}

fn classify_invisible(candidate: &InputCandidate, geometry: &Geometry) -> ClassifiedError {
    let node = geometry
        .find_by_path(&candidate.node.path)
        .unwrap_or(&candidate.node);
    let chain: Vec<&NodeDescriptor> = std::iter::once(node).chain(geometry.ancestors_of(node)).collect();
    let ink = candidate.ink_ratio.unwrap_or(0.0);

    if let Some(n) = chain.iter().find(|n| n.style.opacity < 0.05) {
        return ClassifiedError::new(
            ErrorKind::InvisibleOpacity,
            &candidate.selector,
            0.9,
            format!("opacity {:.2} on {}", n.style.opacity, n.selector),
        );
    }
    if let Some(n) = chain
        .iter()
        .find(|n| n.style.visibility == "hidden" || n.style.visibility == "collapse")
    {
        return ClassifiedError::new(
            ErrorKind::InvisibleVisibility,
            &candidate.selector,
            0.9,
            format!("visibility:{} on {}", n.style.visibility, n.selector),
        );
    }
    if let Some(n) = chain.iter().find(|n| n.style.display == "none") {
        return ClassifiedError::new(
            ErrorKind::InvisibleDisplay,
            &candidate.selector,
            0.9,
            format!("display:none on {}", n.selector),
        );
    }
    if chain.iter().any(|n| n.style.participates_in_3d()) || has_3d_descendant(node, geometry) {
        return ClassifiedError::new(
            ErrorKind::TransformHidden,
            &candidate.selector,
            0.7,
            format!("renders {:.1}% ink inside a 3D transform context", ink * 100.0),
        );
    }
    ClassifiedError::new(
        ErrorKind::InvisibleOpacity,
        &candidate.selector,
        0.4,
        format!("renders {:.1}% ink with no hiding style found", ink * 100.0),
    )
}

fn has_3d_descendant(node: &NodeDescriptor, geometry: &Geometry) -> bool {
    geometry
        .descendants_of(node)
        .iter()
        .any(|d| d.style.participates_in_3d())
}

fn classify_interaction(
    result: &InteractionResult,
    report: &ValidationReport,
    geometry: &Geometry,
) -> Option<ClassifiedError> {
    match result.kind {
        InteractionKind::Responsive | InteractionKind::Navigation | InteractionKind::CascadeEffect => None,
        InteractionKind::Intercepted => {
            let blocker_selector = result.blocking_selector.as_deref().unwrap_or("body");
            let blocker = geometry.find_by_selector(blocker_selector);
            let viewport_area = report
                .screenshot
                .as_ref()
                .map(|s| s.width() as f64 * s.height() as f64)
                .filter(|a| *a > 0.0)
                .unwrap_or_else(|| Viewport::default().area());
            let overlay = blocker
                .map(|b| b.bbox.area() / viewport_area >= OVERLAY_AREA_RATIO || !is_interactive(b))
                .unwrap_or(true);
            let kind = if overlay {
                ErrorKind::PointerIntercepted
            } else {
                ErrorKind::ZIndexConflict
            };
            Some(
                ClassifiedError::new(
                    kind,
                    &result.selector,
                    0.9,
                    format!("click at center lands on {}", blocker_selector),
                )
                .with_blocker(blocker_selector),
            )
        }
        InteractionKind::WeakFeedback | InteractionKind::NoResponse => {
            let node = geometry.find_by_path(&result.path);
            let in_3d = node
                .map(|n| {
                    n.style.participates_in_3d()
                        || geometry.ancestors_of(n).iter().any(|a| a.style.participates_in_3d())
                        || has_3d_descendant(n, geometry)
                })
                .unwrap_or(false);
            let (kind, confidence) = if in_3d {
                (ErrorKind::TransformHidden, 0.75)
            } else if result.kind == InteractionKind::WeakFeedback {
                (ErrorKind::WeakFeedback, 0.8)
            } else {
                (ErrorKind::NoResponse, 0.7)
            };
            Some(ClassifiedError::new(
                kind,
                &result.selector,
                confidence,
                format!(
                    "{} (tight {:.2}%, local {:.2}%)",
                    result.kind.as_str(),
                    result.tight_ratio * 100.0,
                    result.local_ratio * 100.0
                ),
            ))
        }
        InteractionKind::ClickFailed => Some(ClassifiedError::new(
            ErrorKind::ClickFailed,
            &result.selector,
            0.6,
            result.note.clone().unwrap_or_else(|| "click could not be dispatched".to_string()),
        )),
    }
}

/// One error per selector. Invisibility wins over interaction symptoms since
/// it is their cause.
fn dedupe(errors: Vec<ClassifiedError>) -> Vec<ClassifiedError> {
    let mut by_selector: BTreeMap<String, ClassifiedError> = BTreeMap::new();
    for error in errors {
        match by_selector.get(&error.selector) {
            Some(existing) if existing.kind.is_invisibility() || existing.kind == ErrorKind::TransformHidden => {}
            Some(_) if !error.kind.is_invisibility() => {}
            _ => {
                by_selector.insert(error.selector.clone(), error);
            }
        }
    }
    let mut out: Vec<ClassifiedError> = by_selector.into_values().collect();
    out.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.selector.cmp(&b.selector)));
    out
}
