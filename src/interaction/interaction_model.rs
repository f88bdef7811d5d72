use serde::{Deserialize, Serialize};

use crate::geometry::geometry_model::Visibility;
use crate::visual::diff::{DiffClass, ScaleDiff};

/// Outcome classification for one click.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InteractionKind {
    Responsive,
    /// Another element sits on top of the target's center point
    Intercepted,
    CascadeEffect,
    Navigation,
    WeakFeedback,
    NoResponse,
    /// The click could not be dispatched at all
    ClickFailed,
}

impl InteractionKind {
    /// Counts towards the responsive ratio. Only `Responsive` itself
    /// satisfies the at-least-one rule.
    pub fn is_effective(&self) -> bool {
        matches!(
            self,
            InteractionKind::Responsive | InteractionKind::CascadeEffect | InteractionKind::Navigation
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionKind::Responsive => "responsive",
            InteractionKind::Intercepted => "intercepted",
            InteractionKind::CascadeEffect => "cascade-effect",
            InteractionKind::Navigation => "navigation",
            InteractionKind::WeakFeedback => "weak-feedback",
            InteractionKind::NoResponse => "no-response",
            InteractionKind::ClickFailed => "click-failed",
        }
    }
}

impl From<DiffClass> for InteractionKind {
    fn from(class: DiffClass) -> Self {
        match class {
            DiffClass::Responsive => InteractionKind::Responsive,
            DiffClass::Navigation => InteractionKind::Navigation,
            DiffClass::CascadeEffect => InteractionKind::CascadeEffect,
            DiffClass::WeakFeedback => InteractionKind::WeakFeedback,
            DiffClass::NoResponse => InteractionKind::NoResponse,
        }
    }
}

/// Result of testing one candidate. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionResult {
    pub selector: String,
    pub path: String,
    pub kind: InteractionKind,
    /// `kind == Responsive`
    pub responsive: bool,
    /// Responsive, navigation or cascade
    #[serde(default)]
    pub effective: bool,
    pub tight_ratio: f64,
    pub local_ratio: f64,
    pub global_ratio: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocking_selector: Option<String>,
    /// 0 for top-level candidates
    pub cascade_depth: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub triggered_by: Option<String>,
    pub visibility: Visibility,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before_screenshot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after_screenshot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl InteractionResult {
    pub fn new(selector: &str, path: &str, kind: InteractionKind, visibility: Visibility) -> Self {
        Self {
            selector: selector.to_string(),
            path: path.to_string(),
            kind,
            responsive: kind == InteractionKind::Responsive,
            effective: kind.is_effective(),
            tight_ratio: 0.0,
            local_ratio: 0.0,
            global_ratio: 0.0,
            blocking_selector: None,
            cascade_depth: 0,
            triggered_by: None,
            visibility,
            before_screenshot: None,
            after_screenshot: None,
            note: None,
        }
    }

    pub fn with_scales(mut self, scales: &ScaleDiff) -> Self {
        self.tight_ratio = scales.tight;
        self.local_ratio = scales.local;
        self.global_ratio = scales.global;
        self
    }

    pub fn with_blocker(mut self, blocking_selector: &str) -> Self {
        self.blocking_selector = Some(blocking_selector.to_string());
        self
    }

    pub fn with_cascade(mut self, depth: u32, triggered_by: Option<&str>) -> Self {
        self.cascade_depth = depth;
        self.triggered_by = triggered_by.map(str::to_string);
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn is_top_level(&self) -> bool {
        self.cascade_depth == 0
    }
}
