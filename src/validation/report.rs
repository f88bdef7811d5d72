use serde::{Deserialize, Serialize};

use crate::geometry::geometry_model::Geometry;
use crate::input::detector::InputCandidate;
use crate::interaction::interaction_model::InteractionResult;
use crate::validation::contract::LayoutArchetype;
use crate::visual::capture::Screenshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Render,
    Visual,
    Geometry,
    InputDetection,
    Interaction,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Render => "render",
            Phase::Visual => "visual",
            Phase::Geometry => "geometry",
            Phase::InputDetection => "input-detection",
            Phase::Interaction => "interaction",
        }
    }

    /// Phases that must pass for any layout.
    pub fn is_mandatory(&self) -> bool {
        !matches!(self, Phase::Interaction)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase: Phase,
    pub passed: bool,
    pub diagnostics: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl PhaseResult {
    pub fn pass(phase: Phase, diagnostics: impl Into<String>) -> Self {
        Self {
            phase,
            passed: true,
            diagnostics: diagnostics.into(),
            warnings: Vec::new(),
        }
    }

    pub fn fail(phase: Phase, diagnostics: impl Into<String>) -> Self {
        Self {
            phase,
            passed: false,
            diagnostics: diagnostics.into(),
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }
}

/// Everything learned about one HTML candidate. The unit compared across
/// repair attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archetype: Option<LayoutArchetype>,
    pub interactive: bool,
    pub tested_count: usize,
    /// Top-level results classified `responsive`
    pub responsive_count: usize,
    /// Top-level results that worked in any way: responsive, navigation or
    /// cascade. The ratio numerator.
    #[serde(default)]
    pub effective_count: usize,
    pub phases: Vec<PhaseResult>,
    pub interactions: Vec<InteractionResult>,
    pub candidates: Vec<InputCandidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_summary: Option<String>,
    /// Full geometry pass, kept for the error classifier
    #[serde(skip)]
    pub geometry: Geometry,
    #[serde(skip)]
    pub screenshot: Option<Screenshot>,
}

impl ValidationReport {
    pub fn score(&self) -> f64 {
        self.confidence
    }

    pub fn phase(&self, phase: Phase) -> Option<&PhaseResult> {
        self.phases.iter().find(|p| p.phase == phase)
    }

    pub fn phase_failed(&self, phase: Phase) -> bool {
        self.phase(phase).is_some_and(|p| !p.passed)
    }

    pub fn mandatory_passed(&self) -> bool {
        self.phases
            .iter()
            .filter(|p| p.phase.is_mandatory())
            .all(|p| p.passed)
            && [Phase::Render, Phase::Visual, Phase::Geometry, Phase::InputDetection]
                .iter()
                .all(|phase| self.phase(*phase).is_some())
    }

    pub fn warning_count(&self) -> usize {
        self.phases.iter().map(|p| p.warnings.len()).sum()
    }

    pub fn top_level_interactions(&self) -> impl Iterator<Item = &InteractionResult> {
        self.interactions.iter().filter(|r| r.is_top_level())
    }
}
