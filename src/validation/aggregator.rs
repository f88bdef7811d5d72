use crate::geometry::geometry_model::Geometry;
use crate::input::detector::InputCandidate;
use crate::interaction::interaction_model::InteractionResult;
use crate::validation::contract::ValidationContract;
use crate::validation::report::{Phase, PhaseResult, ValidationReport};
use crate::visual::capture::Screenshot;

pub const WARNING_PENALTY: f64 = 0.05;
pub const MAX_WARNING_PENALTY: f64 = 0.20;

/// Inputs gathered by the validator phases for one candidate document.
#[derive(Debug, Default)]
pub struct PhaseOutputs {
    pub phases: Vec<PhaseResult>,
    pub interactions: Vec<InteractionResult>,
    pub candidates: Vec<InputCandidate>,
    pub geometry: Geometry,
    pub screenshot: Option<Screenshot>,
}

/// Apply the archetype pass policy and score the run.
///
/// Declared archetypes decide interactivity outright. Without one, an
/// inferred interactive archetype or any detected candidate makes the layout
/// interactive. Only top-level interactions count towards the ratio; cascade
/// results are diagnostic.
pub fn aggregate(contract: &ValidationContract, outputs: PhaseOutputs) -> ValidationReport {
    let PhaseOutputs {
        mut phases,
        interactions,
        candidates,
        geometry,
        screenshot,
    } = outputs;

    let archetype = contract.effective_archetype();
    let interactive = match (contract.archetype, archetype) {
        (Some(declared), _) => declared.is_interactive(),
        (None, Some(inferred)) => inferred.is_interactive(),
        (None, None) => !candidates.is_empty(),
    };

    let top_level: Vec<&InteractionResult> = interactions.iter().filter(|r| r.is_top_level()).collect();
    let tested_count = top_level.len();
    let responsive_count = top_level.iter().filter(|r| r.responsive).count();
    let effective_count = top_level.iter().filter(|r| r.effective).count();
    let ratio = if tested_count == 0 {
        0.0
    } else {
        effective_count as f64 / tested_count as f64
    };

    let interaction_ok = !interactive || (responsive_count >= 1 && ratio >= contract.min_responsive_ratio);
    if let Some(phase) = phases.iter_mut().find(|p| p.phase == Phase::Interaction) {
        phase.passed = interaction_ok;
        if !interactive {
            phase.diagnostics = format!("{} (informational for static layout)", phase.diagnostics);
        }
    }

    let mandatory = [Phase::Render, Phase::Visual, Phase::Geometry, Phase::InputDetection]
        .iter()
        .all(|m| phases.iter().any(|p| p.phase == *m && p.passed));

    let valid = mandatory && interaction_ok;

    let base = if !mandatory {
        0.0
    } else if tested_count == 0 {
        if interactive { 0.5 } else { 1.0 }
    } else {
        0.5 + 0.5 * ratio
    };
    let warnings: usize = phases.iter().map(|p| p.warnings.len()).sum();
    let penalty = (warnings as f64 * WARNING_PENALTY).min(MAX_WARNING_PENALTY);
    let confidence = if mandatory { (base - penalty).clamp(0.0, 1.0) } else { 0.0 };

    let failure_summary = if valid {
        None
    } else {
        Some(summarize_failures(
            &phases,
            &top_level,
            interactive,
            tested_count,
            responsive_count,
            effective_count,
        ))
    };

    ValidationReport {
        valid,
        confidence,
        archetype,
        interactive,
        tested_count,
        responsive_count,
        effective_count,
        phases,
        interactions,
        candidates,
        failure_summary,
        geometry,
        screenshot,
    }
}

fn summarize_failures(
    phases: &[PhaseResult],
    top_level: &[&InteractionResult],
    interactive: bool,
    tested: usize,
    responsive: usize,
    effective: usize,
) -> String {
    let mut parts: Vec<String> = phases
        .iter()
        .filter(|p| !p.passed && p.phase.is_mandatory())
        .map(|p| format!("{} phase failed: {}", p.phase.as_str(), p.diagnostics))
        .collect();

    if interactive && parts.is_empty() {
        if tested == 0 {
            parts.push("interactive layout has no testable inputs".to_string());
        } else {
            parts.push(format!("{}/{} inputs responsive", effective, tested));
            if responsive == 0 {
                parts.push("no input classified responsive".to_string());
            }
            for r in top_level.iter().filter(|r| !r.effective) {
                let detail = match &r.blocking_selector {
                    Some(blocker) => format!("{} ({} by {})", r.selector, r.kind.as_str(), blocker),
                    None => format!("{} ({})", r.selector, r.kind.as_str()),
                };
                parts.push(detail);
            }
        }
    }

    parts.join("; ")
}
