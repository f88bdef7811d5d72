use std::path::PathBuf;

use log::{debug, info};

use crate::browser::sandbox::{LivePage, Renderer};
use crate::error::PipelineError;
use crate::geometry::extractor::{extract_geometry, GeometryScope};
use crate::geometry::geometry_model::Visibility;
use crate::input::detector::{detect_candidates, evaluate_visibility};
use crate::interaction::validator::{Baseline, InteractionValidator};
use crate::validation::aggregator::{aggregate, PhaseOutputs};
use crate::validation::contract::ValidationContract;
use crate::validation::report::{Phase, PhaseResult, ValidationReport};
use crate::visual::capture::{analyze_blank, capture};

/// Runs render, visual, geometry, input-detection and interaction phases in
/// order against one fresh page, then aggregates.
pub struct Validator<'a> {
    renderer: &'a dyn Renderer,
    artifacts_dir: Option<PathBuf>,
}

impl<'a> Validator<'a> {
    pub fn new(renderer: &'a dyn Renderer) -> Self {
        Self {
            renderer,
            artifacts_dir: None,
        }
    }

    pub fn with_artifacts_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.artifacts_dir = dir;
        self
    }

    /// Validate one document.
    ///
    /// Expected defects (fatal script errors, load timeouts, blank pages,
    /// unresponsive inputs) come back as a failing report. `Err` is reserved
    /// for infrastructure failures such as a browser crash.
    pub fn validate(&self, contract: &ValidationContract) -> Result<ValidationReport, PipelineError> {
        let mut outputs = PhaseOutputs::default();

        // ---- Render ----
        let mut page: Box<dyn LivePage> = match self.renderer.render(&contract.html, contract) {
            Ok(page) => page,
            Err(PipelineError::LoadTimeout { timeout_ms }) => {
                outputs.phases.push(PhaseResult::fail(
                    Phase::Render,
                    format!("page did not reach a loaded state within {}ms", timeout_ms),
                ));
                return Ok(aggregate(contract, outputs));
            }
            Err(e) => return Err(e),
        };

        let state = page.document_state()?;
        if let Some(reason) = state.fatal_reason() {
            outputs.phases.push(PhaseResult::fail(Phase::Render, reason));
            return Ok(aggregate(contract, outputs));
        }
        let mut render_warnings: Vec<String> = state
            .errors
            .iter()
            .map(|e| format!("script error: {}", e.message))
            .collect();
        render_warnings.extend(state.console_warnings.iter().map(|w| format!("console: {}", w)));
        outputs.phases.push(
            PhaseResult::pass(
                Phase::Render,
                format!("loaded ({} body elements)", state.body_element_count),
            )
            .with_warnings(render_warnings),
        );

        // ---- Visual ----
        let shot = capture(page.as_mut())?;
        let blank = analyze_blank(&shot, contract.blank_page_threshold);
        if blank.blank {
            outputs.phases.push(PhaseResult::fail(
                Phase::Visual,
                format!(
                    "page is blank ({:.1}% uniform, threshold {:.1}%)",
                    blank.uniform_ratio * 100.0,
                    contract.blank_page_threshold * 100.0
                ),
            ));
            outputs.screenshot = Some(shot);
            // Geometry still matters: repairs have to target whatever is hiding.
            let geometry = extract_geometry(page.as_mut(), GeometryScope::All)?;
            outputs.phases.push(PhaseResult::pass(
                Phase::Geometry,
                format!("{} nodes", geometry.len()),
            ));
            outputs.geometry = geometry;
            info!("blank page; skipping input detection and interaction");
            return Ok(aggregate(contract, outputs));
        }
        outputs.phases.push(PhaseResult::pass(
            Phase::Visual,
            format!("{:.1}% uniform", blank.uniform_ratio * 100.0),
        ));

        // ---- Geometry ----
        let geometry = extract_geometry(page.as_mut(), GeometryScope::All)?;
        outputs.phases.push(PhaseResult::pass(
            Phase::Geometry,
            format!("{} nodes", geometry.len()),
        ));

        // ---- Input detection ----
        let mut candidates = detect_candidates(&geometry, &contract.viewport, contract.max_inputs_to_test);
        evaluate_visibility(&mut candidates, &shot, blank.background);
        let invisible = candidates
            .iter()
            .filter(|c| c.visibility == Visibility::Invisible)
            .count();
        outputs.phases.push(PhaseResult::pass(
            Phase::InputDetection,
            format!("{} candidate(s), {} invisible", candidates.len(), invisible),
        ));

        // ---- Interaction ----
        let baseline = Baseline::new(&geometry, shot.clone(), blank.background, &contract.viewport);
        let interaction = InteractionValidator::new(self.renderer, contract)
            .with_artifacts_dir(self.artifacts_dir.as_deref())
            .run(&mut page, &candidates, &baseline)?;
        let effective = interaction
            .results
            .iter()
            .filter(|r| r.is_top_level() && r.effective)
            .count();
        let tested = interaction.results.iter().filter(|r| r.is_top_level()).count();
        outputs.phases.push(
            PhaseResult::pass(
                Phase::Interaction,
                format!(
                    "{}/{} responsive, {} cascade result(s)",
                    effective,
                    tested,
                    interaction.results.len() - tested
                ),
            )
            .with_warnings(interaction.warnings),
        );
        debug!("validation phases complete; releasing page");
        drop(page);

        // Baseline is fingerprinted already; the reported geometry carries pixel truth.
        let mut geometry = geometry;
        for c in candidates.iter().filter(|c| c.visibility == Visibility::Invisible) {
            geometry.mark_invisible(&c.node.path);
        }
        outputs.interactions = interaction.results;
        outputs.candidates = candidates;
        outputs.geometry = geometry;
        outputs.screenshot = Some(shot);
        Ok(aggregate(contract, outputs))
    }
}
