use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::browser::sandbox::{ClickOutcome, LivePage, Renderer};
use crate::error::PipelineError;
use crate::geometry::extractor::{extract_geometry, GeometryScope};
use crate::geometry::geometry_model::{
    is_path_descendant, BoundingBox, Geometry, Viewport, Visibility,
};
use crate::input::detector::{detect_candidates, evaluate_visibility, InputCandidate};
use crate::interaction::interaction_model::{InteractionKind, InteractionResult};
use crate::validation::contract::ValidationContract;
use crate::visual::capture::{capture, Screenshot};
use crate::visual::diff::{classify_diff, diff, three_scale_diff};

/// The pre-interaction state every top-level candidate starts from.
#[derive(Debug, Clone)]
pub struct Baseline {
    pub fingerprint: String,
    pub screenshot: Screenshot,
    pub background: [u8; 4],
    /// Paths of interactive elements already visible before any click
    pub visible_inputs: BTreeSet<String>,
}

impl Baseline {
    pub fn new(geometry: &Geometry, screenshot: Screenshot, background: [u8; 4], viewport: &Viewport) -> Self {
        let visible_inputs = visible_input_paths(geometry, &screenshot, background, viewport);
        Self {
            fingerprint: geometry.fingerprint(),
            screenshot,
            background,
            visible_inputs,
        }
    }
}

fn visible_input_paths(
    geometry: &Geometry,
    shot: &Screenshot,
    background: [u8; 4],
    viewport: &Viewport,
) -> BTreeSet<String> {
    let mut all = detect_candidates(geometry, viewport, usize::MAX);
    evaluate_visibility(&mut all, shot, background);
    all.into_iter()
        .filter(|c| c.visibility != Visibility::Invisible)
        .map(|c| c.node.path)
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct InteractionOutcome {
    pub results: Vec<InteractionResult>,
    pub warnings: Vec<String>,
    /// Times the page had to be re-rendered because a reset was not confirmed
    pub rerenders: u32,
    pub budget_exhausted: bool,
}

/// Clicks candidates one at a time, diffing each against a clean baseline.
pub struct InteractionValidator<'a> {
    renderer: &'a dyn Renderer,
    contract: &'a ValidationContract,
    artifacts_dir: Option<&'a Path>,
}

struct RunState {
    outcome: InteractionOutcome,
    deadline: Instant,
    dirty: bool,
    shot_seq: u32,
}

impl RunState {
    fn out_of_time(&mut self) -> bool {
        if Instant::now() < self.deadline {
            return false;
        }
        if !self.outcome.budget_exhausted {
            self.outcome.budget_exhausted = true;
            self.outcome
                .warnings
                .push("interaction time budget exhausted; remaining candidates skipped".to_string());
        }
        true
    }
}

impl<'a> InteractionValidator<'a> {
    pub fn new(renderer: &'a dyn Renderer, contract: &'a ValidationContract) -> Self {
        Self {
            renderer,
            contract,
            artifacts_dir: None,
        }
    }

    pub fn with_artifacts_dir(mut self, dir: Option<&'a Path>) -> Self {
        self.artifacts_dir = dir;
        self
    }

    fn stabilization(&self) -> Duration {
        Duration::from_millis(self.contract.stabilization_delay_ms)
    }

    fn click_timeout(&self) -> Duration {
        Duration::from_millis(self.contract.click_timeout_ms)
    }

    /// Test every top-level candidate. The page may be replaced by a fresh
    /// render when a reset cannot be confirmed.
    pub fn run(
        &self,
        page: &mut Box<dyn LivePage>,
        candidates: &[InputCandidate],
        baseline: &Baseline,
    ) -> Result<InteractionOutcome, PipelineError> {
        let mut state = RunState {
            outcome: InteractionOutcome::default(),
            deadline: Instant::now() + Duration::from_millis(self.contract.interaction_budget_ms),
            dirty: false,
            shot_seq: 0,
        };

        for candidate in candidates.iter().take(self.contract.max_inputs_to_test) {
            if state.out_of_time() {
                break;
            }
            if state.dirty {
                self.restore_baseline(page, baseline, &mut state)?;
            }
            self.test_candidate(page, candidate, &[], &baseline.visible_inputs, baseline, &mut state)?;
        }

        info!(
            "interaction phase: {} result(s), {} re-render(s)",
            state.outcome.results.len(),
            state.outcome.rerenders
        );
        Ok(state.outcome)
    }

    /// Reset in place and confirm the baseline came back; otherwise discard
    /// the page and render the original document again.
    fn restore_baseline(
        &self,
        page: &mut Box<dyn LivePage>,
        baseline: &Baseline,
        state: &mut RunState,
    ) -> Result<(), PipelineError> {
        match self.confirm_reset(page.as_mut(), baseline) {
            Ok(true) => {
                debug!("page reset confirmed");
            }
            Ok(false) => {
                self.rerender(page, state, "page reset left state differing from baseline")?;
            }
            Err(e) => {
                self.rerender(page, state, &format!("page reset failed: {}", e))?;
            }
        }
        state.dirty = false;
        Ok(())
    }

    fn confirm_reset(&self, page: &mut dyn LivePage, baseline: &Baseline) -> Result<bool, PipelineError> {
        page.reset()?;
        let geometry = extract_geometry(page, GeometryScope::All)?;
        if geometry.fingerprint() != baseline.fingerprint {
            return Ok(false);
        }
        let shot = capture(page)?;
        Ok(diff(&baseline.screenshot, &shot, None).ratio <= self.contract.visual_change_threshold)
    }

    fn rerender(
        &self,
        page: &mut Box<dyn LivePage>,
        state: &mut RunState,
        reason: &str,
    ) -> Result<(), PipelineError> {
        warn!("{}; re-rendering from source", reason);
        *page = self.renderer.render(&self.contract.html, self.contract)?;
        state.outcome.rerenders += 1;
        state
            .outcome
            .warnings
            .push(format!("{}; re-rendered from source", reason));
        Ok(())
    }

    /// Bring the page to the state right after `triggers` were clicked, in
    /// order, starting from the baseline.
    fn replay(
        &self,
        page: &mut Box<dyn LivePage>,
        baseline: &Baseline,
        triggers: &[String],
        state: &mut RunState,
    ) -> Result<(), PipelineError> {
        self.restore_baseline(page, baseline, state)?;
        for selector in triggers {
            let outcome = page.click(selector, self.click_timeout())?;
            if outcome != ClickOutcome::Dispatched {
                warn!("replay of trigger '{}' did not dispatch: {:?}", selector, outcome);
            }
            page.settle(self.stabilization());
        }
        state.dirty = !triggers.is_empty();
        Ok(())
    }

    fn save_artifact(&self, shot: &Screenshot, state: &mut RunState, tag: &str) -> Option<String> {
        let dir = self.artifacts_dir?;
        let path: PathBuf = dir.join(format!("interaction-{:03}-{}.png", state.shot_seq, tag));
        match shot.save(&path) {
            Ok(()) => Some(path.display().to_string()),
            Err(e) => {
                warn!("could not save artifact: {}", e);
                None
            }
        }
    }

    /// Click one candidate, classify the change, then recurse into any
    /// newly revealed inputs.
    fn test_candidate(
        &self,
        page: &mut Box<dyn LivePage>,
        candidate: &InputCandidate,
        triggers: &[String],
        known: &BTreeSet<String>,
        baseline: &Baseline,
        state: &mut RunState,
    ) -> Result<(), PipelineError> {
        let depth = triggers.len() as u32;
        let triggered_by = triggers.last().map(String::as_str);
        let viewport = page.viewport();

        // Hit-test the visible part of the box so a partly off-screen
        // element is hit where it is actually on screen.
        let visible_box = clip_box(&candidate.node.bbox, &viewport);
        let (cx, cy) = visible_box.center();
        if let Some(hit) = page.hit_test(cx, cy)? {
            let own = hit.path == candidate.node.path
                || is_path_descendant(&hit.path, &candidate.node.path);
            if !own {
                debug!("'{}' intercepted by '{}'", candidate.selector, hit.selector);
                state.outcome.results.push(
                    InteractionResult::new(
                        &candidate.selector,
                        &candidate.node.path,
                        InteractionKind::Intercepted,
                        candidate.visibility,
                    )
                    .with_blocker(&hit.selector)
                    .with_cascade(depth, triggered_by),
                );
                return Ok(());
            }
        }

        state.shot_seq += 1;
        let before = capture(page.as_mut())?;
        let click = page.click(&candidate.selector, self.click_timeout())?;
        state.dirty = true;

        if let ClickOutcome::NotFound | ClickOutcome::Failed(_) = &click {
            let note = match &click {
                ClickOutcome::Failed(reason) => reason.clone(),
                _ => "selector matched nothing at click time".to_string(),
            };
            state.outcome.results.push(
                InteractionResult::new(
                    &candidate.selector,
                    &candidate.node.path,
                    InteractionKind::ClickFailed,
                    candidate.visibility,
                )
                .with_cascade(depth, triggered_by)
                .with_note(note),
            );
            return Ok(());
        }

        page.settle(self.stabilization());
        let after = capture(page.as_mut())?;
        let scales = three_scale_diff(&before, &after, &candidate.node.bbox);
        let kind = InteractionKind::from(classify_diff(&scales, self.contract.visual_change_threshold));
        debug!(
            "'{}' -> {} (tight {:.4}, local {:.4}, global {:.4})",
            candidate.selector,
            kind.as_str(),
            scales.tight,
            scales.local,
            scales.global
        );

        let mut result = InteractionResult::new(
            &candidate.selector,
            &candidate.node.path,
            kind,
            candidate.visibility,
        )
        .with_scales(&scales)
        .with_cascade(depth, triggered_by);
        result.before_screenshot = self.save_artifact(&before, state, "before");
        result.after_screenshot = self.save_artifact(&after, state, "after");
        state.outcome.results.push(result);

        if depth >= self.contract.max_cascade_depth {
            return Ok(());
        }

        // Cascade: inputs that became visible because of this click
        let geometry = extract_geometry(page.as_mut(), GeometryScope::All)?;
        let mut revealed = detect_candidates(&geometry, &viewport, self.contract.max_inputs_to_test);
        evaluate_visibility(&mut revealed, &after, baseline.background);
        let revealed: Vec<InputCandidate> = revealed
            .into_iter()
            .filter(|c| c.visibility != Visibility::Invisible && !known.contains(&c.node.path))
            .collect();
        if revealed.is_empty() {
            return Ok(());
        }

        debug!(
            "'{}' revealed {} new input(s) at depth {}",
            candidate.selector,
            revealed.len(),
            depth + 1
        );
        let mut chain = triggers.to_vec();
        chain.push(candidate.selector.clone());
        let mut nested_known = known.clone();
        nested_known.extend(revealed.iter().map(|c| c.node.path.clone()));

        for (i, nested) in revealed.iter().enumerate() {
            if state.out_of_time() {
                break;
            }
            if i > 0 {
                self.replay(page, baseline, &chain, state)?;
            }
            self.test_candidate(page, nested, &chain, &nested_known, baseline, state)?;
        }
        Ok(())
    }
}

fn clip_box(bbox: &BoundingBox, viewport: &Viewport) -> BoundingBox {
    let x0 = bbox.x.max(0.0);
    let y0 = bbox.y.max(0.0);
    let x1 = bbox.right().min(viewport.width as f64);
    let y1 = bbox.bottom().min(viewport.height as f64);
    if x1 <= x0 || y1 <= y0 {
        return *bbox;
    }
    BoundingBox::new(x0, y0, x1 - x0, y1 - y0)
}
