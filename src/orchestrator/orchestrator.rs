use std::cell::Cell;
use std::path::PathBuf;
use std::time::Duration;

use log::{info, warn};
use serde::Serialize;

use crate::browser::sandbox::Renderer;
use crate::error::PipelineError;
use crate::interaction::interaction_model::InteractionResult;
use crate::orchestrator::budget::{check_budget, BudgetDecision, RepairBudget};
use crate::orchestrator::history::History;
use crate::repair::classify::{classify_errors, ClassifiedError};
use crate::repair::patch::{apply_patches, Patch};
use crate::repair::patch_validator::PatchValidator;
use crate::repair::rules::{DeterministicFixer, RuleContext};
use crate::repair::surgical::{SurgicalInput, SurgicalRepairClient};
use crate::trace::logger::TraceLogger;
use crate::trace::trace::TraceEvent;
use crate::validation::contract::ValidationContract;
use crate::validation::report::{PhaseResult, ValidationReport};
use crate::validation::validator::Validator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OrchestratorState {
    Classify,
    DeterministicRepair,
    Validate,
    SurgicalRepair,
    Rollback,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The best candidate validates
    Valid,
    /// Nothing left to repair
    NoErrors,
    AttemptsExhausted,
    Timeout,
    /// Errors remain and no surgical client is configured
    NoModel,
}

#[derive(Debug, Clone)]
pub struct RepairSettings {
    pub max_attempts: u32,
    pub global_timeout: Duration,
}

impl Default for RepairSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            global_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistorySummary {
    pub index: usize,
    pub label: String,
    pub score: Option<f64>,
    pub valid: Option<bool>,
    pub timestamp_ms: u64,
}

/// What the caller gets back: always the best candidate seen.
#[derive(Debug, Clone, Serialize)]
pub struct RepairReport {
    pub valid: bool,
    pub confidence: f64,
    pub html: String,
    pub phases: Vec<PhaseResult>,
    pub interactions: Vec<InteractionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_summary: Option<String>,
    /// Defects still present in the returned candidate
    pub remaining_errors: Vec<ClassifiedError>,
    pub history: Vec<HistorySummary>,
    pub best_label: String,
    pub stop_reason: StopReason,
    pub timed_out: bool,
    /// Surgical attempts spent
    pub attempts: u32,
}

/// Mutable bookkeeping for one run. Owned by `Orchestrator::run`.
struct RunLog<'t> {
    history: History,
    reports: Vec<Option<ValidationReport>>,
    tracer: &'t TraceLogger,
    step: Cell<u64>,
}

impl<'t> RunLog<'t> {
    fn trace(&self, event: TraceEvent) {
        self.tracer.log(&event);
        self.step.set(self.step.get() + 1);
    }

    fn event(&self, state: OrchestratorState) -> TraceEvent {
        TraceEvent::now(self.step.get(), state)
    }

    fn best_index(&self) -> usize {
        self.history.best().unwrap_or(0)
    }

    fn best_score(&self) -> f64 {
        self.history.best_score().unwrap_or(0.0)
    }

    fn best_report(&self) -> Option<&ValidationReport> {
        self.reports.get(self.best_index()).and_then(Option::as_ref)
    }
}

pub struct Orchestrator<'a> {
    renderer: &'a dyn Renderer,
    surgical: Option<&'a SurgicalRepairClient>,
    fixer: DeterministicFixer,
    settings: RepairSettings,
    tracer: &'a TraceLogger,
    artifacts_dir: Option<PathBuf>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(renderer: &'a dyn Renderer, tracer: &'a TraceLogger) -> Self {
        Self {
            renderer,
            surgical: None,
            fixer: DeterministicFixer::default(),
            settings: RepairSettings::default(),
            tracer,
            artifacts_dir: None,
        }
    }

    pub fn with_surgical(mut self, client: Option<&'a SurgicalRepairClient>) -> Self {
        self.surgical = client;
        self
    }

    pub fn with_settings(mut self, settings: RepairSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_artifacts_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.artifacts_dir = dir;
        self
    }

    fn validator(&self) -> Validator<'a> {
        Validator::new(self.renderer).with_artifacts_dir(self.artifacts_dir.clone())
    }

    /// Push a candidate, validate it and record its score. A validation that
    /// fails on infrastructure leaves the entry unscored (ranked as 0).
    fn evaluate(
        &self,
        log: &mut RunLog,
        contract: &ValidationContract,
        html: String,
        label: &str,
    ) -> Option<f64> {
        let index = log.history.push(html.clone(), label);
        log.reports.push(None);
        match self.validator().validate(&contract.with_html(html)) {
            Ok(report) => {
                let score = report.score();
                log.history.record_score(index, score);
                let event = log
                    .event(OrchestratorState::Validate)
                    .with_entry(index, label)
                    .with_score(score)
                    .with_decision(if report.valid { "valid" } else { "invalid" });
                log.trace(event);
                log.reports[index] = Some(report);
                Some(score)
            }
            Err(e) => {
                warn!("validation of '{}' failed: {}", label, e);
                let event = log
                    .event(OrchestratorState::Rollback)
                    .with_entry(index, label)
                    .with_decision("unscored")
                    .with_reason(e);
                log.trace(event);
                None
            }
        }
    }

    /// Run the full validate/repair loop.
    ///
    /// Never returns a candidate scoring lower than the best one recorded.
    /// The only error is `NoScoredCandidate`, when the original document
    /// cannot be validated at all.
    pub fn run(&self, contract: &ValidationContract) -> Result<RepairReport, PipelineError> {
        let mut budget = RepairBudget::new(self.settings.global_timeout, self.settings.max_attempts);
        let mut log = RunLog {
            history: History::new(),
            reports: Vec::new(),
            tracer: self.tracer,
            step: Cell::new(0),
        };

        // ---- Original ----
        let index = log.history.push(contract.html.clone(), "original");
        log.reports.push(None);
        let event = log.event(OrchestratorState::Classify).with_entry(index, "original");
        log.trace(event);

        let report = match self.validator().validate(contract) {
            Ok(report) => report,
            Err(e) => {
                let event = log
                    .event(OrchestratorState::Done)
                    .with_decision("fatal")
                    .with_reason(&e);
                log.trace(event);
                return Err(PipelineError::NoScoredCandidate(format!(
                    "original document could not be validated: {}",
                    e
                )));
            }
        };

        let errors = classify_errors(&report);
        let event = log
            .event(OrchestratorState::Classify)
            .with_entry(index, "original")
            .with_score(report.score())
            .with_errors(errors.len());
        log.trace(event);

        if errors.is_empty() {
            let score = if report.valid { 1.0 } else { report.score() };
            log.history.record_score(index, score);
            log.reports[index] = Some(report);
            return Ok(self.finish(log, StopReason::NoErrors, false, 0));
        }
        log.history.record_score(index, report.score());
        log.reports[index] = Some(report);

        // ---- Deterministic pass ----
        if check_budget(&budget) == BudgetDecision::Allow {
            self.deterministic_pass(&mut log, contract, &errors);
        }
        if log.best_report().is_some_and(|r| r.valid) {
            return Ok(self.finish(log, StopReason::Valid, false, 0));
        }

        // ---- Surgical loop ----
        let Some(client) = self.surgical else {
            let event = log
                .event(OrchestratorState::Done)
                .with_decision("stop")
                .with_reason("no surgical client configured");
            log.trace(event);
            return Ok(self.finish(log, StopReason::NoModel, false, 0));
        };

        let mut attempts = 0;
        let stop = loop {
            if let BudgetDecision::Block(reason) = check_budget(&budget) {
                let event = log
                    .event(OrchestratorState::Done)
                    .with_decision("stop")
                    .with_reason(reason);
                log.trace(event);
                break if budget.timed_out() {
                    StopReason::Timeout
                } else {
                    StopReason::AttemptsExhausted
                };
            }
            budget = budget.consume();
            attempts += 1;

            let current = log.best_index();
            let Some(current_report) = log.reports[current].as_ref() else {
                break StopReason::AttemptsExhausted;
            };
            let remaining = classify_errors(current_report);
            if remaining.is_empty() {
                break StopReason::NoErrors;
            }

            let event = log
                .event(OrchestratorState::SurgicalRepair)
                .with_entry(current, &log.history.get(current).map(|e| e.label.clone()).unwrap_or_default())
                .with_errors(remaining.len());
            log.trace(event);

            let outcome = client.repair(&SurgicalInput {
                errors: &remaining,
                geometry: &current_report.geometry,
                viewport: contract.viewport,
                user_request: &contract.user_request,
                screenshot: current_report.screenshot.as_ref(),
            });
            if outcome.is_empty() {
                let event = log
                    .event(OrchestratorState::Rollback)
                    .with_decision("no_patches")
                    .with_reason(outcome.failures.join(" | "));
                log.trace(event);
                continue;
            }

            let label = format!("surgical-{}", attempts);
            let base_html = log
                .history
                .get(current)
                .map(|e| e.html.clone())
                .unwrap_or_else(|| contract.html.clone());
            let adopted = self.try_candidate(&mut log, contract, &base_html, &outcome.patches, &label);
            if adopted && log.best_report().is_some_and(|r| r.valid) {
                break StopReason::Valid;
            }
        };

        let timed_out = stop == StopReason::Timeout;
        Ok(self.finish(log, stop, timed_out, attempts))
    }

    fn deterministic_pass(&self, log: &mut RunLog, contract: &ValidationContract, errors: &[ClassifiedError]) {
        let fixable: Vec<ClassifiedError> = errors.iter().filter(|e| e.rule_fixable).cloned().collect();
        if fixable.is_empty() {
            return;
        }
        let current = log.best_index();
        let Some(report) = log.reports[current].as_ref() else {
            return;
        };

        let ctx = RuleContext::new(&report.geometry, contract.viewport);
        let outcome = self.fixer.fix(&fixable, &ctx);
        let event = log
            .event(OrchestratorState::DeterministicRepair)
            .with_entry(current, "original")
            .with_errors(fixable.len())
            .with_decision(format!(
                "{} patch(es) from {} rule application(s)",
                outcome.patches.len(),
                outcome.applied_rules.len()
            ));
        if outcome.patches.is_empty() {
            log.trace(event.with_reason("no rule produced patches"));
            return;
        }
        if let Err(rejection) = PatchValidator::new(&report.geometry, &fixable).validate(&outcome.patches) {
            log.trace(event.with_reason(format!("rejected: {}", rejection)));
            return;
        }
        log.trace(event);

        let base_html = log
            .history
            .get(current)
            .map(|e| e.html.clone())
            .unwrap_or_else(|| contract.html.clone());
        self.try_candidate(log, contract, &base_html, &outcome.patches, "deterministic");
    }

    /// Apply, push, validate. Returns true when the candidate became the new
    /// best; otherwise it is rolled back implicitly.
    fn try_candidate(
        &self,
        log: &mut RunLog,
        contract: &ValidationContract,
        base_html: &str,
        patches: &[Patch],
        label: &str,
    ) -> bool {
        let best_before = log.best_score();
        let html = apply_patches(base_html, patches, label);
        let score = self.evaluate(log, contract, html, label);
        let index = log.history.len() - 1;

        match score {
            Some(score) if score > best_before => {
                info!("'{}' adopted ({:.2} > {:.2})", label, score, best_before);
                let event = log
                    .event(OrchestratorState::Validate)
                    .with_entry(index, label)
                    .with_score(score)
                    .with_decision("adopt");
                log.trace(event);
                true
            }
            other => {
                let event = log
                    .event(OrchestratorState::Rollback)
                    .with_entry(index, label)
                    .with_decision("discard")
                    .with_reason(format!(
                        "score {:.2} does not beat best {:.2}",
                        other.unwrap_or(0.0),
                        best_before
                    ));
                log.trace(event);
                false
            }
        }
    }

    fn finish(&self, log: RunLog, stop: StopReason, timed_out: bool, attempts: u32) -> RepairReport {
        let best = log.best_index();
        let confidence = log.best_score();
        let event = log
            .event(OrchestratorState::Done)
            .with_entry(best, &log.history.get(best).map(|e| e.label.clone()).unwrap_or_default())
            .with_score(confidence)
            .with_decision(format!("{:?}", stop));
        log.trace(event);

        let history: Vec<HistorySummary> = log
            .history
            .iter()
            .enumerate()
            .map(|(index, entry)| HistorySummary {
                index,
                label: entry.label.clone(),
                score: entry.score,
                valid: log.reports.get(index).and_then(|r| r.as_ref()).map(|r| r.valid),
                timestamp_ms: entry.timestamp_ms,
            })
            .collect();

        let entry = log.history.get(best);
        let html = entry.map(|e| e.html.clone()).unwrap_or_default();
        let best_label = entry.map(|e| e.label.clone()).unwrap_or_default();
        let report = log.reports.get(best).and_then(|r| r.as_ref());

        RepairReport {
            valid: report.is_some_and(|r| r.valid),
            confidence,
            html,
            phases: report.map(|r| r.phases.clone()).unwrap_or_default(),
            interactions: report.map(|r| r.interactions.clone()).unwrap_or_default(),
            failure_summary: report.and_then(|r| r.failure_summary.clone()),
            remaining_errors: report.map(classify_errors).unwrap_or_default(),
            history,
            best_label,
            stop_reason: stop,
            timed_out,
            attempts,
        }
    }
}
