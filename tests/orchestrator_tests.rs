use std::rc::Rc;
use std::time::Duration;

use screen_repair::{
    error::PipelineError,
    geometry::geometry_model::BoundingBox,
    orchestrator::{
        budget::{check_budget, BudgetDecision, RepairBudget},
        history::History,
        orchestrator::{Orchestrator, RepairSettings, StopReason},
    },
    repair::{
        classify::ErrorKind,
        surgical::{ScriptedBackend, SurgicalRepairClient},
    },
    trace::logger::TraceLogger,
    validation::contract::LayoutArchetype,
};

use crate::common::{
    mock_page::{ClickEffect, MockPage, MockRenderer, Scene, BLUE, BODY, GREEN},
    utils::{base_scene, blank_scene, contract, dead_button_scene, overlay_scene, quiz_scene},
};

mod common;

const DOC: &str = "<html><head><title>t</title></head><body></body></html>";

fn patch_reply(class: &str) -> String {
    format!(
        r##"{{"analysis": "add a pressed state", "patches": [{{"selector": "#go", "add_classes": ["{}"]}}]}}"##,
        class
    )
}

fn surgical(backend: &Rc<ScriptedBackend>) -> SurgicalRepairClient {
    SurgicalRepairClient::new(Box::new(Rc::clone(backend))).with_max_retries(1)
}

/// Invisible quiz that becomes visible once the force-visible patch lands.
fn quiz_renderer() -> MockRenderer {
    MockRenderer::new(|html| Ok(MockPage::new(quiz_scene(html.contains("\"lr-force-visible\"")))))
}

/// Dead button that works once `class` is added by a patch.
fn dead_button_renderer(class: &'static str) -> MockRenderer {
    MockRenderer::new(move |html| {
        Ok(MockPage::new(dead_button_scene(html.contains(&format!("\"{}\"", class)))))
    })
}

/// Card `#flip` turned away inside a preserve-3d stage. Once its backface is
/// made visible it paints and flips on click.
fn flip_card_scene(fixed: bool) -> Scene {
    let mut scene = base_scene();
    let stage = scene
        .add(BODY, "div", BoundingBox::new(100.0, 100.0, 200.0, 100.0))
        .class("stage")
        .style(|s| s.transform_style = "preserve-3d".into())
        .index();
    let card = scene
        .add(stage, "button", BoundingBox::new(120.0, 120.0, 80.0, 40.0))
        .id("flip")
        .style(|s| {
            s.transform = "matrix3d(-1,0,0,0,0,1,0,0,0,0,-1,0,0,0,0,1)".into();
            s.backface_visibility = "hidden".into();
        });
    if fixed {
        card.fill(BLUE).on_click(ClickEffect::Recolor(GREEN));
    }
    scene
}

/// Blank page whose content sits in a transparent `main`.
fn hidden_main_scene(fixed: bool) -> Scene {
    if fixed {
        let mut scene = base_scene();
        scene.add(BODY, "main", BoundingBox::new(0.0, 40.0, 400.0, 260.0));
        return scene;
    }
    let mut scene = blank_scene();
    let main = scene
        .add(BODY, "main", BoundingBox::new(0.0, 40.0, 400.0, 260.0))
        .opacity(0.0)
        .index();
    scene
        .add(main, "div", BoundingBox::new(20.0, 60.0, 360.0, 200.0))
        .class("card");
    scene
}

// =========================================================================
// Repair paths
// =========================================================================

#[test]
fn invisible_quiz_is_fixed_deterministically() {
    let renderer = quiz_renderer();
    let tracer = TraceLogger::disabled();
    let report = Orchestrator::new(&renderer, &tracer)
        .run(&contract(DOC, Some(LayoutArchetype::Trivia)))
        .unwrap();

    assert!(report.valid);
    assert_eq!(report.stop_reason, StopReason::Valid);
    assert_eq!(report.best_label, "deterministic");
    assert_eq!(report.confidence, 1.0);
    assert_eq!(report.attempts, 0);
    assert!(report.html.contains("lr-force-visible"));
    assert!(report.remaining_errors.is_empty());
    assert_eq!(report.history.len(), 2);
    assert_eq!(report.history[0].score, Some(0.5));
    assert_eq!(report.history[1].valid, Some(true));
    assert_eq!(renderer.renders(), 2);
}

#[test]
fn flipped_card_is_fixed_by_the_transform_rule() {
    let renderer = MockRenderer::new(|html| {
        Ok(MockPage::new(flip_card_scene(html.contains("\"lr-backface-visible\""))))
    });
    let tracer = TraceLogger::disabled();
    let report = Orchestrator::new(&renderer, &tracer)
        .run(&contract(DOC, Some(LayoutArchetype::Game)))
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::Valid);
    assert_eq!(report.best_label, "deterministic");
    assert_eq!(report.confidence, 1.0);
    assert_eq!(report.attempts, 0);
    assert!(report.html.contains("\"lr-preserve-3d\""));
    assert_eq!(report.history.len(), 2);
    assert_eq!(report.history[0].score, Some(0.5));
    assert_eq!(renderer.renders(), 2);
}

#[test]
fn blank_original_is_scored_zero_then_repaired() {
    let renderer = MockRenderer::new(|html| {
        Ok(MockPage::new(hidden_main_scene(html.contains("\"lr-force-visible\""))))
    });
    let tracer = TraceLogger::disabled();
    let backend = Rc::new(ScriptedBackend::new([String::from(
        r#"{"analysis": "main is transparent", "patches": [{"selector": "main", "add_classes": ["lr-force-visible"]}]}"#,
    )]));
    let client = surgical(&backend);
    let report = Orchestrator::new(&renderer, &tracer)
        .with_surgical(Some(&client))
        .run(&contract(DOC, Some(LayoutArchetype::Static)))
        .unwrap();

    assert_eq!(report.history[0].score, Some(0.0));
    assert_eq!(report.history[0].valid, Some(false));
    assert!(report.valid);
    assert_eq!(report.stop_reason, StopReason::Valid);
    assert_eq!(report.best_label, "surgical-1");
    assert_eq!(report.attempts, 1);
    assert!(backend.requests()[0].error_context.contains("blank_page"));
}

#[test]
fn blocking_overlay_is_made_pass_through() {
    let renderer = MockRenderer::new(|html| {
        Ok(MockPage::new(overlay_scene(!html.contains("\"lr-pass-through\""))))
    });
    let tracer = TraceLogger::disabled();
    let report = Orchestrator::new(&renderer, &tracer)
        .run(&contract(DOC, Some(LayoutArchetype::Game)))
        .unwrap();

    assert!(report.valid);
    assert_eq!(report.best_label, "deterministic");
    assert!(report.html.contains("\"lr-pointer-auto\""));
}

#[test]
fn dead_button_is_fixed_surgically() {
    let renderer = dead_button_renderer("pressable");
    let tracer = TraceLogger::disabled();
    let backend = Rc::new(ScriptedBackend::new([patch_reply("pressable")]));
    let client = surgical(&backend);
    let report = Orchestrator::new(&renderer, &tracer)
        .with_surgical(Some(&client))
        .run(&contract(DOC, Some(LayoutArchetype::Game)))
        .unwrap();

    assert!(report.valid);
    assert_eq!(report.stop_reason, StopReason::Valid);
    assert_eq!(report.best_label, "surgical-1");
    assert_eq!(report.attempts, 1);
    let request = &backend.requests()[0];
    assert!(request.error_context.contains("no_response on #go"));
    assert!(!request.error_context.contains(DOC), "the document itself is never sent");
}

#[test]
fn harmful_patches_never_replace_the_best_candidate() {
    let renderer = MockRenderer::new(|html| {
        if html.contains("\"lr-broken\"") {
            Ok(MockPage::new(blank_scene()))
        } else {
            Ok(MockPage::new(dead_button_scene(false)))
        }
    });
    let tracer = TraceLogger::disabled();
    let backend = Rc::new(ScriptedBackend::new([
        patch_reply("lr-broken"),
        patch_reply("lr-broken"),
        patch_reply("lr-broken"),
    ]));
    let client = surgical(&backend);
    let report = Orchestrator::new(&renderer, &tracer)
        .with_surgical(Some(&client))
        .run(&contract(DOC, Some(LayoutArchetype::Game)))
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::AttemptsExhausted);
    assert_eq!(report.attempts, 3);
    assert_eq!(report.best_label, "original");
    assert_eq!(report.html, DOC);
    assert_eq!(report.confidence, 0.5);
    assert_eq!(report.history.len(), 4);
    assert!(report.history[1..].iter().all(|h| h.score == Some(0.0)));
    assert_eq!(report.remaining_errors[0].kind, ErrorKind::NoResponse);
}

#[test]
fn empty_model_output_still_spends_an_attempt() {
    let renderer = dead_button_renderer("pressable");
    let tracer = TraceLogger::disabled();
    let backend = Rc::new(ScriptedBackend::new(["no idea", "still no idea"]));
    let client = surgical(&backend);
    let report = Orchestrator::new(&renderer, &tracer)
        .with_surgical(Some(&client))
        .with_settings(RepairSettings {
            max_attempts: 2,
            global_timeout: Duration::from_secs(60),
        })
        .run(&contract(DOC, Some(LayoutArchetype::Game)))
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::AttemptsExhausted);
    assert_eq!(report.attempts, 2);
    assert_eq!(report.history.len(), 1);
    assert_eq!(backend.requests().len(), 2);
}

// =========================================================================
// Stop conditions
// =========================================================================

#[test]
fn valid_original_stops_immediately() {
    let renderer = MockRenderer::fixed(quiz_scene(true));
    let tracer = TraceLogger::disabled();
    let report = Orchestrator::new(&renderer, &tracer)
        .run(&contract(DOC, Some(LayoutArchetype::Trivia)))
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::NoErrors);
    assert_eq!(report.history.len(), 1);
    assert_eq!(report.confidence, 1.0);
    assert_eq!(report.html, DOC);
}

#[test]
fn without_a_model_unfixable_errors_stop_the_run() {
    let renderer = dead_button_renderer("pressable");
    let tracer = TraceLogger::disabled();
    let report = Orchestrator::new(&renderer, &tracer)
        .run(&contract(DOC, Some(LayoutArchetype::Game)))
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::NoModel);
    assert!(!report.valid);
    assert_eq!(report.best_label, "original");
    assert_eq!(renderer.renders(), 1);
}

#[test]
fn zero_timeout_returns_the_original() {
    let renderer = quiz_renderer();
    let tracer = TraceLogger::disabled();
    let backend = Rc::new(ScriptedBackend::new([patch_reply("x")]));
    let client = surgical(&backend);
    let report = Orchestrator::new(&renderer, &tracer)
        .with_surgical(Some(&client))
        .with_settings(RepairSettings {
            max_attempts: 3,
            global_timeout: Duration::ZERO,
        })
        .run(&contract(DOC, Some(LayoutArchetype::Trivia)))
        .unwrap();

    assert_eq!(report.stop_reason, StopReason::Timeout);
    assert!(report.timed_out);
    assert_eq!(report.attempts, 0);
    assert_eq!(report.best_label, "original");
    assert_eq!(renderer.renders(), 1);
    assert!(backend.requests().is_empty());
}

#[test]
fn crashed_candidate_validation_is_unscored() {
    let renderer = MockRenderer::new(|html| {
        if html.contains("\"lr-force-visible\"") {
            Err(PipelineError::browser("new_tab", "target crashed"))
        } else {
            Ok(MockPage::new(quiz_scene(false)))
        }
    });
    let tracer = TraceLogger::disabled();
    let report = Orchestrator::new(&renderer, &tracer)
        .run(&contract(DOC, Some(LayoutArchetype::Trivia)))
        .unwrap();

    assert_eq!(report.history.len(), 2);
    assert_eq!(report.history[1].score, None);
    assert_eq!(report.best_label, "original");
    assert_eq!(report.stop_reason, StopReason::NoModel);
}

#[test]
fn unvalidatable_original_is_an_error() {
    let renderer = MockRenderer::new(|_| Err(PipelineError::BrowserLaunch("missing".into())));
    let tracer = TraceLogger::disabled();
    let result = Orchestrator::new(&renderer, &tracer).run(&contract(DOC, None));
    assert!(matches!(result, Err(PipelineError::NoScoredCandidate(_))));
}

#[test]
fn run_is_traced_as_json_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trace.jsonl");
    let renderer = quiz_renderer();
    {
        let tracer = TraceLogger::new(&path);
        Orchestrator::new(&renderer, &tracer)
            .run(&contract(DOC, Some(LayoutArchetype::Trivia)))
            .unwrap();
    }

    let content = std::fs::read_to_string(&path).unwrap();
    let events: Vec<serde_json::Value> = content
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(events.first().unwrap()["state"], "Classify");
    assert_eq!(events.last().unwrap()["state"], "Done");
    assert!(events.iter().any(|e| e["decision"] == "adopt"));
    let steps: Vec<u64> = events.iter().map(|e| e["step"].as_u64().unwrap()).collect();
    assert!(steps.windows(2).all(|w| w[1] == w[0] + 1));
}

// =========================================================================
// History and budget
// =========================================================================

#[test]
fn recorded_scores_are_immutable() {
    let mut history = History::new();
    let i = history.push("<p>", "original");
    assert!(history.record_score(i, 0.4));
    assert!(!history.record_score(i, 0.9));
    assert_eq!(history.get(i).unwrap().score, Some(0.4));
}

#[test]
fn best_prefers_earliest_on_ties_and_skips_unscored() {
    let mut history = History::new();
    let a = history.push("a", "a");
    let b = history.push("b", "b");
    let c = history.push("c", "c");
    history.record_score(a, 0.5);
    history.record_score(b, 0.5);
    assert_eq!(history.best(), Some(a));
    assert_eq!(history.get(c).unwrap().effective_score(), 0.0);

    history.record_score(c, 0.6);
    assert_eq!(history.best(), Some(c));
    assert_eq!(history.best_score(), Some(0.6));
}

#[test]
fn empty_history_has_no_best() {
    assert_eq!(History::new().best(), None);
}

#[test]
fn budget_blocks_on_attempts_then_time() {
    let budget = RepairBudget::new(Duration::from_secs(60), 1);
    assert_eq!(check_budget(&budget), BudgetDecision::Allow);
    let spent = budget.consume();
    assert_eq!(check_budget(&spent), BudgetDecision::Block("attempts_exhausted"));
    assert_eq!(spent.consume().attempts_remaining, 0);

    let expired = RepairBudget::new(Duration::ZERO, 5);
    assert_eq!(check_budget(&expired), BudgetDecision::Block("global_timeout"));
}
