use std::rc::Rc;

use screen_repair::{
    geometry::geometry_model::Geometry,
    repair::{
        classify::{ClassifiedError, ErrorKind},
        surgical::{
            build_error_context, parse_response, ScriptedBackend, SurgicalInput,
            SurgicalRepairClient,
        },
    },
    visual::capture::Screenshot,
};

use crate::common::{
    mock_page::{scene_geometry, WHITE},
    utils::{dead_button_scene, overlay_scene, viewport},
};

mod common;

const GOOD: &str = r##"{"analysis": "button lacks a press state", "patches": [{"selector": "#go", "add_styles": {"transform": "scale(0.95)"}}]}"##;

fn dead_button_errors() -> Vec<ClassifiedError> {
    vec![ClassifiedError::new(ErrorKind::NoResponse, "#go", 0.7, "no-response (tight 0.00%, local 0.00%)")]
}

fn input<'a>(errors: &'a [ClassifiedError], geometry: &'a Geometry, shot: Option<&'a Screenshot>) -> SurgicalInput<'a> {
    SurgicalInput {
        errors,
        geometry,
        viewport: viewport(),
        user_request: "a start button",
        screenshot: shot,
    }
}

fn client(backend: &Rc<ScriptedBackend>) -> SurgicalRepairClient {
    SurgicalRepairClient::new(Box::new(Rc::clone(backend)))
}

// =========================================================================
// Response parsing
// =========================================================================

#[test]
fn parses_bare_json() {
    let response = parse_response(GOOD).unwrap();
    assert_eq!(response.analysis, "button lacks a press state");
    assert_eq!(response.patches.len(), 1);
    assert!(response.patches[0].add_classes.is_empty());
}

#[test]
fn strips_fences_and_prose() {
    let raw = format!("Sure! Here is the fix:\n```json\n{}\n```\nLet me know.", GOOD);
    assert_eq!(parse_response(&raw).unwrap(), parse_response(GOOD).unwrap());
}

#[test]
fn rejects_other_shapes() {
    assert!(parse_response("no json here").is_err());
    assert!(parse_response(r#"{"patches": []}"#).is_err());
    assert!(parse_response(r#"{"analysis": "x", "patches": [{"add_classes": ["a"]}]}"#).is_err());
    assert!(parse_response("} backwards {").is_err());
}

// =========================================================================
// Context building
// =========================================================================

#[test]
fn context_describes_only_named_elements() {
    let geometry = scene_geometry(&dead_button_scene(false));
    let errors = dead_button_errors();
    let context = build_error_context(&input(&errors, &geometry, None));

    assert!(context.starts_with("USER INTENT: a start button"));
    assert!(context.contains("VIEWPORT: 400x300"));
    assert!(context.contains("1. no_response on #go (confidence 0.70)"));
    assert!(context.contains("element: <button> selector=#go"));
    assert!(!context.contains("<header>"), "healthy elements stay out of the context");
}

#[test]
fn context_includes_the_blocker() {
    let scene = overlay_scene(true);
    let overlay = scene.selector_of(4);
    let geometry = scene_geometry(&scene);
    let errors = vec![
        ClassifiedError::new(ErrorKind::PointerIntercepted, "#start", 0.9, "covered").with_blocker(&overlay),
    ];
    let context = build_error_context(&input(&errors, &geometry, None));
    assert!(context.contains(&format!("blocked by: <div> selector={}", overlay)));
}

// =========================================================================
// Retry loop
// =========================================================================

#[test]
fn accepted_patches_are_returned() {
    let geometry = scene_geometry(&dead_button_scene(false));
    let errors = dead_button_errors();
    let backend = Rc::new(ScriptedBackend::new([GOOD]));
    let outcome = client(&backend).repair(&input(&errors, &geometry, None));

    assert_eq!(outcome.attempts, 1);
    assert_eq!(outcome.patches.len(), 1);
    assert_eq!(outcome.analysis.as_deref(), Some("button lacks a press state"));
    assert!(outcome.failures.is_empty());
    assert_eq!(backend.requests().len(), 1);
}

#[test]
fn malformed_reply_is_retried_with_correction() {
    let geometry = scene_geometry(&dead_button_scene(false));
    let errors = dead_button_errors();
    let backend = Rc::new(ScriptedBackend::new(["I think the button is broken.", GOOD]));
    let outcome = client(&backend).repair(&input(&errors, &geometry, None));

    assert_eq!(outcome.attempts, 2);
    assert!(!outcome.is_empty());
    let requests = backend.requests();
    assert!(!requests[0].error_context.contains("CORRECTION"));
    assert!(requests[1].error_context.contains("CORRECTION: Your last reply was not valid"));
}

#[test]
fn rejected_patch_set_is_retried() {
    let geometry = scene_geometry(&dead_button_scene(false));
    let errors = dead_button_errors();
    let hides = r##"{"analysis": "x", "patches": [{"selector": "#go", "add_styles": {"display": "none"}}]}"##;
    let backend = Rc::new(ScriptedBackend::new([hides, GOOD]));
    let outcome = client(&backend).repair(&input(&errors, &geometry, None));

    assert_eq!(outcome.attempts, 2);
    assert!(outcome.failures[0].starts_with("rejected:"));
    assert!(backend.requests()[1].error_context.contains("was rejected"));
}

#[test]
fn transport_failure_is_retried() {
    let geometry = scene_geometry(&dead_button_scene(false));
    let errors = dead_button_errors();
    let backend = Rc::new(ScriptedBackend::default());
    backend.push_failure("connection refused");
    backend.push_response(GOOD);
    let outcome = client(&backend).repair(&input(&errors, &geometry, None));

    assert_eq!(outcome.attempts, 2);
    assert!(outcome.failures[0].contains("connection refused"));
    assert_eq!(outcome.patches.len(), 1);
}

#[test]
fn exhausted_retries_yield_empty_outcome() {
    let geometry = scene_geometry(&dead_button_scene(false));
    let errors = dead_button_errors();
    let backend = Rc::new(ScriptedBackend::new(["nope", "still nope"]));
    let outcome = client(&backend).with_max_retries(2).repair(&input(&errors, &geometry, None));

    assert!(outcome.is_empty());
    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.failures.len(), 2);
    let last = &backend.requests()[1].error_context;
    assert_eq!(last.matches("CORRECTION:").count(), 1);
}

#[test]
fn no_errors_means_no_request() {
    let geometry = scene_geometry(&dead_button_scene(false));
    let backend = Rc::new(ScriptedBackend::new([GOOD]));
    let outcome = client(&backend).repair(&input(&[], &geometry, None));
    assert!(outcome.is_empty());
    assert!(backend.requests().is_empty());
}

#[test]
fn screenshot_is_attached_unless_disabled() {
    let geometry = scene_geometry(&dead_button_scene(false));
    let errors = dead_button_errors();
    let shot = Screenshot::filled(8, 8, WHITE);

    let backend = Rc::new(ScriptedBackend::new([GOOD]));
    client(&backend).repair(&input(&errors, &geometry, Some(&shot)));
    assert!(backend.requests()[0].optional_image.is_some());

    let backend = Rc::new(ScriptedBackend::new([GOOD]));
    client(&backend)
        .with_screenshot(false)
        .repair(&input(&errors, &geometry, Some(&shot)));
    assert!(backend.requests()[0].optional_image.is_none());
}
