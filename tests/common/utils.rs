use std::path::PathBuf;

use screen_repair::{
    geometry::geometry_model::{BoundingBox, Viewport},
    validation::contract::{LayoutArchetype, ValidationContract},
};

use crate::common::mock_page::{ClickEffect, Scene, BLUE, BODY, GREEN, GREY};

pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

pub fn viewport() -> Viewport {
    Viewport::new(400, 300)
}

pub fn contract(html: &str, archetype: Option<LayoutArchetype>) -> ValidationContract {
    ValidationContract::new(html)
        .with_viewport(viewport())
        .with_archetype(archetype)
        .with_stabilization_delay_ms(0)
}

/// Page with a grey banner so it never reads as blank.
pub fn base_scene() -> Scene {
    let mut scene = Scene::new(viewport());
    scene
        .add(BODY, "header", BoundingBox::new(0.0, 0.0, 400.0, 40.0))
        .fill(GREY);
    scene
}

/// Four answer options under a `.quiz` container. With `visible == false`
/// every option has opacity 0.
pub fn quiz_scene(visible: bool) -> Scene {
    let mut scene = base_scene();
    let quiz = scene
        .add(BODY, "div", BoundingBox::new(0.0, 80.0, 400.0, 100.0))
        .class("quiz")
        .index();
    for i in 0..4 {
        let option = scene
            .add(quiz, "div", BoundingBox::new(20.0 + i as f64 * 95.0, 100.0, 80.0, 40.0))
            .class("option")
            .attr("data-option", &i.to_string())
            .fill(BLUE)
            .on_click(ClickEffect::Recolor(GREEN));
        if !visible {
            option.opacity(0.0);
        }
    }
    scene
}

/// A start button under a full-viewport transparent overlay. With
/// `blocked == false` the overlay lets clicks through.
pub fn overlay_scene(blocked: bool) -> Scene {
    let mut scene = base_scene();
    scene
        .add(BODY, "button", BoundingBox::new(150.0, 200.0, 100.0, 40.0))
        .id("start")
        .fill(BLUE)
        .on_click(ClickEffect::Recolor(GREEN));
    let overlay = scene
        .add(BODY, "div", BoundingBox::new(0.0, 0.0, 400.0, 300.0))
        .class("overlay")
        .z(10);
    if !blocked {
        overlay.no_pointer();
    }
    scene
}

/// A single button that does nothing when clicked unless `wired`.
pub fn dead_button_scene(wired: bool) -> Scene {
    let mut scene = base_scene();
    let button = scene
        .add(BODY, "button", BoundingBox::new(150.0, 120.0, 100.0, 40.0))
        .id("go")
        .fill(BLUE);
    if wired {
        button.on_click(ClickEffect::Recolor(GREEN));
    }
    scene
}

/// Blank white page.
pub fn blank_scene() -> Scene {
    Scene::new(viewport())
}
