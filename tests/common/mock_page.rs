use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;
use std::time::Duration;

use image::Rgba;
use screen_repair::{
    browser::sandbox::{ClickOutcome, DocumentState, HitTarget, LivePage, Renderer},
    error::PipelineError,
    geometry::{
        extractor::GeometryScope,
        geometry_model::{BoundingBox, Geometry, NodeDescriptor, PointerEvents, Viewport, ZIndex},
    },
    input::detector::is_interactive,
    validation::contract::ValidationContract,
    visual::capture::Screenshot,
};

// =========================================================================
// In-memory page: colored boxes painted by z-order
// =========================================================================

pub const WHITE: [u8; 4] = [255, 255, 255, 255];
pub const BLACK: [u8; 4] = [20, 20, 20, 255];
pub const RED: [u8; 4] = [220, 40, 40, 255];
pub const GREEN: [u8; 4] = [40, 200, 60, 255];
pub const BLUE: [u8; 4] = [40, 60, 220, 255];
pub const GREY: [u8; 4] = [128, 128, 128, 255];

/// What a click on an element does to the page.
#[derive(Debug, Clone, PartialEq)]
pub enum ClickEffect {
    None,
    /// Repaint the element itself
    Recolor([u8; 4]),
    /// Paint a rectangle anywhere on the page
    Paint(BoundingBox, [u8; 4]),
    /// Un-hide elements, by selector or path
    Reveal(Vec<String>),
    Both(Box<ClickEffect>, Box<ClickEffect>),
}

#[derive(Debug, Clone)]
pub struct MockElement {
    pub node: NodeDescriptor,
    pub fill: Option<[u8; 4]>,
    /// Hidden elements report a zero-size box and paint nothing
    pub hidden: bool,
    pub effect: ClickEffect,
}

impl MockElement {
    pub fn index(&self) -> usize {
        self.node.index
    }

    pub fn id(&mut self, id: &str) -> &mut Self {
        self.node.id = Some(id.to_string());
        self.node.selector = format!("#{}", id);
        self.node.attributes.insert("id".into(), id.to_string());
        self
    }

    pub fn class(&mut self, class: &str) -> &mut Self {
        self.node.classes.insert(class.to_string());
        self
    }

    pub fn attr(&mut self, name: &str, value: &str) -> &mut Self {
        self.node.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn fill(&mut self, color: [u8; 4]) -> &mut Self {
        self.fill = Some(color);
        self
    }

    pub fn z(&mut self, z: i32) -> &mut Self {
        self.node.z_index = ZIndex::Value(z);
        self
    }

    pub fn no_pointer(&mut self) -> &mut Self {
        self.node.pointer_events = PointerEvents::None;
        self
    }

    pub fn opacity(&mut self, opacity: f64) -> &mut Self {
        self.node.style.opacity = opacity;
        self
    }

    pub fn style(&mut self, edit: impl FnOnce(&mut screen_repair::geometry::geometry_model::ComputedStyle)) -> &mut Self {
        edit(&mut self.node.style);
        self
    }

    pub fn hidden(&mut self) -> &mut Self {
        self.hidden = true;
        self
    }

    pub fn on_click(&mut self, effect: ClickEffect) -> &mut Self {
        self.effect = effect;
        self
    }

    fn paints(&self) -> bool {
        !self.hidden
            && self.fill.is_some()
            && self.node.style.opacity >= 0.05
            && self.node.style.visibility == "visible"
    }
}

/// A document description: `html` at index 0, `body` at index 1, then
/// whatever the test adds.
#[derive(Debug, Clone)]
pub struct Scene {
    pub viewport: Viewport,
    pub background: [u8; 4],
    pub elements: Vec<MockElement>,
    pub document: DocumentState,
}

pub const BODY: usize = 1;

impl Scene {
    pub fn new(viewport: Viewport) -> Self {
        let bounds = viewport.bounds();
        let html = NodeDescriptor {
            index: 0,
            parent: None,
            tag: "html".into(),
            bbox: bounds,
            path: "html".into(),
            selector: "html".into(),
            nth_of_type: 1,
            ..Default::default()
        };
        let body = NodeDescriptor {
            index: 1,
            parent: Some(0),
            tag: "body".into(),
            bbox: bounds,
            path: "html > body:nth-of-type(1)".into(),
            selector: "html > body:nth-of-type(1)".into(),
            nth_of_type: 1,
            ..Default::default()
        };
        let wrap = |node| MockElement {
            node,
            fill: None,
            hidden: false,
            effect: ClickEffect::None,
        };

        Self {
            viewport,
            background: WHITE,
            elements: vec![wrap(html), wrap(body)],
            document: DocumentState {
                ready_state: "complete".into(),
                has_body: true,
                body_element_count: 0,
                errors: Vec::new(),
                console_warnings: Vec::new(),
            },
        }
    }

    /// Add an element under `parent`. Path and selector follow the page
    /// script's conventions.
    pub fn add(&mut self, parent: usize, tag: &str, bbox: BoundingBox) -> &mut MockElement {
        let index = self.elements.len();
        let parent_path = self.elements[parent].node.path.clone();
        let nth = self
            .elements
            .iter()
            .filter(|e| e.node.parent == Some(parent) && e.node.tag == tag)
            .count()
            + 1;
        let path = format!("{} > {}:nth-of-type({})", parent_path, tag, nth);

        self.elements.push(MockElement {
            node: NodeDescriptor {
                index,
                parent: Some(parent),
                tag: tag.to_string(),
                bbox,
                path: path.clone(),
                selector: path,
                nth_of_type: nth,
                ..Default::default()
            },
            fill: None,
            hidden: false,
            effect: ClickEffect::None,
        });
        self.document.body_element_count += 1;
        &mut self.elements[index]
    }

    pub fn el(&mut self, index: usize) -> &mut MockElement {
        &mut self.elements[index]
    }

    pub fn path_of(&self, index: usize) -> String {
        self.elements[index].node.path.clone()
    }

    pub fn selector_of(&self, index: usize) -> String {
        self.elements[index].node.selector.clone()
    }
}

/// Calls observed across every page a renderer produced.
#[derive(Debug, Default)]
pub struct MockStats {
    pub renders: usize,
    pub resets: usize,
    pub clicks: Vec<String>,
    pub hit_tests: usize,
}

pub struct MockPage {
    scene: Scene,
    initial: Scene,
    paints: Vec<(BoundingBox, [u8; 4])>,
    /// `reset` is accepted but leaves the page as it is
    broken_reset: bool,
    stats: Rc<RefCell<MockStats>>,
}

impl MockPage {
    pub fn new(scene: Scene) -> Self {
        Self {
            initial: scene.clone(),
            scene,
            paints: Vec::new(),
            broken_reset: false,
            stats: Rc::new(RefCell::new(MockStats::default())),
        }
    }

    pub fn with_broken_reset(mut self) -> Self {
        self.broken_reset = true;
        self
    }

    fn find(&self, selector: &str) -> Option<usize> {
        self.scene
            .elements
            .iter()
            .position(|e| e.node.selector == selector || e.node.path == selector)
    }

    fn apply(&mut self, index: usize, effect: ClickEffect) {
        match effect {
            ClickEffect::None => {}
            ClickEffect::Recolor(color) => self.scene.elements[index].fill = Some(color),
            ClickEffect::Paint(bbox, color) => self.paints.push((bbox, color)),
            ClickEffect::Reveal(targets) => {
                for target in targets {
                    if let Some(i) = self.find(&target) {
                        self.scene.elements[i].hidden = false;
                    }
                }
            }
            ClickEffect::Both(a, b) => {
                self.apply(index, *a);
                self.apply(index, *b);
            }
        }
    }

    fn node_view(&self, element: &MockElement) -> NodeDescriptor {
        let mut node = element.node.clone();
        if element.hidden {
            node.bbox = BoundingBox::new(node.bbox.x, node.bbox.y, 0.0, 0.0);
        }
        node
    }

    fn stacking_order(&self) -> Vec<&MockElement> {
        let mut ordered: Vec<&MockElement> = self.scene.elements.iter().collect();
        ordered.sort_by_key(|e| (e.node.z_index.effective(), e.node.index));
        ordered
    }
}

fn paint_rect(shot: &mut Screenshot, bbox: &BoundingBox, color: [u8; 4]) {
    let (w, h) = (shot.width(), shot.height());
    if let Some((x, y, cw, ch)) = bbox.clip_to(w, h) {
        let image = shot.image_mut();
        for py in y..y + ch {
            for px in x..x + cw {
                image.put_pixel(px, py, Rgba(color));
            }
        }
    }
}

impl LivePage for MockPage {
    fn viewport(&self) -> Viewport {
        self.scene.viewport
    }

    fn document_state(&mut self) -> Result<DocumentState, PipelineError> {
        Ok(self.scene.document.clone())
    }

    fn geometry(&mut self, scope: GeometryScope) -> Result<Geometry, PipelineError> {
        let nodes = self
            .scene
            .elements
            .iter()
            .filter(|e| scope == GeometryScope::All || is_interactive(&e.node))
            .map(|e| self.node_view(e))
            .collect();
        Ok(Geometry::new(nodes))
    }

    fn screenshot(&mut self) -> Result<Screenshot, PipelineError> {
        let viewport = self.scene.viewport;
        let mut shot = Screenshot::filled(viewport.width, viewport.height, self.scene.background);
        for element in self.stacking_order() {
            if element.paints() {
                if let Some(color) = element.fill {
                    paint_rect(&mut shot, &element.node.bbox, color);
                }
            }
        }
        for (bbox, color) in &self.paints {
            paint_rect(&mut shot, bbox, *color);
        }
        Ok(shot)
    }

    fn hit_test(&mut self, x: f64, y: f64) -> Result<Option<HitTarget>, PipelineError> {
        self.stats.borrow_mut().hit_tests += 1;
        let hit = self
            .stacking_order()
            .into_iter()
            .rev()
            .filter(|e| !e.hidden)
            .filter(|e| e.node.pointer_events == PointerEvents::Auto)
            .find(|e| e.node.bbox.contains_point(x, y))
            .map(|e| HitTarget {
                path: e.node.path.clone(),
                selector: e.node.selector.clone(),
            });
        Ok(hit)
    }

    fn click(&mut self, selector: &str, _timeout: Duration) -> Result<ClickOutcome, PipelineError> {
        self.stats.borrow_mut().clicks.push(selector.to_string());
        let Some(index) = self.find(selector) else {
            return Ok(ClickOutcome::NotFound);
        };
        if self.scene.elements[index].hidden {
            return Ok(ClickOutcome::Failed("element is not displayed".into()));
        }
        let effect = self.scene.elements[index].effect.clone();
        self.apply(index, effect);
        Ok(ClickOutcome::Dispatched)
    }

    fn settle(&mut self, _delay: Duration) {}

    fn reset(&mut self) -> Result<(), PipelineError> {
        self.stats.borrow_mut().resets += 1;
        if !self.broken_reset {
            self.scene = self.initial.clone();
            self.paints.clear();
        }
        Ok(())
    }
}

// =========================================================================
// Renderer: maps each document to a freshly built page
// =========================================================================

type Build = dyn Fn(&str) -> Result<MockPage, PipelineError>;

pub struct MockRenderer {
    build: Box<Build>,
    pub stats: Rc<RefCell<MockStats>>,
    /// Documents rendered, in order
    pub documents: RefCell<Vec<String>>,
}

impl MockRenderer {
    pub fn new(build: impl Fn(&str) -> Result<MockPage, PipelineError> + 'static) -> Self {
        Self {
            build: Box::new(build),
            stats: Rc::new(RefCell::new(MockStats::default())),
            documents: RefCell::new(Vec::new()),
        }
    }

    /// Every document renders the same scene.
    pub fn fixed(scene: Scene) -> Self {
        Self::new(move |_| Ok(MockPage::new(scene.clone())))
    }

    pub fn renders(&self) -> usize {
        self.stats.borrow().renders
    }

    pub fn clicks(&self) -> Vec<String> {
        self.stats.borrow().clicks.clone()
    }
}

impl Renderer for MockRenderer {
    fn render(
        &self,
        html: &str,
        _contract: &ValidationContract,
    ) -> Result<Box<dyn LivePage>, PipelineError> {
        self.stats.borrow_mut().renders += 1;
        self.documents.borrow_mut().push(html.to_string());
        let mut page = (self.build)(html)?;
        page.stats = Rc::clone(&self.stats);
        Ok(Box::new(page))
    }
}

// =========================================================================
// Geometry helpers for tests that never touch a page
// =========================================================================

/// Geometry of a scene as the page would report it.
pub fn scene_geometry(scene: &Scene) -> Geometry {
    let mut page = MockPage::new(scene.clone());
    page.geometry(GeometryScope::All).unwrap_or_default()
}

pub fn classes(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

pub fn attrs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
