use std::collections::{BTreeMap, BTreeSet};

use log::debug;
use serde::Deserialize;

use crate::browser::sandbox::LivePage;
use crate::error::PipelineError;
use crate::geometry::geometry_model::{
    BoundingBox, ComputedStyle, Geometry, NodeDescriptor, PointerEvents, Visibility, ZIndex,
};

/// Which elements a geometry pass walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryScope {
    /// Every element in `<body>`
    All,
    /// Only elements that could plausibly be interactive
    Interactive,
}

impl GeometryScope {
    pub fn universe(&self) -> &'static str {
        match self {
            GeometryScope::All => "*",
            GeometryScope::Interactive => {
                "button, input, [role=button], [data-option], [data-submit], [onclick], \
                 [class*=btn], [class*=button], [class*=option], [class*=choice], \
                 [class*=answer], [class*=card], [class*=tile], [class*=clickable], \
                 [class*=toggle], [class*=flip]"
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNode {
    index: usize,
    parent: Option<usize>,
    tag: String,
    id: Option<String>,
    #[serde(default)]
    classes: Vec<String>,
    x: f64,
    y: f64,
    w: f64,
    h: f64,
    #[serde(default)]
    z_index: String,
    #[serde(default)]
    pointer_events: String,
    #[serde(default)]
    visibility: String,
    #[serde(default)]
    attributes: BTreeMap<String, String>,
    #[serde(default)]
    style: RawStyle,
    path: String,
    selector: String,
    #[serde(default)]
    nth_of_type: usize,
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawStyle {
    opacity: Option<f64>,
    display: Option<String>,
    visibility: Option<String>,
    position: Option<String>,
    transform: Option<String>,
    transform_style: Option<String>,
    backface_visibility: Option<String>,
    perspective: Option<String>,
    cursor: Option<String>,
}

impl From<RawStyle> for ComputedStyle {
    fn from(raw: RawStyle) -> Self {
        let defaults = ComputedStyle::default();
        ComputedStyle {
            opacity: raw.opacity.unwrap_or(defaults.opacity),
            display: raw.display.unwrap_or(defaults.display),
            visibility: raw.visibility.unwrap_or(defaults.visibility),
            position: raw.position.unwrap_or(defaults.position),
            transform: raw.transform.unwrap_or(defaults.transform),
            transform_style: raw.transform_style.unwrap_or(defaults.transform_style),
            backface_visibility: raw.backface_visibility.unwrap_or(defaults.backface_visibility),
            perspective: raw.perspective.unwrap_or(defaults.perspective),
            cursor: raw.cursor.unwrap_or(defaults.cursor),
        }
    }
}

impl From<RawNode> for NodeDescriptor {
    fn from(raw: RawNode) -> Self {
        NodeDescriptor {
            index: raw.index,
            parent: raw.parent,
            tag: raw.tag.to_lowercase(),
            id: raw.id.filter(|s| !s.is_empty()),
            classes: raw.classes.into_iter().collect::<BTreeSet<_>>(),
            bbox: BoundingBox::new(raw.x, raw.y, raw.w, raw.h),
            z_index: ZIndex::parse(&raw.z_index),
            pointer_events: if raw.pointer_events == "none" {
                PointerEvents::None
            } else {
                PointerEvents::Auto
            },
            visibility: Visibility::parse(&raw.visibility),
            attributes: raw.attributes,
            style: raw.style.into(),
            path: raw.path,
            selector: raw.selector,
            nth_of_type: raw.nth_of_type.max(1),
            text: raw.text,
        }
    }
}

/// Parse the JSON emitted by the page-side geometry walk.
pub fn parse_geometry(json: &str) -> Result<Geometry, PipelineError> {
    let raw: Vec<RawNode> = serde_json::from_str(json).map_err(|e| PipelineError::JsonParse {
        context: "geometry extraction".into(),
        source: e,
    })?;
    Ok(Geometry::new(raw.into_iter().map(NodeDescriptor::from).collect()))
}

/// Run one geometry pass against the live page.
pub fn extract_geometry(
    page: &mut dyn LivePage,
    scope: GeometryScope,
) -> Result<Geometry, PipelineError> {
    let geometry = page.geometry(scope)?;
    debug!("geometry pass ({:?}): {} nodes", scope, geometry.len());
    Ok(geometry)
}
