use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::browser::scripts::ERROR_HOOK;
use crate::error::PipelineError;
use crate::geometry::extractor::GeometryScope;
use crate::geometry::geometry_model::{Geometry, Viewport};
use crate::validation::contract::ValidationContract;
use crate::visual::capture::Screenshot;

// ============================================================================
// Render sandbox seam
// ============================================================================

/// An uncaught script exception captured while the page loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptError {
    pub message: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub line: u32,
}

impl ScriptError {
    /// Parse-level failures abort the script block they live in.
    pub fn is_parse_blocking(&self) -> bool {
        self.message.contains("SyntaxError")
    }
}

/// Snapshot of the document's load state and captured script errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentState {
    pub ready_state: String,
    pub has_body: bool,
    pub body_element_count: usize,
    #[serde(default)]
    pub errors: Vec<ScriptError>,
    #[serde(default)]
    pub console_warnings: Vec<String>,
}

impl DocumentState {
    pub fn is_loaded(&self) -> bool {
        matches!(self.ready_state.as_str(), "complete" | "interactive")
    }

    /// Reason the DOM could not be constructed, if any. Script errors only
    /// count when they left the body without any element; a parse-blocking
    /// one is reported ahead of runtime errors.
    pub fn fatal_reason(&self) -> Option<String> {
        if !self.is_loaded() {
            return Some(format!("document stuck in readyState '{}'", self.ready_state));
        }
        if !self.has_body {
            return Some("document has no <body>".to_string());
        }
        if self.body_element_count == 0 {
            let culprit = self
                .errors
                .iter()
                .find(|e| e.is_parse_blocking())
                .or_else(|| self.errors.first());
            if let Some(err) = culprit {
                return Some(format!("script error prevented DOM construction: {}", err.message));
            }
        }
        None
    }
}

/// Topmost element at a point, as reported by the page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitTarget {
    pub path: String,
    pub selector: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClickOutcome {
    Dispatched,
    NotFound,
    Failed(String),
}

/// A live, isolated page holding one rendered document.
///
/// Owned by exactly one phase at a time; released when dropped.
pub trait LivePage {
    fn viewport(&self) -> Viewport;

    fn document_state(&mut self) -> Result<DocumentState, PipelineError>;

    fn geometry(&mut self, scope: GeometryScope) -> Result<Geometry, PipelineError>;

    fn screenshot(&mut self) -> Result<Screenshot, PipelineError>;

    fn hit_test(&mut self, x: f64, y: f64) -> Result<Option<HitTarget>, PipelineError>;

    fn click(&mut self, selector: &str, timeout: Duration) -> Result<ClickOutcome, PipelineError>;

    /// Wait for transitions and animations to settle.
    fn settle(&mut self, delay: Duration);

    /// Reload the original document in place.
    fn reset(&mut self) -> Result<(), PipelineError>;
}

/// Produces fresh, isolated pages.
pub trait Renderer {
    /// Load `html` at the contract's viewport. `Err(LoadTimeout)` means the
    /// page never reached a loaded state; other errors are infrastructure
    /// failures.
    fn render(
        &self,
        html: &str,
        contract: &ValidationContract,
    ) -> Result<Box<dyn LivePage>, PipelineError>;
}

/// Insert the error-capture hook as the first thing inside `<head>` so it is
/// installed before any author script runs.
pub fn inject_error_hook(html: &str) -> String {
    if let Some(at) = end_of_open_tag(html, "head") {
        return format!("{}{}{}", &html[..at], ERROR_HOOK, &html[at..]);
    }

    if let Some(at) = end_of_open_tag(html, "html") {
        return format!("{}<head>{}</head>{}", &html[..at], ERROR_HOOK, &html[at..]);
    }

    format!("{}{}", ERROR_HOOK, html)
}

/// Byte offset just past the first `<tag ...>` opening tag (case-insensitive).
pub fn end_of_open_tag(html: &str, tag: &str) -> Option<usize> {
    let lower = html.to_ascii_lowercase();
    let needle = format!("<{}", tag);
    let mut from = 0;
    while let Some(found) = lower[from..].find(&needle) {
        let start = from + found;
        let after = start + needle.len();
        match lower.as_bytes().get(after) {
            Some(b'>') | Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r') | Some(b'/') => {
                return lower[after..].find('>').map(|close| after + close + 1);
            }
            _ => from = after,
        }
    }
    None
}

/// Byte offset of the first `</tag>` closing tag (case-insensitive).
pub fn start_of_close_tag(html: &str, tag: &str) -> Option<usize> {
    html.to_ascii_lowercase().find(&format!("</{}", tag))
}
