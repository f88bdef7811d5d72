use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::geometry::geometry_model::Viewport;

/// Declared or inferred layout family. Drives the aggregator's pass policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutArchetype {
    Static,
    Trivia,
    Game,
    Dashboard,
}

impl LayoutArchetype {
    pub fn is_interactive(&self) -> bool {
        !matches!(self, LayoutArchetype::Static)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LayoutArchetype::Static => "static",
            LayoutArchetype::Trivia => "trivia",
            LayoutArchetype::Game => "game",
            LayoutArchetype::Dashboard => "dashboard",
        }
    }
}

impl fmt::Display for LayoutArchetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LayoutArchetype {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "static" => Ok(LayoutArchetype::Static),
            "trivia" | "quiz" => Ok(LayoutArchetype::Trivia),
            "game" => Ok(LayoutArchetype::Game),
            "dashboard" => Ok(LayoutArchetype::Dashboard),
            other => Err(format!(
                "unknown layout archetype '{}' (expected static, trivia, game or dashboard)",
                other
            )),
        }
    }
}

const TRIVIA_WORDS: &[&str] = &["quiz", "question", "trivia"];
const GAME_WORDS: &[&str] = &["game", "play", "level", "score"];
const DASHBOARD_WORDS: &[&str] = &["dashboard", "chart", "widget", "metric"];

/// Guess an archetype from the user's request, then from the markup.
///
/// Request keywords match whole words (plurals included), so "display" is
/// not "play" and "scored" is not "score".
pub fn infer_archetype(user_request: &str, html: &str) -> Option<LayoutArchetype> {
    let request = user_request.to_lowercase();
    let tokens: Vec<&str> = request
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    let has_any = |words: &[&str]| tokens.iter().any(|t| words.iter().any(|w| is_word_form(t, w)));

    if has_any(TRIVIA_WORDS) {
        return Some(LayoutArchetype::Trivia);
    }
    if has_any(GAME_WORDS) {
        return Some(LayoutArchetype::Game);
    }
    if has_any(DASHBOARD_WORDS) {
        return Some(LayoutArchetype::Dashboard);
    }

    let markup = html.to_lowercase();
    if markup.contains("quiz") || markup.contains("data-option") {
        return Some(LayoutArchetype::Trivia);
    }
    if markup.contains("dashboard") {
        return Some(LayoutArchetype::Dashboard);
    }
    None
}

/// `token` is `word` or its plural.
fn is_word_form(token: &str, word: &str) -> bool {
    match token.strip_prefix(word) {
        Some(rest) => matches!(rest, "" | "s" | "es" | "zes"),
        None => false,
    }
}

/// Immutable input for one validation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationContract {
    pub html: String,
    pub viewport: Viewport,
    pub archetype: Option<LayoutArchetype>,
    pub user_request: String,
    /// Fraction of pixels that must change for a click to count
    pub visual_change_threshold: f64,
    /// Uniform-pixel fraction above which the page is blank
    pub blank_page_threshold: f64,
    pub max_inputs_to_test: usize,
    pub stabilization_delay_ms: u64,
    pub max_cascade_depth: u32,
    /// Minimum responsive/tested ratio for interactive layouts
    pub min_responsive_ratio: f64,
    pub load_timeout_ms: u64,
    /// Script-error collection window after load
    pub settle_ms: u64,
    pub click_timeout_ms: u64,
    /// Wall-clock budget for the whole interaction phase
    pub interaction_budget_ms: u64,
}

impl Default for ValidationContract {
    fn default() -> Self {
        Self {
            html: String::new(),
            viewport: Viewport::default(),
            archetype: None,
            user_request: String::new(),
            visual_change_threshold: 0.02,
            blank_page_threshold: 0.95,
            max_inputs_to_test: 10,
            stabilization_delay_ms: 300,
            max_cascade_depth: 2,
            min_responsive_ratio: 0.7,
            load_timeout_ms: 5000,
            settle_ms: 500,
            click_timeout_ms: 2000,
            interaction_budget_ms: 60_000,
        }
    }
}

impl ValidationContract {
    pub fn new(html: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            ..Default::default()
        }
    }

    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = viewport;
        self
    }

    pub fn with_archetype(mut self, archetype: Option<LayoutArchetype>) -> Self {
        self.archetype = archetype;
        self
    }

    pub fn with_user_request(mut self, request: impl Into<String>) -> Self {
        self.user_request = request.into();
        self
    }

    pub fn with_max_inputs(mut self, max: usize) -> Self {
        self.max_inputs_to_test = max;
        self
    }

    pub fn with_cascade_depth(mut self, depth: u32) -> Self {
        self.max_cascade_depth = depth;
        self
    }

    pub fn with_stabilization_delay_ms(mut self, ms: u64) -> Self {
        self.stabilization_delay_ms = ms;
        self
    }

    pub fn with_interaction_budget_ms(mut self, ms: u64) -> Self {
        self.interaction_budget_ms = ms;
        self
    }

    /// Same settings over a different document. Used for repair candidates.
    pub fn with_html(&self, html: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            ..self.clone()
        }
    }

    /// Declared archetype, otherwise an inferred one.
    pub fn effective_archetype(&self) -> Option<LayoutArchetype> {
        self.archetype
            .or_else(|| infer_archetype(&self.user_request, &self.html))
    }
}
