use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::browser::sandbox::{end_of_open_tag, start_of_close_tag};

// ============================================================================
// Patch model and application
// ============================================================================

/// Additive/substitutive change to the elements matching one selector.
/// Never removes or restructures elements.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Patch {
    pub selector: String,
    #[serde(default)]
    pub add_classes: Vec<String>,
    #[serde(default)]
    pub remove_classes: Vec<String>,
    #[serde(default)]
    pub add_styles: BTreeMap<String, String>,
    #[serde(default)]
    pub remove_styles: Vec<String>,
}

impl Patch {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            ..Default::default()
        }
    }

    pub fn add_class(mut self, class: &str) -> Self {
        if !self.add_classes.iter().any(|c| c == class) {
            self.add_classes.push(class.to_string());
        }
        self
    }

    pub fn remove_class(mut self, class: &str) -> Self {
        if !self.remove_classes.iter().any(|c| c == class) {
            self.remove_classes.push(class.to_string());
        }
        self
    }

    pub fn add_style(mut self, property: &str, value: impl Into<String>) -> Self {
        self.add_styles.insert(property.to_string(), value.into());
        self
    }

    pub fn remove_style(mut self, property: &str) -> Self {
        if !self.remove_styles.iter().any(|p| p == property) {
            self.remove_styles.push(property.to_string());
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.add_classes.is_empty()
            && self.remove_classes.is_empty()
            && self.add_styles.is_empty()
            && self.remove_styles.is_empty()
    }
}

pub const FORCE_VISIBLE: &str = "lr-force-visible";
pub const FORCE_DISPLAY: &str = "lr-force-display";
pub const PASS_THROUGH: &str = "lr-pass-through";
pub const POINTER_AUTO: &str = "lr-pointer-auto";
pub const PRESERVE_3D: &str = "lr-preserve-3d";
pub const BACKFACE_HIDDEN: &str = "lr-backface-hidden";
pub const BACKFACE_VISIBLE: &str = "lr-backface-visible";
pub const FEEDBACK: &str = "lr-feedback";

/// Utility classes commonly used to hide content.
pub const HIDING_CLASSES: &[&str] = &[
    "hidden",
    "invisible",
    "opacity-0",
    "d-none",
    "sr-only",
    "is-hidden",
    "visually-hidden",
    "collapse",
];

const BASE_MARKER: &str = r#"data-lr-repair="base""#;

/// Repair utility classes, injected once per document.
const REPAIR_STYLESHEET: &str = r#"
.lr-force-visible { opacity: 1 !important; visibility: visible !important; }
.lr-force-display { display: revert !important; }
.lr-pass-through { pointer-events: none !important; }
.lr-pointer-auto { pointer-events: auto !important; }
.lr-preserve-3d { transform-style: preserve-3d !important; perspective: 1000px; }
.lr-backface-hidden { backface-visibility: hidden !important; -webkit-backface-visibility: hidden !important; }
.lr-backface-visible { backface-visibility: visible !important; -webkit-backface-visibility: visible !important; }
.lr-feedback { transition: transform 120ms ease-out, filter 120ms ease-out, outline-color 120ms ease-out !important; cursor: pointer; }
.lr-feedback:active, .lr-feedback:focus-visible, .lr-feedback.lr-pressed {
  transform: scale(0.94) !important;
  filter: brightness(1.25) !important;
  outline: 4px solid #ffd400 !important;
  outline-offset: 2px;
}
"#;

/// Holds `lr-pressed` briefly after a click so feedback outlives the press.
const FEEDBACK_SCRIPT: &str = r#"
document.addEventListener('click', function (e) {
  var el = e.target && e.target.closest ? e.target.closest('.lr-feedback') : null;
  if (!el) return;
  el.classList.add('lr-pressed');
  setTimeout(function () { el.classList.remove('lr-pressed'); }, 1200);
}, true);
"#;

/// Per-attempt class/inline-style edits, re-applied as the DOM changes.
const APPLY_SCRIPT: &str = r#"
(function (patches) {
  function apply() {
    patches.forEach(function (p) {
      var nodes;
      try { nodes = document.querySelectorAll(p.selector); } catch (e) { return; }
      for (var i = 0; i < nodes.length; i++) {
        var el = nodes[i];
        (p.remove_classes || []).forEach(function (c) { el.classList.remove(c); });
        (p.add_classes || []).forEach(function (c) { el.classList.add(c); });
        (p.remove_styles || []).forEach(function (s) { el.style.removeProperty(s); });
      }
    });
  }
  if (document.readyState === 'loading') document.addEventListener('DOMContentLoaded', apply);
  else apply();
  window.addEventListener('load', apply);
  var pending = false;
  new MutationObserver(function () {
    if (pending) return;
    pending = true;
    setTimeout(function () { pending = false; apply(); }, 0);
  }).observe(document.documentElement, { childList: true, subtree: true });
})(__PATCHES__);
"#;

fn style_rules(patches: &[Patch]) -> String {
    patches
        .iter()
        .filter(|p| !p.add_styles.is_empty())
        .map(|p| {
            let body: Vec<String> = p
                .add_styles
                .iter()
                .map(|(prop, value)| format!("{}: {} !important;", prop, value.trim_end_matches(';')))
                .collect();
            format!("{} {{ {} }}", p.selector, body.join(" "))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Patch payload as a JS literal that is safe inside a `<script>` element.
fn script_payload(patches: &[Patch]) -> String {
    serde_json::to_string(patches)
        .unwrap_or_else(|_| "[]".to_string())
        .replace("</", "<\\/")
}

/// Apply one attempt's patches to a document. Each call adds its own
/// `<style>`/`<script>` pair labelled with `label`; the utility stylesheet
/// goes in once.
pub fn apply_patches(html: &str, patches: &[Patch], label: &str) -> String {
    if patches.is_empty() {
        return html.to_string();
    }

    let mut block = String::new();
    if !html.contains(BASE_MARKER) {
        block.push_str(&format!(
            "<style {}>{}</style><script {}>{}</script>",
            BASE_MARKER, REPAIR_STYLESHEET, BASE_MARKER, FEEDBACK_SCRIPT
        ));
    }
    let label = label.replace('"', "'");
    let rules = style_rules(patches);
    if !rules.is_empty() {
        block.push_str(&format!(
            "<style data-lr-repair=\"{}\">\n{}\n</style>",
            label, rules
        ));
    }
    block.push_str(&format!(
        "<script data-lr-repair=\"{}\">{}</script>",
        label,
        APPLY_SCRIPT.replace("__PATCHES__", &script_payload(patches))
    ));

    if let Some(at) = start_of_close_tag(html, "head") {
        return format!("{}{}{}", &html[..at], block, &html[at..]);
    }
    if let Some(at) = end_of_open_tag(html, "body") {
        return format!("{}{}{}", &html[..at], block, &html[at..]);
    }
    format!("{}{}", block, html)
}
