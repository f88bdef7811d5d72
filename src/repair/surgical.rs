use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::geometry::geometry_model::{Geometry, NodeDescriptor, Viewport};
use crate::repair::classify::ClassifiedError;
use crate::repair::patch::Patch;
use crate::repair::patch_validator::PatchValidator;
use crate::visual::capture::Screenshot;

pub const DEFAULT_MAX_RETRIES: u32 = 3;

const SYSTEM_INSTRUCTIONS: &str = r#"You repair interactive HTML layouts shown on a fixed-size display.
You receive a list of diagnosed defects with the current style state of the affected elements.
Respond with ONLY a JSON object of this exact shape:
{"analysis": "<one or two sentences>", "patches": [{"selector": "<css selector>", "add_classes": [], "remove_classes": [], "add_styles": {"<property>": "<value>"}, "remove_styles": []}]}
Rules:
- Only target the selectors listed in the defects, their blocking elements, or a shared class they carry.
- Never hide, remove or disable interactive elements. Never output markup.
- Keep the patch list small. Prefer add_styles for visual feedback (transform, filter, outline, background)."#;

/// One request to the external reasoning model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurgicalRequest {
    pub system_instructions: String,
    pub error_context: String,
    /// Base64 PNG of the current render
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optional_image: Option<String>,
}

/// The only response shape accepted from the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurgicalResponse {
    pub analysis: String,
    pub patches: Vec<Patch>,
}

/// Transport to the reasoning model. Returns the raw completion text.
pub trait RepairBackend {
    fn complete(&self, request: &SurgicalRequest) -> Result<String, PipelineError>;
}

// ============================================================================
// Ollama Backend
// ============================================================================

pub struct OllamaRepairBackend {
    pub endpoint: String,
    pub model: String,
    pub timeout: Duration,
}

impl Default for OllamaRepairBackend {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434/api/generate".to_string(),
            model: "qwen2.5vl:7b".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<&'a str>,
    stream: bool,
    format: &'static str,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

impl OllamaRepairBackend {
    pub fn new(endpoint: &str, model: &str, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            timeout,
        }
    }
}

impl RepairBackend for OllamaRepairBackend {
    fn complete(&self, request: &SurgicalRequest) -> Result<String, PipelineError> {
        let body = OllamaRequest {
            model: &self.model,
            system: &request.system_instructions,
            prompt: &request.error_context,
            images: request.optional_image.as_deref().into_iter().collect(),
            stream: false,
            format: "json",
        };

        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| PipelineError::ModelRequest(e.to_string()))?;
        let response = client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .map_err(|e| PipelineError::ModelRequest(e.to_string()))?
            .error_for_status()
            .map_err(|e| PipelineError::ModelRequest(e.to_string()))?;

        let parsed: OllamaResponse = response
            .json()
            .map_err(|e| PipelineError::ModelRequest(format!("unreadable response body: {}", e)))?;
        Ok(parsed.response)
    }
}

// ============================================================================
// Scripted Backend (for testing without a model)
// ============================================================================

/// Replays canned completions in order and records every request.
#[derive(Default)]
pub struct ScriptedBackend {
    responses: RefCell<VecDeque<Result<String, String>>>,
    requests: RefCell<Vec<SurgicalRequest>>,
}

impl ScriptedBackend {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: RefCell::new(responses.into_iter().map(|r| Ok(r.into())).collect()),
            requests: RefCell::new(Vec::new()),
        }
    }

    /// Queue a transport failure.
    pub fn push_failure(&self, message: &str) {
        self.responses.borrow_mut().push_back(Err(message.to_string()));
    }

    pub fn push_response(&self, response: &str) {
        self.responses.borrow_mut().push_back(Ok(response.to_string()));
    }

    pub fn requests(&self) -> Vec<SurgicalRequest> {
        self.requests.borrow().clone()
    }
}

impl RepairBackend for ScriptedBackend {
    fn complete(&self, request: &SurgicalRequest) -> Result<String, PipelineError> {
        self.requests.borrow_mut().push(request.clone());
        match self.responses.borrow_mut().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(PipelineError::ModelRequest(message)),
            None => Err(PipelineError::ModelRequest("no scripted response left".to_string())),
        }
    }
}

/// Lets a caller keep a handle on a backend it also hands to the client.
impl<T: RepairBackend + ?Sized> RepairBackend for Rc<T> {
    fn complete(&self, request: &SurgicalRequest) -> Result<String, PipelineError> {
        (**self).complete(request)
    }
}

// ============================================================================
// Surgical client
// ============================================================================

/// What the caller knows about the current candidate.
pub struct SurgicalInput<'a> {
    pub errors: &'a [ClassifiedError],
    pub geometry: &'a Geometry,
    pub viewport: Viewport,
    pub user_request: &'a str,
    pub screenshot: Option<&'a Screenshot>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SurgicalOutcome {
    /// Validated patches; empty when every attempt failed
    pub patches: Vec<Patch>,
    pub analysis: Option<String>,
    pub attempts: u32,
    pub failures: Vec<String>,
}

impl SurgicalOutcome {
    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }
}

pub struct SurgicalRepairClient {
    backend: Box<dyn RepairBackend>,
    pub max_retries: u32,
    pub include_screenshot: bool,
}

impl SurgicalRepairClient {
    pub fn new(backend: Box<dyn RepairBackend>) -> Self {
        Self {
            backend,
            max_retries: DEFAULT_MAX_RETRIES,
            include_screenshot: true,
        }
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries.max(1);
        self
    }

    pub fn with_screenshot(mut self, include: bool) -> Self {
        self.include_screenshot = include;
        self
    }

    /// Ask the model for patches. Malformed output, transport errors and
    /// unsafe patch sets are retried with a corrective note; exhausting the
    /// retries yields an empty outcome rather than an error.
    pub fn repair(&self, input: &SurgicalInput) -> SurgicalOutcome {
        let mut outcome = SurgicalOutcome::default();
        if input.errors.is_empty() {
            return outcome;
        }

        let image = if self.include_screenshot {
            input.screenshot.and_then(|s| match s.to_base64_png() {
                Ok(encoded) => Some(encoded),
                Err(e) => {
                    warn!("screenshot not attached: {}", e);
                    None
                }
            })
        } else {
            None
        };

        let base_context = build_error_context(input);
        let validator = PatchValidator::new(input.geometry, input.errors);
        let mut corrections: Vec<String> = Vec::new();

        for attempt in 1..=self.max_retries {
            outcome.attempts = attempt;
            let mut context = base_context.clone();
            for correction in &corrections {
                context.push_str("\n\nCORRECTION: ");
                context.push_str(correction);
            }
            let request = SurgicalRequest {
                system_instructions: SYSTEM_INSTRUCTIONS.to_string(),
                error_context: context,
                optional_image: image.clone(),
            };

            let raw = match self.backend.complete(&request) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("surgical attempt {} failed: {}", attempt, e);
                    outcome.failures.push(e.to_string());
                    corrections.push("The previous request failed. Reply with the JSON object only.".to_string());
                    continue;
                }
            };

            let response = match parse_response(&raw) {
                Ok(r) => r,
                Err(reason) => {
                    debug!("surgical attempt {} unparseable: {}", attempt, reason);
                    outcome.failures.push(format!("parse: {}", reason));
                    corrections.push(format!(
                        "Your last reply was not valid ({}). Output only {{\"analysis\": string, \"patches\": [...]}}.",
                        reason
                    ));
                    continue;
                }
            };

            if let Err(rejection) = validator.validate(&response.patches) {
                debug!("surgical attempt {} rejected: {}", attempt, rejection);
                outcome.failures.push(format!("rejected: {}", rejection));
                corrections.push(format!(
                    "Your last patch set was rejected: {}. Only touch the listed selectors and never hide interactive elements.",
                    rejection
                ));
                continue;
            }

            outcome.analysis = Some(response.analysis);
            outcome.patches = response.patches;
            return outcome;
        }

        warn!(
            "surgical repair produced no usable patches after {} attempt(s)",
            outcome.attempts
        );
        outcome
    }
}

/// Strip code fences and surrounding prose, then parse the strict shape.
pub fn parse_response(raw: &str) -> Result<SurgicalResponse, String> {
    let trimmed = raw.trim();
    let start = trimmed.find('{').ok_or_else(|| "no JSON object found".to_string())?;
    let end = trimmed.rfind('}').ok_or_else(|| "no JSON object found".to_string())?;
    if end < start {
        return Err("no JSON object found".to_string());
    }
    serde_json::from_str::<SurgicalResponse>(&trimmed[start..=end]).map_err(|e| e.to_string())
}

fn describe_node(label: &str, node: &NodeDescriptor) -> String {
    let classes: Vec<&str> = node.classes.iter().map(String::as_str).collect();
    format!(
        "  {}: <{}> selector={} classes=[{}] box=({:.0},{:.0},{:.0}x{:.0}) z-index={} pointer-events={:?} opacity={} display={} visibility={} position={} transform={} transform-style={} backface-visibility={}",
        label,
        node.tag,
        node.selector,
        classes.join(" "),
        node.bbox.x,
        node.bbox.y,
        node.bbox.w,
        node.bbox.h,
        node.z_index.effective(),
        node.pointer_events,
        node.style.opacity,
        node.style.display,
        node.style.visibility,
        node.style.position,
        node.style.transform,
        node.style.transform_style,
        node.style.backface_visibility
    )
}

/// Minimal context: the defects and the style state of the elements they
/// name. The full document is never sent.
pub fn build_error_context(input: &SurgicalInput) -> String {
    let mut lines = vec![
        format!("USER INTENT: {}", input.user_request),
        format!("VIEWPORT: {}x{}", input.viewport.width, input.viewport.height),
        "DEFECTS:".to_string(),
    ];
    for (i, error) in input.errors.iter().enumerate() {
        lines.push(format!(
            "{}. {} on {} (confidence {:.2}): {}",
            i + 1,
            error.kind.as_str(),
            error.selector,
            error.confidence,
            error.detail
        ));
        if let Some(node) = input.geometry.find_by_selector(&error.selector) {
            lines.push(describe_node("element", node));
            if let Some(text) = &node.text {
                lines.push(format!("  text: {:?}", text));
            }
        }
        if let Some(blocker) = &error.blocking_selector {
            match input.geometry.find_by_selector(blocker) {
                Some(node) => lines.push(describe_node("blocked by", node)),
                None => lines.push(format!("  blocked by: {}", blocker)),
            }
        }
    }
    lines.join("\n")
}
