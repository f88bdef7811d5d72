use std::fmt;

#[derive(Debug)]
pub enum PipelineError {
    /// Chromium could not be launched or a tab could not be opened
    BrowserLaunch(String),

    /// A CDP call against a live page failed
    Browser { operation: String, message: String },

    /// The page never reached a loaded state
    LoadTimeout { timeout_ms: u64 },

    /// Temp file or artifact I/O failed
    Io { context: String, source: std::io::Error },

    /// JSON parsing failed (page script output or model response)
    JsonParse { context: String, source: serde_json::Error },

    /// JSON serialization failed
    JsonSerialize { context: String, source: serde_json::Error },

    /// Screenshot bytes could not be decoded or encoded
    Image(String),

    /// The surgical repair endpoint failed
    ModelRequest(String),

    /// A selector could not be parsed
    Selector { selector: String, reason: String },

    /// The orchestrator has no scored history entry to return
    NoScoredCandidate(String),
}

impl PipelineError {
    pub fn browser(operation: &str, err: impl fmt::Display) -> Self {
        PipelineError::Browser {
            operation: operation.to_string(),
            message: err.to_string(),
        }
    }

    pub fn io(context: impl ToString, source: std::io::Error) -> Self {
        PipelineError::Io {
            context: context.to_string(),
            source,
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::BrowserLaunch(msg) => {
                write!(f, "Failed to launch Chromium (is it installed? set CHROME_BIN): {}", msg)
            }
            PipelineError::Browser { operation, message } => {
                write!(f, "Browser operation '{}' failed: {}", operation, message)
            }
            PipelineError::LoadTimeout { timeout_ms } => {
                write!(f, "Page did not finish loading within {}ms", timeout_ms)
            }
            PipelineError::Io { context, source } => {
                write!(f, "I/O error ({}): {}", context, source)
            }
            PipelineError::JsonParse { context, source } => {
                write!(f, "JSON parse error ({}): {}", context, source)
            }
            PipelineError::JsonSerialize { context, source } => {
                write!(f, "JSON serialize error ({}): {}", context, source)
            }
            PipelineError::Image(msg) => {
                write!(f, "Image error: {}", msg)
            }
            PipelineError::ModelRequest(msg) => {
                write!(f, "Repair model request failed: {}", msg)
            }
            PipelineError::Selector { selector, reason } => {
                write!(f, "Invalid selector '{}': {}", selector, reason)
            }
            PipelineError::NoScoredCandidate(msg) => {
                write!(f, "No scored candidate available: {}", msg)
            }
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Io { source, .. } => Some(source),
            PipelineError::JsonParse { source, .. } => Some(source),
            PipelineError::JsonSerialize { source, .. } => Some(source),
            _ => None,
        }
    }
}
