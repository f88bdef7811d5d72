use std::ffi::OsStr;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, LaunchOptionsBuilder, Tab};
use log::{debug, warn};
use serde_json::Value;
use tempfile::NamedTempFile;

use crate::browser::sandbox::{
    inject_error_hook, ClickOutcome, DocumentState, HitTarget, LivePage, Renderer,
};
use crate::browser::scripts::{geometry_script, hit_test_script, DOCUMENT_STATE, READY_STATE};
use crate::error::PipelineError;
use crate::geometry::extractor::{parse_geometry, GeometryScope};
use crate::geometry::geometry_model::{Geometry, Viewport};
use crate::validation::contract::ValidationContract;
use crate::visual::capture::Screenshot;

const READY_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Launch settings for the headless Chromium behind each page.
#[derive(Debug, Clone)]
pub struct ChromeOptions {
    pub path: Option<PathBuf>,
    pub headless: bool,
    pub extra_args: Vec<String>,
    pub idle_timeout: Duration,
}

impl Default for ChromeOptions {
    fn default() -> Self {
        Self {
            path: std::env::var("CHROME_BIN").ok().map(PathBuf::from),
            headless: true,
            extra_args: Vec::new(),
            idle_timeout: Duration::from_secs(180),
        }
    }
}

/// Renders every document into its own Chromium process.
pub struct ChromeRenderer {
    options: ChromeOptions,
}

impl ChromeRenderer {
    pub fn new(options: ChromeOptions) -> Self {
        Self { options }
    }
}

impl Renderer for ChromeRenderer {
    fn render(
        &self,
        html: &str,
        contract: &ValidationContract,
    ) -> Result<Box<dyn LivePage>, PipelineError> {
        let page = ChromePage::open(&self.options, html, contract)?;
        Ok(Box::new(page))
    }
}

/// A live page backed by a dedicated headless Chromium.
///
/// The document is written to a temp file and loaded through a `file://` URL.
/// Field order matters: the tab is released before the browser, and the temp
/// file outlives both.
pub struct ChromePage {
    tab: Arc<Tab>,
    browser: Browser,
    url: String,
    viewport: Viewport,
    load_timeout: Duration,
    settle: Duration,
    _document: NamedTempFile,
}

impl ChromePage {
    pub fn open(
        options: &ChromeOptions,
        html: &str,
        contract: &ValidationContract,
    ) -> Result<Self, PipelineError> {
        let mut document = tempfile::Builder::new()
            .prefix("screen-repair-")
            .suffix(".html")
            .tempfile()
            .map_err(|e| PipelineError::io("creating document temp file", e))?;
        document
            .write_all(inject_error_hook(html).as_bytes())
            .map_err(|e| PipelineError::io("writing document temp file", e))?;
        document
            .flush()
            .map_err(|e| PipelineError::io("flushing document temp file", e))?;

        let url = url::Url::from_file_path(document.path())
            .map_err(|_| PipelineError::BrowserLaunch(format!(
                "temp file path is not absolute: {}",
                document.path().display()
            )))?
            .to_string();

        let viewport = contract.viewport;
        let mut args: Vec<&OsStr> = vec![
            OsStr::new("--force-device-scale-factor=1"),
            OsStr::new("--hide-scrollbars"),
            OsStr::new("--disable-gpu"),
            OsStr::new("--disable-dev-shm-usage"),
            OsStr::new("--allow-file-access-from-files"),
            OsStr::new("--disable-extensions"),
            OsStr::new("--disable-background-networking"),
        ];
        args.extend(options.extra_args.iter().map(|a| OsStr::new(a.as_str())));

        let launch_options = LaunchOptionsBuilder::default()
            .headless(options.headless)
            .sandbox(false)
            .path(options.path.clone())
            .window_size(Some((viewport.width, viewport.height)))
            .idle_browser_timeout(options.idle_timeout)
            .args(args)
            .build()
            .map_err(|e| PipelineError::BrowserLaunch(e.to_string()))?;

        let browser =
            Browser::new(launch_options).map_err(|e| PipelineError::BrowserLaunch(e.to_string()))?;
        let tab = browser
            .new_tab()
            .map_err(|e| PipelineError::BrowserLaunch(e.to_string()))?;

        let page = ChromePage {
            tab,
            browser,
            url,
            viewport,
            load_timeout: Duration::from_millis(contract.load_timeout_ms),
            settle: Duration::from_millis(contract.settle_ms),
            _document: document,
        };
        page.load()?;
        Ok(page)
    }

    /// Navigate to the document and wait for a loaded state plus the settle
    /// window.
    fn load(&self) -> Result<(), PipelineError> {
        let timeout_ms = self.load_timeout.as_millis() as u64;
        self.tab.set_default_timeout(self.load_timeout);
        self.tab
            .navigate_to(&self.url)
            .map_err(|e| PipelineError::browser("navigate", e))?;
        self.tab
            .wait_until_navigated()
            .map_err(|_| PipelineError::LoadTimeout { timeout_ms })?;

        let started = Instant::now();
        loop {
            let state = self
                .tab
                .evaluate(READY_STATE, false)
                .map_err(|e| PipelineError::browser("readyState", e))?;
            if state.value.as_ref().and_then(Value::as_str) == Some("complete") {
                break;
            }
            if started.elapsed() >= self.load_timeout {
                return Err(PipelineError::LoadTimeout { timeout_ms });
            }
            thread::sleep(READY_POLL_INTERVAL);
        }

        thread::sleep(self.settle);
        debug!("loaded {} in {}ms", self.url, started.elapsed().as_millis());
        Ok(())
    }

    /// Evaluate a script that returns a JSON string and parse it.
    fn eval_json(&self, script: &str, operation: &str) -> Result<Value, PipelineError> {
        let remote = self
            .tab
            .evaluate(script, false)
            .map_err(|e| PipelineError::browser(operation, e))?;
        let text = remote
            .value
            .as_ref()
            .and_then(Value::as_str)
            .ok_or_else(|| PipelineError::browser(operation, "script returned no JSON string"))?;
        serde_json::from_str(text).map_err(|e| PipelineError::JsonParse {
            context: operation.to_string(),
            source: e,
        })
    }

    /// Whether the underlying browser process still answers.
    pub fn is_alive(&self) -> bool {
        self.browser.get_version().is_ok()
    }
}

impl LivePage for ChromePage {
    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn document_state(&mut self) -> Result<DocumentState, PipelineError> {
        let value = self.eval_json(DOCUMENT_STATE, "document_state")?;
        serde_json::from_value(value).map_err(|e| PipelineError::JsonParse {
            context: "document_state".into(),
            source: e,
        })
    }

    fn geometry(&mut self, scope: GeometryScope) -> Result<Geometry, PipelineError> {
        let remote = self
            .tab
            .evaluate(&geometry_script(scope.universe()), false)
            .map_err(|e| PipelineError::browser("geometry", e))?;
        let text = remote
            .value
            .as_ref()
            .and_then(Value::as_str)
            .ok_or_else(|| PipelineError::browser("geometry", "script returned no JSON string"))?;
        parse_geometry(text)
    }

    fn screenshot(&mut self) -> Result<Screenshot, PipelineError> {
        let png = self
            .tab
            .capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
            .map_err(|e| PipelineError::browser("screenshot", e))?;
        Screenshot::from_png(&png)
    }

    fn hit_test(&mut self, x: f64, y: f64) -> Result<Option<HitTarget>, PipelineError> {
        let value = self.eval_json(&hit_test_script(x, y), "hit_test")?;
        if value.is_null() {
            return Ok(None);
        }
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| PipelineError::JsonParse {
                context: "hit_test".into(),
                source: e,
            })
    }

    fn click(&mut self, selector: &str, timeout: Duration) -> Result<ClickOutcome, PipelineError> {
        self.tab.set_default_timeout(timeout);
        let outcome = match self.tab.find_element(selector) {
            Ok(element) => match element.click() {
                Ok(_) => ClickOutcome::Dispatched,
                Err(e) => ClickOutcome::Failed(e.to_string()),
            },
            Err(e) => {
                debug!("click target '{}' not found: {}", selector, e);
                ClickOutcome::NotFound
            }
        };
        self.tab.set_default_timeout(self.load_timeout);
        Ok(outcome)
    }

    fn settle(&mut self, delay: Duration) {
        thread::sleep(delay);
    }

    fn reset(&mut self) -> Result<(), PipelineError> {
        if let Err(e) = self.load() {
            warn!("page reset failed: {}", e);
            return Err(e);
        }
        Ok(())
    }
}
