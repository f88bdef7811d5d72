use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::browser::chrome::ChromeOptions;
use crate::geometry::geometry_model::Viewport;
use crate::orchestrator::orchestrator::RepairSettings;
use crate::validation::contract::{LayoutArchetype, ValidationContract};

// ============================================================================
// CLI Argument Parsing (clap derive)
// ============================================================================

#[derive(Parser, Debug)]
#[command(
    name = "screen-repair",
    version,
    about = "Visual validation and repair for generated HTML layouts"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Ollama API endpoint
    #[arg(long, global = true)]
    pub ollama_endpoint: Option<String>,

    /// Ollama model name
    #[arg(long, global = true)]
    pub ollama_model: Option<String>,

    /// Path to config file (default: screen-repair.yaml in current dir)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Append orchestrator trace events to this JSONL file
    #[arg(long, global = true)]
    pub trace: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate an HTML document without repairing it
    Validate {
        /// Path to the HTML document
        #[arg(long)]
        html: String,

        /// Layout archetype: static, trivia, game, dashboard
        #[arg(long)]
        archetype: Option<String>,

        /// Output format: console, json
        #[arg(long, default_value = "console")]
        format: String,

        /// Output file path (default: stdout)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Validate and repair an HTML document
    Repair {
        /// Path to the HTML document
        #[arg(long)]
        html: String,

        /// The user request the document was generated from
        #[arg(long, default_value = "")]
        request: String,

        /// Layout archetype: static, trivia, game, dashboard
        #[arg(long)]
        archetype: Option<String>,

        /// Where to write the best HTML candidate (default: <html>.repaired.html)
        #[arg(long)]
        out_html: Option<String>,

        /// Output format: console, json
        #[arg(long, default_value = "console")]
        format: String,

        /// Report output file path (default: stdout)
        #[arg(short, long)]
        output: Option<String>,

        /// Skip the surgical model; deterministic rules only
        #[arg(long, default_value_t = false)]
        no_llm: bool,
    },
}

// ============================================================================
// Config File Model (optional YAML)
// ============================================================================

/// Optional YAML config file: `screen-repair.yaml`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub repair: RepairConfig,
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub chrome: ChromeConfig,
    #[serde(default)]
    pub trace: TraceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,
    #[serde(default = "default_viewport_height")]
    pub viewport_height: u32,
    #[serde(default = "default_visual_change_threshold")]
    pub visual_change_threshold: f64,
    #[serde(default = "default_blank_page_threshold")]
    pub blank_page_threshold: f64,
    #[serde(default = "default_max_inputs")]
    pub max_inputs_to_test: usize,
    #[serde(default = "default_stabilization_delay_ms")]
    pub stabilization_delay_ms: u64,
    #[serde(default = "default_cascade_depth")]
    pub max_cascade_depth: u32,
    #[serde(default = "default_min_responsive_ratio")]
    pub min_responsive_ratio: f64,
    #[serde(default = "default_load_timeout_ms")]
    pub load_timeout_ms: u64,
    #[serde(default = "default_interaction_budget_ms")]
    pub interaction_budget_ms: u64,
    /// Directory for before/after interaction screenshots
    pub artifacts_dir: Option<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            viewport_width: default_viewport_width(),
            viewport_height: default_viewport_height(),
            visual_change_threshold: default_visual_change_threshold(),
            blank_page_threshold: default_blank_page_threshold(),
            max_inputs_to_test: default_max_inputs(),
            stabilization_delay_ms: default_stabilization_delay_ms(),
            max_cascade_depth: default_cascade_depth(),
            min_responsive_ratio: default_min_responsive_ratio(),
            load_timeout_ms: default_load_timeout_ms(),
            interaction_budget_ms: default_interaction_budget_ms(),
            artifacts_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_global_timeout_secs")]
    pub global_timeout_secs: u64,
    #[serde(default = "default_surgical_retries")]
    pub surgical_retries: u32,
    #[serde(default = "default_true")]
    pub include_screenshot: bool,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            global_timeout_secs: default_global_timeout_secs(),
            surgical_retries: default_surgical_retries(),
            include_screenshot: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OllamaConfig {
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChromeConfig {
    pub path: Option<String>,
    #[serde(default = "default_true")]
    pub headless: bool,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl Default for ChromeConfig {
    fn default() -> Self {
        Self {
            path: None,
            headless: true,
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TraceConfig {
    pub path: Option<String>,
}

// Serde default helpers
fn default_viewport_width() -> u32 { Viewport::default().width }
fn default_viewport_height() -> u32 { Viewport::default().height }
fn default_visual_change_threshold() -> f64 { 0.02 }
fn default_blank_page_threshold() -> f64 { 0.95 }
fn default_max_inputs() -> usize { 10 }
fn default_stabilization_delay_ms() -> u64 { 300 }
fn default_cascade_depth() -> u32 { 2 }
fn default_min_responsive_ratio() -> f64 { 0.7 }
fn default_load_timeout_ms() -> u64 { 5000 }
fn default_interaction_budget_ms() -> u64 { 60_000 }
fn default_max_attempts() -> u32 { 3 }
fn default_global_timeout_secs() -> u64 { 120 }
fn default_surgical_retries() -> u32 { 2 }
fn default_true() -> bool { true }

// ============================================================================
// Config File Loading
// ============================================================================

/// Load config from a YAML file. Returns defaults if file is missing or malformed.
pub fn load_config(path: Option<&str>) -> AppConfig {
    let config_path = path.unwrap_or("screen-repair.yaml");
    match std::fs::read_to_string(config_path) {
        Ok(content) => match serde_yaml::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("ignoring malformed config '{}': {}", config_path, e);
                AppConfig::default()
            }
        },
        Err(_) => AppConfig::default(),
    }
}

// ============================================================================
// Config Builders (merge CLI args with config file)
// ============================================================================

/// Build a ValidationContract from the document, CLI values and config.
///
/// An unrecognised archetype name is treated as undeclared.
pub fn build_contract(
    html: String,
    request: &str,
    archetype: Option<&str>,
    config: &ValidationConfig,
) -> ValidationContract {
    let archetype = archetype.and_then(|name| match name.parse::<LayoutArchetype>() {
        Ok(a) => Some(a),
        Err(e) => {
            log::warn!("{}; falling back to inference", e);
            None
        }
    });

    ValidationContract {
        html,
        viewport: Viewport::new(config.viewport_width, config.viewport_height),
        archetype,
        user_request: request.to_string(),
        visual_change_threshold: config.visual_change_threshold,
        blank_page_threshold: config.blank_page_threshold,
        max_inputs_to_test: config.max_inputs_to_test,
        stabilization_delay_ms: config.stabilization_delay_ms,
        max_cascade_depth: config.max_cascade_depth,
        min_responsive_ratio: config.min_responsive_ratio,
        load_timeout_ms: config.load_timeout_ms,
        interaction_budget_ms: config.interaction_budget_ms,
        ..Default::default()
    }
}

pub fn build_repair_settings(config: &RepairConfig) -> RepairSettings {
    RepairSettings {
        max_attempts: config.max_attempts,
        global_timeout: Duration::from_secs(config.global_timeout_secs),
    }
}

/// Chrome options from config. `CHROME_BIN` still applies when no path is set.
pub fn build_chrome_options(config: &ChromeConfig) -> ChromeOptions {
    let defaults = ChromeOptions::default();
    ChromeOptions {
        path: config.path.as_ref().map(PathBuf::from).or(defaults.path),
        headless: config.headless,
        extra_args: config.extra_args.clone(),
        ..defaults
    }
}
