use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use serde::Serialize;

use crate::browser::chrome::ChromeRenderer;
use crate::cli::config::{build_chrome_options, build_contract, build_repair_settings, AppConfig};
use crate::orchestrator::orchestrator::Orchestrator;
use crate::repair::surgical::{OllamaRepairBackend, SurgicalRepairClient};
use crate::report::console::{format_repair_report, format_validation_report};
use crate::trace::logger::TraceLogger;
use crate::validation::validator::Validator;

// ============================================================================
// validate subcommand
// ============================================================================

/// Validate one document and return whether it passed.
pub fn cmd_validate(
    html_path: &str,
    archetype: Option<&str>,
    format: &str,
    output: Option<&str>,
    config: &AppConfig,
) -> Result<bool, Box<dyn std::error::Error>> {
    let html = std::fs::read_to_string(html_path)?;
    let contract = build_contract(html, "", archetype, &config.validation);
    let renderer = ChromeRenderer::new(build_chrome_options(&config.chrome));

    info!("validating {} at {}x{}", html_path, contract.viewport.width, contract.viewport.height);
    let report = Validator::new(&renderer)
        .with_artifacts_dir(config.validation.artifacts_dir.as_ref().map(PathBuf::from))
        .validate(&contract)?;

    let content = match format {
        "json" => to_json(&report)?,
        _ => format_validation_report(&report),
    };
    write_output(output, &content)?;

    Ok(report.valid)
}

// ============================================================================
// repair subcommand
// ============================================================================

/// Run the repair loop, write the best candidate and return whether it is
/// valid.
pub fn cmd_repair(
    html_path: &str,
    request: &str,
    archetype: Option<&str>,
    out_html: Option<&str>,
    format: &str,
    output: Option<&str>,
    no_llm: bool,
    trace_path: Option<&str>,
    ollama_endpoint: Option<&str>,
    ollama_model: Option<&str>,
    config: &AppConfig,
) -> Result<bool, Box<dyn std::error::Error>> {
    let html = std::fs::read_to_string(html_path)?;
    let contract = build_contract(html, request, archetype, &config.validation);
    let renderer = ChromeRenderer::new(build_chrome_options(&config.chrome));

    let tracer = match trace_path.or(config.trace.path.as_deref()) {
        Some(path) => TraceLogger::new(path),
        None => TraceLogger::disabled(),
    };

    let surgical = if no_llm {
        None
    } else {
        Some(build_surgical_client(ollama_endpoint, ollama_model, config))
    };

    info!(
        "repairing {} (max {} surgical attempts, {}s budget)",
        html_path, config.repair.max_attempts, config.repair.global_timeout_secs
    );
    let report = Orchestrator::new(&renderer, &tracer)
        .with_surgical(surgical.as_ref())
        .with_settings(build_repair_settings(&config.repair))
        .with_artifacts_dir(config.validation.artifacts_dir.as_ref().map(PathBuf::from))
        .run(&contract)?;

    let html_out = out_html
        .map(PathBuf::from)
        .unwrap_or_else(|| repaired_path(Path::new(html_path)));
    std::fs::write(&html_out, &report.html)?;
    debug!("wrote '{}' to {}", report.best_label, html_out.display());

    let content = match format {
        "json" => to_json(&report)?,
        _ => format_repair_report(&report),
    };
    write_output(output, &content)?;

    Ok(report.valid)
}

// ============================================================================
// Helpers
// ============================================================================

/// Build the surgical client. Endpoint and model resolve CLI > config >
/// built-in defaults.
fn build_surgical_client(
    ollama_endpoint: Option<&str>,
    ollama_model: Option<&str>,
    config: &AppConfig,
) -> SurgicalRepairClient {
    let defaults = OllamaRepairBackend::default();
    let timeout = config
        .ollama
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(defaults.timeout);
    let backend = OllamaRepairBackend::new(
        ollama_endpoint.unwrap_or(&defaults.endpoint),
        ollama_model.unwrap_or(&defaults.model),
        timeout,
    );

    SurgicalRepairClient::new(Box::new(backend))
        .with_max_retries(config.repair.surgical_retries)
        .with_screenshot(config.repair.include_screenshot)
}

/// `page.html` becomes `page.repaired.html` next to the input.
pub fn repaired_path(html_path: &Path) -> PathBuf {
    let stem = html_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    html_path.with_file_name(format!("{}.repaired.html", stem))
}

fn to_json<T: Serialize>(value: &T) -> Result<String, Box<dyn std::error::Error>> {
    let mut json = serde_json::to_string_pretty(value)?;
    json.push('\n');
    Ok(json)
}

fn write_output(output: Option<&str>, content: &str) -> Result<(), Box<dyn std::error::Error>> {
    match output {
        Some(path) => std::fs::write(path, content)?,
        None => print!("{}", content),
    }
    Ok(())
}
