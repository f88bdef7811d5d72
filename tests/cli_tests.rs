use std::io::Write;
use std::path::Path;
use std::time::Duration;

use clap::Parser;
use screen_repair::cli::commands::repaired_path;
use screen_repair::cli::config::{
    build_chrome_options, build_contract, build_repair_settings, load_config, AppConfig,
    ChromeConfig, Cli, Commands,
};
use screen_repair::validation::contract::LayoutArchetype;

// ============================================================================
// CLI Argument Parsing Tests
// ============================================================================

#[test]
fn cli_parse_validate_minimal() {
    let cli = Cli::parse_from(["screen-repair", "validate", "--html", "page.html"]);
    match cli.command {
        Commands::Validate {
            html,
            archetype,
            format,
            output,
        } => {
            assert_eq!(html, "page.html");
            assert!(archetype.is_none());
            assert_eq!(format, "console");
            assert!(output.is_none());
        }
        _ => panic!("Expected Validate command"),
    }
}

#[test]
fn cli_parse_validate_all_args() {
    let cli = Cli::parse_from([
        "screen-repair",
        "validate",
        "--html",
        "quiz.html",
        "--archetype",
        "trivia",
        "--format",
        "json",
        "-o",
        "report.json",
    ]);
    match cli.command {
        Commands::Validate {
            html,
            archetype,
            format,
            output,
        } => {
            assert_eq!(html, "quiz.html");
            assert_eq!(archetype.as_deref(), Some("trivia"));
            assert_eq!(format, "json");
            assert_eq!(output.as_deref(), Some("report.json"));
        }
        _ => panic!("Expected Validate command"),
    }
}

#[test]
fn cli_parse_repair_minimal() {
    let cli = Cli::parse_from(["screen-repair", "repair", "--html", "page.html"]);
    match cli.command {
        Commands::Repair {
            html,
            request,
            out_html,
            no_llm,
            ..
        } => {
            assert_eq!(html, "page.html");
            assert_eq!(request, "");
            assert!(out_html.is_none());
            assert!(!no_llm);
        }
        _ => panic!("Expected Repair command"),
    }
}

#[test]
fn cli_parse_repair_all_args() {
    let cli = Cli::parse_from([
        "screen-repair",
        "repair",
        "--html",
        "game.html",
        "--request",
        "a memory card game",
        "--archetype",
        "game",
        "--out-html",
        "fixed.html",
        "--format",
        "json",
        "--output",
        "repair.json",
        "--no-llm",
    ]);
    match cli.command {
        Commands::Repair {
            html,
            request,
            archetype,
            out_html,
            format,
            output,
            no_llm,
        } => {
            assert_eq!(html, "game.html");
            assert_eq!(request, "a memory card game");
            assert_eq!(archetype.as_deref(), Some("game"));
            assert_eq!(out_html.as_deref(), Some("fixed.html"));
            assert_eq!(format, "json");
            assert_eq!(output.as_deref(), Some("repair.json"));
            assert!(no_llm);
        }
        _ => panic!("Expected Repair command"),
    }
}

#[test]
fn cli_parse_global_flags() {
    let cli = Cli::parse_from([
        "screen-repair",
        "-vv",
        "--ollama-endpoint",
        "http://gpu:11434/api/generate",
        "--ollama-model",
        "llava",
        "--trace",
        "run.jsonl",
        "repair",
        "--html",
        "a.html",
    ]);
    assert_eq!(cli.verbose, 2);
    assert_eq!(cli.ollama_endpoint, Some("http://gpu:11434/api/generate".to_string()));
    assert_eq!(cli.ollama_model, Some("llava".to_string()));
    assert_eq!(cli.trace, Some("run.jsonl".to_string()));
}

#[test]
fn cli_requires_html() {
    assert!(Cli::try_parse_from(["screen-repair", "validate"]).is_err());
}

// ============================================================================
// Config File Tests
// ============================================================================

#[test]
fn config_load_missing_file() {
    let config = load_config(Some("nonexistent_file_that_does_not_exist.yaml"));
    // Should return defaults without error
    assert_eq!(config.validation.viewport_width, 1024);
    assert_eq!(config.validation.viewport_height, 600);
    assert_eq!(config.repair.max_attempts, 3);
}

#[test]
fn config_default_values() {
    let config = AppConfig::default();
    assert_eq!(config.validation.visual_change_threshold, 0.02);
    assert_eq!(config.validation.blank_page_threshold, 0.95);
    assert_eq!(config.validation.max_inputs_to_test, 10);
    assert_eq!(config.validation.stabilization_delay_ms, 300);
    assert_eq!(config.validation.max_cascade_depth, 2);
    assert_eq!(config.validation.min_responsive_ratio, 0.7);
    assert!(config.validation.artifacts_dir.is_none());
    assert_eq!(config.repair.global_timeout_secs, 120);
    assert_eq!(config.repair.surgical_retries, 2);
    assert!(config.repair.include_screenshot);
    assert!(config.chrome.headless);
    assert!(config.ollama.endpoint.is_none());
    assert!(config.trace.path.is_none());
}

#[test]
fn config_yaml_roundtrip() {
    let config = AppConfig::default();
    let yaml = serde_yaml::to_string(&config).unwrap();
    let parsed: AppConfig = serde_yaml::from_str(&yaml).unwrap();
    assert_eq!(parsed.validation.viewport_width, config.validation.viewport_width);
    assert_eq!(parsed.repair.max_attempts, config.repair.max_attempts);
}

#[test]
fn config_partial_yaml() {
    let yaml = r#"
validation:
  viewport_width: 800
  artifacts_dir: "shots"
repair:
  max_attempts: 5
ollama:
  model: "llava"
"#;
    let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(config.validation.viewport_width, 800);
    // Other validation fields get defaults
    assert_eq!(config.validation.viewport_height, 600);
    assert_eq!(config.validation.artifacts_dir.as_deref(), Some("shots"));
    assert_eq!(config.repair.max_attempts, 5);
    assert_eq!(config.repair.surgical_retries, 2);
    // Ollama partially filled
    assert_eq!(config.ollama.model, Some("llava".to_string()));
    assert!(config.ollama.endpoint.is_none());
}

#[test]
fn config_loaded_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"repair:\n  global_timeout_secs: 30\nchrome:\n  headless: false\n")
        .unwrap();

    let config = load_config(file.path().to_str());
    assert_eq!(config.repair.global_timeout_secs, 30);
    assert!(!config.chrome.headless);
}

#[test]
fn config_malformed_file_falls_back_to_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"repair: [this is: not a map").unwrap();

    let config = load_config(file.path().to_str());
    assert_eq!(config.repair.max_attempts, 3);
}

// ============================================================================
// Builder / Helper Tests
// ============================================================================

#[test]
fn build_contract_wiring() {
    let mut validation = AppConfig::default().validation;
    validation.viewport_width = 800;
    validation.max_inputs_to_test = 4;
    let contract = build_contract("<p>".into(), "a quiz", Some("trivia"), &validation);

    assert_eq!(contract.html, "<p>");
    assert_eq!(contract.viewport.width, 800);
    assert_eq!(contract.archetype, Some(LayoutArchetype::Trivia));
    assert_eq!(contract.user_request, "a quiz");
    assert_eq!(contract.max_inputs_to_test, 4);
}

#[test]
fn build_contract_ignores_unknown_archetype() {
    let validation = AppConfig::default().validation;
    let contract = build_contract("<p>".into(), "a snake game", Some("carousel"), &validation);
    assert!(contract.archetype.is_none());
    assert_eq!(contract.effective_archetype(), Some(LayoutArchetype::Game));
}

#[test]
fn build_repair_settings_wiring() {
    let mut repair = AppConfig::default().repair;
    repair.max_attempts = 7;
    repair.global_timeout_secs = 15;
    let settings = build_repair_settings(&repair);
    assert_eq!(settings.max_attempts, 7);
    assert_eq!(settings.global_timeout, Duration::from_secs(15));
}

#[test]
fn build_chrome_options_prefers_config_path() {
    let config = ChromeConfig {
        path: Some("/opt/chromium/chrome".into()),
        headless: false,
        extra_args: vec!["--disable-gpu".into()],
    };
    let options = build_chrome_options(&config);
    assert_eq!(options.path.as_deref(), Some(Path::new("/opt/chromium/chrome")));
    assert!(!options.headless);
    assert_eq!(options.extra_args, vec!["--disable-gpu".to_string()]);
}

#[test]
fn repaired_path_keeps_directory() {
    assert_eq!(repaired_path(Path::new("out/quiz.html")), Path::new("out/quiz.repaired.html"));
    assert_eq!(repaired_path(Path::new("page")), Path::new("page.repaired.html"));
}
