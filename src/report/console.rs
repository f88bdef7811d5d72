use crate::orchestrator::orchestrator::RepairReport;
use crate::validation::report::{PhaseResult, ValidationReport};

// ============================================================================
// Console reporter: formatted terminal output
// ============================================================================

const PASS: &str = "\u{2713} PASS";
const FAIL: &str = "\u{2717} FAIL";

/// Format a validation report for terminal output.
///
/// Produces output like:
/// ```text
/// === Validation: game ===
///
/// ✓ PASS  render: document loaded (3 warnings)
/// ✗ FAIL  interaction: 1/4 inputs responsive
///     [intercepted] #start (blocked by .overlay)
///
/// === Result: INVALID (confidence 0.62) ===
/// ```
pub fn format_validation_report(report: &ValidationReport) -> String {
    let mut out = String::new();

    let archetype = report.archetype.map(|a| a.as_str()).unwrap_or("unclassified");
    out.push_str(&format!("=== Validation: {} ===\n\n", archetype));

    for phase in &report.phases {
        push_phase(&mut out, phase);
    }

    if !report.interactions.is_empty() {
        out.push_str(&format!(
            "\nInteractions ({} tested, {} responsive):\n",
            report.tested_count, report.responsive_count
        ));
        for result in &report.interactions {
            let indent = "  ".repeat(result.cascade_depth as usize + 1);
            out.push_str(&format!("{}[{}] {}", indent, result.kind.as_str(), result.selector));
            if let Some(ref blocker) = result.blocking_selector {
                out.push_str(&format!(" (blocked by {})", blocker));
            }
            if let Some(ref note) = result.note {
                out.push_str(&format!(" - {}", note));
            }
            out.push('\n');
        }
    }

    if let Some(ref summary) = report.failure_summary {
        out.push_str(&format!("\n{}\n", summary));
    }

    out.push_str(&format!(
        "\n=== Result: {} (confidence {:.2}) ===\n",
        if report.valid { "VALID" } else { "INVALID" },
        report.confidence
    ));

    out
}

/// Format a repair run for terminal output: the phases of the returned
/// candidate, the attempt history and whatever is still broken.
pub fn format_repair_report(report: &RepairReport) -> String {
    let mut out = String::new();

    out.push_str(&format!("=== Repair: returned '{}' ===\n\n", report.best_label));

    for phase in &report.phases {
        push_phase(&mut out, phase);
    }

    out.push_str("\nHistory:\n");
    for entry in &report.history {
        let marker = if entry.label == report.best_label { "*" } else { " " };
        let score = entry
            .score
            .map(|s| format!("{:.2}", s))
            .unwrap_or_else(|| "unscored".to_string());
        let validity = match entry.valid {
            Some(true) => "valid",
            Some(false) => "invalid",
            None => "-",
        };
        out.push_str(&format!(
            " {} [{}] {:<14} {:>8}  {}\n",
            marker, entry.index, entry.label, score, validity
        ));
    }

    if !report.remaining_errors.is_empty() {
        out.push_str(&format!("\nRemaining errors ({}):\n", report.remaining_errors.len()));
        for error in &report.remaining_errors {
            out.push_str(&format!("    [{}] {}", error.kind.as_str(), error.selector));
            if let Some(ref blocker) = error.blocking_selector {
                out.push_str(&format!(" (blocked by {})", blocker));
            }
            out.push('\n');
        }
    }

    out.push_str(&format!(
        "\n=== Result: {} (confidence {:.2}, stop: {:?}, {} surgical attempt(s)",
        if report.valid { "VALID" } else { "INVALID" },
        report.confidence,
        report.stop_reason,
        report.attempts
    ));
    if report.timed_out {
        out.push_str(", timed out");
    }
    out.push_str(") ===\n");

    out
}

fn push_phase(out: &mut String, phase: &PhaseResult) {
    let marker = if phase.passed { PASS } else { FAIL };
    out.push_str(&format!("{}  {}: {}", marker, phase.phase.as_str(), phase.diagnostics));
    if !phase.warnings.is_empty() {
        out.push_str(&format!(" ({} warnings)", phase.warnings.len()));
    }
    out.push('\n');

    if !phase.passed {
        for warning in &phase.warnings {
            out.push_str(&format!("    [WARN] {}\n", warning));
        }
    }
}
