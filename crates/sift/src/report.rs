use anyhow::{Context, Result};
use sift_core::engine::RunReport;
use sift_core::problem::Severity;

/// Drops warnings from every result, keeping errors and fatal problems.
pub fn apply_quiet(mut report: RunReport) -> RunReport {
    for result in &mut report.results {
        result.problems.retain(|p| p.is_error());
        result.warning_count = 0;
        result.error_count = result.problems.len();
    }
    report.warning_count = 0;
    report.error_count = report.results.iter().map(|r| r.error_count).sum();
    report
}

pub fn render_json(report: &RunReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("serializing report")
}

pub fn render_text(report: &RunReport) -> String {
    let mut out = String::new();
    for result in &report.results {
        if result.problems.is_empty() {
            continue;
        }
        out.push_str(&format!("{}\n", result.path.display()));
        for problem in &result.problems {
            let severity = if problem.fatal {
                "error"
            } else {
                match problem.severity {
                    Severity::Error => "error",
                    _ => "warning",
                }
            };
            out.push_str(&format!(
                "  {}:{}  {}  {}",
                problem.line, problem.column, severity, problem.message
            ));
            if let Some(rule_id) = &problem.rule_id {
                out.push_str(&format!("  {rule_id}"));
            }
            out.push('\n');
        }
        out.push('\n');
    }

    let total = report.error_count + report.warning_count;
    if total == 0 {
        out.push_str("no problems found\n");
    } else {
        out.push_str(&format!(
            "{} problem{} ({} error{}, {} warning{})\n",
            total,
            plural(total),
            report.error_count,
            plural(report.error_count),
            report.warning_count,
            plural(report.warning_count),
        ));
    }
    out
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}
