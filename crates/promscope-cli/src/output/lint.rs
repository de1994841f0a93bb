//! Lint output formatting, one section per query.

use owo_colors::OwoColorize;
use promscope_core::error::Position;
use promscope_core::{Issue, Severity};
use std::fmt::Write;
use std::time::Duration;

/// Per-query lint result used by the formatter.
pub struct FileLintResult {
    pub name: String,
    pub issues: Vec<LintIssue>,
}

/// An issue resolved to line:col.
pub struct LintIssue {
    pub line: usize,
    pub col: usize,
    pub code: String,
    pub message: String,
    pub severity: Severity,
}

impl LintIssue {
    /// Resolves the issue's span against the query it was found in.
    pub fn from_issue(query: &str, issue: &Issue) -> Self {
        let pos = issue
            .span
            .map(|s| Position::from_offset(query, s.start))
            .unwrap_or(Position { line: 1, column: 1 });
        Self {
            line: pos.line,
            col: pos.column,
            code: issue.code.clone(),
            message: issue.message.clone(),
            severity: issue.severity,
        }
    }
}

/// Format lint results as human-readable text.
pub fn format_lint_results(results: &[FileLintResult], colored: bool, elapsed: Duration) -> String {
    let mut out = String::new();

    let mut total_pass = 0usize;
    let mut total_fail = 0usize;
    let mut total_violations = 0usize;

    for file in results {
        if file.issues.is_empty() {
            total_pass += 1;
        } else {
            total_fail += 1;
            total_violations += file.issues.len();
        }

        write_file_section(&mut out, file, colored);
    }

    let _ = writeln!(out, "All Finished in {}!", format_elapsed(elapsed));
    let _ = writeln!(
        out,
        "  {} passed. {} failed. {} violations found.",
        count_str(total_pass, colored, false),
        count_str(total_fail, colored, true),
        total_violations
    );

    out
}

fn write_file_section(out: &mut String, file: &FileLintResult, colored: bool) {
    let status = match (file.issues.is_empty(), colored) {
        (true, true) => "PASS".green().to_string(),
        (true, false) => "PASS".to_string(),
        (false, true) => "FAIL".red().to_string(),
        (false, false) => "FAIL".to_string(),
    };

    let _ = writeln!(out, "== [{}] {}", file.name, status);

    let mut sorted: Vec<&LintIssue> = file.issues.iter().collect();
    sorted.sort_by_key(|i| (i.line, i.col));

    for issue in sorted {
        let code = if colored {
            match issue.severity {
                Severity::Error => issue.code.red().to_string(),
                Severity::Warning => issue.code.yellow().to_string(),
                Severity::Info => issue.code.blue().to_string(),
            }
        } else {
            issue.code.clone()
        };

        let _ = writeln!(
            out,
            "L:{:>4} | P:{:>4} | {} | {}",
            issue.line, issue.col, code, issue.message
        );
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs >= 1.0 {
        format!("{secs:.2}s")
    } else if elapsed.as_millis() >= 1 {
        format!("{}ms", elapsed.as_millis())
    } else {
        format!("{}us", elapsed.as_micros())
    }
}

fn count_str(count: usize, colored: bool, failing: bool) -> String {
    let s = format!("{count} quer{}", if count == 1 { "y" } else { "ies" });
    match (colored && count > 0, failing) {
        (true, false) => s.green().to_string(),
        (true, true) => s.red().to_string(),
        (false, _) => s,
    }
}

/// Format lint results as JSON.
pub fn format_lint_json(results: &[FileLintResult], compact: bool) -> serde_json::Result<String> {
    let json_results: Vec<serde_json::Value> = results
        .iter()
        .map(|file| {
            let violations: Vec<serde_json::Value> = file
                .issues
                .iter()
                .map(|issue| {
                    serde_json::json!({
                        "line": issue.line,
                        "column": issue.col,
                        "code": issue.code,
                        "message": issue.message,
                        "severity": issue.severity,
                    })
                })
                .collect();

            serde_json::json!({
                "query": file.name,
                "violations": violations
            })
        })
        .collect();

    if compact {
        serde_json::to_string(&json_results)
    } else {
        serde_json::to_string_pretty(&json_results)
    }
}
