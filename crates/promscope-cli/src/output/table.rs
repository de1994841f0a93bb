//! Human-readable table output formatting.

use crate::input::QuerySource;
use owo_colors::OwoColorize;
use promscope_core::error::Position;
use promscope_core::{AnalyzeResult, Issue, LabelPromise, Severity, Source, SourceKind};
use std::fmt::Write;

/// Format analysis results as human-readable text with optional colors.
///
/// `results` pairs every input query with its analysis result.
pub fn format_table(results: &[(QuerySource, AnalyzeResult)], quiet: bool, colored: bool) -> String {
    let mut out = String::new();

    write_header(&mut out, colored);
    for (input, result) in results {
        write_query(&mut out, input, colored);
        write_summary(&mut out, result, colored);
        write_sources(&mut out, result, colored);
        if !quiet {
            write_issues(&mut out, input, result, colored);
        }
    }

    out
}

fn write_header(out: &mut String, colored: bool) {
    let title = "Promscope Analysis";
    let line = "═".repeat(50);

    if colored {
        let _ = writeln!(out, "{}", title.bold());
        let _ = writeln!(out, "{}", line.dimmed());
    } else {
        let _ = writeln!(out, "{title}");
        let _ = writeln!(out, "{line}");
    }
}

fn write_query(out: &mut String, input: &QuerySource, colored: bool) {
    let _ = writeln!(out);
    if colored {
        let _ = writeln!(out, "{} {}", format!("{}:", input.name).bold(), input.query);
    } else {
        let _ = writeln!(out, "{}: {}", input.name, input.query);
    }
}

fn write_summary(out: &mut String, result: &AnalyzeResult, colored: bool) {
    let summary = &result.summary;
    let stats = format!(
        "Summary: {} sources | {} joins | {} dead | {} label issues",
        summary.source_count, summary.join_count, summary.dead_code_count, summary.dead_label_count
    );

    if colored {
        let _ = writeln!(out, "{}", stats.cyan());
    } else {
        let _ = writeln!(out, "{stats}");
    }
}

fn write_sources(out: &mut String, result: &AnalyzeResult, colored: bool) {
    for (i, src) in result.sources.iter().enumerate() {
        let mut title = format!("#{} {} returning {}", i + 1, kind_name(src.kind()), src.returns());
        if !src.operation().is_empty() {
            let _ = write!(title, " from {}()", src.operation());
        }
        if src.is_conditional() {
            title.push_str(", conditional");
        }
        if src.return_info().known_return {
            let _ = write!(title, ", always {}", src.return_info().returned_number);
        }

        if colored {
            let _ = writeln!(out, "  {}", title.bold());
        } else {
            let _ = writeln!(out, "  {title}");
        }
        let _ = writeln!(out, "     labels: {}", describe_labels(src));

        for join in src.joins() {
            let clause = if join.is_on { "on" } else { "ignoring" };
            let _ = writeln!(
                out,
                "     joined: {} {clause}({}) {}",
                join.op,
                join.matching_labels.join(", "),
                kind_name(join.src.kind())
            );
        }
        for unless in src.unless() {
            let _ = writeln!(
                out,
                "     unless: {} {}",
                unless.matching_labels.join(", "),
                kind_name(unless.src.kind())
            );
        }
        if src.dead_info().is_some() {
            let dead = "never returns anything";
            if colored {
                let _ = writeln!(out, "     {}", dead.red());
            } else {
                let _ = writeln!(out, "     {dead}");
            }
        }
    }
}

fn describe_labels(src: &Source) -> String {
    let guaranteed = src.transformed_labels(&[LabelPromise::Guaranteed]);
    let possible = src.transformed_labels(&[LabelPromise::Possible]);

    let mut parts = Vec::new();
    if !guaranteed.is_empty() {
        parts.push(format!("always {}", guaranteed.join(", ")));
    }
    if !possible.is_empty() {
        parts.push(format!("maybe {}", possible.join(", ")));
    }
    if src.fixed_labels() {
        parts.push("no other labels".to_string());
    } else {
        parts.push("any other labels".to_string());
    }
    parts.join("; ")
}

fn kind_name(kind: SourceKind) -> &'static str {
    match kind {
        SourceKind::Unknown => "unknown",
        SourceKind::Number => "number",
        SourceKind::String => "string",
        SourceKind::Selector => "selector",
        SourceKind::Function => "function",
        SourceKind::Aggregation => "aggregation",
    }
}

fn write_issues(out: &mut String, input: &QuerySource, result: &AnalyzeResult, colored: bool) {
    if result.issues.is_empty() {
        return;
    }

    let counts = &result.summary.issue_count;
    let mut parts = Vec::new();
    if counts.errors > 0 {
        parts.push(format!("{} errors", counts.errors));
    }
    if counts.warnings > 0 {
        parts.push(format!("{} warnings", counts.warnings));
    }
    if counts.infos > 0 {
        parts.push(format!("{} info", counts.infos));
    }

    let header = format!("Issues ({}):", parts.join(", "));
    if colored {
        let _ = writeln!(out, "{}", header.bold());
    } else {
        let _ = writeln!(out, "{header}");
    }

    for issue in &result.issues {
        let _ = writeln!(
            out,
            "  [{}]{} {}",
            severity_label(issue.severity, colored),
            location(&input.query, issue),
            issue.message
        );
    }
}

fn severity_label(severity: Severity, colored: bool) -> String {
    let (label, colored_label) = match severity {
        Severity::Error => ("ERROR", "ERROR".red().to_string()),
        Severity::Warning => ("WARN", "WARN".yellow().to_string()),
        Severity::Info => ("INFO", "INFO".blue().to_string()),
    };
    if colored {
        colored_label
    } else {
        label.to_string()
    }
}

fn location(query: &str, issue: &Issue) -> String {
    issue
        .span
        .map(|s| {
            let pos = Position::from_offset(query, s.start);
            format!(" {}:{} {}:", pos.line, pos.column, issue.code)
        })
        .unwrap_or_else(|| format!(" {}:", issue.code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use promscope_core::{analyze, AnalyzeRequest};

    fn run(query: &str) -> Vec<(QuerySource, AnalyzeResult)> {
        let input = QuerySource {
            name: "<expr 1>".to_string(),
            query: query.to_string(),
        };
        let result = analyze(&AnalyzeRequest::new(query));
        vec![(input, result)]
    }

    #[test]
    fn test_format_table_basic() {
        let output = format_table(&run("sum(foo{job=\"a\"}) by (job)"), false, false);
        assert!(output.contains("Promscope Analysis"));
        assert!(output.contains("<expr 1>: sum(foo{job=\"a\"}) by (job)"));
        assert!(output.contains("Summary: 1 sources | 0 joins | 0 dead | 0 label issues"));
        assert!(output.contains("#1 aggregation returning instant vector from sum()"));
        assert!(output.contains("labels: always job; no other labels"));
        assert!(!output.contains("Issues"));
    }

    #[test]
    fn test_format_table_issues() {
        let output = format_table(&run("vector(1) or foo"), false, false);
        assert!(output.contains("Issues (1 warnings):"));
        assert!(output.contains("[WARN] 1:14 DEAD_CODE: The left hand side always returns something"));
        assert!(output.contains("never returns anything"));
    }

    #[test]
    fn test_format_table_quiet() {
        let results = run("vector(1) or foo");
        let quiet = format_table(&results, true, false);
        let verbose = format_table(&results, false, false);
        assert!(!quiet.contains("Issues"));
        assert!(quiet.len() < verbose.len());
    }
}
