//! Promscope CLI - PromQL label provenance and dead code analyzer

use promscope_cli::cli;
use promscope_cli::input::{self, QuerySource};
use promscope_cli::output;

use anyhow::{Context, Result};
use clap::Parser;
use is_terminal::IsTerminal;
use promscope_core::{
    analysis_schema, analyze, parse_promql_with_depth, AnalysisOptions, AnalyzeRequest,
    AnalyzeResult, IssueCount, DEFAULT_MAX_DEPTH,
};
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use cli::{Args, OutputFormat};
use output::{format_ast, format_json, format_lint_json, format_lint_results, format_table};
use output::{FileLintResult, LintIssue};

/// Lint violations found or queries that failed to parse.
const EXIT_FAILURE: u8 = 1;
/// Configuration or input error (e.g. unsupported format for the given mode).
const EXIT_CONFIG_ERROR: u8 = 66;

fn main() -> ExitCode {
    let args = Args::parse();

    let outcome = if args.schema {
        print_schema(&args).map(|()| false)
    } else if args.lint {
        run_lint(&args)
    } else {
        run(&args)
    };

    match outcome {
        Ok(true) => ExitCode::from(EXIT_FAILURE),
        Ok(false) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("promscope: error: {e:#}");
            ExitCode::from(EXIT_CONFIG_ERROR)
        }
    }
}

fn print_schema(args: &Args) -> Result<()> {
    let schema = analysis_schema();
    let text = if args.compact {
        serde_json::to_string(&schema)
    } else {
        serde_json::to_string_pretty(&schema)
    }
    .context("Failed to serialize schema")?;
    write_output(&args.output, &text)
}

/// Run the CLI in lint mode.
///
/// Every finding is a violation; returns true when any query has one.
fn run_lint(args: &Args) -> Result<bool> {
    let started_at = Instant::now();

    if args.format == OutputFormat::Ast {
        anyhow::bail!(
            "--lint only supports 'table' and 'json' output formats, got '{}'",
            args.format.name()
        );
    }

    let sources = input::read_input(&args.files, &args.exprs)?;
    let results = analyze_all(&sources, args);

    let file_results: Vec<FileLintResult> = results
        .iter()
        .map(|(source, result)| FileLintResult {
            name: source.name.clone(),
            issues: result
                .issues
                .iter()
                .map(|issue| LintIssue::from_issue(&source.query, issue))
                .collect(),
        })
        .collect();

    let has_violations = file_results.iter().any(|f| !f.issues.is_empty());
    let output_str = match args.format {
        OutputFormat::Json => {
            format_lint_json(&file_results, args.compact).context("Failed to export JSON")?
        }
        _ => format_lint_results(&file_results, use_colors(args), started_at.elapsed()),
    };

    write_output(&args.output, &output_str)?;

    Ok(has_violations)
}

fn run(args: &Args) -> Result<bool> {
    let sources = input::read_input(&args.files, &args.exprs)?;

    if args.format == OutputFormat::Ast {
        return run_ast(&sources, args);
    }

    let results = analyze_all(&sources, args);
    let has_errors = results.iter().any(|(_, r)| r.summary.has_errors);

    let output_str = match args.format {
        OutputFormat::Json => {
            let results: Vec<AnalyzeResult> = results.into_iter().map(|(_, r)| r).collect();
            format_json(&results, args.compact).context("Failed to export JSON")?
        }
        _ => format_table(&results, args.quiet, use_colors(args)),
    };

    write_output(&args.output, &output_str)?;

    Ok(has_errors)
}

/// Prints the parsed tree of every query, reporting parse errors on stderr.
fn run_ast(sources: &[QuerySource], args: &Args) -> Result<bool> {
    let colored = use_colors(args);
    let max_depth = args.max_depth.unwrap_or(DEFAULT_MAX_DEPTH);
    let mut out = String::new();
    let mut has_errors = false;

    for source in sources {
        match parse_promql_with_depth(&source.query, max_depth) {
            Ok(expr) => {
                if sources.len() > 1 {
                    out.push_str(&format!("# {}\n", source.name));
                }
                out.push_str(&format_ast(&expr, colored));
            }
            Err(err) => {
                has_errors = true;
                if !args.quiet {
                    eprintln!("promscope: error: {}: {err}", source.name);
                }
            }
        }
    }

    write_output(&args.output, &out)?;
    Ok(has_errors)
}

fn analyze_all(sources: &[QuerySource], args: &Args) -> Vec<(QuerySource, AnalyzeResult)> {
    sources
        .iter()
        .map(|source| {
            let mut request =
                AnalyzeRequest::new(source.query.as_str()).with_source_name(source.name.as_str());
            if let Some(max_depth) = args.max_depth {
                request = request.with_options(AnalysisOptions {
                    max_depth: Some(max_depth),
                });
            }
            let mut result = analyze(&request);
            drop_excluded_codes(&mut result, &args.exclude_codes);
            (source.clone(), result)
        })
        .collect()
}

fn drop_excluded_codes(result: &mut AnalyzeResult, codes: &[String]) {
    if codes.is_empty() {
        return;
    }
    result
        .issues
        .retain(|issue| !codes.iter().any(|code| code.eq_ignore_ascii_case(&issue.code)));
    result.summary.issue_count = IssueCount::from_issues(&result.issues);
}

fn use_colors(args: &Args) -> bool {
    !args.no_color && args.output.is_none() && io::stdout().is_terminal()
}

fn write_output(path: &Option<PathBuf>, content: &str) -> Result<()> {
    if let Some(path) = path {
        fs::write(path, content)
            .with_context(|| format!("Failed to write to {}", path.display()))?;
    } else {
        io::stdout()
            .write_all(content.as_bytes())
            .context("Failed to write to stdout")?;
        // Ensure newline at end for terminal output
        if !content.is_empty() && !content.ends_with('\n') {
            println!();
        }
    }
    Ok(())
}
