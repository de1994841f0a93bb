//! CLI argument parsing using clap.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Promscope - PromQL label provenance and dead code analyzer
#[derive(Parser, Debug)]
#[command(name = "promscope")]
#[command(about = "Analyze PromQL queries for impossible labels and dead code", long_about = None)]
#[command(version)]
pub struct Args {
    /// Files with one PromQL query each (reads from stdin if no files or --expr are given)
    #[arg(value_name = "FILES")]
    pub files: Vec<PathBuf>,

    /// Inline query to analyze (can be repeated)
    #[arg(short, long = "expr", value_name = "QUERY")]
    pub exprs: Vec<String>,

    /// Output format
    #[arg(short, long, default_value = "table", value_enum)]
    pub format: OutputFormat,

    /// Output file (defaults to stdout)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Report findings as lint violations, failing when any are found
    #[arg(long)]
    pub lint: bool,

    /// Comma-separated list of issue codes to ignore (e.g., UNUSED_LABEL,REDUNDANT_JOIN)
    #[arg(long, value_delimiter = ',')]
    pub exclude_codes: Vec<String>,

    /// Maximum query nesting depth
    #[arg(long, value_name = "DEPTH")]
    pub max_depth: Option<usize>,

    /// Suppress warnings on stderr
    #[arg(short, long)]
    pub quiet: bool,

    /// Compact JSON output (no pretty-printing)
    #[arg(short, long)]
    pub compact: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Print the JSON schema of the analysis request and result, then exit
    #[arg(long)]
    pub schema: bool,
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary of every query result
    Table,
    /// JSON output
    Json,
    /// Parsed expression tree
    Ast,
}

impl OutputFormat {
    pub fn name(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Json => "json",
            Self::Ast => "ast",
        }
    }
}
