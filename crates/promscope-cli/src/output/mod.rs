//! Output formatting modules.

pub mod ast;
pub mod json;
pub mod lint;
pub mod table;

pub use ast::format_ast;
pub use json::format_json;
pub use lint::{format_lint_json, format_lint_results, FileLintResult, LintIssue};
pub use table::format_table;
