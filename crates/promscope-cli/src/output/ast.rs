//! Parsed expression tree output.

use owo_colors::OwoColorize;
use promscope_core::Expr;
use std::fmt::Write;

/// Format an expression as an indented tree, one node per line with its byte range.
pub fn format_ast(expr: &Expr, colored: bool) -> String {
    let mut out = String::new();
    write_node(&mut out, expr, 0, colored);
    out
}

fn write_node(out: &mut String, expr: &Expr, indent: usize, colored: bool) {
    let span = expr.span();
    let kind = format!("[{}]", expr.kind_name());
    let range = format!("{}..{}", span.start, span.end);
    let pad = "  ".repeat(indent);

    if colored {
        let _ = writeln!(out, "{pad}{} {expr} {}", kind.cyan(), range.dimmed());
    } else {
        let _ = writeln!(out, "{pad}{kind} {expr} {range}");
    }
    for child in expr.children() {
        write_node(out, child, indent + 1, colored);
    }
}
