//! Recovers positions of individual tokens inside an already known query fragment.
//!
//! The parser only records spans of whole expressions. Diagnostics often want to
//! point at a keyword or a single label inside a clause, so these helpers search the
//! text of an enclosing span. Every function falls back to `within` when nothing is
//! found.

use regex::{Regex, RegexBuilder};

use crate::ast::BinaryExpr;
use crate::types::Span;

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b':'
}

/// True when the match at `start..end` of `text` is not part of a longer identifier.
fn is_word(text: &str, start: usize, end: usize) -> bool {
    let bytes = text.as_bytes();
    let before = start == 0 || !is_ident_byte(bytes[start - 1]);
    let after = end >= bytes.len() || !is_ident_byte(bytes[end]);
    before && after
}

fn keyword_pattern(name: &str, with_args: bool) -> Option<Regex> {
    let tail = if with_args { r"\(.*?\)" } else { r"\(" };
    RegexBuilder::new(&format!(r"{}[ \n\t]*{tail}", regex::escape(name)))
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .ok()
}

/// Span of the name of a function or keyword followed by `(`, like `sum` in `sum(foo)`.
pub fn find_func_name_position(text: &str, within: Span, name: &str) -> Span {
    let (Some(fragment), Some(re)) = (within.slice(text), keyword_pattern(name, false)) else {
        return within;
    };
    let found = re
        .find_iter(fragment)
        .find(|m| is_word(fragment, m.start(), m.start() + name.len()))
        .map(|m| {
            Span::new(
                within.start + m.start(),
                within.start + m.start() + name.len(),
            )
        });
    found.unwrap_or(within)
}

/// Span of a whole `name(...)` clause, like `by (job)`, skipping any match that lies
/// inside one of the `outside` spans.
pub fn find_func_position(text: &str, within: Span, name: &str, outside: &[Span]) -> Span {
    let (Some(fragment), Some(re)) = (within.slice(text), keyword_pattern(name, true)) else {
        return within;
    };
    let found = re
        .find_iter(fragment)
        .filter(|m| is_word(fragment, m.start(), m.start() + name.len()))
        .map(|m| Span::new(within.start + m.start(), within.start + m.end()))
        .find(|pos| !outside.iter().any(|out| out.contains(*pos)));
    found.unwrap_or(within)
}

/// Span of the argument `name` inside the first parenthesized list in `within`.
pub fn find_argument_position(text: &str, within: Span, name: &str) -> Span {
    let Some(fragment) = within.slice(text) else {
        return within;
    };
    let Some(open) = fragment.find('(') else {
        return within;
    };
    if name.is_empty() {
        return within;
    }
    fragment[open..]
        .match_indices(name)
        .map(|(idx, _)| open + idx)
        .find(|&start| is_word(fragment, start, start + name.len()))
        .map(|start| Span::new(within.start + start, within.start + start + name.len()))
        .unwrap_or(within)
}

/// Span of the operator token of a binary expression.
pub(crate) fn find_bin_op_position(text: &str, n: &BinaryExpr) -> Span {
    let within = Span::new(n.lhs.span().end, n.rhs.span().start);
    let Some(fragment) = within.slice(text) else {
        return within;
    };
    let op = n.op.as_str();
    match fragment.to_ascii_lowercase().find(op) {
        Some(idx) => Span::new(within.start + idx, within.start + idx + op.len()),
        None => within,
    }
}
