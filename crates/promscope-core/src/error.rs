//! Error types for PromQL parsing and analysis.
//!
//! # Error Handling Strategy
//!
//! This crate uses two complementary error handling patterns:
//!
//! - [`ParseError`]: Fatal errors that prevent a query from being parsed. Returned as
//!   `Result<T, ParseError>` by [`crate::parse_promql`].
//!
//! - [`crate::types::Issue`]: Non-fatal findings collected during analysis (dead code,
//!   impossible labels, redundant joins). The analyzer itself never fails; every
//!   problem it detects is reported as data on the returned sources.

use crate::types::Span;
use thiserror::Error;

/// Error encountered while parsing a PromQL query.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{}", self.render())]
pub struct ParseError {
    /// Human-readable error message.
    pub message: String,
    /// Byte range of the offending input, if known.
    pub span: Option<Span>,
    /// Line and column of the start of `span`, if known.
    pub position: Option<Position>,
    /// The specific category of parse error.
    pub kind: ParseErrorKind,
}

/// Position information for a parse error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    /// Line number (1-indexed).
    pub line: usize,
    /// Column number (1-indexed, counted in characters).
    pub column: usize,
}

impl Position {
    /// Computes the line and column of a byte offset inside `text`.
    ///
    /// Offsets past the end of `text` are clamped to its end, offsets that fall
    /// inside a multi-byte character are moved back to its first byte.
    pub fn from_offset(text: &str, offset: usize) -> Self {
        let mut offset = offset.min(text.len());
        while !text.is_char_boundary(offset) {
            offset -= 1;
        }
        let before = &text[..offset];
        let line = before.matches('\n').count() + 1;
        let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
        let column = before[line_start..].chars().count() + 1;
        Self { line, column }
    }
}

/// Category of parse error for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseErrorKind {
    /// Unexpected token in input.
    #[default]
    SyntaxError,
    /// Invalid or unexpected end of input.
    UnexpectedEof,
    /// Character sequence that does not form a valid token.
    LexerError,
    /// Function name that is not part of PromQL.
    UnknownFunction,
    /// Operand or argument of the wrong value type, or a wrong number of arguments.
    TypeMismatch,
    /// Modifier used where PromQL does not allow it.
    InvalidModifier,
    /// Query nesting exceeds the configured limit.
    DepthLimitExceeded,
}

impl ParseError {
    /// Creates a new parse error with just a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            span: None,
            position: None,
            kind: ParseErrorKind::SyntaxError,
        }
    }

    /// Attaches the offending byte range and resolves its line and column in `text`.
    pub fn at(mut self, text: &str, span: Span) -> Self {
        self.position = Some(Position::from_offset(text, span.start));
        self.span = Some(span);
        self
    }

    /// Sets the error kind.
    pub fn with_kind(mut self, kind: ParseErrorKind) -> Self {
        self.kind = kind;
        self
    }

    fn render(&self) -> String {
        match self.position {
            Some(pos) => format!(
                "parse error at line {}, column {}: {}",
                pos.line, pos.column, self.message
            ),
            None => format!("parse error: {}", self.message),
        }
    }
}
