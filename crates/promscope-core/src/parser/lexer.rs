//! Tokenizer for PromQL.

use crate::error::{ParseError, ParseErrorKind};
use crate::types::Span;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    /// Identifier or keyword. Keywords are told apart by the parser.
    Ident(String),
    Number(f64),
    /// Duration in milliseconds.
    Duration(i64),
    Str(String),
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Comma,
    Colon,
    At,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eql,
    Neq,
    Lss,
    Lte,
    Gtr,
    Gte,
    Assign,
    EqlRegex,
    NeqRegex,
    Eof,
}

impl TokenKind {
    pub(crate) fn describe(&self) -> String {
        match self {
            Self::Ident(name) => format!("identifier \"{name}\""),
            Self::Number(_) => "number".to_string(),
            Self::Duration(_) => "duration".to_string(),
            Self::Str(_) => "string".to_string(),
            Self::LeftParen => "\"(\"".to_string(),
            Self::RightParen => "\")\"".to_string(),
            Self::LeftBrace => "\"{\"".to_string(),
            Self::RightBrace => "\"}\"".to_string(),
            Self::LeftBracket => "\"[\"".to_string(),
            Self::RightBracket => "\"]\"".to_string(),
            Self::Comma => "\",\"".to_string(),
            Self::Colon => "\":\"".to_string(),
            Self::At => "\"@\"".to_string(),
            Self::Add => "\"+\"".to_string(),
            Self::Sub => "\"-\"".to_string(),
            Self::Mul => "\"*\"".to_string(),
            Self::Div => "\"/\"".to_string(),
            Self::Mod => "\"%\"".to_string(),
            Self::Pow => "\"^\"".to_string(),
            Self::Eql => "\"==\"".to_string(),
            Self::Neq => "\"!=\"".to_string(),
            Self::Lss => "\"<\"".to_string(),
            Self::Lte => "\"<=\"".to_string(),
            Self::Gtr => "\">\"".to_string(),
            Self::Gte => "\">=\"".to_string(),
            Self::Assign => "\"=\"".to_string(),
            Self::EqlRegex => "\"=~\"".to_string(),
            Self::NeqRegex => "\"!~\"".to_string(),
            Self::Eof => "end of input".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

/// Splits `text` into tokens, always terminated by [`TokenKind::Eof`].
pub(crate) fn tokenize(text: &str) -> Result<Vec<Token>, ParseError> {
    Lexer::new(text).run()
}

struct Lexer<'a> {
    text: &'a str,
    pos: usize,
    bracket_depth: usize,
    tokens: Vec<Token>,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == ':'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == ':'
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            pos: 0,
            bracket_depth: 0,
            tokens: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.text[self.pos..].chars().nth(offset)
    }

    fn error(&self, message: impl Into<String>, start: usize) -> ParseError {
        let end = (start + 1).min(self.text.len()).max(start);
        ParseError::new(message)
            .with_kind(ParseErrorKind::LexerError)
            .at(self.text, Span::new(start, end))
    }

    fn push(&mut self, kind: TokenKind, start: usize) {
        self.tokens.push(Token {
            kind,
            span: Span::new(start, self.pos),
        });
    }

    fn run(mut self) -> Result<Vec<Token>, ParseError> {
        while let Some(c) = self.peek() {
            let start = self.pos;
            if c.is_whitespace() {
                self.pos += c.len_utf8();
                continue;
            }
            if c == '#' {
                while let Some(c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.pos += c.len_utf8();
                }
                continue;
            }
            if c.is_ascii_digit() || (c == '.' && self.peek_at(1).is_some_and(|n| n.is_ascii_digit()))
            {
                self.lex_number_or_duration()?;
                continue;
            }
            if c == ':' && self.bracket_depth > 0 {
                self.pos += 1;
                self.push(TokenKind::Colon, start);
                continue;
            }
            if is_ident_start(c) {
                self.lex_ident();
                continue;
            }
            if c == '"' || c == '\'' {
                let value = self.lex_quoted(c)?;
                self.push(TokenKind::Str(value), start);
                continue;
            }
            if c == '`' {
                let value = self.lex_raw()?;
                self.push(TokenKind::Str(value), start);
                continue;
            }
            let next = self.peek_at(1);
            let (kind, len) = match (c, next) {
                ('(', _) => (TokenKind::LeftParen, 1),
                (')', _) => (TokenKind::RightParen, 1),
                ('{', _) => (TokenKind::LeftBrace, 1),
                ('}', _) => (TokenKind::RightBrace, 1),
                ('[', _) => {
                    self.bracket_depth += 1;
                    (TokenKind::LeftBracket, 1)
                }
                (']', _) => {
                    self.bracket_depth = self.bracket_depth.saturating_sub(1);
                    (TokenKind::RightBracket, 1)
                }
                (',', _) => (TokenKind::Comma, 1),
                ('@', _) => (TokenKind::At, 1),
                ('+', _) => (TokenKind::Add, 1),
                ('-', _) => (TokenKind::Sub, 1),
                ('*', _) => (TokenKind::Mul, 1),
                ('/', _) => (TokenKind::Div, 1),
                ('%', _) => (TokenKind::Mod, 1),
                ('^', _) => (TokenKind::Pow, 1),
                ('=', Some('=')) => (TokenKind::Eql, 2),
                ('=', Some('~')) => (TokenKind::EqlRegex, 2),
                ('=', _) => (TokenKind::Assign, 1),
                ('!', Some('=')) => (TokenKind::Neq, 2),
                ('!', Some('~')) => (TokenKind::NeqRegex, 2),
                ('<', Some('=')) => (TokenKind::Lte, 2),
                ('<', _) => (TokenKind::Lss, 1),
                ('>', Some('=')) => (TokenKind::Gte, 2),
                ('>', _) => (TokenKind::Gtr, 1),
                _ => return Err(self.error(format!("unexpected character: '{c}'"), start)),
            };
            self.pos += len;
            self.push(kind, start);
        }
        let end = self.text.len();
        self.tokens.push(Token {
            kind: TokenKind::Eof,
            span: Span::new(end, end),
        });
        Ok(self.tokens)
    }

    fn lex_ident(&mut self) {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !is_ident_char(c) {
                break;
            }
            // Inside brackets ':' separates subquery range and step.
            if c == ':' && self.bracket_depth > 0 {
                break;
            }
            self.pos += 1;
        }
        let word = self.text[start..self.pos].to_string();
        self.push(TokenKind::Ident(word), start);
    }

    fn lex_number_or_duration(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        let rest = &self.text[start..];

        if let Some(ms) = scan_duration(rest) {
            self.pos += ms.1;
            self.push(TokenKind::Duration(ms.0), start);
            return Ok(());
        }

        let len = scan_number(rest);
        self.pos += len;
        if self.peek().is_some_and(is_ident_char) {
            return Err(self.error(
                format!(
                    "bad number or duration syntax: \"{}\"",
                    &self.text[start..self.pos]
                ),
                start,
            ));
        }
        let literal = &self.text[start..self.pos];
        let value = parse_number(literal)
            .ok_or_else(|| self.error(format!("bad number syntax: \"{literal}\""), start))?;
        self.push(TokenKind::Number(value), start);
        Ok(())
    }

    fn lex_quoted(&mut self, quote: char) -> Result<String, ParseError> {
        let start = self.pos;
        self.pos += 1;
        let mut out = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(self.error("unterminated quoted string", start));
            };
            self.pos += c.len_utf8();
            match c {
                c if c == quote => return Ok(out),
                '\n' => return Err(self.error("unterminated quoted string", start)),
                '\\' => {
                    let escape_start = self.pos - 1;
                    let Some(e) = self.peek() else {
                        return Err(self.error("unterminated quoted string", start));
                    };
                    self.pos += e.len_utf8();
                    match e {
                        'a' => out.push('\u{07}'),
                        'b' => out.push('\u{08}'),
                        'f' => out.push('\u{0c}'),
                        'n' => out.push('\n'),
                        'r' => out.push('\r'),
                        't' => out.push('\t'),
                        'v' => out.push('\u{0b}'),
                        '\\' => out.push('\\'),
                        '"' | '\'' => out.push(e),
                        'x' => out.push(self.lex_hex_escape(2, escape_start)?),
                        'u' => out.push(self.lex_hex_escape(4, escape_start)?),
                        'U' => out.push(self.lex_hex_escape(8, escape_start)?),
                        _ => {
                            return Err(
                                self.error(format!("unknown escape sequence '\\{e}'"), escape_start)
                            )
                        }
                    }
                }
                c => out.push(c),
            }
        }
    }

    fn lex_hex_escape(&mut self, digits: usize, escape_start: usize) -> Result<char, ParseError> {
        let hex = self
            .text
            .get(self.pos..self.pos + digits)
            .filter(|h| h.chars().all(|c| c.is_ascii_hexdigit()))
            .ok_or_else(|| self.error("invalid escape sequence", escape_start))?;
        self.pos += digits;
        u32::from_str_radix(hex, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| self.error("escape sequence is an invalid character", escape_start))
    }

    fn lex_raw(&mut self) -> Result<String, ParseError> {
        let start = self.pos;
        let body_start = start + 1;
        match self.text[body_start..].find('`') {
            Some(len) => {
                self.pos = body_start + len + 1;
                Ok(self.text[body_start..body_start + len].to_string())
            }
            None => Err(self.error("unterminated raw string", start)),
        }
    }
}

/// Length of the longest number literal at the start of `text`.
fn scan_number(text: &str) -> usize {
    let bytes = text.as_bytes();
    if bytes.len() > 1 && bytes[0] == b'0' && (bytes[1] == b'x' || bytes[1] == b'X') {
        let digits = bytes[2..]
            .iter()
            .take_while(|b| b.is_ascii_hexdigit())
            .count();
        return 2 + digits;
    }
    let mut i = bytes.iter().take_while(|b| b.is_ascii_digit()).count();
    if bytes.get(i) == Some(&b'.') {
        i += 1;
        i += bytes[i..].iter().take_while(|b| b.is_ascii_digit()).count();
    }
    if matches!(bytes.get(i), Some(b'e' | b'E')) {
        let mut j = i + 1;
        if matches!(bytes.get(j), Some(b'+' | b'-')) {
            j += 1;
        }
        let exp_digits = bytes[j..].iter().take_while(|b| b.is_ascii_digit()).count();
        if exp_digits > 0 {
            i = j + exp_digits;
        }
    }
    i
}

fn parse_number(literal: &str) -> Option<f64> {
    if let Some(hex) = literal
        .strip_prefix("0x")
        .or_else(|| literal.strip_prefix("0X"))
    {
        return u64::from_str_radix(hex, 16).ok().map(|v| v as f64);
    }
    literal.parse().ok()
}

/// Parses a duration such as `5m` or `1h30m` at the start of `text`.
///
/// Returns the duration in milliseconds and the number of bytes consumed, or
/// `None` when `text` does not start with a duration.
pub(crate) fn scan_duration(text: &str) -> Option<(i64, usize)> {
    const UNITS: [(&str, i64); 7] = [
        ("ms", 1),
        ("s", 1000),
        ("m", 60 * 1000),
        ("h", 60 * 60 * 1000),
        ("d", 24 * 60 * 60 * 1000),
        ("w", 7 * 24 * 60 * 60 * 1000),
        ("y", 365 * 24 * 60 * 60 * 1000),
    ];

    let bytes = text.as_bytes();
    let mut pos = 0;
    let mut total: i64 = 0;
    let mut parts = 0;
    loop {
        let digits = bytes[pos..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count();
        if digits == 0 {
            break;
        }
        let value: i64 = text[pos..pos + digits].parse().ok()?;
        let rest = &text[pos + digits..];
        let Some((unit, mult)) = UNITS.iter().find(|(unit, _)| {
            rest.starts_with(unit)
                && !rest[unit.len()..]
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        }) else {
            break;
        };
        total = total.checked_add(value.checked_mul(*mult)?)?;
        pos += digits + unit.len();
        parts += 1;
    }
    if parts == 0 {
        return None;
    }
    // "5m3" is neither a duration nor a number.
    if text[pos..]
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
    {
        return None;
    }
    Some((total, pos))
}
