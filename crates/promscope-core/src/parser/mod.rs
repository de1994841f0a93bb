//! PromQL parser.
//!
//! A hand-written precedence-climbing parser producing [`Expr`] trees with byte
//! spans for every node. Type checks follow the rules Prometheus applies when
//! parsing, with one exception: comparisons between two scalars are accepted
//! without the `bool` modifier so that the analyzer can report them.

mod lexer;

use regex::Regex;
#[cfg(feature = "tracing")]
use tracing::debug;

use crate::ast::{
    AggregateExpr, AggregateOp, AtModifier, BinaryExpr, BinaryOp, Call, Cardinality, Expr,
    LabelMatcher, MatchOp, MatrixSelector, NumberLiteral, ParenExpr, PromDuration, StringLiteral,
    SubqueryExpr, UnaryExpr, UnaryOp, ValueType, VectorMatching, VectorSelector,
    METRIC_NAME_LABEL,
};
use crate::error::{ParseError, ParseErrorKind};
use crate::functions;
use crate::types::Span;
use lexer::{Token, TokenKind};

/// Nesting limit used unless the caller asks for another one.
pub const DEFAULT_MAX_DEPTH: usize = 256;

const RESERVED_KEYWORDS: &[&str] = &[
    "and",
    "or",
    "unless",
    "atan2",
    "bool",
    "on",
    "ignoring",
    "group_left",
    "group_right",
    "by",
    "without",
    "offset",
];

/// Parses a PromQL query using [`DEFAULT_MAX_DEPTH`].
pub fn parse_promql(text: &str) -> Result<Expr, ParseError> {
    parse_promql_with_depth(text, DEFAULT_MAX_DEPTH)
}

/// Parses a PromQL query, rejecting expressions nested deeper than `max_depth`.
pub fn parse_promql_with_depth(text: &str, max_depth: usize) -> Result<Expr, ParseError> {
    let tokens = lexer::tokenize(text)?;
    let mut parser = Parser {
        text,
        tokens,
        pos: 0,
        depth: 0,
        max_depth,
    };
    if parser.peek().kind == TokenKind::Eof {
        return Err(ParseError::new("no expression found in input")
            .with_kind(ParseErrorKind::UnexpectedEof)
            .at(text, parser.peek().span));
    }
    let expr = parser.parse_expr()?;
    if parser.peek().kind != TokenKind::Eof {
        return Err(parser.unexpected("query"));
    }
    Ok(expr)
}

struct Parser<'a> {
    text: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    max_depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Token {
        // The token list always ends with Eof and we never advance past it.
        &self.tokens[self.pos]
    }

    fn peek_nth(&self, n: usize) -> &Token {
        let idx = (self.pos + n).min(self.tokens.len() - 1);
        &self.tokens[idx]
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    /// Lowercased identifier at the current position, if any.
    fn peek_keyword(&self) -> Option<String> {
        match &self.peek().kind {
            TokenKind::Ident(word) => Some(word.to_ascii_lowercase()),
            _ => None,
        }
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        self.peek_keyword().as_deref() == Some(keyword)
    }

    fn error(&self, message: impl Into<String>, span: Span, kind: ParseErrorKind) -> ParseError {
        ParseError::new(message).with_kind(kind).at(self.text, span)
    }

    fn unexpected(&self, context: &str) -> ParseError {
        let token = self.peek();
        let kind = if token.kind == TokenKind::Eof {
            ParseErrorKind::UnexpectedEof
        } else {
            ParseErrorKind::SyntaxError
        };
        self.error(
            format!("unexpected {} in {context}", token.kind.describe()),
            token.span,
            kind,
        )
    }

    fn expect(&mut self, kind: TokenKind, context: &str) -> Result<Token, ParseError> {
        if self.peek().kind == kind {
            Ok(self.advance())
        } else {
            Err(self.unexpected(context))
        }
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > self.max_depth {
            #[cfg(feature = "tracing")]
            debug!(max_depth = self.max_depth, "query nesting limit exceeded");
            return Err(self.error(
                format!(
                    "query is nested too deeply, maximum depth is {}",
                    self.max_depth
                ),
                self.peek().span,
                ParseErrorKind::DepthLimitExceeded,
            ));
        }
        Ok(())
    }

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_binary(0)
    }

    fn parse_binary(&mut self, min_precedence: u8) -> Result<Expr, ParseError> {
        self.enter()?;
        let result = self.parse_binary_inner(min_precedence);
        self.depth -= 1;
        result
    }

    fn parse_binary_inner(&mut self, min_precedence: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        let mut chain = 0;
        loop {
            let Some(op) = self.peek_binary_op() else {
                break;
            };
            let precedence = op.precedence();
            if precedence < min_precedence {
                break;
            }
            chain += 1;
            if self.depth + chain > self.max_depth {
                return Err(self.error(
                    format!(
                        "query is nested too deeply, maximum depth is {}",
                        self.max_depth
                    ),
                    self.peek().span,
                    ParseErrorKind::DepthLimitExceeded,
                ));
            }
            let op_span = self.advance().span;
            let (return_bool, matching) = self.parse_bin_modifiers()?;
            let next_min = if op.is_right_associative() {
                precedence
            } else {
                precedence + 1
            };
            let rhs = self.parse_binary(next_min)?;
            lhs = self.build_binary(op, op_span, lhs, rhs, return_bool, matching)?;
        }
        Ok(lhs)
    }

    fn peek_binary_op(&self) -> Option<BinaryOp> {
        let op = match &self.peek().kind {
            TokenKind::Add => BinaryOp::Add,
            TokenKind::Sub => BinaryOp::Sub,
            TokenKind::Mul => BinaryOp::Mul,
            TokenKind::Div => BinaryOp::Div,
            TokenKind::Mod => BinaryOp::Mod,
            TokenKind::Pow => BinaryOp::Pow,
            TokenKind::Eql => BinaryOp::Eql,
            TokenKind::Neq => BinaryOp::Neq,
            TokenKind::Lss => BinaryOp::Lss,
            TokenKind::Lte => BinaryOp::Lte,
            TokenKind::Gtr => BinaryOp::Gtr,
            TokenKind::Gte => BinaryOp::Gte,
            TokenKind::Ident(word) => match word.to_ascii_lowercase().as_str() {
                "and" => BinaryOp::And,
                "or" => BinaryOp::Or,
                "unless" => BinaryOp::Unless,
                "atan2" => BinaryOp::Atan2,
                _ => return None,
            },
            _ => return None,
        };
        Some(op)
    }

    fn parse_bin_modifiers(&mut self) -> Result<(bool, VectorMatching), ParseError> {
        let mut return_bool = false;
        if self.at_keyword("bool") {
            self.advance();
            return_bool = true;
        }

        let mut matching = VectorMatching::default();
        match self.peek_keyword().as_deref() {
            Some(kw @ ("on" | "ignoring")) => {
                matching.on = kw == "on";
                self.advance();
                matching.matching_labels = self.parse_label_list(kw)?;
                match self.peek_keyword().as_deref() {
                    Some(group @ ("group_left" | "group_right")) => {
                        matching.card = if group == "group_left" {
                            Cardinality::ManyToOne
                        } else {
                            Cardinality::OneToMany
                        };
                        self.advance();
                        if self.peek().kind == TokenKind::LeftParen {
                            matching.include = self.parse_label_list(group)?;
                        }
                    }
                    _ => {}
                }
            }
            Some("group_left" | "group_right") => {
                return Err(self.error(
                    "grouping modifiers require on(...) or ignoring(...)",
                    self.peek().span,
                    ParseErrorKind::InvalidModifier,
                ));
            }
            _ => {}
        }
        Ok((return_bool, matching))
    }

    /// Parses `( label, label, ... )`.
    fn parse_label_list(&mut self, context: &str) -> Result<Vec<String>, ParseError> {
        let context = format!("{context}(...) clause");
        self.expect(TokenKind::LeftParen, &context)?;
        let mut labels = Vec::new();
        loop {
            if self.peek().kind == TokenKind::RightParen {
                self.advance();
                break;
            }
            let name = match self.peek().kind.clone() {
                TokenKind::Ident(name) if is_valid_label_name(&name) => name,
                TokenKind::Str(name) => name,
                _ => return Err(self.unexpected(&context)),
            };
            self.advance();
            labels.push(name);
            match self.peek().kind {
                TokenKind::Comma => {
                    self.advance();
                }
                TokenKind::RightParen => {}
                _ => return Err(self.unexpected(&context)),
            }
        }
        Ok(labels)
    }

    fn build_binary(
        &self,
        op: BinaryOp,
        op_span: Span,
        lhs: Expr,
        rhs: Expr,
        return_bool: bool,
        mut matching: VectorMatching,
    ) -> Result<Expr, ParseError> {
        let span = Span::new(lhs.span().start, rhs.span().end);
        let lt = lhs.value_type();
        let rt = rhs.value_type();

        if return_bool && !op.is_comparison() {
            return Err(self.error(
                "bool modifier can only be used on comparison operators",
                op_span,
                ParseErrorKind::InvalidModifier,
            ));
        }
        if op.is_set_operator() && matching.card == Cardinality::OneToOne {
            matching.card = Cardinality::ManyToMany;
        }
        if matching.on {
            if let Some(label) = matching
                .matching_labels
                .iter()
                .find(|l| matching.include.contains(l))
            {
                return Err(self.error(
                    format!("label \"{label}\" must not occur in ON and GROUP clause at once"),
                    op_span,
                    ParseErrorKind::InvalidModifier,
                ));
            }
        }
        for (side, vt) in [(&lhs, lt), (&rhs, rt)] {
            if vt != ValueType::Scalar && vt != ValueType::Vector {
                return Err(self.error(
                    "binary expression must contain only scalar and instant vector types",
                    side.span(),
                    ParseErrorKind::TypeMismatch,
                ));
            }
        }
        if (lt == ValueType::Scalar || rt == ValueType::Scalar) && op.is_set_operator() {
            return Err(self.error(
                format!("set operator \"{op}\" not allowed in binary scalar expression"),
                span,
                ParseErrorKind::TypeMismatch,
            ));
        }

        let matching = if lt == ValueType::Vector && rt == ValueType::Vector {
            if op.is_set_operator()
                && matches!(
                    matching.card,
                    Cardinality::OneToMany | Cardinality::ManyToOne
                )
            {
                return Err(self.error(
                    format!("no grouping allowed for \"{op}\" operation"),
                    span,
                    ParseErrorKind::InvalidModifier,
                ));
            }
            Some(matching)
        } else {
            if !matching.matching_labels.is_empty() {
                return Err(self.error(
                    "vector matching only allowed between instant vectors",
                    span,
                    ParseErrorKind::InvalidModifier,
                ));
            }
            None
        };

        Ok(Expr::Binary(BinaryExpr {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            matching,
            return_bool,
            span,
        }))
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek().kind {
            TokenKind::Add => UnaryOp::Add,
            TokenKind::Sub => UnaryOp::Sub,
            _ => return self.parse_postfix(),
        };
        let sign = self.advance().span;
        let operand = self.parse_binary(BinaryOp::Pow.precedence())?;
        let span = Span::new(sign.start, operand.span().end);

        if let Expr::NumberLiteral(n) = &operand {
            let value = match op {
                UnaryOp::Sub => -n.value,
                UnaryOp::Add => n.value,
            };
            return Ok(Expr::NumberLiteral(NumberLiteral { value, span }));
        }
        let vt = operand.value_type();
        if vt != ValueType::Scalar && vt != ValueType::Vector {
            return Err(self.error(
                format!(
                    "unary expression only allowed on expressions of type scalar or instant vector, got {vt}"
                ),
                span,
                ParseErrorKind::TypeMismatch,
            ));
        }
        Ok(Expr::Unary(UnaryExpr {
            op,
            expr: Box::new(operand),
            span,
        }))
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            expr = match &self.peek().kind {
                TokenKind::LeftBracket => self.parse_range(expr)?,
                TokenKind::At => self.parse_at(expr)?,
                TokenKind::Ident(word) if word.eq_ignore_ascii_case("offset") => {
                    self.parse_offset(expr)?
                }
                _ => break,
            };
        }
        Ok(expr)
    }

    fn parse_duration(&mut self, context: &str) -> Result<(PromDuration, Span), ParseError> {
        let token = self.peek().clone();
        let ms = match token.kind {
            TokenKind::Duration(ms) => ms,
            // Plain numbers are seconds.
            TokenKind::Number(secs) if secs.is_finite() => (secs * 1000.0).round() as i64,
            _ => return Err(self.unexpected(context)),
        };
        self.advance();
        Ok((PromDuration::from_millis(ms), token.span))
    }

    fn parse_range(&mut self, expr: Expr) -> Result<Expr, ParseError> {
        let open = self.advance().span;
        let (range, _) = self.parse_duration("range")?;

        if self.peek().kind == TokenKind::Colon {
            self.advance();
            let step = if self.peek().kind == TokenKind::RightBracket {
                None
            } else {
                Some(self.parse_duration("subquery step")?.0)
            };
            let close = self.expect(TokenKind::RightBracket, "subquery")?;
            let vt = expr.value_type();
            if vt != ValueType::Vector {
                return Err(self.error(
                    format!("subquery is only allowed on instant vector, got {vt} instead"),
                    Span::new(expr.span().start, close.span.end),
                    ParseErrorKind::TypeMismatch,
                ));
            }
            return Ok(Expr::Subquery(SubqueryExpr {
                span: Span::new(expr.span().start, close.span.end),
                expr: Box::new(expr),
                range,
                step,
                offset: None,
                at: None,
            }));
        }

        let close = self.expect(TokenKind::RightBracket, "range")?;
        match expr {
            Expr::VectorSelector(selector) => {
                if selector.offset.is_some() || selector.at.is_some() {
                    return Err(self.error(
                        "no offset or @ modifiers allowed before range",
                        Span::new(open.start, close.span.end),
                        ParseErrorKind::InvalidModifier,
                    ));
                }
                Ok(Expr::MatrixSelector(MatrixSelector {
                    span: Span::new(selector.span.start, close.span.end),
                    selector,
                    range,
                }))
            }
            other => Err(self.error(
                "ranges only allowed for vector selectors",
                Span::new(other.span().start, close.span.end),
                ParseErrorKind::TypeMismatch,
            )),
        }
    }

    fn parse_offset(&mut self, expr: Expr) -> Result<Expr, ParseError> {
        let keyword = self.advance().span;
        let negative = match self.peek().kind {
            TokenKind::Sub => {
                self.advance();
                true
            }
            TokenKind::Add => {
                self.advance();
                false
            }
            _ => false,
        };
        let (duration, span) = self.parse_duration("offset")?;
        let offset = if negative {
            PromDuration::from_millis(-duration.as_millis())
        } else {
            duration
        };
        let end = span.end;
        let duplicate = || {
            self.error(
                "offset may not be set multiple times",
                Span::new(keyword.start, end),
                ParseErrorKind::InvalidModifier,
            )
        };

        match expr {
            Expr::VectorSelector(mut vs) => {
                if vs.offset.is_some() {
                    return Err(duplicate());
                }
                vs.offset = Some(offset);
                vs.span.end = end;
                Ok(Expr::VectorSelector(vs))
            }
            Expr::MatrixSelector(mut ms) => {
                if ms.selector.offset.is_some() {
                    return Err(duplicate());
                }
                ms.selector.offset = Some(offset);
                ms.span.end = end;
                Ok(Expr::MatrixSelector(ms))
            }
            Expr::Subquery(mut sq) => {
                if sq.offset.is_some() {
                    return Err(duplicate());
                }
                sq.offset = Some(offset);
                sq.span.end = end;
                Ok(Expr::Subquery(sq))
            }
            other => Err(self.error(
                "offset modifier must be preceded by an instant vector selector or range vector selector or a subquery",
                Span::new(other.span().start, end),
                ParseErrorKind::InvalidModifier,
            )),
        }
    }

    fn parse_at(&mut self, expr: Expr) -> Result<Expr, ParseError> {
        let at_span = self.advance().span;
        let context = "@ modifier, expected timestamp, start() or end()";
        let (at, end) = match self.peek().kind.clone() {
            TokenKind::Number(ts) => (AtModifier::Timestamp(ts), self.advance().span.end),
            TokenKind::Sub | TokenKind::Add => {
                let negative = self.advance().kind == TokenKind::Sub;
                match self.peek().kind {
                    TokenKind::Number(ts) => {
                        let end = self.advance().span.end;
                        (AtModifier::Timestamp(if negative { -ts } else { ts }), end)
                    }
                    _ => return Err(self.unexpected(context)),
                }
            }
            TokenKind::Ident(word)
                if word.eq_ignore_ascii_case("start") || word.eq_ignore_ascii_case("end") =>
            {
                self.advance();
                self.expect(TokenKind::LeftParen, context)?;
                let close = self.expect(TokenKind::RightParen, context)?;
                let at = if word.eq_ignore_ascii_case("start") {
                    AtModifier::Start
                } else {
                    AtModifier::End
                };
                (at, close.span.end)
            }
            _ => return Err(self.unexpected(context)),
        };
        let duplicate = || {
            self.error(
                "@ <timestamp> may not be set multiple times",
                Span::new(at_span.start, end),
                ParseErrorKind::InvalidModifier,
            )
        };

        match expr {
            Expr::VectorSelector(mut vs) => {
                if vs.at.is_some() {
                    return Err(duplicate());
                }
                vs.at = Some(at);
                vs.span.end = end;
                Ok(Expr::VectorSelector(vs))
            }
            Expr::MatrixSelector(mut ms) => {
                if ms.selector.at.is_some() {
                    return Err(duplicate());
                }
                ms.selector.at = Some(at);
                ms.span.end = end;
                Ok(Expr::MatrixSelector(ms))
            }
            Expr::Subquery(mut sq) => {
                if sq.at.is_some() {
                    return Err(duplicate());
                }
                sq.at = Some(at);
                sq.span.end = end;
                Ok(Expr::Subquery(sq))
            }
            other => Err(self.error(
                "@ modifier must be preceded by an instant vector selector or range vector selector or a subquery",
                Span::new(other.span().start, end),
                ParseErrorKind::InvalidModifier,
            )),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Number(value) => {
                self.advance();
                Ok(Expr::NumberLiteral(NumberLiteral {
                    value,
                    span: token.span,
                }))
            }
            TokenKind::Str(value) => {
                self.advance();
                Ok(Expr::StringLiteral(StringLiteral {
                    value,
                    span: token.span,
                }))
            }
            TokenKind::LeftParen => {
                self.advance();
                let inner = self.parse_expr()?;
                let close = self.expect(TokenKind::RightParen, "parenthesized expression")?;
                Ok(Expr::Paren(ParenExpr {
                    expr: Box::new(inner),
                    span: Span::new(token.span.start, close.span.end),
                }))
            }
            TokenKind::LeftBrace => self.parse_selector(None, token.span.start),
            TokenKind::Ident(word) => self.parse_identifier(word, token.span),
            _ => Err(self.unexpected("expression")),
        }
    }

    fn parse_identifier(&mut self, word: String, span: Span) -> Result<Expr, ParseError> {
        let lower = word.to_ascii_lowercase();

        if let Some(op) = AggregateOp::from_name(&lower) {
            self.advance();
            return self.parse_aggregate(op, span);
        }
        match lower.as_str() {
            "inf" | "nan" => {
                self.advance();
                let value = if lower == "inf" { f64::INFINITY } else { f64::NAN };
                return Ok(Expr::NumberLiteral(NumberLiteral { value, span }));
            }
            kw if RESERVED_KEYWORDS.contains(&kw) => {
                return Err(self.error(
                    format!("unexpected keyword \"{word}\""),
                    span,
                    ParseErrorKind::SyntaxError,
                ));
            }
            _ => {}
        }

        if self.peek_nth(1).kind == TokenKind::LeftParen {
            let Some(def) = functions::lookup(&word) else {
                return Err(self.error(
                    format!("unknown function with name \"{word}\""),
                    span,
                    ParseErrorKind::UnknownFunction,
                ));
            };
            self.advance();
            return self.parse_call(def, span);
        }

        self.advance();
        self.parse_selector(Some((word, span)), span.start)
    }

    fn parse_call(
        &mut self,
        def: &'static functions::FunctionDef,
        name_span: Span,
    ) -> Result<Expr, ParseError> {
        let context = format!("call to function \"{}\"", def.name);
        self.expect(TokenKind::LeftParen, &context)?;
        let args = self.parse_arguments(&context)?;
        let close = self.expect(TokenKind::RightParen, &context)?;
        let span = Span::new(name_span.start, close.span.end);

        let count = args.len();
        let min = def.min_args();
        let arity_error = match def.max_args() {
            Some(max) if min == max && count != min => Some(format!(
                "expected {min} argument(s) in call to \"{}\", got {count}",
                def.name
            )),
            Some(max) if count > max => Some(format!(
                "expected at most {max} argument(s) in call to \"{}\", got {count}",
                def.name
            )),
            _ if count < min => Some(format!(
                "expected at least {min} argument(s) in call to \"{}\", got {count}",
                def.name
            )),
            _ => None,
        };
        if let Some(message) = arity_error {
            return Err(self.error(message, span, ParseErrorKind::TypeMismatch));
        }

        for (i, arg) in args.iter().enumerate() {
            let expected = def.arg_type(i);
            let actual = arg.value_type();
            if expected != actual {
                return Err(self.error(
                    format!(
                        "expected type {expected} in call to function \"{}\", got {actual}",
                        def.name
                    ),
                    arg.span(),
                    ParseErrorKind::TypeMismatch,
                ));
            }
        }

        Ok(Expr::Call(Call {
            func: def,
            args,
            span,
        }))
    }

    fn parse_arguments(&mut self, context: &str) -> Result<Vec<Expr>, ParseError> {
        let mut args = Vec::new();
        if self.peek().kind == TokenKind::RightParen {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            match self.peek().kind {
                TokenKind::Comma => {
                    self.advance();
                }
                TokenKind::RightParen => return Ok(args),
                _ => return Err(self.unexpected(context)),
            }
        }
    }

    fn parse_grouping(&mut self) -> Result<Option<(Vec<String>, bool, usize)>, ParseError> {
        let without = match self.peek_keyword().as_deref() {
            Some("by") => false,
            Some("without") => true,
            _ => return Ok(None),
        };
        self.advance();
        let context = if without { "without" } else { "by" };
        let labels = self.parse_label_list(context)?;
        // parse_label_list consumed the closing paren
        let end = self.tokens[self.pos - 1].span.end;
        Ok(Some((labels, without, end)))
    }

    fn parse_aggregate(&mut self, op: AggregateOp, op_span: Span) -> Result<Expr, ParseError> {
        let context = format!("aggregation \"{op}\"");
        let leading = self.parse_grouping()?;
        self.expect(TokenKind::LeftParen, &context)?;
        let mut args = self.parse_arguments(&context)?;
        let close = self.expect(TokenKind::RightParen, &context)?;
        let mut end = close.span.end;

        let (grouping, without) = match leading {
            Some((labels, without, _)) => (labels, without),
            None => match self.parse_grouping()? {
                Some((labels, without, clause_end)) => {
                    end = clause_end;
                    (labels, without)
                }
                None => (Vec::new(), false),
            },
        };
        let span = Span::new(op_span.start, end);

        let param_type = op.param_type();
        let expected = if param_type.is_some() { 2 } else { 1 };
        if args.len() != expected {
            return Err(self.error(
                format!(
                    "wrong number of arguments for aggregate expression provided, expected {expected}, got {}",
                    args.len()
                ),
                span,
                ParseErrorKind::TypeMismatch,
            ));
        }
        let expr = args.pop().ok_or_else(|| {
            self.error("missing aggregation input", span, ParseErrorKind::SyntaxError)
        })?;
        let param = args.pop();

        let vt = expr.value_type();
        if vt != ValueType::Vector {
            return Err(self.error(
                format!("expected type instant vector in aggregation expression, got {vt}"),
                expr.span(),
                ParseErrorKind::TypeMismatch,
            ));
        }
        if let (Some(param), Some(expected)) = (&param, param_type) {
            let actual = param.value_type();
            if actual != expected {
                return Err(self.error(
                    format!("expected type {expected} in aggregation parameter, got {actual}"),
                    param.span(),
                    ParseErrorKind::TypeMismatch,
                ));
            }
        }

        Ok(Expr::Aggregate(AggregateExpr {
            op,
            expr: Box::new(expr),
            param: param.map(Box::new),
            grouping,
            without,
            span,
        }))
    }

    fn parse_selector(
        &mut self,
        name: Option<(String, Span)>,
        start: usize,
    ) -> Result<Expr, ParseError> {
        let mut matchers = Vec::new();
        let mut end = name.as_ref().map(|(_, span)| span.end).unwrap_or(start);

        if self.peek().kind == TokenKind::LeftBrace {
            self.advance();
            end = self.parse_matchers(&mut matchers)?;
        }

        if let Some((metric, span)) = &name {
            if let Some(existing) = matchers.iter().find(|m| m.name == METRIC_NAME_LABEL) {
                return Err(self.error(
                    format!(
                        "metric name must not be set twice: \"{metric}\" or \"{}\"",
                        existing.value
                    ),
                    Span::new(span.start, end),
                    ParseErrorKind::SyntaxError,
                ));
            }
            matchers.push(LabelMatcher {
                name: METRIC_NAME_LABEL.to_string(),
                op: MatchOp::Equal,
                value: metric.clone(),
            });
        }

        let span = Span::new(start, end);
        let mut has_non_empty = false;
        for m in &matchers {
            if !self.matches_empty(m, span)? {
                has_non_empty = true;
            }
        }
        if !has_non_empty {
            return Err(self.error(
                "vector selector must contain at least one non-empty matcher",
                span,
                ParseErrorKind::SyntaxError,
            ));
        }

        Ok(Expr::VectorSelector(VectorSelector {
            name: name.map(|(metric, _)| metric),
            matchers,
            offset: None,
            at: None,
            span,
        }))
    }

    /// Parses matchers after `{`, returning the end offset of the closing `}`.
    fn parse_matchers(&mut self, matchers: &mut Vec<LabelMatcher>) -> Result<usize, ParseError> {
        let context = "label matching";
        loop {
            if self.peek().kind == TokenKind::RightBrace {
                return Ok(self.advance().span.end);
            }
            let name = match self.peek().kind.clone() {
                TokenKind::Ident(name) if is_valid_label_name(&name) => name,
                TokenKind::Str(name) => name,
                _ => return Err(self.unexpected(context)),
            };
            self.advance();
            let op = match self.peek().kind {
                TokenKind::Assign => MatchOp::Equal,
                TokenKind::Neq => MatchOp::NotEqual,
                TokenKind::EqlRegex => MatchOp::Regex,
                TokenKind::NeqRegex => MatchOp::NotRegex,
                _ => {
                    return Err(
                        self.unexpected("label matching, expected label matching operator")
                    )
                }
            };
            self.advance();
            let value = match self.peek().kind.clone() {
                TokenKind::Str(value) => value,
                _ => return Err(self.unexpected("label matching, expected string")),
            };
            self.advance();
            matchers.push(LabelMatcher { name, op, value });

            match self.peek().kind {
                TokenKind::Comma => {
                    self.advance();
                }
                TokenKind::RightBrace => {}
                _ => return Err(self.unexpected("label matching, expected \",\" or \"}\"")),
            }
        }
    }

    fn matches_empty(&self, m: &LabelMatcher, span: Span) -> Result<bool, ParseError> {
        Ok(match m.op {
            MatchOp::Equal => m.value.is_empty(),
            MatchOp::NotEqual => !m.value.is_empty(),
            MatchOp::Regex | MatchOp::NotRegex => {
                let re = Regex::new(&format!("^(?s:{})$", m.value)).map_err(|err| {
                    self.error(
                        format!("invalid regular expression in label matcher: {err}"),
                        span,
                        ParseErrorKind::SyntaxError,
                    )
                })?;
                re.is_match("") == (m.op == MatchOp::Regex)
            }
        })
    }
}

fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
