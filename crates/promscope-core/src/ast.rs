//! PromQL expression tree.
//!
//! Every node carries the byte range it was parsed from. [`Expr`] renders back to
//! canonical PromQL through [`fmt::Display`], which the analyzer uses when it needs
//! the text of an argument rather than its position.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::functions::FunctionDef;
use crate::types::Span;

/// Label holding the metric name.
pub const METRIC_NAME_LABEL: &str = "__name__";

/// Value type produced by an expression.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    #[default]
    None,
    Scalar,
    String,
    Vector,
    Matrix,
}

impl ValueType {
    pub fn is_vector_like(self) -> bool {
        matches!(self, Self::Vector | Self::Matrix)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Scalar => "scalar",
            Self::String => "string",
            Self::Vector => "instant vector",
            Self::Matrix => "range vector",
        })
    }
}

/// A parsed PromQL expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    NumberLiteral(NumberLiteral),
    StringLiteral(StringLiteral),
    VectorSelector(VectorSelector),
    MatrixSelector(MatrixSelector),
    Subquery(SubqueryExpr),
    Call(Call),
    Aggregate(AggregateExpr),
    Binary(BinaryExpr),
    Paren(ParenExpr),
    Unary(UnaryExpr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumberLiteral {
    pub value: f64,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StringLiteral {
    pub value: String,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchOp {
    Equal,
    NotEqual,
    Regex,
    NotRegex,
}

impl MatchOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::Regex => "=~",
            Self::NotRegex => "!~",
        }
    }
}

impl fmt::Display for MatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMatcher {
    pub name: String,
    pub op: MatchOp,
    pub value: String,
}

impl fmt::Display for LabelMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.name, self.op, quote(&self.value))
    }
}

/// Evaluation time pinned with the `@` modifier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AtModifier {
    /// Unix timestamp in seconds.
    Timestamp(f64),
    Start,
    End,
}

impl fmt::Display for AtModifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timestamp(ts) => write!(f, "@ {ts:.3}"),
            Self::Start => f.write_str("@ start()"),
            Self::End => f.write_str("@ end()"),
        }
    }
}

/// A duration with millisecond precision, rendered the way Prometheus renders it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PromDuration(pub i64);

impl PromDuration {
    pub fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    pub fn as_millis(self) -> i64 {
        self.0
    }
}

impl fmt::Display for PromDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNITS: [(&str, u64, bool); 7] = [
            ("y", 1000 * 60 * 60 * 24 * 365, true),
            ("w", 1000 * 60 * 60 * 24 * 7, true),
            ("d", 1000 * 60 * 60 * 24, false),
            ("h", 1000 * 60 * 60, false),
            ("m", 1000 * 60, false),
            ("s", 1000, false),
            ("ms", 1, false),
        ];

        if self.0 == 0 {
            return f.write_str("0s");
        }
        if self.0 < 0 {
            f.write_str("-")?;
        }
        let mut ms = self.0.unsigned_abs();
        for (unit, mult, exact) in UNITS {
            // Years and weeks are only used when nothing remains, 90d reads better than 12w6d.
            if exact && ms % mult != 0 {
                continue;
            }
            let v = ms / mult;
            if v > 0 {
                write!(f, "{v}{unit}")?;
                ms -= v * mult;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorSelector {
    pub name: Option<String>,
    /// All matchers, including the `__name__` matcher implied by `name`.
    pub matchers: Vec<LabelMatcher>,
    pub offset: Option<PromDuration>,
    pub at: Option<AtModifier>,
    pub span: Span,
}

impl VectorSelector {
    fn fmt_selector(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown: Vec<&LabelMatcher> = self
            .matchers
            .iter()
            .filter(|m| {
                !(m.name == METRIC_NAME_LABEL
                    && m.op == MatchOp::Equal
                    && self.name.as_deref() == Some(m.value.as_str()))
            })
            .collect();
        if let Some(name) = &self.name {
            f.write_str(name)?;
            if shown.is_empty() {
                return Ok(());
            }
        }
        f.write_str("{")?;
        for (i, m) in shown.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{m}")?;
        }
        f.write_str("}")
    }
}

fn fmt_modifiers(
    f: &mut fmt::Formatter<'_>,
    at: Option<AtModifier>,
    offset: Option<PromDuration>,
) -> fmt::Result {
    if let Some(at) = at {
        write!(f, " {at}")?;
    }
    if let Some(offset) = offset {
        write!(f, " offset {offset}")?;
    }
    Ok(())
}

impl fmt::Display for VectorSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_selector(f)?;
        fmt_modifiers(f, self.at, self.offset)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatrixSelector {
    /// The selector being ranged over. Offset and `@` modifiers live here.
    pub selector: VectorSelector,
    pub range: PromDuration,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubqueryExpr {
    pub expr: Box<Expr>,
    pub range: PromDuration,
    pub step: Option<PromDuration>,
    pub offset: Option<PromDuration>,
    pub at: Option<AtModifier>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub func: &'static FunctionDef,
    pub args: Vec<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateOp {
    Sum,
    Avg,
    Count,
    Min,
    Max,
    Group,
    Stddev,
    Stdvar,
    Topk,
    Bottomk,
    CountValues,
    Quantile,
}

impl AggregateOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Count => "count",
            Self::Min => "min",
            Self::Max => "max",
            Self::Group => "group",
            Self::Stddev => "stddev",
            Self::Stdvar => "stdvar",
            Self::Topk => "topk",
            Self::Bottomk => "bottomk",
            Self::CountValues => "count_values",
            Self::Quantile => "quantile",
        }
    }

    /// Looks up an aggregation operator, ignoring case.
    pub fn from_name(name: &str) -> Option<Self> {
        let op = match name.to_ascii_lowercase().as_str() {
            "sum" => Self::Sum,
            "avg" => Self::Avg,
            "count" => Self::Count,
            "min" => Self::Min,
            "max" => Self::Max,
            "group" => Self::Group,
            "stddev" => Self::Stddev,
            "stdvar" => Self::Stdvar,
            "topk" => Self::Topk,
            "bottomk" => Self::Bottomk,
            "count_values" => Self::CountValues,
            "quantile" => Self::Quantile,
            _ => return None,
        };
        Some(op)
    }

    /// Type of the leading parameter, for operators that take one.
    pub fn param_type(self) -> Option<ValueType> {
        match self {
            Self::Topk | Self::Bottomk | Self::Quantile => Some(ValueType::Scalar),
            Self::CountValues => Some(ValueType::String),
            _ => None,
        }
    }
}

impl fmt::Display for AggregateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateExpr {
    pub op: AggregateOp,
    pub expr: Box<Expr>,
    pub param: Option<Box<Expr>>,
    pub grouping: Vec<String>,
    pub without: bool,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Atan2,
    Eql,
    Neq,
    Gtr,
    Lss,
    Gte,
    Lte,
    And,
    Or,
    Unless,
}

impl BinaryOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Pow => "^",
            Self::Atan2 => "atan2",
            Self::Eql => "==",
            Self::Neq => "!=",
            Self::Gtr => ">",
            Self::Lss => "<",
            Self::Gte => ">=",
            Self::Lte => "<=",
            Self::And => "and",
            Self::Or => "or",
            Self::Unless => "unless",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eql | Self::Neq | Self::Gtr | Self::Lss | Self::Gte | Self::Lte
        )
    }

    pub fn is_set_operator(self) -> bool {
        matches!(self, Self::And | Self::Or | Self::Unless)
    }

    /// Binding strength, higher binds tighter.
    pub fn precedence(self) -> u8 {
        match self {
            Self::Or => 1,
            Self::And | Self::Unless => 2,
            Self::Eql | Self::Neq | Self::Gtr | Self::Lss | Self::Gte | Self::Lte => 3,
            Self::Add | Self::Sub => 4,
            Self::Mul | Self::Div | Self::Mod | Self::Atan2 => 5,
            Self::Pow => 6,
        }
    }

    pub fn is_right_associative(self) -> bool {
        self == Self::Pow
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Cardinality {
    #[default]
    OneToOne,
    ManyToOne,
    OneToMany,
    ManyToMany,
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::OneToOne => "one-to-one",
            Self::ManyToOne => "many-to-one",
            Self::OneToMany => "one-to-many",
            Self::ManyToMany => "many-to-many",
        })
    }
}

/// How series from both sides of a binary operation are paired.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VectorMatching {
    pub card: Cardinality,
    /// Labels listed in `on(...)` or `ignoring(...)`.
    pub matching_labels: Vec<String>,
    /// True for `on(...)`, false for `ignoring(...)` or no clause at all.
    pub on: bool,
    /// Labels listed in `group_left(...)` or `group_right(...)`.
    pub include: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinaryExpr {
    pub op: BinaryOp,
    pub lhs: Box<Expr>,
    pub rhs: Box<Expr>,
    /// Present only when both sides are instant vectors.
    pub matching: Option<VectorMatching>,
    pub return_bool: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParenExpr {
    pub expr: Box<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Add,
    Sub,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnaryExpr {
    pub op: UnaryOp,
    pub expr: Box<Expr>,
    pub span: Span,
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Self::NumberLiteral(n) => n.span,
            Self::StringLiteral(n) => n.span,
            Self::VectorSelector(n) => n.span,
            Self::MatrixSelector(n) => n.span,
            Self::Subquery(n) => n.span,
            Self::Call(n) => n.span,
            Self::Aggregate(n) => n.span,
            Self::Binary(n) => n.span,
            Self::Paren(n) => n.span,
            Self::Unary(n) => n.span,
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Self::NumberLiteral(_) => ValueType::Scalar,
            Self::StringLiteral(_) => ValueType::String,
            Self::VectorSelector(_) | Self::Aggregate(_) => ValueType::Vector,
            Self::MatrixSelector(_) | Self::Subquery(_) => ValueType::Matrix,
            Self::Call(n) => n.func.return_type,
            Self::Binary(n) => {
                if n.lhs.value_type() == ValueType::Scalar
                    && n.rhs.value_type() == ValueType::Scalar
                {
                    ValueType::Scalar
                } else {
                    ValueType::Vector
                }
            }
            Self::Paren(n) => n.expr.value_type(),
            Self::Unary(n) => n.expr.value_type(),
        }
    }

    /// Direct child expressions, in source order.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Self::NumberLiteral(_)
            | Self::StringLiteral(_)
            | Self::VectorSelector(_)
            | Self::MatrixSelector(_) => Vec::new(),
            Self::Subquery(n) => vec![n.expr.as_ref()],
            Self::Call(n) => n.args.iter().collect(),
            Self::Aggregate(n) => {
                let mut out = Vec::with_capacity(2);
                if let Some(param) = &n.param {
                    out.push(param.as_ref());
                }
                out.push(n.expr.as_ref());
                out
            }
            Self::Binary(n) => vec![n.lhs.as_ref(), n.rhs.as_ref()],
            Self::Paren(n) => vec![n.expr.as_ref()],
            Self::Unary(n) => vec![n.expr.as_ref()],
        }
    }

    /// Name of the node kind, as shown in debug output.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::NumberLiteral(_) => "NumberLiteral",
            Self::StringLiteral(_) => "StringLiteral",
            Self::VectorSelector(_) => "VectorSelector",
            Self::MatrixSelector(_) => "MatrixSelector",
            Self::Subquery(_) => "SubqueryExpr",
            Self::Call(_) => "Call",
            Self::Aggregate(_) => "AggregateExpr",
            Self::Binary(_) => "BinaryExpr",
            Self::Paren(_) => "ParenExpr",
            Self::Unary(_) => "UnaryExpr",
        }
    }

    /// Strips any number of enclosing parentheses.
    pub fn unparen(&self) -> &Expr {
        let mut expr = self;
        while let Self::Paren(p) = expr {
            expr = &p.expr;
        }
        expr
    }

    /// Value of a string literal, looking through parentheses.
    pub fn string_value(&self) -> Option<&str> {
        match self.unparen() {
            Self::StringLiteral(s) => Some(&s.value),
            _ => None,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NumberLiteral(n) => f.write_str(&format_number(n.value)),
            Self::StringLiteral(s) => f.write_str(&quote(&s.value)),
            Self::VectorSelector(vs) => write!(f, "{vs}"),
            Self::MatrixSelector(ms) => {
                ms.selector.fmt_selector(f)?;
                write!(f, "[{}]", ms.range)?;
                fmt_modifiers(f, ms.selector.at, ms.selector.offset)
            }
            Self::Subquery(sq) => {
                write!(f, "{}[{}:", sq.expr, sq.range)?;
                if let Some(step) = sq.step {
                    write!(f, "{step}")?;
                }
                f.write_str("]")?;
                fmt_modifiers(f, sq.at, sq.offset)
            }
            Self::Call(c) => {
                write!(f, "{}(", c.func.name)?;
                for (i, arg) in c.args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
            Self::Aggregate(a) => {
                f.write_str(a.op.as_str())?;
                if a.without {
                    write!(f, " without ({}) ", a.grouping.join(", "))?;
                } else if !a.grouping.is_empty() {
                    write!(f, " by ({}) ", a.grouping.join(", "))?;
                }
                f.write_str("(")?;
                if let Some(param) = &a.param {
                    write!(f, "{param}, ")?;
                }
                write!(f, "{})", a.expr)
            }
            Self::Binary(b) => {
                write!(f, "{} {}", b.lhs, b.op)?;
                if b.return_bool {
                    f.write_str(" bool")?;
                }
                if let Some(vm) = &b.matching {
                    if !vm.matching_labels.is_empty() || vm.on {
                        let tag = if vm.on { "on" } else { "ignoring" };
                        write!(f, " {tag} ({})", vm.matching_labels.join(", "))?;
                        match vm.card {
                            Cardinality::ManyToOne => {
                                write!(f, " group_left ({})", vm.include.join(", "))?
                            }
                            Cardinality::OneToMany => {
                                write!(f, " group_right ({})", vm.include.join(", "))?
                            }
                            _ => {}
                        }
                    }
                }
                write!(f, " {}", b.rhs)
            }
            Self::Paren(p) => write!(f, "({})", p.expr),
            Self::Unary(u) => {
                let sign = match u.op {
                    UnaryOp::Add => "+",
                    UnaryOp::Sub => "-",
                };
                write!(f, "{sign}{}", u.expr)
            }
        }
    }
}

/// Formats a sample value the way PromQL prints it.
pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        value.to_string()
    }
}

/// Quotes a string as a double quoted PromQL string literal.
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
