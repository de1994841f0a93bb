//! Label provenance and dead code analysis.
//!
//! [`labels_source`] walks a parsed query bottom-up and produces a [`Source`] for
//! every result the query can return. Each source records which labels are
//! guaranteed, possible or impossible on the results, what other sources it is
//! joined with and whether its value is statically known.

use schemars::generate::SchemaSettings;
use serde_json::json;
#[cfg(feature = "tracing")]
use tracing::{debug, info_span};

use crate::ast::{Expr, MatchOp, UnaryOp, ValueType, VectorSelector, METRIC_NAME_LABEL};
use crate::parser::{parse_promql_with_depth, DEFAULT_MAX_DEPTH};
use crate::types::{AnalyzeRequest, AnalyzeResult};

mod aggregation;
mod binary;
mod builder;
mod call;
mod issues;
mod locate;
mod returns;
mod source;
#[cfg(test)]
mod tests;

use builder::SourceBuilder;
pub use locate::{find_argument_position, find_func_name_position, find_func_position};
pub use source::{
    DeadInfo, DeadLabel, DeadLabelKind, Join, LabelPromise, LabelTransform, Operation,
    OperationNode, ReturnInfo, Source, SourceKind, Unless,
};

/// Analyzes a parsed query. `text` must be the text `expr` was parsed from.
pub fn labels_source(text: &str, expr: &Expr) -> Vec<Source> {
    labels_source_with_depth(text, expr, DEFAULT_MAX_DEPTH)
}

/// Like [`labels_source`], but sub-expressions nested deeper than `max_depth`
/// produce an unknown source instead of being analyzed.
pub fn labels_source_with_depth(text: &str, expr: &Expr, max_depth: usize) -> Vec<Source> {
    Walker { text, max_depth }.walk(expr, 0)
}

/// Parses and analyzes a query, turning every finding into an [`crate::Issue`].
pub fn analyze(request: &AnalyzeRequest) -> AnalyzeResult {
    #[cfg(feature = "tracing")]
    let _span = info_span!(
        "analyze_request",
        source = request.source_name.as_deref().unwrap_or("inline"),
        query_len = request.query.len()
    )
    .entered();

    let max_depth = request.max_depth();
    let source_name = request.source_name.as_deref();
    match parse_promql_with_depth(&request.query, max_depth) {
        Ok(expr) => {
            let sources = labels_source_with_depth(&request.query, &expr, max_depth);
            issues::build_result(sources, source_name)
        }
        Err(err) => AnalyzeResult::from_error(&err, source_name),
    }
}

/// JSON schema (draft 7) of the request and response types.
pub fn analysis_schema() -> serde_json::Value {
    let generator = SchemaSettings::draft07().into_generator();
    json!({
        "AnalyzeRequest": generator.clone().into_root_schema_for::<AnalyzeRequest>(),
        "AnalyzeResult": generator.into_root_schema_for::<AnalyzeResult>(),
    })
}

pub(super) struct Walker<'a> {
    pub(super) text: &'a str,
    pub(super) max_depth: usize,
}

impl<'a> Walker<'a> {
    pub(super) fn builder(&self, src: Source) -> SourceBuilder<'a> {
        SourceBuilder::new(self.text, src)
    }

    pub(super) fn walk(&self, expr: &Expr, depth: usize) -> Vec<Source> {
        if depth > self.max_depth {
            #[cfg(feature = "tracing")]
            debug!(
                max_depth = self.max_depth,
                kind = expr.kind_name(),
                "query nesting limit reached, skipping subtree"
            );
            return vec![Source::default()];
        }
        let depth = depth + 1;

        match expr {
            Expr::Aggregate(n) => self.walk_aggregation(expr, n, depth),
            Expr::Binary(n) => self.walk_binary(n, depth),
            Expr::Call(n) => self.walk_call(expr, n, depth),
            Expr::MatrixSelector(n) => {
                let node = Expr::VectorSelector(n.selector.clone());
                let mut src = self.walk_selector(&node, &n.selector);
                src.returns = ValueType::Matrix;
                vec![src]
            }
            Expr::Subquery(n) => self
                .walk(&n.expr, depth)
                .into_iter()
                .map(|mut src| {
                    src.returns = ValueType::Matrix;
                    src
                })
                .collect(),
            Expr::NumberLiteral(n) => {
                let mut b = self.builder(Source {
                    kind: SourceKind::Number,
                    returns: ValueType::Scalar,
                    position: n.span,
                    ..Default::default()
                });
                b.src.return_info = ReturnInfo {
                    value_position: n.span,
                    returned_number: n.value,
                    always_returns: true,
                    known_return: true,
                    ..Default::default()
                };
                b.exclude_all_labels(
                    "This query returns a number value with no labels.",
                    n.span,
                    n.span,
                    &[],
                );
                vec![b.build()]
            }
            Expr::StringLiteral(n) => {
                let mut b = self.builder(Source {
                    kind: SourceKind::String,
                    returns: ValueType::String,
                    position: n.span,
                    ..Default::default()
                });
                b.src.return_info.always_returns = true;
                b.exclude_all_labels(
                    "This query returns a string value with no labels.",
                    n.span,
                    n.span,
                    &[],
                );
                vec![b.build()]
            }
            Expr::Paren(n) => self.walk(&n.expr, depth),
            Expr::Unary(n) => {
                let mut sources = self.walk(&n.expr, depth);
                if n.op == UnaryOp::Sub {
                    for src in sources.iter_mut().filter(|s| s.return_info.known_return) {
                        let desc = returns::describe(self.text, src);
                        src.return_info.logical_expr = format!("-{desc}");
                        src.return_info.returned_number = -src.return_info.returned_number;
                    }
                }
                sources
            }
            Expr::VectorSelector(n) => vec![self.walk_selector(expr, n)],
        }
    }

    fn walk_selector(&self, node: &Expr, n: &VectorSelector) -> Source {
        let mut b = self.builder(Source {
            kind: SourceKind::Selector,
            returns: ValueType::Vector,
            position: n.span,
            ..Default::default()
        });
        b.push_operation("", node, Vec::new());
        b.guarantee_labels(
            "Query will only return series where these labels are present.",
            n.span,
            labels_from_selector(Some(n), &[MatchOp::Equal, MatchOp::Regex]),
        );
        for name in labels_with_empty_value(n) {
            b.exclude_label(
                &format!(
                    "Query uses `{{{name}=\"\"}}` selector which will filter out any time series with the `{name}` label set."
                ),
                n.span,
                &name,
            );
        }
        b.build()
    }
}

/// Labels matched with one of `ops`, in matcher order and without the metric name.
pub(super) fn labels_from_selector(
    selector: Option<&VectorSelector>,
    ops: &[MatchOp],
) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let Some(selector) = selector else {
        return names;
    };
    for m in &selector.matchers {
        if m.name == METRIC_NAME_LABEL || !ops.contains(&m.op) {
            continue;
        }
        if !names.contains(&m.name) {
            names.push(m.name.clone());
        }
    }
    names
}

fn labels_with_empty_value(selector: &VectorSelector) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for m in &selector.matchers {
        if m.name != METRIC_NAME_LABEL
            && m.op == MatchOp::Equal
            && m.value.is_empty()
            && !names.contains(&m.name)
        {
            names.push(m.name.clone());
        }
    }
    names
}
