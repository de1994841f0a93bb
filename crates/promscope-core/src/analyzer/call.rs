use std::f64::consts::PI;

#[cfg(feature = "tracing")]
use tracing::debug;

use super::builder::SourceBuilder;
use super::locate::{find_func_name_position, find_func_position};
use super::source::{Source, SourceKind};
use super::{labels_from_selector, Walker};
use crate::ast::{Call, Expr, MatchOp, ValueType, VectorSelector};
use crate::functions::LabelRule;

const GUARANTEED_BY_SELECTOR: &str =
    "Query will only return series where these labels are present.";

impl<'a> Walker<'a> {
    pub(super) fn walk_call(&self, expr: &Expr, n: &Call, depth: usize) -> Vec<Source> {
        let mut args: Vec<String> = Vec::new();
        let mut exprs: Vec<&Expr> = Vec::new();
        for (i, arg) in n.args.iter().enumerate() {
            if n.func.arg_type(i).is_vector_like() {
                exprs.push(arg);
            } else {
                args.push(arg.to_string());
            }
        }

        let mut sources = Vec::new();
        for arg in exprs {
            for src in self.walk(arg, depth) {
                let mut b = self.builder(src);
                b.src.kind = SourceKind::Function;
                b.push_operation(n.func.name, expr, args.clone());
                b.src.position = arg.span();
                sources.push(self.apply_function(b, n, depth));
            }
        }

        if sources.is_empty() {
            let mut b = self.builder(Source {
                kind: SourceKind::Function,
                position: n.span,
                ..Default::default()
            });
            b.push_operation(n.func.name, expr, args);
            sources.push(self.apply_function(b, n, depth));
        }
        sources
    }

    /// Applies the label rule of the called function to one of its input sources.
    fn apply_function(&self, mut b: SourceBuilder<'a>, n: &Call, depth: usize) -> Source {
        let name = n.func.name;
        match n.func.labels {
            LabelRule::Preserve => {
                b.src.returns = ValueType::Vector;
                guarantee_selector_labels(&mut b, n);
            }
            LabelRule::Passthrough => {
                b.src.returns = ValueType::Vector;
                // sort_by_label(v, "a", "b") reads the labels it sorts by
                let sort_labels: Vec<String> = n
                    .args
                    .iter()
                    .skip(1)
                    .filter_map(|arg| arg.string_value().map(str::to_string))
                    .collect();
                b.append_used_labels(&sort_labels);
            }
            LabelRule::DateTime => {
                b.src.returns = ValueType::Vector;
                if n.args.is_empty() {
                    b.src.return_info.always_returns = true;
                    b.exclude_all_labels(
                        &format!(
                            "Calling `{name}()` with no arguments will return an empty time series with no labels."
                        ),
                        n.span,
                        n.span,
                        &[],
                    );
                } else {
                    guarantee_selector_labels(&mut b, n);
                }
            }
            LabelRule::Absent => {
                b.src.returns = ValueType::Vector;
                let names = labels_from_selector(
                    b.src.most_outer_operation::<VectorSelector>(),
                    &[MatchOp::Equal],
                );
                let name_pos = find_func_name_position(self.text, n.span, name);
                b.exclude_all_labels(
                    &format!(
                        "The [{name}()](https://prometheus.io/docs/prometheus/latest/querying/functions/#{name}) function is used to check if provided query doesn't match any time series.\n\
                         You will only get any results back if the metric selector you pass doesn't match anything.\n\
                         Since there are no matching time series there are also no labels. If some time series is missing you cannot read its labels.\n\
                         This means that the only labels you can get back from absent call are the ones you pass to it.\n\
                         If you're hoping to get instance specific labels this way and alert when some target is down then that won't work, use the `up` metric instead."
                    ),
                    name_pos,
                    name_pos,
                    &names,
                );
                b.guarantee_labels(
                    &format!(
                        "All labels passed to {name}() call will be present on the results if the query doesn't match anything."
                    ),
                    n.span,
                    &names,
                );
            }
            LabelRule::LabelJoin | LabelRule::LabelReplace => {
                b.src.returns = ValueType::Vector;
                let strings: Vec<Option<&str>> = n.args.iter().map(Expr::string_value).collect();
                if let Some(Some(dst)) = strings.get(1) {
                    b.guarantee_labels(
                        &format!("This label will be added to the result by {name}() call."),
                        n.span,
                        [dst],
                    );
                }
                // label_join reads every label from the 4th argument on,
                // label_replace only the 4th one.
                let read = if n.func.labels == LabelRule::LabelJoin {
                    strings.len()
                } else {
                    4
                };
                let used: Vec<String> = strings
                    .iter()
                    .take(read)
                    .skip(3)
                    .flatten()
                    .map(|s| s.to_string())
                    .collect();
                b.append_used_labels(&used);
            }
            LabelRule::Pi | LabelRule::Time => {
                b.src.returns = ValueType::Scalar;
                b.src.return_info.always_returns = true;
                b.src.return_info.value_position = n.span;
                if n.func.labels == LabelRule::Pi {
                    b.src.return_info.known_return = true;
                    b.src.return_info.returned_number = PI;
                }
                b.exclude_all_labels(
                    &format!("Calling `{name}()` will return a scalar value with no labels."),
                    n.span,
                    n.span,
                    &[],
                );
            }
            LabelRule::Scalar => {
                b.src.returns = ValueType::Scalar;
                b.src.return_info.always_returns = true;
                let pos = find_func_position(self.text, n.span, name, &[]);
                b.exclude_all_labels(
                    &format!("Calling `{name}()` will return a scalar value with no labels."),
                    pos,
                    pos,
                    &[],
                );
            }
            LabelRule::Vector => {
                b.src.returns = ValueType::Vector;
                b.src.return_info.always_returns = true;
                b.src.return_info.value_position = n.span;
                if let Some(arg) = n.args.first() {
                    for inner in self.walk(arg, depth) {
                        if inner.return_info.known_return {
                            b.src.return_info.returned_number = inner.return_info.returned_number;
                            b.src.return_info.known_return = true;
                        }
                    }
                }
                let name_pos = find_func_name_position(self.text, n.span, name);
                b.exclude_all_labels(
                    &format!("Calling `{name}()` will return a vector value with no labels."),
                    name_pos,
                    name_pos,
                    &[],
                );
            }
            LabelRule::Unsupported => {
                #[cfg(feature = "tracing")]
                debug!(function = name, "function is not modelled, result is unknown");
                return Source::default();
            }
        }
        b.build()
    }
}

fn guarantee_selector_labels(b: &mut SourceBuilder<'_>, n: &Call) {
    // Labels removed after the selector stay removed.
    let names: Vec<String> = labels_from_selector(
        b.src.most_outer_operation::<VectorSelector>(),
        &[MatchOp::Equal, MatchOp::Regex],
    )
    .into_iter()
    .filter(|name| b.src.can_have_label(name))
    .collect();
    b.guarantee_labels(GUARANTEED_BY_SELECTOR, n.span, names);
}
