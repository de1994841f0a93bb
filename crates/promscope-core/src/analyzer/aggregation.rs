use super::locate::{find_argument_position, find_func_name_position, find_func_position};
use super::source::{Source, SourceKind};
use super::Walker;
use crate::ast::{AggregateExpr, AggregateOp, Expr, ValueType, METRIC_NAME_LABEL};

impl<'a> Walker<'a> {
    pub(super) fn walk_aggregation(
        &self,
        expr: &Expr,
        n: &AggregateExpr,
        depth: usize,
    ) -> Vec<Source> {
        let args: Vec<String> = n.param.iter().map(|p| p.to_string()).collect();

        match n.op {
            AggregateOp::Topk | AggregateOp::Bottomk => self
                .walk(&n.expr, depth)
                .into_iter()
                .map(|src| {
                    let mut b = self.builder(src);
                    b.bump_join_depth();
                    b.src.kind = SourceKind::Aggregation;
                    b.push_operation(n.op.as_str(), expr, args.clone());
                    b.build()
                })
                .collect(),
            _ => self
                .aggregate(n, depth)
                .into_iter()
                .map(|src| {
                    let mut b = self.builder(src);
                    b.push_operation(n.op.as_str(), expr, args.clone());
                    if n.op == AggregateOp::CountValues {
                        // The parameter names the label holding the counted value.
                        if let Some(label) = n.param.as_ref().and_then(|p| p.string_value()) {
                            b.guarantee_labels(
                                "This label will be added to the results by the count_values() call.",
                                n.span,
                                [label],
                            );
                        }
                    }
                    if n.without || !n.grouping.iter().any(|g| g == METRIC_NAME_LABEL) {
                        b.exclude_label("Aggregation removes metric name.", n.span, METRIC_NAME_LABEL);
                    }
                    b.build()
                })
                .collect(),
        }
    }

    /// Applies the grouping of `n` to every source of its argument.
    fn aggregate(&self, n: &AggregateExpr, depth: usize) -> Vec<Source> {
        let inner = [n.expr.span()];
        let grouping = n.grouping.join(", ");

        self.walk(&n.expr, depth)
            .into_iter()
            .map(|src| {
                let mut b = self.builder(src);
                // sum(foo * bar) starts with foo joined to bar. After aggregating that
                // join is no longer direct.
                b.bump_join_depth();
                b.check_aggregation_labels(n);

                if n.without {
                    let clause = find_func_position(self.text, n.span, "without", &inner);
                    let reason = format!(
                        "Query is using aggregation with `without({grouping})`, all labels included inside `without(...)` will be removed from the results."
                    );
                    for name in &n.grouping {
                        let pos = find_argument_position(self.text, clause, name);
                        b.exclude_label(&reason, pos, name);
                    }
                } else if n.grouping.is_empty() {
                    let name_pos = find_func_name_position(self.text, n.span, n.op.as_str());
                    b.exclude_all_labels(
                        "Query is using aggregation that removes all labels.",
                        name_pos,
                        name_pos,
                        &[],
                    );
                } else {
                    let clause = find_func_position(self.text, n.span, "by", &inner);
                    b.append_used_labels(&n.grouping);
                    b.check_included_labels(clause, &n.grouping);
                    b.exclude_all_labels(
                        &format!(
                            "Query is using aggregation with `by({grouping})`, only labels included inside `by(...)` will be present on the results."
                        ),
                        clause,
                        find_func_name_position(self.text, clause, "by"),
                        &n.grouping,
                    );
                }

                b.src.kind = SourceKind::Aggregation;
                b.src.returns = ValueType::Vector;
                b.build()
            })
            .collect()
    }
}
