//! Binary operators and vector matching.

use super::builder::joined_label_conflicts;
use super::locate::{find_argument_position, find_func_position};
use super::returns::{both_known, calculate_static_return, check_conditions};
use super::source::{DeadInfo, Join, LabelPromise, Source, Unless};
use super::Walker;
use crate::ast::{BinaryExpr, BinaryOp, Cardinality, VectorMatching, METRIC_NAME_LABEL};
use crate::types::Span;

const VECTORS_REMOVE_NAME: &str = "Binary operation between two vectors removes metric names.";

impl<'a> Walker<'a> {
    pub(super) fn walk_binary(&self, n: &BinaryExpr, depth: usize) -> Vec<Source> {
        match &n.matching {
            None => self.walk_scalar_binary(n, depth),
            Some(vm) => match vm.card {
                Cardinality::OneToOne => self.walk_one_to_one(n, vm, depth),
                Cardinality::ManyToOne | Cardinality::OneToMany => {
                    self.walk_grouped(n, vm, depth)
                }
                Cardinality::ManyToMany => self.walk_set_operator(n, vm, depth),
            },
        }
    }

    /// `foo + 1`, `1 > foo`, `2 * 3`: at least one side is a scalar.
    fn walk_scalar_binary(&self, n: &BinaryExpr, depth: usize) -> Vec<Source> {
        let lhs = self.walk(&n.lhs, depth);
        let rhs = self.walk(&n.rhs, depth);
        // Comparisons without `bool` filter series and keep them as they are.
        let drops_name = !n.op.is_comparison() || n.return_bool;

        let mut sources = Vec::with_capacity(lhs.len().max(rhs.len()));
        let mut rhs_emitted = vec![false; rhs.len()];
        for mut ls in lhs {
            (ls.is_conditional, ls.return_info.is_return_bool) =
                check_conditions(&ls, n.op, n.return_bool);
            let mut lhs_emitted = false;
            for (i, rs) in rhs.iter().enumerate() {
                let from_lhs = ls.returns.is_vector_like() || !rs.returns.is_vector_like();
                let known = both_known(&ls, rs);
                // Unless both values fold, the other side adds nothing to the result
                // and every pairing would repeat it.
                if !known {
                    let emitted = if from_lhs {
                        &mut lhs_emitted
                    } else {
                        &mut rhs_emitted[i]
                    };
                    if *emitted {
                        continue;
                    }
                    *emitted = true;
                }

                let mut rs = rs.clone();
                (rs.is_conditional, rs.return_info.is_return_bool) =
                    check_conditions(&rs, n.op, n.return_bool);

                let mut side = if from_lhs { ls.clone() } else { rs.clone() };
                if known {
                    let (ret, dead) = calculate_static_return(self.text, &ls, &rs, n);
                    side.return_info = ret;
                    side.dead_info = dead;
                }
                if side.returns.is_vector_like() && drops_name {
                    let mut b = self.builder(side);
                    b.exclude_label("Binary operation removes metric names.", n.span, METRIC_NAME_LABEL);
                    side = b.build();
                }
                sources.push(side);
            }
        }
        sources
    }

    /// `foo + bar`, `foo * on(a) bar`, `foo / ignoring(a) bar`.
    fn walk_one_to_one(&self, n: &BinaryExpr, vm: &VectorMatching, depth: usize) -> Vec<Source> {
        let pos = n.span;
        let sides = [n.lhs.span(), n.rhs.span()];
        let labels = vm.matching_labels.join(", ");
        let rhs = self.walk(&n.rhs, depth);

        let mut sources = Vec::new();
        for ls in self.walk(&n.lhs, depth) {
            let mut b = self.builder(ls);
            if vm.on {
                b.append_used_labels(&vm.matching_labels);
                b.check_included_labels(pos, &vm.matching_labels);
                let clause = find_func_position(self.text, pos, "on", &sides);
                b.exclude_all_labels(
                    &format!(
                        "Query is using {} vector matching with `on({labels})`, only labels included inside `on(...)` will be present on the results.",
                        vm.card
                    ),
                    clause,
                    clause,
                    &vm.matching_labels,
                );
            } else {
                b.use_labels_not_excluded(&vm.matching_labels);
                let clause = find_func_position(self.text, pos, "ignoring", &sides);
                let reason = format!(
                    "Query is using {} vector matching with `ignoring({labels})`, all labels included inside `ignoring(...)` will be removed on the results.",
                    vm.card
                );
                for name in &vm.matching_labels {
                    let at = find_argument_position(self.text, clause, name);
                    b.exclude_label(&reason, at, name);
                }
                for rs in &rhs {
                    if !both_known(&b.src, rs) {
                        continue;
                    }
                    let (ret, dead) = calculate_static_return(self.text, &b.src, rs, n);
                    b.src.return_info = ret;
                    b.src.dead_info = dead;
                }
            }

            for rs in &rhs {
                let mut rs = rs.clone();
                let conflicts = joined_label_conflicts(self.text, &rs, n, vm, &rs);
                rs.dead_labels.extend(conflicts);
                if let Some(dead) = can_join(&b.src, &rs, vm) {
                    rs.dead_info = Some(dead);
                }
                b.src.joins.push(Join {
                    matching_labels: vm.matching_labels.clone(),
                    added_labels: Vec::new(),
                    src: rs,
                    op: n.op,
                    depth: 0,
                    is_on: vm.on,
                });
            }

            let conflicts = joined_label_conflicts(self.text, &b.src, n, vm, &b.src);
            b.src.dead_labels.extend(conflicts);
            b.exclude_label(VECTORS_REMOVE_NAME, pos, METRIC_NAME_LABEL);
            (b.src.is_conditional, b.src.return_info.is_return_bool) =
                check_conditions(&b.src, n.op, n.return_bool);
            sources.push(b.build());
        }
        sources
    }

    /// `foo * on(a) group_left(b) bar` and its `group_right` mirror image.
    fn walk_grouped(&self, n: &BinaryExpr, vm: &VectorMatching, depth: usize) -> Vec<Source> {
        let pos = n.span;
        let sides = [n.lhs.span(), n.rhs.span()];
        let (many_expr, one_expr, keyword) = if vm.card == Cardinality::OneToMany {
            (&n.rhs, &n.lhs, "group_right")
        } else {
            (&n.lhs, &n.rhs, "group_left")
        };
        let one = self.walk(one_expr, depth);
        let group_clause = find_func_position(self.text, pos, keyword, &sides);

        let mut sources = Vec::new();
        for many in self.walk(many_expr, depth) {
            let mut b = self.builder(many);
            b.join_labels(pos, keyword, &vm.include, &sides);
            if vm.on {
                b.append_used_labels(&vm.matching_labels);
                b.check_included_labels(pos, &vm.matching_labels);
                let clause = find_func_position(self.text, pos, "on", &sides);
                let reason = format!(
                    "Query is using {} vector matching with `on({})`, labels included inside `on(...)` will be present on the results.",
                    vm.card,
                    vm.matching_labels.join(", ")
                );
                for name in &vm.matching_labels {
                    b.include_label(&reason, clause, name);
                }
            } else {
                b.use_labels_not_excluded(&vm.matching_labels);
            }

            for os in &one {
                let mut ob = self.builder(os.clone());
                ob.check_included_labels(group_clause, &vm.include);
                let mut os = ob.build();

                let conflicts = joined_label_conflicts(self.text, &os, n, vm, &b.src);
                b.src.dead_labels.extend(conflicts);
                if let Some(dead) = can_join(&b.src, &os, vm) {
                    os.dead_info = Some(dead);
                }
                b.src.joins.push(Join {
                    matching_labels: vm.matching_labels.clone(),
                    added_labels: vm.include.clone(),
                    src: os,
                    op: n.op,
                    depth: 0,
                    is_on: vm.on,
                });
            }

            b.exclude_label(VECTORS_REMOVE_NAME, pos, METRIC_NAME_LABEL);
            (b.src.is_conditional, b.src.return_info.is_return_bool) =
                check_conditions(&b.src, n.op, n.return_bool);
            sources.push(b.build());
        }
        sources
    }

    /// `and`, `or` and `unless`.
    fn walk_set_operator(
        &self,
        n: &BinaryExpr,
        vm: &VectorMatching,
        depth: usize,
    ) -> Vec<Source> {
        let pos = n.span;
        let sides = [n.lhs.span(), n.rhs.span()];
        let rhs = self.walk(&n.rhs, depth);
        // Set when any left hand side result can be empty.
        let mut lhs_can_be_empty = false;

        let mut sources = Vec::new();
        for ls in self.walk(&n.lhs, depth) {
            let mut b = self.builder(ls);
            let mut rhs_conditional = false;

            // Matching labels only pick series here, they don't shape the result.
            if vm.on {
                b.append_used_labels(&vm.matching_labels);
                b.check_included_labels(pos, &vm.matching_labels);
                let clause = find_func_position(self.text, pos, "on", &sides);
                let reason = format!(
                    "Query is using {} vector matching with `on({})`, labels included inside `on(...)` will be present on the results if matched time series have them.",
                    vm.card,
                    vm.matching_labels.join(", ")
                );
                for name in &vm.matching_labels {
                    b.include_label(&reason, clause, name);
                }
            } else {
                b.use_labels_not_excluded(&vm.matching_labels);
            }
            if !b.src.return_info.always_returns || b.src.is_conditional {
                lhs_can_be_empty = true;
            }

            for rs in &rhs {
                let mut rs = rs.clone();
                let (is_conditional, _) = check_conditions(&rs, n.op, n.return_bool);
                rhs_conditional |= is_conditional;
                if let Some(dead) = can_join(&b.src, &rs, vm) {
                    rs.dead_info = Some(dead);
                }
                let conflicts = joined_label_conflicts(self.text, &rs, n, vm, &b.src);

                match n.op {
                    BinaryOp::Unless => {
                        if vm.on
                            && vm.matching_labels.is_empty()
                            && rs.return_info.always_returns
                            && !rs.is_conditional
                        {
                            b.src.dead_info = Some(DeadInfo {
                                reason: "This query will never return anything because the `unless` query always returns something.".to_string(),
                                fragment: rs.position,
                            });
                        }
                        b.src.unless.push(Unless {
                            matching_labels: vm.matching_labels.clone(),
                            src: rs,
                            is_on: vm.on,
                        });
                    }
                    BinaryOp::Or => {}
                    op => b.src.joins.push(Join {
                        matching_labels: vm.matching_labels.clone(),
                        added_labels: Vec::new(),
                        src: rs,
                        op,
                        depth: 0,
                        is_on: vm.on,
                    }),
                }
                b.src.dead_labels.extend(conflicts);
            }

            if n.op == BinaryOp::And && rhs_conditional {
                b.src.is_conditional = true;
            }
            sources.push(b.build());
        }

        if n.op == BinaryOp::Or {
            for mut rs in rhs {
                if !lhs_can_be_empty {
                    rs.dead_info = Some(DeadInfo {
                        reason: "The left hand side always returns something and so the right hand side is never used.".to_string(),
                        fragment: rs.position,
                    });
                }
                sources.push(rs);
            }
        }
        sources
    }
}

/// Checks that series from `rs` can ever be matched with series from `ls`.
///
/// Returns why the match is impossible, anchored where the missing label was
/// removed from `rs`.
fn can_join(ls: &Source, rs: &Source, vm: &VectorMatching) -> Option<DeadInfo> {
    let side = if vm.card == Cardinality::OneToMany {
        "left"
    } else {
        "right"
    };
    let dead = |name: &str, what: &str| {
        let (reason, fragment): (&str, Span) = rs.label_exclude_reason(name);
        DeadInfo {
            reason: format!(
                "The {side} hand side will never be matched because it doesn't have the `{name}` label {what}. {reason}"
            ),
            fragment,
        }
    };

    if vm.on {
        return vm
            .matching_labels
            .iter()
            .find(|name| ls.can_have_label(name) && !rs.can_have_label(name))
            .map(|name| dead(name, "from `on(...)`"));
    }

    ls.labels
        .iter()
        .filter(|(name, l)| {
            l.kind == LabelPromise::Guaranteed && !vm.matching_labels.contains(*name)
        })
        .find(|(name, _)| ls.can_have_label(name) && !rs.can_have_label(name))
        .map(|(name, _)| dead(name, "while the left hand side will"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expr;
    use crate::parser::parse_promql;

    fn sources(text: &str) -> Vec<Source> {
        let expr = parse_promql(text).unwrap();
        crate::labels_source(text, &expr)
    }

    fn matching(text: &str) -> VectorMatching {
        let Ok(Expr::Binary(n)) = parse_promql(text) else {
            panic!("expected a binary expression: {text}");
        };
        n.matching.unwrap()
    }

    #[test]
    fn test_can_join_on_missing_label() {
        // a left side without the label never blocks the match
        let text = "sum(foo) by (job) * on(instance) bar";
        let src = sources(text);
        assert!(src[0].joins()[0].src.dead_info().is_none());

        let text = "foo * on(instance) sum(bar) by (job)";
        let src = sources(text);
        let dead = src[0].joins()[0].src.dead_info().unwrap();
        assert!(dead.reason.starts_with(
            "The right hand side will never be matched because it doesn't have the `instance` label from `on(...)`."
        ));
        assert!(dead
            .reason
            .ends_with("only labels included inside `by(...)` will be present on the results."));
    }

    #[test]
    fn test_can_join_with_empty_on() {
        let text = "foo unless on() vector(1)";
        let vm = matching(text);
        let src = sources(text);
        assert!(can_join(&src[0], &src[0].unless()[0].src, &vm).is_none());
    }

    #[test]
    fn test_can_join_guaranteed_label() {
        let text = "foo{job=\"a\"} and sum(bar)";
        let src = sources(text);
        let dead = src[0].joins()[0].src.dead_info().unwrap();
        assert!(dead.reason.contains("doesn't have the `job` label while the left hand side will."));

        // ignored labels are not compared
        let text = "foo{job=\"a\"} and ignoring(job) sum(bar)";
        let src = sources(text);
        assert!(src[0].joins()[0].src.dead_info().is_none());
    }

    #[test]
    fn test_scalar_arithmetic_keeps_vector_side() {
        let src = sources("2 * foo{job=\"a\"}");
        assert_eq!(src.len(), 1);
        assert_eq!(src[0].labels()["job"].kind, LabelPromise::Guaranteed);
        assert!(!src[0].can_have_label(METRIC_NAME_LABEL));

        let src = sources("foo{job=\"a\"} > 5");
        assert!(src[0].can_have_label(METRIC_NAME_LABEL));
        assert!(src[0].is_conditional());
    }
}
