//! Structural queries over a parsed expression.
//!
//! These answer questions like "what is the outermost `rate()` call" without
//! running the label analysis.

use crate::ast::{
    AggregateExpr, AggregateOp, BinaryExpr, BinaryOp, Call, Cardinality, Expr, VectorSelector,
};

enum Visit<'a, T> {
    Found(&'a T),
    Stop,
    Descend,
}

/// Collects the outermost nodes accepted by `visit`.
///
/// Comparisons, `/`, `and` and `unless` only follow their left hand side since
/// the right hand side doesn't provide the returned values. `or` follows both.
/// With `follow_groups` set, `group_left` and `group_right` follow the "many" side.
fn collect_outer<'a, T, F>(expr: &'a Expr, follow_groups: bool, visit: &F, out: &mut Vec<&'a T>)
where
    F: Fn(&'a Expr) -> Visit<'a, T>,
{
    match visit(expr) {
        Visit::Found(node) => {
            out.push(node);
            return;
        }
        Visit::Stop => return,
        Visit::Descend => {}
    }

    if let Expr::Binary(n) = expr {
        if follow_groups {
            match n.matching.as_ref().map(|vm| vm.card) {
                Some(Cardinality::OneToMany) => {
                    return collect_outer(&n.rhs, follow_groups, visit, out)
                }
                Some(Cardinality::ManyToOne) => {
                    return collect_outer(&n.lhs, follow_groups, visit, out)
                }
                _ => {}
            }
        }
        if n.op.is_comparison() || matches!(n.op, BinaryOp::Div | BinaryOp::And | BinaryOp::Unless)
        {
            return collect_outer(&n.lhs, follow_groups, visit, out);
        }
    }

    for child in expr.children() {
        collect_outer(child, follow_groups, visit, out);
    }
}

fn outer<'a, T, F>(expr: &'a Expr, follow_groups: bool, visit: F) -> Vec<&'a T>
where
    F: Fn(&'a Expr) -> Visit<'a, T>,
{
    let mut out = Vec::new();
    collect_outer(expr, follow_groups, &visit, &mut out);
    out
}

/// Outermost aggregations, `topk` and `bottomk` excluded.
pub fn has_outer_aggregation(expr: &Expr) -> Vec<&AggregateExpr> {
    outer(expr, false, |e| match e {
        Expr::Aggregate(n) if !matches!(n.op, AggregateOp::Topk | AggregateOp::Bottomk) => {
            Visit::Found(n)
        }
        _ => Visit::Descend,
    })
}

/// Outermost `sum` aggregations. Counting makes any inner sum irrelevant.
pub fn has_outer_sum(expr: &Expr) -> Vec<&AggregateExpr> {
    outer(expr, true, |e| match e {
        Expr::Aggregate(n) => match n.op {
            AggregateOp::Sum => Visit::Found(n),
            AggregateOp::Count | AggregateOp::CountValues => Visit::Stop,
            _ => Visit::Descend,
        },
        _ => Visit::Descend,
    })
}

/// Outermost `rate`, `irate` and `deriv` calls.
pub fn has_outer_rate(expr: &Expr) -> Vec<&Call> {
    outer(expr, true, |e| match e {
        Expr::Call(n) => match n.func.name {
            "rate" | "irate" | "deriv" => Visit::Found(n),
            "ceil" | "floor" | "round" => Visit::Stop,
            _ => Visit::Descend,
        },
        Expr::Aggregate(n) if matches!(n.op, AggregateOp::Count | AggregateOp::CountValues) => {
            Visit::Stop
        }
        _ => Visit::Descend,
    })
}

/// Outermost `absent` calls.
pub fn has_outer_absent(expr: &Expr) -> Vec<&Call> {
    outer(expr, true, |e| match e {
        Expr::Call(n) if n.func.name == "absent" => Visit::Found(n),
        _ => Visit::Descend,
    })
}

/// First binary expression found walking the tree top-down.
pub fn has_outer_binary_expr(expr: &Expr) -> Option<&BinaryExpr> {
    if let Expr::Binary(n) = expr {
        return Some(n);
    }
    expr.children().into_iter().find_map(has_outer_binary_expr)
}

/// Every vector selector in the query, including those under range selectors.
pub fn has_vector_selector(expr: &Expr) -> Vec<&VectorSelector> {
    let mut out = Vec::new();
    collect_selectors(expr, &mut out);
    out
}

fn collect_selectors<'a>(expr: &'a Expr, out: &mut Vec<&'a VectorSelector>) {
    match expr {
        Expr::VectorSelector(n) => out.push(n),
        Expr::MatrixSelector(n) => out.push(&n.selector),
        _ => {
            for child in expr.children() {
                collect_selectors(child, out);
            }
        }
    }
}

/// Strips conditions from a query so it returns every series it would filter.
///
/// Scalar operands of binary expressions are removed, so `foo > 0` becomes
/// `foo`. Returns `None` when only scalars remain.
pub fn remove_conditions(expr: &Expr) -> Option<Expr> {
    match expr {
        Expr::Aggregate(n) => Some(Expr::Aggregate(AggregateExpr {
            expr: Box::new(remove_or_keep(&n.expr)),
            ..n.clone()
        })),
        Expr::Binary(n) => {
            let lhs = remove_conditions(&n.lhs).filter(|e| !is_number(e));
            let rhs = remove_conditions(&n.rhs).filter(|e| !is_number(e));
            match (lhs, rhs) {
                (None, None) => None,
                (Some(side), None) | (None, Some(side)) => Some(side),
                (Some(lhs), Some(rhs)) => Some(Expr::Binary(BinaryExpr {
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                    ..n.clone()
                })),
            }
        }
        Expr::Call(n) => {
            let args = n
                .args
                .iter()
                .enumerate()
                .map(|(i, arg)| {
                    if n.func.arg_type(i).is_vector_like() {
                        remove_or_keep(arg)
                    } else {
                        arg.clone()
                    }
                })
                .collect();
            Some(Expr::Call(Call { args, ..n.clone() }))
        }
        Expr::Subquery(n) => {
            let mut n = n.clone();
            n.expr = Box::new(remove_or_keep(&n.expr));
            Some(Expr::Subquery(n))
        }
        Expr::Paren(n) => {
            let inner = remove_conditions(&n.expr)?;
            match inner {
                Expr::NumberLiteral(_)
                | Expr::StringLiteral(_)
                | Expr::VectorSelector(_)
                | Expr::MatrixSelector(_) => Some(inner),
                _ => {
                    let mut n = n.clone();
                    n.expr = Box::new(inner);
                    Some(Expr::Paren(n))
                }
            }
        }
        Expr::Unary(n) => {
            let inner = remove_conditions(&n.expr)?;
            let mut n = n.clone();
            n.expr = Box::new(inner);
            Some(Expr::Unary(n))
        }
        Expr::NumberLiteral(_)
        | Expr::StringLiteral(_)
        | Expr::VectorSelector(_)
        | Expr::MatrixSelector(_) => Some(expr.clone()),
    }
}

fn remove_or_keep(expr: &Expr) -> Expr {
    remove_conditions(expr).unwrap_or_else(|| expr.clone())
}

fn is_number(expr: &Expr) -> bool {
    matches!(expr, Expr::NumberLiteral(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_promql;

    fn parse(text: &str) -> Expr {
        parse_promql(text).unwrap()
    }

    fn names(calls: Vec<&Call>) -> Vec<String> {
        calls.iter().map(|c| Expr::Call((*c).clone()).to_string()).collect()
    }

    #[test]
    fn test_has_outer_rate() {
        let cases: &[(&str, &[&str])] = &[
            ("foo", &[]),
            ("rate(foo[2m])", &["rate(foo[2m])"]),
            ("rate(foo[2m]) > 0", &["rate(foo[2m])"]),
            ("rate(foo[2m]) / sum(rate(bar[2m]))", &["rate(foo[2m])"]),
            ("sum(rate(foo[2m])) > 0", &["rate(foo[2m])"]),
            ("count(rate(foo[2m])) > 0", &[]),
            ("count_values(\"foo\", rate(foo[2m])) > 0", &[]),
            ("floor(rate(foo[2m])) > 0", &[]),
            ("rate(foo[2m]) or irate(foo[2m])", &["rate(foo[2m])", "irate(foo[2m])"]),
            ("rate(foo[2m]) * on() irate(foo[2m])", &["rate(foo[2m])", "irate(foo[2m])"]),
            (
                "sum(foo) without() * on() group_left(instance) sum(deriv(foo[2m]))",
                &[],
            ),
            (
                "sum(foo) without(job) * on() group_right(instance) sum(deriv(foo[2m]))",
                &["deriv(foo[2m])"],
            ),
            ("2 > foo", &[]),
            ("2 > rate(foo[2m])", &[]),
        ];
        for (text, expected) in cases {
            let expr = parse(text);
            assert_eq!(names(has_outer_rate(&expr)), *expected, "{text}");
        }
    }

    #[test]
    fn test_has_outer_absent() {
        let expr = parse("up == 0 or absent(foo{job=\"bar\"}) or absent(bar)");
        assert_eq!(
            names(has_outer_absent(&expr)),
            vec!["absent(foo{job=\"bar\"})", "absent(bar)"]
        );
        let expr = parse("vector(1) or absent(foo{job=\"bar\"}) AND on(job) bar");
        assert_eq!(names(has_outer_absent(&expr)), vec!["absent(foo{job=\"bar\"})"]);
    }

    #[test]
    fn test_has_outer_aggregation() {
        let expr = parse("1 + sum(foo)");
        let aggs = has_outer_aggregation(&expr);
        assert_eq!(aggs.len(), 1);
        assert_eq!(aggs[0].op, AggregateOp::Sum);

        let expr = parse("foo / on(bbb) sum(bar)");
        assert!(has_outer_aggregation(&expr).is_empty());

        let expr = parse("topk(5, max(foo) by (job))");
        let aggs = has_outer_aggregation(&expr);
        assert_eq!(aggs[0].op, AggregateOp::Max);
        assert_eq!(aggs[0].grouping, vec!["job"]);
    }

    #[test]
    fn test_has_outer_sum_stops_at_count() {
        assert!(has_outer_sum(&parse("count(sum(foo))")).is_empty());
        assert_eq!(has_outer_sum(&parse("sum(foo) > 1")).len(), 1);
    }

    #[test]
    fn test_has_outer_binary_expr() {
        assert!(has_outer_binary_expr(&parse("foo")).is_none());
        let expr = parse("(foo / bar)");
        assert_eq!(has_outer_binary_expr(&expr).unwrap().op, BinaryOp::Div);
        let expr = parse("sum(foo > 1)");
        assert_eq!(has_outer_binary_expr(&expr).unwrap().op, BinaryOp::Gtr);
    }

    #[test]
    fn test_has_vector_selector() {
        let expr = parse("rate(foo[5m]) / on(job) bar{job=\"a\"} + 1");
        let names: Vec<_> = has_vector_selector(&expr)
            .iter()
            .map(|vs| vs.name.clone().unwrap_or_default())
            .collect();
        assert_eq!(names, vec!["foo", "bar"]);
    }

    #[test]
    fn test_remove_conditions() {
        let cases: &[(&str, Option<&str>)] = &[
            ("100", Some("100")),
            ("(100)", Some("100")),
            ("100 ^ 2", None),
            ("(1024 ^ 2)", None),
            ("(100*(1024^2))", None),
            ("foo > 0", Some("foo")),
            (
                "min_over_time((foo_with_notfound > 0)[30m:1m]) / bar",
                Some("min_over_time(foo_with_notfound[30m:1m]) / bar"),
            ),
            (
                "min_over_time(rate(http_requests_total[5m])[30m:1m])",
                Some("min_over_time(rate(http_requests_total[5m])[30m:1m])"),
            ),
            (
                "(memory_bytes / ignoring(job) (memory_limit > 0)) * on(app_name) group_left(a,b,c) app_registry",
                Some("(memory_bytes / ignoring (job) memory_limit) * on (app_name) group_left (a, b, c) app_registry"),
            ),
            ("sum(foo > 5) by (job)", Some("sum by (job) (foo)")),
        ];
        for (text, expected) in cases {
            let out = remove_conditions(&parse(text)).map(|e| e.to_string());
            assert_eq!(out.as_deref(), *expected, "{text}");
        }
    }
}
