use promscope_core::{
    has_outer_absent, has_outer_aggregation, has_outer_binary_expr, has_outer_rate,
    has_outer_sum, has_vector_selector, labels_source, parse_promql, remove_conditions,
    AggregateOp, BinaryOp, Expr,
};
use rstest::rstest;

fn parse(text: &str) -> Expr {
    parse_promql(text).expect("query should parse")
}

#[test]
fn alert_condition_can_be_stripped_and_reparsed() {
    let alert = parse("sum(rate(errors_total{job=\"api\"}[5m])) by (job) > 0.1");
    let stripped = remove_conditions(&alert).expect("a vector is left");
    let text = stripped.to_string();
    assert_eq!(text, "sum by (job) (rate(errors_total{job=\"api\"}[5m]))");

    // printed queries parse back to the same tree
    assert_eq!(parse(&text).to_string(), text);
    let src = labels_source(&text, &parse(&text));
    assert!(!src[0].is_conditional());
}

#[test]
fn scalar_only_queries_have_nothing_to_strip() {
    assert!(remove_conditions(&parse("2 * 3")).is_none());
    assert!(remove_conditions(&parse("(1 + 1) > 1")).is_none());
}

#[rstest]
#[case("sum(rate(foo[5m])) by (job)", &["rate"])]
#[case("irate(foo[1m]) or deriv(bar[10m])", &["irate", "deriv"])]
#[case("round(rate(foo[5m]))", &[])]
#[case("rate(foo[5m]) / rate(bar[5m])", &["rate"])]
#[case("1 - rate(foo[5m])", &["rate"])]
fn outer_rate_calls(#[case] text: &str, #[case] expected: &[&str]) {
    let expr = parse(text);
    let found: Vec<&str> = has_outer_rate(&expr).iter().map(|c| c.func.name).collect();
    assert_eq!(found, expected);
}

#[rstest]
#[case("sum(foo)", 1)]
#[case("sum(foo) / sum(bar)", 1)]
#[case("sum(foo) + sum(bar)", 2)]
#[case("max(sum(foo) by (job))", 1)]
#[case("count(sum(foo) by (job))", 0)]
#[case("sum(foo) > 10", 1)]
fn outer_sum(#[case] text: &str, #[case] count: usize) {
    assert_eq!(has_outer_sum(&parse(text)).len(), count);
}

#[test]
fn outer_aggregation_looks_past_topk() {
    let expr = parse("bottomk(3, avg(foo) without (instance))");
    let aggs = has_outer_aggregation(&expr);
    assert_eq!(aggs.len(), 1);
    assert_eq!(aggs[0].op, AggregateOp::Avg);
    assert!(aggs[0].without);
}

#[test]
fn outer_absent_ignores_the_right_hand_side_of_and() {
    let expr = parse("absent(foo) and on() vector(1)");
    assert_eq!(has_outer_absent(&expr).len(), 1);
    let expr = parse("vector(1) and on() absent(foo)");
    assert!(has_outer_absent(&expr).is_empty());
}

#[test]
fn outer_binary_expr_and_selectors() {
    let expr = parse("max_over_time((foo - bar offset 1h)[1h:])");
    let bin = has_outer_binary_expr(&expr).expect("binary expression");
    assert_eq!(bin.op, BinaryOp::Sub);

    let selectors: Vec<String> = has_vector_selector(&expr)
        .iter()
        .filter_map(|vs| vs.name.clone())
        .collect();
    assert_eq!(selectors, vec!["foo", "bar"]);
}
