use rstest::rstest;

use super::*;
use crate::ast::{AggregateExpr, Call};
use crate::parser::parse_promql;
use crate::types::Span;

fn sources(text: &str) -> Vec<Source> {
    let expr = parse_promql(text).unwrap_or_else(|e| panic!("failed to parse {text}: {e}"));
    labels_source(text, &expr)
}

fn single(text: &str) -> Source {
    let mut src = sources(text);
    assert_eq!(src.len(), 1, "expected one source for {text}");
    src.remove(0)
}

fn kind(src: &Source, name: &str) -> Option<LabelPromise> {
    src.labels().get(name).map(|l| l.kind)
}

fn present(src: &Source) -> Vec<&str> {
    src.transformed_labels(&[LabelPromise::Possible, LabelPromise::Guaranteed])
}

#[rstest]
#[case("foo{job=\"a\"}", "job", Some(LabelPromise::Guaranteed))]
#[case("foo{job=~\"a|b\"}", "job", Some(LabelPromise::Guaranteed))]
#[case("foo{job!=\"a\"}", "job", None)]
#[case("foo{job!~\"a\"}", "job", None)]
#[case("foo{job=\"\"}", "job", Some(LabelPromise::Impossible))]
#[case("foo{job=\"a\"}", "__name__", None)]
fn selector_matchers(
    #[case] text: &str,
    #[case] name: &str,
    #[case] expected: Option<LabelPromise>,
) {
    let src = single(text);
    assert_eq!(src.kind(), SourceKind::Selector);
    assert!(!src.fixed_labels());
    assert_eq!(kind(&src, name), expected);
}

#[test]
fn empty_matcher_reason() {
    let src = single("foo{job=\"\"}");
    assert_eq!(
        src.label_exclude_reason("job"),
        (
            "Query uses `{job=\"\"}` selector which will filter out any time series with the `job` label set.",
            Span::new(0, 11)
        )
    );
}

#[test]
fn aggregation_without_grouping_removes_everything() {
    let src = single("sum(foo{job=\"a\"})");
    assert!(src.fixed_labels());
    assert!(present(&src).is_empty());
    assert_eq!(src.kind(), SourceKind::Aggregation);
    assert_eq!(src.operation(), "sum");
    assert_eq!(
        src.label_exclude_reason("instance"),
        ("Query is using aggregation that removes all labels.", Span::new(0, 3))
    );
    assert_eq!(
        src.label_exclude_reason("__name__").0,
        "Aggregation removes metric name."
    );
}

#[test]
fn aggregation_by_keeps_grouping() {
    let src = single("sum(foo{job=\"bar\"}) by (job)");
    assert!(src.fixed_labels());
    assert_eq!(kind(&src, "job"), Some(LabelPromise::Guaranteed));
    assert_eq!(present(&src), vec!["job"]);
    assert_eq!(src.used_labels(), ["job"]);

    let src = single("sum by (job, instance) (foo{job=\"bar\"})");
    assert_eq!(kind(&src, "instance"), Some(LabelPromise::Possible));
    assert!(!src.can_have_label("env"));
}

#[test]
fn aggregation_without_removes_listed() {
    let src = single("sum(foo{job=\"bar\"}) without (job)");
    assert!(!src.fixed_labels());
    assert_eq!(kind(&src, "job"), Some(LabelPromise::Impossible));
    assert!(src.can_have_label("instance"));
    assert!(!src.can_have_label("__name__"));
}

#[rstest]
#[case("topk(5, foo{job=\"a\"})", "topk")]
#[case("bottomk(5, foo{job=\"a\"})", "bottomk")]
fn topk_keeps_labels(#[case] text: &str, #[case] op: &str) {
    let src = single(text);
    assert!(!src.fixed_labels());
    assert_eq!(kind(&src, "job"), Some(LabelPromise::Guaranteed));
    assert!(src.can_have_label("__name__"));
    assert_eq!(src.kind(), SourceKind::Aggregation);
    assert_eq!(src.operation(), op);
    assert_eq!(src.operations().last().unwrap().arguments, vec!["5"]);
}

#[test]
fn count_values_adds_label() {
    let src = single("count_values(\"value\", foo)");
    assert!(src.fixed_labels());
    assert_eq!(kind(&src, "value"), Some(LabelPromise::Guaranteed));
    assert_eq!(present(&src), vec!["value"]);
}

#[test]
fn on_restricts_labels() {
    let src = single("foo{job=\"a\"} * on(instance) bar{instance=\"x\"}");
    assert!(src.fixed_labels());
    assert_eq!(present(&src), vec!["instance"]);
    assert_eq!(kind(&src, "job"), Some(LabelPromise::Impossible));
    assert_eq!(src.joins().len(), 1);
    assert!(src.joins()[0].is_on);
    assert_eq!(src.joins()[0].op, crate::BinaryOp::Mul);
}

#[test]
fn ignoring_removes_labels() {
    let src = single("foo{job=\"a\"} * ignoring(instance) bar");
    assert!(!src.fixed_labels());
    assert_eq!(kind(&src, "instance"), Some(LabelPromise::Impossible));
    assert!(src.can_have_label("job"));
    assert!(!src.can_have_label("__name__"));
    assert_eq!(
        src.label_exclude_reason("__name__").0,
        "Binary operation between two vectors removes metric names."
    );
}

#[test]
fn group_left_adds_labels() {
    let src = single(
        "foo{job=\"a\"} * on(instance) group_left(cluster) bar{instance=\"x\", cluster=\"c\"}",
    );
    assert_eq!(kind(&src, "cluster"), Some(LabelPromise::Possible));
    assert_eq!(kind(&src, "job"), Some(LabelPromise::Guaranteed));
    assert_eq!(src.joins().len(), 1);
    assert_eq!(src.joins()[0].added_labels, vec!["cluster"]);
    assert_eq!(src.joins()[0].depth, 0);
    assert!(src.dead_labels().is_empty());
}

#[test]
fn group_right_keeps_right_side() {
    let text = "foo * on(instance) group_right(cluster) bar{job=\"b\"}";
    let src = single(text);
    assert_eq!(kind(&src, "job"), Some(LabelPromise::Guaranteed));
    assert_eq!(kind(&src, "cluster"), Some(LabelPromise::Possible));
    assert_eq!(src.position().slice(text), Some("bar{job=\"b\"}"));
}

#[test]
fn group_left_duplicate_label() {
    let text = "foo{cluster=\"a\"} * on(instance) group_left(cluster) bar";
    let src = single(text);
    assert_eq!(src.dead_labels().len(), 1);
    let dead = &src.dead_labels()[0];
    assert_eq!(dead.kind, DeadLabelKind::DuplicatedJoin);
    assert_eq!(dead.name, "cluster");
    assert_eq!(
        dead.label_reason,
        "Query will only return series where these labels are present."
    );
    assert_eq!(dead.usage_fragment.slice(text), Some("cluster"));
    assert_eq!(kind(&src, "cluster"), Some(LabelPromise::Guaranteed));
}

#[test]
fn absent_closes_to_matchers() {
    let src = single("absent(foo{job=\"bar\", env!=\"dev\"})");
    assert!(src.fixed_labels());
    assert_eq!(kind(&src, "job"), Some(LabelPromise::Guaranteed));
    assert_eq!(present(&src), vec!["job"]);
    assert!(!src.can_have_label("env"));
    assert_eq!(src.kind(), SourceKind::Function);
    assert_eq!(src.operation(), "absent");
    let (reason, fragment) = src.label_exclude_reason("instance");
    assert!(reason.starts_with("The [absent()](https://prometheus.io/docs/prometheus/latest/querying/functions/#absent) function"));
    assert_eq!(fragment, Span::new(0, 6));
}

#[test]
fn label_replace_adds_destination() {
    let src = single("label_replace(foo, \"dst\", \"$1\", \"src\", \"(.*)\")");
    assert_eq!(kind(&src, "dst"), Some(LabelPromise::Guaranteed));
    assert_eq!(src.used_labels(), ["src"]);
    assert_eq!(
        src.operations().last().unwrap().arguments,
        vec!["\"dst\"", "\"$1\"", "\"src\"", "\"(.*)\""]
    );

    let src = single("label_join(foo, \"dst\", \",\", \"a\", \"b\")");
    assert_eq!(kind(&src, "dst"), Some(LabelPromise::Guaranteed));
    assert_eq!(src.used_labels(), ["a", "b"]);
}

#[rstest]
#[case("rate(foo{job=\"a\"}[5m])")]
#[case("abs(foo{job=\"a\"})")]
#[case("hour(foo{job=\"a\"})")]
#[case("histogram_quantile(0.9, foo{job=\"a\"})")]
#[case("clamp(foo{job=\"a\"}, 0, 1)")]
fn preserving_functions(#[case] text: &str) {
    let src = single(text);
    assert_eq!(kind(&src, "job"), Some(LabelPromise::Guaranteed));
    assert!(!src.fixed_labels());
    assert_eq!(src.returns(), ValueType::Vector);
    assert_eq!(src.kind(), SourceKind::Function);
}

#[rstest]
#[case("abs(sum(foo{job=\"a\"}))")]
#[case("round(sum by (instance) (foo{job=\"a\"}))")]
#[case("abs(foo{job=\"a\"} * on(instance) bar)")]
#[case("rate(sum(foo{job=\"a\"})[5m:])")]
fn preserving_functions_keep_removed_labels(#[case] text: &str) {
    let src = single(text);
    assert!(src.fixed_labels());
    assert_eq!(kind(&src, "job"), Some(LabelPromise::Impossible));
    assert!(!src.can_have_label("job"));
    assert_ne!(
        src.label_exclude_reason("job").0,
        "Query will only return series where these labels are present."
    );
}

#[test]
fn preserving_function_keeps_exclusion_reason() {
    let src = single("abs(sum(foo{job=\"a\"}))");
    assert_eq!(
        src.label_exclude_reason("job"),
        (
            "Query is using aggregation that removes all labels.",
            Span::new(4, 7)
        )
    );
}

#[test]
fn grouping_by_label_removed_inside_function() {
    let src = single("sum(abs(sum(foo{job=\"a\"}))) by (job)");
    assert!(src
        .dead_labels()
        .iter()
        .any(|d| d.kind == DeadLabelKind::ImpossibleLabel));
    assert_eq!(kind(&src, "job"), Some(LabelPromise::Impossible));
}

#[rstest]
#[case("vector(1)", ValueType::Vector)]
#[case("scalar(foo)", ValueType::Scalar)]
#[case("time()", ValueType::Scalar)]
#[case("pi()", ValueType::Scalar)]
#[case("hour()", ValueType::Vector)]
fn label_clearing_functions(#[case] text: &str, #[case] returns: ValueType) {
    let src = single(text);
    assert!(src.fixed_labels());
    assert!(present(&src).is_empty());
    assert!(src.return_info().always_returns);
    assert_eq!(src.returns(), returns);
}

#[test]
fn unsupported_function_is_unknown() {
    assert_eq!(single("info(foo)"), Source::default());
}

#[test]
fn most_outer_operation_finds_nodes() {
    let src = single("sum(rate(foo[5m]))");
    assert_eq!(src.operation(), "sum");
    let call = src.most_outer_operation::<Call>().unwrap();
    assert_eq!(call.func.name, "rate");
    let selector = src.most_outer_operation::<VectorSelector>().unwrap();
    assert_eq!(selector.name.as_deref(), Some("foo"));
    assert!(src.most_outer_operation::<AggregateExpr>().is_some());
    assert!(single("foo").most_outer_operation::<Call>().is_none());
}

#[rstest]
#[case("5 > 10", "`5 > 10` always evaluates to `5 > 10` which is not possible, so it will never return anything.")]
#[case("(2 + 3) > 10", "`2 + 3 > 10` always evaluates to `5 > 10` which is not possible, so it will never return anything.")]
#[case("-1 > 0", "`-1 > 0` always evaluates to `-1 > 0` which is not possible, so it will never return anything.")]
#[case("1 > bool 2", "`1 > 2` always evaluates to `1 > 2` and uses the `bool` modifier which means it will always return 0")]
#[case("vector(1) > 2", "`vector(1) > 2` always evaluates to `1 > 2` which is not possible, so it will never return anything.")]
#[case("pi() > 4", "`pi() > 4` always evaluates to `3.141592653589793 > 4` which is not possible, so it will never return anything.")]
fn static_comparison_is_dead(#[case] text: &str, #[case] reason: &str) {
    let src = single(text);
    assert_eq!(src.dead_info().map(|d| d.reason.as_str()), Some(reason));
}

#[rstest]
#[case("5 > 1")]
#[case("2 == 2")]
#[case("foo > 10")]
#[case("vector(1) > 0")]
fn static_comparison_is_live(#[case] text: &str) {
    assert!(single(text).dead_info().is_none());
}

#[test]
fn comparison_with_bool() {
    let src = single("foo > bool 5");
    assert!(src.is_conditional());
    assert!(src.return_info().is_return_bool);
    assert!(!src.can_have_label("__name__"));

    let src = single("foo > 5");
    assert!(src.is_conditional());
    assert!(!src.return_info().is_return_bool);
    assert!(src.can_have_label("__name__"));
}

#[test]
fn or_with_always_returning_left_side() {
    let src = sources("vector(1) or foo");
    assert_eq!(src.len(), 2);
    assert!(src[0].dead_info().is_none());
    let dead = src[1].dead_info().unwrap();
    assert_eq!(
        dead.reason,
        "The left hand side always returns something and so the right hand side is never used."
    );
    assert_eq!(dead.fragment, Span::new(13, 16));

    let src = sources("foo or bar or baz");
    assert_eq!(src.len(), 3);
    assert!(src.iter().all(|s| s.dead_info().is_none()));
    assert!(src.iter().all(|s| s.joins().is_empty()));
}

#[test]
fn unless_always_returning() {
    let src = single("foo unless on() vector(1)");
    let dead = src.dead_info().unwrap();
    assert_eq!(
        dead.reason,
        "This query will never return anything because the `unless` query always returns something."
    );
    assert_eq!(dead.fragment, Span::new(16, 25));
    assert_eq!(src.unless().len(), 1);
    assert!(src.joins().is_empty());

    let src = single("foo unless bar");
    assert!(src.dead_info().is_none());
    assert_eq!(src.unless().len(), 1);
}

#[test]
fn and_with_conditional_right_side() {
    let src = single("foo and bar > 5");
    assert!(src.is_conditional());
    assert_eq!(src.joins().len(), 1);
    assert_eq!(src.joins()[0].op, crate::BinaryOp::And);

    let src = single("foo and on(job) bar");
    assert!(!src.is_conditional());
    assert_eq!(kind(&src, "job"), Some(LabelPromise::Possible));
    assert_eq!(src.used_labels(), ["job"]);
}

#[test]
fn aggregation_drops_joined_label() {
    let text = "sum(foo * on(instance) group_left(cluster) bar) by (job)";
    let src = single(text);
    assert_eq!(src.joins()[0].depth, 1);
    let dead: Vec<&DeadLabel> = src
        .dead_labels()
        .iter()
        .filter(|d| d.kind == DeadLabelKind::UnusedLabel)
        .collect();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].name, "cluster");
    assert_eq!(
        dead[0].reason,
        "Previously joined label `cluster` is being removed from the results."
    );

    // kept by the grouping
    let src = single("sum(foo * on(instance) group_left(cluster) bar) by (cluster)");
    assert!(src
        .dead_labels()
        .iter()
        .all(|d| d.kind != DeadLabelKind::UnusedLabel));
}

#[test]
fn grouping_by_impossible_label() {
    let text = "sum(sum(foo) by (job)) by (instance)";
    let src = single(text);
    assert_eq!(src.dead_labels().len(), 1);
    let dead = &src.dead_labels()[0];
    assert_eq!(dead.kind, DeadLabelKind::ImpossibleLabel);
    assert_eq!(
        dead.reason,
        "You can't use `instance` because this label is not possible here."
    );
    assert_eq!(
        dead.label_reason,
        "Query is using aggregation with `by(job)`, only labels included inside `by(...)` will be present on the results."
    );
    assert_eq!(dead.usage_fragment, Span::new(27, 35));
}

#[test]
fn binary_operation_orphans_joined_label() {
    let text = "(foo * on(instance) group_left(cluster) bar) * on(instance) baz";
    let src = single(text);
    let dead: Vec<&DeadLabel> = src
        .dead_labels()
        .iter()
        .filter(|d| d.kind == DeadLabelKind::OrphanedLabel)
        .collect();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].name, "cluster");
    assert_eq!(dead[0].usage_fragment.slice(text), Some("*"));
    assert_eq!(dead[0].usage_fragment.start, 45);
}

#[test]
fn walk_sources_visits_nested() {
    let src = single("foo and on(job) (bar unless baz)");
    let mut visited = Vec::new();
    src.walk_sources(&mut |s, join, unless| {
        let name = s
            .most_outer_operation::<VectorSelector>()
            .and_then(|vs| vs.name.clone())
            .unwrap_or_default();
        visited.push((name, join.is_some(), unless.is_some()));
    });
    assert_eq!(
        visited,
        vec![
            ("foo".to_string(), false, false),
            ("bar".to_string(), true, false),
            ("baz".to_string(), false, true),
        ]
    );
}

#[test]
fn analysis_is_idempotent() {
    let text = "sum(rate(foo{job=\"a\"}[5m])) by (job) / on(job) group_left(team) max(bar) by (job, team) or vector(0)";
    let expr = parse_promql(text).unwrap();
    assert_eq!(labels_source(text, &expr), labels_source(text, &expr));
}

#[test]
fn depth_limit_degrades_to_unknown() {
    let text = "((foo))";
    let expr = parse_promql(text).unwrap();
    assert_eq!(
        labels_source_with_depth(text, &expr, 1),
        vec![Source::default()]
    );
    assert_eq!(
        labels_source_with_depth(text, &expr, 2)[0].kind(),
        SourceKind::Selector
    );
}

#[test]
fn subquery_and_matrix_return_matrix() {
    assert_eq!(single("foo[5m]").returns(), ValueType::Matrix);
    assert_eq!(single("rate(foo[5m])[30m:1m]").returns(), ValueType::Matrix);
    assert_eq!(single("(foo)").returns(), ValueType::Vector);
}

#[test]
fn analyze_reports_issues() {
    let result = analyze(&AnalyzeRequest::new("foo or vector(1) > 5").with_source_name("rules.yml"));
    assert_eq!(result.summary.source_count, 2);
    assert_eq!(result.summary.dead_code_count, 1);
    assert_eq!(result.issues.len(), 1);
    let issue = &result.issues[0];
    assert_eq!(issue.code, crate::issue_codes::DEAD_CODE);
    assert_eq!(issue.source_name.as_deref(), Some("rules.yml"));
    assert!(!result.summary.has_errors);
}

#[test]
fn analyze_reports_parse_errors() {
    let result = analyze(&AnalyzeRequest::new("sum(foo"));
    assert!(result.summary.has_errors);
    assert!(result.sources.is_empty());
    assert_eq!(result.issues[0].code, crate::issue_codes::PARSE_ERROR);
}

#[test]
fn schema_lists_request_and_result() {
    let schema = analysis_schema();
    assert!(schema.get("AnalyzeRequest").is_some());
    assert!(schema.get("AnalyzeResult").is_some());
}

#[test]
fn scalar_alternatives_do_not_multiply() {
    let text = vec!["scalar(foo or bar)"; 16].join(" + ");
    let src = sources(&text);
    assert_eq!(src.len(), 2);
    assert!(src.iter().all(|s| s.returns() == ValueType::Scalar));
}

#[rstest]
#[case("(foo or bar) + scalar(baz or qux)", 2)]
#[case("scalar(baz or qux) * (foo or bar)", 2)]
#[case("1 > (foo or bar)", 2)]
#[case("(vector(1) or vector(2)) > 1", 2)]
fn scalar_binary_keeps_one_source_per_vector(#[case] text: &str, #[case] expected: usize) {
    let src = sources(text);
    assert_eq!(src.len(), expected);
    assert!(src.iter().all(|s| s.returns() == ValueType::Vector));
}

#[rstest]
#[case("topk(3, foo * on(instance) bar)")]
#[case("bottomk(3, foo * on(instance) bar)")]
fn topk_moves_joins_one_level_away(#[case] text: &str) {
    let src = single(text);
    assert_eq!(src.joins().len(), 1);
    assert_eq!(src.joins()[0].depth, 1);
    assert_eq!(kind(&src, "instance"), Some(LabelPromise::Possible));
}
