//! Turns analysis findings into user facing issues.

use std::collections::HashSet;

use super::source::Source;
use crate::types::{issue_codes, AnalyzeResult, Issue, IssueCount, Span, Summary};

pub(crate) fn build_result(sources: Vec<Source>, source_name: Option<&str>) -> AnalyzeResult {
    let mut issues: Vec<Issue> = Vec::new();
    let mut seen: HashSet<(String, String, Option<Span>)> = HashSet::new();
    let mut join_count = 0;
    let mut dead_code_count = 0;
    let mut dead_label_count = 0;

    // The same nested source shows up once per `or` alternative.
    let mut push = |issue: Issue| {
        let key = (issue.code.clone(), issue.message.clone(), issue.span);
        if seen.insert(key) {
            issues.push(issue);
        }
    };

    for src in &sources {
        src.walk_sources(&mut |s, join, _| {
            if join.is_some() {
                join_count += 1;
            }
            if let Some(dead) = s.dead_info() {
                dead_code_count += 1;
                push(Issue::warning(issue_codes::DEAD_CODE, &dead.reason).with_span(dead.fragment));
            }
            for label in s.dead_labels() {
                dead_label_count += 1;
                let message = if label.label_reason.is_empty() {
                    label.reason.clone()
                } else {
                    format!("{} {}", label.reason, label.label_reason)
                };
                push(
                    Issue::warning(label.kind.issue_code(), message)
                        .with_span(label.usage_fragment)
                        .with_related_span(label.label_fragment),
                );
            }
        });
    }

    if let Some(name) = source_name {
        issues = issues
            .into_iter()
            .map(|issue| issue.with_source_name(name))
            .collect();
    }

    let issue_count = IssueCount::from_issues(&issues);
    AnalyzeResult {
        summary: Summary {
            source_count: sources.len(),
            join_count,
            dead_code_count,
            dead_label_count,
            has_errors: issue_count.errors > 0,
            issue_count,
        },
        sources,
        issues,
    }
}
