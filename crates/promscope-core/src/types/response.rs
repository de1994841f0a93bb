//! Response types for the PromQL analysis API.

use schemars::JsonSchema;
use serde::Serialize;

use super::common::{issue_codes, Issue, IssueCount, Span, Summary};
use crate::analyzer::Source;
use crate::error::ParseError;

/// The result of analyzing a PromQL query.
#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResult {
    /// One entry per alternative the query can return (`or` yields several)
    pub sources: Vec<Source>,

    /// Issues derived from the sources, plus any parse error
    pub issues: Vec<Issue>,

    /// Summary statistics
    pub summary: Summary,
}

impl AnalyzeResult {
    /// Builds a result for a query that could not be parsed.
    pub fn from_error(error: &ParseError, source_name: Option<&str>) -> Self {
        let mut issue = Issue::error(issue_codes::PARSE_ERROR, error.to_string());
        if let Some(span) = error.span {
            issue = issue.with_span(span);
        }
        if let Some(name) = source_name {
            issue = issue.with_source_name(name);
        }
        let issues = vec![issue];
        Self {
            sources: Vec::new(),
            summary: Summary {
                issue_count: IssueCount::from_issues(&issues),
                has_errors: true,
                ..Summary::default()
            },
            issues,
        }
    }

    /// Issues located inside the given span.
    pub fn issues_within(&self, span: Span) -> impl Iterator<Item = &Issue> {
        self.issues
            .iter()
            .filter(move |issue| issue.span.is_some_and(|s| span.contains(s)))
    }
}
