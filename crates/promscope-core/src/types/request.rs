//! Request types for the PromQL analysis API.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::parser::DEFAULT_MAX_DEPTH;

/// A request to analyze a single PromQL query.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    /// The PromQL query to analyze
    pub query: String,

    /// Optional source name (file path or rule name) attached to every issue
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_name: Option<String>,

    /// Optional analysis options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<AnalysisOptions>,
}

impl AnalyzeRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            source_name: None,
            options: None,
        }
    }

    pub fn with_source_name(mut self, name: impl Into<String>) -> Self {
        self.source_name = Some(name.into());
        self
    }

    pub fn with_options(mut self, options: AnalysisOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Nesting limit in effect for this request.
    pub fn max_depth(&self) -> usize {
        self.options
            .as_ref()
            .and_then(|o| o.max_depth)
            .unwrap_or(DEFAULT_MAX_DEPTH)
    }
}

/// Options controlling analysis behavior.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOptions {
    /// Maximum expression nesting accepted by the parser and followed by the
    /// analyzer. Deeper sub-expressions are rejected by the parser.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<usize>,
}
