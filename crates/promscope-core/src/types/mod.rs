//! Types for the PromQL analysis API.
//!
//! This module defines the request and response types for the promscope analysis API.
//! The API accepts a PromQL query and returns the label provenance of every
//! source the query reads, plus the issues derived from it.

mod common;
mod request;
mod response;

// Re-export all public types
pub use common::{issue_codes, Issue, IssueCount, Severity, Span, Summary};
pub use request::{AnalysisOptions, AnalyzeRequest};
pub use response::AnalyzeResult;
