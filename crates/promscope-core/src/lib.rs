pub mod analyzer;
pub mod ast;
pub mod error;
pub mod extractors;
pub mod functions;
pub mod parser;
pub mod types;

// Re-export main types and functions
pub use analyzer::{
    analysis_schema, analyze, labels_source, DeadInfo, DeadLabel, DeadLabelKind, Join,
    LabelPromise, LabelTransform, Operation, OperationNode, ReturnInfo, Source, SourceKind,
    Unless,
};
pub use ast::{
    AggregateExpr, AggregateOp, AtModifier, BinaryExpr, BinaryOp, Call, Cardinality, Expr,
    LabelMatcher, MatchOp, MatrixSelector, NumberLiteral, ParenExpr, PromDuration, StringLiteral,
    SubqueryExpr, UnaryExpr, UnaryOp, ValueType, VectorMatching, VectorSelector,
};
pub use error::{ParseError, ParseErrorKind};
pub use extractors::{
    has_outer_absent, has_outer_aggregation, has_outer_binary_expr, has_outer_rate,
    has_outer_sum, has_vector_selector, remove_conditions,
};
pub use parser::{parse_promql, parse_promql_with_depth, DEFAULT_MAX_DEPTH};

// Re-export types explicitly
pub use types::{
    // Issue codes
    issue_codes,
    // Request types
    AnalysisOptions,
    AnalyzeRequest,
    // Response types
    AnalyzeResult,
    Issue,
    IssueCount,
    Severity,
    Span,
    Summary,
};
