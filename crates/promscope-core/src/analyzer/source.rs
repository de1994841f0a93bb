//! Analysis results for a single query sub-expression.

use std::collections::BTreeMap;
use std::fmt;

use schemars::JsonSchema;
use serde::{Serialize, Serializer};

use crate::ast::{
    AggregateExpr, BinaryExpr, BinaryOp, Call, Expr, MatrixSelector, SubqueryExpr, ValueType,
    VectorSelector,
};
use crate::types::{issue_codes, Span};

/// What is known about the presence of a label on query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum LabelPromise {
    /// The label can never be present.
    Impossible,
    /// The label may be present.
    Possible,
    /// Every returned series has the label.
    Guaranteed,
}

/// A label classification along with the reason for it.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LabelTransform {
    pub reason: String,
    pub kind: LabelPromise,
    /// Part of the query responsible for this classification.
    pub fragment: Span,
}

/// Explains why a sub-expression can never contribute to the final result.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeadInfo {
    pub reason: String,
    pub fragment: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum DeadLabelKind {
    /// Label is used where it cannot be present.
    ImpossibleLabel,
    /// Joined label is dropped by a later binary operation.
    OrphanedLabel,
    /// Label is joined while already present on the other side.
    DuplicatedJoin,
    /// Joined label is removed by a later aggregation.
    UnusedLabel,
}

impl DeadLabelKind {
    /// Issue code used when this problem is reported.
    pub fn issue_code(self) -> &'static str {
        match self {
            Self::ImpossibleLabel => issue_codes::IMPOSSIBLE_LABEL,
            Self::OrphanedLabel => issue_codes::ORPHANED_LABEL,
            Self::DuplicatedJoin => issue_codes::REDUNDANT_JOIN,
            Self::UnusedLabel => issue_codes::UNUSED_LABEL,
        }
    }
}

impl fmt::Display for DeadLabelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ImpossibleLabel => "impossible label",
            Self::OrphanedLabel => "orphaned label",
            Self::DuplicatedJoin => "redundant label",
            Self::UnusedLabel => "unused label",
        })
    }
}

/// A problem with how a label is used.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeadLabel {
    pub name: String,
    pub reason: String,
    /// Why the label is, or isn't, present.
    pub label_reason: String,
    /// Where the label is used.
    pub usage_fragment: Span,
    /// Where the label presence was established.
    pub label_fragment: Span,
    pub kind: DeadLabelKind,
}

/// Static value tracking.
#[derive(Debug, Clone, Default, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReturnInfo {
    /// Textual form of a folded constant expression, empty for plain literals.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub logical_expr: String,
    pub value_position: Span,
    /// Only meaningful when `known_return` is set.
    pub returned_number: f64,
    /// True if this source always returns results.
    pub always_returns: bool,
    /// True if the returned value is known statically.
    pub known_return: bool,
    /// True if this source uses the `bool` modifier.
    pub is_return_bool: bool,
}

/// One step that produced a source, innermost first.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct Operation {
    #[serde(rename = "node", serialize_with = "serialize_node")]
    #[schemars(with = "String")]
    pub node: Expr,
    #[serde(rename = "op")]
    pub operation: String,
    #[serde(rename = "args", skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<String>,
}

fn serialize_node<S: Serializer>(node: &Expr, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&format_args!("[{}] {}", node.kind_name(), node))
}

fn serialize_op<S: Serializer>(op: &BinaryOp, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(op)
}

/// A source combined with another one through a vector binary operation.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Join {
    pub matching_labels: Vec<String>,
    /// Labels copied from `src` through `group_left(...)` or `group_right(...)`.
    pub added_labels: Vec<String>,
    /// The source we are joining with.
    pub src: Source,
    #[serde(serialize_with = "serialize_op")]
    #[schemars(with = "String")]
    pub op: BinaryOp,
    /// Zero for a direct join, bumped by every enclosing aggregation.
    pub depth: usize,
    pub is_on: bool,
}

/// A source suppressing another one through `unless`.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Unless {
    pub matching_labels: Vec<String>,
    pub src: Source,
    pub is_on: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Unknown,
    Number,
    String,
    Selector,
    Function,
    Aggregation,
}

/// Label provenance and static value of one query sub-expression.
///
/// Sources are immutable once returned by [`crate::labels_source`]. A label with
/// no entry in [`Source::labels`] is unknown: it can be present unless
/// [`Source::fixed_labels`] is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub(crate) labels: BTreeMap<String, LabelTransform>,
    /// Applies to every label without its own entry, set when the label set is closed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) others: Option<LabelTransform>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) dead_info: Option<DeadInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub(crate) dead_labels: Vec<DeadLabel>,
    pub(crate) returns: ValueType,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub(crate) operations: Vec<Operation>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub(crate) joins: Vec<Join>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub(crate) unless: Vec<Unless>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub(crate) used_labels: Vec<String>,
    pub(crate) return_info: ReturnInfo,
    pub(crate) position: Span,
    pub(crate) kind: SourceKind,
    pub(crate) fixed_labels: bool,
    pub(crate) is_conditional: bool,
}

/// AST node types that can be looked up with [`Source::most_outer_operation`].
pub trait OperationNode {
    fn from_expr(expr: &Expr) -> Option<&Self>;
}

macro_rules! operation_node {
    ($ty:ty, $variant:ident) => {
        impl OperationNode for $ty {
            fn from_expr(expr: &Expr) -> Option<&Self> {
                match expr {
                    Expr::$variant(node) => Some(node),
                    _ => None,
                }
            }
        }
    };
}

operation_node!(VectorSelector, VectorSelector);
operation_node!(MatrixSelector, MatrixSelector);
operation_node!(SubqueryExpr, Subquery);
operation_node!(Call, Call);
operation_node!(AggregateExpr, Aggregate);
operation_node!(BinaryExpr, Binary);

impl Source {
    pub fn labels(&self) -> &BTreeMap<String, LabelTransform> {
        &self.labels
    }

    /// Transform applied to every label without its own entry.
    pub fn others(&self) -> Option<&LabelTransform> {
        self.others.as_ref()
    }

    pub fn dead_info(&self) -> Option<&DeadInfo> {
        self.dead_info.as_ref()
    }

    pub fn dead_labels(&self) -> &[DeadLabel] {
        &self.dead_labels
    }

    pub fn returns(&self) -> ValueType {
        self.returns
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    pub fn unless(&self) -> &[Unless] {
        &self.unless
    }

    /// Labels referenced by grouping or vector matching clauses.
    pub fn used_labels(&self) -> &[String] {
        &self.used_labels
    }

    pub fn return_info(&self) -> &ReturnInfo {
        &self.return_info
    }

    pub fn position(&self) -> Span {
        self.position
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    /// True once only explicitly classified labels can be present.
    pub fn fixed_labels(&self) -> bool {
        self.fixed_labels
    }

    /// True if results are filtered by a comparison, like `foo > 5`.
    pub fn is_conditional(&self) -> bool {
        self.is_conditional
    }

    /// Name of the outermost operation, empty for plain selectors and literals.
    pub fn operation(&self) -> &str {
        self.operations
            .last()
            .map(|op| op.operation.as_str())
            .unwrap_or_default()
    }

    pub fn can_have_label(&self, name: &str) -> bool {
        match self.labels.get(name).map(|l| l.kind) {
            Some(LabelPromise::Impossible) => false,
            Some(LabelPromise::Possible | LabelPromise::Guaranteed) => true,
            None => !self.fixed_labels,
        }
    }

    /// Names of labels classified as any of `kinds`, sorted.
    pub fn transformed_labels(&self, kinds: &[LabelPromise]) -> Vec<&str> {
        self.labels
            .iter()
            .filter(|(_, l)| kinds.contains(&l.kind))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Why `name` cannot be present, falling back to the reason every other
    /// label was removed.
    pub fn label_exclude_reason(&self, name: &str) -> (&str, Span) {
        match self.labels.get(name) {
            Some(l) if l.kind == LabelPromise::Impossible => (&l.reason, l.fragment),
            _ => self
                .others
                .as_ref()
                .map(|l| (l.reason.as_str(), l.fragment))
                .unwrap_or_default(),
        }
    }

    /// The most recent operation whose node is a `T`.
    pub fn most_outer_operation<T: OperationNode>(&self) -> Option<&T> {
        self.operations
            .iter()
            .rev()
            .find_map(|op| T::from_expr(&op.node))
    }

    /// Visits this source and, depth-first, every joined or suppressing source.
    pub fn walk_sources<F>(&self, visitor: &mut F)
    where
        F: FnMut(&Source, Option<&Join>, Option<&Unless>),
    {
        visitor(self, None, None);
        self.walk_nested(visitor);
    }

    fn walk_nested<F>(&self, visitor: &mut F)
    where
        F: FnMut(&Source, Option<&Join>, Option<&Unless>),
    {
        for join in &self.joins {
            visitor(&join.src, Some(join), None);
            join.src.walk_nested(visitor);
        }
        for unless in &self.unless {
            visitor(&unless.src, None, Some(unless));
            unless.src.walk_nested(visitor);
        }
    }

    /// Looks up a label transform here, then in joined sources.
    pub(crate) fn find_label_transform(&self, name: &str) -> Option<&LabelTransform> {
        self.labels.get(name).or_else(|| {
            self.joins
                .iter()
                .find_map(|j| j.src.find_label_transform(name))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transform(kind: LabelPromise, reason: &str) -> LabelTransform {
        LabelTransform {
            reason: reason.to_string(),
            kind,
            fragment: Span::new(1, 2),
        }
    }

    #[test]
    fn test_can_have_label_open_world() {
        let mut src = Source::default();
        src.labels
            .insert("job".into(), transform(LabelPromise::Impossible, "gone"));
        assert!(!src.can_have_label("job"));
        assert!(src.can_have_label("instance"));

        src.fixed_labels = true;
        assert!(!src.can_have_label("instance"));
        src.labels
            .insert("instance".into(), transform(LabelPromise::Possible, "kept"));
        assert!(src.can_have_label("instance"));
    }

    #[test]
    fn test_label_exclude_reason_falls_back_to_others() {
        let mut src = Source::default();
        assert_eq!(src.label_exclude_reason("job"), ("", Span::default()));

        src.others = Some(transform(LabelPromise::Impossible, "all removed"));
        src.labels
            .insert("job".into(), transform(LabelPromise::Guaranteed, "selected"));
        assert_eq!(src.label_exclude_reason("job"), ("all removed", Span::new(1, 2)));
    }

    #[test]
    fn test_transformed_labels_is_sorted() {
        let mut src = Source::default();
        for (name, kind) in [
            ("b", LabelPromise::Guaranteed),
            ("a", LabelPromise::Guaranteed),
            ("c", LabelPromise::Impossible),
        ] {
            src.labels.insert(name.into(), transform(kind, ""));
        }
        assert_eq!(
            src.transformed_labels(&[LabelPromise::Guaranteed]),
            vec!["a", "b"]
        );
        assert!(src.transformed_labels(&[]).is_empty());
    }

    #[test]
    fn test_dead_label_kind_names() {
        assert_eq!(DeadLabelKind::DuplicatedJoin.to_string(), "redundant label");
        assert_eq!(
            DeadLabelKind::OrphanedLabel.issue_code(),
            issue_codes::ORPHANED_LABEL
        );
    }

    #[test]
    fn test_walk_sources_visits_nested() {
        let inner = Source {
            kind: SourceKind::Number,
            ..Default::default()
        };
        let joined = Source {
            kind: SourceKind::Selector,
            unless: vec![Unless {
                matching_labels: vec![],
                src: inner,
                is_on: false,
            }],
            ..Default::default()
        };
        let root = Source {
            joins: vec![Join {
                matching_labels: vec![],
                added_labels: vec![],
                src: joined,
                op: BinaryOp::Mul,
                depth: 0,
                is_on: false,
            }],
            ..Default::default()
        };

        let mut seen = Vec::new();
        root.walk_sources(&mut |s, j, u| seen.push((s.kind, j.is_some(), u.is_some())));
        assert_eq!(
            seen,
            vec![
                (SourceKind::Unknown, false, false),
                (SourceKind::Selector, true, false),
                (SourceKind::Number, false, true),
            ]
        );
    }
}
