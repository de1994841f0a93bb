//! Mutable label store used while a [`Source`] is being assembled.
//!
//! The walker thaws child sources into a [`SourceBuilder`], applies label
//! transforms and freezes the result with [`SourceBuilder::build`] before handing it
//! to the parent node.

use super::locate::{
    find_argument_position, find_bin_op_position, find_func_name_position, find_func_position,
};
use super::source::{DeadLabel, DeadLabelKind, LabelPromise, LabelTransform, Operation, Source};
use crate::ast::{AggregateExpr, BinaryExpr, Expr, VectorMatching};
use crate::types::Span;

pub(crate) struct SourceBuilder<'a> {
    text: &'a str,
    pub(crate) src: Source,
}

impl<'a> SourceBuilder<'a> {
    pub(crate) fn new(text: &'a str, src: Source) -> Self {
        Self { text, src }
    }

    pub(crate) fn build(self) -> Source {
        self.src
    }

    fn set(&mut self, name: &str, kind: LabelPromise, reason: impl Into<String>, fragment: Span) {
        self.src.labels.insert(
            name.to_string(),
            LabelTransform {
                reason: reason.into(),
                kind,
                fragment,
            },
        );
    }

    fn is_guaranteed(&self, name: &str) -> bool {
        self.src
            .labels
            .get(name)
            .is_some_and(|l| l.kind == LabelPromise::Guaranteed)
    }

    /// Closes the label set: only `except` labels can remain.
    pub(crate) fn exclude_all_labels(
        &mut self,
        reason: &str,
        fragment: Span,
        all_fragment: Span,
        except: &[String],
    ) {
        // Labels that were present need an explicit stamp to mark them as gone.
        for (name, label) in self.src.labels.iter_mut() {
            if except.contains(name) || label.kind == LabelPromise::Impossible {
                continue;
            }
            *label = LabelTransform {
                reason: reason.to_string(),
                kind: LabelPromise::Impossible,
                fragment,
            };
        }
        self.src.used_labels.retain(|name| except.contains(name));
        self.append_used_labels(except);

        for name in except {
            if self.is_guaranteed(name) {
                continue;
            }
            if self.src.can_have_label(name) {
                let pos = find_argument_position(self.text, fragment, name);
                self.set(name, LabelPromise::Possible, reason, pos);
            } else {
                let (why, pos) = self.src.label_exclude_reason(name);
                let why = why.to_string();
                self.set(name, LabelPromise::Impossible, why, pos);
            }
        }

        self.src.others = Some(LabelTransform {
            reason: reason.to_string(),
            kind: LabelPromise::Impossible,
            fragment: all_fragment,
        });
        self.src.fixed_labels = true;
    }

    pub(crate) fn exclude_label(&mut self, reason: &str, fragment: Span, name: &str) {
        self.set(name, LabelPromise::Impossible, reason, fragment);
        self.src.used_labels.retain(|used| used != name);
    }

    /// Marks `name` as possible unless it is already guaranteed.
    pub(crate) fn include_label(&mut self, reason: &str, fragment: Span, name: &str) {
        if self.is_guaranteed(name) {
            return;
        }
        let pos = find_argument_position(self.text, fragment, name);
        self.set(name, LabelPromise::Possible, reason, pos);
    }

    pub(crate) fn guarantee_labels<I, S>(&mut self, reason: &str, fragment: Span, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            self.set(name.as_ref(), LabelPromise::Guaranteed, reason, fragment);
        }
    }

    /// Adds labels copied from the other side by `group_left(...)` or `group_right(...)`.
    pub(crate) fn join_labels(
        &mut self,
        within: Span,
        keyword: &str,
        names: &[String],
        outside: &[Span],
    ) {
        let clause = find_func_position(self.text, within, keyword, outside);
        for name in names {
            let usage = find_argument_position(self.text, clause, name);
            if let Some(existing) = self
                .src
                .labels
                .get(name)
                .filter(|l| l.kind == LabelPromise::Guaranteed)
            {
                let dead = DeadLabel {
                    name: name.clone(),
                    reason: format!(
                        "Query is trying to join the `{name}` label that is already present on the other side of the query."
                    ),
                    label_reason: existing.reason.clone(),
                    usage_fragment: usage,
                    label_fragment: existing.fragment,
                    kind: DeadLabelKind::DuplicatedJoin,
                };
                self.src.dead_labels.push(dead);
                continue;
            }
            let reason = format!(
                "Query is using `{keyword}({})`, all labels included inside `{keyword}(...)` will be joined to the results on the other side of the query.",
                names.join(", ")
            );
            self.set(name, LabelPromise::Possible, reason, usage);
        }
    }

    /// Reports every label in `names` that cannot be present.
    pub(crate) fn check_included_labels(&mut self, pos: Span, names: &[String]) {
        for name in names {
            if self.src.can_have_label(name) {
                continue;
            }
            let (label_reason, label_fragment) = self.src.label_exclude_reason(name);
            let dead = DeadLabel {
                name: name.clone(),
                reason: format!(
                    "You can't use `{name}` because this label is not possible here."
                ),
                label_reason: label_reason.to_string(),
                usage_fragment: find_argument_position(self.text, pos, name),
                label_fragment,
                kind: DeadLabelKind::ImpossibleLabel,
            };
            self.src.dead_labels.push(dead);
        }
    }

    /// Reports previously joined labels that the aggregation `n` removes.
    pub(crate) fn check_aggregation_labels(&mut self, n: &AggregateExpr) {
        let inner = [n.expr.span()];
        let pos = if n.grouping.is_empty() {
            find_func_name_position(self.text, n.span, n.op.as_str())
        } else if n.without {
            find_func_position(self.text, n.span, "without", &inner)
        } else {
            find_func_position(self.text, n.span, "by", &inner)
        };

        let mut dead = Vec::new();
        for join in &self.src.joins {
            for name in &join.added_labels {
                if self.src.used_labels.contains(name) {
                    continue;
                }
                if n.grouping.contains(name) != n.without {
                    // kept by by(...), or not listed in without(...)
                    continue;
                }
                let (label_reason, label_fragment) = self
                    .src
                    .find_label_transform(name)
                    .map(|t| (t.reason.clone(), t.fragment))
                    .unwrap_or_else(|| (String::new(), pos));
                dead.push(DeadLabel {
                    name: name.clone(),
                    reason: format!(
                        "Previously joined label `{name}` is being removed from the results."
                    ),
                    label_reason,
                    usage_fragment: find_argument_position(self.text, pos, name),
                    label_fragment,
                    kind: DeadLabelKind::UnusedLabel,
                });
            }
        }
        self.src.dead_labels.extend(dead);
    }

    /// Marks every label that isn't excluded, or listed in `excluded`, as used.
    pub(crate) fn use_labels_not_excluded(&mut self, excluded: &[String]) {
        let names: Vec<String> = self
            .src
            .labels
            .iter()
            .filter(|(name, l)| l.kind != LabelPromise::Impossible && !excluded.contains(name))
            .map(|(name, _)| name.clone())
            .collect();
        self.append_used_labels(&names);
    }

    pub(crate) fn append_used_labels(&mut self, names: &[String]) {
        append_unique(&mut self.src.used_labels, names);
    }

    /// Joins below an aggregation are no longer direct.
    pub(crate) fn bump_join_depth(&mut self) {
        for join in &mut self.src.joins {
            join.depth += 1;
        }
    }

    pub(crate) fn push_operation(&mut self, operation: &str, node: &Expr, arguments: Vec<String>) {
        self.src.operations.push(Operation {
            node: node.clone(),
            operation: operation.to_string(),
            arguments,
        });
    }
}

pub(crate) fn append_unique(dst: &mut Vec<String>, values: &[String]) {
    for value in values {
        if !dst.contains(value) {
            dst.push(value.clone());
        }
    }
}

/// Labels joined into `src` that the binary operation `n` does not carry over.
///
/// Transforms explaining where the label came from are looked up in `dst`.
pub(crate) fn joined_label_conflicts(
    text: &str,
    src: &Source,
    n: &BinaryExpr,
    matching: &VectorMatching,
    dst: &Source,
) -> Vec<DeadLabel> {
    let pos = find_bin_op_position(text, n);
    let mut dead = Vec::new();
    for join in &src.joins {
        for name in &join.added_labels {
            if matching.include.contains(name) {
                continue;
            }
            if matching.matching_labels.contains(name) == matching.on {
                // kept by on(...) or not listed in ignoring(...)
                continue;
            }
            let (label_reason, label_fragment) = dst
                .find_label_transform(name)
                .map(|t| (t.reason.clone(), t.fragment))
                .unwrap_or_else(|| (String::new(), pos));
            dead.push(DeadLabel {
                name: name.clone(),
                reason: format!(
                    "This binary operation prevents previously joined label `{name}` from being added to the results."
                ),
                label_reason,
                usage_fragment: pos,
                label_fragment,
                kind: DeadLabelKind::OrphanedLabel,
            });
        }
    }
    dead
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn builder(text: &str) -> SourceBuilder<'_> {
        SourceBuilder::new(text, Source::default())
    }

    #[test]
    fn test_exclude_all_labels_keeps_except() {
        let text = "sum(foo) by (job)";
        let mut b = builder(text);
        b.guarantee_labels("selected", Span::new(4, 7), ["instance"]);
        b.exclude_all_labels("grouped", Span::new(9, 17), Span::new(9, 11), &names(&["job"]));
        let src = b.build();

        assert!(src.fixed_labels());
        assert_eq!(src.labels()["instance"].kind, LabelPromise::Impossible);
        assert_eq!(src.labels()["job"].kind, LabelPromise::Possible);
        assert_eq!(src.labels()["job"].fragment, Span::new(13, 16));
        assert_eq!(src.label_exclude_reason("env"), ("grouped", Span::new(9, 11)));
        assert_eq!(src.used_labels(), ["job"]);
    }

    #[test]
    fn test_exclude_all_labels_keeps_guarantees() {
        let mut b = builder("");
        b.guarantee_labels("selected", Span::default(), ["job"]);
        b.exclude_all_labels("grouped", Span::default(), Span::default(), &names(&["job"]));
        assert_eq!(b.src.labels["job"].kind, LabelPromise::Guaranteed);
    }

    #[test]
    fn test_exclude_all_labels_twice_keeps_impossible_reason() {
        let mut b = builder("");
        b.exclude_all_labels("first", Span::new(0, 1), Span::new(0, 1), &[]);
        b.exclude_all_labels("second", Span::new(2, 3), Span::new(2, 3), &names(&["job"]));
        let job = &b.src.labels["job"];
        assert_eq!(job.kind, LabelPromise::Impossible);
        assert_eq!(job.reason, "first");
    }

    #[test]
    fn test_include_label_does_not_demote() {
        let mut b = builder("");
        b.guarantee_labels("selected", Span::default(), ["job"]);
        b.include_label("matched", Span::default(), "job");
        b.include_label("matched", Span::default(), "env");
        assert_eq!(b.src.labels["job"].kind, LabelPromise::Guaranteed);
        assert_eq!(b.src.labels["env"].kind, LabelPromise::Possible);
    }

    #[test]
    fn test_exclude_label_drops_usage() {
        let mut b = builder("");
        b.append_used_labels(&names(&["job", "env", "job"]));
        b.exclude_label("removed", Span::default(), "job");
        assert_eq!(b.src.used_labels, names(&["env"]));
        assert!(!b.src.can_have_label("job"));
    }

    #[test]
    fn test_join_labels_reports_duplicates() {
        let text = "a * on(x) group_left(job, env) b";
        let mut b = builder(text);
        b.guarantee_labels("selected", Span::new(0, 1), ["job"]);
        b.join_labels(
            Span::new(0, text.len()),
            "group_left",
            &names(&["job", "env"]),
            &[Span::new(0, 1), Span::new(31, 32)],
        );
        let src = b.build();

        assert_eq!(src.dead_labels().len(), 1);
        let dead = &src.dead_labels()[0];
        assert_eq!(dead.kind, DeadLabelKind::DuplicatedJoin);
        assert_eq!(dead.usage_fragment, Span::new(21, 24));
        assert_eq!(src.labels()["env"].kind, LabelPromise::Possible);
        assert_eq!(src.labels()["env"].fragment, Span::new(26, 29));
    }

    #[test]
    fn test_check_included_labels() {
        let text = "sum(foo) by (job)";
        let mut b = builder(text);
        b.exclude_label("removed", Span::new(0, 3), "job");
        b.check_included_labels(Span::new(9, 17), &names(&["job", "env"]));
        assert_eq!(b.src.dead_labels.len(), 1);
        let dead = &b.src.dead_labels[0];
        assert_eq!(dead.name, "job");
        assert_eq!(dead.label_reason, "removed");
        assert_eq!(dead.usage_fragment, Span::new(13, 16));
    }

    #[test]
    fn test_use_labels_not_excluded() {
        let mut b = builder("");
        b.guarantee_labels("", Span::default(), ["b", "a", "c"]);
        b.exclude_label("", Span::default(), "d");
        b.use_labels_not_excluded(&names(&["c"]));
        assert_eq!(b.src.used_labels, names(&["a", "b"]));
    }
}
