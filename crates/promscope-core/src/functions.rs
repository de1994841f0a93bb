//! Built-in PromQL functions.
//!
//! One table drives both the parser (argument count and value types) and the
//! analyzer (how a call changes the labels of its input).

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::ast::ValueType;
use crate::ast::ValueType::{Matrix as M, Scalar as S, String as Str, Vector as V};

/// How a function call changes the labels of its vector argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LabelRule {
    /// Labels are kept, selector guarantees still hold.
    Preserve,
    /// Labels are kept untouched, no new guarantees are derived.
    Passthrough,
    /// Preserves labels when given an argument, returns a label-less series otherwise.
    DateTime,
    /// Only the equality matchers passed in can be present on the result.
    Absent,
    /// Adds the destination label, reads every source label.
    LabelJoin,
    /// Adds the destination label, reads the source label.
    LabelReplace,
    Pi,
    Time,
    Scalar,
    Vector,
    /// Not modelled, the analysis result is left unknown.
    Unsupported,
}

/// Static description of a function.
#[derive(Debug, PartialEq)]
pub struct FunctionDef {
    pub name: &'static str,
    pub arg_types: &'static [ValueType],
    /// 0 for a fixed argument list, `n > 0` when the last argument may be
    /// repeated up to `n` times (including zero), -1 for no upper limit.
    pub variadic: i32,
    pub return_type: ValueType,
    pub labels: LabelRule,
}

impl FunctionDef {
    /// Minimum number of arguments.
    pub fn min_args(&self) -> usize {
        if self.variadic == 0 {
            self.arg_types.len()
        } else {
            self.arg_types.len().saturating_sub(1)
        }
    }

    /// Maximum number of arguments, `None` when unbounded.
    pub fn max_args(&self) -> Option<usize> {
        match self.variadic {
            0 => Some(self.arg_types.len()),
            n if n > 0 => Some(self.arg_types.len() - 1 + n as usize),
            _ => None,
        }
    }

    /// Expected type of the argument at `index`, repeating the last declared
    /// type for variadic tails.
    pub fn arg_type(&self, index: usize) -> ValueType {
        match self.arg_types.get(index) {
            Some(vt) => *vt,
            None => self.arg_types.last().copied().unwrap_or_default(),
        }
    }
}

macro_rules! func {
    ($name:literal, [$($arg:expr),*], $ret:expr, $rule:ident) => {
        func!($name, [$($arg),*], 0, $ret, $rule)
    };
    ($name:literal, [$($arg:expr),*], $variadic:expr, $ret:expr, $rule:ident) => {
        FunctionDef {
            name: $name,
            arg_types: &[$($arg),*],
            variadic: $variadic,
            return_type: $ret,
            labels: LabelRule::$rule,
        }
    };
}

static FUNCTION_DEFS: &[FunctionDef] = &[
    func!("abs", [V], V, Preserve),
    func!("absent", [V], V, Absent),
    func!("absent_over_time", [M], V, Absent),
    func!("acos", [V], V, Preserve),
    func!("acosh", [V], V, Preserve),
    func!("asin", [V], V, Preserve),
    func!("asinh", [V], V, Preserve),
    func!("atan", [V], V, Preserve),
    func!("atanh", [V], V, Preserve),
    func!("avg_over_time", [M], V, Preserve),
    func!("ceil", [V], V, Preserve),
    func!("changes", [M], V, Preserve),
    func!("clamp", [V, S, S], V, Preserve),
    func!("clamp_max", [V, S], V, Preserve),
    func!("clamp_min", [V, S], V, Preserve),
    func!("cos", [V], V, Preserve),
    func!("cosh", [V], V, Preserve),
    func!("count_over_time", [M], V, Preserve),
    func!("day_of_month", [V], 1, V, DateTime),
    func!("day_of_week", [V], 1, V, DateTime),
    func!("day_of_year", [V], 1, V, DateTime),
    func!("days_in_month", [V], 1, V, DateTime),
    func!("deg", [V], V, Preserve),
    func!("delta", [M], V, Preserve),
    func!("deriv", [M], V, Preserve),
    func!("double_exponential_smoothing", [M, S, S], V, Preserve),
    func!("exp", [V], V, Preserve),
    func!("floor", [V], V, Preserve),
    func!("histogram_avg", [V], V, Preserve),
    func!("histogram_count", [V], V, Preserve),
    func!("histogram_fraction", [S, S, V], V, Preserve),
    func!("histogram_quantile", [S, V], V, Preserve),
    func!("histogram_stddev", [V], V, Preserve),
    func!("histogram_stdvar", [V], V, Preserve),
    func!("histogram_sum", [V], V, Preserve),
    func!("holt_winters", [M, S, S], V, Preserve),
    func!("hour", [V], 1, V, DateTime),
    func!("idelta", [M], V, Preserve),
    func!("increase", [M], V, Preserve),
    func!("info", [V, V], 1, V, Unsupported),
    func!("irate", [M], V, Preserve),
    func!("label_join", [V, Str, Str, Str], -1, V, LabelJoin),
    func!("label_replace", [V, Str, Str, Str, Str], V, LabelReplace),
    func!("last_over_time", [M], V, Preserve),
    func!("ln", [V], V, Preserve),
    func!("log10", [V], V, Preserve),
    func!("log2", [V], V, Preserve),
    func!("mad_over_time", [M], V, Preserve),
    func!("max_over_time", [M], V, Preserve),
    func!("min_over_time", [M], V, Preserve),
    func!("minute", [V], 1, V, DateTime),
    func!("month", [V], 1, V, DateTime),
    func!("pi", [], S, Pi),
    func!("predict_linear", [M, S], V, Preserve),
    func!("present_over_time", [M], V, Preserve),
    func!("quantile_over_time", [S, M], V, Preserve),
    func!("rad", [V], V, Preserve),
    func!("rate", [M], V, Preserve),
    func!("resets", [M], V, Preserve),
    func!("round", [V, S], 1, V, Preserve),
    func!("scalar", [V], S, Scalar),
    func!("sgn", [V], V, Preserve),
    func!("sin", [V], V, Preserve),
    func!("sinh", [V], V, Preserve),
    func!("sort", [V], V, Passthrough),
    func!("sort_by_label", [V, Str], -1, V, Passthrough),
    func!("sort_by_label_desc", [V, Str], -1, V, Passthrough),
    func!("sort_desc", [V], V, Passthrough),
    func!("sqrt", [V], V, Preserve),
    func!("stddev_over_time", [M], V, Preserve),
    func!("stdvar_over_time", [M], V, Preserve),
    func!("sum_over_time", [M], V, Preserve),
    func!("tan", [V], V, Preserve),
    func!("tanh", [V], V, Preserve),
    func!("time", [], S, Time),
    func!("timestamp", [V], V, Preserve),
    func!("vector", [S], V, Vector),
    func!("year", [V], 1, V, DateTime),
];

static FUNCTIONS: LazyLock<HashMap<&'static str, &'static FunctionDef>> =
    LazyLock::new(|| FUNCTION_DEFS.iter().map(|def| (def.name, def)).collect());

/// Looks up a function by its exact (case sensitive) name.
pub fn lookup(name: &str) -> Option<&'static FunctionDef> {
    FUNCTIONS.get(name).copied()
}

/// All known functions, sorted by name.
pub fn all() -> &'static [FunctionDef] {
    FUNCTION_DEFS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_sorted_and_unique() {
        let names: Vec<&str> = all().iter().map(|f| f.name).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_lookup_is_case_sensitive() {
        assert!(lookup("rate").is_some());
        assert!(lookup("RATE").is_none());
        assert!(lookup("does_not_exist").is_none());
    }

    #[test]
    fn test_arity() {
        let rate = lookup("rate").unwrap();
        assert_eq!((rate.min_args(), rate.max_args()), (1, Some(1)));

        let hour = lookup("hour").unwrap();
        assert_eq!((hour.min_args(), hour.max_args()), (0, Some(1)));

        let label_join = lookup("label_join").unwrap();
        assert_eq!((label_join.min_args(), label_join.max_args()), (3, None));
        assert_eq!(label_join.arg_type(7), ValueType::String);

        let time = lookup("time").unwrap();
        assert_eq!((time.min_args(), time.max_args()), (0, Some(0)));
        assert_eq!(time.arg_type(0), ValueType::None);
    }

    #[test]
    fn test_label_rules() {
        assert_eq!(lookup("absent_over_time").unwrap().labels, LabelRule::Absent);
        assert_eq!(lookup("sort_desc").unwrap().labels, LabelRule::Passthrough);
        assert_eq!(lookup("vector").unwrap().labels, LabelRule::Vector);
        assert_eq!(lookup("info").unwrap().labels, LabelRule::Unsupported);
    }
}
