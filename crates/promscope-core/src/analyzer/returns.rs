//! Static return value folding.

use super::source::{DeadInfo, ReturnInfo, Source};
use crate::ast::{format_number, BinaryExpr, BinaryOp};

/// Returns `(is_conditional, is_return_bool)` for a source used as an operand of `op`.
pub(crate) fn check_conditions(src: &Source, op: BinaryOp, return_bool: bool) -> (bool, bool) {
    let is_return_bool = !src.is_conditional && return_bool;
    let is_conditional = src.is_conditional || op.is_comparison();
    (is_conditional, is_return_bool)
}

/// True when both operands always return a statically known value.
pub(crate) fn both_known(ls: &Source, rs: &Source) -> bool {
    [ls, rs]
        .iter()
        .all(|s| s.return_info.always_returns && s.return_info.known_return)
}

/// Text of the value returned by `src`, as written in the query or as folded so far.
pub(crate) fn describe(text: &str, src: &Source) -> String {
    let info = &src.return_info;
    if info.logical_expr.is_empty() {
        info.value_position
            .slice(text)
            .unwrap_or_default()
            .to_string()
    } else {
        info.logical_expr.clone()
    }
}

/// Folds a binary operation between two known values.
///
/// Comparisons that never hold produce a [`DeadInfo`] anchored at the left operand.
pub(crate) fn calculate_static_return(
    text: &str,
    ls: &Source,
    rs: &Source,
    n: &BinaryExpr,
) -> (ReturnInfo, Option<DeadInfo>) {
    let mut ret = ls.return_info.clone();
    let l = ls.return_info.returned_number;
    let r = rs.return_info.returned_number;
    let folded = format!("{} {} {}", describe(text, ls), n.op, describe(text, rs));

    let holds = match n.op {
        BinaryOp::Eql => l == r,
        BinaryOp::Neq => l != r,
        BinaryOp::Lte => l <= r,
        BinaryOp::Lss => l < r,
        BinaryOp::Gte => l >= r,
        BinaryOp::Gtr => l > r,
        arithmetic => {
            let value = match arithmetic {
                BinaryOp::Add => l + r,
                BinaryOp::Sub => l - r,
                BinaryOp::Mul => l * r,
                BinaryOp::Div => l / r,
                BinaryOp::Mod => l % r,
                BinaryOp::Pow => l.powf(r),
                BinaryOp::Atan2 => l.atan2(r),
                // set operators never have scalar operands
                _ => return (ret, None),
            };
            ret.returned_number = value;
            ret.logical_expr = folded;
            return (ret, None);
        }
    };

    if n.return_bool {
        ret.returned_number = if holds { 1.0 } else { 0.0 };
        ret.logical_expr = format!("{folded} bool");
    }
    if holds {
        return (ret, None);
    }

    let suffix = if n.return_bool {
        "and uses the `bool` modifier which means it will always return 0"
    } else {
        "which is not possible, so it will never return anything."
    };
    let dead = DeadInfo {
        reason: format!(
            "`{folded}` always evaluates to `{} {} {}` {suffix}",
            format_number(l),
            n.op,
            format_number(r),
        ),
        fragment: ls.position,
    };
    (ret, Some(dead))
}
