use datafusion_common::ScalarValue;

use super::{BinaryOp, ScalarExpr, UnaryOp};

pub fn lit_i64(v: i64) -> ScalarExpr {
    ScalarExpr::Constant(ScalarValue::Int64(Some(v)))
}

pub fn lit_bool(v: bool) -> ScalarExpr {
    ScalarExpr::Constant(ScalarValue::Boolean(Some(v)))
}

pub fn eq(left: ScalarExpr, right: ScalarExpr) -> ScalarExpr {
    ScalarExpr::binary(BinaryOp::Eq, left, right)
}

pub fn not(expr: ScalarExpr) -> ScalarExpr {
    ScalarExpr::unary(UnaryOp::Not, expr)
}

/// Splits `a AND b AND c` into its conjuncts.
pub fn split_conjunction(expr: &ScalarExpr) -> Vec<ScalarExpr> {
    let mut conjuncts = vec![];
    split_conjunction_impl(expr, &mut conjuncts);
    conjuncts
}

fn split_conjunction_impl(expr: &ScalarExpr, conjuncts: &mut Vec<ScalarExpr>) {
    match expr {
        ScalarExpr::Binary {
            op: BinaryOp::And,
            left,
            right,
        } => {
            split_conjunction_impl(left, conjuncts);
            split_conjunction_impl(right, conjuncts);
        }
        other => conjuncts.push(other.clone()),
    }
}

/// Combines expressions with `op`, `None` for an empty input.
pub fn combine(op: BinaryOp, exprs: impl IntoIterator<Item = ScalarExpr>) -> Option<ScalarExpr> {
    exprs
        .into_iter()
        .reduce(|acc, expr| ScalarExpr::binary(op, acc, expr))
}

pub fn conjunction(exprs: impl IntoIterator<Item = ScalarExpr>) -> Option<ScalarExpr> {
    combine(BinaryOp::And, exprs)
}

/// Appends `exprs` to `target`, skipping expressions already present.
pub fn extend_distinct(target: &mut Vec<ScalarExpr>, exprs: impl IntoIterator<Item = ScalarExpr>) {
    for expr in exprs {
        if !target.contains(&expr) {
            target.push(expr);
        }
    }
}
