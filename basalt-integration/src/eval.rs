//! Row at a time evaluation of scalar expressions, with SQL three valued logic.

use std::cmp::Ordering;
use std::collections::HashMap;

use anyhow::bail;
use arrow_schema::DataType;
use basalt::expr::{BinaryOp, ColumnRef, ScalarExpr, UnaryOp};
use basalt::plan::{ColumnId, Schema};
use datafusion_common::ScalarValue;

use crate::error::{ExecResult, ExecutionError};

pub type Row = Vec<ScalarValue>;

/// Values of the outer columns visible to correlated references.
pub type Env = HashMap<ColumnId, ScalarValue>;

/// A row together with the schema it conforms to.
pub struct EvalContext<'a> {
    pub schema: &'a Schema,
    pub row: &'a [ScalarValue],
    pub env: &'a Env,
}

impl<'a> EvalContext<'a> {
    pub fn new(schema: &'a Schema, row: &'a [ScalarValue], env: &'a Env) -> Self {
        Self { schema, row, env }
    }

    /// Reads a column at its bound offset, or by id when the reference is unbound.
    pub fn column(&self, column: &ColumnRef) -> ExecResult<ScalarValue> {
        let idx = column
            .index
            .or_else(|| self.schema.index_of(column.id))
            .ok_or(ExecutionError::UnboundColumn(column.id))?;
        match self.row.get(idx) {
            Some(value) => Ok(value.clone()),
            None => bail!(ExecutionError::UnboundColumn(column.id)),
        }
    }

    pub fn eval(&self, expr: &ScalarExpr) -> ExecResult<ScalarValue> {
        match expr {
            ScalarExpr::Column(column) => self.column(column),
            ScalarExpr::Correlated(column) => match self.env.get(&column.id) {
                Some(value) => Ok(value.clone()),
                None => bail!(ExecutionError::UnboundCorrelated(column.id)),
            },
            ScalarExpr::Constant(value) => Ok(value.clone()),
            ScalarExpr::Binary { op, left, right } => match op {
                BinaryOp::And => {
                    let left = truth(&self.eval(left)?);
                    if left == Some(false) {
                        return Ok(boolean(Some(false)));
                    }
                    Ok(boolean(and(left, truth(&self.eval(right)?))))
                }
                BinaryOp::Or => {
                    let left = truth(&self.eval(left)?);
                    if left == Some(true) {
                        return Ok(boolean(Some(true)));
                    }
                    Ok(boolean(or(left, truth(&self.eval(right)?))))
                }
                op if op.is_comparison() => {
                    Ok(boolean(compare_with(*op, &self.eval(left)?, &self.eval(right)?)))
                }
                op => arithmetic(*op, &self.eval(left)?, &self.eval(right)?),
            },
            ScalarExpr::Unary { op, expr } => {
                let value = self.eval(expr)?;
                Ok(match op {
                    UnaryOp::Not => boolean(truth(&value).map(|b| !b)),
                    UnaryOp::IsNull => boolean(Some(value.is_null())),
                    UnaryOp::IsNotNull => boolean(Some(!value.is_null())),
                    UnaryOp::IsTrue => boolean(Some(truth(&value) == Some(true))),
                    UnaryOp::IsFalse => boolean(Some(truth(&value) == Some(false))),
                    UnaryOp::Neg => match (&value, as_i64(&value)) {
                        (ScalarValue::Float32(_) | ScalarValue::Float64(_), _) => {
                            ScalarValue::Float64(as_f64(&value).map(|v| -v))
                        }
                        (_, i) => ScalarValue::Int64(i.map(|v| -v)),
                    },
                })
            }
            ScalarExpr::InList {
                expr,
                list,
                negated,
            } => {
                let value = self.eval(expr)?;
                let mut result = Some(false);
                for item in list {
                    match compare_with(BinaryOp::Eq, &value, &self.eval(item)?) {
                        Some(true) => {
                            result = Some(true);
                            break;
                        }
                        None => result = None,
                        Some(false) => {}
                    }
                }
                Ok(boolean(if *negated { result.map(|b| !b) } else { result }))
            }
            ScalarExpr::Cast { expr, data_type } => cast(&self.eval(expr)?, data_type),
        }
    }

    /// Whether a condition holds, NULL counts as false.
    pub fn is_true(&self, expr: &ScalarExpr) -> ExecResult<bool> {
        Ok(truth(&self.eval(expr)?) == Some(true))
    }

    pub fn all_true<'e, I>(&self, conditions: I) -> ExecResult<bool>
    where
        I: IntoIterator<Item = &'e ScalarExpr>,
    {
        for condition in conditions {
            if !self.is_true(condition)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Three valued conjunction of `conditions`, `None` standing for NULL.
    pub fn truth_of_all<'e, I>(&self, conditions: I) -> ExecResult<Option<bool>>
    where
        I: IntoIterator<Item = &'e ScalarExpr>,
    {
        let mut result = Some(true);
        for condition in conditions {
            result = and(result, truth(&self.eval(condition)?));
            if result == Some(false) {
                break;
            }
        }
        Ok(result)
    }
}

fn boolean(value: Option<bool>) -> ScalarValue {
    ScalarValue::Boolean(value)
}

fn truth(value: &ScalarValue) -> Option<bool> {
    match value {
        ScalarValue::Boolean(b) => *b,
        v => as_f64(v).map(|f| f != 0.0),
    }
}

fn and(left: Option<bool>, right: Option<bool>) -> Option<bool> {
    match (left, right) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    }
}

fn or(left: Option<bool>, right: Option<bool>) -> Option<bool> {
    match (left, right) {
        (Some(true), _) | (_, Some(true)) => Some(true),
        (Some(false), Some(false)) => Some(false),
        _ => None,
    }
}

fn is_float(value: &ScalarValue) -> bool {
    matches!(value, ScalarValue::Float32(_) | ScalarValue::Float64(_))
}

pub fn as_i64(value: &ScalarValue) -> Option<i64> {
    match value {
        ScalarValue::Int8(v) => v.map(i64::from),
        ScalarValue::Int16(v) => v.map(i64::from),
        ScalarValue::Int32(v) => v.map(i64::from),
        ScalarValue::Int64(v) => *v,
        ScalarValue::UInt8(v) => v.map(i64::from),
        ScalarValue::UInt16(v) => v.map(i64::from),
        ScalarValue::UInt32(v) => v.map(i64::from),
        ScalarValue::UInt64(v) => v.and_then(|v| i64::try_from(v).ok()),
        ScalarValue::Boolean(v) => v.map(i64::from),
        ScalarValue::Float32(v) => v.map(|v| v.round() as i64),
        ScalarValue::Float64(v) => v.map(|v| v.round() as i64),
        _ => None,
    }
}

pub fn as_f64(value: &ScalarValue) -> Option<f64> {
    match value {
        ScalarValue::Float32(v) => v.map(f64::from),
        ScalarValue::Float64(v) => *v,
        ScalarValue::Utf8(_) | ScalarValue::LargeUtf8(_) | ScalarValue::Null => None,
        v => as_i64(v).map(|i| i as f64),
    }
}

/// SQL comparison of two non NULL values, `None` when either side is NULL.
pub fn compare(left: &ScalarValue, right: &ScalarValue) -> Option<Ordering> {
    if left.is_null() || right.is_null() {
        return None;
    }
    match (left, right) {
        (ScalarValue::Utf8(Some(l)), ScalarValue::Utf8(Some(r))) => Some(l.cmp(r)),
        (l, r) if is_float(l) || is_float(r) => as_f64(l)?.partial_cmp(&as_f64(r)?),
        (l, r) => match (as_i64(l), as_i64(r)) {
            (Some(l), Some(r)) => Some(l.cmp(&r)),
            _ => l.partial_cmp(r),
        },
    }
}

fn compare_with(op: BinaryOp, left: &ScalarValue, right: &ScalarValue) -> Option<bool> {
    let ordering = compare(left, right)?;
    Some(match op {
        BinaryOp::Eq => ordering == Ordering::Equal,
        BinaryOp::NotEq => ordering != Ordering::Equal,
        BinaryOp::Lt => ordering == Ordering::Less,
        BinaryOp::LtEq => ordering != Ordering::Greater,
        BinaryOp::Gt => ordering == Ordering::Greater,
        _ => ordering != Ordering::Less,
    })
}

/// Total order used by sorts, NULL before every value.
pub fn sort_order(left: &ScalarValue, right: &ScalarValue) -> Ordering {
    match (left.is_null(), right.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => compare(left, right).unwrap_or(Ordering::Equal),
    }
}

/// Key under which equal join or group values hash together.
pub fn normalize(value: &ScalarValue) -> ScalarValue {
    if value.is_null() {
        return ScalarValue::Null;
    }
    match value {
        v if is_float(v) => ScalarValue::Float64(as_f64(v)),
        ScalarValue::Utf8(_) | ScalarValue::LargeUtf8(_) => value.clone(),
        v => match as_i64(v) {
            Some(i) => ScalarValue::Int64(Some(i)),
            None => v.clone(),
        },
    }
}

fn arithmetic(op: BinaryOp, left: &ScalarValue, right: &ScalarValue) -> ExecResult<ScalarValue> {
    let floating = is_float(left) || is_float(right) || op == BinaryOp::Divide;
    if floating {
        let result = match (as_f64(left), as_f64(right)) {
            (Some(l), Some(r)) => match op {
                BinaryOp::Plus => Some(l + r),
                BinaryOp::Minus => Some(l - r),
                BinaryOp::Multiply => Some(l * r),
                BinaryOp::Divide | BinaryOp::Modulo if r == 0.0 => None,
                BinaryOp::Divide => Some(l / r),
                BinaryOp::Modulo => Some(l % r),
                op => bail!(ExecutionError::Unsupported(format!("operator {op:?}"))),
            },
            _ => None,
        };
        return Ok(ScalarValue::Float64(result));
    }
    let result = match (as_i64(left), as_i64(right)) {
        (Some(l), Some(r)) => match op {
            BinaryOp::Plus => l.checked_add(r),
            BinaryOp::Minus => l.checked_sub(r),
            BinaryOp::Multiply => l.checked_mul(r),
            BinaryOp::Modulo => l.checked_rem(r),
            op => bail!(ExecutionError::Unsupported(format!("operator {op:?}"))),
        },
        _ => None,
    };
    Ok(ScalarValue::Int64(result))
}

pub fn null_of(data_type: &DataType) -> ExecResult<ScalarValue> {
    Ok(ScalarValue::try_from(data_type)?)
}

pub fn cast(value: &ScalarValue, data_type: &DataType) -> ExecResult<ScalarValue> {
    if value.is_null() {
        return null_of(data_type);
    }
    Ok(match data_type {
        DataType::Boolean => ScalarValue::Boolean(truth(value)),
        DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 => {
            let v = as_i64(value);
            match data_type {
                DataType::Int8 => ScalarValue::Int8(v.and_then(|v| i8::try_from(v).ok())),
                DataType::Int16 => ScalarValue::Int16(v.and_then(|v| i16::try_from(v).ok())),
                DataType::Int32 => ScalarValue::Int32(v.and_then(|v| i32::try_from(v).ok())),
                _ => ScalarValue::Int64(v),
            }
        }
        DataType::Float32 => ScalarValue::Float32(as_f64(value).map(|v| v as f32)),
        DataType::Float64 => ScalarValue::Float64(as_f64(value)),
        DataType::Utf8 => ScalarValue::Utf8(Some(value.to_string())),
        t if value.get_datatype() == *t => value.clone(),
        t => bail!(ExecutionError::Unsupported(format!("cast to {t}"))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt::expr::{lit_bool, lit_i64};

    fn eval(expr: &ScalarExpr) -> ScalarValue {
        let schema = Schema::empty();
        let env = Env::new();
        EvalContext::new(&schema, &[], &env).eval(expr).unwrap()
    }

    fn null() -> ScalarExpr {
        ScalarExpr::Constant(ScalarValue::Int64(None))
    }

    #[test]
    fn test_three_valued_logic() {
        let null_eq = ScalarExpr::binary(BinaryOp::Eq, null(), lit_i64(1));
        assert_eq!(ScalarValue::Boolean(None), eval(&null_eq));
        assert_eq!(
            ScalarValue::Boolean(Some(false)),
            eval(&ScalarExpr::binary(BinaryOp::And, null_eq.clone(), lit_bool(false)))
        );
        assert_eq!(
            ScalarValue::Boolean(Some(true)),
            eval(&ScalarExpr::binary(BinaryOp::Or, null_eq.clone(), lit_bool(true)))
        );
        assert_eq!(
            ScalarValue::Boolean(Some(false)),
            eval(&ScalarExpr::unary(UnaryOp::IsFalse, null_eq))
        );
    }

    #[test]
    fn test_in_list_with_null() {
        let in_list = |negated| ScalarExpr::InList {
            expr: Box::new(lit_i64(3)),
            list: vec![lit_i64(1), null()],
            negated,
        };
        assert_eq!(ScalarValue::Boolean(None), eval(&in_list(false)));
        assert_eq!(ScalarValue::Boolean(None), eval(&in_list(true)));
    }

    #[test]
    fn test_arithmetic_and_cast() {
        let sum = ScalarExpr::binary(BinaryOp::Plus, lit_i64(2), lit_i64(3));
        assert_eq!(ScalarValue::Int64(Some(5)), eval(&sum));
        let div = ScalarExpr::binary(BinaryOp::Divide, lit_i64(1), lit_i64(0));
        assert_eq!(ScalarValue::Float64(None), eval(&div));
        let flag = ScalarExpr::unary(UnaryOp::IsNotNull, lit_i64(1)).cast(DataType::Int64);
        assert_eq!(ScalarValue::Int64(Some(1)), eval(&flag));
    }

    #[test]
    fn test_sort_order_puts_null_first() {
        assert_eq!(
            Ordering::Less,
            sort_order(&ScalarValue::Int64(None), &ScalarValue::Int64(Some(-5)))
        );
        assert_eq!(
            Ordering::Equal,
            sort_order(&ScalarValue::Int32(Some(2)), &ScalarValue::Int64(Some(2)))
        );
    }
}
