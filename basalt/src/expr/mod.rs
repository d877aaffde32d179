//! Scalar expressions of the plan tree.
//!
//! Expressions never own the columns they read: a column is a [`ColumnRef`] naming the
//! [`ColumnId`] of a column produced by an input, and a correlated column is the same
//! link pointing at a column of an enclosing query block.

mod agg;
pub mod types;
mod utils;

use std::collections::{HashMap, HashSet};
use std::fmt::{Debug, Display, Formatter};

use anyhow::bail;
use arrow_schema::DataType;
use datafusion_common::ScalarValue;
use strum_macros::AsRefStr;

pub use agg::*;
pub use utils::*;

use crate::error::{OptResult, OptimizerError};
use crate::plan::{ColumnId, Schema};
use types::arithmetic_type;

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub id: ColumnId,
    pub data_type: DataType,
    /// Offset of the column in the input row, bound right before physical conversion.
    pub index: Option<usize>,
}

impl ColumnRef {
    pub fn new(id: ColumnId, data_type: DataType) -> Self {
        Self {
            id,
            data_type,
            index: None,
        }
    }

    pub fn bind(&mut self, schema: &Schema) -> OptResult<()> {
        match schema.index_of(self.id) {
            Some(idx) => {
                self.index = Some(idx);
                Ok(())
            }
            None => bail!(OptimizerError::Internal(format!(
                "column #{} not found in input",
                self.id
            ))),
        }
    }
}

impl Display for ColumnRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.id)
    }
}

impl Debug for ColumnRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, AsRefStr)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
}

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NotEq
                | BinaryOp::Lt
                | BinaryOp::LtEq
                | BinaryOp::Gt
                | BinaryOp::GtEq
        )
    }

    pub fn is_logical(&self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    /// The operator with its operands swapped, `a < b` is `b > a`.
    pub fn swap(&self) -> Option<BinaryOp> {
        match self {
            BinaryOp::Eq => Some(BinaryOp::Eq),
            BinaryOp::NotEq => Some(BinaryOp::NotEq),
            BinaryOp::Lt => Some(BinaryOp::Gt),
            BinaryOp::LtEq => Some(BinaryOp::GtEq),
            BinaryOp::Gt => Some(BinaryOp::Lt),
            BinaryOp::GtEq => Some(BinaryOp::LtEq),
            _ => None,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, AsRefStr)]
pub enum UnaryOp {
    Not,
    Neg,
    IsNull,
    IsNotNull,
    IsTrue,
    IsFalse,
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub enum ScalarExpr {
    Column(ColumnRef),
    /// A column of an enclosing query block, constant while one inner evaluation runs.
    Correlated(ColumnRef),
    Constant(ScalarValue),
    Binary {
        op: BinaryOp,
        left: Box<ScalarExpr>,
        right: Box<ScalarExpr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<ScalarExpr>,
    },
    InList {
        expr: Box<ScalarExpr>,
        list: Vec<ScalarExpr>,
        negated: bool,
    },
    Cast {
        expr: Box<ScalarExpr>,
        data_type: DataType,
    },
}

impl ScalarExpr {
    pub fn column(id: ColumnId, data_type: DataType) -> Self {
        ScalarExpr::Column(ColumnRef::new(id, data_type))
    }

    pub fn binary(op: BinaryOp, left: ScalarExpr, right: ScalarExpr) -> Self {
        ScalarExpr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn unary(op: UnaryOp, expr: ScalarExpr) -> Self {
        ScalarExpr::Unary {
            op,
            expr: Box::new(expr),
        }
    }

    pub fn cast(self, data_type: DataType) -> Self {
        if self.data_type() == data_type {
            return self;
        }
        ScalarExpr::Cast {
            expr: Box::new(self),
            data_type,
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            ScalarExpr::Column(c) | ScalarExpr::Correlated(c) => c.data_type.clone(),
            ScalarExpr::Constant(v) => v.get_datatype(),
            ScalarExpr::Binary { op, left, right } => {
                if op.is_comparison() || op.is_logical() {
                    DataType::Boolean
                } else if *op == BinaryOp::Divide {
                    DataType::Float64
                } else {
                    arithmetic_type(&left.data_type(), &right.data_type())
                }
            }
            ScalarExpr::Unary { op, expr } => match op {
                UnaryOp::Neg => expr.data_type(),
                _ => DataType::Boolean,
            },
            ScalarExpr::InList { .. } => DataType::Boolean,
            ScalarExpr::Cast { data_type, .. } => data_type.clone(),
        }
    }

    pub fn as_column(&self) -> Option<&ColumnRef> {
        match self {
            ScalarExpr::Column(c) => Some(c),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, ScalarExpr::Constant(_))
    }

    pub fn children(&self) -> Vec<&ScalarExpr> {
        match self {
            ScalarExpr::Column(_) | ScalarExpr::Correlated(_) | ScalarExpr::Constant(_) => {
                vec![]
            }
            ScalarExpr::Binary { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            ScalarExpr::Unary { expr, .. } | ScalarExpr::Cast { expr, .. } => vec![expr.as_ref()],
            ScalarExpr::InList { expr, list, .. } => {
                let mut children = vec![expr.as_ref()];
                children.extend(list.iter());
                children
            }
        }
    }

    fn children_mut(&mut self) -> Vec<&mut ScalarExpr> {
        match self {
            ScalarExpr::Column(_) | ScalarExpr::Correlated(_) | ScalarExpr::Constant(_) => {
                vec![]
            }
            ScalarExpr::Binary { left, right, .. } => vec![left.as_mut(), right.as_mut()],
            ScalarExpr::Unary { expr, .. } | ScalarExpr::Cast { expr, .. } => vec![expr.as_mut()],
            ScalarExpr::InList { expr, list, .. } => {
                let mut children = vec![expr.as_mut()];
                children.extend(list.iter_mut());
                children
            }
        }
    }

    /// Calls `f` on every node of the expression tree, parents first.
    pub fn visit<F: FnMut(&ScalarExpr)>(&self, f: &mut F) {
        f(self);
        for child in self.children() {
            child.visit(f);
        }
    }

    /// Rewrites the tree top-down: where `f` returns a replacement, the replacement is
    /// taken as is and its children are not visited.
    pub fn rewrite<F: FnMut(&ScalarExpr) -> Option<ScalarExpr>>(&self, f: &mut F) -> ScalarExpr {
        if let Some(replaced) = f(self) {
            return replaced;
        }
        let mut expr = self.clone();
        for child in expr.children_mut() {
            *child = child.rewrite(f);
        }
        expr
    }

    pub fn try_for_each_column_mut<F>(&mut self, f: &mut F) -> OptResult<()>
    where
        F: FnMut(&mut ColumnRef) -> OptResult<()>,
    {
        match self {
            ScalarExpr::Column(c) => f(c),
            _ => {
                for child in self.children_mut() {
                    child.try_for_each_column_mut(f)?;
                }
                Ok(())
            }
        }
    }

    pub fn collect_columns(&self, columns: &mut HashSet<ColumnId>) {
        self.visit(&mut |e| {
            if let ScalarExpr::Column(c) = e {
                columns.insert(c.id);
            }
        });
    }

    pub fn columns(&self) -> HashSet<ColumnId> {
        let mut columns = HashSet::new();
        self.collect_columns(&mut columns);
        columns
    }

    pub fn collect_correlated(&self, columns: &mut Vec<ColumnRef>) {
        self.visit(&mut |e| {
            if let ScalarExpr::Correlated(c) = e {
                if !columns.iter().any(|existing| existing.id == c.id) {
                    columns.push(c.clone());
                }
            }
        });
    }

    pub fn has_correlated(&self) -> bool {
        let mut found = false;
        self.visit(&mut |e| found |= matches!(e, ScalarExpr::Correlated(_)));
        found
    }

    /// Whether some correlated reference points at one of `outer`.
    pub fn has_correlated_in(&self, outer: &HashSet<ColumnId>) -> bool {
        let mut found = false;
        self.visit(&mut |e| {
            if let ScalarExpr::Correlated(c) = e {
                found |= outer.contains(&c.id);
            }
        });
        found
    }

    /// Turns correlated references to columns of `outer` into plain column references.
    pub fn decorrelate(&self, outer: &HashSet<ColumnId>) -> ScalarExpr {
        self.rewrite(&mut |e| match e {
            ScalarExpr::Correlated(c) if outer.contains(&c.id) => {
                Some(ScalarExpr::Column(c.clone()))
            }
            _ => None,
        })
    }

    /// Replaces column references found in `mapping` by the mapped expressions.
    pub fn substitute(&self, mapping: &HashMap<ColumnId, ScalarExpr>) -> ScalarExpr {
        self.rewrite(&mut |e| match e {
            ScalarExpr::Column(c) => mapping.get(&c.id).cloned(),
            _ => None,
        })
    }

    /// Binds every column reference to its offset in `schema`.
    pub fn bind(&mut self, schema: &Schema) -> OptResult<()> {
        self.try_for_each_column_mut(&mut |c| c.bind(schema))
    }
}

impl From<ColumnRef> for ScalarExpr {
    fn from(column: ColumnRef) -> Self {
        ScalarExpr::Column(column)
    }
}

impl Display for ScalarExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ScalarExpr::Column(c) => write!(f, "{c}"),
            ScalarExpr::Correlated(c) => write!(f, "^{c}"),
            ScalarExpr::Constant(v) if v.is_null() => write!(f, "NULL"),
            ScalarExpr::Constant(ScalarValue::Utf8(Some(s))) => write!(f, "'{s}'"),
            ScalarExpr::Constant(v) => write!(f, "{v}"),
            ScalarExpr::Binary { op, left, right } => {
                write!(f, "({left} {} {right})", op.symbol())
            }
            ScalarExpr::Unary { op, expr } => match op {
                UnaryOp::Not => write!(f, "NOT {expr}"),
                UnaryOp::Neg => write!(f, "-{expr}"),
                UnaryOp::IsNull => write!(f, "{expr} IS NULL"),
                UnaryOp::IsNotNull => write!(f, "{expr} IS NOT NULL"),
                UnaryOp::IsTrue => write!(f, "{expr} IS TRUE"),
                UnaryOp::IsFalse => write!(f, "{expr} IS FALSE"),
            },
            ScalarExpr::InList {
                expr,
                list,
                negated,
            } => {
                let list = list.iter().map(|e| e.to_string()).collect::<Vec<_>>();
                let not = if *negated { "NOT " } else { "" };
                write!(f, "{expr} {not}IN ({})", list.join(", "))
            }
            ScalarExpr::Cast { expr, data_type } => write!(f, "CAST({expr} AS {data_type})"),
        }
    }
}

impl Debug for ScalarExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::{hashmap, hashset};

    fn col(id: ColumnId) -> ScalarExpr {
        ScalarExpr::column(id, DataType::Int64)
    }

    #[test]
    fn test_display() {
        let expr = ScalarExpr::binary(
            BinaryOp::And,
            ScalarExpr::binary(BinaryOp::Eq, col(1), lit_i64(5)),
            ScalarExpr::unary(UnaryOp::IsNull, ScalarExpr::Correlated(ColumnRef::new(2, DataType::Int64))),
        );
        assert_eq!("((#1 = 5) AND ^#2 IS NULL)", expr.to_string());
    }

    #[test]
    fn test_decorrelate_and_substitute() {
        let expr = ScalarExpr::binary(
            BinaryOp::Lt,
            ScalarExpr::Correlated(ColumnRef::new(1, DataType::Int64)),
            ScalarExpr::Correlated(ColumnRef::new(2, DataType::Int64)),
        );
        assert!(expr.has_correlated_in(&hashset! {2}));
        let expr = expr.decorrelate(&hashset! {2});
        assert_eq!("(^#1 < #2)", expr.to_string());
        assert!(!expr.has_correlated_in(&hashset! {2}));
        assert!(expr.has_correlated());

        let expr = expr.substitute(&hashmap! {2 => ScalarExpr::binary(BinaryOp::Plus, col(3), lit_i64(1))});
        assert_eq!("(^#1 < (#3 + 1))", expr.to_string());
        assert_eq!(hashset! {3}, expr.columns());
    }

    #[test]
    fn test_data_type() {
        let sum = ScalarExpr::binary(BinaryOp::Plus, col(1), lit_i64(1));
        assert_eq!(DataType::Int64, sum.data_type());
        let div = ScalarExpr::binary(BinaryOp::Divide, col(1), lit_i64(2));
        assert_eq!(DataType::Float64, div.data_type());
        assert_eq!(col(1), col(1).cast(DataType::Int64));
    }

    #[test]
    fn test_bind() {
        let schema = Schema::new(vec![
            crate::plan::ColumnDesc::new(7, "a", DataType::Int64, true),
            crate::plan::ColumnDesc::new(3, "b", DataType::Int64, true),
        ]);
        let mut expr = ScalarExpr::binary(BinaryOp::Eq, col(3), col(7));
        expr.bind(&schema).unwrap();
        let mut indices = vec![];
        expr.visit(&mut |e| {
            if let ScalarExpr::Column(c) = e {
                indices.push(c.index);
            }
        });
        assert_eq!(vec![Some(1), Some(0)], indices);
        assert!(col(9).bind(&schema).is_err());
    }
}
