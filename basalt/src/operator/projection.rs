use std::collections::HashMap;
use std::fmt::{Debug, Formatter};

use crate::cost::{Cost, CostContext, CPU_FACTOR};
use crate::error::OptResult;
use crate::expr::ScalarExpr;
use crate::operator::{
    bind_all, input_order, input_schema, DisplayFields, OperatorTrait, PhysicalOperatorTrait,
};
use crate::plan::{ColumnDesc, ColumnId, PhysicalNodeRef, Schema};
use crate::properties::OrderSpec;

/// Computes one output column per expression.
///
/// An expression that is a plain column reference keeps the id of the column it reads,
/// unless the id is already produced by an earlier expression of the same projection.
#[derive(Clone, Debug, PartialEq)]
pub struct Projection {
    pub exprs: Vec<ScalarExpr>,
    pub columns: Vec<ColumnDesc>,
}

impl Projection {
    pub fn new(exprs: Vec<ScalarExpr>, columns: Vec<ColumnDesc>) -> Self {
        Self { exprs, columns }
    }

    /// Output column id to the expression computing it.
    pub fn mapping(&self) -> HashMap<ColumnId, ScalarExpr> {
        self.columns
            .iter()
            .zip(self.exprs.iter())
            .map(|(column, expr)| (column.id, expr.clone()))
            .collect()
    }

    /// Whether the output column `id` is a column of the input passed through unchanged.
    pub fn passes_through(&self, id: ColumnId) -> bool {
        self.columns
            .iter()
            .zip(self.exprs.iter())
            .any(|(column, expr)| column.id == id && matches!(expr.as_column(), Some(c) if c.id == id))
    }

    pub fn retain<F: Fn(&ColumnDesc) -> bool>(&mut self, keep: F) {
        let (exprs, columns) = self
            .exprs
            .drain(..)
            .zip(self.columns.drain(..))
            .filter(|(_, column)| keep(column))
            .unzip();
        self.exprs = exprs;
        self.columns = columns;
    }

    /// Whether the projection outputs exactly the columns of `input`, in order.
    pub fn is_identity(&self, input: &Schema) -> bool {
        self.columns.len() == input.len()
            && self
                .columns
                .iter()
                .zip(self.exprs.iter())
                .zip(input.columns().iter())
                .all(|((column, expr), input_column)| {
                    column.id == input_column.id
                        && column.name == input_column.name
                        && matches!(expr.as_column(), Some(c) if c.id == input_column.id)
                })
    }
}

impl OperatorTrait for Projection {
    fn derive_schema(&self, _inputs: &[&Schema]) -> OptResult<Schema> {
        Ok(Schema::new(self.columns.clone()))
    }

    fn expressions(&self) -> Vec<&ScalarExpr> {
        self.exprs.iter().collect()
    }

    fn bind_columns(&mut self, inputs: &[&Schema]) -> OptResult<()> {
        bind_all(&mut self.exprs, input_schema(inputs, 0)?)
    }
}

impl PhysicalOperatorTrait for Projection {
    fn output_order(&self, inputs: &[PhysicalNodeRef]) -> OrderSpec {
        let columns = input_order(inputs)
            .columns()
            .iter()
            .take_while(|sort| self.passes_through(sort.column))
            .copied()
            .collect();
        OrderSpec::new(columns)
    }

    fn cost(&self, ctx: &CostContext) -> Cost {
        Cost::from(ctx.input_rows(0) * CPU_FACTOR)
    }
}

struct ExprsDisplay<'a>(&'a Projection);

impl Debug for ExprsDisplay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut list = f.debug_list();
        for (expr, column) in self.0.exprs.iter().zip(self.0.columns.iter()) {
            match expr.as_column() {
                Some(c) if c.id == column.id => list.entry(expr),
                _ => list.entry(&format_args!("{expr} as #{}", column.id)),
            };
        }
        list.finish()
    }
}

impl DisplayFields for Projection {
    fn display(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("")
            .field("exprs", &ExprsDisplay(self))
            .finish()
    }
}
