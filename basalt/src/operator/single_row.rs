use std::fmt::Formatter;

use crate::cost::{Cost, CostContext, CPU_FACTOR};
use crate::error::OptResult;
use crate::expr::ColumnRef;
use crate::operator::{input_order, input_schema, DisplayFields, OperatorTrait, PhysicalOperatorTrait};
use crate::plan::{PhysicalNodeRef, Schema};
use crate::properties::OrderSpec;

/// Produces `row_count` rows without columns, the input of a `SELECT` without `FROM`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TableDual {
    pub row_count: usize,
}

impl TableDual {
    pub fn new(row_count: usize) -> Self {
        Self { row_count }
    }
}

impl OperatorTrait for TableDual {
    fn derive_schema(&self, _inputs: &[&Schema]) -> OptResult<Schema> {
        Ok(Schema::empty())
    }
}

impl PhysicalOperatorTrait for TableDual {
    fn output_order(&self, _inputs: &[PhysicalNodeRef]) -> OrderSpec {
        OrderSpec::default()
    }

    fn cost(&self, _ctx: &CostContext) -> Cost {
        Cost::from(self.row_count as f64 * CPU_FACTOR)
    }
}

impl DisplayFields for TableDual {
    fn display(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("")
            .field("rows", &self.row_count)
            .finish()
    }
}

/// Fails when the input yields more than one row, passes zero or one row through.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct MaxOneRow {}

impl OperatorTrait for MaxOneRow {
    fn derive_schema(&self, inputs: &[&Schema]) -> OptResult<Schema> {
        Ok(Schema::new(input_schema(inputs, 0)?.columns().to_vec()))
    }
}

impl PhysicalOperatorTrait for MaxOneRow {
    fn output_order(&self, inputs: &[PhysicalNodeRef]) -> OrderSpec {
        input_order(inputs)
    }

    fn cost(&self, ctx: &CostContext) -> Cost {
        Cost::from(ctx.input_rows(0).min(2.0) * CPU_FACTOR)
    }
}

impl DisplayFields for MaxOneRow {
    fn display(&self, _f: &mut Formatter<'_>) -> std::fmt::Result {
        Ok(())
    }
}

/// Memoizes the rows of its input per distinct value of the correlated `keys`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Cache {
    pub keys: Vec<ColumnRef>,
}

impl Cache {
    pub fn new(keys: Vec<ColumnRef>) -> Self {
        Self { keys }
    }
}

impl PhysicalOperatorTrait for Cache {
    fn output_order(&self, inputs: &[PhysicalNodeRef]) -> OrderSpec {
        input_order(inputs)
    }

    fn cost(&self, _ctx: &CostContext) -> Cost {
        Cost::from(0.0)
    }
}

impl DisplayFields for Cache {
    fn display(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("").field("keys", &self.keys).finish()
    }
}
