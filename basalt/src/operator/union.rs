use std::fmt::Formatter;

use crate::cost::{Cost, CostContext, CPU_FACTOR};
use crate::error::OptResult;
use crate::operator::{ColumnsDisplay, DisplayFields, OperatorTrait, PhysicalOperatorTrait};
use crate::plan::{ColumnDesc, PhysicalNodeRef, Schema};
use crate::properties::OrderSpec;

/// Concatenates the rows of all inputs. Input columns are matched by position.
#[derive(Clone, Debug, PartialEq)]
pub struct Union {
    pub columns: Vec<ColumnDesc>,
}

impl Union {
    pub fn new(columns: Vec<ColumnDesc>) -> Self {
        Self { columns }
    }
}

impl OperatorTrait for Union {
    fn derive_schema(&self, _inputs: &[&Schema]) -> OptResult<Schema> {
        Ok(Schema::new(self.columns.clone()))
    }
}

impl PhysicalOperatorTrait for Union {
    fn output_order(&self, _inputs: &[PhysicalNodeRef]) -> OrderSpec {
        OrderSpec::default()
    }

    fn cost(&self, ctx: &CostContext) -> Cost {
        Cost::from(ctx.total_input_rows() * CPU_FACTOR)
    }
}

impl DisplayFields for Union {
    fn display(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("")
            .field("columns", &ColumnsDisplay(&self.columns))
            .finish()
    }
}
