use std::fmt::Formatter;

use crate::cost::{Cost, CostContext, CPU_FACTOR};
use crate::error::OptResult;
use crate::expr::ScalarExpr;
use crate::operator::{
    bind_all, input_order, input_schema, DisplayFields, OperatorTrait, PhysicalOperatorTrait,
};
use crate::plan::{PhysicalNodeRef, Schema};
use crate::properties::OrderSpec;

/// Keeps the rows for which every condition is true.
#[derive(Clone, Debug, PartialEq)]
pub struct Selection {
    pub conditions: Vec<ScalarExpr>,
}

impl Selection {
    pub fn new(conditions: Vec<ScalarExpr>) -> Self {
        Self { conditions }
    }
}

impl OperatorTrait for Selection {
    fn derive_schema(&self, inputs: &[&Schema]) -> OptResult<Schema> {
        Ok(Schema::new(input_schema(inputs, 0)?.columns().to_vec()))
    }

    fn expressions(&self) -> Vec<&ScalarExpr> {
        self.conditions.iter().collect()
    }

    fn bind_columns(&mut self, inputs: &[&Schema]) -> OptResult<()> {
        bind_all(&mut self.conditions, input_schema(inputs, 0)?)
    }
}

impl PhysicalOperatorTrait for Selection {
    fn output_order(&self, inputs: &[PhysicalNodeRef]) -> OrderSpec {
        input_order(inputs)
    }

    fn cost(&self, ctx: &CostContext) -> Cost {
        Cost::from(ctx.input_rows(0) * CPU_FACTOR)
    }
}

impl DisplayFields for Selection {
    fn display(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("")
            .field("conditions", &self.conditions)
            .finish()
    }
}
