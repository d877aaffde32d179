use std::fmt::Formatter;

use crate::cost::{Cost, CostContext, CPU_FACTOR};
use crate::error::OptResult;
use crate::operator::{input_order, input_schema, DisplayFields, OperatorTrait, PhysicalOperatorTrait};
use crate::plan::{PhysicalNodeRef, Schema};
use crate::properties::OrderSpec;

/// Skips `offset` rows, then returns at most `count` rows.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Limit {
    pub offset: u64,
    pub count: u64,
}

impl Limit {
    pub fn new(offset: u64, count: u64) -> Self {
        Self { offset, count }
    }

    /// Number of input rows the limit reads at most.
    pub fn input_limit(&self) -> u64 {
        self.offset.saturating_add(self.count)
    }
}

impl OperatorTrait for Limit {
    fn derive_schema(&self, inputs: &[&Schema]) -> OptResult<Schema> {
        Ok(Schema::new(input_schema(inputs, 0)?.columns().to_vec()))
    }
}

impl PhysicalOperatorTrait for Limit {
    fn output_order(&self, inputs: &[PhysicalNodeRef]) -> OrderSpec {
        input_order(inputs)
    }

    fn cost(&self, ctx: &CostContext) -> Cost {
        Cost::from(ctx.output_rows * CPU_FACTOR)
    }
}

impl DisplayFields for Limit {
    fn display(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("");
        if self.offset > 0 {
            s.field("offset", &self.offset);
        }
        s.field("count", &self.count).finish()
    }
}
