use std::fmt::{Display, Formatter};

use enum_as_inner::EnumAsInner;
use enum_dispatch::enum_dispatch;
use strum_macros::AsRefStr;

use crate::cost::{Cost, CostContext};
use crate::operator::{
    Apply, Cache, DisplayFields, HashAgg, HashJoin, IndexLookup, IndexScan, Limit, MaxOneRow,
    MergeJoin, Projection, Selection, Sort, StreamAgg, TableDual, TableScan, TopN, Union,
};
use crate::plan::PhysicalNodeRef;
use crate::properties::OrderSpec;

/// Physical relational operator.
#[derive(Clone, Debug, PartialEq, EnumAsInner, AsRefStr)]
#[enum_dispatch]
pub enum PhysicalOperator {
    PhysicalTableScan(TableScan),
    PhysicalIndexScan(IndexScan),
    PhysicalIndexLookup(IndexLookup),
    PhysicalDual(TableDual),
    PhysicalSelection(Selection),
    PhysicalProjection(Projection),
    PhysicalHashJoin(HashJoin),
    PhysicalMergeJoin(MergeJoin),
    PhysicalApply(Apply),
    PhysicalHashAgg(HashAgg),
    PhysicalStreamAgg(StreamAgg),
    PhysicalSort(Sort),
    PhysicalTopN(TopN),
    PhysicalLimit(Limit),
    PhysicalUnion(Union),
    PhysicalMaxOneRow(MaxOneRow),
    PhysicalCache(Cache),
}

#[enum_dispatch(PhysicalOperator)]
pub trait PhysicalOperatorTrait {
    /// Ordering of the output rows, given the physical inputs.
    fn output_order(&self, inputs: &[PhysicalNodeRef]) -> OrderSpec;

    /// Cost of this operator without accumulating children's cost.
    fn cost(&self, ctx: &CostContext) -> Cost;
}

impl Display for PhysicalOperator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_ref())?;
        self.display(f)
    }
}

/// Ordering of the first input, the operator keeps the order of the rows it reads.
pub(crate) fn input_order(inputs: &[PhysicalNodeRef]) -> OrderSpec {
    inputs
        .first()
        .map(|input| input.order().clone())
        .unwrap_or_default()
}
