use enum_as_inner::EnumAsInner;
use std::fmt::{Display, Formatter};

use crate::operator::{
    Aggregation, Apply, DataSource, DisplayFields, Join, Limit, MaxOneRow, Projection,
    Selection, Sort, TableDual, Union,
};
use enum_dispatch::enum_dispatch;
use strum_macros::AsRefStr;

/// Logical relational operator.
#[derive(Clone, Debug, PartialEq, EnumAsInner, AsRefStr)]
#[enum_dispatch]
pub enum LogicalOperator {
    LogicalScan(DataSource),
    LogicalDual(TableDual),
    LogicalSelection(Selection),
    LogicalProjection(Projection),
    LogicalJoin(Join),
    LogicalApply(Apply),
    LogicalAggregation(Aggregation),
    LogicalSort(Sort),
    LogicalLimit(Limit),
    LogicalUnion(Union),
    LogicalMaxOneRow(MaxOneRow),
}

impl Display for LogicalOperator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_ref())?;
        self.display(f)
    }
}
