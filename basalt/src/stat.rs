//! Row count estimation.
//!
//! Estimates come from table statistics when the catalog has them and from fixed pseudo
//! selectivities otherwise.

use std::collections::HashMap;

use crate::cost::{DISTINCT_FACTOR, SELECTION_FACTOR};
use crate::operator::LogicalOperator::{
    LogicalAggregation, LogicalApply, LogicalDual, LogicalJoin, LogicalLimit, LogicalMaxOneRow,
    LogicalProjection, LogicalScan, LogicalSelection, LogicalSort, LogicalUnion,
};
use crate::operator::{Join, JoinType};
use crate::plan::{ColumnId, LogicalPlan, PlanNodeId};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Statistics {
    pub row_count: f64,
    /// Distinct values of output columns, where known.
    pub column_ndv: HashMap<ColumnId, f64>,
}

impl Statistics {
    pub fn new(row_count: f64) -> Self {
        Self {
            row_count,
            column_ndv: HashMap::new(),
        }
    }

    pub fn ndv(&self, id: ColumnId) -> Option<f64> {
        self.column_ndv.get(&id).copied()
    }
}

/// Statistics of every reachable node of `plan`.
pub fn derive_statistics(plan: &LogicalPlan) -> HashMap<PlanNodeId, Statistics> {
    let mut stats: HashMap<PlanNodeId, Statistics> = HashMap::new();
    for id in plan.post_order() {
        let input = |idx: usize| -> Statistics {
            plan.inputs(id)
                .get(idx)
                .and_then(|i| stats.get(i))
                .cloned()
                .unwrap_or_default()
        };
        let node_stats = match plan.operator(id) {
            LogicalScan(source) => {
                let table = source.table();
                let mut rows = table.row_count();
                if !source.pushed_conditions().is_empty() {
                    rows *= SELECTION_FACTOR;
                }
                let mut result = Statistics::new(rows);
                for (column, offset) in source.columns().iter().zip(source.offsets()) {
                    if let Some(ndv) = table.column_ndv(&table.columns[*offset].name) {
                        result.column_ndv.insert(column.id, ndv.min(rows));
                    }
                }
                result
            }
            LogicalDual(dual) => Statistics::new(dual.row_count as f64),
            LogicalSelection(_) => {
                let mut result = input(0);
                result.row_count *= SELECTION_FACTOR;
                result
            }
            LogicalProjection(_) | LogicalSort(_) => input(0),
            LogicalLimit(limit) => {
                let mut result = input(0);
                result.row_count = result.row_count.min(limit.count as f64);
                result
            }
            LogicalMaxOneRow(_) => {
                let mut result = input(0);
                result.row_count = result.row_count.min(1.0);
                result
            }
            LogicalUnion(_) => Statistics::new(
                (0..plan.inputs(id).len())
                    .map(|idx| input(idx).row_count)
                    .sum(),
            ),
            LogicalAggregation(agg) => {
                let input = input(0);
                let rows = if agg.group_by.is_empty() {
                    1.0
                } else {
                    let ndv = agg.group_by_columns().and_then(|columns| {
                        columns
                            .iter()
                            .map(|c| input.ndv(*c))
                            .product::<Option<f64>>()
                    });
                    ndv.unwrap_or(input.row_count * DISTINCT_FACTOR)
                        .min(input.row_count)
                        .max(1.0)
                };
                Statistics::new(rows)
            }
            LogicalJoin(join) => join_statistics(join, input(0), input(1)),
            LogicalApply(apply) => join_statistics(&apply.join, input(0), input(1)),
        };
        stats.insert(id, node_stats);
    }
    stats
}

fn join_statistics(join: &Join, left: Statistics, right: Statistics) -> Statistics {
    let rows = match join.join_type {
        JoinType::Semi | JoinType::AntiSemi => left.row_count * SELECTION_FACTOR,
        JoinType::LeftOuterSemi | JoinType::AntiLeftOuterSemi => left.row_count,
        _ if join.equal_conditions.is_empty() => left.row_count * right.row_count,
        JoinType::LeftOuter => left.row_count.max(right.row_count),
        JoinType::RightOuter => right.row_count.max(left.row_count),
        JoinType::Inner => left.row_count.max(right.row_count),
    };
    let mut result = Statistics::new(rows);
    result.column_ndv = left.column_ndv;
    if !join.join_type.is_semi_family() {
        result.column_ndv.extend(right.column_ndv);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PSEUDO_ROW_COUNT;
    use crate::operator::LogicalOperator::LogicalLimit;
    use crate::operator::Limit;
    use crate::test_utils::{scan, TestContext};

    #[test]
    fn test_pseudo_row_counts() {
        let mut ctx = TestContext::new();
        let mut plan = LogicalPlan::new();
        let t = scan(&mut plan, &mut ctx, "k");
        let limit = plan
            .add_node(ctx.ctx.ids(), LogicalLimit(Limit::new(0, 10)), vec![t])
            .unwrap();
        plan.set_root(limit);
        let stats = derive_statistics(&plan);
        assert_eq!(PSEUDO_ROW_COUNT, stats[&t].row_count);
        assert_eq!(10.0, stats[&limit].row_count);
    }

    #[test]
    fn test_join_row_counts() {
        let left = Statistics::new(100.0);
        let right = Statistics::new(10.0);
        let cartesian = Join::new(JoinType::Inner);
        assert_eq!(1000.0, join_statistics(&cartesian, left.clone(), right.clone()).row_count);
        let semi = Join::new(JoinType::Semi);
        assert_eq!(80.0, join_statistics(&semi, left, right).row_count);
    }
}
