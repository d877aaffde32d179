use std::collections::HashSet;

use log::debug;

use crate::error::OptResult;
use crate::expr::{AggFunc, AggregateCall};
use crate::operator::LogicalOperator::{LogicalAggregation, LogicalJoin};
use crate::operator::{AggStage, Aggregation, Join, JoinType, OperatorTrait};
use crate::optimizer::OptimizerContext;
use crate::plan::{ColumnDesc, ColumnId, LogicalPlan, PlanNodeId};
use crate::rules::{LogicalRule, RuleId};

/// Splits an aggregation over an inner equi-join into a partial aggregation on one side of
/// the join and a final aggregation above it.
///
/// The partial stage groups by the group-by columns of its side plus every column of that
/// side read by the join, so all rows of a partial group join the same rows of the other
/// side. The final stage combines the partial results of the rows reaching it.
#[derive(Clone, Default)]
pub struct AggPushDownRule {}

impl AggPushDownRule {
    pub fn new() -> Self {
        Self {}
    }

    /// Side of the join computing the aggregates, `None` when the aggregation can't be
    /// pushed.
    fn pushed_side(agg: &Aggregation, join: &Join, sides: [&HashSet<ColumnId>; 2]) -> Option<usize> {
        if agg.stage != AggStage::Complete
            || join.join_type != JoinType::Inner
            || join.equal_conditions.is_empty()
            || agg.group_by.is_empty()
            || agg.group_by_columns().is_none()
        {
            return None;
        }
        let mut side = None;
        for call in &agg.aggregates {
            if !call.is_decomposable() {
                return None;
            }
            if call.func == AggFunc::FirstRow {
                continue;
            }
            let columns: HashSet<ColumnId> = call.args.iter().flat_map(|arg| arg.columns()).collect();
            if columns.is_empty() {
                continue;
            }
            let call_side = sides.iter().position(|s| columns.is_subset(s))?;
            match side {
                Some(existing) if existing != call_side => return None,
                _ => side = Some(call_side),
            }
        }
        Some(side.unwrap_or(0))
    }

    fn push_down(plan: &mut LogicalPlan, ctx: &mut OptimizerContext, id: PlanNodeId) -> OptResult<bool> {
        let agg = match plan.operator(id) {
            LogicalAggregation(agg) => agg.clone(),
            _ => return Ok(false),
        };
        let join_id = plan.input(id, 0)?;
        let join = match plan.operator(join_id) {
            LogicalJoin(join) => join.clone(),
            _ => return Ok(false),
        };
        let children = [plan.input(join_id, 0)?, plan.input(join_id, 1)?];
        let sides = [
            plan.schema(children[0]).id_set(),
            plan.schema(children[1]).id_set(),
        ];
        let side = match Self::pushed_side(&agg, &join, [&sides[0], &sides[1]]) {
            Some(side) => side,
            None => return Ok(false),
        };
        let child = children[side];
        let child_columns = plan.schema(child).columns().to_vec();

        let mut group_columns: Vec<ColumnId> = agg.group_by_columns().unwrap_or_default();
        let mut join_columns: Vec<ColumnId> = join.referenced_columns().into_iter().collect();
        join_columns.sort_unstable();
        group_columns.extend(join_columns);
        let mut seen = HashSet::new();
        let partial_group_by = group_columns
            .into_iter()
            .filter(|c| sides[side].contains(c) && seen.insert(*c))
            .filter_map(|c| child_columns.iter().find(|column| column.id == c))
            .map(|column| column.to_expr())
            .collect();

        let mut partial_aggregates = vec![];
        let mut partial_columns = vec![];
        for column in &child_columns {
            partial_aggregates.push(AggregateCall::first_row(column.to_expr()));
            partial_columns.push(column.clone());
        }
        let mut final_aggregates = vec![];
        for (call, column) in agg.aggregates.iter().zip(agg.columns.iter()) {
            if call.func == AggFunc::FirstRow {
                final_aggregates.push(call.clone());
                continue;
            }
            let partial = ColumnDesc::new(
                ctx.next_column_id(),
                format!("partial({})", column.name),
                call.return_type(),
                column.nullable,
            );
            final_aggregates.push(AggregateCall::new(
                call.combining_func(),
                vec![partial.to_expr()],
                false,
            ));
            partial_aggregates.push(call.clone());
            partial_columns.push(partial);
        }

        let partial = Aggregation::new(partial_group_by, partial_aggregates, partial_columns)
            .with_stage(AggStage::Partial);
        let partial_id = plan.add_node(ctx.ids(), LogicalAggregation(partial), vec![child])?;
        plan.set_input(join_id, side, partial_id);
        plan.derive_schema(join_id)?;

        let final_agg = Aggregation::new(agg.group_by, final_aggregates, agg.columns)
            .with_stage(AggStage::Final);
        plan.set_operator(id, LogicalAggregation(final_agg))?;
        debug!(
            "Pushed aggregation {} below join {} on side {}",
            id, join_id, side
        );
        Ok(true)
    }
}

impl LogicalRule for AggPushDownRule {
    fn apply(&self, plan: &mut LogicalPlan, ctx: &mut OptimizerContext) -> OptResult<()> {
        let mut changed = false;
        for id in plan.post_order() {
            changed |= Self::push_down(plan, ctx, id)?;
        }
        if changed {
            plan.derive_schemas()?;
        }
        Ok(())
    }

    fn rule_id(&self) -> RuleId {
        RuleId::AggPushDown
    }
}
