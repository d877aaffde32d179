use std::collections::HashSet;

use crate::error::OptResult;
use crate::operator::LogicalOperator::{
    LogicalAggregation, LogicalApply, LogicalDual, LogicalJoin, LogicalLimit, LogicalMaxOneRow,
    LogicalProjection, LogicalScan, LogicalSelection, LogicalSort, LogicalUnion,
};
use crate::operator::OperatorTrait;
use crate::optimizer::OptimizerContext;
use crate::plan::{ColumnId, LogicalPlan, PlanNodeId};
use crate::rules::{LogicalRule, RuleId};

/// Removes output columns no ancestor reads. The output of the root is kept as is.
#[derive(Clone, Default)]
pub struct ColumnPruningRule {}

impl ColumnPruningRule {
    pub fn new() -> Self {
        Self {}
    }

    fn prune(plan: &mut LogicalPlan, id: PlanNodeId, required: &HashSet<ColumnId>) -> OptResult<()> {
        let mut operator = plan.operator(id).clone();
        match &mut operator {
            LogicalScan(source) => {
                let used = source.referenced_columns();
                source.retain_columns(|c| required.contains(&c) || used.contains(&c));
            }
            LogicalProjection(projection) => projection.retain(|c| required.contains(&c.id)),
            LogicalAggregation(agg) => agg.retain(|c| required.contains(&c.id)),
            _ => {}
        }

        let mut input_required: HashSet<ColumnId> = match &operator {
            LogicalScan(_) | LogicalDual(_) => HashSet::new(),
            LogicalProjection(_) | LogicalAggregation(_) => operator.referenced_columns(),
            LogicalUnion(_) => plan
                .inputs(id)
                .iter()
                .flat_map(|input| plan.schema(*input).ids())
                .collect(),
            LogicalSelection(_)
            | LogicalSort(_)
            | LogicalLimit(_)
            | LogicalMaxOneRow(_)
            | LogicalJoin(_)
            | LogicalApply(_) => {
                let mut columns = required.clone();
                columns.extend(operator.referenced_columns());
                columns
            }
        };
        plan.set_operator(id, operator)?;

        // Correlated references below an input read columns of its siblings.
        for input in plan.inputs(id).to_vec() {
            input_required.extend(plan.all_correlated_columns(input).iter().map(|c| c.id));
        }
        for input in plan.inputs(id).to_vec() {
            let columns = plan.schema(input).id_set();
            let child_required = input_required
                .iter()
                .filter(|c| columns.contains(c))
                .copied()
                .collect();
            Self::prune(plan, input, &child_required)?;
        }
        Ok(())
    }
}

impl LogicalRule for ColumnPruningRule {
    fn apply(&self, plan: &mut LogicalPlan, _ctx: &mut OptimizerContext) -> OptResult<()> {
        let root = plan.root();
        let required = plan.schema(root).id_set();
        Self::prune(plan, root, &required)?;
        plan.derive_schemas()
    }

    fn rule_id(&self) -> RuleId {
        RuleId::ColumnPruning
    }
}
