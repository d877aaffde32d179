use log::debug;

use crate::error::OptResult;
use crate::expr::ScalarExpr;
use crate::operator::LogicalOperator::{
    LogicalApply, LogicalJoin, LogicalProjection, LogicalSelection, LogicalSort,
};
use crate::operator::{Apply, Selection};
use crate::optimizer::OptimizerContext;
use crate::plan::{LogicalPlan, PlanNodeId};
use crate::rules::{LogicalRule, RuleId};

/// Removes correlation from `Apply` nodes, inner applies first.
///
/// Correlated conditions of a selection right below the apply are pulled up into the join
/// conditions. For the semi join family, a projection or a sort right below the apply
/// doesn't change which outer rows match, so it is folded into the conditions or dropped.
/// An apply whose inner side no longer references the outer side becomes a plain join.
#[derive(Clone, Default)]
pub struct DecorrelateRule {}

impl DecorrelateRule {
    pub fn new() -> Self {
        Self {}
    }

    fn decorrelate(plan: &mut LogicalPlan, id: PlanNodeId) -> OptResult<()> {
        while let LogicalApply(apply) = plan.operator(id) {
            let apply = apply.clone();
            let outer = plan.input(id, 0)?;
            let inner = plan.input(id, 1)?;
            let outer_columns = plan.schema(outer).id_set();

            if plan.correlated_columns(inner, &outer_columns).is_empty() {
                debug!("Apply {} is not correlated, converted to join", id);
                plan.set_operator(id, LogicalJoin(apply.join))?;
                return Ok(());
            }

            let semi = apply.join.join_type.is_semi_family();
            let (new_inner, conditions) = match plan.operator(inner) {
                // The comparisons of a null aware join must stay apart from inner filters.
                LogicalSelection(selection) if !apply.join.null_aware => {
                    let (pulled, kept): (Vec<ScalarExpr>, Vec<ScalarExpr>) = selection
                        .conditions
                        .iter()
                        .cloned()
                        .partition(|c| c.has_correlated_in(&outer_columns));
                    if pulled.is_empty() {
                        return Ok(());
                    }
                    let new_inner = if kept.is_empty() {
                        plan.input(inner, 0)?
                    } else {
                        plan.set_operator(inner, LogicalSelection(Selection::new(kept)))?;
                        inner
                    };
                    let mut conditions = apply.join.all_conditions();
                    conditions.extend(pulled);
                    (new_inner, conditions)
                }
                LogicalProjection(projection) if semi => {
                    let mapping = projection.mapping();
                    let conditions = apply
                        .join
                        .all_conditions()
                        .iter()
                        .map(|c| c.substitute(&mapping))
                        .collect();
                    (plan.input(inner, 0)?, conditions)
                }
                LogicalSort(_) if semi => (plan.input(inner, 0)?, apply.join.all_conditions()),
                _ => return Ok(()),
            };

            let conditions = conditions
                .iter()
                .map(|c| c.decorrelate(&outer_columns))
                .collect();
            let mut join = apply.join;
            join.set_conditions(conditions, plan.schema(outer), plan.schema(new_inner));
            let correlated = plan.correlated_columns(new_inner, &outer_columns);
            plan.set_input(id, 1, new_inner);
            plan.set_operator(id, LogicalApply(Apply::new(join, correlated)))?;
        }
        Ok(())
    }
}

impl LogicalRule for DecorrelateRule {
    fn apply(&self, plan: &mut LogicalPlan, _ctx: &mut OptimizerContext) -> OptResult<()> {
        for id in plan.post_order() {
            if matches!(plan.operator(id), LogicalApply(_)) {
                Self::decorrelate(plan, id)?;
            }
        }
        plan.derive_schemas()
    }

    fn rule_id(&self) -> RuleId {
        RuleId::Decorrelate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{col, lit, SelectStmt, TableRef};
    use crate::test_utils::{build, TestContext};

    #[test]
    fn test_null_aware_apply_keeps_inner_filter() {
        let inner = SelectStmt::new()
            .field(col("a"))
            .from(TableRef::table("k"))
            .filter(col("k.c").eq(col("t.c")))
            .into_query();
        let stmt = SelectStmt::new()
            .field(col("a"))
            .from(TableRef::table("t"))
            .filter(col("a").in_subquery(inner).or(col("b").gt(lit(1i64))))
            .into_query()
            .into_statement();
        let mut ctx = TestContext::new();
        let mut plan = build(&mut ctx, &stmt);
        DecorrelateRule::new().apply(&mut plan, &mut ctx.ctx).unwrap();

        let apply = plan
            .post_order()
            .into_iter()
            .find(|id| matches!(plan.operator(*id), LogicalApply(_)))
            .unwrap();
        let inner = plan.input(apply, 1).unwrap();
        assert!(matches!(plan.operator(inner), LogicalSelection(_)));
        let join = &plan.operator(apply).as_logical_apply().unwrap().join;
        assert_eq!(1, join.all_conditions().len());
    }
}
