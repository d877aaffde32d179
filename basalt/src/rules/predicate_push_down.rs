use std::collections::HashMap;

use log::debug;

use crate::error::OptResult;
use crate::expr::{extend_distinct, ScalarExpr};
use crate::operator::LogicalOperator::{
    LogicalAggregation, LogicalApply, LogicalDual, LogicalJoin, LogicalLimit, LogicalMaxOneRow,
    LogicalProjection, LogicalScan, LogicalSelection, LogicalSort, LogicalUnion,
};
use crate::operator::{Apply, Join, JoinType, LogicalOperator, Selection};
use crate::optimizer::OptimizerContext;
use crate::plan::{ColumnId, LogicalPlan, PlanNodeId};
use crate::rules::{LogicalRule, RuleId};

/// Pushes filters down the plan.
///
/// Predicates reaching a data source are kept there as pushed conditions. A limit, a
/// max-one-row check and a dual stop push-down, the predicates stay in a selection above.
#[derive(Clone, Default)]
pub struct PredicatePushDownRule {}

impl PredicatePushDownRule {
    pub fn new() -> Self {
        Self {}
    }
}

impl LogicalRule for PredicatePushDownRule {
    fn apply(&self, plan: &mut LogicalPlan, ctx: &mut OptimizerContext) -> OptResult<()> {
        let root = plan.root();
        let mut pusher = PushDown {
            plan: &mut *plan,
            ctx,
        };
        let (retained, new_root) = pusher.push_down(root, vec![])?;
        let new_root = pusher.add_selection(new_root, retained)?;
        plan.set_root(new_root);
        plan.derive_schemas()
    }

    fn rule_id(&self) -> RuleId {
        RuleId::PredicatePushDown
    }
}

struct PushDown<'p> {
    plan: &'p mut LogicalPlan,
    ctx: &'p mut OptimizerContext,
}

impl PushDown<'_> {
    /// Puts `predicates` into the subtree of `id`. Returns the predicates that must be
    /// evaluated above the subtree and the node now rooting it.
    fn push_down(
        &mut self,
        id: PlanNodeId,
        predicates: Vec<ScalarExpr>,
    ) -> OptResult<(Vec<ScalarExpr>, PlanNodeId)> {
        let operator = self.plan.operator(id).clone();
        match operator {
            LogicalScan(mut source) => {
                if !predicates.is_empty() {
                    source.add_conditions(predicates);
                    self.plan.set_operator(id, LogicalScan(source))?;
                }
                Ok((vec![], id))
            }
            LogicalDual(_) => Ok((predicates, id)),
            LogicalSelection(selection) => {
                let mut conditions = selection.conditions;
                extend_distinct(&mut conditions, predicates);
                let child = self.plan.input(id, 0)?;
                let (retained, new_child) = self.push_down(child, conditions)?;
                if retained.is_empty() {
                    debug!("Selection {} pushed down entirely", id);
                    return Ok((vec![], new_child));
                }
                self.plan.set_input(id, 0, new_child);
                self.plan
                    .set_operator(id, LogicalSelection(Selection::new(retained)))?;
                Ok((vec![], id))
            }
            LogicalProjection(projection) => {
                let mapping = projection.mapping();
                let predicates = predicates.iter().map(|p| p.substitute(&mapping)).collect();
                self.push_into_child(id, 0, predicates)?;
                Ok((vec![], id))
            }
            LogicalSort(_) => {
                self.push_into_child(id, 0, predicates)?;
                Ok((vec![], id))
            }
            LogicalLimit(_) | LogicalMaxOneRow(_) => {
                self.push_into_child(id, 0, vec![])?;
                Ok((predicates, id))
            }
            LogicalUnion(union) => {
                for (idx, input) in self.plan.inputs(id).to_vec().into_iter().enumerate() {
                    let mapping: HashMap<ColumnId, ScalarExpr> = union
                        .columns
                        .iter()
                        .zip(self.plan.schema(input).columns())
                        .map(|(column, branch)| (column.id, branch.to_expr()))
                        .collect();
                    let predicates = predicates.iter().map(|p| p.substitute(&mapping)).collect();
                    self.push_into_child(id, idx, predicates)?;
                }
                Ok((vec![], id))
            }
            LogicalAggregation(agg) => {
                let mut mapping = HashMap::new();
                for column in agg.group_by_columns().unwrap_or_default() {
                    if let Some(output) = agg.first_row_output(column) {
                        let input = self.plan.schema(self.plan.input(id, 0)?).column_by_id(column);
                        if let Some(input) = input {
                            mapping.insert(output, input.to_expr());
                        }
                    }
                }
                let (pushed, retained): (Vec<_>, Vec<_>) = predicates.into_iter().partition(|p| {
                    let columns = p.columns();
                    !columns.is_empty() && columns.iter().all(|c| mapping.contains_key(c))
                });
                let pushed = pushed.iter().map(|p| p.substitute(&mapping)).collect();
                self.push_into_child(id, 0, pushed)?;
                Ok((retained, id))
            }
            LogicalJoin(join) => {
                let (join, retained) = self.push_through_join(id, join, predicates)?;
                self.plan.set_operator(id, LogicalJoin(join))?;
                Ok((retained, id))
            }
            LogicalApply(apply) => {
                let (join, retained) = self.push_through_join(id, apply.join, predicates)?;
                self.plan.set_operator(
                    id,
                    LogicalApply(Apply::new(join, apply.correlated_columns)),
                )?;
                Ok((retained, id))
            }
        }
    }

    /// Splits predicates and join conditions between the join and its two sides, then
    /// pushes into both sides. Returns the rewritten join and the predicates left above.
    fn push_through_join(
        &mut self,
        id: PlanNodeId,
        mut join: Join,
        predicates: Vec<ScalarExpr>,
    ) -> OptResult<(Join, Vec<ScalarExpr>)> {
        let left = self.plan.input(id, 0)?;
        let right = self.plan.input(id, 1)?;
        let left_columns = self.plan.schema(left).id_set();

        let mut retained = vec![];
        let mut left_predicates = vec![];
        let mut right_predicates = vec![];
        match join.join_type {
            JoinType::Inner => {
                let mut conditions = join.all_conditions();
                conditions.extend(predicates);
                join.set_conditions(conditions, self.plan.schema(left), self.plan.schema(right));
                left_predicates = std::mem::take(&mut join.left_conditions);
                right_predicates = std::mem::take(&mut join.right_conditions);
            }
            JoinType::LeftOuter | JoinType::RightOuter => {
                let (preserved, preserved_columns) = if join.join_type == JoinType::LeftOuter {
                    (&mut left_predicates, left_columns)
                } else {
                    (&mut right_predicates, self.plan.schema(right).id_set())
                };
                for predicate in predicates {
                    let columns = predicate.columns();
                    if !columns.is_empty() && columns.iter().all(|c| preserved_columns.contains(c)) {
                        preserved.push(predicate);
                    } else {
                        retained.push(predicate);
                    }
                }
                // ON conditions over the null supplying side only filter that side.
                if join.join_type == JoinType::LeftOuter {
                    right_predicates = std::mem::take(&mut join.right_conditions);
                } else {
                    left_predicates = std::mem::take(&mut join.left_conditions);
                }
            }
            _ => {
                let aux = join.aux_column.as_ref().map(|c| c.id);
                for predicate in predicates {
                    let columns = predicate.columns();
                    if aux.map_or(false, |aux| columns.contains(&aux)) {
                        retained.push(predicate);
                    } else {
                        left_predicates.push(predicate);
                    }
                }
                // Filtering the inner side would turn NULL flags of a null aware join into
                // FALSE.
                if !join.null_aware {
                    right_predicates = std::mem::take(&mut join.right_conditions);
                }
            }
        }

        self.push_into_child(id, 0, left_predicates)?;
        self.push_into_child(id, 1, right_predicates)?;
        Ok((join, retained))
    }

    /// Pushes `predicates` into the input `idx` of `id`, leftovers go into a selection
    /// between them.
    fn push_into_child(&mut self, id: PlanNodeId, idx: usize, predicates: Vec<ScalarExpr>) -> OptResult<()> {
        let child = self.plan.input(id, idx)?;
        let (retained, new_child) = self.push_down(child, predicates)?;
        let new_child = self.add_selection(new_child, retained)?;
        self.plan.set_input(id, idx, new_child);
        Ok(())
    }

    fn add_selection(&mut self, input: PlanNodeId, predicates: Vec<ScalarExpr>) -> OptResult<PlanNodeId> {
        if predicates.is_empty() {
            return Ok(input);
        }
        self.plan.add_node(
            self.ctx.ids(),
            LogicalOperator::LogicalSelection(Selection::new(predicates)),
            vec![input],
        )
    }
}
