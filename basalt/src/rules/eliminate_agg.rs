use arrow_schema::DataType;
use datafusion_common::ScalarValue;
use log::debug;

use crate::error::OptResult;
use crate::expr::{lit_i64, AggFunc, AggregateCall, ScalarExpr, UnaryOp};
use crate::operator::LogicalOperator::{LogicalAggregation, LogicalProjection};
use crate::operator::{AggStage, Aggregation, Projection};
use crate::optimizer::OptimizerContext;
use crate::plan::{LogicalPlan, PlanNodeId};
use crate::rules::{LogicalRule, RuleId};

/// Replaces an aggregation whose group-by columns cover a unique key of its input by a
/// projection: every group holds exactly one row.
#[derive(Clone, Default)]
pub struct EliminateAggRule {}

impl EliminateAggRule {
    pub fn new() -> Self {
        Self {}
    }

    fn can_eliminate(plan: &LogicalPlan, id: PlanNodeId, agg: &Aggregation) -> OptResult<bool> {
        if agg.stage == AggStage::Partial || agg.group_by.is_empty() {
            return Ok(false);
        }
        let group_by = match agg.group_by_columns() {
            Some(columns) => columns.into_iter().collect(),
            None => return Ok(false),
        };
        let input = plan.input(id, 0)?;
        Ok(plan.schema(input).has_key_within(&group_by))
    }
}

/// Value of an aggregate over a group of exactly one row.
fn single_row_value(call: &AggregateCall, data_type: &DataType) -> ScalarExpr {
    let arg = call.args.first().cloned();
    match (call.func, arg) {
        (AggFunc::Count, _) if call.is_count_star() => lit_i64(1),
        (AggFunc::Count, Some(arg)) => {
            ScalarExpr::unary(UnaryOp::IsNotNull, arg).cast(DataType::Int64)
        }
        (AggFunc::Avg, Some(arg)) => arg.cast(DataType::Float64),
        (_, Some(arg)) => arg.cast(data_type.clone()),
        (_, None) => ScalarExpr::Constant(ScalarValue::Null).cast(data_type.clone()),
    }
}

impl LogicalRule for EliminateAggRule {
    fn apply(&self, plan: &mut LogicalPlan, _ctx: &mut OptimizerContext) -> OptResult<()> {
        let mut changed = false;
        for id in plan.post_order() {
            let agg = match plan.operator(id) {
                LogicalAggregation(agg) => agg.clone(),
                _ => continue,
            };
            if !Self::can_eliminate(plan, id, &agg)? {
                continue;
            }
            let exprs = agg
                .aggregates
                .iter()
                .zip(agg.columns.iter())
                .map(|(call, column)| single_row_value(call, &column.data_type))
                .collect();
            debug!("Replacing aggregation {} by a projection", id);
            plan.set_operator(id, LogicalProjection(Projection::new(exprs, agg.columns)))?;
            changed = true;
        }
        if changed {
            plan.derive_schemas()?;
        }
        Ok(())
    }

    fn rule_id(&self) -> RuleId {
        RuleId::EliminateAgg
    }
}
