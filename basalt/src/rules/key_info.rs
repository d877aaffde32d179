use itertools::Itertools;
use log::debug;

use crate::error::OptResult;
use crate::operator::LogicalOperator::{
    LogicalAggregation, LogicalApply, LogicalDual, LogicalJoin, LogicalLimit, LogicalMaxOneRow,
    LogicalProjection, LogicalScan, LogicalSelection, LogicalSort, LogicalUnion,
};
use crate::operator::{DataSource, Join, JoinType};
use crate::optimizer::OptimizerContext;
use crate::plan::{ColumnId, LogicalPlan, PlanNodeId, Schema};
use crate::rules::{LogicalRule, RuleId};

/// Derives the unique keys of every node.
///
/// Once the rule has run, the plan keeps keys up to date whenever a schema is derived again.
#[derive(Clone, Default)]
pub struct BuildKeyInfoRule {}

impl BuildKeyInfoRule {
    pub fn new() -> Self {
        Self {}
    }
}

impl LogicalRule for BuildKeyInfoRule {
    fn apply(&self, plan: &mut LogicalPlan, _ctx: &mut OptimizerContext) -> OptResult<()> {
        plan.set_key_info_built();
        plan.derive_schemas()?;
        debug!(
            "Built key info, root keys: {:?}",
            plan.output_schema().keys()
        );
        Ok(())
    }

    fn rule_id(&self) -> RuleId {
        RuleId::BuildKeyInfo
    }
}

/// Unique keys of node `id` whose freshly derived columns are `schema`, from the keys of
/// its inputs.
pub(crate) fn derive_keys(plan: &LogicalPlan, id: PlanNodeId, schema: &Schema) -> Vec<Vec<ColumnId>> {
    let input_keys = |idx: usize| -> Vec<Vec<ColumnId>> {
        plan.inputs(id)
            .get(idx)
            .map(|input| plan.schema(*input).keys().to_vec())
            .unwrap_or_default()
    };

    let mut keys = match plan.operator(id) {
        LogicalScan(source) => source_keys(source),
        LogicalDual(dual) if dual.row_count <= 1 => vec![vec![]],
        LogicalDual(_) | LogicalUnion(_) => vec![],
        LogicalSelection(_) | LogicalSort(_) => input_keys(0),
        LogicalLimit(limit) => {
            let mut keys = input_keys(0);
            if limit.count <= 1 {
                keys.push(vec![]);
            }
            keys
        }
        LogicalMaxOneRow(_) => vec![vec![]],
        LogicalProjection(projection) => input_keys(0)
            .into_iter()
            .filter(|key| key.iter().all(|c| projection.passes_through(*c)))
            .collect(),
        LogicalAggregation(agg) => {
            if agg.group_by.is_empty() {
                vec![vec![]]
            } else {
                agg.group_by_columns()
                    .and_then(|columns| {
                        columns
                            .iter()
                            .map(|c| agg.first_row_output(*c))
                            .collect::<Option<Vec<_>>>()
                    })
                    .into_iter()
                    .collect()
            }
        }
        LogicalJoin(join) => join_keys(join, input_keys(0), input_keys(1)),
        LogicalApply(apply) => join_keys(&apply.join, input_keys(0), input_keys(1)),
    };
    keys.retain(|key| key.iter().all(|c| schema.contains(*c)));
    keys
}

/// Keys of unique indices whose columns are all output and not nullable.
fn source_keys(source: &DataSource) -> Vec<Vec<ColumnId>> {
    let table = source.table();
    let mut keys = vec![];
    if let Some(handle) = source.handle_column() {
        keys.push(vec![handle.id]);
    }
    for index in table.indices.iter().filter(|index| index.is_unique()) {
        let key = index
            .columns
            .iter()
            .map(|name| {
                let offset = table.column_offset(name)?;
                let not_null = index.primary || !table.columns[offset].nullable;
                source
                    .column_at_offset(offset)
                    .filter(|_| not_null)
                    .map(|c| c.id)
            })
            .collect::<Option<Vec<_>>>();
        if let Some(key) = key {
            keys.push(key);
        }
    }
    keys
}

/// Whether every row of a side matches at most one row of the other side, that is some key
/// of the other side is covered by its join keys.
fn matches_at_most_one(keys: &[Vec<ColumnId>], join_keys: &[ColumnId]) -> bool {
    keys.iter()
        .any(|key| key.iter().all(|c| join_keys.contains(c)))
}

fn join_keys(
    join: &Join,
    left: Vec<Vec<ColumnId>>,
    right: Vec<Vec<ColumnId>>,
) -> Vec<Vec<ColumnId>> {
    if join.join_type.is_semi_family() {
        return left;
    }
    let left_unique = matches_at_most_one(&right, &join.right_keys());
    let right_unique = matches_at_most_one(&left, &join.left_keys());

    let mut keys: Vec<Vec<ColumnId>> = left
        .iter()
        .cartesian_product(right.iter())
        .map(|(l, r)| l.iter().chain(r.iter()).copied().collect())
        .collect();
    match join.join_type {
        JoinType::Inner => {
            if left_unique {
                keys.extend(left);
            }
            if right_unique {
                keys.extend(right);
            }
        }
        JoinType::LeftOuter if left_unique => keys.extend(left),
        JoinType::RightOuter if right_unique => keys.extend(right),
        _ => {}
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::Limit;
    use crate::operator::LogicalOperator::LogicalLimit;
    use crate::test_utils::{scan, TestContext};

    #[test]
    fn test_keys_of_primary_key_and_unique_index() {
        let mut ctx = TestContext::new();
        let mut plan = LogicalPlan::new();
        let t = scan(&mut plan, &mut ctx, "t");
        plan.set_root(t);
        BuildKeyInfoRule::new().apply(&mut plan, &mut ctx.ctx).unwrap();
        // `a` is the integer primary key, `b` has a unique index but is nullable.
        assert_eq!(&[vec![0]], plan.schema(t).keys());
    }

    #[test]
    fn test_limit_one_is_max_one_row() {
        let mut ctx = TestContext::new();
        let mut plan = LogicalPlan::new();
        let t = scan(&mut plan, &mut ctx, "k");
        let limit = plan
            .add_node(ctx.ctx.ids(), LogicalLimit(Limit::new(0, 1)), vec![t])
            .unwrap();
        plan.set_root(limit);
        BuildKeyInfoRule::new().apply(&mut plan, &mut ctx.ctx).unwrap();
        assert!(plan.schema(limit).is_max_one_row());
        assert!(!plan.schema(t).is_max_one_row());
    }

    #[test]
    fn test_join_keys() {
        let mut join = Join::new(JoinType::Inner);
        join.equal_conditions = vec![(
            crate::expr::ColumnRef::new(1, arrow_schema::DataType::Int64),
            crate::expr::ColumnRef::new(3, arrow_schema::DataType::Int64),
        )];
        let keys = join_keys(&join, vec![vec![1]], vec![vec![3]]);
        assert!(keys.contains(&vec![1, 3]));
        assert!(keys.contains(&vec![1]));
        assert!(keys.contains(&vec![3]));

        let keys = join_keys(&join, vec![vec![2]], vec![vec![4]]);
        assert_eq!(vec![vec![2, 4]], keys);

        let semi = Join::new(JoinType::Semi);
        assert_eq!(vec![vec![2]], join_keys(&semi, vec![vec![2]], vec![]));
    }
}
