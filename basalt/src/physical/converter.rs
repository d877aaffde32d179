use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context};
use log::trace;

use crate::cost::{Cost, CostContext, EQUAL_ACCESS_FACTOR, RANGE_ACCESS_FACTOR, SELECTION_FACTOR};
use crate::error::{OptResult, OptimizerError};
use crate::expr::ColumnRef;
use crate::operator::LogicalOperator::{
    LogicalAggregation, LogicalApply, LogicalDual, LogicalJoin, LogicalLimit, LogicalMaxOneRow,
    LogicalProjection, LogicalScan, LogicalSelection, LogicalSort, LogicalUnion,
};
use crate::operator::PhysicalOperator::{
    PhysicalApply, PhysicalDual, PhysicalHashAgg, PhysicalHashJoin, PhysicalIndexLookup,
    PhysicalIndexScan, PhysicalLimit, PhysicalMaxOneRow, PhysicalMergeJoin, PhysicalProjection,
    PhysicalSelection, PhysicalSort, PhysicalStreamAgg, PhysicalTableScan, PhysicalTopN,
    PhysicalUnion,
};
use crate::operator::{
    AccessPath, Aggregation, DataSource, HashAgg, HashJoin, IndexLookup, IndexScan, Join,
    JoinType, MergeJoin, OperatorTrait, PhysicalOperator, PhysicalOperatorTrait, Sort, SortItem,
    StreamAgg, TableScan, TopN,
};
use crate::plan::{
    IdAllocator, LogicalPlan, PhysicalNodeBuilder, PhysicalNodeRef, PhysicalPlan, PlanNodeId,
    Schema,
};
use crate::properties::{Enforcer, OrderSpec, PhysicalProp, RequiredProperty, SortColumn};
use crate::stat::{derive_statistics, Statistics};

/// Converts a logical plan into the cheapest physical plan.
///
/// Each logical node is converted once per distinct required property. A node lists its
/// physical candidates in a fixed declaration order: candidates providing the required
/// ordering by themselves win over the others, the cheapest of the others gets a `Sort` or
/// `TopN` on top. Among equally cheap candidates the first declared one is chosen.
pub struct PhysicalConverter<'a> {
    plan: &'a LogicalPlan,
    ids: &'a mut IdAllocator,
    join_concurrency: usize,
    stats: HashMap<PlanNodeId, Statistics>,
    memo: HashMap<(PlanNodeId, RequiredProperty), PhysicalNodeRef>,
}

impl<'a> PhysicalConverter<'a> {
    /// `ids` must be the allocator the logical plan was built with, enforcers take fresh
    /// ids from it.
    pub fn new(plan: &'a LogicalPlan, ids: &'a mut IdAllocator, join_concurrency: usize) -> Self {
        Self {
            plan,
            ids,
            join_concurrency: join_concurrency.max(1),
            stats: derive_statistics(plan),
            memo: HashMap::new(),
        }
    }

    pub fn convert_plan(mut self) -> OptResult<PhysicalPlan> {
        let root = self.convert(self.plan.root(), &RequiredProperty::default())?;
        Ok(PhysicalPlan::new(root))
    }

    /// Best physical plan of the subtree rooted at `id` satisfying `required`.
    pub fn convert(
        &mut self,
        id: PlanNodeId,
        required: &RequiredProperty,
    ) -> OptResult<PhysicalNodeRef> {
        let key = (id, required.clone());
        if let Some(best) = self.memo.get(&key) {
            return Ok(best.clone());
        }
        let plan = self.plan;
        let candidates = self
            .candidates(id, required)
            .with_context(|| format!("Failed to convert {}", plan.operator(id).as_ref()))?;
        let best = self.choose(candidates, required)?;
        trace!(
            "Best plan of node {id} for {:?}: {}, cost {}",
            required,
            best.operator().as_ref(),
            best.cost()
        );
        self.memo.insert(key, best.clone());
        Ok(best)
    }

    fn rows(&self, id: PlanNodeId) -> f64 {
        self.stats.get(&id).map(|s| s.row_count).unwrap_or(1.0)
    }

    fn candidates(
        &mut self,
        id: PlanNodeId,
        required: &RequiredProperty,
    ) -> OptResult<Vec<PhysicalNodeRef>> {
        let plan = self.plan;
        let rows = self.rows(id);
        let schema = plan.schema(id).clone();
        let candidates = match plan.operator(id) {
            LogicalScan(source) => self.scan_candidates(id, source, required),
            LogicalDual(dual) => {
                vec![self.build(id, PhysicalDual(dual.clone()), vec![], schema, rows, None)]
            }
            LogicalSelection(selection) => {
                let child = self.convert(plan.input(id, 0)?, &required.without_limit())?;
                vec![self.build(
                    id,
                    PhysicalSelection(selection.clone()),
                    vec![child],
                    schema,
                    rows,
                    None,
                )]
            }
            LogicalProjection(projection) => {
                let passes_order = required
                    .sort
                    .columns()
                    .iter()
                    .all(|sort| projection.passes_through(sort.column));
                let child_required = if passes_order {
                    required.clone()
                } else {
                    RequiredProperty::new(OrderSpec::default(), required.limit)
                };
                let child = self.convert(plan.input(id, 0)?, &child_required)?;
                vec![self.build(
                    id,
                    PhysicalProjection(projection.clone()),
                    vec![child],
                    schema,
                    rows,
                    required.limit,
                )]
            }
            LogicalJoin(join) => self.join_candidates(id, join, required)?,
            LogicalApply(apply) => {
                // The outer order is kept, the inner input is evaluated once per outer row.
                let outer = self.convert(plan.input(id, 0)?, &required.without_limit())?;
                let inner = self.convert(plan.input(id, 1)?, &RequiredProperty::default())?;
                vec![self.build(
                    id,
                    PhysicalApply(apply.clone()),
                    vec![outer, inner],
                    schema,
                    rows,
                    None,
                )]
            }
            LogicalAggregation(agg) => self.agg_candidates(id, agg)?,
            LogicalSort(sort) => {
                let child_required = RequiredProperty::new(sort.order(), required.limit);
                vec![self.convert(plan.input(id, 0)?, &child_required)?]
            }
            LogicalLimit(limit) => {
                let child_required =
                    RequiredProperty::new(OrderSpec::default(), Some(limit.input_limit()));
                let child = self.convert(plan.input(id, 0)?, &child_required)?;
                vec![self.build(
                    id,
                    PhysicalLimit(limit.clone()),
                    vec![child],
                    schema,
                    rows,
                    required.limit,
                )]
            }
            LogicalUnion(union) => {
                let inputs = plan
                    .inputs(id)
                    .iter()
                    .map(|input| self.convert(*input, &RequiredProperty::default()))
                    .collect::<OptResult<Vec<_>>>()?;
                vec![self.build(id, PhysicalUnion(union.clone()), inputs, schema, rows, None)]
            }
            LogicalMaxOneRow(max_one_row) => {
                let child = self.convert(plan.input(id, 0)?, &RequiredProperty::default())?;
                vec![self.build(
                    id,
                    PhysicalMaxOneRow(max_one_row.clone()),
                    vec![child],
                    schema,
                    rows,
                    None,
                )]
            }
        };
        Ok(candidates)
    }

    fn scan_candidates(
        &mut self,
        id: PlanNodeId,
        source: &DataSource,
        required: &RequiredProperty,
    ) -> Vec<PhysicalNodeRef> {
        let schema = self.plan.schema(id).clone();
        let table_rows = source.table().row_count();
        let paths = if source.access_paths().is_empty() {
            vec![AccessPath {
                index: None,
                access_conditions: vec![],
                filters: source.pushed_conditions().to_vec(),
                equal_prefix: 0,
                covering: true,
            }]
        } else {
            source.access_paths().to_vec()
        };

        let mut candidates = vec![];
        for path in &paths {
            let scan_rows = access_rows(table_rows, path);
            let rows = if path.filters.is_empty() {
                scan_rows
            } else {
                scan_rows * SELECTION_FACTOR
            };
            for (keep_order, desc) in scan_orders(source, path, &required.sort) {
                let operator = match &path.index {
                    None => PhysicalTableScan(TableScan {
                        source: source.clone(),
                        access_conditions: path.access_conditions.clone(),
                        filters: path.filters.clone(),
                        keep_order,
                        desc,
                        scan_rows,
                    }),
                    Some(index) => {
                        let index_scan = IndexScan {
                            source: source.clone(),
                            index: index.clone(),
                            access_conditions: path.access_conditions.clone(),
                            filters: path.filters.clone(),
                            keep_order,
                            desc,
                            scan_rows,
                        };
                        if path.covering {
                            PhysicalIndexScan(index_scan)
                        } else {
                            PhysicalIndexLookup(IndexLookup { index_scan })
                        }
                    }
                };
                candidates.push(self.build(
                    id,
                    operator,
                    vec![],
                    schema.clone(),
                    rows,
                    required.limit,
                ));
            }
        }
        candidates
    }

    fn join_candidates(
        &mut self,
        id: PlanNodeId,
        join: &Join,
        required: &RequiredProperty,
    ) -> OptResult<Vec<PhysicalNodeRef>> {
        let plan = self.plan;
        let rows = self.rows(id);
        let schema = plan.schema(id);
        let (left, right) = (plan.input(id, 0)?, plan.input(id, 1)?);

        let hash_join = HashJoin {
            join: join.clone(),
            concurrency: self.join_concurrency,
        };
        let inputs = vec![
            self.convert(left, &RequiredProperty::default())?,
            self.convert(right, &RequiredProperty::default())?,
        ];
        let mut candidates = vec![self.build(
            id,
            PhysicalHashJoin(hash_join),
            inputs,
            schema.clone(),
            rows,
            None,
        )];

        let merge_join = MergeJoin { join: join.clone() };
        let mergeable = matches!(
            join.join_type,
            JoinType::Inner | JoinType::LeftOuter | JoinType::RightOuter
        ) && !join.equal_conditions.is_empty()
            && required.sort.all_asc()
            && required.sort.is_prefix_of(&merge_join.driving_keys());
        if mergeable {
            let sorted_on = |keys: Vec<_>| {
                RequiredProperty::sorted(OrderSpec::new(
                    keys.into_iter().map(SortColumn::asc).collect(),
                ))
            };
            let inputs = vec![
                self.convert(left, &sorted_on(join.left_keys()))?,
                self.convert(right, &sorted_on(join.right_keys()))?,
            ];
            candidates.push(self.build(
                id,
                PhysicalMergeJoin(merge_join),
                inputs,
                schema.clone(),
                rows,
                None,
            ));
        }
        Ok(candidates)
    }

    fn agg_candidates(&mut self, id: PlanNodeId, agg: &Aggregation) -> OptResult<Vec<PhysicalNodeRef>> {
        let plan = self.plan;
        let rows = self.rows(id);
        let schema = plan.schema(id);
        let input = plan.input(id, 0)?;

        let child = self.convert(input, &RequiredProperty::default())?;
        let mut candidates = vec![self.build(
            id,
            PhysicalHashAgg(HashAgg { agg: agg.clone() }),
            vec![child],
            schema.clone(),
            rows,
            None,
        )];

        if let Some(columns) = agg.group_by_columns().filter(|c| !c.is_empty()) {
            let sort = OrderSpec::new(columns.into_iter().map(SortColumn::asc).collect());
            let child = self.convert(input, &RequiredProperty::sorted(sort))?;
            candidates.push(self.build(
                id,
                PhysicalStreamAgg(StreamAgg { agg: agg.clone() }),
                vec![child],
                schema.clone(),
                rows,
                None,
            ));
        }
        Ok(candidates)
    }

    fn choose(
        &mut self,
        candidates: Vec<PhysicalNodeRef>,
        required: &RequiredProperty,
    ) -> OptResult<PhysicalNodeRef> {
        let (satisfying, others): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|candidate| candidate.order().satisfies(&required.sort));
        if let Some(best) = cheapest(satisfying) {
            return Ok(best);
        }
        match cheapest(others) {
            Some(best) => self.enforce(best, required),
            None => bail!(OptimizerError::Internal(
                "no physical candidate".to_string()
            )),
        }
    }

    /// Appends the operator making `child` satisfy `required`.
    fn enforce(
        &mut self,
        child: PhysicalNodeRef,
        required: &RequiredProperty,
    ) -> OptResult<PhysicalNodeRef> {
        let schema = child.schema().clone();
        let (operator, rows) = match required.enforcer(child.order()) {
            None => return Ok(child),
            Some(Enforcer::Sort(sort)) => {
                let mut sort = Sort::new(sort_items(&sort, &schema)?);
                sort.bind_columns(&[&schema])?;
                (PhysicalSort(sort), child.rows())
            }
            Some(Enforcer::TopN { sort, count }) => {
                let mut top_n = TopN::new(sort_items(&sort, &schema)?, 0, count);
                top_n.bind_columns(&[&schema])?;
                (PhysicalTopN(top_n), child.rows().min(count as f64))
            }
        };
        let id = self.ids.next_plan_node_id();
        Ok(self.build(id, operator, vec![child], schema, rows, required.limit))
    }

    fn build(
        &self,
        id: PlanNodeId,
        operator: PhysicalOperator,
        inputs: Vec<PhysicalNodeRef>,
        schema: Schema,
        rows: f64,
        limit: Option<u64>,
    ) -> PhysicalNodeRef {
        let ctx = CostContext {
            input_rows: inputs.iter().map(|input| input.rows()).collect(),
            input_costs: inputs.iter().map(|input| input.cost()).collect(),
            output_rows: rows,
            limit,
            join_concurrency: self.join_concurrency,
        };
        let cost = operator.cost(&ctx) + ctx.input_costs.iter().copied().sum::<Cost>();
        let order = operator.output_order(&inputs);
        Arc::new(
            PhysicalNodeBuilder::new(id, operator, schema)
                .add_inputs(inputs)
                .with_rows(rows)
                .with_cost(cost)
                .with_order(order)
                .build(),
        )
    }
}

/// The cheapest candidate, the first declared one among equally cheap candidates.
pub(crate) fn cheapest(candidates: Vec<PhysicalNodeRef>) -> Option<PhysicalNodeRef> {
    candidates
        .into_iter()
        .enumerate()
        .min_by(|(i, a), (j, b)| a.cost().total_cmp(&b.cost()).then(i.cmp(j)))
        .map(|(_, candidate)| candidate)
}

fn sort_items(sort: &OrderSpec, schema: &Schema) -> OptResult<Vec<SortItem>> {
    sort.columns()
        .iter()
        .map(|sort| match schema.column_by_id(sort.column) {
            Some(column) => Ok(SortItem::new(
                ColumnRef::new(column.id, column.data_type.clone()),
                sort.desc,
            )),
            None => bail!(OptimizerError::Internal(format!(
                "sort column #{} is not produced by the input",
                sort.column
            ))),
        })
        .collect()
}

/// Estimated rows read through the key ranges of `path`.
fn access_rows(table_rows: f64, path: &AccessPath) -> f64 {
    if path.access_conditions.is_empty() {
        return table_rows;
    }
    let (key_len, unique) = match &path.index {
        Some(index) => (index.columns.len(), index.is_unique()),
        None => (1, true),
    };
    if unique && path.equal_prefix == key_len {
        return table_rows.min(1.0);
    }
    let mut rows = table_rows * EQUAL_ACCESS_FACTOR.powi(path.equal_prefix as i32);
    if path.access_conditions.len() > path.equal_prefix {
        rows *= RANGE_ACCESS_FACTOR;
    }
    rows.max(1.0).min(table_rows)
}

/// `(keep_order, desc)` variants worth scanning `path` with.
fn scan_orders(source: &DataSource, path: &AccessPath, sort: &OrderSpec) -> Vec<(bool, bool)> {
    let mut orders = vec![];
    let desc = sort.columns().first().map(|c| c.desc).unwrap_or(false);
    let same_direction = sort.columns().iter().all(|c| c.desc == desc);
    match &path.index {
        None => {
            orders.push((false, false));
            let handle_order = source.handle_column().map(|handle| {
                OrderSpec::new(vec![SortColumn {
                    column: handle.id,
                    desc,
                }])
            });
            if let Some(handle_order) = handle_order {
                if !sort.is_empty() && handle_order.satisfies(sort) {
                    orders.push((true, desc));
                }
            }
        }
        Some(index) => {
            if !path.access_conditions.is_empty() {
                orders.push((false, false));
            }
            if !sort.is_empty() && same_direction {
                let index_order = OrderSpec::new(
                    index
                        .columns
                        .iter()
                        .map_while(|name| source.column_by_name(name))
                        .map(|column| SortColumn {
                            column: column.id,
                            desc,
                        })
                        .collect(),
                );
                if index_order.satisfies(sort) {
                    orders.push((true, desc));
                }
            }
        }
    }
    orders
}

#[cfg(test)]
mod tests {
    use arrow_schema::DataType;
    use proptest::prelude::*;

    use super::*;
    use crate::operator::LogicalOperator::LogicalSort as SortNode;
    use crate::operator::{Limit, TableDual};
    use crate::resolve::{bind_columns, resolve_access_paths};
    use crate::test_utils::{scan, TestContext};

    fn dual(id: PlanNodeId, cost: f64) -> PhysicalNodeRef {
        Arc::new(
            PhysicalNodeBuilder::new(id, PhysicalDual(TableDual::new(1)), Schema::empty())
                .with_cost(Cost::from(cost))
                .build(),
        )
    }

    #[test]
    fn test_first_declared_wins_ties() {
        let best = cheapest(vec![dual(1, 3.0), dual(2, 3.0), dual(3, 4.0)]).unwrap();
        assert_eq!(1, best.id());
        let best = cheapest(vec![dual(2, 3.0), dual(1, 3.0)]).unwrap();
        assert_eq!(2, best.id());
        let best = cheapest(vec![dual(2, 3.0), dual(1, 2.0)]).unwrap();
        assert_eq!(1, best.id());
        assert!(cheapest(vec![]).is_none());
    }

    proptest! {
        #[test]
        fn test_cheapest_is_first_minimum(costs in prop::collection::vec(0u8..4, 1..8)) {
            let candidates = costs
                .iter()
                .enumerate()
                .map(|(id, cost)| dual(id as PlanNodeId, *cost as f64))
                .collect();
            let best = cheapest(candidates).unwrap();
            let min = *costs.iter().min().unwrap();
            let first = costs.iter().position(|cost| *cost == min).unwrap();
            prop_assert_eq!(first as PlanNodeId, best.id());
        }
    }

    /// `scan` -> sort on `column` -> limit.
    fn convert_sorted(table: &str, column: u32, desc: bool, count: u64) -> PhysicalPlan {
        let mut ctx = TestContext::new();
        let mut plan = LogicalPlan::new();
        let source = scan(&mut plan, &mut ctx, table);
        let item = SortItem::new(ColumnRef::new(column, DataType::Int64), desc);
        let sort = plan
            .add_node(ctx.ctx.ids(), SortNode(Sort::new(vec![item])), vec![source])
            .unwrap();
        let limit = plan
            .add_node(ctx.ctx.ids(), LogicalLimit(Limit::new(0, count)), vec![sort])
            .unwrap();
        plan.set_root(limit);
        resolve_access_paths(&mut plan).unwrap();
        bind_columns(&mut plan).unwrap();
        PhysicalConverter::new(&plan, ctx.ctx.ids(), 5)
            .convert_plan()
            .unwrap()
    }

    #[test]
    fn test_handle_order_satisfies_sort() {
        let plan = convert_sorted("t", 0, true, 1);
        let root = plan.root();
        assert!(matches!(root.operator(), PhysicalLimit(_)));
        let scan = root.inputs()[0].operator().as_physical_table_scan().unwrap();
        assert!(scan.keep_order);
        assert!(scan.desc);
    }

    #[test]
    fn test_limit_hint_becomes_top_n() {
        let plan = convert_sorted("k", 1, false, 2);
        let root = plan.root();
        let top_n = root.inputs()[0].operator().as_physical_top_n().unwrap();
        assert_eq!(2, top_n.count);
        assert_eq!(0, top_n.offset);
        assert_eq!(2.0, root.inputs()[0].rows());
        assert_eq!(Some(1), top_n.items[0].column.index);
    }

    #[test]
    fn test_access_rows() {
        let path = AccessPath {
            index: None,
            access_conditions: vec![crate::expr::lit_bool(true)],
            filters: vec![],
            equal_prefix: 1,
            covering: true,
        };
        assert_eq!(1.0, access_rows(100.0, &path));
        let path = AccessPath {
            equal_prefix: 0,
            ..path
        };
        assert!((access_rows(100.0, &path) - 33.0).abs() < 1e-9);
    }
}
