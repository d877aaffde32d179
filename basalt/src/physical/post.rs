use std::sync::Arc;

use crate::operator::Cache;
use crate::operator::PhysicalOperator::{PhysicalApply, PhysicalCache, PhysicalProjection};
use crate::plan::{IdAllocator, PhysicalNodeBuilder, PhysicalNodeRef};

/// Removes projections that output exactly the columns of their input, ids and names
/// included.
pub fn eliminate_projections(node: &PhysicalNodeRef) -> PhysicalNodeRef {
    let inputs: Vec<PhysicalNodeRef> = node.inputs().iter().map(eliminate_projections).collect();
    if let PhysicalProjection(projection) = node.operator() {
        if let [input] = inputs.as_slice() {
            if projection.is_identity(input.schema()) {
                return input.clone();
            }
        }
    }
    Arc::new(node.with_inputs(inputs))
}

/// Wraps the inner input of every apply in a [`Cache`] keyed by the correlated columns, so
/// that outer rows with equal correlated values evaluate the inner plan once.
pub fn insert_caches(node: &PhysicalNodeRef, ids: &mut IdAllocator) -> PhysicalNodeRef {
    let mut inputs: Vec<PhysicalNodeRef> = node
        .inputs()
        .iter()
        .map(|input| insert_caches(input, ids))
        .collect();
    if let PhysicalApply(apply) = node.operator() {
        if let Some(inner) = inputs.get_mut(1) {
            let cache = PhysicalNodeBuilder::new(
                ids.next_plan_node_id(),
                PhysicalCache(Cache::new(apply.correlated_columns.clone())),
                inner.schema().clone(),
            )
            .add_inputs(vec![inner.clone()])
            .with_rows(inner.rows())
            .with_cost(inner.cost())
            .with_order(inner.order().clone())
            .build();
            *inner = Arc::new(cache);
        }
    }
    Arc::new(node.with_inputs(inputs))
}

#[cfg(test)]
mod tests {
    use arrow_schema::DataType;

    use super::*;
    use crate::expr::ColumnRef;
    use crate::operator::PhysicalOperator::PhysicalDual;
    use crate::operator::{Apply, Join, JoinType, Projection, TableDual};
    use crate::plan::{ColumnDesc, Schema};

    fn leaf(id: u32, schema: Schema) -> PhysicalNodeRef {
        Arc::new(PhysicalNodeBuilder::new(id, PhysicalDual(TableDual::new(1)), schema).build())
    }

    #[test]
    fn test_identity_projection_only() {
        let column = ColumnDesc::new(1, "a", DataType::Int64, false);
        let schema = Schema::new(vec![column.clone()]);
        let input = leaf(0, schema.clone());

        let identity = Projection::new(vec![column.to_expr()], vec![column.clone()]);
        let node = PhysicalNodeBuilder::new(1, PhysicalProjection(identity), schema)
            .add_inputs(vec![input.clone()])
            .build();
        assert_eq!(input, eliminate_projections(&Arc::new(node)));

        let renamed = ColumnDesc::new(1, "b", DataType::Int64, false);
        let projection = Projection::new(vec![column.to_expr()], vec![renamed.clone()]);
        let node = PhysicalNodeBuilder::new(2, PhysicalProjection(projection), Schema::new(vec![renamed]))
            .add_inputs(vec![input])
            .build();
        let kept = eliminate_projections(&Arc::new(node));
        assert!(matches!(kept.operator(), PhysicalProjection(_)));
    }

    #[test]
    fn test_cache_wraps_apply_inner() {
        let outer = leaf(0, Schema::empty());
        let inner = leaf(1, Schema::empty());
        let correlated = vec![ColumnRef::new(7, DataType::Int64)];
        let apply = Apply::new(Join::new(JoinType::Semi), correlated.clone());
        let node = PhysicalNodeBuilder::new(2, PhysicalApply(apply), Schema::empty())
            .add_inputs(vec![outer, inner.clone()])
            .build();

        let mut ids = IdAllocator::default();
        let root = insert_caches(&Arc::new(node), &mut ids);
        let cache = &root.inputs()[1];
        assert_eq!(&Cache::new(correlated), cache.operator().as_physical_cache().unwrap());
        assert_eq!(&inner, &cache.inputs()[0]);
        assert!(matches!(root.inputs()[0].operator(), PhysicalDual(_)));
    }
}
