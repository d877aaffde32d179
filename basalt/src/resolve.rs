//! Preparation of a rewritten logical plan for physical conversion: access paths of data
//! sources are computed and every column reference is bound to its input offset.

use std::collections::HashSet;

use log::trace;

use crate::catalog::IndexInfo;
use crate::error::OptResult;
use crate::expr::{BinaryOp, ScalarExpr};
use crate::operator::LogicalOperator::LogicalScan;
use crate::operator::{AccessPath, DataSource, OperatorTrait};
use crate::plan::{ColumnId, LogicalPlan, Schema};

/// Computes the access paths of every data source: the table path, plus one path per
/// index.
pub fn resolve_access_paths(plan: &mut LogicalPlan) -> OptResult<()> {
    for id in plan.post_order() {
        if let LogicalScan(source) = plan.operator_mut(id) {
            let paths = access_paths(source);
            trace!(
                "Resolved {} access paths of {}",
                paths.len(),
                source.table_name()
            );
            source.set_access_paths(paths);
        }
    }
    Ok(())
}

/// Binds column references of every operator to offsets in the rows of its inputs.
pub fn bind_columns(plan: &mut LogicalPlan) -> OptResult<()> {
    for id in plan.post_order() {
        let schemas: Vec<Schema> = plan
            .inputs(id)
            .iter()
            .map(|input| plan.schema(*input).clone())
            .collect();
        let schemas: Vec<&Schema> = schemas.iter().collect();
        plan.operator_mut(id).bind_columns(&schemas)?;
    }
    Ok(())
}

fn access_paths(source: &DataSource) -> Vec<AccessPath> {
    let conditions = source.pushed_conditions();
    let mut paths = vec![];

    let table_path = match source.handle_column() {
        Some(handle) => key_path(None, &[handle.id], conditions, false),
        None => AccessPath {
            index: None,
            access_conditions: vec![],
            filters: conditions.to_vec(),
            equal_prefix: 0,
            covering: true,
        },
    };
    paths.push(table_path);

    let handle = source.handle_column().map(|c| c.id);
    let mut used: HashSet<ColumnId> = source.columns().iter().map(|c| c.id).collect();
    used.extend(source.referenced_columns());
    for index in &source.table().indices {
        // A primary key over the handle is the table path itself.
        if index.primary && handle.is_some() {
            continue;
        }
        let key_columns = index
            .columns
            .iter()
            .map_while(|name| source.column_by_name(name).map(|c| c.id))
            .collect::<Vec<_>>();
        let mut available: HashSet<ColumnId> = key_columns.iter().copied().collect();
        available.extend(handle);
        let covering = key_columns.len() == index.columns.len() && used.is_subset(&available);
        paths.push(key_path(Some(index.clone()), &key_columns, conditions, covering));
    }
    paths
}

/// Splits `conditions` into key range conditions over a prefix of `key_columns` and
/// filters.
fn key_path(
    index: Option<IndexInfo>,
    key_columns: &[ColumnId],
    conditions: &[ScalarExpr],
    covering: bool,
) -> AccessPath {
    let mut remaining = conditions.to_vec();
    let mut access_conditions = vec![];
    let mut equal_prefix = 0;
    for column in key_columns {
        let (equal, rest): (Vec<_>, Vec<_>) = remaining
            .into_iter()
            .partition(|c| key_comparison(c, *column) == Some(BinaryOp::Eq));
        remaining = rest;
        if let Some(first) = equal.into_iter().next() {
            access_conditions.push(first);
            equal_prefix += 1;
            continue;
        }
        access_conditions.extend(remaining.into_iter().filter(|c| {
            matches!(
                key_comparison(c, *column),
                Some(BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq)
            )
        }));
        break;
    }
    // Duplicate equalities on one key column stay as filters.
    let filters = conditions
        .iter()
        .filter(|c| !access_conditions.contains(c))
        .cloned()
        .collect();
    AccessPath {
        index,
        access_conditions,
        filters,
        equal_prefix,
        covering,
    }
}

/// Operator of a comparison between `column` and a value constant for one scan, with the
/// column on the left.
pub(crate) fn key_comparison(condition: &ScalarExpr, column: ColumnId) -> Option<BinaryOp> {
    if let ScalarExpr::Binary { op, left, right } = condition {
        if !op.is_comparison() || *op == BinaryOp::NotEq {
            return None;
        }
        match (left.as_column(), right.as_column()) {
            (Some(c), _) if c.id == column && right.columns().is_empty() => return Some(*op),
            (_, Some(c)) if c.id == column && left.columns().is_empty() => return op.swap(),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::lit_i64;
    use arrow_schema::DataType;

    fn col(id: ColumnId) -> ScalarExpr {
        ScalarExpr::column(id, DataType::Int64)
    }

    #[test]
    fn test_key_comparison() {
        let cond = ScalarExpr::binary(BinaryOp::Lt, lit_i64(3), col(1));
        assert_eq!(Some(BinaryOp::Gt), key_comparison(&cond, 1));
        assert_eq!(None, key_comparison(&cond, 2));
        let cond = ScalarExpr::binary(BinaryOp::Eq, col(1), col(2));
        assert_eq!(None, key_comparison(&cond, 1));
        let correlated = ScalarExpr::Correlated(crate::expr::ColumnRef::new(9, DataType::Int64));
        let cond = ScalarExpr::binary(BinaryOp::Eq, col(1), correlated);
        assert_eq!(Some(BinaryOp::Eq), key_comparison(&cond, 1));
    }

    #[test]
    fn test_key_path_prefix() {
        let conditions = vec![
            ScalarExpr::binary(BinaryOp::Eq, col(1), lit_i64(1)),
            ScalarExpr::binary(BinaryOp::Gt, col(2), lit_i64(5)),
            ScalarExpr::binary(BinaryOp::Eq, col(3), lit_i64(7)),
        ];
        let path = key_path(None, &[1, 2, 3], &conditions, false);
        assert_eq!(1, path.equal_prefix);
        assert_eq!(2, path.access_conditions.len());
        assert_eq!(vec![conditions[2].clone()], path.filters);

        let path = key_path(None, &[3], &conditions, true);
        assert_eq!(1, path.equal_prefix);
        assert_eq!(2, path.filters.len());
    }
}
