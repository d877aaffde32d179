use std::cmp::Ordering;
use std::collections::HashMap;

use anyhow::{anyhow, bail};
use basalt::expr::types::is_integer;
use basalt::expr::{AggFunc, AggregateCall, ScalarExpr};
use basalt::operator::PhysicalOperator::*;
use basalt::operator::{Aggregation, DataSource, IndexScan, Join, JoinType, SortItem};
use basalt::plan::{PhysicalNodeRef, PhysicalPlan, PlanNodeId, Schema};
use datafusion_common::ScalarValue;
use itertools::Itertools;
use log::{debug, trace};

use crate::error::{ExecResult, ExecutionError};
use crate::eval::{as_f64, as_i64, cast, compare, normalize, null_of, sort_order, Env, EvalContext, Row};
use crate::storage::MemDatabase;

/// Materializing executor of physical plans.
///
/// Every operator consumes the complete output of its inputs. Joins and applies evaluate
/// their conditions pair by pair, hash tables only narrow down the candidate pairs.
pub struct Executor<'a> {
    db: &'a MemDatabase,
    /// Rows of every cache node, per value of the outer columns.
    caches: HashMap<PlanNodeId, HashMap<Vec<ScalarValue>, Vec<Row>>>,
}

impl<'a> Executor<'a> {
    pub fn new(db: &'a MemDatabase) -> Self {
        Self {
            db,
            caches: HashMap::new(),
        }
    }

    pub fn execute(&mut self, plan: &PhysicalPlan) -> ExecResult<Vec<Row>> {
        let rows = self.execute_node(plan.root(), &Env::new())?;
        debug!("Plan returned {} rows", rows.len());
        Ok(rows)
    }

    fn execute_node(&mut self, node: &PhysicalNodeRef, env: &Env) -> ExecResult<Vec<Row>> {
        trace!("Executing {}", node.operator());
        let schema = node.schema();
        match node.operator() {
            PhysicalTableScan(scan) => {
                let order = match (scan.keep_order, scan.source.table().handle_offset()) {
                    (true, Some(handle)) => Some((vec![handle], scan.desc)),
                    _ => None,
                };
                let conditions = scan.access_conditions.iter().chain(&scan.filters);
                self.scan(&scan.source, conditions, order, schema, env)
            }
            PhysicalIndexScan(scan) => self.index_scan(scan, schema, env),
            PhysicalIndexLookup(lookup) => self.index_scan(&lookup.index_scan, schema, env),
            PhysicalDual(dual) => Ok(vec![vec![]; dual.row_count]),
            PhysicalSelection(selection) => {
                let input = child(node, 0)?;
                let mut rows = vec![];
                for row in self.execute_node(input, env)? {
                    let ctx = EvalContext::new(input.schema(), &row, env);
                    if ctx.all_true(&selection.conditions)? {
                        rows.push(row);
                    }
                }
                Ok(rows)
            }
            PhysicalProjection(projection) => {
                let input = child(node, 0)?;
                self.execute_node(input, env)?
                    .iter()
                    .map(|row| {
                        let ctx = EvalContext::new(input.schema(), row, env);
                        projection
                            .exprs
                            .iter()
                            .map(|expr| ctx.eval(expr))
                            .collect::<ExecResult<Row>>()
                    })
                    .collect()
            }
            PhysicalHashJoin(join) => self.execute_join(node, &join.join, true, env),
            PhysicalMergeJoin(join) => self.execute_join(node, &join.join, false, env),
            PhysicalApply(apply) => {
                let (outer, inner) = (child(node, 0)?, child(node, 1)?);
                let mut rows = vec![];
                for row in self.execute_node(outer, env)? {
                    let mut inner_env = env.clone();
                    let ctx = EvalContext::new(outer.schema(), &row, env);
                    for column in &apply.correlated_columns {
                        inner_env.insert(column.id, ctx.column(column)?);
                    }
                    let inner_rows = self.execute_node(inner, &inner_env)?;
                    rows.extend(join_rows(
                        &apply.join,
                        outer.schema(),
                        inner.schema(),
                        std::slice::from_ref(&row),
                        &inner_rows,
                        &inner_env,
                        true,
                    )?);
                }
                Ok(rows)
            }
            PhysicalHashAgg(agg) => self.execute_aggregation(node, &agg.agg, env),
            PhysicalStreamAgg(agg) => self.execute_aggregation(node, &agg.agg, env),
            PhysicalSort(sort) => {
                let input = child(node, 0)?;
                let rows = self.execute_node(input, env)?;
                sort_rows(&sort.items, input.schema(), rows, env)
            }
            PhysicalTopN(top_n) => {
                let input = child(node, 0)?;
                let rows = self.execute_node(input, env)?;
                let sorted = sort_rows(&top_n.items, input.schema(), rows, env)?;
                Ok(limit(sorted, top_n.offset, top_n.count))
            }
            PhysicalLimit(l) => {
                let rows = self.execute_node(child(node, 0)?, env)?;
                Ok(limit(rows, l.offset, l.count))
            }
            PhysicalUnion(_) => {
                let mut rows = vec![];
                for input in node.inputs() {
                    rows.extend(self.execute_node(input, env)?);
                }
                Ok(rows)
            }
            PhysicalMaxOneRow(_) => {
                let rows = self.execute_node(child(node, 0)?, env)?;
                if rows.len() > 1 {
                    bail!(ExecutionError::MoreThanOneRow);
                }
                Ok(rows)
            }
            PhysicalCache(cache) => {
                // Values of enclosing applies are part of the key as well.
                let mut key = vec![];
                for column in &cache.keys {
                    let value = env
                        .get(&column.id)
                        .ok_or(ExecutionError::UnboundCorrelated(column.id))?;
                    key.push(normalize(value));
                }
                key.extend(
                    env.iter()
                        .filter(|(id, _)| cache.keys.iter().all(|k| k.id != **id))
                        .sorted_by_key(|(id, _)| **id)
                        .map(|(_, value)| normalize(value)),
                );
                if let Some(rows) = self.caches.get(&node.id()).and_then(|c| c.get(&key)) {
                    return Ok(rows.clone());
                }
                let rows = self.execute_node(child(node, 0)?, env)?;
                self.caches
                    .entry(node.id())
                    .or_default()
                    .insert(key, rows.clone());
                Ok(rows)
            }
        }
    }

    fn index_scan(&self, scan: &IndexScan, schema: &Schema, env: &Env) -> ExecResult<Vec<Row>> {
        let order = if scan.keep_order {
            let table = scan.source.table();
            let offsets = scan
                .index
                .columns
                .iter()
                .filter_map(|name| table.column_offset(name))
                .collect();
            Some((offsets, scan.desc))
        } else {
            None
        };
        let conditions = scan.access_conditions.iter().chain(&scan.filters);
        self.scan(&scan.source, conditions, order, schema, env)
    }

    /// Reads the stored rows of a data source, in the order of the table columns at
    /// `order` if any.
    fn scan<'e, I>(
        &self,
        source: &DataSource,
        conditions: I,
        order: Option<(Vec<usize>, bool)>,
        schema: &Schema,
        env: &Env,
    ) -> ExecResult<Vec<Row>>
    where
        I: Iterator<Item = &'e ScalarExpr>,
    {
        let conditions: Vec<&ScalarExpr> = conditions.collect();
        let mut stored: Vec<&Row> = self.db.rows(source.table_name())?.iter().collect();
        if let Some((offsets, desc)) = order {
            stored.sort_by(|a, b| {
                let ordering = offsets
                    .iter()
                    .map(|&idx| sort_order(&a[idx], &b[idx]))
                    .find(|o| o.is_ne())
                    .unwrap_or(Ordering::Equal);
                if desc {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }

        let mut rows = vec![];
        for stored_row in stored {
            let row: Row = source
                .offsets()
                .iter()
                .map(|&offset| stored_row[offset].clone())
                .collect();
            let ctx = EvalContext::new(schema, &row, env);
            if ctx.all_true(conditions.iter().copied())? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    fn execute_join(&mut self, node: &PhysicalNodeRef, join: &Join, hashed: bool, env: &Env) -> ExecResult<Vec<Row>> {
        let (left, right) = (child(node, 0)?, child(node, 1)?);
        let left_rows = self.execute_node(left, env)?;
        let right_rows = self.execute_node(right, env)?;
        join_rows(
            join,
            left.schema(),
            right.schema(),
            &left_rows,
            &right_rows,
            env,
            hashed,
        )
    }

    fn execute_aggregation(&mut self, node: &PhysicalNodeRef, agg: &Aggregation, env: &Env) -> ExecResult<Vec<Row>> {
        let input = child(node, 0)?;
        let schema = input.schema();
        let mut groups: Vec<Vec<Row>> = vec![];
        let mut positions: HashMap<Vec<ScalarValue>, usize> = HashMap::new();
        for row in self.execute_node(input, env)? {
            let ctx = EvalContext::new(schema, &row, env);
            let key = agg
                .group_by
                .iter()
                .map(|expr| ctx.eval(expr).map(|v| normalize(&v)))
                .collect::<ExecResult<Vec<_>>>()?;
            let pos = *positions.entry(key).or_insert_with(|| {
                groups.push(vec![]);
                groups.len() - 1
            });
            groups[pos].push(row);
        }
        if groups.is_empty() && agg.group_by.is_empty() {
            groups.push(vec![]);
        }

        groups
            .iter()
            .map(|rows| {
                agg.aggregates
                    .iter()
                    .map(|call| accumulate(call, schema, rows, env))
                    .collect::<ExecResult<Row>>()
            })
            .collect()
    }
}

fn child(node: &PhysicalNodeRef, idx: usize) -> ExecResult<&PhysicalNodeRef> {
    node.inputs()
        .get(idx)
        .ok_or_else(|| anyhow!("{} has no input {idx}", node.operator()))
}

fn limit(rows: Vec<Row>, offset: u64, count: u64) -> Vec<Row> {
    rows.into_iter()
        .skip(offset as usize)
        .take(count as usize)
        .collect()
}

fn sort_rows(items: &[SortItem], schema: &Schema, rows: Vec<Row>, env: &Env) -> ExecResult<Vec<Row>> {
    let mut keyed = rows
        .into_iter()
        .map(|row| {
            let ctx = EvalContext::new(schema, &row, env);
            let keys = items
                .iter()
                .map(|item| ctx.column(&item.column))
                .collect::<ExecResult<Vec<_>>>()?;
            Ok((keys, row))
        })
        .collect::<ExecResult<Vec<_>>>()?;
    keyed.sort_by(|(a, _), (b, _)| {
        a.iter()
            .zip(b)
            .zip(items)
            .map(|((x, y), item)| {
                let ordering = sort_order(x, y);
                if item.desc {
                    ordering.reverse()
                } else {
                    ordering
                }
            })
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    });
    Ok(keyed.into_iter().map(|(_, row)| row).collect())
}

fn null_row(schema: &Schema) -> ExecResult<Row> {
    schema
        .columns()
        .iter()
        .map(|column| null_of(&column.data_type))
        .collect()
}

fn concat(left: &Row, right: &Row) -> Row {
    left.iter().chain(right).cloned().collect()
}

/// Joins every left row with the right rows matching it.
///
/// A right outer join walks the right rows in order, every other join walks the left rows,
/// so the output keeps the order of the driving side.
fn join_rows(
    join: &Join,
    left_schema: &Schema,
    right_schema: &Schema,
    left: &[Row],
    right: &[Row],
    env: &Env,
    hashed: bool,
) -> ExecResult<Vec<Row>> {
    let joined_schema = left_schema.concat(right_schema);
    // NULL keys take part in null aware joins, so every pair is compared there.
    let table = if hashed && !join.null_aware && !join.equal_conditions.is_empty() {
        let mut table: HashMap<Vec<ScalarValue>, Vec<usize>> = HashMap::new();
        for (idx, row) in right.iter().enumerate() {
            let ctx = EvalContext::new(right_schema, row, env);
            let key = join
                .equal_conditions
                .iter()
                .map(|(_, r)| ctx.column(r))
                .collect::<ExecResult<Vec<_>>>()?;
            if key.iter().all(|v| !v.is_null()) {
                table
                    .entry(key.iter().map(normalize).collect())
                    .or_default()
                    .push(idx);
            }
        }
        Some(table)
    } else {
        None
    };

    let mut matches = Vec::with_capacity(left.len());
    let mut unknown = Vec::with_capacity(left.len());
    for row in left {
        let left_ctx = EvalContext::new(left_schema, row, env);
        let left_keys = join
            .equal_conditions
            .iter()
            .map(|(l, _)| left_ctx.column(l))
            .collect::<ExecResult<Vec<_>>>()?;
        let candidates: Vec<usize> = match &table {
            Some(table) => {
                let key: Vec<ScalarValue> = left_keys.iter().map(normalize).collect();
                table.get(&key).cloned().unwrap_or_default()
            }
            None => (0..right.len()).collect(),
        };
        let mut matched = vec![];
        let mut null_compared = false;
        for idx in candidates {
            let right_ctx = EvalContext::new(right_schema, &right[idx], env);
            let mut equal = Some(true);
            for (value, (_, r)) in left_keys.iter().zip(&join.equal_conditions) {
                match compare(value, &right_ctx.column(r)?) {
                    Some(Ordering::Equal) => {}
                    Some(_) => {
                        equal = Some(false);
                        break;
                    }
                    None => equal = None,
                }
            }
            if equal == Some(false) {
                continue;
            }
            let pair = concat(row, &right[idx]);
            let ctx = EvalContext::new(&joined_schema, &pair, env);
            let conditions = join
                .left_conditions
                .iter()
                .chain(&join.right_conditions)
                .chain(&join.other_conditions);
            match (equal, ctx.truth_of_all(conditions)?) {
                (_, Some(false)) => {}
                (Some(true), Some(true)) => matched.push(idx),
                _ => null_compared = true,
            }
        }
        matches.push(matched);
        unknown.push(null_compared);
    }

    let mut rows = vec![];
    match join.join_type {
        JoinType::Inner | JoinType::LeftOuter => {
            let padding = null_row(right_schema)?;
            for (row, matched) in left.iter().zip(&matches) {
                rows.extend(matched.iter().map(|&idx| concat(row, &right[idx])));
                if matched.is_empty() && join.join_type == JoinType::LeftOuter {
                    rows.push(concat(row, &padding));
                }
            }
        }
        JoinType::RightOuter => {
            let mut by_right: Vec<Vec<usize>> = vec![vec![]; right.len()];
            for (left_idx, matched) in matches.iter().enumerate() {
                for &idx in matched {
                    by_right[idx].push(left_idx);
                }
            }
            let padding = null_row(left_schema)?;
            for (row, matched) in right.iter().zip(&by_right) {
                rows.extend(matched.iter().map(|&idx| concat(&left[idx], row)));
                if matched.is_empty() {
                    rows.push(concat(&padding, row));
                }
            }
        }
        JoinType::Semi | JoinType::AntiSemi => {
            let keep_matched = join.join_type == JoinType::Semi;
            for (row, matched) in left.iter().zip(&matches) {
                if matched.is_empty() != keep_matched {
                    rows.push(row.clone());
                }
            }
        }
        JoinType::LeftOuterSemi | JoinType::AntiLeftOuterSemi => {
            let anti = join.join_type == JoinType::AntiLeftOuterSemi;
            for ((row, matched), null_compared) in left.iter().zip(&matches).zip(&unknown) {
                let found = if !matched.is_empty() {
                    Some(true)
                } else if join.null_aware && *null_compared {
                    None
                } else {
                    Some(false)
                };
                let mut row = row.clone();
                row.push(ScalarValue::Boolean(found.map(|found| found != anti)));
                rows.push(row);
            }
        }
    }
    Ok(rows)
}

fn accumulate(call: &AggregateCall, schema: &Schema, rows: &[Row], env: &Env) -> ExecResult<ScalarValue> {
    let mut values = Vec::with_capacity(rows.len());
    for row in rows {
        let ctx = EvalContext::new(schema, row, env);
        let args = call
            .args
            .iter()
            .map(|arg| ctx.eval(arg))
            .collect::<ExecResult<Vec<_>>>()?;
        values.push(args);
    }
    if call.distinct {
        values = values
            .into_iter()
            .unique_by(|args| args.iter().map(normalize).collect::<Vec<_>>())
            .collect();
    }

    let return_type = call.return_type();
    let present = || -> Vec<ScalarValue> {
        values
            .iter()
            .filter_map(|args| args.first())
            .filter(|v| !v.is_null())
            .cloned()
            .collect()
    };
    let result = match call.func {
        AggFunc::Count => {
            let count = values
                .iter()
                .filter(|args| args.iter().all(|v| !v.is_null()))
                .count();
            Some(ScalarValue::Int64(Some(count as i64)))
        }
        AggFunc::FirstRow => values.first().and_then(|args| args.first()).cloned(),
        AggFunc::Sum => {
            let present = present();
            match present.is_empty() {
                true => None,
                false if is_integer(&return_type) => {
                    Some(ScalarValue::Int64(Some(present.iter().filter_map(as_i64).sum())))
                }
                false => {
                    let sum: f64 = present.iter().filter_map(as_f64).sum();
                    Some(cast(&ScalarValue::Float64(Some(sum)), &return_type)?)
                }
            }
        }
        AggFunc::Avg => {
            let present = present();
            let sum: f64 = present.iter().filter_map(as_f64).sum();
            (!present.is_empty()).then(|| ScalarValue::Float64(Some(sum / present.len() as f64)))
        }
        AggFunc::Max => present().into_iter().max_by(sort_order),
        AggFunc::Min => present().into_iter().min_by(sort_order),
    };
    match result {
        Some(value) => Ok(value),
        None => null_of(&return_type),
    }
}
