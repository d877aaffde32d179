use std::str::FromStr;

use anyhow::bail;
use datafusion_common::ScalarValue;

use crate::ast::{AstExpr, LimitClause, OrderByItem, Query, SelectField, SelectStmt};
use crate::error::{OptResult, OptimizerError};
use crate::expr::{AggFunc, AggregateCall, ColumnRef, ScalarExpr};
use crate::operator::LogicalOperator::{
    LogicalAggregation, LogicalDual, LogicalProjection, LogicalSelection, LogicalSort,
};
use crate::operator::{Aggregation, Projection, Selection, Sort, SortItem, TableDual};
use crate::plan::{ColumnDesc, ColumnId, PlanNodeId};
use crate::planner::expr::{collect_aggregates, contains_aggregate};
use crate::planner::{ExprRewriter, PlanBuilder};
use crate::rules::RuleId;

/// Output columns of a select block, visible ones first.
#[derive(Default)]
struct OutputColumns {
    exprs: Vec<ScalarExpr>,
    columns: Vec<ColumnDesc>,
}

impl OutputColumns {
    /// Adds a column computed by `expr`. A bare column reference keeps the id of the column
    /// it reads unless an earlier output column already has it.
    fn push(
        &mut self,
        rewriter: &mut ExprRewriter,
        expr: ScalarExpr,
        name: String,
        table: Option<String>,
    ) -> ColumnId {
        let source = expr
            .as_column()
            .and_then(|c| rewriter.input_column(c.id))
            .cloned();
        let id = match &source {
            Some(column) if !self.contains(column.id) => column.id,
            _ => rewriter.next_column_id(),
        };
        let nullable = source.map_or(true, |c| c.nullable);
        self.columns
            .push(ColumnDesc::new(id, name, expr.data_type(), nullable).with_table(table));
        self.exprs.push(expr);
        id
    }

    fn contains(&self, id: ColumnId) -> bool {
        self.columns.iter().any(|c| c.id == id)
    }

    fn column_ref(&self, id: ColumnId) -> Option<ColumnRef> {
        self.columns
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.column_ref())
    }
}

impl PlanBuilder<'_> {
    pub(super) fn build_select(
        &mut self,
        select: &SelectStmt,
        order_by: &[OrderByItem],
        limit: Option<LimitClause>,
    ) -> OptResult<PlanNodeId> {
        let mut plan = match &select.from {
            Some(from) => self.build_table_ref(from)?,
            None => self.add_node(LogicalDual(TableDual::new(1)), vec![])?,
        };
        let from_columns = self.schema(plan).columns().to_vec();

        if let Some(selection) = &select.selection {
            plan = self.build_selection(plan, selection, &[], "WHERE")?;
        }

        let mut aggregates = vec![];
        for field in &select.fields {
            if let SelectField::Expr { expr, .. } = field {
                collect_aggregates(expr, &mut aggregates)?;
            }
        }
        if let Some(having) = &select.having {
            collect_aggregates(having, &mut aggregates)?;
        }
        for item in order_by {
            collect_aggregates(&item.expr, &mut aggregates)?;
        }

        for item in &select.group_by {
            check_group_by_reference(item, select, self.schema(plan).columns())?;
        }

        let mut aggregated = vec![];
        if !select.group_by.is_empty() || !aggregates.is_empty() {
            let (node, mapping) = self.build_aggregation(plan, &select.group_by, aggregates)?;
            plan = node;
            aggregated = mapping;
        }
        if let Some(having) = &select.having {
            plan = self.build_selection(plan, having, &aggregated, "HAVING")?;
        }

        let mut rewriter = ExprRewriter::new(self, plan, &aggregated);
        let mut output = OutputColumns::default();
        for field in &select.fields {
            match field {
                SelectField::Wildcard { table } => {
                    if select.from.is_none() {
                        bail!(OptimizerError::InvalidWildCard);
                    }
                    let matched: Vec<&ColumnDesc> = from_columns
                        .iter()
                        .filter(|c| match table {
                            Some(t) => c.table.as_deref().map_or(false, |own| own.eq_ignore_ascii_case(t)),
                            None => true,
                        })
                        .collect();
                    if let (Some(t), true) = (table, matched.is_empty()) {
                        bail!(OptimizerError::UnknownTable(t.clone()));
                    }
                    for column in matched {
                        output.push(
                            &mut rewriter,
                            column.to_expr(),
                            column.name.clone(),
                            column.table.clone(),
                        );
                    }
                }
                SelectField::Expr { expr, alias } => {
                    let value = rewriter.rewrite_clause_item(expr, "field list")?;
                    let (name, table) = match (alias, expr) {
                        (Some(alias), _) => (alias.clone(), None),
                        (None, AstExpr::Column(name)) => {
                            let table = value
                                .as_column()
                                .and_then(|c| rewriter.input_column(c.id))
                                .and_then(|c| c.table.clone());
                            (name.name.clone(), table)
                        }
                        (None, _) => (expr.to_string(), None),
                    };
                    output.push(&mut rewriter, value, name, table);
                }
            }
        }
        let visible = output.columns.len();

        let mut sort_items = vec![];
        for item in order_by {
            let id = match resolve_output_column(&item.expr, &output.columns[..visible])? {
                Some(id) => id,
                None => {
                    let value = rewriter.rewrite_clause_item(&item.expr, "ORDER BY")?;
                    let existing = value
                        .as_column()
                        .map(|c| c.id)
                        .filter(|id| output.contains(*id));
                    match existing {
                        Some(id) => id,
                        None => output.push(&mut rewriter, value, item.expr.to_string(), None),
                    }
                }
            };
            if let Some(column) = output.column_ref(id) {
                sort_items.push(SortItem::new(column, item.desc));
            }
        }
        let plan = rewriter.plan();

        let visible_columns = output.columns[..visible].to_vec();
        let mut plan = self.add_node(
            LogicalProjection(Projection::new(output.exprs, output.columns)),
            vec![plan],
        )?;
        if select.distinct {
            plan = self.build_distinct(plan, Some(visible))?;
        }
        if !sort_items.is_empty() {
            plan = self.add_node(LogicalSort(Sort::new(sort_items)), vec![plan])?;
        }
        plan = self.build_limit(plan, limit)?;
        if self.schema(plan).len() > visible {
            let exprs = visible_columns.iter().map(|c| c.to_expr()).collect();
            plan = self.add_node(
                LogicalProjection(Projection::new(exprs, visible_columns)),
                vec![plan],
            )?;
        }
        Ok(plan)
    }

    fn build_selection(
        &mut self,
        input: PlanNodeId,
        expr: &AstExpr,
        aggregated: &[(AstExpr, ColumnRef)],
        clause: &'static str,
    ) -> OptResult<PlanNodeId> {
        let mut rewriter = ExprRewriter::new(self, input, aggregated);
        let conditions = match expr {
            AstExpr::Row(_) | AstExpr::Subquery(_) => {
                vec![rewriter.rewrite_clause_item(expr, clause)?]
            }
            _ => rewriter.rewrite_condition(expr)?,
        };
        let plan = rewriter.plan();
        if conditions.is_empty() {
            return Ok(plan);
        }
        self.add_node(LogicalSelection(Selection::new(conditions)), vec![plan])
    }

    /// Builds a complete aggregation computing `aggregates` over groups of `group_by`.
    ///
    /// Every input column is also output through a `first_row` aggregate keeping its id,
    /// so the select list resolves plain columns against the aggregation as usual.
    fn build_aggregation(
        &mut self,
        input: PlanNodeId,
        group_by: &[AstExpr],
        aggregates: Vec<AstExpr>,
    ) -> OptResult<(PlanNodeId, Vec<(AstExpr, ColumnRef)>)> {
        let mut rewriter = ExprRewriter::new(self, input, &[]);
        let group_by = group_by
            .iter()
            .map(|expr| rewriter.rewrite_clause_item(expr, "GROUP BY"))
            .collect::<OptResult<Vec<_>>>()?;
        let mut calls = vec![];
        for aggregate in &aggregates {
            if let AstExpr::Function {
                name,
                args,
                distinct,
            } = aggregate
            {
                let func = AggFunc::from_str(name)
                    .map_err(|_| OptimizerError::Unsupported(format!("function {name}")))?;
                let args = args
                    .iter()
                    .map(|arg| rewriter.rewrite(arg))
                    .collect::<OptResult<Vec<_>>>()?;
                calls.push(AggregateCall::new(func, args, *distinct));
            }
        }
        let input = rewriter.plan();

        let scalar = group_by.is_empty();
        let mut columns = vec![];
        let mut agg_calls = vec![];
        for column in self.schema(input).columns() {
            agg_calls.push(AggregateCall::first_row(column.to_expr()));
            let mut column = column.clone();
            column.nullable |= scalar;
            columns.push(column);
        }
        let mut mapping = vec![];
        for (ast, call) in aggregates.into_iter().zip(calls) {
            let column = ColumnDesc::new(
                self.next_column_id(),
                ast.to_string(),
                call.return_type(),
                call.func != AggFunc::Count,
            );
            mapping.push((ast, column.column_ref()));
            columns.push(column);
            agg_calls.push(call);
        }
        self.flags |= RuleId::BuildKeyInfo | RuleId::EliminateAgg | RuleId::AggPushDown;
        let node = self.add_node(
            LogicalAggregation(Aggregation::new(group_by, agg_calls, columns)),
            vec![input],
        )?;
        Ok((node, mapping))
    }

    /// Sorts the output of a union, items must name output columns.
    pub(super) fn build_union_order_by(&mut self, input: PlanNodeId, query: &Query) -> OptResult<PlanNodeId> {
        let columns = self.schema(input).columns().to_vec();
        let mut items = vec![];
        for item in &query.order_by {
            let id = resolve_output_column(&item.expr, &columns)?
                .ok_or_else(|| OptimizerError::UnknownColumn(item.expr.to_string()))?;
            if let Some(column) = columns.iter().find(|c| c.id == id) {
                items.push(SortItem::new(column.column_ref(), item.desc));
            }
        }
        self.add_node(LogicalSort(Sort::new(items)), vec![input])
    }
}

/// Resolves an ORDER BY item naming an output column by position or by name.
/// Rejects a GROUP BY item naming a select alias of an aggregate, which can't be grouped on.
fn check_group_by_reference(item: &AstExpr, select: &SelectStmt, input: &[ColumnDesc]) -> OptResult<()> {
    let name = match item {
        AstExpr::Column(name) if name.table.is_none() => &name.name,
        _ => return Ok(()),
    };
    if input.iter().any(|c| c.matches(None, name)) {
        return Ok(());
    }
    let aliases_aggregate = select.fields.iter().any(|field| match field {
        SelectField::Expr {
            expr,
            alias: Some(alias),
        } => alias.eq_ignore_ascii_case(name) && contains_aggregate(expr),
        _ => false,
    });
    if aliases_aggregate {
        bail!(OptimizerError::IllegalReference(format!(
            "'{name}' is a reference to a group function"
        )));
    }
    Ok(())
}

fn resolve_output_column(expr: &AstExpr, columns: &[ColumnDesc]) -> OptResult<Option<ColumnId>> {
    match expr {
        AstExpr::Literal(ScalarValue::Int64(Some(position))) => {
            match usize::try_from(*position).ok().and_then(|p| p.checked_sub(1)) {
                Some(idx) if idx < columns.len() => Ok(Some(columns[idx].id)),
                _ => bail!(OptimizerError::UnknownColumn(position.to_string())),
            }
        }
        AstExpr::Column(name) if name.table.is_none() => {
            let mut found: Option<ColumnId> = None;
            for column in columns.iter().filter(|c| c.name.eq_ignore_ascii_case(&name.name)) {
                match found {
                    Some(id) if id != column.id => {
                        bail!(OptimizerError::AmbiguousColumn(name.name.clone()))
                    }
                    _ => found = Some(column.id),
                }
            }
            Ok(found)
        }
        _ => Ok(None),
    }
}
