use std::str::FromStr;

use anyhow::bail;
use log::trace;

use crate::ast::{AstExpr, ColumnName, Query};
use crate::error::{OptResult, OptimizerError};
use crate::expr::{
    combine, conjunction, eq, not, AggFunc, BinaryOp, ColumnRef, ScalarExpr, UnaryOp,
};
use crate::operator::LogicalOperator::{LogicalApply, LogicalMaxOneRow};
use crate::operator::{aux_column, Apply, Join, JoinType, MaxOneRow};
use crate::plan::{ColumnDesc, ColumnId, PlanNodeId, Schema};
use crate::planner::PlanBuilder;
use crate::rules::RuleId;

/// Rewrites AST expressions into scalar expressions over the output of one plan node.
///
/// Sub-queries are planned on the fly: each one puts an `Apply` on top of the current
/// node, so the node a rewritten expression reads from is [`ExprRewriter::plan`], not
/// necessarily the node the rewriter started with.
pub(crate) struct ExprRewriter<'r, 'a> {
    builder: &'r mut PlanBuilder<'a>,
    plan: PlanNodeId,
    /// Aggregate calls already computed by an aggregation below `plan`.
    aggregates: &'r [(AstExpr, ColumnRef)],
}

impl<'r, 'a> ExprRewriter<'r, 'a> {
    pub(crate) fn new(
        builder: &'r mut PlanBuilder<'a>,
        plan: PlanNodeId,
        aggregates: &'r [(AstExpr, ColumnRef)],
    ) -> Self {
        Self {
            builder,
            plan,
            aggregates,
        }
    }

    pub(crate) fn plan(&self) -> PlanNodeId {
        self.plan
    }

    pub(crate) fn input_column(&self, id: ColumnId) -> Option<&ColumnDesc> {
        self.builder.schema(self.plan).column_by_id(id)
    }

    pub(crate) fn next_column_id(&mut self) -> ColumnId {
        self.builder.next_column_id()
    }

    /// Rewrites an expression yielding a single value.
    pub(crate) fn rewrite(&mut self, expr: &AstExpr) -> OptResult<ScalarExpr> {
        let mut values = self.rewrite_operand(expr)?;
        if values.len() != 1 {
            bail!(OptimizerError::OperandColumns(1));
        }
        Ok(values.remove(0))
    }

    /// Rewrites an item of a clause which must not be a row.
    pub(crate) fn rewrite_clause_item(
        &mut self,
        expr: &AstExpr,
        clause: &'static str,
    ) -> OptResult<ScalarExpr> {
        let mut values = self.rewrite_operand(expr)?;
        if values.len() != 1 {
            bail!(OptimizerError::InvalidRowExpression(clause));
        }
        Ok(values.remove(0))
    }

    /// Rewrites a filter into its conjuncts.
    ///
    /// `EXISTS` and `IN` sub-queries that are conjuncts of the filter become semi joins and
    /// leave no condition behind.
    pub(crate) fn rewrite_condition(&mut self, expr: &AstExpr) -> OptResult<Vec<ScalarExpr>> {
        let mut conditions = vec![];
        for conjunct in split_ast_conjunction(expr) {
            match as_semi_join(conjunct) {
                Some((subquery, lhs, negated)) => {
                    self.build_semi_apply(subquery, lhs, negated, true)?;
                }
                None => conditions.push(self.rewrite(conjunct)?),
            }
        }
        Ok(conditions)
    }

    /// Rewrites an operand that may be a row, one expression per row column.
    fn rewrite_operand(&mut self, expr: &AstExpr) -> OptResult<Vec<ScalarExpr>> {
        match expr {
            AstExpr::Row(items) => items.iter().map(|item| self.rewrite(item)).collect(),
            AstExpr::Subquery(query) => self.build_scalar_subquery(query),
            _ => Ok(vec![self.rewrite_scalar(expr)?]),
        }
    }

    fn rewrite_scalar(&mut self, expr: &AstExpr) -> OptResult<ScalarExpr> {
        if let Some((_, column)) = self.aggregates.iter().find(|(agg, _)| agg == expr) {
            return Ok(ScalarExpr::Column(column.clone()));
        }
        match expr {
            AstExpr::Column(name) => self.resolve_column(name),
            AstExpr::Literal(value) => Ok(ScalarExpr::Constant(value.clone())),
            AstExpr::Param(param) => match (&param.value, &param.data_type) {
                (Some(value), Some(data_type)) => {
                    Ok(ScalarExpr::Constant(value.clone()).cast(data_type.clone()))
                }
                _ => bail!(OptimizerError::Internal(format!(
                    "parameter {} has no inferred type",
                    param.order
                ))),
            },
            AstExpr::Binary { op, left, right } if op.is_comparison() => {
                self.rewrite_comparison(*op, left, right)
            }
            AstExpr::Binary { op, left, right } => {
                let left = self.rewrite(left)?;
                let right = self.rewrite(right)?;
                Ok(ScalarExpr::binary(*op, left, right))
            }
            AstExpr::Unary { op, expr } => Ok(ScalarExpr::unary(*op, self.rewrite(expr)?)),
            AstExpr::InList {
                expr,
                list,
                negated,
            } => self.rewrite_in_list(expr, list, *negated),
            AstExpr::Function { name, .. } => {
                if is_aggregate(name) {
                    bail!(OptimizerError::InvalidGroupFuncUse)
                }
                bail!(OptimizerError::Unsupported(format!("function {name}")))
            }
            AstExpr::Exists { subquery, negated } => {
                self.build_semi_apply(subquery, None, *negated, false)
            }
            AstExpr::InSubquery {
                expr,
                subquery,
                negated,
            } => self.build_semi_apply(subquery, Some(expr.as_ref()), *negated, false),
            AstExpr::Row(_) | AstExpr::Subquery(_) => self.rewrite(expr),
        }
    }

    fn rewrite_comparison(&mut self, op: BinaryOp, left: &AstExpr, right: &AstExpr) -> OptResult<ScalarExpr> {
        let mut left = self.rewrite_operand(left)?;
        let mut right = self.rewrite_operand(right)?;
        if left.len() != right.len() {
            bail!(OptimizerError::OperandColumns(left.len()));
        }
        if left.len() == 1 {
            return Ok(ScalarExpr::binary(op, left.remove(0), right.remove(0)));
        }
        let pairs = left
            .into_iter()
            .zip(right)
            .map(|(l, r)| ScalarExpr::binary(op, l, r));
        let combined = match op {
            BinaryOp::Eq => conjunction(pairs),
            BinaryOp::NotEq => combine(BinaryOp::Or, pairs),
            _ => bail!(OptimizerError::OperandColumns(1)),
        };
        combined.ok_or_else(|| OptimizerError::OperandColumns(1).into())
    }

    fn rewrite_in_list(&mut self, expr: &AstExpr, list: &[AstExpr], negated: bool) -> OptResult<ScalarExpr> {
        let mut lhs = self.rewrite_operand(expr)?;
        if lhs.len() == 1 {
            let list = list
                .iter()
                .map(|item| self.rewrite(item))
                .collect::<OptResult<Vec<_>>>()?;
            return Ok(ScalarExpr::InList {
                expr: Box::new(lhs.remove(0)),
                list,
                negated,
            });
        }

        let mut alternatives = vec![];
        for item in list {
            let values = self.rewrite_operand(item)?;
            if values.len() != lhs.len() {
                bail!(OptimizerError::OperandColumns(lhs.len()));
            }
            let matches = conjunction(lhs.iter().cloned().zip(values).map(|(l, r)| eq(l, r)))
                .ok_or(OptimizerError::OperandColumns(1))?;
            alternatives.push(matches);
        }
        let any = combine(BinaryOp::Or, alternatives)
            .ok_or_else(|| OptimizerError::Unsupported("empty IN list".to_string()))?;
        Ok(if negated { not(any) } else { any })
    }

    fn resolve_column(&mut self, name: &ColumnName) -> OptResult<ScalarExpr> {
        let table = name.table.as_deref();
        if let Some(column) = find_column(self.builder.schema(self.plan), table, &name.name)? {
            return Ok(ScalarExpr::Column(column.column_ref()));
        }
        for level in (0..self.builder.outer_schemas.len()).rev() {
            if let Some(column) = find_column(&self.builder.outer_schemas[level], table, &name.name)? {
                let column = column.column_ref();
                trace!("Resolved {} as correlated column {}", name.name, column);
                self.builder
                    .correlated_columns
                    .insert(column.id, (level, column.clone()));
                return Ok(ScalarExpr::Correlated(column));
            }
        }
        let qualified = match table {
            Some(table) => format!("{}.{}", table, name.name),
            None => name.name.clone(),
        };
        bail!(OptimizerError::UnknownColumn(qualified))
    }

    /// Plans `subquery` on the right of an `Apply` over the current node.
    fn build_apply_input(&mut self, subquery: &Query) -> OptResult<(Schema, PlanNodeId, Vec<ColumnRef>)> {
        let outer_schema = self.builder.schema(self.plan).clone();
        let level = self.builder.outer_schemas.len();
        let inner = self.builder.build_subquery(subquery, outer_schema.clone())?;
        let correlated = self.builder.take_correlated_columns(level);
        Ok((outer_schema, inner, correlated))
    }

    /// Joins the current node to an `EXISTS` or `IN` sub-query.
    ///
    /// At the top of a filter the join keeps or drops outer rows. Anywhere else the join
    /// appends a boolean column telling whether a match was found, which is returned. For
    /// `IN` that column follows SQL: NULL when nothing matches but a comparison is NULL.
    fn build_semi_apply(
        &mut self,
        subquery: &Query,
        lhs: Option<&AstExpr>,
        negated: bool,
        top_level: bool,
    ) -> OptResult<ScalarExpr> {
        let lhs = match lhs {
            Some(lhs) => Some(self.rewrite_operand(lhs)?),
            None => None,
        };
        let (outer_schema, inner, correlated) = self.build_apply_input(subquery)?;
        let inner_schema = self.builder.schema(inner).clone();

        let mut conditions = vec![];
        let null_aware = lhs.is_some() && !top_level;
        if let Some(lhs) = lhs {
            if lhs.len() != inner_schema.len() {
                bail!(OptimizerError::OperandColumns(lhs.len()));
            }
            let matches = lhs
                .into_iter()
                .zip(inner_schema.columns().iter())
                .map(|(l, r)| eq(l, r.to_expr()));
            if negated && top_level {
                // NOT IN rejects the outer row unless every comparison is false.
                let all = conjunction(matches).ok_or(OptimizerError::OperandColumns(0))?;
                conditions.push(not(ScalarExpr::unary(UnaryOp::IsFalse, all)));
            } else {
                conditions.extend(matches);
            }
        }

        let join_type = match (negated, top_level) {
            (false, true) => JoinType::Semi,
            (true, true) => JoinType::AntiSemi,
            (false, false) => JoinType::LeftOuterSemi,
            (true, false) => JoinType::AntiLeftOuterSemi,
        };
        let mut join = Join::new(join_type).with_null_aware(null_aware);
        let mut result = ScalarExpr::Constant(true.into());
        if !top_level {
            let aux = aux_column(self.next_column_id(), "aux");
            result = aux.to_expr();
            join = join.with_aux_column(aux);
        }
        join.set_conditions(conditions, &outer_schema, &inner_schema);
        self.plan = self.builder.add_node(
            LogicalApply(Apply::new(join, correlated)),
            vec![self.plan, inner],
        )?;
        self.builder.flags |= RuleId::Decorrelate;
        Ok(result)
    }

    /// Left outer joins the current node to a sub-query yielding at most one row.
    fn build_scalar_subquery(&mut self, subquery: &Query) -> OptResult<Vec<ScalarExpr>> {
        let (_, inner, correlated) = self.build_apply_input(subquery)?;
        let max_one_row = self
            .builder
            .add_node(LogicalMaxOneRow(MaxOneRow::default()), vec![inner])?;
        self.plan = self.builder.add_node(
            LogicalApply(Apply::new(Join::new(JoinType::LeftOuter), correlated)),
            vec![self.plan, max_one_row],
        )?;
        self.builder.flags |= RuleId::Decorrelate;
        Ok(self
            .builder
            .schema(max_one_row)
            .columns()
            .iter()
            .map(|c| c.to_expr())
            .collect())
    }
}

fn find_column<'s>(schema: &'s Schema, table: Option<&str>, name: &str) -> OptResult<Option<&'s ColumnDesc>> {
    let mut found: Option<&ColumnDesc> = None;
    for column in schema.columns().iter().filter(|c| c.matches(table, name)) {
        match found {
            Some(existing) if existing.id != column.id => {
                bail!(OptimizerError::AmbiguousColumn(name.to_string()))
            }
            _ => found = Some(column),
        }
    }
    Ok(found)
}

fn split_ast_conjunction(expr: &AstExpr) -> Vec<&AstExpr> {
    match expr {
        AstExpr::Binary {
            op: BinaryOp::And,
            left,
            right,
        } => {
            let mut conjuncts = split_ast_conjunction(left);
            conjuncts.extend(split_ast_conjunction(right));
            conjuncts
        }
        _ => vec![expr],
    }
}

/// Sub-query, left operand and negation of a conjunct planned as a semi join.
fn as_semi_join(expr: &AstExpr) -> Option<(&Query, Option<&AstExpr>, bool)> {
    match expr {
        AstExpr::Exists { subquery, negated } => Some((subquery.as_ref(), None, *negated)),
        AstExpr::InSubquery {
            expr,
            subquery,
            negated,
        } => Some((subquery.as_ref(), Some(expr.as_ref()), *negated)),
        AstExpr::Unary {
            op: UnaryOp::Not,
            expr,
        } => as_semi_join(expr).map(|(subquery, lhs, negated)| (subquery, lhs, !negated)),
        _ => None,
    }
}

pub(crate) fn is_aggregate(name: &str) -> bool {
    AggFunc::from_str(name).is_ok()
}

fn ast_children(expr: &AstExpr) -> Vec<&AstExpr> {
    match expr {
        AstExpr::Binary { left, right, .. } => vec![left.as_ref(), right.as_ref()],
        AstExpr::Unary { expr, .. } | AstExpr::InSubquery { expr, .. } => vec![expr.as_ref()],
        AstExpr::InList { expr, list, .. } => {
            let mut children = vec![expr.as_ref()];
            children.extend(list.iter());
            children
        }
        AstExpr::Row(items) | AstExpr::Function { args: items, .. } => items.iter().collect(),
        AstExpr::Column(_)
        | AstExpr::Literal(_)
        | AstExpr::Param(_)
        | AstExpr::Exists { .. }
        | AstExpr::Subquery(_) => vec![],
    }
}

pub(crate) fn contains_aggregate(expr: &AstExpr) -> bool {
    match expr {
        AstExpr::Function { name, .. } if is_aggregate(name) => true,
        _ => ast_children(expr).into_iter().any(contains_aggregate),
    }
}

/// Collects the distinct aggregate calls of `expr`, sub-queries excluded.
pub(crate) fn collect_aggregates(expr: &AstExpr, aggregates: &mut Vec<AstExpr>) -> OptResult<()> {
    match expr {
        AstExpr::Function { name, args, .. } if is_aggregate(name) => {
            if args.iter().any(contains_aggregate) {
                bail!(OptimizerError::InvalidGroupFuncUse);
            }
            if !aggregates.contains(expr) {
                aggregates.push(expr.clone());
            }
            Ok(())
        }
        _ => ast_children(expr)
            .into_iter()
            .try_for_each(|child| collect_aggregates(child, aggregates)),
    }
}
