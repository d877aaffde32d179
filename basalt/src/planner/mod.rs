//! Builds logical plans from statements.
//!
//! The builder resolves names against a stack of scopes, the schema of the block being
//! built and the schemas of the enclosing blocks. A name found in an enclosing block becomes
//! a correlated reference, and the sub-query containing it is joined to its outer block by
//! an `Apply`. The builder also records which logical rules the built shape can benefit
//! from, see [`BuiltPlan::Logical`].

mod expr;
mod select;

use std::collections::HashMap;

use anyhow::{bail, Context};
use log::debug;

use crate::ast::{
    AstJoinType, CreateTableStmt, DropTableStmt, LimitClause, Query, QueryBody, ShowStmt,
    Statement, TableRef,
};
use crate::error::{OptResult, OptimizerError};
use crate::expr::{split_conjunction, AggregateCall, ColumnRef, ScalarExpr};
use crate::operator::LogicalOperator::{
    LogicalAggregation, LogicalDual, LogicalJoin, LogicalLimit, LogicalProjection, LogicalScan,
    LogicalUnion,
};
use crate::operator::{
    Aggregation, DataSource, Join, JoinType, Limit, LogicalOperator, Projection, TableDual,
    Union,
};
use crate::optimizer::OptimizerContext;
use crate::plan::{ColumnDesc, ColumnId, LogicalPlan, PlanNodeId, Schema};
use crate::rules::{OptFlags, RuleId};
use crate::expr::types::unify_types;

pub(crate) use expr::ExprRewriter;

/// Result of building a statement.
#[derive(Debug, Clone)]
pub enum BuiltPlan {
    /// A relational statement, with the logical rules its shape needs.
    Logical { plan: LogicalPlan, flags: OptFlags },
    /// A statement bypassing optimization.
    Simple(SimplePlan),
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableAssignment {
    pub name: String,
    pub value: ScalarExpr,
}

/// Plans of statements that are executed as is.
#[derive(Debug, Clone, PartialEq)]
pub enum SimplePlan {
    Set(Vec<VariableAssignment>),
    CreateTable(CreateTableStmt),
    DropTable(DropTableStmt),
    Show(ShowStmt),
}

pub struct PlanBuilder<'a> {
    ctx: &'a mut OptimizerContext,
    plan: LogicalPlan,
    /// Schemas of the enclosing query blocks, innermost last.
    outer_schemas: Vec<Schema>,
    /// Outer columns referenced so far, with the scope level they were resolved in.
    correlated_columns: HashMap<ColumnId, (usize, ColumnRef)>,
    flags: OptFlags,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(ctx: &'a mut OptimizerContext) -> Self {
        Self {
            ctx,
            plan: LogicalPlan::new(),
            outer_schemas: vec![],
            correlated_columns: HashMap::new(),
            flags: RuleId::PredicatePushDown | RuleId::ColumnPruning,
        }
    }

    pub fn build(mut self, stmt: &Statement) -> OptResult<BuiltPlan> {
        match stmt {
            Statement::Query(query) => {
                let root = self.build_query(query)?;
                self.plan.set_root(root);
                debug!("Built logical plan, rule flags: {:?}", self.flags);
                Ok(BuiltPlan::Logical {
                    plan: self.plan,
                    flags: self.flags,
                })
            }
            Statement::Set(set) => {
                let dual = self.add_node(LogicalDual(TableDual::new(1)), vec![])?;
                let mut variables = vec![];
                for (name, expr) in &set.variables {
                    let mut rewriter = ExprRewriter::new(&mut self, dual, &[]);
                    let value = rewriter.rewrite(expr)?;
                    if rewriter.plan() != dual {
                        bail!(OptimizerError::Unsupported(
                            "sub-query in SET statement".to_string()
                        ));
                    }
                    variables.push(VariableAssignment {
                        name: name.clone(),
                        value,
                    });
                }
                Ok(BuiltPlan::Simple(SimplePlan::Set(variables)))
            }
            Statement::CreateTable(create) => {
                Ok(BuiltPlan::Simple(SimplePlan::CreateTable(create.clone())))
            }
            Statement::DropTable(drop) => Ok(BuiltPlan::Simple(SimplePlan::DropTable(drop.clone()))),
            Statement::Show(show) => {
                if let ShowStmt::Columns { table } = show {
                    if self.ctx.catalog.table(table).is_none() {
                        bail!(OptimizerError::UnknownTable(table.clone()));
                    }
                }
                Ok(BuiltPlan::Simple(SimplePlan::Show(show.clone())))
            }
        }
    }

    fn add_node(&mut self, operator: LogicalOperator, inputs: Vec<PlanNodeId>) -> OptResult<PlanNodeId> {
        self.plan.add_node(self.ctx.ids(), operator, inputs)
    }

    fn next_column_id(&mut self) -> ColumnId {
        self.ctx.ids().next_column_id()
    }

    fn schema(&self, id: PlanNodeId) -> &Schema {
        self.plan.schema(id)
    }

    fn build_query(&mut self, query: &Query) -> OptResult<PlanNodeId> {
        match &query.body {
            QueryBody::Select(select) => self.build_select(select, &query.order_by, query.limit),
            body => {
                let mut plan = self.build_query_body(body)?;
                if !query.order_by.is_empty() {
                    plan = self.build_union_order_by(plan, query)?;
                }
                self.build_limit(plan, query.limit)
            }
        }
    }

    /// Builds a sub-query of the block whose current schema is `outer`.
    fn build_subquery(&mut self, query: &Query, outer: Schema) -> OptResult<PlanNodeId> {
        self.outer_schemas.push(outer);
        let result = self.build_query(query);
        self.outer_schemas.pop();
        result
    }

    /// Takes the correlated references resolved in the scope at `level`.
    fn take_correlated_columns(&mut self, level: usize) -> Vec<ColumnRef> {
        let mut columns: Vec<ColumnRef> = self
            .correlated_columns
            .values()
            .filter(|(l, _)| *l == level)
            .map(|(_, c)| c.clone())
            .collect();
        columns.sort_by_key(|c| c.id);
        self.correlated_columns.retain(|_, (l, _)| *l != level);
        columns
    }

    fn build_query_body(&mut self, body: &QueryBody) -> OptResult<PlanNodeId> {
        match body {
            QueryBody::Select(select) => self.build_select(select, &[], None),
            QueryBody::Union { left, right, all } => {
                let left = self.build_query_body(left)?;
                let right = self.build_query_body(right)?;
                let (left_schema, right_schema) = (self.schema(left).clone(), self.schema(right).clone());
                if left_schema.len() != right_schema.len() {
                    bail!(OptimizerError::OperandColumns(left_schema.len()));
                }
                let columns = left_schema
                    .columns()
                    .iter()
                    .zip(right_schema.columns().iter())
                    .map(|(l, r)| {
                        ColumnDesc::new(
                            self.next_column_id(),
                            l.name.clone(),
                            unify_types(&l.data_type, &r.data_type),
                            l.nullable || r.nullable,
                        )
                    })
                    .collect::<Vec<_>>();
                let union = self.add_node(LogicalUnion(Union::new(columns)), vec![left, right])?;
                if *all {
                    Ok(union)
                } else {
                    self.build_distinct(union, None)
                }
            }
        }
    }

    /// Groups by the first `visible` columns, or all columns, keeping every column.
    fn build_distinct(&mut self, input: PlanNodeId, visible: Option<usize>) -> OptResult<PlanNodeId> {
        let columns = self.schema(input).columns().to_vec();
        let group_by = columns
            .iter()
            .take(visible.unwrap_or(columns.len()))
            .map(|c| c.to_expr())
            .collect();
        let aggregates = columns
            .iter()
            .map(|c| AggregateCall::first_row(c.to_expr()))
            .collect();
        self.flags |= RuleId::BuildKeyInfo | RuleId::EliminateAgg | RuleId::AggPushDown;
        self.add_node(
            LogicalAggregation(Aggregation::new(group_by, aggregates, columns)),
            vec![input],
        )
    }

    fn build_limit(&mut self, input: PlanNodeId, limit: Option<LimitClause>) -> OptResult<PlanNodeId> {
        match limit {
            Some(limit) => self.add_node(
                LogicalLimit(Limit::new(limit.offset, limit.count)),
                vec![input],
            ),
            None => Ok(input),
        }
    }

    fn build_table_ref(&mut self, table: &TableRef) -> OptResult<PlanNodeId> {
        match table {
            TableRef::Table { name, alias } => self.build_data_source(name, alias.as_deref()),
            TableRef::Derived { query, alias } => {
                let input = self.build_query(query)?;
                let columns: Vec<ColumnDesc> = self
                    .schema(input)
                    .columns()
                    .iter()
                    .map(|c| c.clone().with_table(Some(alias.clone())))
                    .collect();
                let exprs = columns.iter().map(|c| c.to_expr()).collect();
                self.add_node(LogicalProjection(Projection::new(exprs, columns)), vec![input])
            }
            TableRef::Join {
                left,
                right,
                join_type,
                on,
            } => {
                let left = self.build_table_ref(left)?;
                let right = self.build_table_ref(right)?;
                let join_type = match join_type {
                    AstJoinType::Inner | AstJoinType::Cross => JoinType::Inner,
                    AstJoinType::Left => JoinType::LeftOuter,
                    AstJoinType::Right => JoinType::RightOuter,
                };
                let join = self.add_node(LogicalJoin(Join::new(join_type)), vec![left, right])?;
                if let Some(on) = on {
                    let mut rewriter = ExprRewriter::new(self, join, &[]);
                    let condition = rewriter.rewrite(on).context("Failed to build ON condition")?;
                    if rewriter.plan() != join {
                        bail!(OptimizerError::Unsupported(
                            "sub-query in ON condition".to_string()
                        ));
                    }
                    let mut operator = Join::new(join_type);
                    operator.set_conditions(
                        split_conjunction(&condition),
                        self.schema(left),
                        self.schema(right),
                    );
                    self.plan.set_operator(join, LogicalJoin(operator))?;
                }
                Ok(join)
            }
        }
    }

    fn build_data_source(&mut self, name: &str, alias: Option<&str>) -> OptResult<PlanNodeId> {
        let table = self
            .ctx
            .catalog
            .table(name)
            .ok_or_else(|| OptimizerError::UnknownTable(name.to_string()))?;
        let qualifier = alias.unwrap_or(&table.name).to_string();
        let columns = table
            .columns
            .iter()
            .map(|c| {
                ColumnDesc::new(
                    self.next_column_id(),
                    c.name.clone(),
                    c.data_type.clone(),
                    c.nullable,
                )
                .with_table(Some(qualifier.clone()))
            })
            .collect::<Vec<_>>();
        let offsets = (0..columns.len()).collect();
        let source = DataSource::new(table, alias.map(|a| a.to_string()), columns, offsets);
        self.add_node(LogicalScan(source), vec![])
    }
}
