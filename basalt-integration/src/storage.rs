use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context};
use basalt::ast::Statement;
use basalt::catalog::{MemorySchemaProvider, SchemaProvider, TableInfo};
use basalt::config::OptimizerConfig;
use basalt::optimizer::{optimize, OptimizedPlan};
use basalt::plan::PhysicalPlan;
use basalt::rules::OptFlags;
use log::debug;

use crate::error::{ExecResult, ExecutionError};
use crate::eval::Row;
use crate::executor::Executor;

/// Tables kept in memory, rows stored in insertion order with every column of the table.
#[derive(Default)]
pub struct MemDatabase {
    catalog: Arc<MemorySchemaProvider>,
    tables: HashMap<String, Vec<Row>>,
}

impl MemDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_table(&mut self, table: TableInfo) -> ExecResult<()> {
        let name = table.name.to_ascii_lowercase();
        self.catalog
            .register_table(table)
            .with_context(|| format!("Failed to register table {name}"))?;
        self.tables.insert(name, vec![]);
        Ok(())
    }

    pub fn insert<I>(&mut self, table: &str, rows: I) -> ExecResult<()>
    where
        I: IntoIterator<Item = Row>,
    {
        let info = self
            .catalog
            .table(table)
            .ok_or_else(|| ExecutionError::UnknownTable(table.to_string()))?;
        let stored = self.tables.entry(table.to_ascii_lowercase()).or_default();
        for row in rows {
            if row.len() != info.columns.len() {
                bail!(ExecutionError::RowWidth(
                    info.name.clone(),
                    row.len(),
                    info.columns.len()
                ));
            }
            stored.push(row);
        }
        Ok(())
    }

    pub fn rows(&self, table: &str) -> ExecResult<&[Row]> {
        match self.tables.get(&table.to_ascii_lowercase()) {
            Some(rows) => Ok(rows),
            None => bail!(ExecutionError::UnknownTable(table.to_string())),
        }
    }

    pub fn catalog(&self) -> Arc<dyn SchemaProvider> {
        self.catalog.clone()
    }

    /// Optimizes a relational statement against this database's catalog.
    pub fn plan(&self, stmt: &Statement, config: OptimizerConfig, flags: OptFlags) -> ExecResult<PhysicalPlan> {
        let mut stmt = stmt.clone();
        match optimize(&mut stmt, self.catalog(), config, flags)? {
            OptimizedPlan::Physical(plan) => Ok(plan),
            OptimizedPlan::Simple(simple) => {
                debug!("Statement planned as {simple:?}");
                bail!(ExecutionError::NotRelational)
            }
        }
    }

    pub fn execute(&self, plan: &PhysicalPlan) -> ExecResult<Vec<Row>> {
        Executor::new(self).execute(plan)
    }

    pub fn query(&self, stmt: &Statement, config: OptimizerConfig, flags: OptFlags) -> ExecResult<Vec<Row>> {
        let plan = self.plan(stmt, config, flags)?;
        self.execute(&plan)
    }
}
