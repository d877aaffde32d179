use std::sync::Arc;

use crate::ast::Statement;
use crate::catalog::{MemorySchemaProvider, TableInfo};
use crate::config::OptimizerConfig;
use crate::operator::DataSource;
use crate::operator::LogicalOperator::LogicalScan;
use crate::optimizer::OptimizerContext;
use crate::plan::{ColumnDesc, LogicalPlan, PlanNodeId};
use crate::planner::{BuiltPlan, PlanBuilder};

/// `t(a, b, c)`: `a` is an integer handle primary key, `b` has a unique index, `c` a plain
/// one.
const TABLE_T: &str = r#"{
    "name": "t",
    "columns": [
        {"name": "a", "data_type": "Int64", "nullable": false},
        {"name": "b", "data_type": "Int64"},
        {"name": "c", "data_type": "Int64"}
    ],
    "indices": [
        {"name": "primary", "columns": ["a"], "primary": true},
        {"name": "idx_b", "columns": ["b"], "unique": true},
        {"name": "idx_c", "columns": ["c"]}
    ],
    "pk_is_handle": true
}"#;

/// `k(a, c)` without any index.
const TABLE_K: &str = r#"{
    "name": "k",
    "columns": [
        {"name": "a", "data_type": "Int64"},
        {"name": "c", "data_type": "Int64"}
    ]
}"#;

pub fn test_catalog() -> Arc<MemorySchemaProvider> {
    let catalog = MemorySchemaProvider::new();
    for json in [TABLE_T, TABLE_K] {
        let table: TableInfo = serde_json::from_str(json).unwrap();
        catalog.register_table(table).unwrap();
    }
    Arc::new(catalog)
}

pub struct TestContext {
    pub ctx: OptimizerContext,
}

impl TestContext {
    pub fn new() -> Self {
        Self {
            ctx: OptimizerContext::new(test_catalog(), OptimizerConfig::default()),
        }
    }
}

/// Adds a scan of every column of `table`.
pub fn scan(plan: &mut LogicalPlan, ctx: &mut TestContext, table: &str) -> PlanNodeId {
    let info = ctx.ctx.catalog.table(table).unwrap();
    let columns = info
        .columns
        .iter()
        .map(|c| {
            ColumnDesc::new(
                ctx.ctx.next_column_id(),
                c.name.clone(),
                c.data_type.clone(),
                c.nullable,
            )
            .with_table(Some(info.name.clone()))
        })
        .collect::<Vec<_>>();
    let offsets = (0..columns.len()).collect();
    let source = DataSource::new(info.clone(), None, columns, offsets);
    plan.add_node(ctx.ctx.ids(), LogicalScan(source), vec![])
        .unwrap()
}

/// Builds the logical plan of a relational statement.
pub fn build(ctx: &mut TestContext, stmt: &Statement) -> LogicalPlan {
    match PlanBuilder::new(&mut ctx.ctx).build(stmt).unwrap() {
        BuiltPlan::Logical { plan, .. } => plan,
        BuiltPlan::Simple(simple) => panic!("not a relational statement: {simple:?}"),
    }
}
