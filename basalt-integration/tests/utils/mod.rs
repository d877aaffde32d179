pub mod schema;

use std::cmp::Ordering;
use std::path::Path;

use basalt::ast::Statement;
use basalt::config::OptimizerConfig;
use basalt::error::{optimizer_error, OptimizerError};
use basalt::plan::PhysicalPlan;
use basalt::rules::{flags_from_bits, OptFlags};
use basalt_integration::eval::{sort_order, Row};
use basalt_integration::MemDatabase;
use datafusion_common::ScalarValue;

use crate::utils::schema::{create_database, load_tables};

/// Database with the tables of `resources/tables.yaml`.
pub fn test_database() -> MemDatabase {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("resources/tables.yaml");
    create_database(load_tables(path))
}

pub fn ints(values: &[Option<i64>]) -> Row {
    values.iter().map(|v| ScalarValue::Int64(*v)).collect()
}

pub fn int_rows(rows: &[&[Option<i64>]]) -> Vec<Row> {
    rows.iter().map(|row| ints(row)).collect()
}

pub fn plan(db: &MemDatabase, stmt: &Statement) -> PhysicalPlan {
    db.plan(stmt, OptimizerConfig::default(), OptFlags::all())
        .unwrap()
}

/// Rows of `stmt` optimized with every rule.
pub fn run(db: &MemDatabase, stmt: &Statement) -> Vec<Row> {
    run_with_flags(db, stmt, OptFlags::all())
}

pub fn run_with_flags(db: &MemDatabase, stmt: &Statement, flags: OptFlags) -> Vec<Row> {
    db.query(stmt, OptimizerConfig::default(), flags)
        .unwrap_or_else(|e| panic!("Failed to run {stmt:?} with {flags:?}: {e:?}"))
}

pub fn optimize_error(db: &MemDatabase, stmt: &Statement, config: OptimizerConfig) -> OptimizerError {
    let err = db.plan(stmt, config, OptFlags::all()).unwrap_err();
    optimizer_error(&err)
        .cloned()
        .unwrap_or_else(|| panic!("Not an optimizer error: {err:?}"))
}

/// Rows in a canonical order, for comparing results as multisets.
pub fn sorted(mut rows: Vec<Row>) -> Vec<Row> {
    rows.sort_by(|a, b| {
        a.iter()
            .zip(b)
            .map(|(x, y)| sort_order(x, y))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    });
    rows
}

/// Every subset of the logical rules.
pub fn all_flag_sets() -> Vec<OptFlags> {
    (0..64).map(flags_from_bits).collect()
}

/// Whether some node of the plan is the named physical operator.
pub fn has_operator(plan: &PhysicalPlan, name: &str) -> bool {
    plan.nodes().iter().any(|node| node.operator().as_ref() == name)
}
