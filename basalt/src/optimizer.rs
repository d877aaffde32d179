use std::sync::Arc;

use anyhow::{bail, Context};
use log::{debug, info, log_enabled, trace, Level};

use crate::ast::infer::{DefaultTypeInferer, TypeInferer};
use crate::ast::Statement;
use crate::catalog::SchemaProvider;
use crate::config::OptimizerConfig;
use crate::error::{OptResult, OptimizerError};
use crate::operator::JoinType;
use crate::operator::LogicalOperator::LogicalJoin;
use crate::physical::{eliminate_projections, insert_caches, PhysicalConverter};
use crate::plan::{
    explain_logical_to_string, explain_to_string, ColumnId, IdAllocator, LogicalPlan,
    PhysicalPlan, PlanNodeId,
};
use crate::planner::{BuiltPlan, PlanBuilder, SimplePlan};
use crate::resolve::{bind_columns, resolve_access_paths};
use crate::rules::{logical_rules, LogicalRule, OptFlags, RuleId};

/// Context of one optimization: the catalog, the configuration and the id allocator shared
/// by the builder and the rules.
pub struct OptimizerContext {
    pub catalog: Arc<dyn SchemaProvider>,
    pub config: OptimizerConfig,
    ids: IdAllocator,
}

impl OptimizerContext {
    pub fn new(catalog: Arc<dyn SchemaProvider>, config: OptimizerConfig) -> Self {
        Self {
            catalog,
            config,
            ids: IdAllocator::default(),
        }
    }

    pub fn ids(&mut self) -> &mut IdAllocator {
        &mut self.ids
    }

    pub fn next_column_id(&mut self) -> ColumnId {
        self.ids.next_column_id()
    }

    pub fn next_plan_node_id(&mut self) -> PlanNodeId {
        self.ids.next_plan_node_id()
    }
}

/// Result of [`optimize`].
#[derive(Debug, Clone, PartialEq)]
pub enum OptimizedPlan {
    Physical(PhysicalPlan),
    /// A statement that is executed without a relational plan.
    Simple(SimplePlan),
}

impl OptimizedPlan {
    pub fn physical(&self) -> Option<&PhysicalPlan> {
        match self {
            OptimizedPlan::Physical(plan) => Some(plan),
            OptimizedPlan::Simple(_) => None,
        }
    }
}

/// Optimizes a statement into an executable plan.
///
/// `flags` and the `rules` of `config` select the logical rules the caller allows, the
/// rules actually run are the ones also needed by the shape of the built plan.
pub fn optimize(
    stmt: &mut Statement,
    catalog: Arc<dyn SchemaProvider>,
    config: OptimizerConfig,
    flags: OptFlags,
) -> OptResult<OptimizedPlan> {
    optimize_with_inferer(stmt, catalog, config, flags, &DefaultTypeInferer)
}

pub fn optimize_with_inferer(
    stmt: &mut Statement,
    catalog: Arc<dyn SchemaProvider>,
    config: OptimizerConfig,
    flags: OptFlags,
    inferer: &dyn TypeInferer,
) -> OptResult<OptimizedPlan> {
    let flags = flags & config.flags().context("Invalid optimizer config")?;
    info!("Beginning to optimize statement with flags {flags:?}");
    // Parameters may have been bound since the last inference.
    inferer
        .infer(stmt)
        .context("Failed to infer expression types")?;

    let mut ctx = OptimizerContext::new(catalog, config);
    let built = PlanBuilder::new(&mut ctx)
        .build(stmt)
        .context("Failed to build logical plan")?;
    let (mut plan, builder_flags) = match built {
        BuiltPlan::Logical { plan, flags } => (plan, flags),
        BuiltPlan::Simple(simple) => {
            info!("Statement needs no optimization");
            return Ok(OptimizedPlan::Simple(simple));
        }
    };

    let flags = flags & builder_flags;
    rewrite_logical(&mut plan, &mut ctx, flags)?;
    if !ctx.config.allow_cartesian_product && exists_cartesian_product(&plan) {
        bail!(OptimizerError::CartesianProductUnsupported);
    }

    resolve_access_paths(&mut plan).context("Failed to resolve access paths")?;
    bind_columns(&mut plan).context("Failed to bind columns")?;
    let physical = physical_optimize(&plan, &mut ctx, flags)?;
    info!("Finished optimizing statement, cost: {}", physical.cost());
    Ok(OptimizedPlan::Physical(physical))
}

/// Runs the logical rules enabled by `flags` in pipeline order.
pub fn rewrite_logical(
    plan: &mut LogicalPlan,
    ctx: &mut OptimizerContext,
    flags: OptFlags,
) -> OptResult<()> {
    trace_plan("Logical plan before rewriting", plan);
    for rule in logical_rules() {
        if !flags.contains(rule.rule_id()) {
            continue;
        }
        debug!("Applying rule {:?}", rule);
        rule.apply(plan, ctx)
            .with_context(|| format!("Failed to apply rule {}", rule.rule_id().as_ref()))?;
        trace_plan(rule.as_ref(), plan);
    }
    Ok(())
}

/// Whether an inner or outer join has no equality condition.
pub fn exists_cartesian_product(plan: &LogicalPlan) -> bool {
    plan.post_order().into_iter().any(|id| match plan.operator(id) {
        LogicalJoin(join) => {
            join.equal_conditions.is_empty()
                && matches!(
                    join.join_type,
                    JoinType::Inner | JoinType::LeftOuter | JoinType::RightOuter
                )
        }
        _ => false,
    })
}

fn physical_optimize(
    plan: &LogicalPlan,
    ctx: &mut OptimizerContext,
    flags: OptFlags,
) -> OptResult<PhysicalPlan> {
    let concurrency = ctx.config.join_concurrency();
    let converted = PhysicalConverter::new(plan, ctx.ids(), concurrency)
        .convert_plan()
        .context("Failed to convert logical plan to physical plan")?;
    let mut root = eliminate_projections(converted.root());
    if flags.contains(RuleId::Decorrelate) {
        root = insert_caches(&root, ctx.ids());
    }
    let physical = PhysicalPlan::new(root);
    if log_enabled!(Level::Trace) {
        if let Ok(explained) = explain_to_string(&physical) {
            trace!("Physical plan:\n{explained}");
        }
    }
    Ok(physical)
}

fn trace_plan(step: &str, plan: &LogicalPlan) {
    if log_enabled!(Level::Trace) {
        if let Ok(explained) = explain_logical_to_string(plan) {
            trace!("{step}:\n{explained}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{col, lit, SelectStmt, SetStmt, TableRef};
    use crate::error::optimizer_error;
    use crate::operator::PhysicalOperator;
    use crate::test_utils::test_catalog;

    fn select_all(from: TableRef) -> Statement {
        SelectStmt::new()
            .wildcard()
            .from(from)
            .into_query()
            .into_statement()
    }

    #[test]
    fn test_cartesian_guard() {
        let mut stmt = select_all(TableRef::table("t").cross(TableRef::table("k")));
        let config = OptimizerConfig {
            allow_cartesian_product: false,
            ..OptimizerConfig::default()
        };
        let err = optimize(&mut stmt, test_catalog(), config, OptFlags::all()).unwrap_err();
        assert_eq!(
            Some(&OptimizerError::CartesianProductUnsupported),
            optimizer_error(&err)
        );

        let plan = optimize(
            &mut stmt,
            test_catalog(),
            OptimizerConfig::default(),
            OptFlags::all(),
        )
        .unwrap();
        let root = plan.physical().unwrap().root().clone();
        assert!(matches!(
            root.operator(),
            PhysicalOperator::PhysicalHashJoin(_)
        ));
    }

    #[test]
    fn test_config_rules_restrict_flags() {
        let stmt = SelectStmt::new()
            .wildcard()
            .from(TableRef::table("k"))
            .filter(col("a").gt(lit(1i64)))
            .into_query()
            .into_statement();
        let root_of = |config: OptimizerConfig| {
            let mut stmt = stmt.clone();
            let plan = optimize(&mut stmt, test_catalog(), config, OptFlags::all()).unwrap();
            plan.physical().unwrap().root().clone()
        };

        let pushed = root_of(OptimizerConfig::default());
        assert!(matches!(pushed.operator(), PhysicalOperator::PhysicalTableScan(_)));

        let config = OptimizerConfig::from_yaml("rules: [ColumnPruning]").unwrap();
        let kept = root_of(config);
        assert!(matches!(kept.operator(), PhysicalOperator::PhysicalSelection(_)));

        let mut stmt = stmt.clone();
        let config = OptimizerConfig::from_yaml("rules: [Magic]").unwrap();
        assert!(optimize(&mut stmt, test_catalog(), config, OptFlags::all()).is_err());
    }

    #[test]
    fn test_simple_statement_bypasses_rules() {
        let mut stmt = Statement::Set(SetStmt {
            variables: vec![("x".to_string(), lit(1i64))],
        });
        let plan = optimize(
            &mut stmt,
            test_catalog(),
            OptimizerConfig::default(),
            OptFlags::all(),
        )
        .unwrap();
        assert!(matches!(plan, OptimizedPlan::Simple(SimplePlan::Set(_))));
    }

    #[test]
    fn test_identity_projection_removed() {
        let mut stmt = select_all(TableRef::table("k"));
        let plan = optimize(
            &mut stmt,
            test_catalog(),
            OptimizerConfig::default(),
            OptFlags::all(),
        )
        .unwrap();
        let root = plan.physical().unwrap().root().clone();
        assert!(matches!(
            root.operator(),
            PhysicalOperator::PhysicalTableScan(_)
        ));
        assert_eq!(
            vec!["a", "c"],
            root.schema()
                .columns()
                .iter()
                .map(|c| c.name.as_str())
                .collect::<Vec<_>>()
        );
    }
}
