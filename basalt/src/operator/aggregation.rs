use std::fmt::{Debug, Formatter};

use strum_macros::AsRefStr;

use crate::cost::{Cost, CostContext, CPU_FACTOR, HASH_AGG_FACTOR};
use crate::error::OptResult;
use crate::expr::{AggFunc, AggregateCall, ScalarExpr};
use crate::operator::{bind_all, input_schema, DisplayFields, OperatorTrait, PhysicalOperatorTrait};
use crate::plan::{ColumnDesc, ColumnId, PhysicalNodeRef, Schema};
use crate::properties::{OrderSpec, SortColumn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, AsRefStr)]
pub enum AggStage {
    /// Computes the aggregates from input rows.
    Complete,
    /// Computes per group partial results below a join.
    Partial,
    /// Combines partial results.
    Final,
}

/// Groups the input rows and computes one output column per aggregate call.
///
/// Output columns are exactly one per aggregate, group-by values are exposed through
/// `FIRST_ROW` aggregates whose output keeps the id of the column they read.
#[derive(Clone, Debug, PartialEq)]
pub struct Aggregation {
    pub group_by: Vec<ScalarExpr>,
    pub aggregates: Vec<AggregateCall>,
    pub columns: Vec<ColumnDesc>,
    pub stage: AggStage,
}

impl Aggregation {
    pub fn new(group_by: Vec<ScalarExpr>, aggregates: Vec<AggregateCall>, columns: Vec<ColumnDesc>) -> Self {
        Self {
            group_by,
            aggregates,
            columns,
            stage: AggStage::Complete,
        }
    }

    pub fn with_stage(mut self, stage: AggStage) -> Self {
        self.stage = stage;
        self
    }

    /// Ids of the group-by expressions when all of them are plain columns.
    pub fn group_by_columns(&self) -> Option<Vec<ColumnId>> {
        self.group_by
            .iter()
            .map(|expr| expr.as_column().map(|c| c.id))
            .collect()
    }

    /// Output column exposing the input column `id` through `FIRST_ROW`.
    pub fn first_row_output(&self, id: ColumnId) -> Option<ColumnId> {
        self.aggregates
            .iter()
            .zip(self.columns.iter())
            .find(|(agg, _)| {
                agg.func == AggFunc::FirstRow
                    && matches!(agg.args.as_slice(), [ScalarExpr::Column(c)] if c.id == id)
            })
            .map(|(_, column)| column.id)
    }

    pub fn retain<F: Fn(&ColumnDesc) -> bool>(&mut self, keep: F) {
        let kept: Vec<usize> = (0..self.columns.len())
            .filter(|idx| keep(&self.columns[*idx]))
            .collect();
        let kept = if kept.is_empty() && !self.columns.is_empty() {
            vec![0]
        } else {
            kept
        };
        self.aggregates = kept.iter().map(|idx| self.aggregates[*idx].clone()).collect();
        self.columns = kept.iter().map(|idx| self.columns[*idx].clone()).collect();
    }
}

impl OperatorTrait for Aggregation {
    fn derive_schema(&self, _inputs: &[&Schema]) -> OptResult<Schema> {
        Ok(Schema::new(self.columns.clone()))
    }

    fn expressions(&self) -> Vec<&ScalarExpr> {
        self.group_by
            .iter()
            .chain(self.aggregates.iter().flat_map(|agg| agg.args.iter()))
            .collect()
    }

    fn bind_columns(&mut self, inputs: &[&Schema]) -> OptResult<()> {
        let input = input_schema(inputs, 0)?;
        bind_all(&mut self.group_by, input)?;
        for agg in &mut self.aggregates {
            bind_all(&mut agg.args, input)?;
        }
        Ok(())
    }
}

struct AggregatesDisplay<'a>(&'a Aggregation);

impl Debug for AggregatesDisplay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(
                self.0
                    .aggregates
                    .iter()
                    .zip(self.0.columns.iter())
                    .map(|(agg, column)| AggregateEntry(agg, column.id)),
            )
            .finish()
    }
}

struct AggregateEntry<'a>(&'a AggregateCall, ColumnId);

impl Debug for AggregateEntry<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} as #{}", self.0, self.1)
    }
}

fn display_aggregation(agg: &Aggregation, f: &mut Formatter<'_>) -> std::fmt::Result {
    let mut s = f.debug_struct("");
    if agg.stage != AggStage::Complete {
        s.field("stage", &agg.stage);
    }
    if !agg.group_by.is_empty() {
        s.field("group_by", &agg.group_by);
    }
    s.field("aggregates", &AggregatesDisplay(agg)).finish()
}

impl DisplayFields for Aggregation {
    fn display(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        display_aggregation(self, f)
    }
}

/// Aggregation over a hash table of groups.
#[derive(Clone, Debug, PartialEq)]
pub struct HashAgg {
    pub agg: Aggregation,
}

/// Aggregation over input sorted by the group-by columns.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamAgg {
    pub agg: Aggregation,
}

impl PhysicalOperatorTrait for HashAgg {
    fn output_order(&self, _inputs: &[PhysicalNodeRef]) -> OrderSpec {
        OrderSpec::default()
    }

    fn cost(&self, ctx: &CostContext) -> Cost {
        Cost::from(ctx.input_rows(0) * HASH_AGG_FACTOR + ctx.output_rows * CPU_FACTOR)
    }
}

impl PhysicalOperatorTrait for StreamAgg {
    /// Groups come out in the order of the group-by columns exposed by `FIRST_ROW`.
    fn output_order(&self, _inputs: &[PhysicalNodeRef]) -> OrderSpec {
        let columns = self
            .agg
            .group_by_columns()
            .unwrap_or_default()
            .into_iter()
            .map_while(|id| self.agg.first_row_output(id))
            .map(SortColumn::asc)
            .collect();
        OrderSpec::new(columns)
    }

    fn cost(&self, ctx: &CostContext) -> Cost {
        Cost::from(ctx.input_rows(0) * CPU_FACTOR + ctx.output_rows * CPU_FACTOR)
    }
}

impl DisplayFields for HashAgg {
    fn display(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        display_aggregation(&self.agg, f)
    }
}

impl DisplayFields for StreamAgg {
    fn display(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        display_aggregation(&self.agg, f)
    }
}
