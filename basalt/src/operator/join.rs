use std::collections::HashSet;
use std::fmt::{Debug, Formatter};

use arrow_schema::DataType;
use strum_macros::AsRefStr;

use crate::cost::{Cost, CostContext, CPU_FACTOR, HASH_TABLE_FACTOR};
use crate::error::OptResult;
use crate::expr::{eq, extend_distinct, BinaryOp, ColumnRef, ScalarExpr};
use crate::operator::{
    bind_all, input_order, input_schema, DisplayFields, OperatorTrait, PhysicalOperatorTrait,
};
use crate::plan::{ColumnDesc, ColumnId, PhysicalNodeRef, Schema};
use crate::properties::{OrderSpec, SortColumn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, AsRefStr)]
pub enum JoinType {
    Inner,
    LeftOuter,
    RightOuter,
    /// Left rows with at least one match.
    Semi,
    /// Left rows without any match.
    AntiSemi,
    /// Every left row, plus a boolean telling whether it has a match.
    LeftOuterSemi,
    /// Every left row, plus a boolean telling whether it has no match.
    AntiLeftOuterSemi,
}

impl JoinType {
    /// Joins whose output contains left columns only, plus the auxiliary flag.
    pub fn is_semi_family(&self) -> bool {
        matches!(
            self,
            JoinType::Semi
                | JoinType::AntiSemi
                | JoinType::LeftOuterSemi
                | JoinType::AntiLeftOuterSemi
        )
    }

    pub fn has_aux_column(&self) -> bool {
        matches!(self, JoinType::LeftOuterSemi | JoinType::AntiLeftOuterSemi)
    }
}

/// Join of two inputs. Conditions are kept split by the inputs they read, all of them
/// together form the match condition of a pair of rows.
#[derive(Clone, Debug, PartialEq)]
pub struct Join {
    pub join_type: JoinType,
    /// Pairs of (left column, right column) compared for equality.
    pub equal_conditions: Vec<(ColumnRef, ColumnRef)>,
    pub left_conditions: Vec<ScalarExpr>,
    pub right_conditions: Vec<ScalarExpr>,
    pub other_conditions: Vec<ScalarExpr>,
    /// Output flag of left outer semi joins.
    pub aux_column: Option<ColumnDesc>,
    /// The flag of a left outer semi join is NULL when no pair matches but some pair
    /// compares to NULL, as `IN` requires. Otherwise it is TRUE or FALSE.
    pub null_aware: bool,
}

impl Join {
    pub fn new(join_type: JoinType) -> Self {
        Self {
            join_type,
            equal_conditions: vec![],
            left_conditions: vec![],
            right_conditions: vec![],
            other_conditions: vec![],
            aux_column: None,
            null_aware: false,
        }
    }

    pub fn with_aux_column(mut self, aux_column: ColumnDesc) -> Self {
        self.aux_column = Some(aux_column);
        self
    }

    pub fn with_null_aware(mut self, null_aware: bool) -> Self {
        self.null_aware = null_aware;
        self
    }

    pub fn left_keys(&self) -> Vec<ColumnId> {
        self.equal_conditions.iter().map(|(l, _)| l.id).collect()
    }

    pub fn right_keys(&self) -> Vec<ColumnId> {
        self.equal_conditions.iter().map(|(_, r)| r.id).collect()
    }

    pub fn has_conditions(&self) -> bool {
        !(self.equal_conditions.is_empty()
            && self.left_conditions.is_empty()
            && self.right_conditions.is_empty()
            && self.other_conditions.is_empty())
    }

    /// Every condition as an expression, equalities first.
    pub fn all_conditions(&self) -> Vec<ScalarExpr> {
        let mut conditions: Vec<ScalarExpr> = self
            .equal_conditions
            .iter()
            .map(|(l, r)| eq(l.clone().into(), r.clone().into()))
            .collect();
        conditions.extend(self.left_conditions.iter().cloned());
        conditions.extend(self.right_conditions.iter().cloned());
        conditions.extend(self.other_conditions.iter().cloned());
        conditions
    }

    /// Replaces every condition by `conditions`, classified by the inputs they read.
    pub fn set_conditions(&mut self, conditions: Vec<ScalarExpr>, left: &Schema, right: &Schema) {
        self.equal_conditions.clear();
        self.left_conditions.clear();
        self.right_conditions.clear();
        self.other_conditions.clear();
        self.add_conditions(conditions, left, right);
    }

    pub fn add_conditions(&mut self, conditions: Vec<ScalarExpr>, left: &Schema, right: &Schema) {
        let left = left.id_set();
        let right = right.id_set();
        for condition in conditions {
            self.classify(condition, &left, &right);
        }
    }

    fn classify(&mut self, condition: ScalarExpr, left: &HashSet<ColumnId>, right: &HashSet<ColumnId>) {
        if let ScalarExpr::Binary {
            op: BinaryOp::Eq,
            left: l,
            right: r,
        } = &condition
        {
            if let (ScalarExpr::Column(l), ScalarExpr::Column(r)) = (l.as_ref(), r.as_ref()) {
                let pair = if left.contains(&l.id) && right.contains(&r.id) {
                    Some((l.clone(), r.clone()))
                } else if right.contains(&l.id) && left.contains(&r.id) {
                    Some((r.clone(), l.clone()))
                } else {
                    None
                };
                if let Some(pair) = pair {
                    if !self.equal_conditions.contains(&pair) {
                        self.equal_conditions.push(pair);
                    }
                    return;
                }
            }
        }

        let columns = condition.columns();
        let target = if columns.is_empty() {
            &mut self.other_conditions
        } else if columns.iter().all(|c| left.contains(c)) {
            &mut self.left_conditions
        } else if columns.iter().all(|c| right.contains(c)) {
            &mut self.right_conditions
        } else {
            &mut self.other_conditions
        };
        extend_distinct(target, Some(condition));
    }

    fn derive_join_schema(&self, left: &Schema, right: &Schema) -> Schema {
        let nullable = |columns: &[ColumnDesc]| {
            columns
                .iter()
                .cloned()
                .map(|mut c| {
                    c.nullable = true;
                    c
                })
                .collect::<Vec<_>>()
        };
        let mut columns = match self.join_type {
            JoinType::Inner => left.concat(right).into_columns(),
            JoinType::LeftOuter => {
                let mut columns = left.columns().to_vec();
                columns.extend(nullable(right.columns()));
                columns
            }
            JoinType::RightOuter => {
                let mut columns = nullable(left.columns());
                columns.extend(right.columns().iter().cloned());
                columns
            }
            _ => left.columns().to_vec(),
        };
        if self.join_type.has_aux_column() {
            if let Some(aux) = &self.aux_column {
                columns.push(aux.clone());
            }
        }
        Schema::new(columns)
    }

    fn expression_list(&self) -> Vec<&ScalarExpr> {
        self.left_conditions
            .iter()
            .chain(self.right_conditions.iter())
            .chain(self.other_conditions.iter())
            .collect()
    }

    fn join_referenced_columns(&self) -> HashSet<ColumnId> {
        let mut columns = HashSet::new();
        for (l, r) in &self.equal_conditions {
            columns.insert(l.id);
            columns.insert(r.id);
        }
        for expr in self.expression_list() {
            expr.collect_columns(&mut columns);
        }
        columns
    }

    fn bind_join_columns(&mut self, inputs: &[&Schema]) -> OptResult<()> {
        let left = input_schema(inputs, 0)?;
        let right = input_schema(inputs, 1)?;
        for (l, r) in &mut self.equal_conditions {
            l.bind(left)?;
            r.bind(right)?;
        }
        let joined = left.concat(right);
        bind_all(&mut self.left_conditions, &joined)?;
        bind_all(&mut self.right_conditions, &joined)?;
        bind_all(&mut self.other_conditions, &joined)
    }
}

pub fn aux_column(id: ColumnId, name: &str) -> ColumnDesc {
    ColumnDesc::new(id, name, DataType::Boolean, true)
}

struct EqualConditionsDisplay<'a>(&'a [(ColumnRef, ColumnRef)]);

impl Debug for EqualConditionsDisplay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.0.iter().map(|(l, r)| EqualPair(l, r)))
            .finish()
    }
}

struct EqualPair<'a>(&'a ColumnRef, &'a ColumnRef);

impl Debug for EqualPair<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} = {}", self.0, self.1)
    }
}

fn display_join(join: &Join, f: &mut Formatter<'_>) -> std::fmt::Result {
    let mut s = f.debug_struct("");
    s.field("join_type", &join.join_type);
    if !join.equal_conditions.is_empty() {
        s.field("on", &EqualConditionsDisplay(&join.equal_conditions));
    }
    if !join.left_conditions.is_empty() {
        s.field("left", &join.left_conditions);
    }
    if !join.right_conditions.is_empty() {
        s.field("right", &join.right_conditions);
    }
    if !join.other_conditions.is_empty() {
        s.field("other", &join.other_conditions);
    }
    if let Some(aux) = &join.aux_column {
        s.field("aux", &format_args!("#{}", aux.id));
    }
    if join.null_aware {
        s.field("null_aware", &true);
    }
    s.finish()
}

impl OperatorTrait for Join {
    fn derive_schema(&self, inputs: &[&Schema]) -> OptResult<Schema> {
        Ok(self.derive_join_schema(input_schema(inputs, 0)?, input_schema(inputs, 1)?))
    }

    fn expressions(&self) -> Vec<&ScalarExpr> {
        self.expression_list()
    }

    fn referenced_columns(&self) -> HashSet<ColumnId> {
        self.join_referenced_columns()
    }

    fn bind_columns(&mut self, inputs: &[&Schema]) -> OptResult<()> {
        self.bind_join_columns(inputs)
    }
}

impl DisplayFields for Join {
    fn display(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        display_join(self, f)
    }
}

/// Join evaluating its inner input once per outer row, with the correlated columns of the
/// outer row bound.
#[derive(Clone, Debug, PartialEq)]
pub struct Apply {
    pub join: Join,
    /// Outer columns referenced by the inner input.
    pub correlated_columns: Vec<ColumnRef>,
}

impl Apply {
    pub fn new(join: Join, correlated_columns: Vec<ColumnRef>) -> Self {
        Self {
            join,
            correlated_columns,
        }
    }
}

impl OperatorTrait for Apply {
    fn derive_schema(&self, inputs: &[&Schema]) -> OptResult<Schema> {
        self.join.derive_schema(inputs)
    }

    fn expressions(&self) -> Vec<&ScalarExpr> {
        self.join.expression_list()
    }

    fn referenced_columns(&self) -> HashSet<ColumnId> {
        let mut columns = self.join.join_referenced_columns();
        columns.extend(self.correlated_columns.iter().map(|c| c.id));
        columns
    }

    fn bind_columns(&mut self, inputs: &[&Schema]) -> OptResult<()> {
        self.join.bind_join_columns(inputs)?;
        let outer = input_schema(inputs, 0)?;
        self.correlated_columns
            .iter_mut()
            .try_for_each(|c| c.bind(outer))
    }
}

impl PhysicalOperatorTrait for Apply {
    fn output_order(&self, inputs: &[PhysicalNodeRef]) -> OrderSpec {
        input_order(inputs)
    }

    fn cost(&self, ctx: &CostContext) -> Cost {
        let outer_rows = ctx.input_rows(0);
        let inner_cost = ctx.input_costs.get(1).map(|c| c.value()).unwrap_or(0.0);
        let inner_rows = ctx.input_rows(1);
        Cost::from(
            outer_rows * (inner_rows + 1.0) * CPU_FACTOR
                + (outer_rows - 1.0).max(0.0) * inner_cost,
        )
    }
}

impl DisplayFields for Apply {
    fn display(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        display_join(&self.join, f)
    }
}

/// Builds a hash table on the right input and probes it with the left input.
#[derive(Clone, Debug, PartialEq)]
pub struct HashJoin {
    pub join: Join,
    pub concurrency: usize,
}

impl PhysicalOperatorTrait for HashJoin {
    fn output_order(&self, _inputs: &[PhysicalNodeRef]) -> OrderSpec {
        OrderSpec::default()
    }

    fn cost(&self, ctx: &CostContext) -> Cost {
        let probe = ctx.input_rows(0) * CPU_FACTOR / self.concurrency.max(1) as f64;
        let build = ctx.input_rows(1) * HASH_TABLE_FACTOR;
        Cost::from(probe + build + ctx.output_rows * CPU_FACTOR)
    }
}

impl DisplayFields for HashJoin {
    fn display(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        display_join(&self.join, f)
    }
}

/// Joins two inputs sorted ascending on their join keys.
#[derive(Clone, Debug, PartialEq)]
pub struct MergeJoin {
    pub join: Join,
}

impl MergeJoin {
    /// Keys of the input whose order the output keeps.
    pub fn driving_keys(&self) -> Vec<ColumnId> {
        match self.join.join_type {
            JoinType::RightOuter => self.join.right_keys(),
            _ => self.join.left_keys(),
        }
    }
}

impl PhysicalOperatorTrait for MergeJoin {
    fn output_order(&self, _inputs: &[PhysicalNodeRef]) -> OrderSpec {
        OrderSpec::new(
            self.driving_keys()
                .into_iter()
                .map(SortColumn::asc)
                .collect(),
        )
    }

    fn cost(&self, ctx: &CostContext) -> Cost {
        Cost::from((ctx.total_input_rows() + ctx.output_rows) * CPU_FACTOR)
    }
}

impl DisplayFields for MergeJoin {
    fn display(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        display_join(&self.join, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::lit_i64;

    fn schema(ids: &[ColumnId]) -> Schema {
        Schema::new(
            ids.iter()
                .map(|id| ColumnDesc::new(*id, format!("c{id}"), DataType::Int64, false))
                .collect(),
        )
    }

    fn col(id: ColumnId) -> ScalarExpr {
        ScalarExpr::column(id, DataType::Int64)
    }

    #[test]
    fn test_classify_conditions() {
        let left = schema(&[1, 2]);
        let right = schema(&[3, 4]);
        let mut join = Join::new(JoinType::Inner);
        join.set_conditions(
            vec![
                eq(col(3), col(1)),
                eq(col(1), col(2)),
                ScalarExpr::binary(BinaryOp::Gt, col(4), lit_i64(1)),
                ScalarExpr::binary(BinaryOp::Lt, col(2), col(4)),
                eq(col(3), col(1)),
            ],
            &left,
            &right,
        );
        assert_eq!(vec![1], join.left_keys());
        assert_eq!(vec![3], join.right_keys());
        assert_eq!(1, join.left_conditions.len());
        assert_eq!(1, join.right_conditions.len());
        assert_eq!(1, join.other_conditions.len());
        assert_eq!(4, join.all_conditions().len());
    }

    #[test]
    fn test_join_schema() {
        let left = schema(&[1]);
        let right = schema(&[2]);
        let join = Join::new(JoinType::LeftOuter);
        let out = join.derive_schema(&[&left, &right]).unwrap();
        assert_eq!(vec![1, 2], out.ids());
        assert!(out.column(1).nullable);

        let semi = Join::new(JoinType::LeftOuterSemi).with_aux_column(aux_column(9, "aux"));
        assert_eq!(vec![1, 9], semi.derive_schema(&[&left, &right]).unwrap().ids());
        let anti = Join::new(JoinType::AntiSemi);
        assert_eq!(vec![1], anti.derive_schema(&[&left, &right]).unwrap().ids());
    }
}
