//! Contains relational operators such as join, projection, aggregation, etc.
//!
//! They are classified into two categories: logical and physical. We separate logical and
//! physical operators in two enums since they need to implement different traits. Logical
//! operators derive output schemas, physical operators derive output orderings and costs.
//! Some operators, such as [`Selection`] or [`Limit`], have the same shape in both worlds
//! and appear in both enums.

use std::collections::HashSet;
use std::fmt::{Debug, Formatter};

use enum_dispatch::enum_dispatch;

use crate::error::OptResult;
use crate::expr::ScalarExpr;
use crate::plan::{ColumnDesc, ColumnId, Schema};

mod logical;
pub use logical::*;
mod physical;
pub use physical::*;
mod aggregation;
pub use aggregation::*;
mod data_source;
pub use data_source::*;
mod join;
pub use join::*;
mod limit;
pub use limit::*;
mod projection;
pub use projection::*;
mod scan;
pub use scan::*;
mod selection;
pub use selection::*;
mod single_row;
pub use single_row::*;
mod sort;
pub use sort::*;
mod union;
pub use union::*;

#[enum_dispatch(LogicalOperator, PhysicalOperator)]
pub trait DisplayFields {
    fn display(&self, f: &mut Formatter<'_>) -> std::fmt::Result;
}

#[enum_dispatch(LogicalOperator)]
pub trait OperatorTrait {
    /// Derives output columns from the schemas of the inputs. Unique keys are derived
    /// separately by key info construction.
    fn derive_schema(&self, inputs: &[&Schema]) -> OptResult<Schema>;

    /// Scalar expressions evaluated by this operator.
    fn expressions(&self) -> Vec<&ScalarExpr> {
        vec![]
    }

    /// Input columns read by this operator.
    fn referenced_columns(&self) -> HashSet<ColumnId> {
        let mut columns = HashSet::new();
        for expr in self.expressions() {
            expr.collect_columns(&mut columns);
        }
        columns
    }

    /// Binds column references to offsets of the input rows.
    fn bind_columns(&mut self, _inputs: &[&Schema]) -> OptResult<()> {
        Ok(())
    }
}

/// Formats columns as `[name#id, ...]`.
pub(crate) struct ColumnsDisplay<'a>(pub &'a [ColumnDesc]);

impl Debug for ColumnsDisplay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (idx, column) in self.0.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}#{}", column.name, column.id)?;
        }
        write!(f, "]")
    }
}

fn bind_all(exprs: &mut [ScalarExpr], schema: &Schema) -> OptResult<()> {
    exprs.iter_mut().try_for_each(|expr| expr.bind(schema))
}

fn input_schema<'a>(inputs: &[&'a Schema], idx: usize) -> OptResult<&'a Schema> {
    inputs.get(idx).copied().ok_or_else(|| {
        anyhow::anyhow!(crate::error::OptimizerError::Internal(format!(
            "missing input {idx}"
        )))
    })
}
