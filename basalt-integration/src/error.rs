use basalt::plan::ColumnId;
use thiserror::Error;

pub type ExecResult<T> = anyhow::Result<T>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Subquery returns more than 1 row")]
    MoreThanOneRow,
    #[error("Column #{0} is not in the input row")]
    UnboundColumn(ColumnId),
    #[error("Correlated column #{0} has no outer value")]
    UnboundCorrelated(ColumnId),
    #[error("Table '{0}' doesn't exist")]
    UnknownTable(String),
    #[error("Row of table '{0}' has {1} values, expected {2}")]
    RowWidth(String, usize, usize),
    #[error("Statement doesn't produce rows")]
    NotRelational,
    #[error("Unsupported: {0}")]
    Unsupported(String),
}
