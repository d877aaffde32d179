use std::fmt::{Debug, Formatter};

use crate::plan::ColumnId;
use crate::properties::PhysicalProp;

/// Ordering of one column. NULLs sort first in ascending order.
#[derive(Hash, Clone, Copy, Eq, PartialEq)]
pub struct SortColumn {
    pub column: ColumnId,
    pub desc: bool,
}

impl SortColumn {
    pub fn asc(column: ColumnId) -> Self {
        Self {
            column,
            desc: false,
        }
    }

    pub fn desc(column: ColumnId) -> Self {
        Self { column, desc: true }
    }
}

impl Debug for SortColumn {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.column)?;
        if self.desc {
            write!(f, " desc")?;
        }
        Ok(())
    }
}

/// Ordering property specification.
#[derive(Hash, Debug, Clone, Eq, PartialEq, Default)]
pub struct OrderSpec {
    columns: Vec<SortColumn>,
}

impl OrderSpec {
    pub fn new(columns: Vec<SortColumn>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[SortColumn] {
        &self.columns
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Whether every column of the ordering is ascending.
    pub fn all_asc(&self) -> bool {
        self.columns.iter().all(|c| !c.desc)
    }

    /// Whether the ordering columns are a prefix of `columns`.
    pub fn is_prefix_of(&self, columns: &[ColumnId]) -> bool {
        self.columns.len() <= columns.len()
            && self
                .columns
                .iter()
                .zip(columns.iter())
                .all(|(sort, id)| sort.column == *id)
    }
}

impl From<Vec<SortColumn>> for OrderSpec {
    fn from(columns: Vec<SortColumn>) -> Self {
        Self::new(columns)
    }
}

impl PhysicalProp for OrderSpec {
    /// An ordering satisfies any prefix of itself.
    fn satisfies(&self, required: &Self) -> bool {
        required.columns.len() <= self.columns.len()
            && required
                .columns
                .iter()
                .zip(self.columns.iter())
                .all(|(r, p)| r == p)
    }
}
