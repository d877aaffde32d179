use std::fmt::Formatter;
use std::sync::Arc;

use crate::catalog::{IndexInfo, TableInfo};
use crate::error::OptResult;
use crate::expr::{extend_distinct, ScalarExpr};
use crate::operator::{bind_all, ColumnsDisplay, DisplayFields, OperatorTrait};
use crate::plan::{ColumnDesc, ColumnId, Schema};

/// Logical read of a base table.
#[derive(Clone, Debug, PartialEq)]
pub struct DataSource {
    table: Arc<TableInfo>,
    alias: Option<String>,
    columns: Vec<ColumnDesc>,
    /// Offset of each output column in the table definition.
    offsets: Vec<usize>,
    pushed_conditions: Vec<ScalarExpr>,
    access_paths: Vec<AccessPath>,
}

/// One way of reading the rows of a [`DataSource`].
#[derive(Clone, Debug, PartialEq)]
pub struct AccessPath {
    /// `None` for reading the table itself.
    pub index: Option<IndexInfo>,
    /// Conditions turned into key ranges of the index or handle.
    pub access_conditions: Vec<ScalarExpr>,
    /// Remaining conditions evaluated on every row read.
    pub filters: Vec<ScalarExpr>,
    /// Number of leading key columns fixed by equality conditions.
    pub equal_prefix: usize,
    /// Whether the key columns contain every output column.
    pub covering: bool,
}

impl AccessPath {
    pub fn is_table_path(&self) -> bool {
        self.index.is_none()
    }
}

impl DataSource {
    pub fn new(
        table: Arc<TableInfo>,
        alias: Option<String>,
        columns: Vec<ColumnDesc>,
        offsets: Vec<usize>,
    ) -> Self {
        Self {
            table,
            alias,
            columns,
            offsets,
            pushed_conditions: vec![],
            access_paths: vec![],
        }
    }

    pub fn table(&self) -> &Arc<TableInfo> {
        &self.table
    }

    pub fn table_name(&self) -> &str {
        &self.table.name
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn columns(&self) -> &[ColumnDesc] {
        &self.columns
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn pushed_conditions(&self) -> &[ScalarExpr] {
        &self.pushed_conditions
    }

    pub fn access_paths(&self) -> &[AccessPath] {
        &self.access_paths
    }

    pub fn set_access_paths(&mut self, access_paths: Vec<AccessPath>) {
        self.access_paths = access_paths;
    }

    pub fn add_conditions(&mut self, conditions: impl IntoIterator<Item = ScalarExpr>) {
        extend_distinct(&mut self.pushed_conditions, conditions);
    }

    /// Keeps the output columns accepted by `keep`, at least one column survives.
    pub fn retain_columns<F: Fn(ColumnId) -> bool>(&mut self, keep: F) {
        let kept: Vec<usize> = (0..self.columns.len())
            .filter(|idx| keep(self.columns[*idx].id))
            .collect();
        let kept = if kept.is_empty() && !self.columns.is_empty() {
            vec![0]
        } else {
            kept
        };
        self.columns = kept.iter().map(|idx| self.columns[*idx].clone()).collect();
        self.offsets = kept.iter().map(|idx| self.offsets[*idx]).collect();
    }

    /// Output column reading the table column at `offset`.
    pub fn column_at_offset(&self, offset: usize) -> Option<&ColumnDesc> {
        self.offsets
            .iter()
            .position(|o| *o == offset)
            .map(|idx| &self.columns[idx])
    }

    /// Output column reading the table column named `name`.
    pub fn column_by_name(&self, name: &str) -> Option<&ColumnDesc> {
        self.table
            .column_offset(name)
            .and_then(|offset| self.column_at_offset(offset))
    }

    /// The output column holding the integer row handle.
    pub fn handle_column(&self) -> Option<&ColumnDesc> {
        self.table
            .handle_offset()
            .and_then(|offset| self.column_at_offset(offset))
    }

    pub fn schema(&self) -> Schema {
        Schema::new(self.columns.clone())
    }
}

impl OperatorTrait for DataSource {
    fn derive_schema(&self, _inputs: &[&Schema]) -> OptResult<Schema> {
        Ok(self.schema())
    }

    fn expressions(&self) -> Vec<&ScalarExpr> {
        self.pushed_conditions.iter().collect()
    }

    fn bind_columns(&mut self, _inputs: &[&Schema]) -> OptResult<()> {
        let schema = self.schema();
        bind_all(&mut self.pushed_conditions, &schema)?;
        for path in &mut self.access_paths {
            bind_all(&mut path.access_conditions, &schema)?;
            bind_all(&mut path.filters, &schema)?;
        }
        Ok(())
    }
}

impl DisplayFields for DataSource {
    fn display(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("");
        s.field("table", &self.table.name);
        if let Some(alias) = &self.alias {
            s.field("alias", alias);
        }
        s.field("columns", &ColumnsDisplay(&self.columns));
        if !self.pushed_conditions.is_empty() {
            s.field("conditions", &self.pushed_conditions);
        }
        s.finish()
    }
}
