use std::collections::HashSet;

use arrow_schema::DataType;

use crate::expr::{ColumnRef, ScalarExpr};
use crate::plan::ColumnId;

/// A column produced by a plan node.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ColumnDesc {
    pub id: ColumnId,
    pub name: String,
    /// Table name or alias qualifying the column in name resolution.
    pub table: Option<String>,
    pub data_type: DataType,
    pub nullable: bool,
}

impl ColumnDesc {
    pub fn new(id: ColumnId, name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            id,
            name: name.into(),
            table: None,
            data_type,
            nullable,
        }
    }

    pub fn with_table(mut self, table: Option<String>) -> Self {
        self.table = table;
        self
    }

    pub fn column_ref(&self) -> ColumnRef {
        ColumnRef::new(self.id, self.data_type.clone())
    }

    pub fn to_expr(&self) -> ScalarExpr {
        ScalarExpr::Column(self.column_ref())
    }

    /// Whether an unqualified or qualified name refers to this column.
    pub fn matches(&self, table: Option<&str>, name: &str) -> bool {
        if !self.name.eq_ignore_ascii_case(name) {
            return false;
        }
        match (table, &self.table) {
            (None, _) => true,
            (Some(t), Some(own)) => own.eq_ignore_ascii_case(t),
            (Some(_), None) => false,
        }
    }

    pub fn qualified_name(&self) -> String {
        match &self.table {
            Some(t) => format!("{}.{}", t, self.name),
            None => self.name.clone(),
        }
    }
}

/// Ordered output columns of a plan node with the unique keys known over them.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Schema {
    columns: Vec<ColumnDesc>,
    /// Each key is a set of columns whose values are unique over the output. An empty key
    /// means the node yields at most one row.
    keys: Vec<Vec<ColumnId>>,
}

impl Schema {
    pub fn new(columns: Vec<ColumnDesc>) -> Self {
        Self {
            columns,
            keys: vec![],
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn columns(&self) -> &[ColumnDesc] {
        &self.columns
    }

    pub fn into_columns(self) -> Vec<ColumnDesc> {
        self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column(&self, idx: usize) -> &ColumnDesc {
        &self.columns[idx]
    }

    pub fn index_of(&self, id: ColumnId) -> Option<usize> {
        self.columns.iter().position(|c| c.id == id)
    }

    pub fn contains(&self, id: ColumnId) -> bool {
        self.index_of(id).is_some()
    }

    pub fn column_by_id(&self, id: ColumnId) -> Option<&ColumnDesc> {
        self.columns.iter().find(|c| c.id == id)
    }

    pub fn ids(&self) -> Vec<ColumnId> {
        self.columns.iter().map(|c| c.id).collect()
    }

    pub fn id_set(&self) -> HashSet<ColumnId> {
        self.columns.iter().map(|c| c.id).collect()
    }

    pub fn keys(&self) -> &[Vec<ColumnId>] {
        &self.keys
    }

    pub fn set_keys(&mut self, keys: Vec<Vec<ColumnId>>) {
        let mut distinct: Vec<Vec<ColumnId>> = vec![];
        for mut key in keys {
            key.sort_unstable();
            key.dedup();
            if !distinct.contains(&key) {
                distinct.push(key);
            }
        }
        self.keys = distinct;
    }

    /// Whether some unique key lies entirely within `columns`.
    pub fn has_key_within(&self, columns: &HashSet<ColumnId>) -> bool {
        self.keys
            .iter()
            .any(|key| key.iter().all(|id| columns.contains(id)))
    }

    /// Whether the node is known to produce at most one row.
    pub fn is_max_one_row(&self) -> bool {
        self.keys.iter().any(|key| key.is_empty())
    }

    /// Columns of `self` followed by the columns of `other`.
    pub fn concat(&self, other: &Schema) -> Schema {
        let mut columns = self.columns.clone();
        columns.extend(other.columns.iter().cloned());
        Schema::new(columns)
    }

    /// Same column ids, names and types in the same order.
    pub fn same_columns(&self, other: &Schema) -> bool {
        self.columns.len() == other.columns.len()
            && self.columns.iter().zip(other.columns.iter()).all(|(l, r)| {
                l.id == r.id && l.name == r.name && l.data_type == r.data_type
            })
    }
}
