//! Table metadata consulted by the plan builder and the physical converter.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::anyhow;
use arrow_schema::DataType;
use serde::{Deserialize, Serialize};

use crate::error::OptResult;
use crate::expr::types::is_integer;

/// Row count assumed for tables without statistics.
pub const PSEUDO_ROW_COUNT: f64 = 10000.0;

fn default_nullable() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: DataType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub primary: bool,
}

impl IndexInfo {
    pub fn is_unique(&self) -> bool {
        self.unique || self.primary
    }
}

#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct TableStats {
    pub row_count: f64,
    /// Number of distinct values per column name.
    #[serde(default)]
    pub column_ndv: HashMap<String, f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    #[serde(default)]
    pub indices: Vec<IndexInfo>,
    /// The primary key is a single integer column that doubles as the row handle.
    #[serde(default)]
    pub pk_is_handle: bool,
    #[serde(default)]
    pub stats: Option<TableStats>,
}

impl TableInfo {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnInfo>) -> Self {
        Self {
            name: name.into(),
            columns,
            indices: vec![],
            pk_is_handle: false,
            stats: None,
        }
    }

    pub fn column_offset(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn primary_key(&self) -> Option<&IndexInfo> {
        self.indices.iter().find(|index| index.primary)
    }

    /// Offset of the integer handle column, if the table is clustered on one.
    pub fn handle_offset(&self) -> Option<usize> {
        if !self.pk_is_handle {
            return None;
        }
        let pk = self.primary_key()?;
        match pk.columns.as_slice() {
            [column] => {
                let offset = self.column_offset(column)?;
                if is_integer(&self.columns[offset].data_type) {
                    Some(offset)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    pub fn row_count(&self) -> f64 {
        self.stats
            .as_ref()
            .map(|s| s.row_count)
            .unwrap_or(PSEUDO_ROW_COUNT)
    }

    pub fn column_ndv(&self, name: &str) -> Option<f64> {
        self.stats
            .as_ref()
            .and_then(|s| s.column_ndv.get(name).copied())
    }
}

pub trait SchemaProvider: Send + Sync {
    fn table(&self, name: &str) -> Option<Arc<TableInfo>>;

    fn table_names(&self) -> Vec<String>;
}

/// Catalog kept in memory, keyed by lower cased table name.
#[derive(Default, Debug)]
pub struct MemorySchemaProvider {
    tables: RwLock<HashMap<String, Arc<TableInfo>>>,
}

impl MemorySchemaProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a table, returning the previous definition with the same name.
    pub fn register_table(&self, table: TableInfo) -> OptResult<Option<Arc<TableInfo>>> {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| anyhow!("Catalog lock poisoned"))?;
        Ok(tables.insert(table.name.to_ascii_lowercase(), Arc::new(table)))
    }

    pub fn deregister_table(&self, name: &str) -> OptResult<Option<Arc<TableInfo>>> {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| anyhow!("Catalog lock poisoned"))?;
        Ok(tables.remove(&name.to_ascii_lowercase()))
    }
}

impl SchemaProvider for MemorySchemaProvider {
    fn table(&self, name: &str) -> Option<Arc<TableInfo>> {
        let tables = self.tables.read().ok()?;
        tables.get(&name.to_ascii_lowercase()).cloned()
    }

    fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tables
            .read()
            .map(|tables| tables.values().map(|t| t.name.clone()).collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_table() {
        let table: TableInfo = serde_json::from_str(
            r#"{
                "name": "t1",
                "columns": [
                    {"name": "id", "data_type": "Int64", "nullable": false},
                    {"name": "v", "data_type": "Utf8"}
                ],
                "indices": [{"name": "primary", "columns": ["id"], "primary": true}],
                "pk_is_handle": true,
                "stats": {"row_count": 42.0, "column_ndv": {"v": 7.0}}
            }"#,
        )
        .unwrap();

        assert_eq!(Some(0), table.handle_offset());
        assert!(table.columns[1].nullable);
        assert_eq!(42.0, table.row_count());
        assert_eq!(Some(7.0), table.column_ndv("v"));
        assert_eq!(None, table.column_ndv("id"));
    }

    #[test]
    fn test_register_table() {
        let catalog = MemorySchemaProvider::new();
        let table = TableInfo::new(
            "T",
            vec![ColumnInfo {
                name: "a".to_string(),
                data_type: DataType::Int64,
                nullable: true,
            }],
        );
        assert!(catalog.register_table(table.clone()).unwrap().is_none());
        assert!(catalog.register_table(table).unwrap().is_some());
        assert_eq!(PSEUDO_ROW_COUNT, catalog.table("t").unwrap().row_count());
        assert_eq!(vec!["T".to_string()], catalog.table_names());
        assert!(catalog.deregister_table("t").unwrap().is_some());
        assert!(catalog.table("t").is_none());
    }
}
