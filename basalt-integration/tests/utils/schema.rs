use std::fs::File;
use std::path::Path;

use anyhow::Context;
use basalt::catalog::TableInfo;
use basalt_integration::MemDatabase;
use datafusion_common::ScalarValue;
use serde::Deserialize;

/// A table definition followed by its integer rows, `~` stands for NULL.
#[derive(Deserialize)]
pub struct TableFixture {
    #[serde(flatten)]
    pub table: TableInfo,
    #[serde(default)]
    pub rows: Vec<Vec<Option<i64>>>,
}

pub fn load_tables<P: AsRef<Path>>(path: P) -> Vec<TableFixture> {
    let path = path.as_ref();
    let file = File::options()
        .read(true)
        .open(path)
        .with_context(|| format!("Failed to open table fixtures: {:?}", path))
        .unwrap();
    serde_yaml::from_reader(file)
        .with_context(|| format!("Failed to load table fixtures from file: {:?}", path))
        .unwrap()
}

pub fn create_database(tables: Vec<TableFixture>) -> MemDatabase {
    let mut db = MemDatabase::new();
    for fixture in tables {
        let name = fixture.table.name.clone();
        db.create_table(fixture.table).unwrap();
        let rows = fixture
            .rows
            .into_iter()
            .map(|row| row.into_iter().map(ScalarValue::Int64).collect());
        db.insert(&name, rows).unwrap();
    }
    db
}
