use std::fmt::Formatter;

use crate::catalog::IndexInfo;
use crate::cost::{Cost, CostContext, DESC_SCAN_FACTOR, LOOKUP_FACTOR, SCAN_FACTOR};
use crate::expr::ScalarExpr;
use crate::operator::{ColumnsDisplay, DataSource, DisplayFields, PhysicalOperatorTrait};
use crate::plan::PhysicalNodeRef;
use crate::properties::{OrderSpec, SortColumn};

/// Reads the table rows, optionally within handle ranges and in handle order.
#[derive(Clone, Debug, PartialEq)]
pub struct TableScan {
    pub source: DataSource,
    pub access_conditions: Vec<ScalarExpr>,
    pub filters: Vec<ScalarExpr>,
    pub keep_order: bool,
    pub desc: bool,
    /// Estimated rows read before filtering.
    pub scan_rows: f64,
}

/// Reads a covering index.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexScan {
    pub source: DataSource,
    pub index: IndexInfo,
    pub access_conditions: Vec<ScalarExpr>,
    pub filters: Vec<ScalarExpr>,
    pub keep_order: bool,
    pub desc: bool,
    pub scan_rows: f64,
}

/// Reads an index, then fetches the table row of every index entry.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexLookup {
    pub index_scan: IndexScan,
}

fn scan_cost(scan_rows: f64, desc: bool, filtered: bool, ctx: &CostContext) -> f64 {
    let rows = match ctx.limit {
        Some(limit) if !filtered => scan_rows.min(limit as f64),
        _ => scan_rows,
    };
    let factor = if desc { DESC_SCAN_FACTOR } else { SCAN_FACTOR };
    rows * factor
}

impl IndexScan {
    /// Ordering of the index columns that are also output columns.
    pub fn index_order(&self) -> OrderSpec {
        let columns = self
            .index
            .columns
            .iter()
            .map_while(|name| self.source.column_by_name(name))
            .map(|column| SortColumn {
                column: column.id,
                desc: self.desc,
            })
            .collect::<Vec<_>>();
        OrderSpec::new(columns)
    }
}

impl PhysicalOperatorTrait for TableScan {
    fn output_order(&self, _inputs: &[PhysicalNodeRef]) -> OrderSpec {
        match self.source.handle_column() {
            Some(handle) if self.keep_order => OrderSpec::new(vec![SortColumn {
                column: handle.id,
                desc: self.desc,
            }]),
            _ => OrderSpec::default(),
        }
    }

    fn cost(&self, ctx: &CostContext) -> Cost {
        Cost::from(scan_cost(
            self.scan_rows,
            self.desc,
            !self.filters.is_empty(),
            ctx,
        ))
    }
}

impl PhysicalOperatorTrait for IndexScan {
    fn output_order(&self, _inputs: &[PhysicalNodeRef]) -> OrderSpec {
        if self.keep_order {
            self.index_order()
        } else {
            OrderSpec::default()
        }
    }

    fn cost(&self, ctx: &CostContext) -> Cost {
        Cost::from(scan_cost(
            self.scan_rows,
            self.desc,
            !self.filters.is_empty(),
            ctx,
        ))
    }
}

impl PhysicalOperatorTrait for IndexLookup {
    fn output_order(&self, inputs: &[PhysicalNodeRef]) -> OrderSpec {
        self.index_scan.output_order(inputs)
    }

    fn cost(&self, ctx: &CostContext) -> Cost {
        let scan = &self.index_scan;
        let index_cost = scan_cost(scan.scan_rows, scan.desc, !scan.filters.is_empty(), ctx);
        let lookups = match ctx.limit {
            Some(limit) if scan.filters.is_empty() => scan.scan_rows.min(limit as f64),
            _ => scan.scan_rows,
        };
        Cost::from(index_cost + lookups * LOOKUP_FACTOR)
    }
}

impl DisplayFields for TableScan {
    fn display(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("");
        s.field("table", &self.source.table_name())
            .field("columns", &ColumnsDisplay(self.source.columns()));
        if !self.access_conditions.is_empty() {
            s.field("access", &self.access_conditions);
        }
        if !self.filters.is_empty() {
            s.field("filters", &self.filters);
        }
        if self.keep_order {
            s.field("desc", &self.desc);
        }
        s.finish()
    }
}

fn display_index_scan(scan: &IndexScan, f: &mut Formatter<'_>) -> std::fmt::Result {
    let mut s = f.debug_struct("");
    s.field("table", &scan.source.table_name())
        .field("index", &scan.index.name)
        .field("columns", &ColumnsDisplay(scan.source.columns()));
    if !scan.access_conditions.is_empty() {
        s.field("access", &scan.access_conditions);
    }
    if !scan.filters.is_empty() {
        s.field("filters", &scan.filters);
    }
    if scan.keep_order {
        s.field("desc", &scan.desc);
    }
    s.finish()
}

impl DisplayFields for IndexScan {
    fn display(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        display_index_scan(self, f)
    }
}

impl DisplayFields for IndexLookup {
    fn display(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        display_index_scan(&self.index_scan, f)
    }
}
