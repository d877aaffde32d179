use std::fmt::{Debug, Formatter};

use crate::cost::{Cost, CostContext, CPU_FACTOR};
use crate::error::OptResult;
use crate::expr::ColumnRef;
use crate::operator::{input_schema, DisplayFields, OperatorTrait, PhysicalOperatorTrait};
use crate::plan::{PhysicalNodeRef, Schema};
use crate::properties::{OrderSpec, SortColumn};

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SortItem {
    pub column: ColumnRef,
    pub desc: bool,
}

impl SortItem {
    pub fn new(column: ColumnRef, desc: bool) -> Self {
        Self { column, desc }
    }
}

impl Debug for SortItem {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.column)?;
        if self.desc {
            write!(f, " desc")?;
        }
        Ok(())
    }
}

fn order_of(items: &[SortItem]) -> OrderSpec {
    OrderSpec::new(
        items
            .iter()
            .map(|item| SortColumn {
                column: item.column.id,
                desc: item.desc,
            })
            .collect(),
    )
}

fn bind_items(items: &mut [SortItem], inputs: &[&Schema]) -> OptResult<()> {
    let schema = input_schema(inputs, 0)?;
    items.iter_mut().try_for_each(|item| item.column.bind(schema))
}

/// Sorts the input rows, NULLs first in ascending order.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Sort {
    pub items: Vec<SortItem>,
}

impl Sort {
    pub fn new(items: Vec<SortItem>) -> Self {
        Self { items }
    }

    pub fn order(&self) -> OrderSpec {
        order_of(&self.items)
    }
}

impl OperatorTrait for Sort {
    fn derive_schema(&self, inputs: &[&Schema]) -> OptResult<Schema> {
        Ok(Schema::new(input_schema(inputs, 0)?.columns().to_vec()))
    }

    fn referenced_columns(&self) -> std::collections::HashSet<crate::plan::ColumnId> {
        self.items.iter().map(|item| item.column.id).collect()
    }

    fn bind_columns(&mut self, inputs: &[&Schema]) -> OptResult<()> {
        bind_items(&mut self.items, inputs)
    }
}

impl PhysicalOperatorTrait for Sort {
    fn output_order(&self, _inputs: &[PhysicalNodeRef]) -> OrderSpec {
        self.order()
    }

    fn cost(&self, ctx: &CostContext) -> Cost {
        let rows = ctx.input_rows(0).max(2.0);
        Cost::from(rows * rows.log2() * CPU_FACTOR)
    }
}

impl DisplayFields for Sort {
    fn display(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("").field("items", &self.items).finish()
    }
}

/// Sorts and keeps the first `offset + count` rows, then skips `offset` of them.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TopN {
    pub items: Vec<SortItem>,
    pub offset: u64,
    pub count: u64,
}

impl TopN {
    pub fn new(items: Vec<SortItem>, offset: u64, count: u64) -> Self {
        Self {
            items,
            offset,
            count,
        }
    }

    pub fn order(&self) -> OrderSpec {
        order_of(&self.items)
    }

    pub fn bind_columns(&mut self, inputs: &[&Schema]) -> OptResult<()> {
        bind_items(&mut self.items, inputs)
    }
}

impl PhysicalOperatorTrait for TopN {
    fn output_order(&self, _inputs: &[PhysicalNodeRef]) -> OrderSpec {
        self.order()
    }

    fn cost(&self, ctx: &CostContext) -> Cost {
        let heap = (self.offset.saturating_add(self.count) as f64 + 2.0).log2();
        Cost::from(ctx.input_rows(0) * heap * CPU_FACTOR)
    }
}

impl DisplayFields for TopN {
    fn display(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("");
        s.field("items", &self.items);
        if self.offset > 0 {
            s.field("offset", &self.offset);
        }
        s.field("count", &self.count).finish()
    }
}
