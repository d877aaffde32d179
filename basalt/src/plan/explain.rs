use std::borrow::Cow;
use std::default::Default;
use std::io::{BufWriter, Write};

use ptree::print_config::UTF_CHARS;
use ptree::{write_tree_with, PrintConfig, Style, TreeItem};

use crate::error::OptResult;
use crate::plan::{LogicalPlan, PhysicalNode, PhysicalPlan, PlanNodeId};

/// A node of a logical plan viewed as a tree item.
#[derive(Clone)]
pub struct LogicalTreeItem<'a> {
    plan: &'a LogicalPlan,
    id: PlanNodeId,
}

impl<'a> TreeItem for LogicalTreeItem<'a> {
    type Child = Self;

    fn write_self<W: Write>(&self, f: &mut W, style: &Style) -> std::io::Result<()> {
        write!(f, "{}", style.paint(self.plan.operator(self.id)))
    }

    fn children(&self) -> Cow<'_, [Self::Child]> {
        Cow::from(
            self.plan
                .inputs(self.id)
                .iter()
                .map(|input| LogicalTreeItem {
                    plan: self.plan,
                    id: *input,
                })
                .collect::<Vec<_>>(),
        )
    }
}

impl<'a> TreeItem for &'a PhysicalNode {
    type Child = Self;

    fn write_self<W: Write>(&self, f: &mut W, style: &Style) -> std::io::Result<()> {
        write!(f, "{}", style.paint(self.operator()))
    }

    fn children(&self) -> Cow<'_, [Self::Child]> {
        Cow::from(
            self.inputs()
                .iter()
                .map(|c| &**c)
                .collect::<Vec<&'a PhysicalNode>>(),
        )
    }
}

fn print_config() -> PrintConfig {
    PrintConfig {
        indent: 3,
        characters: UTF_CHARS.into(),
        ..Default::default()
    }
}

pub fn explain_logical<W: Write>(plan: &LogicalPlan, output: &mut W) -> std::io::Result<()> {
    let item = LogicalTreeItem {
        plan,
        id: plan.root(),
    };
    write_tree_with(&item, output, &print_config())
}

pub fn explain_physical<W: Write>(plan: &PhysicalPlan, output: &mut W) -> std::io::Result<()> {
    write_tree_with(&&**plan.root(), output, &print_config())
}

fn render<F>(f: F) -> OptResult<String>
where
    F: FnOnce(&mut BufWriter<Vec<u8>>) -> std::io::Result<()>,
{
    let mut buf = BufWriter::new(Vec::new());
    f(&mut buf)?;
    let bytes = buf.into_inner()?;
    Ok(String::from_utf8(bytes)?)
}

pub fn explain_logical_to_string(plan: &LogicalPlan) -> OptResult<String> {
    render(|buf| explain_logical(plan, buf))
}

pub fn explain_to_string(plan: &PhysicalPlan) -> OptResult<String> {
    render(|buf| explain_physical(plan, buf))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow_schema::DataType;

    use super::*;
    use crate::catalog::{ColumnInfo, TableInfo};
    use crate::expr::{eq, lit_i64, ScalarExpr};
    use crate::operator::LogicalOperator::{LogicalLimit, LogicalScan, LogicalSelection};
    use crate::operator::PhysicalOperator::{PhysicalLimit, PhysicalTableScan};
    use crate::operator::{DataSource, Limit, Selection, TableScan};
    use crate::plan::{ColumnDesc, IdAllocator, PhysicalNodeBuilder};

    fn data_source(ids: &mut IdAllocator) -> DataSource {
        let table = TableInfo::new(
            "t1",
            vec![ColumnInfo {
                name: "c1".to_string(),
                data_type: DataType::Int64,
                nullable: true,
            }],
        );
        let column = ColumnDesc::new(ids.next_column_id(), "c1", DataType::Int64, true)
            .with_table(Some("t1".to_string()));
        DataSource::new(Arc::new(table), None, vec![column], vec![0])
    }

    #[test]
    fn test_explain_logical_plan() {
        let mut ids = IdAllocator::default();
        let mut plan = LogicalPlan::new();
        let source = data_source(&mut ids);
        let scan = plan.add_node(&mut ids, LogicalScan(source), vec![]).unwrap();
        let filter = plan
            .add_node(
                &mut ids,
                LogicalSelection(Selection::new(vec![eq(
                    ScalarExpr::column(0, DataType::Int64),
                    lit_i64(3),
                )])),
                vec![scan],
            )
            .unwrap();
        let limit = plan
            .add_node(&mut ids, LogicalLimit(Limit::new(0, 10)), vec![filter])
            .unwrap();
        plan.set_root(limit);

        let expected_result = "\
LogicalLimit { count: 10 }
└─ LogicalSelection { conditions: [(#0 = 3)] }
   └─ LogicalScan { table: \"t1\", columns: [c1#0] }
";
        assert_eq!(expected_result, explain_logical_to_string(&plan).unwrap());
    }

    #[test]
    fn test_explain_physical_plan() {
        let mut ids = IdAllocator::default();
        let source = data_source(&mut ids);
        let schema = source.schema();
        let scan = PhysicalNodeBuilder::new(
            1,
            PhysicalTableScan(TableScan {
                source,
                access_conditions: vec![],
                filters: vec![],
                keep_order: false,
                desc: false,
                scan_rows: 10.0,
            }),
            schema.clone(),
        )
        .build();
        let limit = PhysicalNodeBuilder::new(2, PhysicalLimit(Limit::new(5, 10)), schema)
            .add_inputs(vec![Arc::new(scan)])
            .build();
        let plan = PhysicalPlan::new(Arc::new(limit));

        let expected_result = "\
PhysicalLimit { offset: 5, count: 10 }
└─ PhysicalTableScan { table: \"t1\", columns: [c1#0] }
";
        assert_eq!(expected_result, explain_to_string(&plan).unwrap());
    }
}
