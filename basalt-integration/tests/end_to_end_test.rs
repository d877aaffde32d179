mod utils;

use basalt::ast::{
    col, count_star, exists, func, lit, not_exists, row, subquery, AstJoinType, SelectStmt,
    Statement, TableRef,
};
use basalt::config::OptimizerConfig;
use basalt::error::OptimizerError;
use basalt::operator::PhysicalOperator::{
    PhysicalMergeJoin, PhysicalSort, PhysicalStreamAgg, PhysicalTopN,
};
use basalt::operator::PhysicalOperatorTrait;
use basalt::plan::{ColumnId, PhysicalNodeRef};
use basalt::properties::{OrderSpec, PhysicalProp, SortColumn};
use basalt::rules::OptFlags;
use basalt_integration::error::ExecutionError;
use basalt_integration::eval::sort_order;

use crate::utils::{
    has_operator, int_rows, ints, optimize_error, plan, run, run_with_flags, sorted,
    test_database,
};

fn select_from(table: &str) -> SelectStmt {
    SelectStmt::new().wildcard().from(TableRef::table(table))
}

#[test]
fn test_correlated_exists_with_having() {
    let db = test_database();
    let inner = SelectStmt::new()
        .wildcard()
        .from(TableRef::table_as("t", "k"))
        .filter(col("t.c").eq(col("k.c")))
        .having(func("sum", vec![col("c")]).eq(lit(1i64)))
        .into_query();
    let stmt = select_from("t")
        .filter(exists(inner))
        .into_query()
        .into_statement();

    let plan = plan(&db, &stmt);
    assert!(has_operator(&plan, "PhysicalApply"));
    assert!(has_operator(&plan, "PhysicalCache"));

    assert_eq!(int_rows(&[&[Some(1), Some(1)]]), run(&db, &stmt));
    assert_eq!(
        int_rows(&[&[Some(1), Some(1)]]),
        run_with_flags(&db, &stmt, OptFlags::empty())
    );
}

#[test]
fn test_exists_decorrelated_to_semi_join() {
    let db = test_database();
    let inner = select_from("r").filter(col("r.x").eq(col("t.c"))).into_query();
    let stmt = SelectStmt::new()
        .field(col("c"))
        .from(TableRef::table("t"))
        .filter(exists(inner))
        .into_query()
        .into_statement();

    let plan = plan(&db, &stmt);
    assert!(!has_operator(&plan, "PhysicalApply"));
    assert_eq!(int_rows(&[&[Some(1)], &[Some(2)]]), sorted(run(&db, &stmt)));
}

#[test]
fn test_not_exists() {
    let db = test_database();
    let inner = select_from("r").filter(col("r.x").eq(col("t.c"))).into_query();
    let stmt = SelectStmt::new()
        .field(col("c"))
        .from(TableRef::table("t"))
        .filter(not_exists(inner))
        .into_query()
        .into_statement();
    assert_eq!(int_rows(&[&[Some(3)]]), run(&db, &stmt));
}

#[test]
fn test_in_subquery() {
    let db = test_database();
    let inner = SelectStmt::new()
        .field(col("c"))
        .from(TableRef::table("t"))
        .into_query();
    let stmt = SelectStmt::new()
        .field(col("x"))
        .from(TableRef::table("r"))
        .filter(col("x").in_subquery(inner))
        .into_query()
        .into_statement();
    assert_eq!(
        int_rows(&[&[Some(1)], &[Some(2)], &[Some(2)]]),
        sorted(run(&db, &stmt))
    );
}

#[test]
fn test_not_in_subquery_with_nulls() {
    let db = test_database();
    let with_null = SelectStmt::new()
        .field(col("x"))
        .from(TableRef::table("r"))
        .into_query();
    let stmt = SelectStmt::new()
        .field(col("c"))
        .from(TableRef::table("t"))
        .filter(col("c").not_in_subquery(with_null))
        .into_query()
        .into_statement();
    assert!(run(&db, &stmt).is_empty());
    assert!(run_with_flags(&db, &stmt, OptFlags::empty()).is_empty());

    let without_null = SelectStmt::new()
        .field(col("x"))
        .from(TableRef::table("r"))
        .filter(col("x").is_null().not())
        .into_query();
    let stmt = SelectStmt::new()
        .field(col("c"))
        .from(TableRef::table("t"))
        .filter(col("c").not_in_subquery(without_null))
        .into_query()
        .into_statement();
    assert_eq!(int_rows(&[&[Some(3)]]), run(&db, &stmt));
}

fn r_x() -> basalt::ast::Query {
    SelectStmt::new()
        .field(col("x"))
        .from(TableRef::table("r"))
        .into_query()
}

#[test]
fn test_in_subquery_inside_expressions_keeps_nulls() {
    let db = test_database();
    let negated_or = SelectStmt::new()
        .field(col("c"))
        .from(TableRef::table("t"))
        .filter(
            col("c")
                .in_subquery(r_x())
                .not()
                .or(col("c").gt(lit(100i64))),
        )
        .into_query()
        .into_statement();
    for flags in [OptFlags::all(), OptFlags::empty()] {
        assert!(run_with_flags(&db, &negated_or, flags).is_empty());
    }

    let bool_row = |c: i64, flag: Option<bool>| {
        vec![
            datafusion_common::ScalarValue::Int64(Some(c)),
            datafusion_common::ScalarValue::Boolean(flag),
        ]
    };
    let in_field = SelectStmt::new()
        .field(col("c"))
        .field_as(col("c").in_subquery(r_x()), "found")
        .from(TableRef::table("t"))
        .into_query()
        .into_statement();
    let not_in_field = SelectStmt::new()
        .field(col("c"))
        .field_as(col("c").not_in_subquery(r_x()), "missing")
        .from(TableRef::table("t"))
        .into_query()
        .into_statement();
    for flags in [OptFlags::all(), OptFlags::empty()] {
        assert_eq!(
            vec![bool_row(1, Some(true)), bool_row(2, Some(true)), bool_row(3, None)],
            sorted(run_with_flags(&db, &in_field, flags))
        );
        assert_eq!(
            vec![bool_row(1, Some(false)), bool_row(2, Some(false)), bool_row(3, None)],
            sorted(run_with_flags(&db, &not_in_field, flags))
        );
    }
}

#[test]
fn test_correlated_in_subquery_inside_or() {
    let db = test_database();
    let inner = SelectStmt::new()
        .field(col("x"))
        .from(TableRef::table("r"))
        .filter(col("r.y").gt(col("t.d")))
        .into_query();
    let stmt = SelectStmt::new()
        .field(col("c"))
        .from(TableRef::table("t"))
        .filter(col("c").in_subquery(inner).or(col("c").eq(lit(3i64))))
        .into_query()
        .into_statement();
    for flags in [OptFlags::all(), OptFlags::empty()] {
        assert_eq!(
            int_rows(&[&[Some(2)], &[Some(3)]]),
            sorted(run_with_flags(&db, &stmt, flags))
        );
    }

    // An inner row filtered out by a NULL condition is not a NULL comparison.
    let filtered = SelectStmt::new()
        .field(col("x"))
        .from(TableRef::table("r"))
        .filter(col("r.y").gt(col("t.d")).and(col("r.x").is_null().not()))
        .into_query();
    let stmt = SelectStmt::new()
        .field(col("c"))
        .from(TableRef::table("t"))
        .filter(col("c").in_subquery(filtered).not().or(col("c").eq(lit(2i64))))
        .into_query()
        .into_statement();
    assert_eq!(
        int_rows(&[&[Some(1)], &[Some(2)], &[Some(3)]]),
        sorted(run(&db, &stmt))
    );
}

#[test]
fn test_scalar_subquery() {
    let db = test_database();
    let inner = SelectStmt::new()
        .field(col("d"))
        .from(TableRef::table_as("t", "k"))
        .filter(col("k.c").eq(col("t.c")))
        .into_query();
    let stmt = SelectStmt::new()
        .field(col("c"))
        .field_as(subquery(inner), "sq")
        .from(TableRef::table("t"))
        .into_query()
        .into_statement();
    assert_eq!(
        int_rows(&[&[Some(1), Some(1)], &[Some(2), Some(2)], &[Some(3), Some(4)]]),
        sorted(run(&db, &stmt))
    );

    let many = SelectStmt::new()
        .field(col("x"))
        .from(TableRef::table("r"))
        .into_query();
    let stmt = SelectStmt::new()
        .field(col("c"))
        .field_as(subquery(many), "sq")
        .from(TableRef::table("t"))
        .into_query()
        .into_statement();
    let err = db
        .query(&stmt, OptimizerConfig::default(), OptFlags::all())
        .unwrap_err();
    assert_eq!(
        Some(&ExecutionError::MoreThanOneRow),
        err.downcast_ref::<ExecutionError>()
    );
}

#[test]
fn test_outer_joins() {
    let db = test_database();
    let left = SelectStmt::new()
        .field(col("c"))
        .field(col("y"))
        .from(TableRef::table("t").join(
            TableRef::table("r"),
            AstJoinType::Left,
            col("t.c").eq(col("r.x")),
        ))
        .into_query()
        .into_statement();
    assert_eq!(
        int_rows(&[
            &[Some(1), None],
            &[Some(2), Some(20)],
            &[Some(2), Some(21)],
            &[Some(3), None],
        ]),
        sorted(run(&db, &left))
    );

    let right = SelectStmt::new()
        .field(col("c"))
        .field(col("d"))
        .from(TableRef::table("t").join(
            TableRef::table("r"),
            AstJoinType::Right,
            col("t.c").eq(col("r.x")),
        ))
        .into_query()
        .into_statement();
    assert_eq!(
        int_rows(&[
            &[None, None],
            &[Some(1), Some(1)],
            &[Some(2), Some(2)],
            &[Some(2), Some(2)],
        ]),
        sorted(run(&db, &right))
    );
}

#[test]
fn test_cartesian_product_guard() {
    let db = test_database();
    let stmt = select_from("t")
        .from(TableRef::table("t").cross(TableRef::table("r")))
        .into_query()
        .into_statement();

    let config = OptimizerConfig {
        allow_cartesian_product: false,
        ..Default::default()
    };
    let err = optimize_error(&db, &stmt, config);
    assert_eq!(OptimizerError::CartesianProductUnsupported, err);
    assert_eq!(4, err.code());

    assert_eq!(12, run(&db, &stmt).len());

    let joined = select_from("t")
        .from(TableRef::table("t").join(
            TableRef::table("r"),
            AstJoinType::Inner,
            col("t.c").eq(col("r.x")),
        ))
        .into_query()
        .into_statement();
    let config = OptimizerConfig {
        allow_cartesian_product: false,
        ..Default::default()
    };
    let rows = db.query(&joined, config, OptFlags::all()).unwrap();
    assert_eq!(3, rows.len());
}

#[test]
fn test_row_expression_errors() {
    let db = test_database();
    let in_order_by = select_from("t")
        .into_query()
        .order_by(row(vec![col("c"), col("d")]), false)
        .into_statement();
    assert_eq!(
        OptimizerError::InvalidRowExpression("ORDER BY"),
        optimize_error(&db, &in_order_by, OptimizerConfig::default())
    );

    let in_fields = SelectStmt::new()
        .field(row(vec![col("c"), col("d")]))
        .from(TableRef::table("t"))
        .into_query()
        .into_statement();
    assert_eq!(
        OptimizerError::InvalidRowExpression("field list"),
        optimize_error(&db, &in_fields, OptimizerConfig::default())
    );
}

fn assert_sorted_by(rows: &[Vec<datafusion_common::ScalarValue>], column: usize, desc: bool) {
    for pair in rows.windows(2) {
        let order = sort_order(&pair[0][column], &pair[1][column]);
        let order = if desc { order.reverse() } else { order };
        assert!(order.is_le(), "{:?} out of order", pair);
    }
}

fn ascending(columns: Vec<ColumnId>) -> OrderSpec {
    OrderSpec::new(columns.into_iter().map(SortColumn::asc).collect())
}

/// Checks bottom-up that every node claims the order its operator derives from its inputs,
/// and that operators reading sorted input get it.
fn assert_orders_hold(node: &PhysicalNodeRef) {
    for input in node.inputs() {
        assert_orders_hold(input);
    }
    assert_eq!(
        node.order(),
        &node.operator().output_order(node.inputs()),
        "{}",
        node.operator()
    );
    let required = match node.operator() {
        PhysicalMergeJoin(merge) => vec![
            ascending(merge.join.left_keys()),
            ascending(merge.join.right_keys()),
        ],
        PhysicalStreamAgg(stream) => {
            vec![ascending(stream.agg.group_by_columns().unwrap_or_default())]
        }
        PhysicalSort(_) | PhysicalTopN(_) => {
            assert!(!node.order().is_empty(), "{}", node.operator());
            vec![]
        }
        _ => vec![],
    };
    for (input, sort) in node.inputs().iter().zip(&required) {
        assert!(
            input.order().satisfies(sort),
            "{} reads {:?}, requires {:?}",
            node.operator(),
            input.order(),
            sort
        );
    }
}

fn assert_root_order(stmt: &Statement, column: usize, desc: bool) {
    let db = test_database();
    let plan = plan(&db, stmt);
    let root = plan.root();
    let id = root.schema().column(column).id;
    let required = OrderSpec::new(vec![SortColumn { column: id, desc }]);
    assert!(root.order().satisfies(&required));
    assert_orders_hold(root);
    assert_sorted_by(&db.execute(&plan).unwrap(), column, desc);
}

#[test]
fn test_group_by_with_order() {
    let db = test_database();
    let stmt = SelectStmt::new()
        .field(col("a"))
        .field(func("sum", vec![col("c")]))
        .from(TableRef::table("s"))
        .group_by(vec![col("a")])
        .into_query()
        .order_by(col("a"), true)
        .into_statement();
    assert_eq!(
        int_rows(&[
            &[Some(4), None],
            &[Some(3), Some(200)],
            &[Some(2), Some(100)],
            &[Some(1), Some(100)],
        ]),
        run(&db, &stmt)
    );
    assert_root_order(&stmt, 0, true);
}

#[test]
fn test_order_by_with_limit() {
    let db = test_database();
    let stmt = SelectStmt::new()
        .field(col("c"))
        .from(TableRef::table("t"))
        .into_query()
        .order_by(col("c"), true)
        .limit(2, 1)
        .into_statement();
    assert_eq!(int_rows(&[&[Some(2)], &[Some(1)]]), run(&db, &stmt));

    let by_value = SelectStmt::new()
        .field(col("x"))
        .field(col("y"))
        .from(TableRef::table("r"))
        .into_query()
        .order_by(col("y"), false)
        .into_statement();
    assert_root_order(&by_value, 1, false);
    assert_eq!(
        int_rows(&[
            &[Some(1), None],
            &[Some(2), Some(20)],
            &[Some(2), Some(21)],
            &[None, Some(30)],
        ]),
        run(&db, &by_value)
    );
}

#[test]
fn test_union() {
    let db = test_database();
    let left = SelectStmt::new()
        .field(col("c"))
        .from(TableRef::table("t"))
        .into_query();
    let right = SelectStmt::new()
        .field(col("x"))
        .from(TableRef::table("r"))
        .into_query();

    let all = left.clone().union(right.clone(), true).into_statement();
    assert_eq!(7, run(&db, &all).len());

    let distinct = left.union(right, false).into_statement();
    assert_eq!(
        int_rows(&[&[None], &[Some(1)], &[Some(2)], &[Some(3)]]),
        sorted(run(&db, &distinct))
    );
}

#[test]
fn test_index_access_paths() {
    let db = test_database();
    let by_unique = SelectStmt::new()
        .field(col("a"))
        .field(col("b"))
        .from(TableRef::table("s"))
        .filter(col("b").eq(lit(20i64)))
        .into_query()
        .into_statement();
    assert!(has_operator(&plan(&db, &by_unique), "PhysicalIndexScan"));
    assert_eq!(int_rows(&[&[Some(2), Some(20)]]), run(&db, &by_unique));

    let by_handle = select_from("s")
        .filter(col("a").gt(lit(2i64)))
        .into_query()
        .into_statement();
    assert_eq!(
        int_rows(&[&[Some(3), None, Some(200)], &[Some(4), Some(40), None]]),
        sorted(run(&db, &by_handle))
    );

    let by_index = select_from("s")
        .filter(col("c").eq(lit(100i64)))
        .into_query()
        .into_statement();
    assert_eq!(
        int_rows(&[&[Some(1), Some(10), Some(100)], &[Some(2), Some(20), Some(100)]]),
        sorted(run(&db, &by_index))
    );
}

#[test]
fn test_count_over_empty_input() {
    let db = test_database();
    let stmt = SelectStmt::new()
        .field(count_star())
        .from(TableRef::table("t"))
        .filter(col("c").gt(lit(10i64)))
        .into_query()
        .into_statement();
    assert_eq!(vec![ints(&[Some(0)])], run(&db, &stmt));
    assert_eq!(
        vec![ints(&[Some(0)])],
        run_with_flags(&db, &stmt, OptFlags::empty())
    );
}

#[test]
fn test_merge_join_reads_sorted_inputs() {
    let db = test_database();
    let stmt = SelectStmt::new()
        .field(col("s1.a"))
        .field(col("s2.b"))
        .from(TableRef::table_as("s", "s1").join(
            TableRef::table_as("s", "s2"),
            AstJoinType::Left,
            col("s1.a").eq(col("s2.a")),
        ))
        .into_query()
        .order_by(col("s1.a"), false)
        .into_statement();
    let physical = plan(&db, &stmt);
    assert!(has_operator(&physical, "PhysicalMergeJoin"));
    assert!(!has_operator(&physical, "PhysicalSort"));
    assert_root_order(&stmt, 0, false);
    assert_eq!(
        int_rows(&[
            &[Some(1), Some(10)],
            &[Some(2), Some(20)],
            &[Some(3), None],
            &[Some(4), Some(40)],
        ]),
        run(&db, &stmt)
    );
}

#[test]
fn test_stream_agg_over_index_order() {
    let db = test_database();
    let stmt = SelectStmt::new()
        .field(col("c"))
        .field(count_star())
        .from(TableRef::table("s"))
        .group_by(vec![col("c")])
        .into_query()
        .into_statement();
    let physical = plan(&db, &stmt);
    assert!(has_operator(&physical, "PhysicalStreamAgg"));
    assert!(has_operator(&physical, "PhysicalIndexScan"));
    assert_orders_hold(physical.root());
    assert_eq!(
        int_rows(&[&[None, Some(1)], &[Some(100), Some(2)], &[Some(200), Some(1)]]),
        sorted(run(&db, &stmt))
    );
}

#[test]
fn test_index_lookup_fetches_table_rows() {
    let db = test_database();
    let stmt = select_from("s")
        .filter(col("c").eq(lit(100i64)))
        .into_query()
        .order_by(col("c"), false)
        .into_statement();
    let physical = plan(&db, &stmt);
    assert!(has_operator(&physical, "PhysicalIndexLookup"));
    assert!(!has_operator(&physical, "PhysicalSort"));
    assert_root_order(&stmt, 2, false);
    assert_eq!(
        int_rows(&[&[Some(1), Some(10), Some(100)], &[Some(2), Some(20), Some(100)]]),
        sorted(run(&db, &stmt))
    );
}
