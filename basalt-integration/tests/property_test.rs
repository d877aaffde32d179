mod utils;

use arrow_schema::DataType;
use basalt::ast::{
    col, count_star, exists, func, lit, subquery, AstJoinType, SelectStmt, Statement, TableRef,
};
use basalt::catalog::{ColumnInfo, IndexInfo, TableInfo};
use basalt::rules::{OptFlags, RuleId};
use basalt_integration::MemDatabase;
use proptest::prelude::*;

use crate::utils::{ints, run_with_flags, sorted};

fn int_column(name: &str, nullable: bool) -> ColumnInfo {
    ColumnInfo {
        name: name.to_string(),
        data_type: DataType::Int64,
        nullable,
    }
}

/// `p(k, g, v)` clustered on `k`, and `q(g, w)` without indices.
fn database(p_rows: &[(Option<i64>, Option<i64>)], q_rows: &[(Option<i64>, Option<i64>)]) -> MemDatabase {
    let mut p = TableInfo::new(
        "p",
        vec![int_column("k", false), int_column("g", true), int_column("v", true)],
    );
    p.indices.push(IndexInfo {
        name: "primary".to_string(),
        columns: vec!["k".to_string()],
        unique: true,
        primary: true,
    });
    p.pk_is_handle = true;
    let q = TableInfo::new("q", vec![int_column("g", true), int_column("w", true)]);

    let mut db = MemDatabase::new();
    db.create_table(p).unwrap();
    db.create_table(q).unwrap();
    db.insert(
        "p",
        p_rows
            .iter()
            .enumerate()
            .map(|(idx, (g, v))| ints(&[Some(idx as i64 + 1), *g, *v])),
    )
    .unwrap();
    db.insert("q", q_rows.iter().map(|(g, w)| ints(&[*g, *w])))
        .unwrap();
    db
}

fn rows_strategy() -> impl Strategy<Value = Vec<(Option<i64>, Option<i64>)>> {
    prop::collection::vec(
        (prop::option::of(0i64..4), prop::option::of(-3i64..4)),
        0..10,
    )
}

fn without(rule: RuleId) -> OptFlags {
    let mut flags = OptFlags::all();
    flags.remove(rule);
    flags
}

fn assert_same_rows(db: &MemDatabase, stmt: &Statement, left: OptFlags, right: OptFlags) {
    assert_eq!(
        sorted(run_with_flags(db, stmt, left)),
        sorted(run_with_flags(db, stmt, right)),
        "{stmt:?} differs between {left:?} and {right:?}"
    );
}

fn p_join_q() -> TableRef {
    TableRef::table("p").join(TableRef::table("q"), AstJoinType::Inner, col("p.g").eq(col("q.g")))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_aggregation_on_key_eliminated(p_rows in rows_strategy()) {
        let db = database(&p_rows, &[]);
        let stmt = SelectStmt::new()
            .field(col("k"))
            .field(func("sum", vec![col("v")]))
            .field(count_star())
            .field(func("count", vec![col("g")]))
            .field(func("max", vec![col("g")]))
            .field(func("avg", vec![col("v")]))
            .from(TableRef::table("p"))
            .group_by(vec![col("k")])
            .into_query()
            .into_statement();
        assert_same_rows(&db, &stmt, OptFlags::all(), without(RuleId::EliminateAgg));
        assert_same_rows(&db, &stmt, OptFlags::all(), OptFlags::empty());
    }

    #[test]
    fn test_aggregation_pushed_through_join(
        p_rows in rows_strategy(),
        q_rows in rows_strategy(),
    ) {
        let db = database(&p_rows, &q_rows);
        let stmt = SelectStmt::new()
            .field(col("p.g"))
            .field(func("sum", vec![col("w")]))
            .field(func("sum", vec![col("v")]))
            .field(count_star())
            .field(func("min", vec![col("w")]))
            .from(p_join_q())
            .group_by(vec![col("p.g")])
            .into_query()
            .into_statement();
        assert_same_rows(&db, &stmt, OptFlags::all(), without(RuleId::AggPushDown));
        assert_same_rows(&db, &stmt, OptFlags::all(), OptFlags::empty());

        let scalar = SelectStmt::new()
            .field(func("sum", vec![col("w")]))
            .field(count_star())
            .from(p_join_q())
            .into_query()
            .into_statement();
        assert_same_rows(&db, &scalar, OptFlags::all(), OptFlags::empty());
    }

    #[test]
    fn test_column_pruning_keeps_results(
        p_rows in rows_strategy(),
        q_rows in rows_strategy(),
        picked in prop::collection::vec(any::<bool>(), 4),
        bound in -3i64..4,
    ) {
        let db = database(&p_rows, &q_rows);
        let names = ["p.k", "p.g", "p.v", "q.w"];
        let mut select = SelectStmt::new();
        for (name, keep) in names.iter().zip(&picked) {
            if *keep {
                select = select.field(col(name));
            }
        }
        if select.fields.is_empty() {
            select = select.field(col("q.g"));
        }
        let stmt = select
            .from(p_join_q())
            .filter(col("p.v").gt(lit(bound)))
            .into_query()
            .into_statement();
        assert_same_rows(&db, &stmt, OptFlags::all(), without(RuleId::ColumnPruning));
        assert_same_rows(&db, &stmt, OptFlags::all(), OptFlags::empty());
    }

    #[test]
    fn test_decorrelation_with_nulls(
        p_rows in rows_strategy(),
        q_rows in rows_strategy(),
    ) {
        let db = database(&p_rows, &q_rows);
        let q_g = || {
            SelectStmt::new()
                .field(col("g"))
                .from(TableRef::table("q"))
                .into_query()
        };
        let statements = vec![
            SelectStmt::new()
                .field(col("k"))
                .from(TableRef::table("p"))
                .filter(col("g").in_subquery(q_g()))
                .into_query()
                .into_statement(),
            SelectStmt::new()
                .field(col("k"))
                .from(TableRef::table("p"))
                .filter(col("g").not_in_subquery(q_g()))
                .into_query()
                .into_statement(),
            SelectStmt::new()
                .field(col("k"))
                .from(TableRef::table("p"))
                .filter(exists(
                    SelectStmt::new()
                        .wildcard()
                        .from(TableRef::table("q"))
                        .filter(col("q.g").eq(col("p.g")).and(col("q.w").gt(col("p.v"))))
                        .into_query(),
                ))
                .into_query()
                .into_statement(),
            SelectStmt::new()
                .field(col("k"))
                .field_as(
                    subquery(
                        SelectStmt::new()
                            .field(func("sum", vec![col("w")]))
                            .from(TableRef::table("q"))
                            .filter(col("q.g").eq(col("p.g")))
                            .into_query(),
                    ),
                    "total",
                )
                .from(TableRef::table("p"))
                .into_query()
                .into_statement(),
        ];
        for stmt in &statements {
            assert_same_rows(&db, stmt, OptFlags::all(), OptFlags::empty());
            assert_same_rows(&db, stmt, OptFlags::all(), without(RuleId::Decorrelate));
        }
    }
}
