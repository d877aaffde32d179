//! Statements as handed over by the SQL parser.
//!
//! There is no lexer or parser in this crate: callers construct these types directly, tests
//! use the fluent helpers defined here.

pub mod infer;

use std::fmt::{Display, Formatter};

use arrow_schema::DataType;
use datafusion_common::ScalarValue;

use crate::catalog::TableInfo;
use crate::expr::{BinaryOp, UnaryOp};

#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    Query(Box<Query>),
    Set(SetStmt),
    CreateTable(CreateTableStmt),
    DropTable(DropTableStmt),
    Show(ShowStmt),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub body: QueryBody,
    pub order_by: Vec<OrderByItem>,
    pub limit: Option<LimitClause>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum QueryBody {
    Select(Box<SelectStmt>),
    Union {
        left: Box<QueryBody>,
        right: Box<QueryBody>,
        all: bool,
    },
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct SelectStmt {
    pub distinct: bool,
    pub fields: Vec<SelectField>,
    pub from: Option<TableRef>,
    pub selection: Option<AstExpr>,
    pub group_by: Vec<AstExpr>,
    pub having: Option<AstExpr>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SelectField {
    /// `*` or `t.*`.
    Wildcard { table: Option<String> },
    Expr { expr: AstExpr, alias: Option<String> },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AstJoinType {
    Inner,
    Left,
    Right,
    Cross,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TableRef {
    Table {
        name: String,
        alias: Option<String>,
    },
    Derived {
        query: Box<Query>,
        alias: String,
    },
    Join {
        left: Box<TableRef>,
        right: Box<TableRef>,
        join_type: AstJoinType,
        on: Option<AstExpr>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderByItem {
    pub expr: AstExpr,
    pub desc: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LimitClause {
    pub count: u64,
    pub offset: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ColumnName {
    pub table: Option<String>,
    pub name: String,
}

/// A `?` placeholder of a prepared statement.
#[derive(Clone, Debug, PartialEq)]
pub struct ParamMarker {
    pub order: usize,
    pub value: Option<ScalarValue>,
    /// Set by type inference.
    pub data_type: Option<DataType>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AstExpr {
    Column(ColumnName),
    Literal(ScalarValue),
    Param(ParamMarker),
    Binary {
        op: BinaryOp,
        left: Box<AstExpr>,
        right: Box<AstExpr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<AstExpr>,
    },
    InList {
        expr: Box<AstExpr>,
        list: Vec<AstExpr>,
        negated: bool,
    },
    /// Row constructor `(a, b)` or `ROW(a, b)`.
    Row(Vec<AstExpr>),
    /// Function call, aggregates are recognized by name. No arguments means `*`.
    Function {
        name: String,
        args: Vec<AstExpr>,
        distinct: bool,
    },
    Exists {
        subquery: Box<Query>,
        negated: bool,
    },
    InSubquery {
        expr: Box<AstExpr>,
        subquery: Box<Query>,
        negated: bool,
    },
    Subquery(Box<Query>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct SetStmt {
    pub variables: Vec<(String, AstExpr)>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CreateTableStmt {
    pub table: TableInfo,
    pub if_not_exists: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DropTableStmt {
    pub names: Vec<String>,
    pub if_exists: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ShowStmt {
    Tables,
    Columns { table: String },
    Variables,
}

pub fn col(name: &str) -> AstExpr {
    let column = match name.split_once('.') {
        Some((table, name)) => ColumnName {
            table: Some(table.to_string()),
            name: name.to_string(),
        },
        None => ColumnName {
            table: None,
            name: name.to_string(),
        },
    };
    AstExpr::Column(column)
}

pub fn lit<V: Into<ScalarValue>>(value: V) -> AstExpr {
    AstExpr::Literal(value.into())
}

pub fn param(order: usize, value: ScalarValue) -> AstExpr {
    AstExpr::Param(ParamMarker {
        order,
        value: Some(value),
        data_type: None,
    })
}

pub fn func(name: &str, args: Vec<AstExpr>) -> AstExpr {
    AstExpr::Function {
        name: name.to_string(),
        args,
        distinct: false,
    }
}

pub fn count_star() -> AstExpr {
    func("count", vec![])
}

pub fn row(items: Vec<AstExpr>) -> AstExpr {
    AstExpr::Row(items)
}

pub fn exists(subquery: Query) -> AstExpr {
    AstExpr::Exists {
        subquery: Box::new(subquery),
        negated: false,
    }
}

pub fn not_exists(subquery: Query) -> AstExpr {
    AstExpr::Exists {
        subquery: Box::new(subquery),
        negated: true,
    }
}

pub fn subquery(query: Query) -> AstExpr {
    AstExpr::Subquery(Box::new(query))
}

impl AstExpr {
    pub fn binary(self, op: BinaryOp, right: AstExpr) -> AstExpr {
        AstExpr::Binary {
            op,
            left: Box::new(self),
            right: Box::new(right),
        }
    }

    pub fn eq(self, right: AstExpr) -> AstExpr {
        self.binary(BinaryOp::Eq, right)
    }

    pub fn lt(self, right: AstExpr) -> AstExpr {
        self.binary(BinaryOp::Lt, right)
    }

    pub fn gt(self, right: AstExpr) -> AstExpr {
        self.binary(BinaryOp::Gt, right)
    }

    pub fn and(self, right: AstExpr) -> AstExpr {
        self.binary(BinaryOp::And, right)
    }

    pub fn or(self, right: AstExpr) -> AstExpr {
        self.binary(BinaryOp::Or, right)
    }

    pub fn not(self) -> AstExpr {
        AstExpr::Unary {
            op: UnaryOp::Not,
            expr: Box::new(self),
        }
    }

    pub fn is_null(self) -> AstExpr {
        AstExpr::Unary {
            op: UnaryOp::IsNull,
            expr: Box::new(self),
        }
    }

    pub fn in_subquery(self, subquery: Query) -> AstExpr {
        AstExpr::InSubquery {
            expr: Box::new(self),
            subquery: Box::new(subquery),
            negated: false,
        }
    }

    pub fn not_in_subquery(self, subquery: Query) -> AstExpr {
        AstExpr::InSubquery {
            expr: Box::new(self),
            subquery: Box::new(subquery),
            negated: true,
        }
    }

    pub fn in_list(self, list: Vec<AstExpr>) -> AstExpr {
        AstExpr::InList {
            expr: Box::new(self),
            list,
            negated: false,
        }
    }
}

impl SelectStmt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, expr: AstExpr) -> Self {
        self.fields.push(SelectField::Expr { expr, alias: None });
        self
    }

    pub fn field_as(mut self, expr: AstExpr, alias: &str) -> Self {
        self.fields.push(SelectField::Expr {
            expr,
            alias: Some(alias.to_string()),
        });
        self
    }

    pub fn wildcard(mut self) -> Self {
        self.fields.push(SelectField::Wildcard { table: None });
        self
    }

    pub fn from(mut self, table: TableRef) -> Self {
        self.from = Some(table);
        self
    }

    pub fn filter(mut self, expr: AstExpr) -> Self {
        self.selection = Some(expr);
        self
    }

    pub fn group_by(mut self, exprs: Vec<AstExpr>) -> Self {
        self.group_by = exprs;
        self
    }

    pub fn having(mut self, expr: AstExpr) -> Self {
        self.having = Some(expr);
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn into_query(self) -> Query {
        Query {
            body: QueryBody::Select(Box::new(self)),
            order_by: vec![],
            limit: None,
        }
    }
}

impl Query {
    pub fn order_by(mut self, expr: AstExpr, desc: bool) -> Self {
        self.order_by.push(OrderByItem { expr, desc });
        self
    }

    pub fn limit(mut self, count: u64, offset: u64) -> Self {
        self.limit = Some(LimitClause { count, offset });
        self
    }

    pub fn union(self, other: Query, all: bool) -> Self {
        Query {
            body: QueryBody::Union {
                left: Box::new(self.body),
                right: Box::new(other.body),
                all,
            },
            order_by: vec![],
            limit: None,
        }
    }

    pub fn into_statement(self) -> Statement {
        Statement::Query(Box::new(self))
    }
}

impl TableRef {
    pub fn table(name: &str) -> Self {
        TableRef::Table {
            name: name.to_string(),
            alias: None,
        }
    }

    pub fn table_as(name: &str, alias: &str) -> Self {
        TableRef::Table {
            name: name.to_string(),
            alias: Some(alias.to_string()),
        }
    }

    pub fn derived(query: Query, alias: &str) -> Self {
        TableRef::Derived {
            query: Box::new(query),
            alias: alias.to_string(),
        }
    }

    pub fn join(self, right: TableRef, join_type: AstJoinType, on: AstExpr) -> Self {
        TableRef::Join {
            left: Box::new(self),
            right: Box::new(right),
            join_type,
            on: Some(on),
        }
    }

    /// Comma join.
    pub fn cross(self, right: TableRef) -> Self {
        TableRef::Join {
            left: Box::new(self),
            right: Box::new(right),
            join_type: AstJoinType::Cross,
            on: None,
        }
    }
}

impl Display for ColumnName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{}.{}", table, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

fn write_list(f: &mut Formatter<'_>, items: &[AstExpr]) -> std::fmt::Result {
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

/// Renders the expression as the name of an unaliased select field.
impl Display for AstExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AstExpr::Column(c) => write!(f, "{c}"),
            AstExpr::Literal(v) if v.is_null() => write!(f, "NULL"),
            AstExpr::Literal(ScalarValue::Utf8(Some(s))) => write!(f, "'{s}'"),
            AstExpr::Literal(v) => write!(f, "{v}"),
            AstExpr::Param(_) => write!(f, "?"),
            AstExpr::Binary { op, left, right } => {
                write!(f, "{left} {} {right}", op.symbol())
            }
            AstExpr::Unary { op, expr } => match op {
                UnaryOp::Not => write!(f, "NOT {expr}"),
                UnaryOp::Neg => write!(f, "-{expr}"),
                UnaryOp::IsNull => write!(f, "{expr} IS NULL"),
                UnaryOp::IsNotNull => write!(f, "{expr} IS NOT NULL"),
                UnaryOp::IsTrue => write!(f, "{expr} IS TRUE"),
                UnaryOp::IsFalse => write!(f, "{expr} IS FALSE"),
            },
            AstExpr::InList {
                expr,
                list,
                negated,
            } => {
                write!(f, "{expr} {}IN (", if *negated { "NOT " } else { "" })?;
                write_list(f, list)?;
                write!(f, ")")
            }
            AstExpr::Row(items) => {
                write!(f, "(")?;
                write_list(f, items)?;
                write!(f, ")")
            }
            AstExpr::Function {
                name,
                args,
                distinct,
            } => {
                write!(f, "{}(", name.to_ascii_lowercase())?;
                if *distinct {
                    write!(f, "distinct ")?;
                }
                if args.is_empty() {
                    write!(f, "*")?;
                }
                write_list(f, args)?;
                write!(f, ")")
            }
            AstExpr::Exists { negated, .. } => {
                write!(f, "{}exists(subquery)", if *negated { "not " } else { "" })
            }
            AstExpr::InSubquery { expr, negated, .. } => {
                write!(f, "{expr} {}in (subquery)", if *negated { "not " } else { "" })
            }
            AstExpr::Subquery(_) => write!(f, "(subquery)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_names() {
        assert_eq!("t.a", col("t.a").to_string());
        assert_eq!("sum(c)", func("SUM", vec![col("c")]).to_string());
        assert_eq!("count(*)", count_star().to_string());
        assert_eq!("a + 1", col("a").binary(BinaryOp::Plus, lit(1i64)).to_string());
        assert_eq!("(1, 'x')", row(vec![lit(1i64), lit("x")]).to_string());
    }
}
