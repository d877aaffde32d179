//! Type inference over the statement tree.
//!
//! The optimizer only needs one thing from inference: every parameter marker must carry the
//! type of the value bound to it. Inference runs again at the start of every optimization,
//! so a prepared statement re-executed with differently typed values plans with the new
//! types.

use anyhow::bail;
use log::trace;

use crate::ast::{AstExpr, Query, QueryBody, SelectField, SelectStmt, Statement, TableRef};
use crate::error::{OptResult, OptimizerError};

pub trait TypeInferer {
    fn infer(&self, stmt: &mut Statement) -> OptResult<()>;
}

/// Annotates parameter markers with the type of their bound value.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTypeInferer;

impl TypeInferer for DefaultTypeInferer {
    fn infer(&self, stmt: &mut Statement) -> OptResult<()> {
        let mut annotate = |expr: &mut AstExpr| -> OptResult<()> {
            if let AstExpr::Param(param) = expr {
                match &param.value {
                    Some(value) => {
                        let data_type = value.get_datatype();
                        trace!("Parameter ?{} typed as {}", param.order, data_type);
                        param.data_type = Some(data_type);
                    }
                    None => bail!(OptimizerError::Internal(format!(
                        "parameter ?{} is not bound",
                        param.order
                    ))),
                }
            }
            Ok(())
        };
        walk_statement(stmt, &mut annotate)
    }
}

/// Visits every expression of the statement, including sub-queries, parents first.
pub fn walk_statement<F>(stmt: &mut Statement, f: &mut F) -> OptResult<()>
where
    F: FnMut(&mut AstExpr) -> OptResult<()>,
{
    match stmt {
        Statement::Query(query) => walk_query(query, f),
        Statement::Set(set) => set
            .variables
            .iter_mut()
            .try_for_each(|(_, expr)| walk_expr(expr, f)),
        Statement::CreateTable(_) | Statement::DropTable(_) | Statement::Show(_) => Ok(()),
    }
}

fn walk_query<F>(query: &mut Query, f: &mut F) -> OptResult<()>
where
    F: FnMut(&mut AstExpr) -> OptResult<()>,
{
    walk_body(&mut query.body, f)?;
    query
        .order_by
        .iter_mut()
        .try_for_each(|item| walk_expr(&mut item.expr, f))
}

fn walk_body<F>(body: &mut QueryBody, f: &mut F) -> OptResult<()>
where
    F: FnMut(&mut AstExpr) -> OptResult<()>,
{
    match body {
        QueryBody::Select(select) => walk_select(select, f),
        QueryBody::Union { left, right, .. } => {
            walk_body(left, f)?;
            walk_body(right, f)
        }
    }
}

fn walk_select<F>(select: &mut SelectStmt, f: &mut F) -> OptResult<()>
where
    F: FnMut(&mut AstExpr) -> OptResult<()>,
{
    for field in &mut select.fields {
        if let SelectField::Expr { expr, .. } = field {
            walk_expr(expr, f)?;
        }
    }
    if let Some(from) = &mut select.from {
        walk_table_ref(from, f)?;
    }
    if let Some(selection) = &mut select.selection {
        walk_expr(selection, f)?;
    }
    for expr in &mut select.group_by {
        walk_expr(expr, f)?;
    }
    if let Some(having) = &mut select.having {
        walk_expr(having, f)?;
    }
    Ok(())
}

fn walk_table_ref<F>(table: &mut TableRef, f: &mut F) -> OptResult<()>
where
    F: FnMut(&mut AstExpr) -> OptResult<()>,
{
    match table {
        TableRef::Table { .. } => Ok(()),
        TableRef::Derived { query, .. } => walk_query(query, f),
        TableRef::Join {
            left, right, on, ..
        } => {
            walk_table_ref(left, f)?;
            walk_table_ref(right, f)?;
            match on {
                Some(on) => walk_expr(on, f),
                None => Ok(()),
            }
        }
    }
}

fn walk_expr<F>(expr: &mut AstExpr, f: &mut F) -> OptResult<()>
where
    F: FnMut(&mut AstExpr) -> OptResult<()>,
{
    f(expr)?;
    match expr {
        AstExpr::Column(_) | AstExpr::Literal(_) | AstExpr::Param(_) => Ok(()),
        AstExpr::Binary { left, right, .. } => {
            walk_expr(left, f)?;
            walk_expr(right, f)
        }
        AstExpr::Unary { expr, .. } => walk_expr(expr, f),
        AstExpr::InList { expr, list, .. } => {
            walk_expr(expr, f)?;
            list.iter_mut().try_for_each(|e| walk_expr(e, f))
        }
        AstExpr::Row(items) | AstExpr::Function { args: items, .. } => {
            items.iter_mut().try_for_each(|e| walk_expr(e, f))
        }
        AstExpr::Exists { subquery, .. } | AstExpr::Subquery(subquery) => {
            walk_query(subquery, f)
        }
        AstExpr::InSubquery { expr, subquery, .. } => {
            walk_expr(expr, f)?;
            walk_query(subquery, f)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{col, exists, param, SelectStmt, TableRef};
    use arrow_schema::DataType;
    use datafusion_common::ScalarValue;

    fn params(stmt: &Statement) -> Vec<Option<DataType>> {
        let mut stmt = stmt.clone();
        let mut types = vec![];
        walk_statement(&mut stmt, &mut |expr| {
            if let AstExpr::Param(p) = expr {
                types.push(p.data_type.clone());
            }
            Ok(())
        })
        .unwrap();
        types
    }

    #[test]
    fn test_annotate_params_in_subqueries() {
        let inner = SelectStmt::new()
            .wildcard()
            .from(TableRef::table("s"))
            .filter(col("s.b").eq(param(1, ScalarValue::Utf8(Some("x".to_string())))))
            .into_query();
        let mut stmt = SelectStmt::new()
            .wildcard()
            .from(TableRef::table("t"))
            .filter(
                col("a")
                    .eq(param(0, ScalarValue::Int32(Some(1))))
                    .and(exists(inner)),
            )
            .into_query()
            .into_statement();

        assert_eq!(vec![None, None], params(&stmt));
        DefaultTypeInferer.infer(&mut stmt).unwrap();
        assert_eq!(
            vec![Some(DataType::Int32), Some(DataType::Utf8)],
            params(&stmt)
        );
    }

    #[test]
    fn test_unbound_param() {
        let mut stmt = SelectStmt::new()
            .field(AstExpr::Param(crate::ast::ParamMarker {
                order: 0,
                value: None,
                data_type: None,
            }))
            .into_query()
            .into_statement();
        assert!(DefaultTypeInferer.infer(&mut stmt).is_err());
    }
}
