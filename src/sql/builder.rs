//! Builds parameterized SELECT, INSERT, UPDATE, DELETE from table descriptors and predicates.

use crate::error::StoreError;
use crate::schema::{ScalarKind, Table};
use crate::sql::params::{pg_type, text_param};
use crate::store::{Predicate, Query};
use serde_json::Value;

/// Quote identifier for PostgreSQL (safe: only from config).
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quoted(schema), quoted(table))
}

/// SQL text plus text-encoded parameters; each placeholder carries its own cast.
#[derive(Debug)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Option<String>>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push_param(&mut self, kind: ScalarKind, v: &Value) -> String {
        self.params.push(text_param(kind, v));
        format!("${}::{}", self.params.len(), pg_type(kind))
    }
}

fn column_kind(table: &Table<'_>, column: &str) -> Result<ScalarKind, StoreError> {
    table
        .columns
        .iter()
        .find(|c| c.name == column)
        .map(|c| c.kind)
        .ok_or_else(|| StoreError::Other(format!("unknown column {}.{}", table.name, column)))
}

/// Every column as JSON so rows decode uniformly regardless of the SQL type.
fn select_column_list(table: &Table<'_>) -> String {
    table
        .columns
        .iter()
        .map(|c| format!("to_jsonb({}) AS {}", quoted(&c.name), quoted(&c.name)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn predicate_sql(q: &mut QueryBuf, table: &Table<'_>, predicate: &Predicate) -> Result<String, StoreError> {
    Ok(match predicate {
        Predicate::Eq(column, Value::Null) => {
            column_kind(table, column)?;
            format!("{} IS NULL", quoted(column))
        }
        Predicate::Eq(column, value) => {
            let kind = column_kind(table, column)?;
            let ph = q.push_param(kind, value);
            format!("{} = {}", quoted(column), ph)
        }
        Predicate::And(terms) if terms.is_empty() => "TRUE".to_string(),
        Predicate::Or(terms) if terms.is_empty() => "FALSE".to_string(),
        Predicate::And(terms) | Predicate::Or(terms) => {
            let glue = if matches!(predicate, Predicate::And(_)) { " AND " } else { " OR " };
            let mut parts = Vec::with_capacity(terms.len());
            for t in terms {
                parts.push(predicate_sql(q, table, t)?);
            }
            format!("({})", parts.join(glue))
        }
    })
}

/// SELECT with optional predicate, ORDER BY and LIMIT/OFFSET.
pub fn select(table: &Table<'_>, schema: &str, query: &Query) -> Result<QueryBuf, StoreError> {
    let mut q = QueryBuf::new();
    let where_clause = match &query.filter {
        Some(p) => format!(" WHERE {}", predicate_sql(&mut q, table, p)?),
        None => String::new(),
    };
    let mut order = Vec::with_capacity(query.order_by.len());
    for c in &query.order_by {
        column_kind(table, c)?;
        order.push(quoted(c));
    }
    let order_clause = if order.is_empty() {
        String::new()
    } else {
        format!(" ORDER BY {}", order.join(", "))
    };
    let limit_clause = query.limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let offset_clause = query.offset.map(|n| format!(" OFFSET {}", n)).unwrap_or_default();
    q.sql = format!(
        "SELECT {} FROM {}{}{}{}{}",
        select_column_list(table),
        qualified_table(schema, table.name),
        where_clause,
        order_clause,
        limit_clause,
        offset_clause
    );
    Ok(q)
}

/// INSERT of the columns present in the row, in table column order.
pub fn insert(table: &Table<'_>, schema: &str, row: &crate::model::Row) -> Result<QueryBuf, StoreError> {
    let mut q = QueryBuf::new();
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for k in row.keys() {
        column_kind(table, k)?;
    }
    for c in table.columns {
        let Some(v) = row.get(&c.name) else { continue };
        placeholders.push(q.push_param(c.kind, v));
        cols.push(quoted(&c.name));
    }
    q.sql = if cols.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES", qualified_table(schema, table.name))
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            qualified_table(schema, table.name),
            cols.join(", "),
            placeholders.join(", ")
        )
    };
    Ok(q)
}

/// UPDATE rows matching the predicate.
pub fn update(
    table: &Table<'_>,
    schema: &str,
    filter: &Predicate,
    values: &crate::model::Row,
) -> Result<QueryBuf, StoreError> {
    let mut q = QueryBuf::new();
    let mut sets = Vec::with_capacity(values.len());
    for (k, v) in values {
        let kind = column_kind(table, k)?;
        let rhs = q.push_param(kind, v);
        sets.push(format!("{} = {}", quoted(k), rhs));
    }
    let where_sql = predicate_sql(&mut q, table, filter)?;
    q.sql = format!(
        "UPDATE {} SET {} WHERE {}",
        qualified_table(schema, table.name),
        sets.join(", "),
        where_sql
    );
    Ok(q)
}

/// DELETE rows matching the predicate.
pub fn delete(table: &Table<'_>, schema: &str, filter: &Predicate) -> Result<QueryBuf, StoreError> {
    let mut q = QueryBuf::new();
    let where_sql = predicate_sql(&mut q, table, filter)?;
    q.sql = format!("DELETE FROM {} WHERE {}", qualified_table(schema, table.name), where_sql);
    Ok(q)
}
